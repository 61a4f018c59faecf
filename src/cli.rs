use clap::Parser;

use dearc::OpenOptions;
use dearc::io::DEFAULT_CACHE_SIZE;

#[derive(Parser, Debug)]
#[command(name = "dearc")]
#[command(version)]
#[command(about = "Lists, tests and extracts legacy ZIP and ARC archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  dearc -lt GAMES.ZIP              list and test GAMES.ZIP\n  \
  dearc -ltn AVC-8.ZIP             same, scanning for files instead of trusting the directory\n  \
  dearc -d out -r disks/*.ARC      extract ARC archives (and archives inside them) into out/\n  \
  dearc -i list                    show available filters")]
pub struct Cli {
    /// Archive paths or HTTP URLs
    #[arg(value_name = "ARCHIVES")]
    pub archives: Vec<String>,

    /// Process archives listed in the specified file
    #[arg(long, value_name = "FILE")]
    pub batch: Option<String>,

    /// Display archive (banner) comments
    #[arg(short = 'b', long)]
    pub banner: bool,

    /// Display debug information
    #[arg(short = 'u', long)]
    pub debug: bool,

    /// Extract files into the specified directory (or SEARCH=REPLACE on
    /// the archive's directory)
    #[arg(short = 'd', long, value_name = "DIR")]
    pub dir: Option<String>,

    /// Extract files (implied by --dir)
    #[arg(short = 'e', long)]
    pub extract: bool,

    /// File specification (eg, "*.txt")
    #[arg(short = 'f', long, value_name = "SPEC")]
    pub files: Option<String>,

    /// Comma-separated filter list (see --filter list)
    #[arg(short = 'i', long, value_name = "LIST")]
    pub filter: Option<String>,

    /// List contents of specified archive(s)
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Skip directory entries (scan for files instead)
    #[arg(short = 'n', long)]
    pub nodir: bool,

    /// Overwrite existing files when extracting
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Decrypt "garbled" entries using password
    #[arg(short = 'g', long, value_name = "PWD")]
    pub password: Option<String>,

    /// Process archives within archives
    #[arg(short = 'r', long)]
    pub recurse: bool,

    /// Display total files and warnings for archive(s)
    #[arg(short = 's', long)]
    pub summary: bool,

    /// Test contents of specified archive(s)
    #[arg(short = 't', long)]
    pub test: bool,

    /// Display detailed information about archive(s)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Cache window size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,
}

impl Cli {
    pub fn is_extracting(&self) -> bool {
        self.extract || self.dir.is_some()
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            cache_size: self.cache_size,
            password: self.password.as_ref().map(|p| p.as_bytes().to_vec()),
            nodirs: self.nodir,
            ..OpenOptions::default()
        }
    }
}
