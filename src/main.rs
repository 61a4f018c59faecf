//! Main entry point for the dearc CLI application.
//!
//! Lists, tests and extracts the archives named on the command line (or in
//! a batch file), optionally descending into archives stored inside them.

mod cli;

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use dearc::archive::{ARC_METHOD_NAMES, NO_METHOD_FILTER, ZIP_METHOD_NAMES};
use dearc::io::is_http_url;
use dearc::{
    Archive, ArchiveKind, ByteSource, Entry, EntryFilter, Error, Exception, HttpRangeReader, OpenOptions,
    Sink,
};

/// Exception flags users can filter on.
const FILTER_EXCEPTIONS: [Exception; 5] = [
    Exception::Banner,
    Exception::Comment,
    Exception::Encrypted,
    Exception::Split,
    Exception::WrongType,
];

/// Application entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let Some(filter) = parse_filter(&cli) else {
        return Ok(());
    };

    let mut paths = Vec::new();
    if let Some(batch) = &cli.batch {
        match tokio::fs::read_to_string(batch).await {
            Ok(lines) => paths.extend(
                lines
                    .lines()
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            ),
            Err(err) => println!("{batch}: {err}"),
        }
    }
    paths.extend(cli.archives.iter().cloned());

    let mut driver = Driver {
        options: cli.open_options(),
        filter,
        archive_count: paths.len(),
        totals: Counts::default(),
        archives: 0,
        cli,
    };

    for path in &paths {
        let counts = driver.process_path(path).await;
        if driver.cli.summary {
            println!(
                "{}{path}: {} file{}, {} warning{}",
                if driver.cli.list && counts.files > 0 { "\n" } else { "" },
                counts.files,
                plural(counts.files),
                counts.warnings,
                plural(counts.warnings)
            );
        }
    }

    println!(
        "\n{} archive{} examined, {} file{} processed",
        driver.archives,
        plural(driver.archives),
        driver.totals.files,
        plural(driver.totals.files)
    );
    Ok(())
}

/// Install the log subscriber. `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default = if debug { "dearc=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Build the entry filter from `--files` and `--filter`. Returns `None`
/// after reporting an unknown filter name.
fn parse_filter(cli: &Cli) -> Option<EntryFilter> {
    let mut names = Vec::new();
    for name in cli.filter.iter().flat_map(|list| list.split(',')).map(str::trim) {
        if name.eq_ignore_ascii_case("list") {
            print_filters();
        } else if !name.is_empty() {
            names.push(name);
        }
    }
    let filter = match EntryFilter::parse_list(&names.join(",")) {
        Ok(filter) => filter,
        Err(err) => {
            println!("{err}");
            return None;
        }
    };
    Some(filter.with_names(cli.files.clone()))
}

fn print_filters() {
    println!("\nAvailable filters:");
    for exception in FILTER_EXCEPTIONS {
        println!("{:>12}: {}", exception.name(), exception.description());
    }
    let zip = ZIP_METHOD_NAMES.iter().enumerate().map(|(i, name)| (*name, i as i32));
    let arc = ARC_METHOD_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, -(i as i32 + 2)));
    for (name, value) in zip.chain(arc).filter(|(name, _)| !name.is_empty()) {
        println!(
            "{:>12}: process only entries using {name} compression ({value})",
            name.to_lowercase()
        );
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Files processed and warnings seen; an entry or archive with any number
/// of warnings counts once.
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    files: usize,
    warnings: usize,
}

impl Counts {
    fn merge(&mut self, other: Counts) {
        self.files += other.files;
        self.warnings += other.warnings;
    }
}

struct Driver {
    cli: Cli,
    options: OpenOptions,
    filter: EntryFilter,
    /// Number of top-level archive paths.
    archive_count: usize,
    /// Archives opened, nested ones included.
    archives: usize,
    totals: Counts,
}

impl Driver {
    fn filtering(&self) -> bool {
        !self.filter.exceptions.is_empty() || self.filter.method != NO_METHOD_FILTER
    }

    async fn process_path(&mut self, path: &str) -> Counts {
        self.archives += 1;
        if self.archives % 10000 == 0 && !self.cli.verbose && !self.cli.list {
            println!("{} archives processed", self.archives);
        }
        let failed = Counts {
            files: 0,
            warnings: 1,
        };

        // Remote archives get their reader built here so the transfer can be
        // reported afterwards
        let mut options = self.options.clone();
        let mut remote = None;
        let source = if is_http_url(path) {
            match HttpRangeReader::new(path.to_string()).await {
                Ok(reader) => {
                    let reader = Arc::new(reader);
                    remote = Some(reader.clone());
                    options.kind_hint = ArchiveKind::from_extension(path);
                    ByteSource::Reader(reader)
                }
                Err(err) => {
                    println!("{path}: {err:#}");
                    return failed;
                }
            }
        } else {
            ByteSource::from_locator(path)
        };

        let counts = match Archive::open(source, options).await {
            Ok(archive) => self.run_archive(archive, path.to_string(), false).await,
            Err(err) => {
                println!("{err}");
                failed
            }
        };
        if let (true, Some(reader)) = (self.cli.verbose, remote) {
            println!("{path}: {} transferred", format_size(reader.transferred_bytes()));
        }
        counts
    }

    /// Process one open archive and close it. Boxed because nested archives
    /// recurse through here.
    fn run_archive(
        &mut self,
        mut archive: Archive,
        path: String,
        nested: bool,
    ) -> Pin<Box<dyn Future<Output = Counts> + '_>> {
        Box::pin(async move {
            let mut counts = Counts::default();
            if let Err(err) = self.process_archive(&mut archive, &path, nested, &mut counts).await {
                println!("{path}: {err:#}");
            }
            archive.close();
            counts
        })
    }

    async fn process_archive(
        &mut self,
        archive: &mut Archive,
        path: &str,
        nested: bool,
        counts: &mut Counts,
    ) -> Result<()> {
        let entries = archive.read_directory(&self.filter).await?;
        let loud = self.cli.verbose || !nested;
        if !archive.warnings().is_empty() {
            counts.warnings += 1;
        }
        if archive.exceptions().contains(Exception::NoFiles) {
            if loud {
                println!("{path}: not an archive");
            }
        } else if !archive.warnings().is_empty() && loud {
            println!("{} warnings: {}", base_name(path), archive.warnings());
        }

        let destination = if entries.is_empty() {
            PathBuf::new()
        } else {
            self.destination(path)
        };
        let mut heading = false;

        for mut entry in entries {
            if entry.is_volume_label() || entry.is_directory() {
                continue;
            }
            if !heading {
                if self.cli.list || self.filtering() {
                    if self.cli.list {
                        println!();
                    }
                    let continued = if counts.files > 0 { " (continued)" } else { "" };
                    println!("{path}{continued}");
                }
                if let Some(banner) = archive.comment() {
                    if self.cli.banner && counts.files == 0 {
                        println!("{banner}");
                    }
                }
                if self.cli.list {
                    println!("\nFilename        Length   Method       Size  Ratio   Date       Time       CRC");
                    println!("--------        ------   ------       ----  -----   ----       ----       ---");
                }
                heading = true;
            }
            self.totals.files += 1;
            counts.files += 1;

            let recurse = self.cli.recurse && ArchiveKind::from_extension(entry.name()).is_some();
            let mut printed = false;
            let mut data = None;
            if self.cli.is_extracting() || self.cli.test || recurse {
                if self.cli.debug {
                    println!("reading {}", entry.name());
                    printed = true;
                }
                let mut sink = (self.cli.is_extracting() && !recurse).then(|| {
                    FileSink::new(
                        destination.join(safe_path(entry.name())),
                        self.cli.overwrite,
                        self.cli.verbose,
                        entry.modified(),
                    )
                });
                data = match archive.read_file(&mut entry, sink.as_mut().map(|s| s as &mut dyn Sink)).await {
                    Ok(bytes) => Some(bytes),
                    // Already recorded as entry warnings
                    Err(Error::NeedsPassword(_) | Error::NotLocatable(_)) => None,
                    Err(err) => return Err(err.into()),
                };
            }
            if !entry.warnings().is_empty() {
                counts.warnings += 1;
            }

            if self.cli.list {
                println!("{}", listing_row(&entry, archive.kind()));
            } else if self.cli.debug && !printed {
                println!("listing {}", entry.name());
            }

            if let (true, Some(bytes)) = (recurse, data) {
                let nested_path = nested_path(path, entry.name());
                match archive.open_nested(&entry, bytes).await {
                    Ok(Some(inner)) => {
                        self.archives += 1;
                        let nested_counts = self.run_archive(inner, nested_path, true).await;
                        if nested_counts.files > 0 {
                            heading = false;
                        }
                        counts.merge(nested_counts);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        self.archives += 1;
                        if self.cli.verbose {
                            println!("{nested_path}: {err}");
                        }
                        counts.warnings += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Where an archive's files are extracted to.
    ///
    /// `--dir SEARCH=REPLACE` rewrites the archive's own directory. Unless
    /// the destination is exactly ".", files land in a subdirectory named
    /// after the archive whenever no directory was given or several
    /// archives are being processed.
    fn destination(&self, path: &str) -> PathBuf {
        let source = Path::new(path).parent().unwrap_or(Path::new("")).to_string_lossy().into_owned();
        let mut destination = self.cli.dir.clone().unwrap_or_default();
        if let Some((search, replace)) = destination.split_once('=') {
            destination = if source.contains(search) {
                source.replacen(search, replace, 1)
            } else {
                println!("warning: source path {source} does not contain {search}");
                replace.to_string()
            };
        }
        if destination == "." {
            return PathBuf::from(destination);
        }
        let mut destination = PathBuf::from(destination);
        if destination.as_os_str().is_empty() || self.archive_count > 1 {
            destination.push(file_stem(path));
        }
        destination
    }
}

fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Display path of an archive found inside another one.
fn nested_path(parent: &str, name: &str) -> String {
    let base = Path::new(parent).parent().unwrap_or(Path::new(""));
    base.join(file_stem(parent)).join(name).to_string_lossy().into_owned()
}

/// Keep only the normal components of an entry name, so nothing is written
/// outside the destination.
fn safe_path(name: &str) -> PathBuf {
    Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// One line of `--list` output.
fn listing_row(entry: &Entry, kind: ArchiveKind) -> String {
    let mut method = entry.method().name();
    if entry.is_encrypted() {
        method.push('*');
    }
    let size = entry.size();
    let compressed = entry.compressed_size();
    let ratio = if size > compressed {
        ((100 * (size - compressed)) as f64 / size as f64).round() as u64
    } else {
        0
    };

    let full_name = entry.name();
    let mut name = base_name(full_name);
    if name.chars().count() > 14 {
        let tail: String = name.chars().rev().take(13).collect::<Vec<_>>().into_iter().rev().collect();
        name = format!("…{tail}");
    }
    let mut comment = match entry.comment() {
        Some(comment) => comment.to_string(),
        None if name == full_name => String::new(),
        None => full_name.to_string(),
    };
    if !entry.warnings().is_empty() {
        comment = format!("[{}]", entry.warnings());
    }
    if !comment.is_empty() {
        comment.insert_str(0, "  ");
    }

    let width = match kind {
        ArchiveKind::Arc => 4,
        ArchiveKind::Zip => 8,
    };
    format!(
        "{name:<14} {size:>7}   {method:<9} {compressed:>7}   {ratio:>3}%   {}   {:0width$x}{comment}",
        format_date(entry.modified()),
        entry.crc()
    )
}

/// Format a byte size into a human-readable string.
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

fn format_date(modified: Option<NaiveDateTime>) -> String {
    match modified {
        Some(modified) => modified.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "0000-00-00 00:00:00".to_string(),
    }
}

enum Target {
    Pending,
    Open(tokio::fs::File),
    Skipped,
}

/// Writes one entry to disk, creating the file when the first data arrives.
struct FileSink {
    path: PathBuf,
    overwrite: bool,
    verbose: bool,
    modified: Option<NaiveDateTime>,
    target: Target,
}

impl FileSink {
    fn new(path: PathBuf, overwrite: bool, verbose: bool, modified: Option<NaiveDateTime>) -> Self {
        Self {
            path,
            overwrite,
            verbose,
            modified,
            target: Target::Pending,
        }
    }

    async fn create(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if self.overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        self.target = match options.open(&self.path).await {
            Ok(file) => {
                if self.verbose {
                    println!("creating {}", self.path.display());
                }
                Target::Open(file)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if self.verbose {
                    println!("skipping {}", self.path.display());
                }
                Target::Skipped
            }
            Err(err) => {
                println!("{}: {err}", self.path.display());
                Target::Skipped
            }
        };
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Target::Pending = self.target {
            self.create().await?;
        }
        if let Target::Open(file) = &mut self.target {
            file.write_all(chunk).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Target::Pending = self.target {
            self.create().await?;
        }
        let Target::Open(mut file) = std::mem::replace(&mut self.target, Target::Skipped) else {
            return Ok(());
        };
        file.flush().await?;
        let modified = self
            .modified
            .and_then(|m| m.and_local_timezone(Local).single());
        if let Some(modified) = modified {
            let file = file.into_std().await;
            if let Err(err) = file.set_modified(modified.into()) {
                debug!(path = %self.path.display(), %err, "could not set modification time");
            }
        }
        Ok(())
    }
}
