//! Archive data model: container kinds, methods, exception flags, warnings,
//! headers and reconciled entries.

use std::fmt;

use chrono::NaiveDateTime;

/// Container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    Arc,
}

impl ArchiveKind {
    /// Guess the kind from a file name's extension (`.ZIP` / `.ARC`, any case).
    pub fn from_extension(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        if ext.eq_ignore_ascii_case("zip") {
            Some(ArchiveKind::Zip)
        } else if ext.eq_ignore_ascii_case("arc") {
            Some(ArchiveKind::Arc)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "ZIP",
            ArchiveKind::Arc => "ARC",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ZIP compression method names, indexed by method number.
pub const ZIP_METHOD_NAMES: &[&str] = &[
    "Stored", "Shrink", "Reduce1", "Reduce2", "Reduce3", "Reduce4", "Implode", "Tokenize",
    "Deflate", "Deflate64", "Dcl", "", "Bzip2", "", "Lzma",
];

/// ARC compression method names. Index `i` is ARC method type `i + 2`; type
/// 1 (the old short-header Store) shares index 0.
pub const ARC_METHOD_NAMES: &[&str] = &[
    "Store", "Pack", "Squeeze", "Crunch5", "Crunch6", "Crunch7", "Crunch", "Squash",
];

/// A compression method in its container's own numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Zip(u16),
    Arc(u8),
}

impl Method {
    /// Index into [`ARC_METHOD_NAMES`] for ARC methods.
    fn arc_index(kind: u8) -> usize {
        kind.max(2) as usize - 2
    }

    /// Human-readable name, falling back to the raw number for methods
    /// without a table entry.
    pub fn name(&self) -> String {
        let name = match *self {
            Method::Zip(m) => ZIP_METHOD_NAMES.get(m as usize).copied(),
            Method::Arc(m) => ARC_METHOD_NAMES.get(Self::arc_index(m)).copied(),
        };
        match (name, self) {
            (Some(name), _) if !name.is_empty() => name.to_string(),
            (_, Method::Zip(m)) => format!("Method{m}"),
            (_, Method::Arc(m)) => format!("Type{m}"),
        }
    }

    /// The signed filter encoding: ZIP methods are non-negative, ARC table
    /// index `i` is `-(i + 2)`.
    pub fn filter_index(&self) -> i32 {
        match *self {
            Method::Zip(m) => m as i32,
            Method::Arc(m) => -(Self::arc_index(m) as i32 + 2),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Resolve a method name (case-insensitive) to its filter index. The ZIP
/// table is consulted first.
pub fn parse_method_filter(name: &str) -> Option<i32> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if let Some(i) = ZIP_METHOD_NAMES
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
    {
        return Some(i as i32);
    }
    ARC_METHOD_NAMES
        .iter()
        .position(|m| m.eq_ignore_ascii_case(name))
        .map(|i| -(i as i32 + 2))
}

/// Archive-level anomaly flags. The bit values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Exception {
    Banner = 0x01,
    Comment = 0x02,
    Encrypted = 0x04,
    Split = 0x08,
    WrongType = 0x10,
    NoDirs = 0x20,
    NoFiles = 0x40,
}

impl Exception {
    pub const ALL: [Exception; 7] = [
        Exception::Banner,
        Exception::Comment,
        Exception::Encrypted,
        Exception::Split,
        Exception::WrongType,
        Exception::NoDirs,
        Exception::NoFiles,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    /// Filter keyword for this flag.
    pub fn name(self) -> &'static str {
        match self {
            Exception::Banner => "banner",
            Exception::Comment => "comment",
            Exception::Encrypted => "encrypted",
            Exception::Split => "split",
            Exception::WrongType => "wrong",
            Exception::NoDirs => "nodirs",
            Exception::NoFiles => "nofiles",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Exception::Banner => "process only archives with banners",
            Exception::Comment => "process only entries with comments",
            Exception::Encrypted => "process only entries with encryption",
            Exception::Split => "process only split archives",
            Exception::WrongType => "process only archives with the wrong type",
            Exception::NoDirs => "process only archives read without a directory",
            Exception::NoFiles => "process only archives with no files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// A set of [`Exception`] flags. Flags are only ever added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Exceptions(u8);

impl Exceptions {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn insert(&mut self, exception: Exception) {
        self.0 |= exception.bit();
    }

    pub fn contains(&self, exception: Exception) -> bool {
        self.0 & exception.bit() != 0
    }

    pub fn intersects(&self, other: Exceptions) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Exception> + '_ {
        Exception::ALL.into_iter().filter(|e| self.contains(*e))
    }
}

impl From<Exception> for Exceptions {
    fn from(exception: Exception) -> Self {
        Self(exception.bit())
    }
}

impl FromIterator<Exception> for Exceptions {
    fn from_iter<I: IntoIterator<Item = Exception>>(iter: I) -> Self {
        let mut set = Exceptions::empty();
        for exception in iter {
            set.insert(exception);
        }
        set
    }
}

/// Ordered, append-only warning list that drops exact duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningLog(Vec<String>);

impl WarningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.0.contains(&warning) {
            self.0.push(warning);
        }
    }

    pub fn extend(&mut self, other: &WarningLog) {
        for warning in &other.0 {
            self.push(warning.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether any warning contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|w| w.contains(needle))
    }
}

impl fmt::Display for WarningLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

/// File attribute bit: volume label.
pub const ATTR_VOLUME: u32 = 0x08;
/// File attribute bit: directory.
pub const ATTR_DIRECTORY: u32 = 0x10;

/// ZIP general purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// ZIP general purpose flag: sizes and CRC follow the data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// ZIP general purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// One directory record or one local header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Path with forward slashes.
    pub name: String,
    pub attr: u32,
    pub method: Method,
    pub flags: u16,
    pub size: u64,
    pub compressed_size: u64,
    pub modified: Option<NaiveDateTime>,
    /// Packed DOS time as stored.
    pub dos_time: u16,
    /// CRC-32 for ZIP, CRC-16 (low 16 bits) for ARC.
    pub crc: u32,
    pub comment: Option<String>,
    /// Directory records: offset of the local header. Local headers: offset
    /// of the header itself.
    pub offset: u64,
    /// Where the payload starts; only known for local headers.
    pub data_offset: Option<u64>,
}

impl Header {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_directory(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0 || self.name.ends_with('/')
    }

    pub fn is_volume_label(&self) -> bool {
        self.attr & ATTR_VOLUME != 0
    }

    /// Local header whose sizes and CRC were left for a trailing data
    /// descriptor.
    fn defers_sizes(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0 && self.crc == 0 && self.compressed_size == 0
    }
}

#[derive(Debug, Clone)]
enum Headers {
    Directory(Header),
    Local(Header),
    Both { directory: Header, local: Header },
}

/// A reconciled archive member.
///
/// At least one of the directory and local headers is always present. When
/// both are, the local header is authoritative for method, flags, sizes and
/// CRC (unless it defers those to a data descriptor), and the directory is
/// authoritative for name, comment and attributes.
#[derive(Debug, Clone)]
pub struct Entry {
    headers: Headers,
    warnings: WarningLog,
}

impl Entry {
    pub(crate) fn from_directory(directory: Header) -> Self {
        Self {
            headers: Headers::Directory(directory),
            warnings: WarningLog::new(),
        }
    }

    pub(crate) fn from_local(local: Header) -> Self {
        Self {
            headers: Headers::Local(local),
            warnings: WarningLog::new(),
        }
    }

    /// Pair a directory record with the local header found at its offset,
    /// recording any disagreement.
    pub(crate) fn from_pair(directory: Header, local: Header) -> Self {
        let mut warnings = WarningLog::new();
        if !directory.name.eq_ignore_ascii_case(&local.name) {
            warnings.push(format!("FileHeader name: {}", local.name));
        }
        if !local.defers_sizes() {
            if directory.crc != local.crc {
                warnings.push(format!("FileHeader CRC: {:08x}", local.crc));
            }
            if directory.size != local.size || directory.compressed_size != local.compressed_size {
                warnings.push(format!(
                    "FileHeader sizes: {}/{}",
                    local.size, local.compressed_size
                ));
            }
        }
        if directory.method != local.method {
            warnings.push(format!("FileHeader method: {}", local.method));
        }
        Self {
            headers: Headers::Both { directory, local },
            warnings,
        }
    }

    pub fn directory(&self) -> Option<&Header> {
        match &self.headers {
            Headers::Directory(h) => Some(h),
            Headers::Both { directory, .. } => Some(directory),
            Headers::Local(_) => None,
        }
    }

    pub fn local(&self) -> Option<&Header> {
        match &self.headers {
            Headers::Local(h) => Some(h),
            Headers::Both { local, .. } => Some(local),
            Headers::Directory(_) => None,
        }
    }

    /// Header preferred for naming: the directory record when present.
    fn naming(&self) -> &Header {
        match &self.headers {
            Headers::Directory(h) | Headers::Local(h) => h,
            Headers::Both { directory, .. } => directory,
        }
    }

    /// Header preferred for decoding: the local header when present.
    fn decoding(&self) -> &Header {
        match &self.headers {
            Headers::Directory(h) | Headers::Local(h) => h,
            Headers::Both { local, .. } => local,
        }
    }

    /// Header preferred for sizes and CRC.
    fn sizing(&self) -> &Header {
        match &self.headers {
            Headers::Both { directory, local } if local.defers_sizes() => directory,
            _ => self.decoding(),
        }
    }

    pub fn name(&self) -> &str {
        &self.naming().name
    }

    pub fn attr(&self) -> u32 {
        self.naming().attr
    }

    pub fn comment(&self) -> Option<&str> {
        self.naming().comment.as_deref()
    }

    pub fn method(&self) -> Method {
        self.decoding().method
    }

    pub fn flags(&self) -> u16 {
        self.decoding().flags
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.decoding().modified.or(self.naming().modified)
    }

    pub fn dos_time(&self) -> u16 {
        self.decoding().dos_time
    }

    pub fn size(&self) -> u64 {
        self.sizing().size
    }

    pub fn compressed_size(&self) -> u64 {
        self.sizing().compressed_size
    }

    pub fn crc(&self) -> u32 {
        self.sizing().crc
    }

    pub fn is_encrypted(&self) -> bool {
        self.decoding().is_encrypted() || self.naming().is_encrypted()
    }

    pub fn is_directory(&self) -> bool {
        self.naming().is_directory()
    }

    pub fn is_volume_label(&self) -> bool {
        self.naming().is_volume_label()
    }

    /// Where the payload starts, if a local header was found.
    pub fn data_offset(&self) -> Option<u64> {
        self.local().and_then(|h| h.data_offset)
    }

    pub fn warnings(&self) -> &WarningLog {
        &self.warnings
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning);
    }
}

#[cfg(test)]
pub(crate) fn test_header(name: &str, method: Method) -> Header {
    Header {
        name: name.to_string(),
        attr: 0,
        method,
        flags: 0,
        size: 10,
        compressed_size: 10,
        modified: None,
        dos_time: 0,
        crc: 0x1234,
        comment: None,
        offset: 0,
        data_offset: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_filter_namespaces() {
        assert_eq!(parse_method_filter("store"), Some(-2));
        assert_eq!(parse_method_filter("stored"), Some(0));
        assert_eq!(parse_method_filter("IMPLODE"), Some(6));
        assert_eq!(parse_method_filter("squash"), Some(-9));
        assert_eq!(parse_method_filter("nonsense"), None);
        assert_eq!(parse_method_filter(""), None);
    }

    #[test]
    fn test_method_filter_index_matches_names() {
        assert_eq!(Method::Zip(8).filter_index(), 8);
        assert_eq!(Method::Arc(2).filter_index(), -2);
        assert_eq!(Method::Arc(1).filter_index(), -2);
        assert_eq!(Method::Arc(9).filter_index(), -9);
        assert_eq!(Method::Arc(2).name(), "Store");
        assert_eq!(Method::Arc(8).name(), "Crunch");
        assert_eq!(Method::Zip(11).name(), "Method11");
        assert_eq!(Method::Arc(12).name(), "Type12");
    }

    #[test]
    fn test_exceptions_accumulate() {
        let mut set = Exceptions::empty();
        set.insert(Exception::Banner);
        set.insert(Exception::NoFiles);
        set.insert(Exception::Banner);
        assert_eq!(set.bits(), 0x41);
        assert!(set.contains(Exception::NoFiles));
        assert!(!set.contains(Exception::Split));
        assert_eq!(Exception::from_name("Wrong"), Some(Exception::WrongType));
        let filter: Exceptions = [Exception::Split, Exception::Banner].into_iter().collect();
        assert!(set.intersects(filter));
    }

    #[test]
    fn test_warning_log_dedupes() {
        let mut log = WarningLog::new();
        log.push("CRC mismatch");
        log.push("Position 10 missing FileHeader");
        log.push("CRC mismatch");
        assert_eq!(log.len(), 2);
        assert_eq!(log.to_string(), "CRC mismatch; Position 10 missing FileHeader");
    }

    #[test]
    fn test_pair_precedence() {
        let mut directory = test_header("DOCS/README.TXT", Method::Zip(8));
        directory.comment = Some("read me".into());
        directory.attr = 0x20;
        let mut local = test_header("docs/readme.txt", Method::Zip(0));
        local.size = 12;
        local.compressed_size = 12;
        let entry = Entry::from_pair(directory, local);
        assert_eq!(entry.name(), "DOCS/README.TXT");
        assert_eq!(entry.comment(), Some("read me"));
        assert_eq!(entry.method(), Method::Zip(0));
        assert_eq!(entry.size(), 12);
        assert_eq!(entry.attr(), 0x20);
        assert!(entry.warnings().mentions("sizes"));
        assert!(entry.warnings().mentions("method"));
        assert!(!entry.warnings().mentions("name"));
    }

    #[test]
    fn test_deferred_sizes_use_directory() {
        let directory = test_header("A.TXT", Method::Zip(8));
        let mut local = test_header("A.TXT", Method::Zip(8));
        local.flags = FLAG_DATA_DESCRIPTOR;
        local.crc = 0;
        local.size = 0;
        local.compressed_size = 0;
        let entry = Entry::from_pair(directory, local);
        assert_eq!(entry.crc(), 0x1234);
        assert_eq!(entry.compressed_size(), 10);
        assert!(entry.warnings().is_empty());
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ArchiveKind::from_extension("GAMES.ARC"), Some(ArchiveKind::Arc));
        assert_eq!(ArchiveKind::from_extension("a/b/inner.zip"), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_extension("README"), None);
        assert_eq!(ArchiveKind::from_extension("x.txt"), None);
    }
}
