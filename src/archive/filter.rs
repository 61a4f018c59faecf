//! Post-reconciliation entry filtering.
//!
//! Filters decide which reconciled entries a directory read returns; they
//! never change which bytes are read.

use std::path::Path;

use super::model::{Entry, Exception, Exceptions, parse_method_filter};
use crate::error::{Error, Result};

/// Method filter value that matches every entry.
pub const NO_METHOD_FILTER: i32 = -1;

/// Selects entries by name, exception flags and compression method.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    /// Name patterns (`*` and `?` wildcards); empty matches everything.
    pub names: Vec<String>,
    /// Keep only entries showing at least one of these conditions.
    pub exceptions: Exceptions,
    /// A [`Method::filter_index`](super::Method::filter_index) value, or
    /// [`NO_METHOD_FILTER`].
    pub method: i32,
}

impl Default for EntryFilter {
    fn default() -> Self {
        Self {
            names: Vec::new(),
            exceptions: Exceptions::empty(),
            method: NO_METHOD_FILTER,
        }
    }
}

impl EntryFilter {
    /// Parse a comma-separated list of exception keywords and method names.
    /// Only one method can be selected; a later one replaces an earlier one.
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut filter = EntryFilter::default();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(exception) = Exception::from_name(name) {
                filter.exceptions.insert(exception);
            } else if let Some(method) = parse_method_filter(name) {
                filter.method = method;
            } else {
                return Err(Error::UnknownFilter(name.to_string()));
            }
        }
        Ok(filter)
    }

    pub fn with_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `entry` passes, given the flags its archive has raised.
    pub fn matches(&self, entry: &Entry, archive: Exceptions) -> bool {
        if self.method != NO_METHOD_FILTER && entry.method().filter_index() != self.method {
            return false;
        }
        if !self.exceptions.is_empty() && !self.exceptions.intersects(entry_exceptions(entry, archive)) {
            return false;
        }
        self.names.is_empty() || self.names.iter().any(|p| name_matches(p, entry.name()))
    }
}

/// Conditions an entry exhibits: its own comment and encryption, plus the
/// archive-wide flags.
pub fn entry_exceptions(entry: &Entry, archive: Exceptions) -> Exceptions {
    let mut set = Exceptions::empty();
    for exception in [
        Exception::Banner,
        Exception::Split,
        Exception::WrongType,
        Exception::NoDirs,
    ] {
        if archive.contains(exception) {
            set.insert(exception);
        }
    }
    if entry.comment().is_some() {
        set.insert(Exception::Comment);
    }
    if entry.is_encrypted() {
        set.insert(Exception::Encrypted);
    }
    set
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Wildcard patterns match the whole name; plain names match the full path
/// or its last component. DOS names are case-insensitive.
pub fn name_matches(pattern: &str, name: &str) -> bool {
    if has_glob_chars(pattern) {
        return glob_match(pattern, name);
    }
    let basename = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    name.eq_ignore_ascii_case(pattern) || basename.eq_ignore_ascii_case(pattern)
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// ```ignore
/// assert!(glob_match("*.txt", "README.TXT"));
/// assert!(glob_match("file?.dat", "file1.dat"));
/// assert!(!glob_match("*.txt", "readme.md"));
/// ```
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().flat_map(char::to_lowercase).collect();
    let text_chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star: skip it, or let it swallow one more character
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Method;
    use crate::archive::model::{FLAG_ENCRYPTED, test_header};

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*.txt", "README.TXT"));
        assert!(glob_match("file?.dat", "FILE1.DAT"));
        assert!(glob_match("docs/*", "docs/a/b.txt"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn test_plain_names_match_basename() {
        assert!(name_matches("readme.txt", "DOCS/README.TXT"));
        assert!(name_matches("docs/readme.txt", "DOCS/README.TXT"));
        assert!(!name_matches("docs", "DOCS/README.TXT"));
    }

    #[test]
    fn test_parse_list() {
        let filter = EntryFilter::parse_list("banner, encrypted,store").unwrap();
        assert!(filter.exceptions.contains(Exception::Banner));
        assert!(filter.exceptions.contains(Exception::Encrypted));
        assert_eq!(filter.method, -2);
        assert!(matches!(
            EntryFilter::parse_list("bogus"),
            Err(Error::UnknownFilter(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_method_filter() {
        let stored = Entry::from_local(test_header("A.TXT", Method::Zip(0)));
        let deflated = Entry::from_local(test_header("B.TXT", Method::Zip(8)));
        let none = EntryFilter::default();
        assert!(none.matches(&stored, Exceptions::empty()));
        assert!(none.matches(&deflated, Exceptions::empty()));
        let only_deflate = EntryFilter {
            method: 8,
            ..EntryFilter::default()
        };
        assert!(!only_deflate.matches(&stored, Exceptions::empty()));
        assert!(only_deflate.matches(&deflated, Exceptions::empty()));
    }

    #[test]
    fn test_exception_filter() {
        let mut header = test_header("SECRET.DOC", Method::Zip(8));
        header.flags = FLAG_ENCRYPTED;
        let secret = Entry::from_local(header);
        let plain = Entry::from_local(test_header("PLAIN.DOC", Method::Zip(8)));
        let filter = EntryFilter::parse_list("encrypted").unwrap();
        assert!(filter.matches(&secret, Exceptions::empty()));
        assert!(!filter.matches(&plain, Exceptions::empty()));

        let banner = EntryFilter::parse_list("banner").unwrap();
        assert!(banner.matches(&plain, Exception::Banner.into()));
        assert!(!banner.matches(&plain, Exceptions::empty()));
    }
}
