//! Catalog identifiers embedded in library folder names
//!
//! Folders are tagged the way Jellyfin/Plex naming conventions suggest:
//! - "The Matrix (1999) {imdb-tt0133093}"
//! - "The Matrix (1999) {tmdb-603}"
//! - "Breaking Bad {tvdb-81189}"

use std::fmt;
use std::path::{Component, Path};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Identifier scheme a folder tag belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdNamespace {
    /// IMDb title ids, the scheme the trailer catalog accepts natively
    Imdb,
    Tmdb,
    Tvdb,
}

impl IdNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdNamespace::Imdb => "imdb",
            IdNamespace::Tmdb => "tmdb",
            IdNamespace::Tvdb => "tvdb",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, IdNamespace::Imdb)
    }
}

impl fmt::Display for IdNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identifier extracted from a path, tagged with its namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TitleIdentifier {
    namespace: IdNamespace,
    value: String,
}

impl TitleIdentifier {
    pub fn new(namespace: IdNamespace, value: impl Into<String>) -> Self {
        Self {
            namespace,
            value: value.into(),
        }
    }

    pub fn imdb(value: impl Into<String>) -> Self {
        Self::new(IdNamespace::Imdb, value)
    }

    pub fn tmdb(value: impl Into<String>) -> Self {
        Self::new(IdNamespace::Tmdb, value)
    }

    pub fn tvdb(value: impl Into<String>) -> Self {
        Self::new(IdNamespace::Tvdb, value)
    }

    pub fn namespace(&self) -> IdNamespace {
        self.namespace
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for TitleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.namespace, self.value)
    }
}

/// A title in the primary (IMDb) namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedTitle(String);

static IMDB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^tt\d+$").unwrap());

impl ResolvedTitle {
    /// Accept a raw IMDb title id ("tt0133093"), normalizing the prefix case
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        IMDB_ID_RE
            .is_match(&normalized)
            .then_some(ResolvedTitle(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag patterns in priority order. The first namespace with a match anywhere
/// in the path wins.
static TAG_PATTERNS: Lazy<Vec<(IdNamespace, Regex)>> = Lazy::new(|| {
    vec![
        (IdNamespace::Imdb, Regex::new(r"(?i)\{imdb-(tt\d+)\}").unwrap()),
        (IdNamespace::Tmdb, Regex::new(r"(?i)\{tmdb-(\d+)\}").unwrap()),
        (IdNamespace::Tvdb, Regex::new(r"(?i)\{tvdb-(\d+)\}").unwrap()),
    ]
});

/// Extract the identifier for a directory path.
///
/// Returns `None` when no component carries a recognised tag; callers skip
/// such paths silently.
pub fn extract(path: &Path) -> Option<TitleIdentifier> {
    let names: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    for (namespace, pattern) in TAG_PATTERNS.iter() {
        // Innermost folder first so a nested retag overrides its parent
        for name in names.iter().rev() {
            if let Some(caps) = pattern.captures(name) {
                let mut value = caps[1].to_string();
                if namespace.is_primary() {
                    value = value.to_lowercase();
                }
                let id = TitleIdentifier::new(*namespace, value);
                debug!(path = %path.display(), id = %id, "Extracted identifier");
                return Some(id);
            }
        }
    }

    None
}

/// Whether the final component of `path` itself carries a tag
pub fn is_tagged_folder(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy();
            TAG_PATTERNS.iter().any(|(_, re)| re.is_match(&name))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extract_each_namespace() {
        assert_eq!(
            extract(Path::new("/mnt/plex/Movies/The Matrix (1999) {imdb-tt0133093}")),
            Some(TitleIdentifier::imdb("tt0133093"))
        );
        assert_eq!(
            extract(Path::new("/mnt/plex/Movies/The Matrix (1999) {tmdb-603}")),
            Some(TitleIdentifier::tmdb("603"))
        );
        assert_eq!(
            extract(Path::new("/mnt/plex/TV/Breaking Bad {tvdb-81189}")),
            Some(TitleIdentifier::tvdb("81189"))
        );
    }

    #[test]
    fn test_extract_none_without_tag() {
        assert_eq!(extract(Path::new("/mnt/plex/Movies/The Matrix (1999)")), None);
        assert_eq!(extract(Path::new("/mnt/plex/Movies/{imdb-nm0000206}")), None);
    }

    #[test]
    fn test_primary_namespace_wins() {
        let path = PathBuf::from("/lib/{tvdb-81189}/Breaking Bad {tmdb-1396} {imdb-tt0903747}");
        assert_eq!(extract(&path), Some(TitleIdentifier::imdb("tt0903747")));

        let path = PathBuf::from("/lib/Show {tvdb-81189}/Season 1 {tmdb-1396}");
        assert_eq!(extract(&path), Some(TitleIdentifier::tmdb("1396")));
    }

    #[test]
    fn test_tag_case_is_normalized() {
        assert_eq!(
            extract(Path::new("/lib/Movie {IMDB-TT0133093}")),
            Some(TitleIdentifier::imdb("tt0133093"))
        );
    }

    #[test]
    fn test_tagged_folder() {
        assert!(is_tagged_folder(Path::new("/lib/Movie {imdb-tt0133093}")));
        assert!(!is_tagged_folder(Path::new("/lib/Movie {imdb-tt0133093}/backdrops")));
    }

    #[test]
    fn test_resolved_title_parse() {
        assert_eq!(
            ResolvedTitle::parse("TT0133093").map(|t| t.to_string()),
            Some("tt0133093".to_string())
        );
        assert!(ResolvedTitle::parse("0133093").is_none());
        assert!(ResolvedTitle::parse("").is_none());
    }
}
