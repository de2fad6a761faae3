//! Relative placement paths inside a library
//!
//! The pipelines decide *which* library; a [`PathResolver`] decides *where*
//! inside it. The default layout is `{code}/{artist}/{album}`.

use stacks_common::db::Library;
use std::path::PathBuf;
use thiserror::Error;

/// Longest directory code
pub const DIRECTORY_CODE_LEN: usize = 3;
/// Code used when the artist has no usable characters
pub const FALLBACK_DIRECTORY_CODE: &str = "0";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Empty path component for {0}")]
    EmptyComponent(&'static str),

    #[error("{0}")]
    Other(String),
}

/// What the resolver needs to know about an item
#[derive(Debug, Clone, Copy)]
pub struct ItemIdentity<'a> {
    pub directory_code: &'a str,
    pub artist: &'a str,
    pub album: &'a str,
}

/// Computes the directory (relative to the library root) for an item
pub trait PathResolver: Send + Sync {
    fn resolve(&self, identity: &ItemIdentity<'_>, library: &Library) -> Result<PathBuf, ResolveError>;
}

/// `{code}/{artist}/{album}` with each component sanitized
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtistAlbumResolver;

impl PathResolver for ArtistAlbumResolver {
    fn resolve(&self, identity: &ItemIdentity<'_>, _library: &Library) -> Result<PathBuf, ResolveError> {
        let code = sanitize_component(identity.directory_code);
        let artist = sanitize_component(identity.artist);
        let album = sanitize_component(identity.album);

        if code.is_empty() {
            return Err(ResolveError::EmptyComponent("directory code"));
        }
        if artist.is_empty() {
            return Err(ResolveError::EmptyComponent("artist"));
        }
        if album.is_empty() {
            return Err(ResolveError::EmptyComponent("album"));
        }

        Ok(PathBuf::from(code).join(artist).join(album))
    }
}

/// Short uppercase key used to shard the tree and to pick a library.
///
/// A leading "The " is ignored, then the first alphanumeric characters are
/// kept. Artists without any fall back to `"0"`.
pub fn directory_code(artist: &str) -> String {
    let trimmed = artist.trim();
    let without_article = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("the ") && trimmed.len() > 4 => &trimmed[4..],
        _ => trimmed,
    };

    let code: String = without_article
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .take(DIRECTORY_CODE_LEN)
        .collect();

    if code.is_empty() {
        FALLBACK_DIRECTORY_CODE.to_string()
    } else {
        code
    }
}

/// Make one path component safe on common filesystems.
///
/// Separators and reserved characters become `_`, control characters are
/// dropped, and leading/trailing dots and spaces are trimmed so `..` can
/// never survive.
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();

    replaced.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

/// Sanitize a file name but keep its extension intact
pub fn sanitize_file_name(raw: &str) -> String {
    match raw.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let stem = sanitize_component(stem);
            let ext = sanitize_component(ext);
            let stem = if stem.is_empty() { "untitled".to_string() } else { stem };
            format!("{}.{}", stem, ext)
        }
        _ => {
            let name = sanitize_component(raw);
            if name.is_empty() {
                "untitled".to_string()
            } else {
                name
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks_common::db::LibraryType;

    #[test]
    fn test_directory_code() {
        assert_eq!(directory_code("Beatles"), "BEA");
        assert_eq!(directory_code("The Beatles"), "BEA");
        assert_eq!(directory_code("the who"), "WHO");
        assert_eq!(directory_code("AC/DC"), "ACD");
        assert_eq!(directory_code("U2"), "U2");
        assert_eq!(directory_code("!!!"), "0");
        assert_eq!(directory_code(""), "0");
        assert_eq!(directory_code("The"), "THE");
        assert_eq!(directory_code("björk"), "BJÖ");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("AC/DC"), "AC_DC");
        assert_eq!(sanitize_component(".."), "");
        assert_eq!(sanitize_component("  Live: 1999? "), "Live_ 1999_");
        assert_eq!(sanitize_component("tab\there"), "tabhere");
    }

    #[test]
    fn test_sanitize_file_name_keeps_extension() {
        assert_eq!(sanitize_file_name("What? Now.flac"), "What_ Now.flac");
        assert_eq!(sanitize_file_name("...flac"), "untitled.flac");
        assert_eq!(sanitize_file_name("noext"), "noext");
    }

    #[test]
    fn test_artist_album_layout() {
        let library = Library::new("pool", "/srv/pool", LibraryType::Production);
        let identity = ItemIdentity {
            directory_code: "BEA",
            artist: "The Beatles",
            album: "Abbey Road",
        };
        let path = ArtistAlbumResolver.resolve(&identity, &library).unwrap();
        assert_eq!(path, PathBuf::from("BEA/The Beatles/Abbey Road"));
    }

    #[test]
    fn test_empty_album_rejected() {
        let library = Library::new("pool", "/srv/pool", LibraryType::Production);
        let identity = ItemIdentity {
            directory_code: "BEA",
            artist: "The Beatles",
            album: "..",
        };
        assert!(ArtistAlbumResolver.resolve(&identity, &library).is_err());
    }
}
