//! File metadata and content access
//!
//! Providers that manage file content go through a [`FileSource`] instead
//! of touching the filesystem directly, so content sources can be served
//! from somewhere other than the local disk.

use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Checksum algorithm prefix
pub const CHECKSUM_PREFIX: &str = "blake3:";

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Link,
    Other,
}

impl FileKind {
    /// The matching `ensure` value
    pub fn as_ensure(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Link => "link",
            Self::Other => "present",
        }
    }
}

/// How symlinks are treated when reading metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Links {
    /// Report the link itself (`lstat`)
    #[default]
    Manage,
    /// Report what the link points to (`stat`)
    Follow,
}

impl Links {
    /// Parse a `links` value; `ignore` behaves like `manage`
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manage" | "ignore" => Some(Self::Manage),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }
}

/// Metadata of a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub exists: bool,
    pub kind: Option<FileKind>,
    /// `blake3:<hex>` of a regular file's content
    pub checksum: Option<String>,
    /// Permission bits
    pub mode: Option<u32>,
    pub owner: Option<u32>,
    pub group: Option<u32>,
}

impl FileStat {
    pub fn missing() -> Self {
        Self {
            exists: false,
            kind: None,
            checksum: None,
            mode: None,
            owner: None,
            group: None,
        }
    }
}

/// Source of file metadata and content
pub trait FileSource: Send + Sync {
    /// Metadata of `path`; a missing path is not an error
    fn stat(&self, path: &Path, links: Links) -> io::Result<FileStat>;

    /// Open `path` for reading
    fn read(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// Checksum of in-memory content
pub fn checksum_bytes(bytes: &[u8]) -> String {
    format!("{CHECKSUM_PREFIX}{}", blake3::hash(bytes).to_hex())
}

/// Checksum of a stream
pub fn checksum_reader(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{CHECKSUM_PREFIX}{}", hasher.finalize().to_hex()))
}

/// The local filesystem
///
/// Symlinks are reported as links unless `links` says to follow them. A
/// followed link whose target is missing reads as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSource;

impl FileSource for LocalFileSource {
    fn stat(&self, path: &Path, links: Links) -> io::Result<FileStat> {
        let meta = match links {
            Links::Manage => fs::symlink_metadata(path),
            Links::Follow => fs::metadata(path),
        };
        let meta = match meta {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FileStat::missing()),
            Err(e) => return Err(e),
        };

        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Link
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        let checksum = if kind == FileKind::File {
            let mut file = fs::File::open(path)?;
            Some(checksum_reader(&mut file)?)
        } else {
            None
        };

        #[cfg(unix)]
        let (mode, owner, group) = {
            use std::os::unix::fs::MetadataExt;
            (
                Some(meta.mode() & 0o7777),
                Some(meta.uid()),
                Some(meta.gid()),
            )
        };
        #[cfg(not(unix))]
        let (mode, owner, group) = (None, None, None);

        Ok(FileStat {
            exists: true,
            kind: Some(kind),
            checksum,
            mode,
            owner,
            group,
        })
    }

    fn read(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stat_missing() {
        let temp = TempDir::new().unwrap();
        let stat = LocalFileSource.stat(&temp.path().join("nope"), Links::Manage).unwrap();
        assert!(!stat.exists);
        assert_eq!(stat.kind, None);
    }

    #[test]
    fn test_stat_file_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("motd");
        fs::write(&path, "hello\n").unwrap();

        let stat = LocalFileSource.stat(&path, Links::Manage).unwrap();
        assert!(stat.exists);
        assert_eq!(stat.kind, Some(FileKind::File));
        assert_eq!(stat.checksum, Some(checksum_bytes(b"hello\n")));
        assert!(stat.checksum.unwrap().starts_with(CHECKSUM_PREFIX));
    }

    #[test]
    fn test_stat_directory_has_no_checksum() {
        let temp = TempDir::new().unwrap();
        let stat = LocalFileSource.stat(temp.path(), Links::Follow).unwrap();
        assert_eq!(stat.kind, Some(FileKind::Directory));
        assert_eq!(stat.checksum, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_does_not_follow_links() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let link = temp.path().join("link");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let stat = LocalFileSource.stat(&link, Links::Manage).unwrap();
        assert_eq!(stat.kind, Some(FileKind::Link));
        assert_eq!(stat.checksum, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_stat_follows_links_when_asked() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target");
        let link = temp.path().join("link");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let stat = LocalFileSource.stat(&link, Links::Follow).unwrap();
        assert_eq!(stat.kind, Some(FileKind::File));
        assert_eq!(stat.checksum, Some(checksum_bytes(b"x")));

        fs::remove_file(&target).unwrap();
        assert!(!LocalFileSource.stat(&link, Links::Follow).unwrap().exists);
        assert!(LocalFileSource.stat(&link, Links::Manage).unwrap().exists);
    }

    #[test]
    fn test_links_values() {
        assert_eq!(Links::parse("manage"), Some(Links::Manage));
        assert_eq!(Links::parse("ignore"), Some(Links::Manage));
        assert_eq!(Links::parse("follow"), Some(Links::Follow));
        assert_eq!(Links::parse("copy"), None);
        assert_eq!(Links::default(), Links::Manage);
    }

    #[test]
    fn test_read_streams_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data");
        fs::write(&path, "abc").unwrap();

        let mut reader = LocalFileSource.read(&path).unwrap();
        assert_eq!(checksum_reader(&mut reader).unwrap(), checksum_bytes(b"abc"));
    }
}
