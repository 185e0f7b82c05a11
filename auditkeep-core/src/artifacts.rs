/*!
Timestamp-named artifact files (archives and backups) on the local filesystem.

Every artifact is built in a hidden temporary file inside its target
directory and only becomes visible under its final name once it is complete.
Publishing never replaces an existing file: a second-resolution name clash
gets a numeric suffix instead.
*/

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempPath};

use crate::{LifecycleError, Result};

/// Name stamp format, e.g. `20240131_235959`
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Names tried per stem (the bare stem plus `_1` .. `_999`) before giving up
pub const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A file found in an artifact directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

impl ArtifactInfo {
    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A directory holding one kind of artifact
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory (and parents) if it doesn't exist
    pub fn ensure(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .map_err(|e| LifecycleError::filesystem(&self.root, e))?;
        }
        Ok(())
    }

    /// A hidden temporary file inside the directory, removed on drop unless published
    pub fn temp_file(&self, prefix: &str) -> Result<NamedTempFile> {
        self.ensure()?;
        tempfile::Builder::new()
            .prefix(&format!(".{prefix}"))
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| LifecycleError::filesystem(&self.root, e))
    }

    /// Move a finished temporary file to `<prefix><stamp>[_n]<extension>`
    pub fn publish(
        &self,
        file: NamedTempFile,
        prefix: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let stem = format!("{prefix}{}", at.format(STAMP_FORMAT));
        self.publish_as(file, &stem, extension)
    }

    /// Move a finished temporary file to `<stem>[_n]<extension>`
    pub fn publish_as(&self, file: NamedTempFile, stem: &str, extension: &str) -> Result<PathBuf> {
        let mut file = file;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.candidate(stem, attempt, extension);
            match file.persist_noclobber(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => file = err.file,
                Err(err) => return Err(LifecycleError::filesystem(&candidate, err.error)),
            }
        }
        Err(self.names_exhausted(stem))
    }

    /// Same as [`ArtifactDir::publish`] for a temporary file that was closed
    /// and written through its path (e.g. by SQLite)
    pub fn publish_path(
        &self,
        path: TempPath,
        prefix: &str,
        extension: &str,
        at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let stem = format!("{prefix}{}", at.format(STAMP_FORMAT));
        let mut path = path;
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.candidate(&stem, attempt, extension);
            match path.persist_noclobber(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => path = err.path,
                Err(err) => return Err(LifecycleError::filesystem(&candidate, err.error)),
            }
        }
        Err(self.names_exhausted(&stem))
    }

    fn names_exhausted(&self, stem: &str) -> LifecycleError {
        LifecycleError::filesystem(
            &self.root,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free artifact name left for {stem}"),
            ),
        )
    }

    fn candidate(&self, stem: &str, attempt: u32, extension: &str) -> PathBuf {
        let name = if attempt == 0 {
            format!("{stem}{extension}")
        } else {
            format!("{stem}_{attempt}{extension}")
        };
        self.root.join(name)
    }

    /// Regular files whose name starts with `prefix` and ends with `suffix`, sorted by name.
    ///
    /// Hidden temporaries are never listed. A missing directory lists as empty.
    pub fn list(&self, prefix: &str, suffix: &str) -> Result<Vec<ArtifactInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LifecycleError::filesystem(&self.root, e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LifecycleError::filesystem(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(prefix) || !name.ends_with(suffix) {
                continue;
            }

            let path = entry.path();
            let metadata = entry
                .metadata()
                .map_err(|e| LifecycleError::filesystem(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| LifecycleError::filesystem(&path, e))?;

            found.push(ArtifactInfo {
                path,
                size_bytes: metadata.len(),
                modified: system_time_to_utc(modified),
            });
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

pub fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| LifecycleError::filesystem(path, e))
}

/// Hex SHA-256 of a file's contents
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| LifecycleError::filesystem(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| LifecycleError::filesystem(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::TempDir;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 13, 4, 5).unwrap()
    }

    #[test]
    fn test_publish_uses_timestamp_name() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path().join("archives"));

        let mut file = dir.temp_file("audit_logs_").unwrap();
        file.write_all(b"payload").unwrap();
        let published = dir.publish(file, "audit_logs_", ".json.gz", stamp()).unwrap();

        assert_eq!(
            published.file_name().unwrap(),
            "audit_logs_20240517_130405.json.gz"
        );
        assert_eq!(fs::read(&published).unwrap(), b"payload");
    }

    #[test]
    fn test_publish_never_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path());

        let first = dir
            .publish(dir.temp_file("x").unwrap(), "audit_logs_", ".json", stamp())
            .unwrap();
        let second = dir
            .publish(dir.temp_file("x").unwrap(), "audit_logs_", ".json", stamp())
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(
            second.file_name().unwrap(),
            "audit_logs_20240517_130405_1.json"
        );
    }

    #[test]
    fn test_publish_as_keeps_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path());
        let existing = temp_dir.path().join("audit_logs_20240517_130405.json.gz");
        fs::write(&existing, b"old").unwrap();

        let mut file = dir.temp_file("audit_logs_").unwrap();
        file.write_all(b"new").unwrap();
        let published = dir
            .publish_as(file, "audit_logs_20240517_130405", ".json.gz")
            .unwrap();

        assert_eq!(
            published.file_name().unwrap(),
            "audit_logs_20240517_130405_1.json.gz"
        );
        assert_eq!(fs::read(&existing).unwrap(), b"old");
        assert_eq!(fs::read(&published).unwrap(), b"new");
    }

    #[test]
    fn test_publish_fails_when_every_name_is_taken() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path());
        let stem = "audit_logs_20240517_130405";
        for attempt in 0..MAX_NAME_ATTEMPTS {
            fs::write(dir.candidate(stem, attempt, ".json"), b"").unwrap();
        }

        let err = dir
            .publish(dir.temp_file("audit_logs_").unwrap(), "audit_logs_", ".json", stamp())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Filesystem { .. }));
        assert!(err.to_string().contains("no free artifact name"));
        // The temporary is cleaned up, only the pre-existing names remain
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), MAX_NAME_ATTEMPTS as usize);
    }

    #[test]
    fn test_list_filters_and_hides_temporaries() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path());

        fs::write(temp_dir.path().join("audit_logs_b.json.gz"), b"12345").unwrap();
        fs::write(temp_dir.path().join("audit_logs_a.json"), b"1").unwrap();
        fs::write(temp_dir.path().join("unrelated.txt"), b"1").unwrap();
        let _pending = dir.temp_file("audit_logs_").unwrap();

        let gz = dir.list("audit_logs_", ".json.gz").unwrap();
        assert_eq!(gz.len(), 1);
        assert_eq!(gz[0].size_bytes, 5);

        let all = dir.list("audit_logs_", "").unwrap();
        let names: Vec<String> = all.iter().map(ArtifactInfo::file_name).collect();
        assert_eq!(names, vec!["audit_logs_a.json", "audit_logs_b.json.gz"]);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let dir = ArtifactDir::new(temp_dir.path().join("missing"));
        assert!(dir.list("audit_logs_", "").unwrap().is_empty());
    }

    #[test]
    fn test_sha256_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
