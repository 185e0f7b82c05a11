/*!
Compression for archive files.

Archives are newline-delimited JSON, either gzip-compressed (`.json.gz`) or
plain (`.json`) when the writer is configured to leave compression to the
compactor. Everything here streams; no archive is ever held in memory whole.
*/

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};

use crate::{LifecycleError, Result};

pub const GZIP_EXTENSION: &str = ".json.gz";
pub const PLAIN_EXTENSION: &str = ".json";

/// On-disk encoding of an archive file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Gzip,
    Plain,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Gzip => GZIP_EXTENSION,
            ArchiveFormat::Plain => PLAIN_EXTENSION,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Plain => "none",
        }
    }

    /// Detect the format from a file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(GZIP_EXTENSION) {
            Some(ArchiveFormat::Gzip)
        } else if name.ends_with(PLAIN_EXTENSION) {
            Some(ArchiveFormat::Plain)
        } else {
            None
        }
    }
}

/// Gzip compression level
///
/// # Example
/// ```rust
/// use auditkeep_core::compression::GzipLevel;
///
/// // Fast compression (less CPU, larger files)
/// let fast = GzipLevel::fast();
///
/// // Maximum compression (more CPU, smaller files)
/// let max = GzipLevel::new(9)?;
/// assert!(GzipLevel::new(12).is_err());
/// # Ok::<(), auditkeep_core::LifecycleError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct GzipLevel(u32);

impl GzipLevel {
    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(LifecycleError::config(format!(
                "gzip level must be 0-9, got {level}"
            )));
        }
        Ok(Self(level))
    }

    /// Level 1
    pub fn fast() -> Self {
        Self(1)
    }

    /// Level 9
    pub fn max() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    fn compression(&self) -> Compression {
        Compression::new(self.0)
    }
}

impl Default for GzipLevel {
    fn default() -> Self {
        Self(6)
    }
}

impl TryFrom<u32> for GzipLevel {
    type Error = LifecycleError;

    fn try_from(level: u32) -> Result<Self> {
        Self::new(level)
    }
}

impl From<GzipLevel> for u32 {
    fn from(level: GzipLevel) -> Self {
        level.0
    }
}

/// Writer that applies an [`ArchiveFormat`] to everything written through it.
pub(crate) enum RecordEncoder<W: Write> {
    Gzip(GzEncoder<W>),
    Plain(W),
}

impl<W: Write> RecordEncoder<W> {
    pub(crate) fn new(inner: W, format: ArchiveFormat, level: GzipLevel) -> Self {
        match format {
            ArchiveFormat::Gzip => RecordEncoder::Gzip(GzEncoder::new(inner, level.compression())),
            ArchiveFormat::Plain => RecordEncoder::Plain(inner),
        }
    }

    /// Write the gzip trailer (if any) and hand back the inner writer
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            RecordEncoder::Gzip(encoder) => encoder.finish(),
            RecordEncoder::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for RecordEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RecordEncoder::Gzip(encoder) => encoder.write(buf),
            RecordEncoder::Plain(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RecordEncoder::Gzip(encoder) => encoder.flush(),
            RecordEncoder::Plain(inner) => inner.flush(),
        }
    }
}

/// Stream `source` through a gzip encoder into `sink`; returns the sink
pub(crate) fn gzip_stream<R: Read, W: Write>(
    source: &mut R,
    sink: W,
    level: GzipLevel,
) -> io::Result<W> {
    let mut encoder = GzEncoder::new(sink, level.compression());
    io::copy(source, &mut encoder)?;
    encoder.finish()
}

/// Open an archive file for line-by-line reading, decompressing when needed
pub fn open_archive_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let format = ArchiveFormat::from_path(path).ok_or_else(|| {
        LifecycleError::config(format!(
            "{} is not an archive file (expected {GZIP_EXTENSION} or {PLAIN_EXTENSION})",
            path.display()
        ))
    })?;
    let file = File::open(path).map_err(|e| LifecycleError::filesystem(path, e))?;

    Ok(match format {
        ArchiveFormat::Gzip => Box::new(BufReader::new(GzDecoder::new(file))),
        ArchiveFormat::Plain => Box::new(BufReader::new(file)),
    })
}
