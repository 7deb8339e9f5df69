use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

/// Where exported files go. Receives the finished bytes under their final filename.
pub trait DownloadSink {
    /// Delivers `bytes` as `filename` and returns where they ended up.
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Writes downloads into a directory.
///
/// Bytes are staged in a temporary file next to the destination and renamed into place, so a
/// half-written PNG never appears under its final name. The staging file is removed whether or
/// not delivery succeeds.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .filter(|name| name.to_str() == Some(filename))
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a plain file name: {filename:?}"),
                )
            })?;

        std::fs::create_dir_all(&self.dir)?;
        let dest = self.dir.join(name);

        let mut staged = tempfile::NamedTempFile::new_in(&self.dir)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged.persist(&dest).map_err(|err| err.error)?;

        tracing::debug!(path = %dest.display(), bytes = bytes.len(), "download delivered");
        Ok(dest)
    }
}
