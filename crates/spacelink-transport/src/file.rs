use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Sender;

/// Appends every packet to a capture file.
///
/// Useful for replaying a pass offline or for links that are really a
/// store-and-forward spool.
#[derive(Debug)]
pub struct FileSender {
    path: PathBuf,
    file: Option<File>,
}

impl FileSender {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sender for FileSender {
    fn init(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| TransportError::Open {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = ?self.path, "file sender opened");
        self.file = Some(file);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(TransportError::NotInitialized)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(bytes.len())
    }

    fn label(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "spacelink-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn appends_packets_in_order() {
        let path = unique_path("capture");
        let mut sender: Box<dyn Sender> = Box::new(FileSender::new(&path));
        sender.init().unwrap();
        sender.send(b"one").unwrap();
        sender.send(b"two").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"onetwo");
        assert!(sender.label().starts_with("file:"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn open_failure_is_reported() {
        let path = unique_path("missing-dir").join("nested").join("capture.bin");
        let mut sender = FileSender::new(&path);
        let err = sender.init().unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
