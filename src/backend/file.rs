//! Line-appending file backend.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Backend, BackendError};

/// Appends each payload to a file as one line.
///
/// The file is opened by [`init`](Backend::init), so constructing a
/// `FileBackend` never touches the filesystem. Writes are serialized through
/// an async mutex, which makes concurrent workers safe but gives no benefit
/// over a single one; the default worker count is therefore 1.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for FileBackend {
    type Payload = String;
    type Output = ();

    const DEFAULT_WORKERS: usize = 1;

    async fn init(&self) -> Result<(), BackendError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        debug!(path = %self.path.display(), "file backend opened");
        *self.file.lock().await = Some(file);
        Ok(())
    }

    async fn execute(&self, line: &String) -> Result<(), BackendError> {
        let mut guard = self.file.lock().await;
        let file = guard
            .as_mut()
            .ok_or_else(|| BackendError::failed("file backend is not open"))?;

        file.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        if let Some(mut file) = self.file.lock().await.take() {
            file.flush().await?;
            file.sync_all().await?;
            debug!(path = %self.path.display(), "file backend closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_lines_and_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        let backend = FileBackend::new(&path);

        backend.init().await.unwrap();
        backend.execute(&"first".to_string()).await.unwrap();
        backend.execute(&"second\n".to_string()).await.unwrap();
        backend.close().await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "first\nsecond\n");
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        for line in ["one", "two"] {
            let backend = FileBackend::new(&path);
            backend.init().await.unwrap();
            backend.execute(&line.to_string()).await.unwrap();
            backend.close().await.unwrap();
        }

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "one\ntwo\n");
    }

    #[tokio::test]
    async fn execute_before_init_fails() {
        let backend = FileBackend::new("never-opened.log");
        let err = backend.execute(&"x".to_string()).await.unwrap_err();
        assert_eq!(err.to_string(), "file backend is not open");
    }

    #[tokio::test]
    async fn close_is_harmless_when_never_opened() {
        assert!(FileBackend::new("unused.log").close().await.is_ok());
    }
}
