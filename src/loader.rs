//! File and stdin access for request material
//!
//! Bodies, form files, cookie files and TLS PEM files are read through a
//! [`ResourceLoader`] so the engine can run against an in-memory fixture.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;

use crate::config::UploadStream;

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<Bytes>;

    /// Standard input as a one-shot stream.
    fn stdin(&self) -> io::Result<UploadStream>;

    /// Standard input fully buffered.
    async fn read_stdin(&self) -> io::Result<Bytes> {
        let chunks: Vec<Bytes> = self.stdin()?.try_collect().await?;
        Ok(chunks.concat().into())
    }
}

/// The real filesystem and process stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

#[async_trait]
impl ResourceLoader for FsLoader {
    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        tokio::fs::read(path).await.map(Bytes::from)
    }

    fn stdin(&self) -> io::Result<UploadStream> {
        Ok(Box::pin(ReaderStream::new(tokio::io::stdin())))
    }
}

/// Fixed contents keyed by path. Stdin can be read once.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, Bytes>,
    stdin: Mutex<Option<Bytes>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Bytes>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn with_stdin(self, contents: impl Into<Bytes>) -> Self {
        if let Ok(mut slot) = self.stdin.lock() {
            *slot = Some(contents.into());
        }
        self
    }
}

#[async_trait]
impl ResourceLoader for MemoryLoader {
    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }

    fn stdin(&self) -> io::Result<UploadStream> {
        let contents = self
            .stdin
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stdin lock poisoned"))?
            .take()
            .unwrap_or_default();
        Ok(Box::pin(futures::stream::iter([Ok(contents)])))
    }
}
