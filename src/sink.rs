//! Output destinations for container writers
//!
//! Writers only ever append to their sink. Finalizing a container additionally needs to
//! reopen the written file to backpatch the header, which is why a sink reports the path
//! it is bound to (if any).

use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};

use auto_impl::auto_impl;

use crate::error::{Error, Result, WriteError};

/// Capability set of an output destination
#[auto_impl(&mut, Box)]
pub trait OutputSink: Write {
    /// Binds the sink to the file at `path`, creating or truncating it
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Path of the bound file, if the sink is file-backed
    fn path(&self) -> Option<&Path>;

    /// Flushes and releases the underlying handle
    fn close(&mut self) -> Result<()>;
}

/// Buffered file output
#[derive(Default)]
pub struct FileSink {
    inner: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}
impl FileSink {
    /// Creates an unbound sink; writes fail until [`OutputSink::open`] is called
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink bound to a new file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut sink = Self::new();
        sink.open(path.as_ref())?;
        Ok(sink)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn inner_mut(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other(WriteError::UnboundSink))
    }
}
impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner_mut()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner_mut()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}
impl OutputSink for FileSink {
    fn open(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let file = File::create(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.inner = Some(BufWriter::new(file));
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.flush()?;
        }
        Ok(())
    }
}

/// Standard output; cannot be reopened or backpatched
pub struct ConsoleSink {
    inner: Stdout,
}
impl Default for ConsoleSink {
    fn default() -> Self {
        Self {
            inner: io::stdout(),
        }
    }
}
impl Write for ConsoleSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
impl OutputSink for ConsoleSink {
    fn open(&mut self, _path: &Path) -> Result<()> {
        Err(WriteError::UnsupportedOperation("console output cannot be bound to a path").into())
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sink.bin");

        let mut sink = FileSink::create(&path)?;
        assert_eq!(sink.path(), Some(path.as_path()));
        sink.write_all(b"block")?;
        sink.close()?;
        assert!(!sink.is_open());

        assert_eq!(std::fs::read(&path)?, b"block");
        Ok(())
    }

    #[test]
    fn test_unbound_file_sink() {
        let mut sink = FileSink::new();
        let err = sink.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(sink.path().is_none());
    }

    #[test]
    fn test_missing_directory() {
        let err = FileSink::create("/nonexistent-dir/out.ldp").err();
        assert!(matches!(err, Some(Error::Open { .. })));
    }

    #[test]
    fn test_console_rejects_open() {
        let mut sink = ConsoleSink::default();
        let err = sink.open(Path::new("out.ldp")).unwrap_err();
        assert!(matches!(
            err,
            Error::WriteError(WriteError::UnsupportedOperation(_))
        ));
        assert!(sink.path().is_none());
    }

    #[test]
    fn test_boxed_sink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("boxed.bin");

        let mut sink: Box<dyn OutputSink> = Box::new(FileSink::new());
        sink.open(&path)?;
        sink.write_all(b"abc")?;
        assert!(sink.path().is_some());
        sink.close()?;

        assert_eq!(std::fs::read(&path)?, b"abc");
        Ok(())
    }
}
