#![forbid(unsafe_code)]

//! Positional file I/O and the per-worker asynchronous request queue.

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use tracing::debug;

use crate::types::Result;

mod queue;

pub use queue::{DiskQueue, IoCompletion, IoOp, IoRequest};

/// Positioned reads and writes against a backing file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from the file starting at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` to the file starting at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// Scratch file shared by every worker. Reads and writes are positional, so
/// no seek state is shared between threads.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access, keeping its contents.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Opens the per-run scratch file. Missing parent directories are created
    /// and any previous contents are discarded; the scratch file carries no
    /// state across runs.
    pub fn open_scratch(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        debug!(path = %path.display(), "io.scratch.open");
        Ok(Self::new(file))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match positioned::read(&self.inner, dst, off)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("scratch read hit end of file at offset {off}"),
                    )
                    .into())
                }
                n => {
                    dst = &mut dst[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match positioned::write(&self.inner, src, off)? {
                0 => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                n => {
                    src = &src[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.inner.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.inner.set_len(len)?)
    }
}

/// One positional read or write; may transfer fewer bytes than asked.
#[cfg(unix)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        file.read_at(dst, off)
    }

    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        file.write_at(src, off)
    }
}

#[cfg(windows)]
mod positioned {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        file.seek_read(dst, off)
    }

    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        file.seek_write(src, off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SageError;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn write_read_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let io = StdFileIo::open(dir.path().join("io.bin"))?;
        let payload = b"vertex record";
        io.write_at(512, payload)?;
        let mut buf = vec![0u8; payload.len()];
        io.read_at(512, &mut buf)?;
        assert_eq!(&buf, payload);
        assert_eq!(io.len()?, 512 + payload.len() as u64);
        Ok(())
    }

    #[test]
    fn read_past_eof_is_an_io_error() -> Result<()> {
        let dir = tempdir()?;
        let io = StdFileIo::open(dir.path().join("io.bin"))?;
        let mut buf = [0u8; 8];
        match io.read_at(0, &mut buf) {
            Err(SageError::Io(inner)) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn scratch_open_discards_previous_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("sage.tmp");
        {
            let io = StdFileIo::open_scratch(&path)?;
            io.write_at(0, &[7u8; 4096])?;
        }
        let io = StdFileIo::open_scratch(&path)?;
        assert!(io.is_empty()?);
        Ok(())
    }
}
