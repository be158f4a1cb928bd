/*!
 * Positioned reads against the source CSV
 *
 * Every task opens its own descriptor and reads with an explicit offset,
 * so no seek state is shared between workers.
 */

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ImportError, Result};

/// Read-only handle on the source file
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    file: File,
    len: u64,
}

impl SourceFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ImportError::SourceNotFound(path.to_path_buf())
            } else {
                ImportError::Io(e)
            }
        })?;
        let len = file
            .metadata()
            .map_err(ImportError::Io)?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read as many bytes as available at `offset`, up to `buf.len()`.
    /// Returns the byte count; 0 means end of file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        positioned_read(&self.file, buf, offset).map_err(|e| ImportError::ReadFailed {
            path: self.path.clone(),
            offset,
            source: e,
        })
    }

    /// Read exactly `buf.len()` bytes at `offset`; a short read is an error.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut done = 0usize;
        while done < buf.len() {
            let n = self.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(ImportError::ReadFailed {
                    path: self.path.clone(),
                    offset: offset + done as u64,
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "short read"),
                });
            }
            done += n;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(windows)]
fn positioned_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
