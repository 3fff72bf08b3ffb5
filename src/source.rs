//! The file being distributed.
//!
//! Opened once at startup; its length is sampled then and treated as fixed
//! for the whole run. Reads are positioned, so every connection can read
//! at its own offset through the one shared handle.

use crate::error::ServerError;
use crate::runtime::protocol::BlockSource;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub struct SourceFile {
    file: File,
    len: u64,
    path: PathBuf,
}

impl SourceFile {
    /// Open `path` read-only and record its length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ServerError::Setup("open source file", e))?;
        let meta = file
            .metadata()
            .map_err(|e| ServerError::Setup("determine source file size", e))?;
        if !meta.is_file() {
            return Err(ServerError::Setup(
                "open source file",
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        Ok(Self {
            file,
            len: meta.len(),
            path,
        })
    }

    /// Length announced to every client.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for SourceFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        loop {
            match self.file.read_at(buf, offset) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }

    fn size(&self) -> u64 {
        self.len
    }
}
