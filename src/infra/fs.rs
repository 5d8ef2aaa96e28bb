//! Source file access backed by the local filesystem.

use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;

use crate::fetch::host::SourceFiles;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl SourceFiles for LocalFilesystem {
    fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>> {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata.modified().map(Some),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        fs::read(path).map(Bytes::from)
    }
}
