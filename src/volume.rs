//! Opaque storage-volume interface.
//!
//! The pipeline only ever talks to a volume through [Filesystem]; where the
//! bytes actually live (local disk, S3, SFTP, ...) is a concern of the
//! implementation. Only the local driver ships with this crate.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Read/write access to one configured storage volume.
///
/// Paths are volume-relative forward-slash names, not host paths.
pub trait Filesystem: Send + Sync + std::fmt::Debug {
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()>;
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    fn delete(&self, path: &str) -> io::Result<()>;
    fn file_exists(&self, path: &str) -> io::Result<bool>;
    fn file_size(&self, path: &str) -> io::Result<u64>;
    fn read_stream(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;
    /// Streams `reader` into `path`, returning the number of bytes written.
    fn write_stream(&self, path: &str, reader: &mut dyn Read) -> io::Result<u64>;
}

/// Volume backed by a directory on the local machine.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn prepare_parent(&self, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl Filesystem for LocalVolume {
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.resolve(path);
        self.prepare_parent(&target)?;
        fs::write(target, bytes)
    }

    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn file_exists(&self, path: &str) -> io::Result<bool> {
        Ok(self.resolve(path).is_file())
    }

    fn file_size(&self, path: &str) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(path))?.len())
    }

    fn read_stream(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.resolve(path))?))
    }

    fn write_stream(&self, path: &str, reader: &mut dyn Read) -> io::Result<u64> {
        let target = self.resolve(path);
        self.prepare_parent(&target)?;
        let mut file = File::create(target)?;
        io::copy(reader, &mut file)
    }
}
