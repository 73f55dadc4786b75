//! Named shared-memory objects backed by a file in a shm directory.
//!
//! On Linux `shm_open("/name")` is a file at `/dev/shm/name`; mapping that file
//! with `MAP_SHARED` gives every process that knows the name the same pages.

use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

pub struct SharedMemory {
    _file: File,
    mmap: MmapMut,
    path: PathBuf,
}

impl SharedMemory {
    /// Open the object `name` under `dir`, creating and sizing it if it does not
    /// exist yet, and map it read-write.
    ///
    /// An existing object of a different non-zero size is rejected rather than
    /// resized, since another process may already be using it.
    pub fn open_or_create<P: AsRef<Path>>(dir: P, name: &str, size_bytes: u64) -> io::Result<Self> {
        let path = object_path(dir, name)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            // Two first-time openers may both get here; set_len to the same size is idempotent.
            file.set_len(size_bytes)?;
            tracing::debug!(path = %path.display(), size_bytes, "sized shared memory object");
        } else if len != size_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "shared memory object {} is {len} bytes, expected {size_bytes}",
                    path.display()
                ),
            ));
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            _file: file,
            mmap,
            path,
        })
    }

    /// Remove the object from the system. Processes that still have it mapped
    /// keep their mapping; missing objects are not an error.
    pub fn unlink<P: AsRef<Path>>(dir: P, name: &str) -> io::Result<()> {
        let path = object_path(dir, name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Return raw pointer to start of the mapping
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// "/os_chat_shm" -> <dir>/os_chat_shm
fn object_path<P: AsRef<Path>>(dir: P, name: &str) -> io::Result<PathBuf> {
    let bare = name.trim_start_matches('/');
    if bare.is_empty() || bare.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid shared memory name {name:?}"),
        ));
    }
    Ok(dir.as_ref().join(bare))
}
