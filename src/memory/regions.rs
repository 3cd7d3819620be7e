//! Mapped memory regions backing device partitions

use std::fs::{File, OpenOptions};
#[cfg(target_os = "linux")]
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::error::{BufferError, Result};

use super::config::{BackingType, PartitionConfig};

/// A mapping plus whatever keeps its backing alive
#[derive(Debug)]
pub struct MappedRegion {
    mmap: MmapMut,
    backing_type: BackingType,
    /// Open file for file-backed regions
    _file: Option<File>,
    /// Owned descriptor for memfd regions
    #[cfg(target_os = "linux")]
    _owned_fd: Option<OwnedFd>,
}

impl MappedRegion {
    /// Map a region as described by `config`
    pub fn new(config: &PartitionConfig) -> Result<Self> {
        config.validate()?;

        match config.backing_type {
            BackingType::Anonymous => {
                let mmap = MmapOptions::new()
                    .len(config.size)
                    .map_anon()
                    .map_err(|e| BufferError::from_io(e, "Failed to create anonymous mapping"))?;
                Ok(Self::assemble(mmap, config.backing_type, None))
            }
            BackingType::FileBacked => Self::map_file(config),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => Self::map_memfd(config),
        }
    }

    fn assemble(mmap: MmapMut, backing_type: BackingType, file: Option<File>) -> Self {
        Self {
            mmap,
            backing_type,
            _file: file,
            #[cfg(target_os = "linux")]
            _owned_fd: None,
        }
    }

    /// Create file-backed storage and map it
    fn map_file(config: &PartitionConfig) -> Result<Self> {
        let path = config.default_file_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| BufferError::from_io(e, "Failed to create/open partition file"))?;

        file.set_len(config.size as u64)
            .map_err(|e| BufferError::from_io(e, "Failed to set partition file size"))?;

        // SAFETY: the file is owned by the region and outlives the mapping
        let mmap = unsafe {
            MmapOptions::new()
                .len(config.size)
                .map_mut(&file)
                .map_err(|e| BufferError::from_io(e, "Failed to map partition file"))?
        };

        Ok(Self::assemble(mmap, BackingType::FileBacked, Some(file)))
    }

    /// Create memfd-backed storage and map it
    #[cfg(target_os = "linux")]
    fn map_memfd(config: &PartitionConfig) -> Result<Self> {
        let name = std::ffi::CString::new(config.name.clone())
            .map_err(|_| BufferError::incompatible_parameters("Partition name contains null bytes"))?;

        let owned_fd = memfd_create(name.as_c_str(), MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| BufferError::error(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| BufferError::error(format!("Failed to set memfd size: {}", e)))?;

        // SAFETY: the descriptor is owned by the region and outlives the mapping
        let mmap = unsafe {
            MmapOptions::new()
                .len(config.size)
                .map_mut(&owned_fd)
                .map_err(|e| BufferError::from_io(e, "Failed to map memfd"))?
        };

        Ok(Self {
            mmap,
            backing_type: BackingType::MemFd,
            _file: None,
            _owned_fd: Some(owned_fd),
        })
    }

    /// Address of the first mapped byte
    pub fn base_address(&self) -> usize {
        self.mmap.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    pub fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    /// Flush changes to the backing file (no-op for anonymous mappings)
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| BufferError::from_io(e, "Failed to flush partition mapping"))
    }
}

// Access to the mapped bytes is coordinated through range leases
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}
