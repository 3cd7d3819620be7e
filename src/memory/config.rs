//! Configuration types for device partitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{BufferError, Result};

/// Types of partition backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// Private anonymous mapping
    Anonymous,
    /// File-backed mapping, visible to other processes through the file
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific)
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl BackingType {
    /// Check if this backing type is supported on the current platform
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::Anonymous | BackingType::FileBacked => true,
            #[cfg(target_os = "linux")]
            BackingType::MemFd => true,
        }
    }

    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::Anonymous => "anonymous",
            BackingType::FileBacked => "file-backed",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for creating a named device partition
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Name pools and metadata slots refer to
    pub name: String,
    /// Total size of the partition in bytes
    pub size: usize,
    /// How the partition memory is mapped
    pub backing_type: BackingType,
    /// Optional file path for file-backed partitions
    pub file_path: Option<PathBuf>,
    /// Bus address of offset 0; identity-mapped when unset
    pub physical_base: Option<usize>,
    /// Permissions for file-backed partitions (Unix permissions)
    pub permissions: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            physical_base: None,
            permissions: 0o600,
        }
    }
}

impl PartitionConfig {
    /// Create a new partition configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed partitions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the bus address reported for offset 0
    pub fn with_physical_base(mut self, base: usize) -> Self {
        self.physical_base = Some(base);
        self
    }

    /// Set the permissions for file-backed partitions
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BufferError::incompatible_parameters(
                "Partition name cannot be empty",
            ));
        }

        if self.size == 0 {
            return Err(BufferError::incompatible_parameters(format!(
                "Partition '{}' must have a non-zero size",
                self.name
            )));
        }

        if !self.backing_type.is_supported() {
            return Err(BufferError::incompatible_parameters(format!(
                "Backing type {} is not supported on this platform",
                self.backing_type.name()
            )));
        }

        Ok(())
    }

    /// Get the default file path for this partition
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("degas_{}", self.name)))
    }
}
