//! Buffer manager configuration

use std::{fmt, sync::Arc, time::Duration};

use crate::{
    cache::{CacheMaintenance, NoCacheMaintenance},
    error::{BufferError, Result},
    sync::WaitTiming,
};

/// Settings shared by a manager and every pool it creates
#[derive(Clone)]
pub struct ManagerConfig {
    /// Name used in dumps and log lines
    pub name: String,
    /// Timing of blocking acquisitions
    pub wait_timing: WaitTiming,
    /// Partition backing `DeviceMemory` types
    pub device_partition: Option<String>,
    /// Partition backing `DeviceVideoMemory` types
    pub video_partition: Option<String>,
    /// Cache maintenance for `flush_cache`/`purge_cache`
    pub cache: Arc<dyn CacheMaintenance>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "buffer-manager".to_string(),
            wait_timing: WaitTiming::default(),
            device_partition: None,
            video_partition: None,
            cache: Arc::new(NoCacheMaintenance),
        }
    }
}

impl ManagerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_timing.poll_interval = interval;
        self
    }

    pub fn with_stall_warning(mut self, period: Duration) -> Self {
        self.wait_timing.stall_warning = period;
        self
    }

    pub fn with_device_partition(mut self, name: impl Into<String>) -> Self {
        self.device_partition = Some(name.into());
        self
    }

    pub fn with_video_partition(mut self, name: impl Into<String>) -> Self {
        self.video_partition = Some(name.into());
        self
    }

    pub fn with_cache_maintenance(mut self, cache: Arc<dyn CacheMaintenance>) -> Self {
        self.cache = cache;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.wait_timing.poll_interval.is_zero() {
            return Err(BufferError::error("Poll interval must be greater than zero"));
        }

        for name in [&self.device_partition, &self.video_partition].into_iter().flatten() {
            if name.is_empty() {
                return Err(BufferError::error("Default partition name cannot be empty"));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("name", &self.name)
            .field("wait_timing", &self.wait_timing)
            .field("device_partition", &self.device_partition)
            .field("video_partition", &self.video_partition)
            .field("cache", &self.cache)
            .finish()
    }
}
