//! All-or-none acquisition across several pools

use std::sync::Mutex;

use crate::{
    buffers::{Buffer, BufferPool, GetBufferRequest},
    error::Result,
    sync::lock,
};

/// Serialises multi-pool acquisitions so two callers never each hold half of
/// what the other needs.
///
/// Every caller that acquires more than one buffer at a time from a shared
/// set of pools should go through the same coordinator.
#[derive(Debug, Default)]
pub struct AcquireAllCoordinator {
    gate: Mutex<()>,
}

impl AcquireAllCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one buffer per request, in order.
    ///
    /// If any acquisition fails, the buffers already acquired are released
    /// and the error is returned.
    pub fn acquire_all(&self, requests: Vec<(&BufferPool, GetBufferRequest)>) -> Result<Vec<Buffer>> {
        let _gate = lock(&self.gate);
        let mut acquired: Vec<(Buffer, GetBufferRequest)> = Vec::with_capacity(requests.len());

        for (pool, request) in requests {
            match pool.get_buffer(request.clone()) {
                Ok(buffer) => acquired.push((buffer, request)),
                Err(e) => {
                    log::debug!(
                        "acquire_all failed after {} buffers, rolling back: {}",
                        acquired.len(),
                        e
                    );
                    roll_back(acquired);
                    return Err(e);
                }
            }
        }

        Ok(acquired.into_iter().map(|(buffer, _)| buffer).collect())
    }

    /// Acquire `count` buffers from one pool, or none
    pub fn acquire_n(&self, pool: &BufferPool, count: usize, request: GetBufferRequest) -> Result<Vec<Buffer>> {
        self.acquire_all((0..count).map(|_| (pool, request.clone())).collect())
    }
}

fn roll_back(acquired: Vec<(Buffer, GetBufferRequest)>) {
    for (buffer, request) in acquired.into_iter().rev() {
        if let Err(e) = buffer.drop_reference(request.owner) {
            log::warn!("rollback of buffer {} failed: {}", buffer.get_index(), e);
        }
    }
}
