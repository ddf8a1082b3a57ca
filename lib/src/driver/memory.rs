//! A transport that keeps frames in memory instead of writing to hardware.
//!
//! Lets the controller and the daemon run end-to-end on any machine, and lets
//! tests inspect exactly what would have been sent.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::driver::{DriverError, Transport};

/// Frames kept for inspection. Older ones are dropped so a long dry run
/// stays bounded.
pub const MAX_RECORDED: usize = 256;

#[derive(Default)]
struct Recorded {
    writes: VecDeque<Vec<u8>>,
    count: usize,
    failing: bool,
}

/// Cloning shares the recording, so a test can keep a handle after handing
/// the transport to a driver.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// While set, every write fails as if the bus had gone away.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Successful writes since creation, including ones no longer retained.
    pub fn write_count(&self) -> usize {
        self.lock().count
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.lock().writes.back().cloned()
    }

    /// The most recent writes, oldest first, at most [`MAX_RECORDED`].
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.iter().cloned().collect()
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let mut recorded = self.lock();
        if recorded.failing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated bus failure").into());
        }
        if recorded.writes.len() == MAX_RECORDED {
            recorded.writes.pop_front();
        }
        recorded.writes.push_back(data.to_vec());
        recorded.count += 1;
        Ok(())
    }
}
