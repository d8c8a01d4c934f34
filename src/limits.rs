//! Concurrent stream limiting
//!
//! Every relay session runs its own transcoder, so the number of live
//! sessions is capped. A permit is taken before the process is started and
//! released when the session ends.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Caps the number of concurrent relay sessions
#[derive(Debug, Clone)]
pub struct StreamLimiter {
    semaphore: Option<Arc<Semaphore>>,
    limit: usize,
}

/// Held for the lifetime of one session
#[derive(Debug)]
pub struct StreamPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl StreamLimiter {
    /// `None` or `Some(0)` disables the limit, as in the config file
    pub fn new(max_streams: Option<usize>) -> Self {
        match max_streams.filter(|&limit| limit > 0) {
            Some(limit) => Self {
                semaphore: Some(Arc::new(Semaphore::new(limit))),
                limit,
            },
            None => Self {
                semaphore: None,
                limit: usize::MAX,
            },
        }
    }

    /// Take a slot, or `None` when all slots are in use
    pub fn try_acquire(&self) -> Option<StreamPermit> {
        match &self.semaphore {
            Some(semaphore) => semaphore
                .clone()
                .try_acquire_owned()
                .ok()
                .map(|permit| StreamPermit {
                    _permit: Some(permit),
                }),
            None => Some(StreamPermit { _permit: None }),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|_| self.limit)
    }

    /// Slots currently in use
    pub fn in_use(&self) -> usize {
        match &self.semaphore {
            Some(semaphore) => self.limit - semaphore.available_permits(),
            None => 0,
        }
    }
}

/// Build the limiter from config
pub fn create_stream_limiter(config: &crate::config::ServerConfig) -> StreamLimiter {
    StreamLimiter::new(config.max_concurrent_streams)
}
