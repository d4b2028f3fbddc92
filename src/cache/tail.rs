//! Work that outlives the response.
//!
//! A cache miss answers the client first and writes the fresh entry afterwards. The write
//! is tracked twice: by the request's own [`RequestTail`], which tests and response
//! processors can await, and by the process-wide [`TailTracker`], which shutdown drains.

use std::{future::Future, time::Duration};

use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Process-wide registry of deferred cache work.
#[derive(Debug, Clone, Default)]
pub struct TailTracker {
    tracker: TaskTracker,
}

impl TailTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the tail of a new request.
    pub fn begin(&self) -> RequestTail {
        RequestTail {
            tracker: TaskTracker::new(),
            process: self.tracker.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting new work and wait for every outstanding write.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Like [`drain`](Self::drain), giving up after `timeout`. Returns `true` when every
    /// write finished in time.
    pub async fn drain_within(&self, timeout: Duration) -> bool {
        let pending = self.pending();
        if tokio::time::timeout(timeout, self.drain()).await.is_ok() {
            debug!(cache = "tacky", pending, "request tails drained");
            true
        } else {
            warn!(
                cache = "tacky",
                pending = self.pending(),
                timeout_ms = timeout.as_millis() as u64,
                "abandoning deferred cache writes at shutdown"
            );
            false
        }
    }
}

/// Completion handle for the deferred work of one request.
///
/// Inserted into the response extensions by the pipeline; [`wait`](Self::wait) resolves
/// once the request's deferred store write has finished (immediately when there was none).
#[derive(Debug, Clone)]
pub struct RequestTail {
    tracker: TaskTracker,
    process: TaskTracker,
}

impl RequestTail {
    /// Spawn `work` so that it runs independently of the response.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.process.spawn(self.tracker.track_future(work));
    }

    /// No more work will be added for this request.
    pub(crate) fn seal(&self) {
        self.tracker.close();
    }

    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn is_done(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}
