//! FIFO handoff between producers and the dispatcher loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::job::Job;

enum Sender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

enum Receiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

/// FIFO job queue, safe for concurrent producers and consumers
///
/// Unbounded by default; with a bound, `push` waits until a slot frees up.
/// No priorities and no re-ordering.
pub struct JobQueue {
    sender: Sender,
    receiver: Mutex<Receiver>,
    depth: AtomicUsize,
}

impl JobQueue {
    /// Create an unbounded queue (the default policy)
    pub fn unbounded() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Sender::Unbounded(tx),
            receiver: Mutex::new(Receiver::Unbounded(rx)),
            depth: AtomicUsize::new(0),
        }
    }

    /// Create a queue holding at most `capacity` jobs
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: Sender::Bounded(tx),
            receiver: Mutex::new(Receiver::Bounded(rx)),
            depth: AtomicUsize::new(0),
        }
    }

    /// Create a queue from a configured bound, where 0 means unbounded
    pub fn with_max_depth(max_depth: usize) -> Self {
        if max_depth == 0 {
            Self::unbounded()
        } else {
            Self::bounded(max_depth)
        }
    }

    /// Add a job to the back of the queue
    ///
    /// On a bounded queue this waits for space. Returns `false` when the
    /// consumer side is gone.
    pub async fn push(&self, job: Job) -> bool {
        let pushed = match &self.sender {
            Sender::Bounded(tx) => tx.send(job).await.is_ok(),
            Sender::Unbounded(tx) => tx.send(job).is_ok(),
        };
        if pushed {
            self.depth.fetch_add(1, Ordering::SeqCst);
        }
        pushed
    }

    /// Take the next job, waiting up to `timeout`
    ///
    /// Returns `None` when the timeout expires before a job arrives.
    pub async fn pop(&self, timeout: Duration) -> Option<Job> {
        let mut receiver = self.receiver.lock().await;
        let received = tokio::time::timeout(timeout, async {
            match &mut *receiver {
                Receiver::Bounded(rx) => rx.recv().await,
                Receiver::Unbounded(rx) => rx.recv().await,
            }
        })
        .await
        .ok()
        .flatten();

        if received.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        received
    }

    /// Number of jobs currently waiting
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
