//! Thread-pool executor
//!
//! A fixed pool of OS threads consumes submitted calls from a channel.
//! `execute` hands the call to the pool and awaits a oneshot completion,
//! so the calling task yields instead of blocking while the thread works.
//! The timeout is enforced on the waiting side only: on expiry the waiter
//! returns TIMEOUT and the thread finishes the call in the background.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::job::Job;
use crate::registry::{Handler, JobInput};

use super::{call_async_handler, call_sync_handler, encode_outcome, Executor};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor backed by a fixed pool of OS threads
pub struct ThreadPoolExecutor {
    pool_size: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    running: Arc<AtomicUsize>,
}

impl ThreadPoolExecutor {
    /// Create a pool of `pool_size` worker threads
    pub fn new(pool_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(std::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let receiver = receiver.clone();
            workers.push(std::thread::spawn(move || loop {
                // Holding the lock only for the recv keeps workers from
                // serialising each other's task execution.
                let task = match receiver.lock() {
                    Ok(guard) => guard.recv(),
                    Err(_) => break,
                };
                match task {
                    Ok(task) => task(),
                    Err(_) => break,
                }
            }));
        }

        Self {
            pool_size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured pool size
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

#[async_trait]
impl Executor for ThreadPoolExecutor {
    async fn execute(&self, job: &Job, handler: Handler) -> Result<ExecutionResult> {
        let sender = match self.sender.lock().await.as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(Error::ExecutorClosed),
        };

        let started = Instant::now();
        let input = JobInput::new(job.args.clone(), job.kwargs.clone());
        let (done_tx, done_rx) = oneshot::channel::<anyhow::Result<Value>>();

        let running = self.running.clone();
        let task: Task = Box::new(move || {
            running.fetch_add(1, Ordering::SeqCst);
            let outcome = match &handler {
                Handler::Sync(func) => call_sync_handler(func, input),
                // Async handlers are driven to completion on this thread
                Handler::Async(func) => {
                    futures::executor::block_on(call_async_handler(func, input))
                }
            };
            running.fetch_sub(1, Ordering::SeqCst);
            let _ = done_tx.send(outcome);
        });

        if sender.send(task).is_err() {
            return Err(Error::ExecutorClosed);
        }

        let completion = match job.timeout_seconds {
            Some(limit) => {
                match tokio::time::timeout(Duration::from_secs(limit), done_rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        // The thread keeps running; only the wait gives up
                        return Ok(ExecutionResult::timeout(
                            limit,
                            started.elapsed().as_secs_f64(),
                        ));
                    }
                }
            }
            None => done_rx.await,
        };

        let outcome = match completion {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("worker thread dropped the result")),
        };
        Ok(encode_outcome(outcome, started))
    }

    async fn shutdown(&self) -> Result<()> {
        // Dropping the sender lets workers drain the queue and exit
        drop(self.sender.lock().await.take());

        let workers = std::mem::take(&mut *self.workers.lock().await);
        if workers.is_empty() {
            return Ok(());
        }

        let joined = tokio::task::spawn_blocking(move || {
            let mut panicked = 0usize;
            for handle in workers {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }
            panicked
        })
        .await;

        match joined {
            Ok(0) => Ok(()),
            Ok(panicked) => Err(Error::Shutdown(format!(
                "{panicked} worker thread(s) panicked"
            ))),
            Err(join_error) => Err(Error::Shutdown(join_error.to_string())),
        }
    }

    fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}
