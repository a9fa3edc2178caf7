use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use flume::{Receiver, Sender};
use log::{debug, error};

use crate::error::{AddonError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f`, turning a panic into [`AddonError::Panicked`].
pub fn run_guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload);
            error!("worker task panicked: {}", message);
            Err(AddonError::Panicked(message))
        }
    }
}

/// Result of a queued operation; resolves exactly once.
#[derive(Debug)]
pub struct Pending<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// A future that has already resolved.
    pub fn ready(result: Result<T>) -> Self {
        let (sender, receiver) = flume::bounded(1);
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Block until the operation completes.
    pub fn wait(self) -> Result<T> {
        self.receiver.recv().map_err(|_| AddonError::WorkerClosed)?
    }

    /// Await completion from async code.
    pub async fn resolve(self) -> Result<T> {
        self.receiver
            .recv_async()
            .await
            .map_err(|_| AddonError::WorkerClosed)?
    }

    /// The result if the operation has already completed.
    pub fn try_take(&self) -> Option<Result<T>> {
        self.receiver.try_recv().ok()
    }
}

/// Fixed set of named threads draining a shared job queue.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` named workers, at least one.
    pub fn new(threads: usize) -> Result<Self> {
        let (sender, receiver) = flume::unbounded::<Job>();
        let mut handles = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("la-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })?;
            handles.push(handle);
        }
        debug!("started {} worker thread(s)", handles.len());
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(handles),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.threads.lock().map_or(0, |threads| threads.len())
    }

    fn enqueue(&self, job: Job) -> Result<()> {
        let guard = self.sender.lock().map_err(|_| AddonError::WorkerClosed)?;
        let sender = guard.as_ref().ok_or(AddonError::WorkerClosed)?;
        sender.send(job).map_err(|_| AddonError::WorkerClosed)
    }

    /// Queue `f` and return a future for its result. Panics inside `f` come
    /// back as [`AddonError::Panicked`].
    pub fn submit<T, F>(&self, f: F) -> Result<Pending<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = flume::bounded(1);
        self.enqueue(Box::new(move || {
            let _ = sender.send(run_guarded(f));
        }))?;
        Ok(Pending { receiver })
    }

    /// Queue `f` and hand its result to `done` on the worker thread.
    pub fn submit_then<T, F, D>(&self, f: F, done: D) -> Result<()>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        D: FnOnce(Result<T>) + Send + 'static,
    {
        self.enqueue(Box::new(move || {
            let result = run_guarded(f);
            if panic::catch_unwind(AssertUnwindSafe(|| done(result))).is_err() {
                error!("completion callback panicked");
            }
        }))
    }

    /// Stop accepting work, let queued jobs finish and join the threads.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = match self.threads.lock() {
            Ok(mut threads) => std::mem::take(&mut *threads),
            Err(_) => return,
        };
        let current = thread::current().id();
        for handle in handles {
            // a worker cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread exited with a panic");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_resolves() {
        let pool = WorkerPool::new(2).unwrap();
        let pending = pool.submit(|| Ok(21 * 2)).unwrap();
        assert_eq!(pending.wait().unwrap(), 42);
    }

    #[test]
    fn test_panic_becomes_error() {
        let pool = WorkerPool::new(1).unwrap();
        let pending = pool.submit::<(), _>(|| panic!("boom")).unwrap();
        match pending.wait() {
            Err(AddonError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
        // the worker survives
        assert_eq!(pool.submit(|| Ok(1)).unwrap().wait().unwrap(), 1);
    }

    #[test]
    fn test_submit_then_calls_back() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = flume::bounded(1);
        pool.submit_then(|| Ok("done"), move |r| tx.send(r.unwrap()).unwrap())
            .unwrap();
        assert_eq!(rx.recv().unwrap(), "done");
    }

    #[test]
    fn test_closed_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        assert_eq!(pool.size(), 0);
        assert!(matches!(pool.submit(|| Ok(())), Err(AddonError::WorkerClosed)));
    }

    #[test]
    fn test_ready() {
        let pending = Pending::ready(Ok(5));
        assert_eq!(pending.try_take().unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_resolve_async() {
        let pool = WorkerPool::new(1).unwrap();
        let pending = pool.submit(|| Ok("async")).unwrap();
        assert_eq!(pending.resolve().await.unwrap(), "async");
    }
}
