//! Task pool capability.
//!
//! The connection schedules each send as a unit of work on a pool the caller
//! provides. Any executor works as long as it runs submitted jobs eventually
//! and on a thread other than the submitter's; [`ThreadPool`] is a small
//! ready-made implementation for hosted targets.

use core::fmt::Debug;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::error::Error;

/// A unit of work submitted to a pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Schedules submitted units of work.
pub trait TaskPool: Send + Sync + 'static {
    /// Scheduling error type.
    type Error: Debug;

    /// Queue `job` to run on a pool worker.
    fn schedule(&self, job: Job) -> Result<(), Self::Error>;
}

/// A fixed set of worker threads draining a job queue.
///
/// Cloning shares the queue. Workers exit once every handle is dropped and
/// the queue drains.
#[derive(Clone)]
pub struct ThreadPool {
    sender: mpsc::Sender<Job>,
}

impl ThreadPool {
    /// Spawn `workers` worker threads (at least one).
    ///
    /// # Errors
    ///
    /// [`Error::InternalError`] when a worker thread cannot be spawned.
    pub fn new(workers: usize) -> Result<Self, Error> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for i in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let result = thread::Builder::new()
                .name(format!("libhttps-worker-{i}"))
                .spawn(move || loop {
                    let job = {
                        let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                });
            if let Err(e) = result {
                log::error!("failed to spawn a pool worker: {e}");
                return Err(Error::InternalError);
            }
        }
        Ok(Self { sender })
    }
}

/// The pool's workers have exited and no longer accept work.
#[derive(Debug)]
pub struct ScheduleError;

impl TaskPool for ThreadPool {
    type Error = ScheduleError;

    fn schedule(&self, job: Job) -> Result<(), Self::Error> {
        self.sender.send(job).map_err(|_| ScheduleError)
    }
}
