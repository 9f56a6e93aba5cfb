//! Deferred-task queue
//!
//! Some engines re-enter their own locks when a key is installed from
//! inside the challenge callback. For those, installation is scheduled here
//! and runs once the control loop drains the queue. Tasks run strictly in
//! scheduling order.

use super::session::DrmSession;
use super::{ChallengeTransaction, KeySessionId};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::Weak;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Unit of deferred work
pub trait IdleTask: Send {
    fn name(&self) -> &'static str;
    fn run(self: Box<Self>);
}

/// Thread-safe handle for scheduling tasks
#[derive(Debug, Clone)]
pub struct IdleScheduler {
    tx: mpsc::UnboundedSender<Box<dyn IdleTask>>,
}

impl IdleScheduler {
    /// Queue a task. If the queue is gone the task is dropped unrun.
    pub fn schedule(&self, task: Box<dyn IdleTask>) -> Result<()> {
        let name = task.name();
        self.tx.send(task).map_err(|rejected| {
            drop(rejected);
            Error::Internal(format!("idle queue closed, dropped {name}"))
        })
    }
}

/// Single-consumer queue drained by the control loop
pub struct IdleQueue {
    rx: mpsc::UnboundedReceiver<Box<dyn IdleTask>>,
}

impl IdleQueue {
    pub fn new() -> (IdleScheduler, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IdleScheduler { tx }, Self { rx })
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            debug!(task = task.name(), "Running idle task");
            task.run();
            ran += 1;
        }
        ran
    }

    /// Wait for the next task
    pub async fn next(&mut self) -> Option<Box<dyn IdleTask>> {
        self.rx.recv().await
    }

    /// Stop accepting tasks and drop the ones still queued
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut dropped = 0;
        while let Ok(task) = self.rx.try_recv() {
            debug!(task = task.name(), "Dropping idle task");
            dropped += 1;
        }
        dropped
    }
}

impl std::fmt::Debug for IdleQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleQueue").finish_non_exhaustive()
    }
}

/// Installs one license response. Owns the response until it runs.
pub struct InstallKeyTask {
    session: Weak<DrmSession>,
    key_session: KeySessionId,
    response: Bytes,
}

impl InstallKeyTask {
    pub fn new(session: Weak<DrmSession>, key_session: KeySessionId, response: Bytes) -> Self {
        Self {
            session,
            key_session,
            response,
        }
    }

    /// Build the task from a resolved transaction
    pub fn from_transaction(session: Weak<DrmSession>, transaction: ChallengeTransaction) -> Result<Self> {
        let key_session = transaction.key_session();
        let response = transaction.into_response()?;
        Ok(Self::new(session, key_session, response))
    }
}

impl IdleTask for InstallKeyTask {
    fn name(&self) -> &'static str {
        "install_key"
    }

    fn run(self: Box<Self>) {
        let Some(session) = self.session.upgrade() else {
            debug!(key_session = ?self.key_session, "DRM session gone, dropping license response");
            return;
        };
        if let Err(e) = session.install_key(self.key_session, self.response) {
            warn!(error = %e, "Deferred key installation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Record(Arc<Mutex<Vec<u32>>>, u32);

    impl IdleTask for Record {
        fn name(&self) -> &'static str {
            "record"
        }
        fn run(self: Box<Self>) {
            self.0.lock().unwrap().push(self.1);
        }
    }

    #[test]
    fn test_tasks_run_in_order() {
        let (scheduler, mut queue) = IdleQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            scheduler.schedule(Box::new(Record(log.clone(), i))).unwrap();
        }
        assert_eq!(queue.drain(), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_schedule_after_close_fails() {
        let (scheduler, mut queue) = IdleQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.schedule(Box::new(Record(log.clone(), 1))).unwrap();
        assert_eq!(queue.close(), 1);
        assert!(scheduler.schedule(Box::new(Record(log.clone(), 2))).is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_next_awaits_scheduled_task() {
        let (scheduler, mut queue) = IdleQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        scheduler.schedule(Box::new(Record(log.clone(), 7))).unwrap();

        let task = tokio_test::block_on(queue.next()).unwrap();
        assert_eq!(task.name(), "record");
        task.run();
        assert_eq!(*log.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_install_for_dead_session_is_dropped() {
        let task = InstallKeyTask::new(Weak::new(), KeySessionId(1), Bytes::from_static(b"license"));
        Box::new(task).run();
    }
}
