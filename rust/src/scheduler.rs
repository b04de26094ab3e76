//! Cancellable background tasks.
//!
//! Every timer or retry loop the engine starts is owned by a handle. Dropping or
//! cancelling the handle aborts the task, so a retry can never fire after the
//! operation it guarded has been superseded or the engine has stopped.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Handle to a spawned task. The task is aborted when the handle is dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: runtime.spawn(future),
        }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Tasks keyed by what they work on. Spawning under an existing key cancels the
/// previous task for that key.
pub struct TaskGroup<K> {
    runtime: Handle,
    tasks: Mutex<HashMap<K, ScheduledTask>>,
}

impl<K> TaskGroup<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn<F>(&self, key: K, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = ScheduledTask::spawn(&self.runtime, future);
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, task| !task.is_finished());
        // Replacing drops (and aborts) the superseded task
        tasks.insert(key, task);
    }

    pub fn cancel(&self, key: &K) -> bool {
        self.tasks.lock().remove(key).is_some()
    }

    pub fn cancel_all(&self) {
        self.tasks.lock().clear();
    }

    /// Number of tasks still running
    pub fn active(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, task| !task.is_finished());
        tasks.len()
    }
}
