//! Dispatcher - one worker thread per thread-group.
//!
//! ```text
//!   supervisor ──post/call──► [ task channel ] ──► relay-worker-<group>
//!                                                   └─ WorkerState
//!                                                      (isolates of the group)
//! ```
//!
//! Every task runs on the group's worker with exclusive access to that
//! worker's [`WorkerState`], so isolates never migrate between threads and
//! their pipelines keep a single producer. Dropping the sender ends the
//! worker loop; the supervisor then joins the thread.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use relay_util::FxHashMap;

use super::ThreadKey;
use crate::error::{RelayError, Result};
use crate::isolate::{Isolate, IsolateId, ThreadGroupId};

type Task = Box<dyn FnOnce(&mut WorkerState) + Send + 'static>;

/// Thread-confined state of one worker
#[derive(Debug)]
pub struct WorkerState {
    thread: ThreadKey,
    group: ThreadGroupId,
    isolates: FxHashMap<IsolateId, Isolate>,
}

impl WorkerState {
    pub(crate) fn new(thread: ThreadKey, group: ThreadGroupId) -> Self {
        Self {
            thread,
            group,
            isolates: FxHashMap::default(),
        }
    }

    /// Identity of the thread running this state
    pub fn thread(&self) -> ThreadKey {
        self.thread
    }

    pub fn group(&self) -> ThreadGroupId {
        self.group
    }

    pub fn isolate(&self, id: IsolateId) -> Option<&Isolate> {
        self.isolates.get(&id)
    }

    pub fn isolate_mut(&mut self, id: IsolateId) -> Option<&mut Isolate> {
        self.isolates.get_mut(&id)
    }

    pub fn insert_isolate(&mut self, isolate: Isolate) {
        self.isolates.insert(isolate.id(), isolate);
    }

    pub fn remove_isolate(&mut self, id: IsolateId) -> Option<Isolate> {
        self.isolates.remove(&id)
    }

    pub fn isolate_count(&self) -> usize {
        self.isolates.len()
    }
}

struct Worker {
    thread: ThreadKey,
    sender: Sender<Task>,
    handle: JoinHandle<()>,
}

/// Worker threads keyed by thread-group
pub struct Dispatcher {
    prefix: String,
    workers: FxHashMap<ThreadGroupId, Worker>,
    next_thread: u64,
}

impl Dispatcher {
    /// Create a dispatcher naming its threads `<prefix>-<group>`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            workers: FxHashMap::default(),
            // ThreadKey 0 is the supervisor's own thread.
            next_thread: 1,
        }
    }

    /// Worker thread of `group`, spawned on first use
    ///
    /// Returns the worker's key and whether it was just spawned.
    pub fn ensure_worker(&mut self, group: ThreadGroupId) -> Result<(ThreadKey, bool)> {
        if let Some(worker) = self.workers.get(&group) {
            return Ok((worker.thread, false));
        }

        let thread = ThreadKey::new(self.next_thread);
        let (sender, receiver) = channel::unbounded::<Task>();
        let state = WorkerState::new(thread, group);

        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.prefix, group.as_u32()))
            .spawn(move || worker_loop(state, receiver))
            .map_err(|source| RelayError::WorkerSpawn { group, source })?;

        self.next_thread += 1;
        self.workers.insert(
            group,
            Worker {
                thread,
                sender,
                handle,
            },
        );
        log::info!("Spawned worker {} for {}", thread, group);
        Ok((thread, true))
    }

    /// Key of `group`'s worker thread
    pub fn thread_of(&self, group: ThreadGroupId) -> Option<ThreadKey> {
        self.workers.get(&group).map(|worker| worker.thread)
    }

    pub fn has_worker(&self, group: ThreadGroupId) -> bool {
        self.workers.contains_key(&group)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue `task` on `group`'s worker without waiting
    pub fn post<F>(&self, group: ThreadGroupId, task: F) -> Result<()>
    where
        F: FnOnce(&mut WorkerState) + Send + 'static,
    {
        let worker = self
            .workers
            .get(&group)
            .ok_or(RelayError::UnknownGroup(group))?;
        worker
            .sender
            .send(Box::new(task))
            .map_err(|_| RelayError::WorkerDisconnected(group))
    }

    /// Run `f` on `group`'s worker and wait for its result
    pub fn call<F, R>(&self, group: ThreadGroupId, f: F) -> Result<R>
    where
        F: FnOnce(&mut WorkerState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = channel::bounded(1);
        self.post(group, move |state| {
            // The caller may have given up waiting.
            let _ = reply.send(f(state));
        })?;
        result
            .recv()
            .map_err(|_| RelayError::WorkerDisconnected(group))
    }

    /// Stop `group`'s worker after its queued tasks and join it
    ///
    /// Returns `false` if the group had no worker.
    pub fn shutdown(&mut self, group: ThreadGroupId) -> Result<bool> {
        let Some(worker) = self.workers.remove(&group) else {
            return Ok(false);
        };

        let Worker {
            thread,
            sender,
            handle,
        } = worker;
        drop(sender);

        if handle.join().is_err() {
            log::error!("Worker {} for {} panicked", thread, group);
            return Err(RelayError::WorkerDisconnected(group));
        }
        log::info!("Joined worker {} for {}", thread, group);
        Ok(true)
    }

    /// Stop and join every worker, returning how many were joined cleanly
    pub fn shutdown_all(&mut self) -> usize {
        let mut groups: Vec<_> = self.workers.keys().copied().collect();
        groups.sort();
        groups
            .into_iter()
            .filter(|&group| matches!(self.shutdown(group), Ok(true)))
            .count()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut groups: Vec<_> = self.workers.keys().copied().collect();
        groups.sort();
        f.debug_struct("Dispatcher")
            .field("prefix", &self.prefix)
            .field("groups", &groups)
            .finish()
    }
}

fn worker_loop(mut state: WorkerState, receiver: Receiver<Task>) {
    log::debug!("Worker {} for {} running", state.thread, state.group);

    while let Ok(task) = receiver.recv() {
        task(&mut state);
    }

    if !state.isolates.is_empty() {
        log::warn!(
            "Worker {} for {} stopping with {} isolates still attached",
            state.thread,
            state.group,
            state.isolates.len()
        );
    }
    log::debug!("Worker {} for {} stopped", state.thread, state.group);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_runs_on_named_worker() {
        let mut dispatcher = Dispatcher::new("test-worker");
        let group = ThreadGroupId::new(3);
        let (thread, spawned) = dispatcher.ensure_worker(group).unwrap();
        assert!(spawned);
        assert_ne!(thread, ThreadKey::HOST);

        let (seen_thread, name) = dispatcher
            .call(group, |state| {
                (
                    state.thread(),
                    std::thread::current().name().map(str::to_string),
                )
            })
            .unwrap();
        assert_eq!(seen_thread, thread);
        assert_eq!(name.as_deref(), Some("test-worker-3"));
    }

    #[test]
    fn test_ensure_worker_reuses_thread() {
        let mut dispatcher = Dispatcher::new("test-worker");
        let group = ThreadGroupId::new(1);
        let (first, _) = dispatcher.ensure_worker(group).unwrap();
        let (second, spawned) = dispatcher.ensure_worker(group).unwrap();
        assert_eq!(first, second);
        assert!(!spawned);

        let (other, _) = dispatcher.ensure_worker(ThreadGroupId::new(2)).unwrap();
        assert_ne!(other, first);
        assert_eq!(dispatcher.worker_count(), 2);
    }

    #[test]
    fn test_tasks_run_in_order() {
        let mut dispatcher = Dispatcher::new("test-worker");
        let group = ThreadGroupId::new(1);
        dispatcher.ensure_worker(group).unwrap();

        let (tx, rx) = channel::unbounded();
        for i in 0..100 {
            let tx = tx.clone();
            dispatcher
                .post(group, move |_| {
                    tx.send(i).unwrap();
                })
                .unwrap();
        }
        dispatcher.shutdown(group).unwrap();
        drop(tx);

        assert_eq!(rx.iter().collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_unknown_group() {
        let dispatcher = Dispatcher::new("test-worker");
        let err = dispatcher.call(ThreadGroupId::new(9), |_| ()).unwrap_err();
        assert!(matches!(err, RelayError::UnknownGroup(_)));
    }

    #[test]
    fn test_panicking_task_disconnects() {
        let mut dispatcher = Dispatcher::new("test-worker");
        let group = ThreadGroupId::new(1);
        dispatcher.ensure_worker(group).unwrap();

        let err = dispatcher
            .call(group, |_| -> () { panic!("task failed") })
            .unwrap_err();
        assert!(matches!(err, RelayError::WorkerDisconnected(_)));
        assert!(dispatcher.shutdown(group).is_err());
    }
}
