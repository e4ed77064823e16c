//! IsolateHost - the supervisor.
//!
//! Creates and removes isolates, owns the worker threads and the
//! [`RuntimeRegistry`], and is the consumer of every pipeline:
//!
//! ```text
//!                         IsolateHost (host thread)
//!       ┌──────────────────────┬───────────────────────────────┐
//!       │ Dispatcher           │ readers: ActiveReader/isolate │
//!       │  relay-worker-1 ─────┼──► pipeline.active ◄──────────┤ read / clear
//!       │  relay-worker-2 ─────┼──► pipeline.active ◄──────────┤
//!       │ local (non-dedicated)┼──► pipeline.active ◄──────────┤
//!       │ registry (mutex)     │ batch updates (channel) ◄─────┤ poll
//!       └──────────────────────┴───────────────────────────────┘
//! ```
//!
//! Dedicated isolates live on their group's worker and every operation on
//! them is shipped there; non-dedicated isolates live on the host thread.
//! Removal runs on the isolate's own thread: mark invalid, drain, detach,
//! and, if that emptied the group, join the worker.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use relay_util::{FxHashMap, NativeHandle};
use serde::Serialize;

use crate::config::{IsolateConfig, RelayConfig};
use crate::error::{RelayError, Result};
use crate::isolate::{ExecutionContext, Isolate, IsolateId, ThreadGroupId};
use crate::logging::{EventLog, EventLogConfig, LogLevel, RelayEvent};
use crate::pipeline::{ActiveReader, BatchNotifier, CommandPipeline, PipelineOptions};
use crate::runtime::{
    Attachment, DetachOutcome, Dispatcher, RuntimeContext, RuntimeRegistry, ThreadKey,
    WorkerState,
};
use crate::stats::PipelineStats;

/// A pipeline asked for a consumption pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchUpdate {
    pub isolate: IsolateId,
    pub dedicated: bool,
}

/// Forwards pipeline requests to the host's update channel
#[derive(Debug)]
struct HostNotifier {
    sender: Sender<BatchUpdate>,
}

impl BatchNotifier for HostNotifier {
    fn request_batch_update(&self, isolate: IsolateId, dedicated: bool) {
        // The host may already be gone during teardown.
        let _ = self.sender.send(BatchUpdate { isolate, dedicated });
    }
}

/// What removing an isolate produced
#[derive(Debug)]
pub struct Removal {
    pub outcome: DetachOutcome,
    /// Final producer counters
    pub stats: PipelineStats,
    /// Consumer handle; may still hold the isolate's last batch
    pub reader: ActiveReader,
}

#[derive(Debug, Clone, Copy)]
struct IsolateEntry {
    group: ThreadGroupId,
    dedicated: bool,
}

struct Installed {
    attachment: Attachment,
    thread: ThreadKey,
    reader: ActiveReader,
}

/// Supervisor of isolates, worker threads and runtimes
#[derive(Debug)]
pub struct IsolateHost {
    config: RelayConfig,
    registry: Arc<Mutex<RuntimeRegistry>>,
    dispatcher: Dispatcher,
    local: WorkerState,
    isolates: FxHashMap<IsolateId, IsolateEntry>,
    readers: FxHashMap<IsolateId, ActiveReader>,
    notifier: Arc<HostNotifier>,
    updates: Receiver<BatchUpdate>,
    events: EventLog,
    next_isolate: u64,
    disposed: bool,
}

impl IsolateHost {
    /// Create a host after validating `config`
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;

        let (sender, updates) = channel::unbounded();
        let events = EventLog::new(EventLogConfig {
            level: LogLevel::Debug,
            capacity: config.event_log_capacity,
            echo: config.verbose,
        });

        Ok(Self {
            dispatcher: Dispatcher::new(config.worker_thread_prefix.clone()),
            config,
            registry: Arc::new(Mutex::new(RuntimeRegistry::new())),
            local: WorkerState::new(ThreadKey::HOST, ThreadGroupId::HOST),
            isolates: FxHashMap::default(),
            readers: FxHashMap::default(),
            notifier: Arc::new(HostNotifier { sender }),
            updates,
            events,
            next_isolate: 0,
            disposed: false,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Reserve a fresh isolate id
    pub fn next_isolate_id(&mut self) -> IsolateId {
        self.next_isolate += 1;
        IsolateId::new(self.next_isolate)
    }

    // ------------------------------------------------------------------
    // Isolate lifecycle
    // ------------------------------------------------------------------

    /// Create an isolate
    ///
    /// Dedicated isolates are built on their group's worker, which is
    /// spawned on first use; the others live on the host thread.
    pub fn add_isolate(&mut self, config: IsolateConfig) -> Result<IsolateId> {
        let id = self.next_isolate_id();
        self.add_isolate_with_id(id, config)?;
        Ok(id)
    }

    /// Create an isolate under an id obtained from
    /// [`next_isolate_id`](Self::next_isolate_id)
    pub fn add_isolate_with_id(&mut self, id: IsolateId, config: IsolateConfig) -> Result<()> {
        config.validate()?;
        if self.disposed {
            return Err(RelayError::invalid_state("live host", "disposed"));
        }
        if self.isolates.contains_key(&id) {
            return Err(RelayError::invalid_state("unused isolate id", "live isolate"));
        }

        let options = self.config.pipeline_options(&config);
        let notifier: Arc<dyn BatchNotifier> = self.notifier.clone();
        let group = if config.dedicated {
            config.group
        } else {
            ThreadGroupId::HOST
        };

        let installed = if config.dedicated {
            let (thread, spawned) = self.dispatcher.ensure_worker(group)?;
            if spawned {
                self.events.log(RelayEvent::WorkerSpawned { group, thread });
            }

            let registry = Arc::clone(&self.registry);
            let installed = self
                .dispatcher
                .call(group, move |state| {
                    install_isolate(state, &registry, id, options, notifier)
                })
                .and_then(|installed| installed);

            if installed.is_err() && spawned {
                self.shutdown_worker(group);
            }
            installed?
        } else {
            install_isolate(&mut self.local, &self.registry, id, options, notifier)?
        };

        if installed.attachment.runtime_created {
            self.events.log(RelayEvent::RuntimeCreated {
                thread: installed.thread,
                runtime: installed.attachment.runtime,
            });
        }
        self.events.log(RelayEvent::IsolateAdded {
            isolate: id,
            group,
            dedicated: config.dedicated,
        });

        self.readers.insert(id, installed.reader);
        self.isolates.insert(
            id,
            IsolateEntry {
                group,
                dedicated: config.dedicated,
            },
        );
        Ok(())
    }

    /// Run `f` on the isolate's own thread
    pub fn run_in_isolate<F, R>(&mut self, id: IsolateId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Isolate) -> R + Send + 'static,
        R: Send + 'static,
    {
        let entry = self.entry(id)?;
        if entry.dedicated {
            self.dispatcher
                .call(entry.group, move |state| state.isolate_mut(id).map(f))?
                .ok_or(RelayError::UnknownIsolate(id))
        } else {
            self.local
                .isolate_mut(id)
                .map(f)
                .ok_or(RelayError::UnknownIsolate(id))
        }
    }

    /// Queue `f` on the isolate's thread without waiting
    ///
    /// Isolates living on the host thread run `f` before this returns.
    pub fn post_to_isolate<F>(&mut self, id: IsolateId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Isolate) + Send + 'static,
    {
        let entry = self.entry(id)?;
        if !entry.dedicated {
            let isolate = self
                .local
                .isolate_mut(id)
                .ok_or(RelayError::UnknownIsolate(id))?;
            f(isolate);
            return Ok(());
        }

        self.dispatcher.post(entry.group, move |state| {
            match state.isolate_mut(id) {
                Some(isolate) => f(isolate),
                None => log::warn!("Task for {} arrived after its removal", id),
            }
        })
    }

    /// Run `f` against the runtime serving the isolate, on its thread
    pub fn run_in_runtime<F, R>(&mut self, id: IsolateId, f: F) -> Result<R>
    where
        F: FnOnce(&mut RuntimeContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let entry = self.entry(id)?;
        let registry = Arc::clone(&self.registry);
        let run = move |state: &mut WorkerState| {
            let mut registry = registry.lock();
            registry.runtime_mut(state.thread()).map(f)
        };

        let result = if entry.dedicated {
            self.dispatcher.call(entry.group, run)?
        } else {
            run(&mut self.local)
        };
        result.ok_or_else(|| RelayError::invalid_state("active runtime", "uninitialized"))
    }

    /// Push the isolate's pending commands to its active buffer
    pub fn flush(&mut self, id: IsolateId) -> Result<()> {
        self.run_in_isolate(id, |isolate| isolate.context_mut().flush())
    }

    /// Producer counters of the isolate
    pub fn stats(&mut self, id: IsolateId) -> Result<PipelineStats> {
        self.run_in_isolate(id, |isolate| isolate.stats())
    }

    /// Track a cross-boundary handle owned by the isolate
    pub fn watch_wire(&mut self, id: IsolateId) -> Result<NativeHandle> {
        self.run_in_runtime(id, move |runtime| runtime.watch_wire(id))
    }

    pub fn is_wire_alive(&mut self, id: IsolateId, wire: NativeHandle) -> Result<bool> {
        self.run_in_runtime(id, move |runtime| runtime.is_wire_alive(wire))
    }

    pub fn delete_wire(&mut self, id: IsolateId, wire: NativeHandle) -> Result<bool> {
        self.run_in_runtime(id, move |runtime| runtime.delete_wire(wire))
    }

    /// Remove an isolate
    ///
    /// Sequenced on the isolate's thread as: mark the context invalid,
    /// flush what it recorded, detach it from group and runtime. Once the
    /// group is empty its worker is joined.
    pub fn remove_isolate(&mut self, id: IsolateId) -> Result<Removal> {
        let entry = self.entry(id)?;

        let removal = if entry.dedicated {
            let registry = Arc::clone(&self.registry);
            self.dispatcher
                .call(entry.group, move |state| {
                    uninstall_isolate(state, &registry, id)
                })
                .and_then(|removal| removal)
        } else {
            uninstall_isolate(&mut self.local, &self.registry, id)
        };

        self.isolates.remove(&id);
        let reader = self.readers.remove(&id);
        let (outcome, stats) = removal?;
        let reader = reader.ok_or_else(|| {
            RelayError::Internal(format!("reader for {} missing", id))
        })?;

        self.events.log(RelayEvent::IsolateRemoved {
            isolate: id,
            group: entry.group,
            outcome,
            dropped_commands: stats.dropped,
        });
        if outcome.group_gone() {
            self.events.log(RelayEvent::GroupDisposed { group: entry.group });
        }
        if let DetachOutcome::RuntimeReleased(report) = outcome {
            self.events.log(RelayEvent::RuntimeReleased { report });
        }
        if entry.dedicated && outcome.group_gone() {
            self.shutdown_worker(entry.group);
        }

        Ok(Removal {
            outcome,
            stats,
            reader,
        })
    }

    /// Remove every isolate and join every worker
    ///
    /// Payloads of records the consumer never took are released. Keeps going
    /// past failures and returns the first one.
    pub fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let ids = self.isolate_ids();
        let isolates = ids.len();
        let workers = self.dispatcher.worker_count();

        let mut first_error = None;
        let mut payloads_released = 0;
        for id in ids {
            match self.remove_isolate(id) {
                Ok(mut removal) => payloads_released += removal.reader.release_unread(),
                Err(err) => {
                    log::warn!("Removing {} during dispose failed: {}", id, err);
                    first_error.get_or_insert(err);
                },
            }
        }

        let leftovers = self.registry.lock().teardown_all();
        for report in leftovers {
            log::warn!("Runtime {} still active at dispose", report.runtime);
            self.events.log(RelayEvent::RuntimeReleased { report });
        }

        self.dispatcher.shutdown_all();
        self.events
            .log(RelayEvent::HostDisposed {
                isolates,
                workers,
                payloads_released,
            });

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown_worker(&mut self, group: ThreadGroupId) {
        match self.dispatcher.shutdown(group) {
            Ok(true) => self.events.log(RelayEvent::WorkerJoined { group }),
            Ok(false) => {},
            Err(err) => self.events.log(RelayEvent::WorkerFailed {
                group,
                reason: err.to_string(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Consumer handle of the isolate's active buffer
    pub fn reader(&mut self, id: IsolateId) -> Result<&mut ActiveReader> {
        self.readers
            .get_mut(&id)
            .ok_or(RelayError::UnknownIsolate(id))
    }

    /// Drain pending batch-update requests
    pub fn poll_batch_updates(&mut self) -> Vec<BatchUpdate> {
        let updates: Vec<_> = self.updates.try_iter().collect();
        for update in &updates {
            self.events.log(RelayEvent::BatchRequested {
                isolate: update.isolate,
                dedicated: update.dedicated,
            });
        }
        updates
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    pub fn isolate_count(&self) -> usize {
        self.isolates.len()
    }

    /// Live isolate ids in creation order
    pub fn isolate_ids(&self) -> Vec<IsolateId> {
        let mut ids: Vec<_> = self.isolates.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: IsolateId) -> bool {
        self.isolates.contains_key(&id)
    }

    pub fn group_of(&self, id: IsolateId) -> Option<ThreadGroupId> {
        self.isolates.get(&id).map(|entry| entry.group)
    }

    pub fn is_dedicated(&self, id: IsolateId) -> Option<bool> {
        self.isolates.get(&id).map(|entry| entry.dedicated)
    }

    /// Whether `group` currently has a worker thread
    pub fn has_worker(&self, group: ThreadGroupId) -> bool {
        self.dispatcher.has_worker(group)
    }

    pub fn worker_count(&self) -> usize {
        self.dispatcher.worker_count()
    }

    /// Inspect the runtime registry
    pub fn with_registry<R>(&self, f: impl FnOnce(&RuntimeRegistry) -> R) -> R {
        f(&self.registry.lock())
    }

    fn entry(&self, id: IsolateId) -> Result<IsolateEntry> {
        self.isolates
            .get(&id)
            .copied()
            .ok_or(RelayError::UnknownIsolate(id))
    }
}

impl Drop for IsolateHost {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            log::error!("Isolate host dispose failed: {}", err);
        }
    }
}

fn install_isolate(
    state: &mut WorkerState,
    registry: &Mutex<RuntimeRegistry>,
    id: IsolateId,
    options: PipelineOptions,
    notifier: Arc<dyn BatchNotifier>,
) -> Result<Installed> {
    let attachment = registry.lock().attach(state.thread(), state.group(), id)?;
    let (pipeline, reader) = CommandPipeline::new(id, options, Some(notifier));
    let context = ExecutionContext::new(id, attachment.classes, pipeline);
    state.insert_isolate(Isolate::new(id, state.group(), context));

    Ok(Installed {
        attachment,
        thread: state.thread(),
        reader,
    })
}

fn uninstall_isolate(
    state: &mut WorkerState,
    registry: &Mutex<RuntimeRegistry>,
    id: IsolateId,
) -> Result<(DetachOutcome, PipelineStats)> {
    let mut isolate = state
        .remove_isolate(id)
        .ok_or(RelayError::UnknownIsolate(id))?;
    let stats = isolate.shutdown();
    let outcome = registry.lock().detach(state.thread(), state.group(), id)?;
    Ok((outcome, stats))
}
