//! RuntimeRegistry - thread identity to runtime.
//!
//! Owned by the supervisor and shared with its workers behind a mutex. All
//! lifecycle transitions go through [`attach`](RuntimeRegistry::attach) and
//! [`detach`](RuntimeRegistry::detach), which the worker thread of the
//! group calls for itself.

use relay_util::FxHashMap;
use serde::Serialize;

use super::{IsolateGroup, RuntimeContext, RuntimeId, TeardownReport, ThreadKey};
use crate::error::{RelayError, Result};
use crate::isolate::{BuiltinClasses, IsolateId, ThreadGroupId};

/// Result of attaching an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub runtime: RuntimeId,
    pub classes: BuiltinClasses,
    /// The thread went Uninitialized -> RuntimeActive
    pub runtime_created: bool,
    /// First isolate of its group
    pub group_created: bool,
}

/// Result of detaching an isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetachOutcome {
    /// The isolate was not a member; nothing changed
    NotFound,
    /// Removed; siblings keep the group alive
    IsolateRemoved,
    /// Removed the group's last isolate; the runtime serves other groups
    GroupDisposed,
    /// Removed the thread's last isolate; the runtime is gone
    RuntimeReleased(TeardownReport),
}

impl DetachOutcome {
    /// Whether the group's worker thread can be shut down
    pub fn group_gone(&self) -> bool {
        matches!(
            self,
            DetachOutcome::GroupDisposed | DetachOutcome::RuntimeReleased(_)
        )
    }
}

/// Per-thread runtimes and the thread each group is pinned to
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    runtimes: FxHashMap<ThreadKey, RuntimeContext>,
    group_threads: FxHashMap<ThreadGroupId, ThreadKey>,
    next_runtime: u64,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `isolate` to `group`, bringing up the thread's runtime if needed
    ///
    /// `thread` is the caller's own identity. A group stays pinned to the
    /// thread that created it; attaching from any other thread is a
    /// programming error.
    pub fn attach(
        &mut self,
        thread: ThreadKey,
        group: ThreadGroupId,
        isolate: IsolateId,
    ) -> Result<Attachment> {
        self.check_affinity(thread, group)?;

        if self
            .runtimes
            .get(&thread)
            .and_then(|runtime| runtime.group(group))
            .is_some_and(|g| g.contains(isolate))
        {
            return Err(RelayError::invalid_state(
                format!("{} not yet in {}", isolate, group),
                "already attached",
            ));
        }

        let runtime_created = !self.runtimes.contains_key(&thread);
        if runtime_created {
            self.next_runtime += 1;
            let mut runtime = RuntimeContext::new(RuntimeId::new(self.next_runtime), thread)?;
            runtime.install_builtin_names();
            log::info!("Runtime {} active on {}", runtime.id(), thread);
            self.runtimes.insert(thread, runtime);
        }

        let runtime = self
            .runtimes
            .get_mut(&thread)
            .ok_or_else(|| RelayError::Internal(format!("runtime for {} vanished", thread)))?;

        let group_created = runtime.group(group).is_none();
        runtime.group_or_insert(group).add_isolate(isolate);
        runtime.retain();
        self.group_threads.insert(group, thread);

        log::debug!(
            "{} attached to {} on {} ({} isolates on runtime)",
            isolate,
            group,
            thread,
            runtime.ref_count()
        );

        Ok(Attachment {
            runtime: runtime.id(),
            classes: runtime.builtin_classes()?,
            runtime_created,
            group_created,
        })
    }

    /// Remove `isolate` from `group`, tearing down the group and the
    /// runtime when they become empty
    ///
    /// Removing an isolate that is not a member is a no-op.
    pub fn detach(
        &mut self,
        thread: ThreadKey,
        group: ThreadGroupId,
        isolate: IsolateId,
    ) -> Result<DetachOutcome> {
        if !self.group_threads.contains_key(&group) {
            return Ok(DetachOutcome::NotFound);
        }
        self.check_affinity(thread, group)?;

        let Some(runtime) = self.runtimes.get_mut(&thread) else {
            return Ok(DetachOutcome::NotFound);
        };
        let Some(members) = runtime.group_mut(group) else {
            return Ok(DetachOutcome::NotFound);
        };
        if !members.remove_isolate(isolate) {
            return Ok(DetachOutcome::NotFound);
        }
        let group_empty = members.is_empty();

        let wires = runtime.delete_wires_of(isolate);
        if wires > 0 {
            log::debug!("{}: released {} wires", isolate, wires);
        }

        let remaining = runtime.release();
        if group_empty {
            runtime.remove_group(group);
            self.group_threads.remove(&group);
            log::debug!("{} disposed on {}", group, thread);
        }

        if remaining == 0 {
            return match self.runtimes.remove(&thread) {
                Some(runtime) => {
                    let report = runtime.teardown();
                    log::info!("Runtime {} on {} released", report.runtime, thread);
                    Ok(DetachOutcome::RuntimeReleased(report))
                },
                None => Err(RelayError::Internal(format!(
                    "runtime for {} vanished",
                    thread
                ))),
            };
        }

        if group_empty {
            Ok(DetachOutcome::GroupDisposed)
        } else {
            Ok(DetachOutcome::IsolateRemoved)
        }
    }

    fn check_affinity(&self, thread: ThreadKey, group: ThreadGroupId) -> Result<()> {
        let Some(&expected) = self.group_threads.get(&group) else {
            return Ok(());
        };
        debug_assert!(
            expected == thread,
            "thread-affinity violation: {} belongs to {}, called from {}",
            group,
            expected,
            thread
        );
        if expected != thread {
            log::warn!(
                "thread-affinity violation: {} belongs to {}, called from {}",
                group,
                expected,
                thread
            );
            return Err(RelayError::ThreadAffinity {
                group,
                expected,
                actual: thread,
            });
        }
        Ok(())
    }

    /// Runtime active on `thread`
    pub fn runtime(&self, thread: ThreadKey) -> Option<&RuntimeContext> {
        self.runtimes.get(&thread)
    }

    pub fn runtime_mut(&mut self, thread: ThreadKey) -> Option<&mut RuntimeContext> {
        self.runtimes.get_mut(&thread)
    }

    /// Whether `thread` is in the RuntimeActive state
    pub fn is_active(&self, thread: ThreadKey) -> bool {
        self.runtimes.contains_key(&thread)
    }

    /// Thread `group` is pinned to
    pub fn worker_of(&self, group: ThreadGroupId) -> Option<ThreadKey> {
        self.group_threads.get(&group).copied()
    }

    pub fn group(&self, group: ThreadGroupId) -> Option<&IsolateGroup> {
        let thread = self.worker_of(group)?;
        self.runtimes.get(&thread)?.group(group)
    }

    pub fn runtime_count(&self) -> usize {
        self.runtimes.len()
    }

    pub fn group_count(&self) -> usize {
        self.group_threads.len()
    }

    /// Tear down every runtime regardless of attached isolates
    pub fn teardown_all(&mut self) -> Vec<TeardownReport> {
        self.group_threads.clear();
        let mut reports: Vec<_> = self
            .runtimes
            .drain()
            .map(|(_, runtime)| runtime.teardown())
            .collect();
        reports.sort_by_key(|report| report.thread);
        reports
    }
}
