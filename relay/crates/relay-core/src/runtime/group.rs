//! IsolateGroup - isolates sharing one worker thread.

use indexmap::IndexSet;

use super::ThreadKey;
use crate::isolate::{IsolateId, ThreadGroupId};

/// Isolates pinned to one worker thread
#[derive(Debug, Clone)]
pub struct IsolateGroup {
    id: ThreadGroupId,
    worker: ThreadKey,
    isolates: IndexSet<IsolateId>,
}

impl IsolateGroup {
    pub fn new(id: ThreadGroupId, worker: ThreadKey) -> Self {
        Self {
            id,
            worker,
            isolates: IndexSet::new(),
        }
    }

    pub fn id(&self) -> ThreadGroupId {
        self.id
    }

    /// Thread every member must run on
    pub fn worker(&self) -> ThreadKey {
        self.worker
    }

    /// Add a member; `false` if already present
    pub fn add_isolate(&mut self, isolate: IsolateId) -> bool {
        self.isolates.insert(isolate)
    }

    /// Remove a member; `false` if it was not present
    pub fn remove_isolate(&mut self, isolate: IsolateId) -> bool {
        self.isolates.shift_remove(&isolate)
    }

    pub fn contains(&self, isolate: IsolateId) -> bool {
        self.isolates.contains(&isolate)
    }

    /// No members left: the group's thread can be torn down
    pub fn is_empty(&self) -> bool {
        self.isolates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.isolates.len()
    }

    /// Members in join order
    pub fn isolates(&self) -> impl Iterator<Item = IsolateId> + '_ {
        self.isolates.iter().copied()
    }
}
