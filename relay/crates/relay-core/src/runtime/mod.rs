//! Runtime Module - Per-Thread Engine Runtime Lifecycle
//!
//! ============================================================================
//! STATE MACHINE (per worker thread)
//! ============================================================================
//!
//! ```text
//!                first attach               last detach
//!  Uninitialized ────────────► RuntimeActive ──────────► Uninitialized
//!                                 │     ▲                (teardown report)
//!                                 └─────┘
//!                          attach / detach while
//!                          >= 1 isolate remains
//! ```
//!
//! A [`RuntimeContext`] exists per thread that hosts script execution. It
//! owns class id allocation, the interned-name table, built-in object
//! factories, cross-boundary handle tracking and the [`IsolateGroup`]s of
//! that thread. The [`RuntimeRegistry`] maps thread identity to runtime and
//! is owned by the supervisor; nothing here is thread-local or global.

pub mod class_id;
pub mod dispatcher;
pub mod group;
pub mod registry;

pub use class_id::{ClassId, ClassIdAllocator, BUILTIN_CLASS_LIMIT, CUSTOM_CLASS_BLOCK};
pub use dispatcher::{Dispatcher, WorkerState};
pub use group::IsolateGroup;
pub use registry::{Attachment, DetachOutcome, RuntimeRegistry};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use relay_util::{Atom, FxHashMap, HandleArena, NativeHandle, StringTable};
use serde::Serialize;

use crate::error::{RelayError, Result};
use crate::isolate::{BuiltinClasses, IsolateId, ThreadGroupId};

/// Names interned on every runtime activation
pub const BUILTIN_NAMES: &[&str] = &[
    "abort", "blur", "change", "click", "close", "error", "focus", "input", "load", "message",
    "open", "resize", "scroll", "submit",
];

const GLOBAL_CLASS_NAME: &str = "Global";
const EVENT_TARGET_CLASS_NAME: &str = "EventTarget";

/// Identity of a thread that can host a runtime
///
/// Worker threads get keys from the dispatcher; tests can use any integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadKey(u64);

impl ThreadKey {
    /// The supervisor's own thread
    pub const HOST: ThreadKey = ThreadKey(0);

    pub const fn new(raw: u64) -> Self {
        ThreadKey(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Engine runtime identifier, unique per activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RuntimeId(u64);

impl RuntimeId {
    pub const fn new(raw: u64) -> Self {
        RuntimeId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime#{}", self.0)
    }
}

/// What a runtime released on teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub runtime: RuntimeId,
    pub thread: ThreadKey,
    pub strings_released: usize,
    pub factories_released: usize,
    pub wires_released: usize,
    pub groups_released: usize,
}

/// Engine runtime bound to one thread
#[derive(Debug)]
pub struct RuntimeContext {
    id: RuntimeId,
    thread: ThreadKey,
    isolates: AtomicUsize,
    class_ids: ClassIdAllocator,
    strings: StringTable,
    names_installed: bool,
    factories: FxHashMap<Atom, ClassId>,
    wires: HandleArena<IsolateId>,
    groups: FxHashMap<ThreadGroupId, IsolateGroup>,
}

impl RuntimeContext {
    /// Bring up a runtime: reserve the custom class block and register the
    /// built-in factories
    pub fn new(id: RuntimeId, thread: ThreadKey) -> Result<Self> {
        let mut runtime = Self {
            id,
            thread,
            isolates: AtomicUsize::new(0),
            class_ids: ClassIdAllocator::new(),
            strings: StringTable::new(),
            names_installed: false,
            factories: FxHashMap::default(),
            wires: HandleArena::new(),
            groups: FxHashMap::default(),
        };
        runtime.register_factory(GLOBAL_CLASS_NAME)?;
        runtime.register_factory(EVENT_TARGET_CLASS_NAME)?;
        log::debug!("Runtime {} created on {}", id, thread);
        Ok(runtime)
    }

    pub fn id(&self) -> RuntimeId {
        self.id
    }

    pub fn thread(&self) -> ThreadKey {
        self.thread
    }

    // ------------------------------------------------------------------
    // Reference count
    // ------------------------------------------------------------------

    /// Count one more isolate using this runtime
    pub fn retain(&self) -> usize {
        self.isolates.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Count one isolate fewer, returning the remaining count
    pub fn release(&self) -> usize {
        let previous = self.isolates.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "runtime {} released below zero", self.id);
        previous.saturating_sub(1)
    }

    /// Isolates currently using this runtime
    pub fn ref_count(&self) -> usize {
        self.isolates.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Names and classes
    // ------------------------------------------------------------------

    /// Intern the built-in name table once per activation
    ///
    /// Returns `false` if the names were already installed.
    pub fn install_builtin_names(&mut self) -> bool {
        if self.names_installed {
            return false;
        }
        for name in BUILTIN_NAMES {
            self.strings.intern(name);
        }
        self.names_installed = true;
        true
    }

    pub fn names_installed(&self) -> bool {
        self.names_installed
    }

    pub fn intern(&mut self, name: &str) -> Atom {
        self.strings.intern(name)
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Allocate a custom class id from the reserved block
    pub fn allocate_class_id(&mut self) -> Result<ClassId> {
        self.class_ids.allocate().ok_or_else(|| {
            RelayError::invalid_state(
                format!("free class id in {}", self.id),
                "custom class block exhausted",
            )
        })
    }

    /// Register a built-in object factory under `name`
    ///
    /// Registering an existing name returns its class id.
    pub fn register_factory(&mut self, name: &str) -> Result<ClassId> {
        let atom = self.strings.intern(name);
        if let Some(&class_id) = self.factories.get(&atom) {
            return Ok(class_id);
        }
        let class_id = self.allocate_class_id()?;
        self.factories.insert(atom, class_id);
        Ok(class_id)
    }

    /// Class id of the factory registered under `name`
    pub fn factory(&self, name: &str) -> Option<ClassId> {
        let atom = self.strings.lookup(name)?;
        self.factories.get(&atom).copied()
    }

    /// Class ids for the binding classes every context needs
    pub fn builtin_classes(&self) -> Result<BuiltinClasses> {
        let missing = |name: &str| {
            RelayError::invalid_state(format!("{} factory registered", name), "missing")
        };
        Ok(BuiltinClasses {
            global: self
                .factory(GLOBAL_CLASS_NAME)
                .ok_or_else(|| missing(GLOBAL_CLASS_NAME))?,
            event_target: self
                .factory(EVENT_TARGET_CLASS_NAME)
                .ok_or_else(|| missing(EVENT_TARGET_CLASS_NAME))?,
        })
    }

    // ------------------------------------------------------------------
    // Cross-boundary handles
    // ------------------------------------------------------------------

    /// Track a handle the host holds on behalf of `owner`
    pub fn watch_wire(&mut self, owner: IsolateId) -> NativeHandle {
        self.wires.insert(owner)
    }

    pub fn is_wire_alive(&self, wire: NativeHandle) -> bool {
        self.wires.contains(wire)
    }

    /// Stop tracking `wire`; `false` if it was already gone
    pub fn delete_wire(&mut self, wire: NativeHandle) -> bool {
        self.wires.remove(wire).is_some()
    }

    /// Drop every wire owned by `owner`, returning how many
    pub fn delete_wires_of(&mut self, owner: IsolateId) -> usize {
        let doomed: Vec<NativeHandle> = self
            .wires
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(handle, _)| handle)
            .collect();
        for &wire in &doomed {
            self.wires.remove(wire);
        }
        doomed.len()
    }

    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub fn group(&self, id: ThreadGroupId) -> Option<&IsolateGroup> {
        self.groups.get(&id)
    }

    pub(crate) fn group_mut(&mut self, id: ThreadGroupId) -> Option<&mut IsolateGroup> {
        self.groups.get_mut(&id)
    }

    /// Group `id`, created on first use
    pub(crate) fn group_or_insert(&mut self, id: ThreadGroupId) -> &mut IsolateGroup {
        let thread = self.thread;
        self.groups
            .entry(id)
            .or_insert_with(|| IsolateGroup::new(id, thread))
    }

    pub(crate) fn remove_group(&mut self, id: ThreadGroupId) -> Option<IsolateGroup> {
        self.groups.remove(&id)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> impl Iterator<Item = &IsolateGroup> {
        self.groups.values()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release everything this runtime owns
    pub fn teardown(mut self) -> TeardownReport {
        if self.ref_count() > 0 {
            log::warn!(
                "Runtime {} torn down with {} isolates still attached",
                self.id,
                self.ref_count()
            );
        }

        let report = TeardownReport {
            runtime: self.id,
            thread: self.thread,
            strings_released: self.strings.clear(),
            factories_released: self.factories.len(),
            wires_released: self.wires.clear(),
            groups_released: self.groups.len(),
        };
        self.factories.clear();
        self.groups.clear();
        self.names_installed = false;

        log::debug!(
            "Runtime {} on {} released ({} names, {} factories, {} wires)",
            report.runtime,
            report.thread,
            report.strings_released,
            report.factories_released,
            report.wires_released
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> RuntimeContext {
        RuntimeContext::new(RuntimeId::new(1), ThreadKey::new(3)).unwrap()
    }

    #[test]
    fn test_builtin_factories_use_custom_block() {
        let runtime = runtime();
        let classes = runtime.builtin_classes().unwrap();
        assert!(!classes.global.is_builtin());
        assert!(!classes.event_target.is_builtin());
        assert_ne!(classes.global, classes.event_target);
    }

    #[test]
    fn test_register_factory_is_idempotent() {
        let mut runtime = runtime();
        let first = runtime.register_factory("Canvas").unwrap();
        assert_eq!(runtime.register_factory("Canvas").unwrap(), first);
        assert_eq!(runtime.factory("Canvas"), Some(first));
        assert_eq!(runtime.factory("Missing"), None);
    }

    #[test]
    fn test_names_installed_once() {
        let mut runtime = runtime();
        assert!(runtime.install_builtin_names());
        assert!(!runtime.install_builtin_names());
        assert!(runtime.strings().lookup("click").is_some());
    }

    #[test]
    fn test_ref_count() {
        let runtime = runtime();
        assert_eq!(runtime.retain(), 1);
        assert_eq!(runtime.retain(), 2);
        assert_eq!(runtime.release(), 1);
        assert_eq!(runtime.release(), 0);
    }

    #[test]
    fn test_wires() {
        let mut runtime = runtime();
        let a = runtime.watch_wire(IsolateId::new(1));
        let b = runtime.watch_wire(IsolateId::new(2));
        let c = runtime.watch_wire(IsolateId::new(1));
        assert!(runtime.is_wire_alive(a));

        assert!(runtime.delete_wire(a));
        assert!(!runtime.delete_wire(a));
        assert!(!runtime.is_wire_alive(a));

        assert_eq!(runtime.delete_wires_of(IsolateId::new(1)), 1);
        assert!(!runtime.is_wire_alive(c));
        assert!(runtime.is_wire_alive(b));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut runtime = runtime();
        runtime.install_builtin_names();
        runtime.watch_wire(IsolateId::new(1));
        runtime.group_or_insert(ThreadGroupId::new(4));

        let report = runtime.teardown();
        assert_eq!(report.factories_released, 2);
        assert_eq!(report.wires_released, 1);
        assert_eq!(report.groups_released, 1);
        assert_eq!(report.strings_released, BUILTIN_NAMES.len() + 2);
    }
}
