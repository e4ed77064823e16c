//! Execution context - the pipeline's only writer.
//!
//! Stands in for the script-engine binding layer. Every state change on a
//! binding object is reported to the host as one command record; the
//! objects themselves live in a generation-checked arena, so the handles
//! written into records never dangle on the consumer side.

use relay_util::{FxHashMap, HandleArena, NativeHandle, NativeString};

use crate::command::IsolateCommand;
use crate::error::Result;
use crate::isolate::IsolateId;
use crate::pipeline::CommandPipeline;
use crate::runtime::ClassId;

/// What a binding object stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Global,
    EventTarget,
}

/// Class ids the runtime assigned to the built-in binding classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinClasses {
    pub global: ClassId,
    pub event_target: ClassId,
}

/// Native object backing a script-visible binding
#[derive(Debug)]
pub struct BindingObject {
    kind: BindingKind,
    class_id: ClassId,
    listeners: FxHashMap<String, usize>,
}

impl BindingObject {
    fn new(kind: BindingKind, class_id: ClassId) -> Self {
        Self {
            kind,
            class_id,
            listeners: FxHashMap::default(),
        }
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Listeners registered for `event_type`
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).copied().unwrap_or(0)
    }
}

/// One realm's object graph plus its command pipeline
#[derive(Debug)]
pub struct ExecutionContext {
    isolate: IsolateId,
    classes: BuiltinClasses,
    objects: HandleArena<BindingObject>,
    global: Option<NativeHandle>,
    pipeline: CommandPipeline,
}

impl ExecutionContext {
    pub fn new(isolate: IsolateId, classes: BuiltinClasses, pipeline: CommandPipeline) -> Self {
        Self {
            isolate,
            classes,
            objects: HandleArena::new(),
            global: None,
            pipeline,
        }
    }

    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    pub fn pipeline(&self) -> &CommandPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut CommandPipeline {
        &mut self.pipeline
    }

    pub fn is_valid(&self) -> bool {
        self.pipeline.is_valid()
    }

    /// Mark the context invalid; later commands are dropped
    pub fn invalidate(&mut self) {
        self.pipeline.invalidate();
    }

    /// Global object, once created
    pub fn global(&self) -> Option<NativeHandle> {
        self.global
    }

    /// Live binding objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn object(&self, handle: NativeHandle) -> Option<&BindingObject> {
        self.objects.get(handle)
    }

    /// Create the realm's global object
    ///
    /// A second call returns the existing global without recording.
    pub fn create_global(&mut self) -> Result<NativeHandle> {
        if let Some(global) = self.global {
            return Ok(global);
        }
        let handle = self
            .objects
            .try_insert(BindingObject::new(BindingKind::Global, self.classes.global))?;
        self.global = Some(handle);
        self.pipeline
            .record(IsolateCommand::CreateGlobal, None, Some(handle), None);
        Ok(handle)
    }

    /// Create a standalone event target
    pub fn create_event_target(&mut self) -> Result<NativeHandle> {
        let handle = self.objects.try_insert(BindingObject::new(
            BindingKind::EventTarget,
            self.classes.event_target,
        ))?;
        self.pipeline
            .record(IsolateCommand::CreateEventTarget, None, Some(handle), None);
        Ok(handle)
    }

    /// Attach a listener for `event_type` on `target`
    ///
    /// The host is told once per event type; further listeners for the same
    /// type only bump the local count.
    pub fn add_event_listener(&mut self, target: NativeHandle, event_type: &str) -> Result<()> {
        let object = self.objects.get_mut(target).ok_or_else(|| stale(target))?;
        let count = object.listeners.entry(event_type.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Ok(());
        }

        let payload = NativeString::new(event_type)?;
        self.pipeline
            .record(IsolateCommand::AddEvent, Some(payload), Some(target), None);
        Ok(())
    }

    /// Detach one listener for `event_type` from `target`
    ///
    /// Returns `false` if no listener was registered. The host is told when
    /// the last listener of a type goes away.
    pub fn remove_event_listener(&mut self, target: NativeHandle, event_type: &str) -> Result<bool> {
        let object = self.objects.get_mut(target).ok_or_else(|| stale(target))?;
        let remaining = match object.listeners.get_mut(event_type) {
            Some(count) => {
                *count -= 1;
                *count
            },
            None => return Ok(false),
        };
        if remaining > 0 {
            return Ok(true);
        }
        object.listeners.remove(event_type);

        let payload = NativeString::new(event_type)?;
        self.pipeline
            .record(IsolateCommand::RemoveEvent, Some(payload), Some(target), None);
        Ok(true)
    }

    /// Release a binding object
    ///
    /// The record carries the handle as it was before release; the arena
    /// bumps the slot's generation, so the handle is stale from here on.
    pub fn dispose_binding_object(&mut self, handle: NativeHandle) -> Result<()> {
        self.objects.remove(handle).ok_or_else(|| stale(handle))?;
        if self.global == Some(handle) {
            self.global = None;
        }
        self.pipeline
            .record(IsolateCommand::DisposeBindingObject, None, Some(handle), None);
        Ok(())
    }

    /// Open a recording section
    pub fn start_recording(&mut self) {
        self.pipeline
            .record(IsolateCommand::StartRecording, None, None, None);
    }

    /// Close a recording section; everything recorded so far becomes
    /// visible to the host
    pub fn finish_recording(&mut self) {
        self.pipeline
            .record(IsolateCommand::FinishRecording, None, None, None);
    }

    /// End of a script task
    pub fn flush(&mut self) {
        self.pipeline.flush();
    }
}

fn stale(handle: NativeHandle) -> relay_util::HandleError {
    relay_util::HandleError::Stale {
        index: handle.index(),
        generation: handle.generation(),
    }
}
