//! Isolate Module - Script Realms and Their Identifiers
//!
//! An isolate is one script realm. Its [`ExecutionContext`] is the only
//! writer of its command pipeline.

pub mod context;

pub use context::{BindingKind, BindingObject, BuiltinClasses, ExecutionContext};

use std::fmt;

use serde::Serialize;

use crate::pipeline::CommandPipeline;
use crate::stats::PipelineStats;

/// Host-assigned isolate identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IsolateId(u64);

impl IsolateId {
    pub const fn new(raw: u64) -> Self {
        IsolateId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate#{}", self.0)
    }
}

/// Identifier of the worker thread-group a dedicated isolate runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ThreadGroupId(u32);

impl ThreadGroupId {
    /// Group of the non-dedicated isolates running on the host thread
    pub const HOST: ThreadGroupId = ThreadGroupId(0);

    pub const fn new(raw: u32) -> Self {
        ThreadGroupId(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// One live isolate, as held by the thread that runs it
#[derive(Debug)]
pub struct Isolate {
    id: IsolateId,
    group: ThreadGroupId,
    context: ExecutionContext,
}

impl Isolate {
    pub fn new(id: IsolateId, group: ThreadGroupId, context: ExecutionContext) -> Self {
        Self { id, group, context }
    }

    pub fn id(&self) -> IsolateId {
        self.id
    }

    pub fn group(&self) -> ThreadGroupId {
        self.group
    }

    pub fn is_dedicated(&self) -> bool {
        self.context.pipeline().is_dedicated()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub fn pipeline(&self) -> &CommandPipeline {
        self.context.pipeline()
    }

    pub fn stats(&self) -> PipelineStats {
        self.context.pipeline().stats()
    }

    /// Stop recording and push anything pending to the consumer
    ///
    /// First half of removal; the caller then detaches the isolate from its
    /// group and runtime.
    pub fn shutdown(&mut self) -> PipelineStats {
        self.context.invalidate();
        self.context.flush();
        self.stats()
    }
}
