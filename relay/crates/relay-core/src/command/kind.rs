//! Command codes and kind categories.
//!
//! Every record carries an [`IsolateCommand`] code. The consumer does not
//! want to scan a whole buffer to learn whether, say, any event wiring
//! happened, so each code also maps to a [`CommandKind`] category bit and
//! buffers keep the OR of the categories they hold.

use bitflags::bitflags;

/// Operation reported by an execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum IsolateCommand {
    /// Global object created for a new realm
    CreateGlobal = 0,
    /// Standalone event target created
    CreateEventTarget = 1,
    /// Native binding object released by the script side
    DisposeBindingObject = 2,
    /// Event listener attached
    AddEvent = 3,
    /// Event listener detached
    RemoveEvent = 4,
    /// Start of a recording section
    StartRecording = 5,
    /// End of a recording section; forces promotion to the consumer
    FinishRecording = 6,
}

impl IsolateCommand {
    /// All commands in code order
    pub const ALL: [IsolateCommand; 7] = [
        IsolateCommand::CreateGlobal,
        IsolateCommand::CreateEventTarget,
        IsolateCommand::DisposeBindingObject,
        IsolateCommand::AddEvent,
        IsolateCommand::RemoveEvent,
        IsolateCommand::StartRecording,
        IsolateCommand::FinishRecording,
    ];

    /// Wire code stored in the record
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a wire code
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.get(usize::try_from(code).ok()?).copied()
    }

    /// Category bit for this command
    pub fn kind(self) -> CommandKind {
        match self {
            IsolateCommand::AddEvent | IsolateCommand::RemoveEvent => CommandKind::EVENT,
            IsolateCommand::CreateGlobal | IsolateCommand::CreateEventTarget => {
                CommandKind::LIFECYCLE
            },
            IsolateCommand::DisposeBindingObject => CommandKind::DISPOSE,
            IsolateCommand::StartRecording | IsolateCommand::FinishRecording => {
                CommandKind::RECORDING
            },
        }
    }

    /// Whether recording this command forces a promotion
    #[inline]
    pub fn is_finish_marker(self) -> bool {
        self == IsolateCommand::FinishRecording
    }
}

bitflags! {
    /// Categories of commands present in a buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandKind: u32 {
        const EVENT = 1;
        const LIFECYCLE = 1 << 1;
        const DISPOSE = 1 << 2;
        const RECORDING = 1 << 3;
    }
}

impl CommandKind {
    /// Category for a raw wire code; unknown codes contribute nothing
    pub fn of_code(code: i32) -> Self {
        IsolateCommand::from_code(code).map_or(CommandKind::empty(), IsolateCommand::kind)
    }
}
