//! Class identifier allocation.
//!
//! The engine owns ids below [`BUILTIN_CLASS_LIMIT`]. When a runtime comes
//! up it reserves a block of [`CUSTOM_CLASS_BLOCK`] ids directly above that
//! range, so custom binding classes can never collide with built-in ones.

use std::fmt;

use serde::Serialize;

/// First id not used by the engine's built-in classes
pub const BUILTIN_CLASS_LIMIT: u32 = 64;

/// Ids reserved for custom classes per runtime activation
pub const CUSTOM_CLASS_BLOCK: u32 = 256;

/// Engine class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(u32);

impl ClassId {
    pub const fn new(raw: u32) -> Self {
        ClassId(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Whether the id falls in the engine's built-in range
    pub const fn is_builtin(self) -> bool {
        self.0 < BUILTIN_CLASS_LIMIT
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Bump allocator over one reserved block
#[derive(Debug, Clone)]
pub struct ClassIdAllocator {
    next: u32,
    end: u32,
}

impl ClassIdAllocator {
    /// Reserve the default custom block
    pub fn new() -> Self {
        Self::with_block(CUSTOM_CLASS_BLOCK)
    }

    /// Reserve `block` ids above the built-in range
    pub fn with_block(block: u32) -> Self {
        Self {
            next: BUILTIN_CLASS_LIMIT,
            end: BUILTIN_CLASS_LIMIT.saturating_add(block),
        }
    }

    /// Next free id, `None` once the block is used up
    pub fn allocate(&mut self) -> Option<ClassId> {
        if self.next >= self.end {
            return None;
        }
        let id = ClassId(self.next);
        self.next += 1;
        Some(id)
    }

    /// Ids handed out so far
    pub fn allocated(&self) -> u32 {
        self.next - BUILTIN_CLASS_LIMIT
    }

    /// Ids still available in the block
    pub fn remaining(&self) -> u32 {
        self.end - self.next
    }
}

impl Default for ClassIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
