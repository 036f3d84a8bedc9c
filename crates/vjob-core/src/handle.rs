//! Job handle type

use core::fmt;

/// Opaque identifier for a submitted job
///
/// A handle is an index into the registry's slot arena plus the
/// generation the slot had when the job was registered. Retiring a job
/// bumps the slot's generation, so a handle that outlives its job can
/// never alias the next job stored in the same slot: lookups with it
/// simply report `NotFound`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle {
    index: u32,
    generation: u32,
}

impl JobHandle {
    /// Sentinel value indicating no job
    pub const NONE: JobHandle = JobHandle {
        index: u32::MAX,
        generation: u32::MAX,
    };

    /// Create a handle from its raw parts
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        JobHandle { index, generation }
    }

    /// Slot index in the registry arena
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot at registration time
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single u64 (generation in the high half)
    #[inline]
    pub const fn as_u64(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`JobHandle::as_u64`]
    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        JobHandle {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.index == u32::MAX && self.generation == u32::MAX
    }

    /// Check if this refers to a job slot
    #[inline]
    pub const fn is_some(self) -> bool {
        !self.is_none()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "JobHandle(NONE)")
        } else {
            write!(f, "JobHandle({}v{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}.{}", self.index, self.generation)
        }
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        JobHandle::NONE
    }
}
