//! Queue descriptor as produced by the legacy transport generation.

use crate::fmq::region::NativeHandle;

/// Legacy flavor value for synchronized read/write queues.
pub const K_SYNCHRONIZED_READ_WRITE: u32 = 0x01;

/// Location of one queue region in the legacy encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrantorDescriptor {
    /// Reserved. Always zero for the queues this broker handles.
    pub flags: u32,
    pub fd_index: u32,
    pub offset: u32,
    pub extent: u64,
}

impl GrantorDescriptor {
    pub fn new(fd_index: u32, offset: u32, extent: u64) -> Self {
        Self {
            flags: 0,
            fd_index,
            offset,
            extent,
        }
    }
}

/// Legacy synchronized read/write queue descriptor (u8 payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqDescriptorSync {
    pub grantors: Vec<GrantorDescriptor>,
    /// The legacy handle is nullable.
    pub handle: Option<NativeHandle>,
    pub quantum: u32,
    pub flags: u32,
}

impl MqDescriptorSync {
    pub fn new(grantors: Vec<GrantorDescriptor>, handle: NativeHandle, quantum: u32) -> Self {
        Self {
            grantors,
            handle: Some(handle),
            quantum,
            flags: K_SYNCHRONIZED_READ_WRITE,
        }
    }
}
