//! Queue descriptor in the current transport generation.

use serde::{Deserialize, Serialize};

use crate::fmq::region::NativeHandle;

/// Current flavor value for synchronized read/write queues.
pub const SYNCHRONIZED_READ_WRITE: i32 = 0x01;

/// Location of one queue region in the current encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantorDescriptor {
    pub fd_index: i32,
    pub offset: i32,
    pub extent: i64,
}

/// Current synchronized read/write queue descriptor (i8 payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqDescriptor {
    pub grantors: Vec<GrantorDescriptor>,
    pub handle: NativeHandle,
    pub quantum: i32,
    pub flags: i32,
}

impl MqDescriptor {
    /// Wire view of this descriptor: fds are replaced by their region ids.
    pub fn to_info(&self) -> MqDescriptorInfo {
        MqDescriptorInfo {
            grantors: self.grantors.clone(),
            fd_ids: self.handle.fds.iter().map(|r| r.id()).collect(),
            ints: self.handle.ints.clone(),
            quantum: self.quantum,
            flags: self.flags,
        }
    }
}

/// Serializable form of [`MqDescriptor`] sent to remote clients.
///
/// Region memory cannot cross the socket; each fd slot is reported by the
/// id of the region it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqDescriptorInfo {
    pub grantors: Vec<GrantorDescriptor>,
    pub fd_ids: Vec<u64>,
    pub ints: Vec<i32>,
    pub quantum: i32,
    pub flags: i32,
}
