//! Fast message queue descriptors and the bridge between their two
//! transport generations.
//!
//! A queue lives in one or more shared memory regions. Its descriptor lists
//! *grantors*, each naming a region (by fd slot), an offset and an extent:
//!
//! ```text
//! grantor 0   read index    (u64, 8-byte aligned)
//! grantor 1   write index   (u64, 8-byte aligned)
//! grantor 2   data ring     (multiple of quantum)
//! grantor 3   event flag    (u32, optional)
//! ```
//!
//! - [`legacy`]: descriptor shape produced by the driver.
//! - [`current`]: descriptor shape handed to clients.
//! - [`layout`]: width-neutral representation both are mapped through.
//! - [`bridge`]: pure conversions between the shapes.
//! - [`EventFlag`] and [`SyncReadWriteQueue`]: the data plane.

pub mod bridge;
pub mod current;
mod event_flag;
pub mod layout;
pub mod legacy;
mod queue;
mod region;

pub use bridge::{current_to_legacy, legacy_to_current};
pub use event_flag::{EventFlag, FMQ_NOT_EMPTY, FMQ_NOT_FULL};
pub use layout::{Grantor, QueueFlavor, QueueLayout};
pub use queue::SyncReadWriteQueue;
pub use region::{NativeHandle, SharedRegion};

/// Grantor slot of the read index.
pub const READ_PTR_POS: usize = 0;
/// Grantor slot of the write index.
pub const WRITE_PTR_POS: usize = 1;
/// Grantor slot of the data ring.
pub const DATA_PTR_POS: usize = 2;
/// Grantor slot of the optional event flag word.
pub const EVFLAG_WORD_POS: usize = 3;
/// Read, write and data grantors are mandatory.
pub const MIN_GRANTOR_COUNT: usize = 3;

/// Size of a read or write index.
pub const INDEX_SIZE: usize = std::mem::size_of::<u64>();
/// Size of the event flag word.
pub const EVFLAG_WORD_SIZE: usize = std::mem::size_of::<u32>();
