//! Error types for the tvtuner broker.

use thiserror::Error;

use crate::handle::ResourceKind;

/// Protocol-level errors that can occur during communication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid magic bytes in frame header.
    #[error("Invalid magic bytes: expected 'TNRB', got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Message type is unknown or unsupported.
    #[error("Unknown message type: 0x{0:04X}")]
    UnknownMessageType(u16),

    /// Frame payload is too large.
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(u32, u32),

    /// Frame payload is incomplete.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Failed to decode message payload.
    #[error("Failed to decode message: {0}")]
    DecodeError(String),

    /// Failed to encode message payload.
    #[error("Failed to encode message: {0}")]
    EncodeError(String),

    /// Protocol version mismatch.
    #[error("Protocol version mismatch: client={client}, server={server}")]
    VersionMismatch { client: u16, server: u16 },
}

/// Errors from the resource handle codec.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// Id does not fit in the 8-bit handle field.
    #[error("Resource id {0} does not fit in a handle")]
    IdOutOfRange(u32),
}

/// A queue descriptor that cannot be bridged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Fewer grantors than the read/write/data triple.
    #[error("Descriptor has {found} grantors, at least {required} required")]
    MissingGrantors { found: usize, required: usize },

    /// The legacy descriptor carries no native handle.
    #[error("Descriptor has no native handle")]
    MissingHandle,

    /// Queue flavor other than synchronized read/write.
    #[error("Unsupported queue flavor flags: {0}")]
    UnsupportedFlavor(i64),

    /// Quantum is zero or negative.
    #[error("Invalid quantum: {0}")]
    InvalidQuantum(i64),

    /// A grantor names a file descriptor slot that does not exist.
    #[error("Grantor {grantor} references fd index {fd_index}, handle has {fd_count} fds")]
    FdIndexOutOfRange {
        grantor: usize,
        fd_index: i64,
        fd_count: usize,
    },

    /// A grantor extends past the end of its region.
    #[error("Grantor {grantor} ({offset}+{extent}) exceeds region of {region_len} bytes")]
    GrantorOutOfBounds {
        grantor: usize,
        offset: u64,
        extent: u64,
        region_len: usize,
    },

    /// A read/write index or event flag grantor has the wrong size or alignment.
    #[error("Grantor {grantor} is misaligned or has the wrong size ({offset}+{extent})")]
    MisalignedGrantor {
        grantor: usize,
        offset: u64,
        extent: u64,
    },

    /// The data region is empty or not a multiple of the quantum.
    #[error("Data region of {extent} bytes is not a positive multiple of quantum {quantum}")]
    InvalidDataRegion { extent: u64, quantum: u64 },

    /// A value does not fit the target field width.
    #[error("Field '{field}' value {value} does not fit the target descriptor")]
    FieldOverflow { field: &'static str, value: i128 },

    /// Legacy grantor flags have no counterpart in the current form.
    #[error("Grantor {grantor} carries flags 0x{flags:08X} which the current form cannot represent")]
    UnrepresentableGrantorFlags { grantor: usize, flags: u32 },

    /// Two queue grantors share bytes of the same region.
    #[error("Grantors {first} and {second} overlap in the same region")]
    OverlappingGrantors { first: usize, second: usize },
}

/// Errors from event flag operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlagError {
    /// Bit mask of zero.
    #[error("Event flag bit mask must be non-zero")]
    InvalidBitMask,

    /// No requested bit was set before the timeout.
    #[error("Timed out waiting for event flag bits 0x{0:08X}")]
    Timeout(u32),
}

/// Errors from queue reads and writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Not enough free space for the whole write.
    #[error("Queue full: requested {requested} bytes, {available} available")]
    InsufficientSpace { requested: usize, available: usize },

    /// Not enough queued data for the whole read.
    #[error("Queue empty: requested {requested} bytes, {available} available")]
    InsufficientData { requested: usize, available: usize },

    /// Transfer size is not a multiple of the quantum.
    #[error("Transfer of {len} bytes is not a multiple of quantum {quantum}")]
    UnalignedTransfer { len: usize, quantum: usize },

    /// Read and write counters are further apart than the ring is long.
    #[error("Queue counters corrupt: {queued} bytes queued in a {capacity}-byte ring")]
    CorruptCounters { queued: u64, capacity: usize },

    /// Blocking operation on a queue without an event flag.
    #[error("Queue has no event flag word")]
    NoEventFlag,

    /// Descriptor is not usable as a queue.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Event flag wait failed.
    #[error(transparent)]
    EventFlag(#[from] EventFlagError),
}

/// Errors surfaced by the broker service to its clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The driver could not be reached. Permanent for the process lifetime.
    #[error("Tuner driver unavailable: {0}")]
    DriverUnavailable(String),

    /// The id or name does not resolve to a live resource.
    #[error("{kind} not found: {key}")]
    ResourceNotFound { kind: ResourceKind, key: String },

    /// A step of a session open sequence failed.
    #[error("Failed to open session at step '{step}': {reason}")]
    SessionOpenFailed { step: &'static str, reason: String },

    /// The driver produced a malformed queue descriptor.
    #[error("Queue descriptor conversion failed: {0}")]
    DescriptorConversionFailed(#[from] DescriptorError),

    /// The resource kind has no implementation.
    #[error("Unsupported resource kind: {0}")]
    UnsupportedResourceKind(ResourceKind),

    /// A query against the bound driver returned an error result.
    #[error("Driver call '{call}' failed: {reason}")]
    DriverCallFailed { call: &'static str, reason: String },
}

impl ServiceError {
    /// Wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::DriverUnavailable(_) => ErrorCode::DriverUnavailable,
            ServiceError::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,
            ServiceError::SessionOpenFailed { .. } => ErrorCode::SessionOpenFailed,
            ServiceError::DescriptorConversionFailed(_) => ErrorCode::DescriptorConversionFailed,
            ServiceError::UnsupportedResourceKind(_) => ErrorCode::UnsupportedResourceKind,
            ServiceError::DriverCallFailed { .. } => ErrorCode::DriverCallFailed,
        }
    }
}

/// Error code sent in response messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// Operation succeeded.
    Success = 0x0000,
    /// Unknown error occurred.
    Unknown = 0x0001,
    /// Driver could not be reached.
    DriverUnavailable = 0x0002,
    /// Resource id or name not found.
    ResourceNotFound = 0x0003,
    /// Session open sequence failed.
    SessionOpenFailed = 0x0004,
    /// Queue descriptor could not be converted.
    DescriptorConversionFailed = 0x0005,
    /// Resource kind not supported.
    UnsupportedResourceKind = 0x0006,
    /// Invalid session state.
    InvalidState = 0x0007,
    /// Protocol error.
    ProtocolError = 0x0009,
    /// Driver returned an error result.
    DriverCallFailed = 0x000A,
}

impl From<u16> for ErrorCode {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => ErrorCode::Success,
            0x0002 => ErrorCode::DriverUnavailable,
            0x0003 => ErrorCode::ResourceNotFound,
            0x0004 => ErrorCode::SessionOpenFailed,
            0x0005 => ErrorCode::DescriptorConversionFailed,
            0x0006 => ErrorCode::UnsupportedResourceKind,
            0x0007 => ErrorCode::InvalidState,
            0x0009 => ErrorCode::ProtocolError,
            0x000A => ErrorCode::DriverCallFailed,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

impl From<&ServiceError> for ErrorCode {
    fn from(value: &ServiceError) -> Self {
        value.code()
    }
}

impl ErrorCode {
    /// Returns true if this error code indicates success.
    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}
