//! Shared definitions for the tvtuner broker.
//!
//! This crate holds everything the broker and its clients agree on:
//!
//! - [`handle`]: packed resource handles and id extraction.
//! - [`fmq`]: queue descriptors in both transport generations, the bridge
//!   between them, and the synchronized read/write queue itself.
//! - [`codec`] and [`types`]: the binary control protocol.
//!
//! # Frame Format
//!
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "TNRB" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```
//!
//! # Example
//!
//! ```rust
//! use tvtuner_protocol::{ClientMessage, encode_client_message, decode_header, decode_client_message};
//! use bytes::Bytes;
//!
//! let msg = ClientMessage::OpenFrontend { handle: 0x0001_0000 };
//! let encoded = encode_client_message(&msg).unwrap();
//!
//! let header = decode_header(&encoded).unwrap().unwrap();
//! let payload = Bytes::copy_from_slice(&encoded[10..]);
//! let decoded = decode_client_message(header.message_type, payload).unwrap();
//! assert_eq!(decoded, msg);
//! ```
//!
//! # Handles
//!
//! ```rust
//! use tvtuner_protocol::handle::{ResourceHandle, ResourceKind};
//!
//! let handle = ResourceHandle::from_raw(0x1234_5678);
//! assert_eq!(handle.resource_id(ResourceKind::Frontend).0, 0x34);
//! ```

pub mod codec;
pub mod error;
pub mod fmq;
pub mod handle;
pub mod types;

pub use codec::{
    decode_client_message, decode_header, decode_server_message, encode_client_message,
    encode_server_message, FrameHeader, HEADER_SIZE,
};
pub use error::{
    DescriptorError, ErrorCode, EventFlagError, HandleError, ProtocolError, QueueError,
    ServiceError,
};
pub use handle::{resolve_resource_id, ResourceHandle, ResourceId, ResourceKind};
pub use types::{
    ClientMessage, FrontendType, MessageType, ServerMessage, TunerFrontendCapabilities,
    TunerFrontendInfo, MAGIC, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
