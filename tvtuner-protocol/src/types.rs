//! Message type definitions for the tvtuner broker protocol.

use serde::{Deserialize, Serialize};

use crate::fmq::current::MqDescriptorInfo;

/// Protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Magic bytes for frame header: "TNRB" (TuNeR Broker).
pub const MAGIC: [u8; 4] = *b"TNRB";

/// Maximum frame payload size (1 MB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Frontend delivery system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontendType {
    Undefined = 0,
    Analog = 1,
    /// ATSC (North America terrestrial)
    Atsc = 2,
    /// ATSC 3.0
    Atsc3 = 3,
    /// DVB-C (cable)
    Dvbc = 4,
    /// DVB-S/S2 (satellite)
    Dvbs = 5,
    /// DVB-T/T2 (terrestrial)
    Dvbt = 6,
    /// ISDB-S (BS/CS satellite)
    Isdbs = 7,
    /// ISDB-S3 (advanced BS)
    Isdbs3 = 8,
    /// ISDB-T (terrestrial)
    Isdbt = 9,
}

impl From<u8> for FrontendType {
    fn from(value: u8) -> Self {
        match value {
            1 => FrontendType::Analog,
            2 => FrontendType::Atsc,
            3 => FrontendType::Atsc3,
            4 => FrontendType::Dvbc,
            5 => FrontendType::Dvbs,
            6 => FrontendType::Dvbt,
            7 => FrontendType::Isdbs,
            8 => FrontendType::Isdbs3,
            9 => FrontendType::Isdbt,
            _ => FrontendType::Undefined,
        }
    }
}

impl From<FrontendType> for u8 {
    fn from(value: FrontendType) -> Self {
        value as u8
    }
}

/// Per delivery system capability bitmasks reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunerFrontendCapabilities {
    Analog {
        type_cap: u32,
        sif_standard_cap: u32,
    },
    Atsc {
        modulation_cap: u32,
    },
    Atsc3 {
        bandwidth_cap: u32,
        modulation_cap: u32,
        time_interleave_mode_cap: u32,
        code_rate_cap: u32,
        fec_cap: u32,
        demod_output_format_cap: u32,
    },
    Dvbc {
        modulation_cap: u32,
        fec_cap: u64,
        annex_cap: u32,
    },
    Dvbs {
        modulation_cap: u32,
        inner_fec_cap: u64,
        standard: u32,
    },
    Dvbt {
        transmission_mode_cap: u32,
        bandwidth_cap: u32,
        constellation_cap: u32,
        coderate_cap: u32,
        hierarchy_cap: u32,
        guard_interval_cap: u32,
        is_t2_supported: bool,
        is_miso_supported: bool,
    },
    Isdbs {
        modulation_cap: u32,
        coderate_cap: u32,
    },
    Isdbs3 {
        modulation_cap: u32,
        coderate_cap: u32,
    },
    Isdbt {
        mode_cap: u32,
        bandwidth_cap: u32,
        modulation_cap: u32,
        coderate_cap: u32,
        guard_interval_cap: u32,
    },
}

/// Frontend description returned by `GetFrontendInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunerFrontendInfo {
    pub id: u32,
    pub frontend_type: FrontendType,
    /// Frequency range in Hz.
    pub min_frequency: u32,
    pub max_frequency: u32,
    /// Symbol rate range in symbols per second.
    pub min_symbol_rate: u32,
    pub max_symbol_rate: u32,
    /// Acquisition range in Hz.
    pub acquire_range: u32,
    /// Frontends sharing a group id cannot be used at the same time.
    pub exclusive_group_id: i32,
    /// Status types the frontend can report.
    pub status_caps: Vec<u32>,
    pub capabilities: Option<TunerFrontendCapabilities>,
}

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    // Handshake (0x00xx)
    /// Client hello with protocol version.
    Hello = 0x0001,
    /// Server hello response.
    HelloAck = 0x0002,

    // Frontend (0x01xx)
    /// List frontend ids.
    GetFrontendIds = 0x0100,
    /// Frontend id list response.
    GetFrontendIdsAck = 0x0101,
    /// Frontend info by handle.
    GetFrontendInfo = 0x0102,
    /// Frontend info response.
    GetFrontendInfoAck = 0x0103,
    /// Open a frontend by handle.
    OpenFrontend = 0x0104,
    /// Open frontend response.
    OpenFrontendAck = 0x0105,
    /// Release an open frontend.
    CloseFrontend = 0x0106,
    /// Close frontend response.
    CloseFrontendAck = 0x0107,

    // Data plane (0x02xx)
    /// Request a synchronized read/write queue descriptor.
    GetFmqSyncReadWrite = 0x0200,
    /// Queue descriptor response.
    GetFmqSyncReadWriteAck = 0x0201,

    // LNB (0x03xx)
    /// Open an LNB by handle.
    OpenLnb = 0x0300,
    /// Open LNB response (by handle or by name).
    OpenLnbAck = 0x0301,
    /// Open an LNB by name.
    OpenLnbByName = 0x0302,
    /// Release an open LNB.
    CloseLnb = 0x0304,
    /// Close LNB response.
    CloseLnbAck = 0x0305,

    // Misc (0xFFxx)
    /// Error response.
    Error = 0xFF00,
    /// Keep-alive ping.
    Ping = 0xFF01,
    /// Keep-alive pong.
    Pong = 0xFF02,
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            0x0001 => Ok(MessageType::Hello),
            0x0002 => Ok(MessageType::HelloAck),
            0x0100 => Ok(MessageType::GetFrontendIds),
            0x0101 => Ok(MessageType::GetFrontendIdsAck),
            0x0102 => Ok(MessageType::GetFrontendInfo),
            0x0103 => Ok(MessageType::GetFrontendInfoAck),
            0x0104 => Ok(MessageType::OpenFrontend),
            0x0105 => Ok(MessageType::OpenFrontendAck),
            0x0106 => Ok(MessageType::CloseFrontend),
            0x0107 => Ok(MessageType::CloseFrontendAck),
            0x0200 => Ok(MessageType::GetFmqSyncReadWrite),
            0x0201 => Ok(MessageType::GetFmqSyncReadWriteAck),
            0x0300 => Ok(MessageType::OpenLnb),
            0x0301 => Ok(MessageType::OpenLnbAck),
            0x0302 => Ok(MessageType::OpenLnbByName),
            0x0304 => Ok(MessageType::CloseLnb),
            0x0305 => Ok(MessageType::CloseLnbAck),
            0xFF00 => Ok(MessageType::Error),
            0xFF01 => Ok(MessageType::Ping),
            0xFF02 => Ok(MessageType::Pong),
            _ => Err(value),
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value as u16
    }
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Client hello with protocol version.
    Hello { version: u16 },
    /// Ping for keep-alive.
    Ping,
    /// List all frontend ids.
    GetFrontendIds,
    /// Get frontend info for a frontend handle.
    GetFrontendInfo { handle: u32 },
    /// Open a frontend by handle.
    OpenFrontend { handle: u32 },
    /// Release a frontend opened on this connection.
    CloseFrontend { frontend_id: u32 },
    /// Open the filter pipeline and return its queue descriptor.
    GetFmqSyncReadWrite,
    /// Open an LNB by handle.
    OpenLnb { handle: u32 },
    /// Open an LNB by its exact name.
    OpenLnbByName { name: String },
    /// Release an LNB opened on this connection.
    CloseLnb { lnb_id: u32 },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Server hello response.
    HelloAck { version: u16, success: bool },
    /// Pong response to ping.
    Pong,
    /// Frontend id list.
    GetFrontendIdsAck {
        success: bool,
        error_code: u16,
        ids: Vec<u32>,
    },
    /// Frontend info.
    GetFrontendInfoAck {
        success: bool,
        error_code: u16,
        info: Option<TunerFrontendInfo>,
    },
    /// Open frontend response.
    OpenFrontendAck {
        success: bool,
        error_code: u16,
        frontend_id: Option<u32>,
    },
    /// Close frontend response.
    CloseFrontendAck { success: bool },
    /// Queue descriptor response.
    GetFmqSyncReadWriteAck {
        success: bool,
        error_code: u16,
        descriptor: Option<MqDescriptorInfo>,
    },
    /// Open LNB response.
    OpenLnbAck {
        success: bool,
        error_code: u16,
        lnb_id: Option<u32>,
    },
    /// Close LNB response.
    CloseLnbAck { success: bool },
    /// Error response.
    Error { error_code: u16, message: String },
}

impl ClientMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::Hello { .. } => MessageType::Hello,
            ClientMessage::Ping => MessageType::Ping,
            ClientMessage::GetFrontendIds => MessageType::GetFrontendIds,
            ClientMessage::GetFrontendInfo { .. } => MessageType::GetFrontendInfo,
            ClientMessage::OpenFrontend { .. } => MessageType::OpenFrontend,
            ClientMessage::CloseFrontend { .. } => MessageType::CloseFrontend,
            ClientMessage::GetFmqSyncReadWrite => MessageType::GetFmqSyncReadWrite,
            ClientMessage::OpenLnb { .. } => MessageType::OpenLnb,
            ClientMessage::OpenLnbByName { .. } => MessageType::OpenLnbByName,
            ClientMessage::CloseLnb { .. } => MessageType::CloseLnb,
        }
    }
}

impl ServerMessage {
    /// Returns the message type for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::HelloAck { .. } => MessageType::HelloAck,
            ServerMessage::Pong => MessageType::Pong,
            ServerMessage::GetFrontendIdsAck { .. } => MessageType::GetFrontendIdsAck,
            ServerMessage::GetFrontendInfoAck { .. } => MessageType::GetFrontendInfoAck,
            ServerMessage::OpenFrontendAck { .. } => MessageType::OpenFrontendAck,
            ServerMessage::CloseFrontendAck { .. } => MessageType::CloseFrontendAck,
            ServerMessage::GetFmqSyncReadWriteAck { .. } => MessageType::GetFmqSyncReadWriteAck,
            ServerMessage::OpenLnbAck { .. } => MessageType::OpenLnbAck,
            ServerMessage::CloseLnbAck { .. } => MessageType::CloseLnbAck,
            ServerMessage::Error { .. } => MessageType::Error,
        }
    }
}
