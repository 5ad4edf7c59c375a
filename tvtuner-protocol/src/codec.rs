//! Codec for encoding and decoding protocol messages.
//!
//! Frame format:
//! ```text
//! +--------+--------+--------+------------------+
//! | Magic  | Length | Type   |     Payload      |
//! | "TNRB" | u32 LE | u16 LE |    (variable)    |
//! +--------+--------+--------+------------------+
//! | 4 bytes| 4 bytes| 2 bytes|  Length bytes    |
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::fmq::current::{GrantorDescriptor, MqDescriptorInfo};
use crate::types::*;

/// Frame header size: 4 (magic) + 4 (length) + 2 (type) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Encode a client message into bytes.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ClientMessage::Hello { version } => {
            payload.put_u16_le(*version);
        }
        ClientMessage::Ping => {
            // Empty payload
        }
        ClientMessage::GetFrontendIds => {
            // Empty payload
        }
        ClientMessage::GetFrontendInfo { handle } => {
            payload.put_u32_le(*handle);
        }
        ClientMessage::OpenFrontend { handle } => {
            payload.put_u32_le(*handle);
        }
        ClientMessage::CloseFrontend { frontend_id } => {
            payload.put_u32_le(*frontend_id);
        }
        ClientMessage::GetFmqSyncReadWrite => {
            // Empty payload
        }
        ClientMessage::OpenLnb { handle } => {
            payload.put_u32_le(*handle);
        }
        ClientMessage::OpenLnbByName { name } => {
            encode_string(&mut payload, name)?;
        }
        ClientMessage::CloseLnb { lnb_id } => {
            payload.put_u32_le(*lnb_id);
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a server message into bytes.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
    let mut payload = BytesMut::new();

    match msg {
        ServerMessage::HelloAck { version, success } => {
            payload.put_u16_le(*version);
            payload.put_u8(if *success { 1 } else { 0 });
        }
        ServerMessage::Pong => {
            // Empty payload
        }
        ServerMessage::GetFrontendIdsAck {
            success,
            error_code,
            ids,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
            encode_len(&mut payload, ids.len(), "ids")?;
            for id in ids {
                payload.put_u32_le(*id);
            }
        }
        ServerMessage::GetFrontendInfoAck {
            success,
            error_code,
            info,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
            match info {
                Some(info) => {
                    payload.put_u8(1);
                    encode_frontend_info(&mut payload, info)?;
                }
                None => payload.put_u8(0),
            }
        }
        ServerMessage::OpenFrontendAck {
            success,
            error_code,
            frontend_id,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
            encode_optional_u32(&mut payload, frontend_id);
        }
        ServerMessage::CloseFrontendAck { success } => {
            payload.put_u8(if *success { 1 } else { 0 });
        }
        ServerMessage::GetFmqSyncReadWriteAck {
            success,
            error_code,
            descriptor,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
            match descriptor {
                Some(desc) => {
                    payload.put_u8(1);
                    encode_descriptor_info(&mut payload, desc)?;
                }
                None => payload.put_u8(0),
            }
        }
        ServerMessage::OpenLnbAck {
            success,
            error_code,
            lnb_id,
        } => {
            payload.put_u8(if *success { 1 } else { 0 });
            payload.put_u16_le(*error_code);
            encode_optional_u32(&mut payload, lnb_id);
        }
        ServerMessage::CloseLnbAck { success } => {
            payload.put_u8(if *success { 1 } else { 0 });
        }
        ServerMessage::Error { error_code, message } => {
            payload.put_u16_le(*error_code);
            encode_string(&mut payload, message)?;
        }
    }

    encode_frame(msg.message_type(), payload.freeze())
}

/// Encode a frame with magic, length, type, and payload.
fn encode_frame(msg_type: MessageType, payload: Bytes) -> Result<Bytes, ProtocolError> {
    let payload_len = payload.len() as u32;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&MAGIC);
    frame.put_u32_le(payload_len);
    frame.put_u16_le(msg_type.into());
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

fn ensure(buf: &Bytes, expected: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < expected {
        return Err(ProtocolError::IncompleteFrame {
            expected,
            actual: buf.remaining(),
        });
    }
    Ok(())
}

fn encode_len(buf: &mut BytesMut, len: usize, what: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(len)
        .map_err(|_| ProtocolError::EncodeError(format!("too many {}: {}", what, len)))?;
    buf.put_u16_le(len);
    Ok(())
}

fn decode_len(buf: &mut Bytes) -> Result<usize, ProtocolError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le() as usize)
}

fn encode_string(buf: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let bytes = s.as_bytes();
    encode_len(buf, bytes.len(), "string bytes")?;
    buf.put_slice(bytes);
    Ok(())
}

fn decode_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = decode_len(buf)?;
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProtocolError::DecodeError(e.to_string()))
}

fn encode_optional_u32(buf: &mut BytesMut, val: &Option<u32>) {
    match val {
        Some(v) => {
            buf.put_u8(1);
            buf.put_u32_le(*v);
        }
        None => {
            buf.put_u8(0);
        }
    }
}

fn decode_optional_u32(buf: &mut Bytes) -> Result<Option<u32>, ProtocolError> {
    ensure(buf, 1)?;
    if buf.get_u8() == 0 {
        return Ok(None);
    }
    ensure(buf, 4)?;
    Ok(Some(buf.get_u32_le()))
}

fn decode_flag(buf: &mut Bytes) -> Result<bool, ProtocolError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8() != 0)
}

/// Decode the common `success: u8, error_code: u16` prefix of an ack.
fn decode_status(buf: &mut Bytes) -> Result<(bool, u16), ProtocolError> {
    ensure(buf, 3)?;
    let success = buf.get_u8() != 0;
    let error_code = buf.get_u16_le();
    Ok((success, error_code))
}

fn encode_frontend_info(buf: &mut BytesMut, info: &TunerFrontendInfo) -> Result<(), ProtocolError> {
    buf.put_u32_le(info.id);
    buf.put_u8(info.frontend_type.into());
    buf.put_u32_le(info.min_frequency);
    buf.put_u32_le(info.max_frequency);
    buf.put_u32_le(info.min_symbol_rate);
    buf.put_u32_le(info.max_symbol_rate);
    buf.put_u32_le(info.acquire_range);
    buf.put_i32_le(info.exclusive_group_id);
    encode_len(buf, info.status_caps.len(), "status caps")?;
    for cap in &info.status_caps {
        buf.put_u32_le(*cap);
    }
    encode_capabilities(buf, &info.capabilities);
    Ok(())
}

fn decode_frontend_info(buf: &mut Bytes) -> Result<TunerFrontendInfo, ProtocolError> {
    ensure(buf, 29)?;
    let id = buf.get_u32_le();
    let frontend_type = FrontendType::from(buf.get_u8());
    let min_frequency = buf.get_u32_le();
    let max_frequency = buf.get_u32_le();
    let min_symbol_rate = buf.get_u32_le();
    let max_symbol_rate = buf.get_u32_le();
    let acquire_range = buf.get_u32_le();
    let exclusive_group_id = buf.get_i32_le();

    let count = decode_len(buf)?;
    ensure(buf, count * 4)?;
    let status_caps = (0..count).map(|_| buf.get_u32_le()).collect();

    let capabilities = decode_capabilities(buf)?;

    Ok(TunerFrontendInfo {
        id,
        frontend_type,
        min_frequency,
        max_frequency,
        min_symbol_rate,
        max_symbol_rate,
        acquire_range,
        exclusive_group_id,
        status_caps,
        capabilities,
    })
}

fn encode_capabilities(buf: &mut BytesMut, caps: &Option<TunerFrontendCapabilities>) {
    use TunerFrontendCapabilities as C;

    let Some(caps) = caps else {
        buf.put_u8(0);
        return;
    };
    match *caps {
        C::Analog {
            type_cap,
            sif_standard_cap,
        } => {
            buf.put_u8(FrontendType::Analog.into());
            buf.put_u32_le(type_cap);
            buf.put_u32_le(sif_standard_cap);
        }
        C::Atsc { modulation_cap } => {
            buf.put_u8(FrontendType::Atsc.into());
            buf.put_u32_le(modulation_cap);
        }
        C::Atsc3 {
            bandwidth_cap,
            modulation_cap,
            time_interleave_mode_cap,
            code_rate_cap,
            fec_cap,
            demod_output_format_cap,
        } => {
            buf.put_u8(FrontendType::Atsc3.into());
            buf.put_u32_le(bandwidth_cap);
            buf.put_u32_le(modulation_cap);
            buf.put_u32_le(time_interleave_mode_cap);
            buf.put_u32_le(code_rate_cap);
            buf.put_u32_le(fec_cap);
            buf.put_u32_le(demod_output_format_cap);
        }
        C::Dvbc {
            modulation_cap,
            fec_cap,
            annex_cap,
        } => {
            buf.put_u8(FrontendType::Dvbc.into());
            buf.put_u32_le(modulation_cap);
            buf.put_u64_le(fec_cap);
            buf.put_u32_le(annex_cap);
        }
        C::Dvbs {
            modulation_cap,
            inner_fec_cap,
            standard,
        } => {
            buf.put_u8(FrontendType::Dvbs.into());
            buf.put_u32_le(modulation_cap);
            buf.put_u64_le(inner_fec_cap);
            buf.put_u32_le(standard);
        }
        C::Dvbt {
            transmission_mode_cap,
            bandwidth_cap,
            constellation_cap,
            coderate_cap,
            hierarchy_cap,
            guard_interval_cap,
            is_t2_supported,
            is_miso_supported,
        } => {
            buf.put_u8(FrontendType::Dvbt.into());
            buf.put_u32_le(transmission_mode_cap);
            buf.put_u32_le(bandwidth_cap);
            buf.put_u32_le(constellation_cap);
            buf.put_u32_le(coderate_cap);
            buf.put_u32_le(hierarchy_cap);
            buf.put_u32_le(guard_interval_cap);
            buf.put_u8(if is_t2_supported { 1 } else { 0 });
            buf.put_u8(if is_miso_supported { 1 } else { 0 });
        }
        C::Isdbs {
            modulation_cap,
            coderate_cap,
        } => {
            buf.put_u8(FrontendType::Isdbs.into());
            buf.put_u32_le(modulation_cap);
            buf.put_u32_le(coderate_cap);
        }
        C::Isdbs3 {
            modulation_cap,
            coderate_cap,
        } => {
            buf.put_u8(FrontendType::Isdbs3.into());
            buf.put_u32_le(modulation_cap);
            buf.put_u32_le(coderate_cap);
        }
        C::Isdbt {
            mode_cap,
            bandwidth_cap,
            modulation_cap,
            coderate_cap,
            guard_interval_cap,
        } => {
            buf.put_u8(FrontendType::Isdbt.into());
            buf.put_u32_le(mode_cap);
            buf.put_u32_le(bandwidth_cap);
            buf.put_u32_le(modulation_cap);
            buf.put_u32_le(coderate_cap);
            buf.put_u32_le(guard_interval_cap);
        }
    }
}

fn decode_capabilities(
    buf: &mut Bytes,
) -> Result<Option<TunerFrontendCapabilities>, ProtocolError> {
    use TunerFrontendCapabilities as C;

    ensure(buf, 1)?;
    let tag = buf.get_u8();
    let caps = match FrontendType::from(tag) {
        FrontendType::Undefined if tag == 0 => return Ok(None),
        FrontendType::Undefined => {
            return Err(ProtocolError::DecodeError(format!(
                "Unknown capability tag: {}",
                tag
            )))
        }
        FrontendType::Analog => {
            ensure(buf, 8)?;
            C::Analog {
                type_cap: buf.get_u32_le(),
                sif_standard_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Atsc => {
            ensure(buf, 4)?;
            C::Atsc {
                modulation_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Atsc3 => {
            ensure(buf, 24)?;
            C::Atsc3 {
                bandwidth_cap: buf.get_u32_le(),
                modulation_cap: buf.get_u32_le(),
                time_interleave_mode_cap: buf.get_u32_le(),
                code_rate_cap: buf.get_u32_le(),
                fec_cap: buf.get_u32_le(),
                demod_output_format_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Dvbc => {
            ensure(buf, 16)?;
            C::Dvbc {
                modulation_cap: buf.get_u32_le(),
                fec_cap: buf.get_u64_le(),
                annex_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Dvbs => {
            ensure(buf, 16)?;
            C::Dvbs {
                modulation_cap: buf.get_u32_le(),
                inner_fec_cap: buf.get_u64_le(),
                standard: buf.get_u32_le(),
            }
        }
        FrontendType::Dvbt => {
            ensure(buf, 26)?;
            C::Dvbt {
                transmission_mode_cap: buf.get_u32_le(),
                bandwidth_cap: buf.get_u32_le(),
                constellation_cap: buf.get_u32_le(),
                coderate_cap: buf.get_u32_le(),
                hierarchy_cap: buf.get_u32_le(),
                guard_interval_cap: buf.get_u32_le(),
                is_t2_supported: buf.get_u8() != 0,
                is_miso_supported: buf.get_u8() != 0,
            }
        }
        FrontendType::Isdbs => {
            ensure(buf, 8)?;
            C::Isdbs {
                modulation_cap: buf.get_u32_le(),
                coderate_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Isdbs3 => {
            ensure(buf, 8)?;
            C::Isdbs3 {
                modulation_cap: buf.get_u32_le(),
                coderate_cap: buf.get_u32_le(),
            }
        }
        FrontendType::Isdbt => {
            ensure(buf, 20)?;
            C::Isdbt {
                mode_cap: buf.get_u32_le(),
                bandwidth_cap: buf.get_u32_le(),
                modulation_cap: buf.get_u32_le(),
                coderate_cap: buf.get_u32_le(),
                guard_interval_cap: buf.get_u32_le(),
            }
        }
    };
    Ok(Some(caps))
}

fn encode_descriptor_info(buf: &mut BytesMut, desc: &MqDescriptorInfo) -> Result<(), ProtocolError> {
    encode_len(buf, desc.grantors.len(), "grantors")?;
    for g in &desc.grantors {
        buf.put_i32_le(g.fd_index);
        buf.put_i32_le(g.offset);
        buf.put_i64_le(g.extent);
    }
    encode_len(buf, desc.fd_ids.len(), "fds")?;
    for id in &desc.fd_ids {
        buf.put_u64_le(*id);
    }
    encode_len(buf, desc.ints.len(), "ints")?;
    for v in &desc.ints {
        buf.put_i32_le(*v);
    }
    buf.put_i32_le(desc.quantum);
    buf.put_i32_le(desc.flags);
    Ok(())
}

fn decode_descriptor_info(buf: &mut Bytes) -> Result<MqDescriptorInfo, ProtocolError> {
    let count = decode_len(buf)?;
    ensure(buf, count * 16)?;
    let grantors = (0..count)
        .map(|_| GrantorDescriptor {
            fd_index: buf.get_i32_le(),
            offset: buf.get_i32_le(),
            extent: buf.get_i64_le(),
        })
        .collect();

    let count = decode_len(buf)?;
    ensure(buf, count * 8)?;
    let fd_ids = (0..count).map(|_| buf.get_u64_le()).collect();

    let count = decode_len(buf)?;
    ensure(buf, count * 4)?;
    let ints = (0..count).map(|_| buf.get_i32_le()).collect();

    ensure(buf, 8)?;
    let quantum = buf.get_i32_le();
    let flags = buf.get_i32_le();

    Ok(MqDescriptorInfo {
        grantors,
        fd_ids,
        ints,
        quantum,
        flags,
    })
}

/// Frame header information.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub payload_len: u32,
    pub message_type: MessageType,
}

/// Try to decode a frame header from the buffer.
/// Returns None if there's not enough data yet.
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = &buf[..HEADER_SIZE];

    // Check magic
    let mut magic = [0u8; 4];
    header.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic(magic));
    }

    // Read length
    let payload_len = header.get_u32_le();
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len, MAX_FRAME_SIZE));
    }

    // Read message type
    let type_val = header.get_u16_le();
    let message_type =
        MessageType::try_from(type_val).map_err(ProtocolError::UnknownMessageType)?;

    Ok(Some(FrameHeader {
        payload_len,
        message_type,
    }))
}

/// Decode a client message from a complete frame buffer.
/// The buffer should start at the payload (after the header).
pub fn decode_client_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ClientMessage, ProtocolError> {
    match msg_type {
        MessageType::Hello => {
            ensure(&payload, 2)?;
            let version = payload.get_u16_le();
            Ok(ClientMessage::Hello { version })
        }
        MessageType::Ping => Ok(ClientMessage::Ping),
        MessageType::GetFrontendIds => Ok(ClientMessage::GetFrontendIds),
        MessageType::GetFrontendInfo => {
            ensure(&payload, 4)?;
            Ok(ClientMessage::GetFrontendInfo {
                handle: payload.get_u32_le(),
            })
        }
        MessageType::OpenFrontend => {
            ensure(&payload, 4)?;
            Ok(ClientMessage::OpenFrontend {
                handle: payload.get_u32_le(),
            })
        }
        MessageType::CloseFrontend => {
            ensure(&payload, 4)?;
            Ok(ClientMessage::CloseFrontend {
                frontend_id: payload.get_u32_le(),
            })
        }
        MessageType::GetFmqSyncReadWrite => Ok(ClientMessage::GetFmqSyncReadWrite),
        MessageType::OpenLnb => {
            ensure(&payload, 4)?;
            Ok(ClientMessage::OpenLnb {
                handle: payload.get_u32_le(),
            })
        }
        MessageType::OpenLnbByName => {
            let name = decode_string(&mut payload)?;
            Ok(ClientMessage::OpenLnbByName { name })
        }
        MessageType::CloseLnb => {
            ensure(&payload, 4)?;
            Ok(ClientMessage::CloseLnb {
                lnb_id: payload.get_u32_le(),
            })
        }
        other => Err(ProtocolError::DecodeError(format!(
            "Unexpected client message type: {:?}",
            other
        ))),
    }
}

/// Decode a server message from a complete frame buffer.
/// The buffer should start at the payload (after the header).
pub fn decode_server_message(
    msg_type: MessageType,
    mut payload: Bytes,
) -> Result<ServerMessage, ProtocolError> {
    match msg_type {
        MessageType::HelloAck => {
            ensure(&payload, 3)?;
            let version = payload.get_u16_le();
            let success = payload.get_u8() != 0;
            Ok(ServerMessage::HelloAck { version, success })
        }
        MessageType::Pong => Ok(ServerMessage::Pong),
        MessageType::GetFrontendIdsAck => {
            let (success, error_code) = decode_status(&mut payload)?;
            let count = decode_len(&mut payload)?;
            ensure(&payload, count * 4)?;
            let ids = (0..count).map(|_| payload.get_u32_le()).collect();
            Ok(ServerMessage::GetFrontendIdsAck {
                success,
                error_code,
                ids,
            })
        }
        MessageType::GetFrontendInfoAck => {
            let (success, error_code) = decode_status(&mut payload)?;
            let info = if decode_flag(&mut payload)? {
                Some(decode_frontend_info(&mut payload)?)
            } else {
                None
            };
            Ok(ServerMessage::GetFrontendInfoAck {
                success,
                error_code,
                info,
            })
        }
        MessageType::OpenFrontendAck => {
            let (success, error_code) = decode_status(&mut payload)?;
            let frontend_id = decode_optional_u32(&mut payload)?;
            Ok(ServerMessage::OpenFrontendAck {
                success,
                error_code,
                frontend_id,
            })
        }
        MessageType::CloseFrontendAck => Ok(ServerMessage::CloseFrontendAck {
            success: decode_flag(&mut payload)?,
        }),
        MessageType::GetFmqSyncReadWriteAck => {
            let (success, error_code) = decode_status(&mut payload)?;
            let descriptor = if decode_flag(&mut payload)? {
                Some(decode_descriptor_info(&mut payload)?)
            } else {
                None
            };
            Ok(ServerMessage::GetFmqSyncReadWriteAck {
                success,
                error_code,
                descriptor,
            })
        }
        MessageType::OpenLnbAck => {
            let (success, error_code) = decode_status(&mut payload)?;
            let lnb_id = decode_optional_u32(&mut payload)?;
            Ok(ServerMessage::OpenLnbAck {
                success,
                error_code,
                lnb_id,
            })
        }
        MessageType::CloseLnbAck => Ok(ServerMessage::CloseLnbAck {
            success: decode_flag(&mut payload)?,
        }),
        MessageType::Error => {
            ensure(&payload, 2)?;
            let error_code = payload.get_u16_le();
            let message = decode_string(&mut payload)?;
            Ok(ServerMessage::Error {
                error_code,
                message,
            })
        }
        other => Err(ProtocolError::DecodeError(format!(
            "Unexpected server message type: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_round_trip(msg: ClientMessage) {
        let encoded = encode_client_message(&msg).unwrap();
        let header = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.message_type, msg.message_type());
        let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
        let decoded = decode_client_message(header.message_type, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    fn server_round_trip(msg: ServerMessage) {
        let encoded = encode_server_message(&msg).unwrap();
        let header = decode_header(&encoded).unwrap().unwrap();
        assert_eq!(header.payload_len as usize, encoded.len() - HEADER_SIZE);
        let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..]);
        let decoded = decode_server_message(header.message_type, payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_encode_decode_hello() {
        let msg = ClientMessage::Hello { version: 1 };
        let encoded = encode_client_message(&msg).unwrap();

        // Verify header
        assert_eq!(&encoded[0..4], &MAGIC);
        client_round_trip(msg);
    }

    #[test]
    fn test_encode_decode_open_lnb_by_name() {
        client_round_trip(ClientMessage::OpenLnbByName {
            name: "universal_lnb".to_string(),
        });
        client_round_trip(ClientMessage::OpenFrontend { handle: 0x0003_0000 });
    }

    #[test]
    fn test_encode_decode_frontend_info() {
        let info = TunerFrontendInfo {
            id: 1,
            frontend_type: FrontendType::Dvbt,
            min_frequency: 174_000_000,
            max_frequency: 862_000_000,
            min_symbol_rate: 0,
            max_symbol_rate: 0,
            acquire_range: 2_000_000,
            exclusive_group_id: -1,
            status_caps: vec![0, 1, 6],
            capabilities: Some(TunerFrontendCapabilities::Dvbt {
                transmission_mode_cap: 0x7F,
                bandwidth_cap: 0x3E,
                constellation_cap: 0x1E,
                coderate_cap: 0xFE,
                hierarchy_cap: 0x1E,
                guard_interval_cap: 0xFE,
                is_t2_supported: true,
                is_miso_supported: false,
            }),
        };
        server_round_trip(ServerMessage::GetFrontendInfoAck {
            success: true,
            error_code: 0,
            info: Some(info),
        });
        server_round_trip(ServerMessage::GetFrontendInfoAck {
            success: false,
            error_code: 3,
            info: None,
        });
    }

    #[test]
    fn test_encode_decode_descriptor() {
        let descriptor = MqDescriptorInfo {
            grantors: vec![
                GrantorDescriptor { fd_index: 0, offset: 0, extent: 8 },
                GrantorDescriptor { fd_index: 0, offset: 8, extent: 8 },
                GrantorDescriptor { fd_index: 0, offset: 16, extent: 16_000_000 },
                GrantorDescriptor { fd_index: 0, offset: 16_000_016, extent: 4 },
            ],
            fd_ids: vec![42],
            ints: vec![],
            quantum: 1,
            flags: 1,
        };
        server_round_trip(ServerMessage::GetFmqSyncReadWriteAck {
            success: true,
            error_code: 0,
            descriptor: Some(descriptor),
        });
    }

    #[test]
    fn test_encode_decode_ids_and_error() {
        server_round_trip(ServerMessage::GetFrontendIdsAck {
            success: true,
            error_code: 0,
            ids: vec![0, 1, 7],
        });
        server_round_trip(ServerMessage::OpenLnbAck {
            success: false,
            error_code: 3,
            lnb_id: None,
        });
        server_round_trip(ServerMessage::Error {
            error_code: 2,
            message: "Tuner driver unavailable".to_string(),
        });
    }

    #[test]
    fn test_invalid_magic() {
        let bad_frame = b"BADPxxxx\x00\x00";
        let result = decode_header(bad_frame);
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_incomplete_header() {
        let partial = b"TNRB\x00";
        let result = decode_header(partial).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_truncated_payload() {
        let encoded = encode_client_message(&ClientMessage::OpenLnb { handle: 5 }).unwrap();
        let payload = Bytes::copy_from_slice(&encoded[HEADER_SIZE..HEADER_SIZE + 2]);
        assert!(matches!(
            decode_client_message(MessageType::OpenLnb, payload),
            Err(ProtocolError::IncompleteFrame { expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_server_type_rejected_as_client_message() {
        let result = decode_client_message(MessageType::Pong, Bytes::new());
        assert!(matches!(result, Err(ProtocolError::DecodeError(_))));
    }
}
