//! Decoding of device-to-host frames

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::{
    CanState, ErrorRegisters, FdFlags, FrameBody, FrameHeader, FrameType, OverrunEvent,
    WireFrame, FRAME_LEN, HEADER_LEN, PAYLOAD_LEN,
};
use crate::info::text_from_bytes;
use crate::timing::{ControllerFamily, ControllerParams};
use crate::types::{Result, WuenscheError, CLASSIC_MAX_LEN, FD_MAX_LEN};

fn malformed(reason: impl Into<String>) -> WuenscheError {
    WuenscheError::MalformedFrame(reason.into())
}

fn read_u32(raw: &[u8], offset: usize) -> Result<u32> {
    Cursor::new(&raw[offset..])
        .read_u32::<LittleEndian>()
        .map_err(|e| malformed(e.to_string()))
}

/// Decode one raw frame
pub fn decode(raw: &[u8]) -> Result<WireFrame> {
    if raw.len() != FRAME_LEN {
        return Err(malformed(format!(
            "frame is {} bytes, expected {}",
            raw.len(),
            FRAME_LEN
        )));
    }

    let mut rdr = Cursor::new(raw);
    let io = |e: std::io::Error| malformed(e.to_string());
    let header = FrameHeader {
        frame_type: rdr.read_u8().map_err(io)?,
        length: rdr.read_u8().map_err(io)?,
        msg_id: rdr.read_u8().map_err(io)?,
        ts_sec: rdr.read_u32::<LittleEndian>().map_err(io)?,
        ts_nsec: rdr.read_u32::<LittleEndian>().map_err(io)?,
    };
    let payload = &raw[HEADER_LEN..];

    let Some(frame_type) = FrameType::from_code(header.frame_type) else {
        return Ok(WireFrame {
            header,
            body: FrameBody::Unrecognized(header.frame_type),
        });
    };

    let body = match frame_type {
        FrameType::Can | FrameType::XCan | FrameType::Rtr | FrameType::XRtr => {
            decode_classic(frame_type, payload)?
        }
        FrameType::CanFd => decode_fd(payload)?,
        FrameType::Info => decode_info(header.length, payload)?,
        FrameType::CanState => FrameBody::BusState(CanState::from_bits_retain(payload[0])),
        FrameType::CanError => decode_bus_error(payload)?,
        FrameType::CanParams => FrameBody::Params(ControllerParams::from_bytes(payload)?),
        FrameType::Disconnected => FrameBody::Disconnected,
        FrameType::ErrCounter => FrameBody::ErrorCounter {
            rx: payload[0],
            tx: payload[1],
        },
        FrameType::Overrun => FrameBody::Overrun {
            event: OverrunEvent::from_bits_retain(payload[0]),
            count: payload[1],
        },
        FrameType::Busload => FrameBody::Busload(payload[0]),
        other => FrameBody::Housekeeping(other),
    };

    Ok(WireFrame { header, body })
}

fn decode_classic(frame_type: FrameType, payload: &[u8]) -> Result<FrameBody> {
    let id = read_u32(payload, 0)?;
    let len = payload[4];
    if len as usize > CLASSIC_MAX_LEN {
        return Err(malformed(format!("classic frame length {} exceeds 8", len)));
    }
    let remote = matches!(frame_type, FrameType::Rtr | FrameType::XRtr);
    let data = if remote {
        Vec::new()
    } else {
        payload[5..5 + len as usize].to_vec()
    };
    Ok(FrameBody::Classic {
        id,
        len,
        data,
        extended: matches!(frame_type, FrameType::XCan | FrameType::XRtr),
        remote,
    })
}

fn decode_fd(payload: &[u8]) -> Result<FrameBody> {
    let id = read_u32(payload, 0)?;
    let len = payload[4];
    if len as usize > FD_MAX_LEN {
        return Err(malformed(format!("FD frame length {} exceeds 64", len)));
    }
    let flags = FdFlags::from_bits_retain(payload[5]);
    let data = if flags.contains(FdFlags::RTR) {
        Vec::new()
    } else {
        payload[6..6 + len as usize].to_vec()
    };
    Ok(FrameBody::Fd {
        id,
        len,
        flags,
        data,
    })
}

fn decode_info(length: u8, payload: &[u8]) -> Result<FrameBody> {
    let length = length as usize;
    if !(2..=PAYLOAD_LEN).contains(&length) {
        return Err(malformed(format!("info frame length {} outside 2..=70", length)));
    }
    let text = text_from_bytes(&payload[2..length]);
    Ok(FrameBody::Info {
        source: payload[0],
        info_type: payload[1],
        text,
    })
}

fn decode_bus_error(payload: &[u8]) -> Result<FrameBody> {
    let ecode = payload[0];
    let cc_type = payload[1];
    let registers = match ControllerFamily::from_code(cc_type) {
        Some(ControllerFamily::Sja1000) => ErrorRegisters::Sja1000 {
            ecc: payload[2],
            rxerr: payload[3],
            txerr: payload[4],
        },
        Some(ControllerFamily::Lpc546xx) => ErrorRegisters::Lpc546xx {
            psr: read_u32(payload, 2)?,
            ecr: read_u32(payload, 6)?,
        },
        _ => ErrorRegisters::Other(cc_type),
    };
    Ok(FrameBody::BusError { ecode, registers })
}
