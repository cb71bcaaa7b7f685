//! Encoding of outgoing messages

use byteorder::{ByteOrder, LittleEndian};

use super::{FdFlags, FrameType, DO_CONFIRM, FRAME_LEN, HEADER_LEN};
use crate::types::{Message, Result, WuenscheError, EXTENDED_ID_MASK, STANDARD_ID_MASK};

fn unsupported(reason: impl Into<String>) -> WuenscheError {
    WuenscheError::UnsupportedMessageShape(reason.into())
}

fn validate(message: &Message) -> Result<()> {
    if message.is_error_frame {
        return Err(unsupported("error frames cannot be transmitted"));
    }
    let id_limit = if message.is_extended_id {
        EXTENDED_ID_MASK
    } else {
        STANDARD_ID_MASK
    };
    if message.arbitration_id > id_limit {
        return Err(unsupported(format!(
            "arbitration id 0x{:X} exceeds 0x{:X}",
            message.arbitration_id, id_limit
        )));
    }
    let capacity = message.capacity();
    if message.data.len() > capacity || message.dlc as usize > capacity {
        return Err(unsupported(format!(
            "payload of {} bytes (dlc {}) exceeds capacity {}",
            message.data.len(),
            message.dlc,
            capacity
        )));
    }
    if message.is_remote_frame {
        if !message.data.is_empty() {
            return Err(unsupported("remote frames carry no payload"));
        }
    } else if message.dlc as usize != message.data.len() {
        return Err(unsupported(format!(
            "dlc {} does not match payload length {}",
            message.dlc,
            message.data.len()
        )));
    }
    if !message.is_fd && (message.bitrate_switch || message.error_state_indicator) {
        return Err(unsupported("BRS and ESI require an FD frame"));
    }
    Ok(())
}

/// Encode a message into a wire frame
///
/// `confirm` asks the device to acknowledge the transmission with a confirm frame.
pub fn encode(message: &Message, confirm: bool) -> Result<[u8; FRAME_LEN]> {
    validate(message)?;

    let id = if message.is_extended_id {
        message.arbitration_id & EXTENDED_ID_MASK
    } else {
        message.arbitration_id & STANDARD_ID_MASK
    };

    let mut frame = [0u8; FRAME_LEN];
    frame[2] = if confirm { DO_CONFIRM } else { 0 };
    let payload = &mut frame[HEADER_LEN..];
    LittleEndian::write_u32(&mut payload[0..4], id);
    payload[4] = message.dlc;

    let (frame_type, length) = if message.is_fd {
        let mut flags = FdFlags::empty();
        flags.set(FdFlags::XTD, message.is_extended_id);
        flags.set(FdFlags::RTR, message.is_remote_frame);
        flags.set(FdFlags::ESI, message.error_state_indicator);
        flags.set(FdFlags::BRS, message.bitrate_switch);
        payload[5] = flags.bits();
        payload[6..6 + message.data.len()].copy_from_slice(&message.data);
        (FrameType::CanFd, 6 + message.data.len())
    } else {
        payload[5..5 + message.data.len()].copy_from_slice(&message.data);
        let frame_type = match (message.is_extended_id, message.is_remote_frame) {
            (false, false) => FrameType::Can,
            (false, true) => FrameType::Rtr,
            (true, false) => FrameType::XCan,
            (true, true) => FrameType::XRtr,
        };
        (frame_type, 5 + message.data.len())
    };

    frame[0] = frame_type.code();
    frame[1] = length as u8;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode;

    fn roundtrip(message: &Message) -> Message {
        let raw = encode(message, false).unwrap();
        decode(&raw).unwrap().into_message().unwrap()
    }

    #[test]
    fn test_classic_wire_types() {
        let cases = [
            (Message::new_standard(0x123, &[1, 2]), FrameType::Can),
            (Message::new_extended(0x1234_5678, &[1]), FrameType::XCan),
            (Message::new_remote(0x7FF, 8, false), FrameType::Rtr),
            (Message::new_remote(0x1FFF_FFFF, 0, true), FrameType::XRtr),
        ];
        for (message, frame_type) in cases {
            let raw = encode(&message, false).unwrap();
            assert_eq!(raw[0], frame_type.code());
            assert_eq!(roundtrip(&message), message);
        }
    }

    #[test]
    fn test_fd_roundtrip_and_flags() {
        let mut message = Message::new_fd(0x1ABC_DEF0, &[0x55; 48], true, true);
        message.error_state_indicator = true;
        let raw = encode(&message, false).unwrap();
        assert_eq!(raw[0], FrameType::CanFd.code());
        assert_eq!(raw[HEADER_LEN + 5], 0x80 | 0x40 | 0x08);
        assert_eq!(roundtrip(&message), message);

        let remote = Message {
            is_fd: true,
            ..Message::new_remote(0x10, 12, false)
        };
        let raw = encode(&remote, false).unwrap();
        assert_eq!(raw[HEADER_LEN + 5], 0x10);
        assert_eq!(roundtrip(&remote), remote);
    }

    #[test]
    fn test_confirm_flag() {
        let message = Message::new_standard(0x1, &[]);
        assert_eq!(encode(&message, true).unwrap()[2], DO_CONFIRM);
        assert_eq!(encode(&message, false).unwrap()[2], 0);
    }

    #[test]
    fn test_rejected_shapes() {
        let too_long_id = Message::new_standard(0x800, &[]);
        let too_long_ext = Message::new_extended(0x2000_0000, &[]);
        let too_much_data = Message::new_standard(0x1, &[0; 9]);
        let too_much_fd = Message::new_fd(0x1, &[0; 65], false, false);
        let remote_with_data = Message {
            data: vec![1],
            ..Message::new_remote(0x1, 1, false)
        };
        let dlc_mismatch = Message {
            dlc: 4,
            ..Message::new_standard(0x1, &[1, 2])
        };
        let error_frame = Message {
            is_error_frame: true,
            ..Message::default()
        };
        let brs_on_classic = Message {
            bitrate_switch: true,
            ..Message::new_standard(0x1, &[])
        };
        for message in [
            too_long_id,
            too_long_ext,
            too_much_data,
            too_much_fd,
            remote_with_data,
            dlc_mismatch,
            error_frame,
            brs_on_classic,
        ] {
            assert!(matches!(
                encode(&message, false),
                Err(WuenscheError::UnsupportedMessageShape(_))
            ));
        }
    }

    #[test]
    fn test_layout() {
        let raw = encode(&Message::new_standard(0x321, &[9, 8, 7]), false).unwrap();
        assert_eq!(raw.len(), FRAME_LEN);
        assert_eq!(raw[1], 8);
        assert_eq!(&raw[11..15], &[0x21, 0x03, 0, 0]);
        assert_eq!(raw[15], 3);
        assert_eq!(&raw[16..19], &[9, 8, 7]);
    }
}
