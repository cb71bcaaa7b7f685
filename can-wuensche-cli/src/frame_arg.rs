//! Command-line frame notation
//!
//! `<id>#<data>` for classic frames, `<id>#R[len]` for remote frames and
//! `<id>##<flags><data>` for CAN-FD frames, where the flags nibble carries BRS (1) and
//! ESI (2). An ID with eight hex digits or above 0x7FF is extended.

use anyhow::{bail, Context, Result};
use can_wuensche::Message;

const STANDARD_ID_MAX: u32 = 0x7FF;
const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

const FLAG_BRS: u8 = 0x01;
const FLAG_ESI: u8 = 0x02;

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| *c != '.').collect();
    if !digits.is_ascii() {
        bail!("Invalid data '{}'", text);
    }
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits in '{}'", text);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid data byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

/// Parse one frame in `cansend` notation
pub fn parse_message(text: &str) -> Result<Message> {
    let (id_text, rest) = text
        .split_once('#')
        .with_context(|| format!("Missing '#' in frame '{}'", text))?;

    if id_text.is_empty() || !id_text.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Invalid CAN ID '{}'", id_text);
    }
    let id = u32::from_str_radix(id_text, 16)
        .with_context(|| format!("Invalid CAN ID '{}'", id_text))?;
    let extended = id_text.len() == 8 || id > STANDARD_ID_MAX;
    if id > EXTENDED_ID_MAX {
        bail!("CAN ID {:X} exceeds 29 bits", id);
    }

    if let Some(fd) = rest.strip_prefix('#') {
        let mut chars = fd.chars();
        let flags = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .with_context(|| format!("Missing FD flags in frame '{}'", text))? as u8;
        let data = parse_hex_bytes(chars.as_str())?;
        let mut message = Message::new_fd(id, &data, extended, flags & FLAG_BRS != 0);
        message.error_state_indicator = flags & FLAG_ESI != 0;
        return Ok(message);
    }

    if let Some(len) = rest.strip_prefix(['R', 'r']) {
        let dlc = if len.is_empty() {
            0
        } else {
            len.parse::<u8>()
                .with_context(|| format!("Invalid remote length '{}'", len))?
        };
        return Ok(Message::new_remote(id, dlc, extended));
    }

    let data = parse_hex_bytes(rest)?;
    Ok(if extended {
        Message::new_extended(id, &data)
    } else {
        Message::new_standard(id, &data)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classic() {
        let message = parse_message("123#DEADBEEF").unwrap();
        assert_eq!(message.arbitration_id, 0x123);
        assert!(!message.is_extended_id);
        assert_eq!(message.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let dotted = parse_message("7FF#11.22.33").unwrap();
        assert_eq!(dotted.data, vec![0x11, 0x22, 0x33]);

        let empty = parse_message("000#").unwrap();
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_parse_extended() {
        assert!(parse_message("00000123#01").unwrap().is_extended_id);
        assert!(parse_message("800#01").unwrap().is_extended_id);
        assert!(parse_message("20000000#").is_err());
    }

    #[test]
    fn test_parse_remote() {
        let message = parse_message("1F0#R4").unwrap();
        assert!(message.is_remote_frame);
        assert_eq!(message.dlc, 4);
        assert!(message.data.is_empty());
        assert_eq!(parse_message("1F0#R").unwrap().dlc, 0);
    }

    #[test]
    fn test_parse_fd() {
        let message = parse_message("123##3AABB").unwrap();
        assert!(message.is_fd);
        assert!(message.bitrate_switch);
        assert!(message.error_state_indicator);
        assert_eq!(message.data, vec![0xAA, 0xBB]);

        let plain = parse_message("123##0").unwrap();
        assert!(plain.is_fd);
        assert!(!plain.bitrate_switch);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_message("123").is_err());
        assert!(parse_message("XYZ#00").is_err());
        assert!(parse_message("123#ABC").is_err());
        assert!(parse_message("123#ZZ").is_err());
        assert!(parse_message("123##").is_err());
    }
}
