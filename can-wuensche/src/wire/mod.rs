//! CPC wire frame codec
//!
//! Every frame exchanged with the device has the same fixed, packed, little-endian layout:
//!
//! | offset | size | field                  |
//! |-------:|-----:|------------------------|
//! | 0      | 1    | frame type             |
//! | 1      | 1    | payload length         |
//! | 2      | 1    | message id / confirm   |
//! | 3      | 4    | timestamp seconds      |
//! | 7      | 4    | timestamp nanoseconds  |
//! | 11     | 70   | payload union          |
//!
//! The payload interpretation depends on the frame type. [`decode`] turns raw bytes into
//! a [`WireFrame`] and [`encode`] builds the bytes for an outgoing [`Message`].

mod command;
mod frame;

pub use command::encode;
pub use frame::decode;

use bitflags::bitflags;

use crate::timing::{ControllerFamily, ControllerParams};
use crate::types::Message;

/// Total length of a wire frame
pub const FRAME_LEN: usize = 81;

/// Length of the common frame header
pub const HEADER_LEN: usize = 11;

/// Length of the payload union
pub const PAYLOAD_LEN: usize = FRAME_LEN - HEADER_LEN;

/// Message id value requesting a confirmation frame
pub const DO_CONFIRM: u8 = 1;

/// Bus error code of an error frame report
pub const ECODE_ERRFRAME: u8 = 0x01;

/// Frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Resync = 0,
    Can = 1,
    Busload = 2,
    String = 3,
    Conti = 4,
    Mem = 7,
    Rtr = 8,
    TxAck = 9,
    PowerUp = 10,
    CmdNo = 11,
    CanParams = 12,
    Aborted = 13,
    CanState = 14,
    Reset = 15,
    XCan = 16,
    XRtr = 17,
    Info = 18,
    Control = 19,
    Confirm = 20,
    Overrun = 21,
    Keepalive = 22,
    CanError = 23,
    Disconnected = 24,
    ErrCounter = 25,
    CanFd = 26,
}

impl FrameType {
    pub fn from_code(code: u8) -> Option<Self> {
        let frame_type = match code {
            0 => FrameType::Resync,
            1 => FrameType::Can,
            2 => FrameType::Busload,
            3 => FrameType::String,
            4 => FrameType::Conti,
            7 => FrameType::Mem,
            8 => FrameType::Rtr,
            9 => FrameType::TxAck,
            10 => FrameType::PowerUp,
            11 => FrameType::CmdNo,
            12 => FrameType::CanParams,
            13 => FrameType::Aborted,
            14 => FrameType::CanState,
            15 => FrameType::Reset,
            16 => FrameType::XCan,
            17 => FrameType::XRtr,
            18 => FrameType::Info,
            19 => FrameType::Control,
            20 => FrameType::Confirm,
            21 => FrameType::Overrun,
            22 => FrameType::Keepalive,
            23 => FrameType::CanError,
            24 => FrameType::Disconnected,
            25 => FrameType::ErrCounter,
            26 => FrameType::CanFd,
            _ => return None,
        };
        Some(frame_type)
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Flags byte of an FD payload
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FdFlags: u8 {
        const ESI = 0x08;
        const RTR = 0x10;
        /// Marks a classic frame carried in an FD payload
        const NONCANFD = 0x20;
        const BRS = 0x40;
        const XTD = 0x80;
    }
}

bitflags! {
    /// Controller state reported by a bus-state frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CanState: u8 {
        const ERROR = 0x40;
        const BUSOFF = 0x80;
    }
}

bitflags! {
    /// Queues affected by an overrun report
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OverrunEvent: u8 {
        const CAN = 0x01;
        const CANSTATE = 0x02;
        const BUSERROR = 0x04;
        const HW = 0x80;
    }
}

/// Common frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub frame_type: u8,
    pub length: u8,
    pub msg_id: u8,
    pub ts_sec: u32,
    pub ts_nsec: u32,
}

/// Controller registers attached to a bus error report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRegisters {
    Sja1000 { ecc: u8, rxerr: u8, txerr: u8 },
    Lpc546xx { psr: u32, ecr: u32 },
    /// Reported by a controller whose layout is not known
    Other(u8),
}

/// Decoded payload of a wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// Classic data or remote frame; `data` is empty for remote frames
    Classic {
        id: u32,
        len: u8,
        data: Vec<u8>,
        extended: bool,
        remote: bool,
    },
    Fd {
        id: u32,
        len: u8,
        flags: FdFlags,
        data: Vec<u8>,
    },
    Info {
        source: u8,
        info_type: u8,
        text: String,
    },
    BusState(CanState),
    BusError {
        ecode: u8,
        registers: ErrorRegisters,
    },
    Params(ControllerParams),
    Disconnected,
    ErrorCounter {
        rx: u8,
        tx: u8,
    },
    Overrun {
        event: OverrunEvent,
        count: u8,
    },
    Busload(u8),
    /// Known frame type carrying nothing the adapter uses
    Housekeeping(FrameType),
    Unrecognized(u8),
}

/// A decoded wire frame
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub header: FrameHeader,
    pub body: FrameBody,
}

impl WireFrame {
    /// The bus message carried by this frame, if any
    pub fn into_message(self) -> Option<Message> {
        let mut message = Message {
            timestamp_secs: self.header.ts_sec,
            timestamp_nanos: self.header.ts_nsec,
            ..Message::default()
        };
        match self.body {
            FrameBody::Classic {
                id,
                len,
                data,
                extended,
                remote,
            } => {
                message.arbitration_id = id;
                message.dlc = len;
                message.data = data;
                message.is_extended_id = extended;
                message.is_remote_frame = remote;
            }
            FrameBody::Fd {
                id,
                len,
                flags,
                data,
            } => {
                let is_fd = !flags.contains(FdFlags::NONCANFD);
                message.arbitration_id = id;
                message.dlc = len;
                message.data = data;
                message.is_extended_id = flags.contains(FdFlags::XTD);
                message.is_remote_frame = flags.contains(FdFlags::RTR);
                message.error_state_indicator = flags.contains(FdFlags::ESI);
                message.is_fd = is_fd;
                message.bitrate_switch = is_fd && flags.contains(FdFlags::BRS);
            }
            FrameBody::BusError { ecode, registers } => {
                message.is_error_frame = true;
                if ecode == ECODE_ERRFRAME {
                    message.data = match registers {
                        ErrorRegisters::Sja1000 { ecc, rxerr, txerr } => vec![ecc, rxerr, txerr],
                        ErrorRegisters::Lpc546xx { psr, ecr } => {
                            let mut data = psr.to_le_bytes().to_vec();
                            data.extend_from_slice(&ecr.to_le_bytes());
                            data
                        }
                        ErrorRegisters::Other(_) => Vec::new(),
                    };
                    message.dlc = message.data.len() as u8;
                }
            }
            _ => return None,
        }
        Some(message)
    }

    /// Controller family that reported a bus error
    pub fn error_family(&self) -> Option<ControllerFamily> {
        match &self.body {
            FrameBody::BusError { registers, .. } => match registers {
                ErrorRegisters::Sja1000 { .. } => Some(ControllerFamily::Sja1000),
                ErrorRegisters::Lpc546xx { .. } => Some(ControllerFamily::Lpc546xx),
                ErrorRegisters::Other(_) => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: FrameBody) -> WireFrame {
        WireFrame {
            header: FrameHeader {
                ts_sec: 3,
                ts_nsec: 250,
                ..FrameHeader::default()
            },
            body,
        }
    }

    #[test]
    fn test_frame_type_codes() {
        for code in 0..=30u8 {
            if let Some(t) = FrameType::from_code(code) {
                assert_eq!(t.code(), code);
            }
        }
        assert_eq!(FrameType::from_code(5), None);
        assert_eq!(FrameType::from_code(26), Some(FrameType::CanFd));
    }

    #[test]
    fn test_fd_frame_noncanfd_is_classic() {
        let msg = frame(FrameBody::Fd {
            id: 0x42,
            len: 2,
            flags: FdFlags::NONCANFD | FdFlags::BRS,
            data: vec![1, 2],
        })
        .into_message()
        .unwrap();
        assert!(!msg.is_fd);
        assert!(!msg.bitrate_switch);
        assert_eq!(msg.timestamp_secs, 3);
        assert_eq!(msg.timestamp_nanos, 250);
    }

    #[test]
    fn test_error_frame_payloads() {
        let sja = frame(FrameBody::BusError {
            ecode: ECODE_ERRFRAME,
            registers: ErrorRegisters::Sja1000 {
                ecc: 1,
                rxerr: 2,
                txerr: 3,
            },
        });
        assert_eq!(sja.error_family(), Some(ControllerFamily::Sja1000));
        let msg = sja.into_message().unwrap();
        assert!(msg.is_error_frame);
        assert_eq!(msg.data, vec![1, 2, 3]);
        assert_eq!(msg.dlc, 3);

        let lpc = frame(FrameBody::BusError {
            ecode: ECODE_ERRFRAME,
            registers: ErrorRegisters::Lpc546xx {
                psr: 0x0102_0304,
                ecr: 0x0506_0708,
            },
        })
        .into_message()
        .unwrap();
        assert_eq!(lpc.data, vec![4, 3, 2, 1, 8, 7, 6, 5]);

        let other = frame(FrameBody::BusError {
            ecode: 2,
            registers: ErrorRegisters::Sja1000 {
                ecc: 1,
                rxerr: 2,
                txerr: 3,
            },
        })
        .into_message()
        .unwrap();
        assert!(other.is_error_frame);
        assert!(other.data.is_empty());
    }

    #[test]
    fn test_non_deliverable_frames() {
        assert!(frame(FrameBody::BusState(CanState::BUSOFF))
            .into_message()
            .is_none());
        assert!(frame(FrameBody::Disconnected).into_message().is_none());
        assert!(frame(FrameBody::Unrecognized(99)).into_message().is_none());
    }
}
