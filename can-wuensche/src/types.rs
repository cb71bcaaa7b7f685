//! Core types for the CPC bus adapter
//!
//! This module defines the bus-level message model, the bus state enumeration and the
//! error type shared by every layer of the adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timing::ControllerFamily;
use crate::transport::{CpcError, NotificationClass};

/// Timestamp type used throughout the adapter
pub type Timestamp = DateTime<Utc>;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, WuenscheError>;

/// Highest standard (11-bit) arbitration id
pub const STANDARD_ID_MASK: u32 = 0x0000_07FF;

/// Highest extended (29-bit) arbitration id
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Payload capacity of a classic CAN frame
pub const CLASSIC_MAX_LEN: usize = 8;

/// Payload capacity of a CAN-FD frame
pub const FD_MAX_LEN: usize = 64;

/// A bus-level CAN message
///
/// `dlc` is the payload length in bytes (for FD frames as well). Remote frames carry a
/// requested length in `dlc` but no payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Seconds part of the device timestamp
    pub timestamp_secs: u32,
    /// Sub-second part of the device timestamp, in nanoseconds
    pub timestamp_nanos: u32,
    /// CAN message ID (11-bit or 29-bit)
    pub arbitration_id: u32,
    /// Data length in bytes
    pub dlc: u8,
    /// Payload bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended_id: bool,
    /// True if this is a remote frame
    pub is_remote_frame: bool,
    /// True if this is an error frame
    pub is_error_frame: bool,
    /// True if this is a CAN-FD frame
    pub is_fd: bool,
    /// FD bit rate switch
    pub bitrate_switch: bool,
    /// FD error state indicator
    pub error_state_indicator: bool,
}

impl Message {
    /// Classic data frame with a standard id
    pub fn new_standard(id: u32, data: &[u8]) -> Self {
        Self {
            arbitration_id: id,
            dlc: data.len() as u8,
            data: data.to_vec(),
            ..Self::default()
        }
    }

    /// Classic data frame with an extended id
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self {
            is_extended_id: true,
            ..Self::new_standard(id, data)
        }
    }

    /// Remote request frame asking for `dlc` bytes
    pub fn new_remote(id: u32, dlc: u8, extended: bool) -> Self {
        Self {
            arbitration_id: id,
            dlc,
            is_extended_id: extended,
            is_remote_frame: true,
            ..Self::default()
        }
    }

    /// CAN-FD data frame
    pub fn new_fd(id: u32, data: &[u8], extended: bool, bitrate_switch: bool) -> Self {
        Self {
            is_extended_id: extended,
            is_fd: true,
            bitrate_switch,
            ..Self::new_standard(id, data)
        }
    }

    /// Payload capacity implied by the `is_fd` flag
    pub fn capacity(&self) -> usize {
        if self.is_fd {
            FD_MAX_LEN
        } else {
            CLASSIC_MAX_LEN
        }
    }

    /// Convert the device timestamp to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        DateTime::from_timestamp(self.timestamp_secs as i64, self.timestamp_nanos)
            .unwrap_or_default()
    }

    /// Device timestamp as fractional seconds
    pub fn timestamp_secs_f64(&self) -> f64 {
        self.timestamp_secs as f64 + self.timestamp_nanos as f64 / 1_000_000_000.0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended_id {
            write!(f, "{:08X}", self.arbitration_id)?;
        } else {
            write!(f, "{:03X}", self.arbitration_id)?;
        }
        let mut kind = String::new();
        if self.is_error_frame {
            kind.push('E');
        }
        if self.is_remote_frame {
            kind.push('R');
        }
        if self.is_fd {
            kind.push('F');
        }
        if self.bitrate_switch {
            kind.push('B');
        }
        if self.error_state_indicator {
            kind.push('I');
        }
        write!(f, " [{:2}]", self.dlc)?;
        if !kind.is_empty() {
            write!(f, " {kind}")?;
        }
        for byte in &self.data {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

/// Operational state of the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusState {
    /// Normal operation: receive, transmit and acknowledge
    #[default]
    Active,
    /// Listen-only operation
    Passive,
    /// Bus-off or controller not initialised
    Error,
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusState::Active => write!(f, "Active"),
            BusState::Passive => write!(f, "Passive"),
            BusState::Error => write!(f, "Error"),
        }
    }
}

/// Errors that can occur while driving a CPC channel
#[derive(Debug, thiserror::Error)]
pub enum WuenscheError {
    #[error("Failed to open channel '{channel}': {source}")]
    ChannelOpenFailed {
        channel: String,
        #[source]
        source: CpcError,
    },

    #[error("Failed to enable {class} notifications: {source}")]
    NotificationEnableFailed {
        class: NotificationClass,
        #[source]
        source: CpcError,
    },

    #[error("Not supported by the {family} controller: {reason}")]
    UnsupportedByController {
        family: ControllerFamily,
        reason: String,
    },

    #[error("No suitable bit timing: {0}")]
    NoSuitableTiming(String),

    #[error("Controller family mismatch: expected {expected}, found {found}")]
    ControllerFamilyMismatch {
        expected: ControllerFamily,
        found: ControllerFamily,
    },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unsupported message shape: {0}")]
    UnsupportedMessageShape(String),

    #[error("Timed out waiting for transmit buffer space")]
    SendTimeout,

    #[error("Failed to send: {0}")]
    SendFailed(#[source] CpcError),

    #[error("Failed to receive: {0}")]
    ReceiveFailed(#[source] CpcError),

    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Bus state {0} cannot be requested, use Active or Passive")]
    InvalidStateRequest(BusState),

    #[error("Failed to convert timeout value: {0}")]
    TimeoutConversionError(String),

    #[error("Device rejected controller parameters: {0}")]
    ConfigurationFailed(#[source] CpcError),

    #[error("Channel is not open")]
    ChannelClosed,

    #[error("Unknown info key: {0}")]
    UnknownInfoKey(String),

    #[error("Device error: {0}")]
    Device(#[source] CpcError),
}

impl WuenscheError {
    /// Vendor status code carried by this error, if any
    pub fn device_code(&self) -> Option<i32> {
        match self {
            WuenscheError::ChannelOpenFailed { source, .. }
            | WuenscheError::NotificationEnableFailed { source, .. } => Some(source.code()),
            WuenscheError::SendFailed(e)
            | WuenscheError::ReceiveFailed(e)
            | WuenscheError::ConfigurationFailed(e)
            | WuenscheError::Device(e) => Some(e.code()),
            WuenscheError::DeviceDisconnected => Some(CpcError::NoInterfacePresent.code()),
            WuenscheError::ChannelClosed => Some(CpcError::ChannelNotActive.code()),
            _ => None,
        }
    }
}
