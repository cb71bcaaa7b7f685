//! Device transport capability
//!
//! The adapter never talks to the vendor library directly. Everything it needs from the
//! host side (opening channels, applying controller parameters, moving raw frames) goes
//! through the [`DeviceTransport`] trait, which the CLI implements on top of the
//! dynamically loaded CPC library and the tests implement with a scripted mock.

use bitflags::bitflags;
use std::fmt;

use crate::timing::ControllerParams;

#[cfg(test)]
pub(crate) mod mock;

/// Timeout value meaning "wait forever"
pub const WAIT_INFINITE: u32 = 0xFFFF_FFFF;

/// Vendor-issued channel handle
///
/// Negative values are error codes in the vendor API; a `ChannelHandle` is only ever
/// constructed for a successfully opened channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub i32);

impl ChannelHandle {
    /// Returns true if the raw handle value denotes an open channel
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

/// Identifier handed to the transport when opening a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    /// Section name from the system channel configuration (e.g. "CHAN00")
    Name(String),
    /// JSON channel descriptor of the form `{"<name>": {"InterfaceType": ..., ...}}`
    Json(String),
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSpec::Name(name) => write!(f, "{}", name),
            ChannelSpec::Json(json) => write!(f, "{}", json),
        }
    }
}

bitflags! {
    /// Readiness events for `wait_for_event`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

/// Notification classes the device can be told to forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationClass {
    /// Received CAN messages
    Message,
    /// Controller state changes
    State,
    /// Bus error reports
    BusError,
}

impl NotificationClass {
    /// All classes enabled by a freshly opened session, in enable order
    pub const ALL: [NotificationClass; 3] = [
        NotificationClass::Message,
        NotificationClass::State,
        NotificationClass::BusError,
    ];

    /// Control selector used by `CPC_Control`
    pub fn control_code(&self) -> u16 {
        match self {
            NotificationClass::Message => 0x04,
            NotificationClass::State => 0x0C,
            NotificationClass::BusError => 0x1C,
        }
    }
}

impl fmt::Display for NotificationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationClass::Message => write!(f, "message"),
            NotificationClass::State => write!(f, "state"),
            NotificationClass::BusError => write!(f, "bus error"),
        }
    }
}

/// Vendor status codes (`CPC_ERR_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CpcError {
    #[error("CPC_ERR_NO_FREE_CHANNEL: no more free space within the channel array")]
    NoFreeChannel,
    #[error("CPC_ERR_CHANNEL_ALREADY_OPEN: the channel is already open")]
    ChannelAlreadyOpen,
    #[error("CPC_ERR_CHANNEL_NOT_ACTIVE: access to a channel not active failed")]
    ChannelNotActive,
    #[error("CPC_ERR_NO_DRIVER_PRESENT: no driver at the location searched by the library")]
    NoDriverPresent,
    #[error("CPC_ERR_NO_INIFILE_PRESENT: the library could not find the inifile")]
    NoIniFilePresent,
    #[error("CPC_ERR_WRONG_PARAMETERS: wrong parameters in the inifile")]
    WrongParameters,
    #[error("CPC_ERR_NO_INTERFACE_PRESENT: the interface is not connected or was disconnected")]
    NoInterfacePresent,
    #[error("CPC_ERR_NO_MATCHING_CHANNEL: the driver couldn't find a matching channel")]
    NoMatchingChannel,
    #[error("CPC_ERR_NO_BUFFER_AVAILABLE: the driver couldn't allocate buffer for messages")]
    NoBufferAvailable,
    #[error("CPC_ERR_NO_INTERRUPT: the requested interrupt couldn't be claimed")]
    NoInterrupt,
    #[error("CPC_ERR_NO_MATCHING_INTERFACE: no interface type related to this channel was found")]
    NoMatchingInterface,
    #[error("CPC_ERR_NO_RESOURCES: the requested resources could not be claimed")]
    NoResources,
    #[error("CPC_ERR_SOCKET: error concerning TCP sockets")]
    Socket,
    #[error("CPC_ERR_WRONG_CONTROLLER_TYPE: wrong CAN controller type within initialization")]
    WrongControllerType,
    #[error("CPC_ERR_NO_RESET_MODE: the controller could not be set into reset mode")]
    NoResetMode,
    #[error("CPC_ERR_NO_CAN_ACCESS: the CAN controller could not be accessed")]
    NoCanAccess,
    #[error("CPC_ERR_INVALID_CANPARAMS: the CAN controller init params are invalid")]
    InvalidCanParams,
    #[error("CPC_ERR_CAN_WRONG_ID: the provided CAN id is too big")]
    CanWrongId,
    #[error("CPC_ERR_CAN_WRONG_LENGTH: the provided CAN length is too long")]
    CanWrongLength,
    #[error("CPC_ERR_CAN_NO_TRANSMIT_BUF: the transmit buffer was occupied")]
    CanNoTransmitBuf,
    #[error("CPC_ERR_CAN_TRANSMIT_TIMEOUT: the message could not be sent within a specified time")]
    CanTransmitTimeout,
    #[error("CPC_ERR_CAN_WRONG_FDFLAGS: wrong flags within a CAN FD message")]
    CanWrongFdFlags,
    #[error("CPC_ERR_SERVICE_NOT_SUPPORTED: the requested service is not supported by the interface")]
    ServiceNotSupported,
    #[error("CPC_ERR_IO_TRANSFER: a transmission error down to the driver occurred")]
    IoTransfer,
    #[error("CPC_ERR_TRANSMISSION_FAILED: a transmission error down to the interface occurred")]
    TransmissionFailed,
    #[error("CPC_ERR_TRANSMISSION_TIMEOUT: a timeout occurred within transmission to the interface")]
    TransmissionTimeout,
    #[error("CPC_ERR_OP_SYS_NOT_SUPPORTED: the operating system is not supported")]
    OpSysNotSupported,
    #[error("CPC_ERR_UNKNOWN: an unknown error occurred (mostly IOCTL errors)")]
    Unknown,
    #[error("CPC_ERR_LOADING_DLL: the vendor library could not be loaded")]
    LoadingDll,
    #[error("CPC_ERR_ASSIGNING_FUNCTION: the specified function could not be assigned")]
    AssigningFunction,
    #[error("CPC_ERR_DLL_INITIALIZATION: the library was not initialized correctly")]
    DllInitialization,
    #[error("CPC_ERR_MISSING_LICFILE: the file containing the licenses does not exist")]
    MissingLicFile,
    #[error("CPC_ERR_MISSING_LICENSE: a required license was not found")]
    MissingLicense,
    #[error("Unknown CPC_ERR_ value ({0})")]
    Other(i32),
}

impl CpcError {
    /// Map a negative vendor status code to its variant
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => CpcError::NoFreeChannel,
            -2 => CpcError::ChannelAlreadyOpen,
            -3 => CpcError::ChannelNotActive,
            -4 => CpcError::NoDriverPresent,
            -5 => CpcError::NoIniFilePresent,
            -6 => CpcError::WrongParameters,
            -7 => CpcError::NoInterfacePresent,
            -8 => CpcError::NoMatchingChannel,
            -9 => CpcError::NoBufferAvailable,
            -10 => CpcError::NoInterrupt,
            -11 => CpcError::NoMatchingInterface,
            -12 => CpcError::NoResources,
            -13 => CpcError::Socket,
            -14 => CpcError::WrongControllerType,
            -15 => CpcError::NoResetMode,
            -16 => CpcError::NoCanAccess,
            -17 => CpcError::InvalidCanParams,
            -20 => CpcError::CanWrongId,
            -21 => CpcError::CanWrongLength,
            -22 => CpcError::CanNoTransmitBuf,
            -23 => CpcError::CanTransmitTimeout,
            -24 => CpcError::CanWrongFdFlags,
            -30 => CpcError::ServiceNotSupported,
            -31 => CpcError::IoTransfer,
            -32 => CpcError::TransmissionFailed,
            -33 => CpcError::TransmissionTimeout,
            -35 => CpcError::OpSysNotSupported,
            -40 => CpcError::Unknown,
            -50 => CpcError::LoadingDll,
            -51 => CpcError::AssigningFunction,
            -52 => CpcError::DllInitialization,
            -55 => CpcError::MissingLicFile,
            -56 => CpcError::MissingLicense,
            other => CpcError::Other(other),
        }
    }

    /// The vendor status code
    pub fn code(&self) -> i32 {
        match self {
            CpcError::NoFreeChannel => -1,
            CpcError::ChannelAlreadyOpen => -2,
            CpcError::ChannelNotActive => -3,
            CpcError::NoDriverPresent => -4,
            CpcError::NoIniFilePresent => -5,
            CpcError::WrongParameters => -6,
            CpcError::NoInterfacePresent => -7,
            CpcError::NoMatchingChannel => -8,
            CpcError::NoBufferAvailable => -9,
            CpcError::NoInterrupt => -10,
            CpcError::NoMatchingInterface => -11,
            CpcError::NoResources => -12,
            CpcError::Socket => -13,
            CpcError::WrongControllerType => -14,
            CpcError::NoResetMode => -15,
            CpcError::NoCanAccess => -16,
            CpcError::InvalidCanParams => -17,
            CpcError::CanWrongId => -20,
            CpcError::CanWrongLength => -21,
            CpcError::CanNoTransmitBuf => -22,
            CpcError::CanTransmitTimeout => -23,
            CpcError::CanWrongFdFlags => -24,
            CpcError::ServiceNotSupported => -30,
            CpcError::IoTransfer => -31,
            CpcError::TransmissionFailed => -32,
            CpcError::TransmissionTimeout => -33,
            CpcError::OpSysNotSupported => -35,
            CpcError::Unknown => -40,
            CpcError::LoadingDll => -50,
            CpcError::AssigningFunction => -51,
            CpcError::DllInitialization => -52,
            CpcError::MissingLicFile => -55,
            CpcError::MissingLicense => -56,
            CpcError::Other(code) => *code,
        }
    }

    /// Interpret a raw status return: zero and positive values are success
    pub fn check(status: i32) -> Result<(), CpcError> {
        if status >= 0 {
            Ok(())
        } else {
            Err(CpcError::from_code(status))
        }
    }
}

/// Host-side access to one CPC device library
///
/// Every method mirrors one vendor call. Implementations must not interpret frames:
/// `send` receives an encoded frame and `poll_frame` returns the raw bytes of the next
/// pending frame.
pub trait DeviceTransport {
    /// Open a channel by name or JSON descriptor
    fn open(&mut self, channel: &ChannelSpec) -> Result<ChannelHandle, CpcError>;

    /// Close a previously opened channel
    fn close(&mut self, handle: ChannelHandle) -> Result<(), CpcError>;

    /// Write controller parameters into the init block and initialise the controller
    fn apply_params(
        &mut self,
        handle: ChannelHandle,
        params: &ControllerParams,
    ) -> Result<(), CpcError>;

    /// Transmit one encoded frame
    fn send(&mut self, handle: ChannelHandle, frame: &[u8]) -> Result<(), CpcError>;

    /// Block up to `timeout_ms` until one of `events` is ready, returning the ready set
    fn wait_for_event(
        &mut self,
        handle: ChannelHandle,
        timeout_ms: u32,
        events: EventMask,
    ) -> Result<EventMask, CpcError>;

    /// Next pending frame, or `None` when the receive queue is empty
    fn poll_frame(&mut self, handle: ChannelHandle) -> Option<Vec<u8>>;

    /// Drop pending commands and received frames
    fn clear_queues(&mut self, handle: ChannelHandle) -> Result<(), CpcError>;

    /// Drop pending commands only
    fn clear_command_queue(&mut self, handle: ChannelHandle) -> Result<(), CpcError>;

    /// Switch forwarding of one notification class on or off
    fn enable_notification(
        &mut self,
        handle: ChannelHandle,
        class: NotificationClass,
        on: bool,
    ) -> Result<(), CpcError>;

    /// Ask the interface or driver for an info string; the answer arrives as an info frame
    fn request_info(
        &mut self,
        handle: ChannelHandle,
        source: u8,
        info_type: u8,
    ) -> Result<(), CpcError>;

    /// Info string the library can answer synchronously
    fn cached_info(&mut self, handle: ChannelHandle, source: u8, info_type: u8)
        -> Option<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in [-1, -7, -14, -17, -22, -31, -40, -51, -56] {
            assert_eq!(CpcError::from_code(code).code(), code);
        }
        assert_eq!(CpcError::from_code(-99), CpcError::Other(-99));
        assert_eq!(CpcError::Other(-99).code(), -99);
    }

    #[test]
    fn test_status_check() {
        assert!(CpcError::check(0).is_ok());
        assert!(CpcError::check(3).is_ok());
        assert_eq!(CpcError::check(-14), Err(CpcError::WrongControllerType));
    }

    #[test]
    fn test_error_messages() {
        assert!(CpcError::WrongControllerType
            .to_string()
            .starts_with("CPC_ERR_WRONG_CONTROLLER_TYPE"));
        assert_eq!(CpcError::Other(-99).to_string(), "Unknown CPC_ERR_ value (-99)");
    }

    #[test]
    fn test_handle_validity() {
        assert!(ChannelHandle(0).is_valid());
        assert!(!ChannelHandle(-7).is_valid());
    }
}
