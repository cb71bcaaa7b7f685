//! Dynamically loaded CPC vendor library
//!
//! Wraps `libcpc.so` / `cpcwin.dll` and implements [`DeviceTransport`] on top of it.
//! Functions the library does not export resolve to `CPC_ERR_ASSIGNING_FUNCTION` when
//! called, except for the essential ones, whose absence fails the load.

use std::ffi::{c_char, c_int, c_uchar, c_ushort, CStr, CString, OsStr};

use can_wuensche::timing::{ControllerParams, PARAMS_LEN};
use can_wuensche::wire::{FrameType, FRAME_LEN, HEADER_LEN};
use can_wuensche::{
    ChannelHandle, ChannelSpec, CpcError, DeviceTransport, EventMask, NotificationClass,
};
use libloading::Library;

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
const LIBRARY_CANDIDATES: &[&str] = &[
    "libcpc.so",
    "/usr/local/lib/lib64/libcpc.so",
    "/usr/local/lib64/libcpc.so",
];

#[cfg(all(target_os = "linux", not(target_pointer_width = "64")))]
const LIBRARY_CANDIDATES: &[&str] = &[
    "libcpc.so",
    "/usr/local/lib/lib32/libcpc.so",
    "/usr/local/lib/libcpc.so",
];

#[cfg(windows)]
const LIBRARY_CANDIDATES: &[&str] = &["cpcwin.dll", "C:\\Windows\\System32\\cpcwin.dll"];

#[cfg(not(any(target_os = "linux", windows)))]
const LIBRARY_CANDIDATES: &[&str] = &[];

/// Oldest library release with the functions used here
#[cfg(windows)]
const REQUIRED_VERSION: Option<[u32; 4]> = Some([3, 0, 2, 1]);

#[cfg(not(windows))]
const REQUIRED_VERSION: Option<[u32; 4]> = None;

/// Offset of the CAN parameters inside the init parameter block
#[cfg(windows)]
const INIT_PARAMS_OFFSET: usize = 0;

/// Linux prefixes the CAN parameters with the channel parameters (`int fd`)
#[cfg(not(windows))]
const INIT_PARAMS_OFFSET: usize = 4;

const CONTROL_ON: c_ushort = 0x01;
const CONTROL_OFF: c_ushort = 0x00;

type OpenChannelFn = unsafe extern "system" fn(*const c_char) -> c_int;
type CloseChannelFn = unsafe extern "system" fn(c_int) -> c_int;
type CanInitFn = unsafe extern "system" fn(c_int, c_uchar) -> c_int;
type GetInitParamsPtrFn = unsafe extern "system" fn(c_int) -> *mut u8;
type ControlFn = unsafe extern "system" fn(c_int, c_ushort) -> c_int;
type HandleFn = unsafe extern "system" fn(c_int) -> *const u8;
type SendFn = unsafe extern "system" fn(c_int, c_uchar, *const u8) -> c_int;
type WaitForEventFn = unsafe extern "system" fn(c_int, c_int, c_uchar) -> c_int;
type ClearMsgQueueFn = unsafe extern "system" fn(c_int) -> c_int;
type ClearCmdQueueFn = unsafe extern "system" fn(c_int, c_uchar) -> c_int;
type RequestInfoFn = unsafe extern "system" fn(c_int, c_uchar, c_uchar, c_uchar) -> c_int;
type GetInfoFn = unsafe extern "system" fn(c_int, c_uchar, c_uchar) -> *const c_char;
type GetLibVersionFn = unsafe extern "system" fn() -> *const c_char;
type CreateChannelListJsonFn = unsafe extern "system" fn(*mut c_int) -> *mut c_char;
type DeleteChannelListJsonFn = unsafe extern "system" fn(*mut c_char) -> c_int;

/// Errors raised while loading the vendor library
#[derive(Debug, thiserror::Error)]
pub enum CpcLibraryError {
    #[error("Couldn't load {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("No CPC library location is known for this platform")]
    UnsupportedPlatform,

    #[error("Essential function {0} is missing from the CPC library")]
    MissingFunction(&'static str),

    #[error("Failed to acquire library version: {0}")]
    Version(String),

    #[error("Installed library version {found} is older than the required {required}")]
    TooOld { found: String, required: String },
}

/// Entry points of a loaded CPC library
pub struct CpcLibrary {
    path: String,
    version: Option<String>,

    open_channel: OpenChannelFn,
    close_channel: CloseChannelFn,
    can_init: CanInitFn,
    get_init_params_ptr: GetInitParamsPtrFn,
    control: ControlFn,
    handle: HandleFn,
    send_msg: SendFn,
    send_msg_fd: SendFn,

    open_channel_json: Option<OpenChannelFn>,
    send_xmsg: Option<SendFn>,
    send_rtr: Option<SendFn>,
    send_xrtr: Option<SendFn>,
    wait_for_event: Option<WaitForEventFn>,
    clear_msg_queue: Option<ClearMsgQueueFn>,
    clear_cmd_queue: Option<ClearCmdQueueFn>,
    request_info: Option<RequestInfoFn>,
    get_info: Option<GetInfoFn>,
    create_channel_list_json: Option<CreateChannelListJsonFn>,
    delete_channel_list_json: Option<DeleteChannelListJsonFn>,

    // keeps the function pointers above valid
    _library: Library,
}

/// Copy an exported function pointer out of the library
///
/// # Safety
/// `T` must match the exported function's signature.
unsafe fn symbol<T: Copy>(library: &Library, name: &str) -> Option<T> {
    library.get::<T>(name.as_bytes()).ok().map(|s| *s)
}

unsafe fn essential<T: Copy>(library: &Library, name: &'static str) -> Result<T, CpcLibraryError> {
    symbol(library, name).ok_or(CpcLibraryError::MissingFunction(name))
}

fn optional<T>(function: Option<T>) -> Result<T, CpcError> {
    function.ok_or(CpcError::AssigningFunction)
}

impl CpcLibrary {
    /// Load the library from the platform's default locations
    pub fn load() -> Result<Self, CpcLibraryError> {
        let mut first_error = None;
        for path in LIBRARY_CANDIDATES {
            match Self::load_from(path) {
                Ok(library) => return Ok(library),
                Err(e) => {
                    log::debug!("{}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(CpcLibraryError::UnsupportedPlatform))
    }

    /// Load the library from an explicit path
    pub fn load_from(path: impl AsRef<OsStr>) -> Result<Self, CpcLibraryError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().into_owned();
        // SAFETY: loading runs the vendor library's initialisers
        let library = unsafe { Library::new(path) }.map_err(|source| CpcLibraryError::Load {
            path: display.clone(),
            source,
        })?;

        // SAFETY: the signatures follow the vendor header
        let loaded = unsafe {
            let get_lib_version: Option<GetLibVersionFn> = symbol(&library, "CPC_GetLibVersion");
            let version = match get_lib_version {
                Some(f) => c_string(f()),
                None => None,
            };
            check_version(get_lib_version.is_some(), version.as_deref())?;

            Self {
                path: display,
                version,
                open_channel: essential(&library, "CPC_OpenChannel")?,
                close_channel: essential(&library, "CPC_CloseChannel")?,
                can_init: essential(&library, "CPC_CANInit")?,
                get_init_params_ptr: essential(&library, "CPC_GetInitParamsPtr")?,
                control: essential(&library, "CPC_Control")?,
                handle: essential(&library, "CPC_Handle")?,
                send_msg: essential(&library, "CPC_SendMsg")?,
                send_msg_fd: essential(&library, "CPC_SendMsgFD")?,
                open_channel_json: symbol(&library, "CPC_OpenChannelJSON"),
                send_xmsg: symbol(&library, "CPC_SendXMsg"),
                send_rtr: symbol(&library, "CPC_SendRTR"),
                send_xrtr: symbol(&library, "CPC_SendXRTR"),
                wait_for_event: symbol(&library, "CPC_WaitForEvent"),
                clear_msg_queue: symbol(&library, "CPC_ClearMSGQueue"),
                clear_cmd_queue: symbol(&library, "CPC_ClearCMDQueue"),
                request_info: symbol(&library, "CPC_RequestInfo"),
                get_info: symbol(&library, "CPC_GetInfo"),
                create_channel_list_json: symbol(&library, "CPC_CreateChannelListJSON"),
                delete_channel_list_json: symbol(&library, "CPC_DeleteChannelListJSON"),
                _library: library,
            }
        };

        log::info!(
            "Loaded CPC library {} (version {})",
            loaded.path,
            loaded.version.as_deref().unwrap_or("unknown")
        );
        Ok(loaded)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Version string reported by the library, if it exports one
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Channel list as JSON text, if the library can provide one
    pub fn channel_list_json(&self) -> Option<String> {
        let create = self.create_channel_list_json?;
        let mut length: c_int = 0;
        // SAFETY: the library returns a buffer of `length` bytes owned by itself
        unsafe {
            let raw = create(&mut length);
            if raw.is_null() {
                return None;
            }
            let json = if length > 0 {
                let bytes = std::slice::from_raw_parts(raw as *const u8, length as usize);
                let text = String::from_utf8_lossy(bytes);
                Some(text.trim_end_matches('\0').to_string())
            } else {
                None
            };
            if let Some(delete) = self.delete_channel_list_json {
                delete(raw);
            }
            json
        }
    }
}

/// Read a NUL-terminated string returned by the library
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Parse a dotted library version; a trailing `d` marks a debug build
fn parse_version(version: &str) -> Option<Vec<u32>> {
    let version = version.trim();
    let version = version.strip_suffix('d').unwrap_or(version);
    let parts = version
        .split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

fn check_version(exported: bool, version: Option<&str>) -> Result<(), CpcLibraryError> {
    let Some(required) = REQUIRED_VERSION else {
        return Ok(());
    };
    if !exported {
        return Err(CpcLibraryError::MissingFunction("CPC_GetLibVersion"));
    }
    let version = version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CpcLibraryError::Version("empty version string".to_string()))?;
    let parsed = parse_version(version)
        .ok_or_else(|| CpcLibraryError::Version(format!("cannot parse '{}'", version)))?;
    if parsed.as_slice() < required.as_slice() {
        return Err(CpcLibraryError::TooOld {
            found: version.to_string(),
            required: required.map(|p| p.to_string()).join("."),
        });
    }
    Ok(())
}

impl DeviceTransport for CpcLibrary {
    fn open(&mut self, channel: &ChannelSpec) -> Result<ChannelHandle, CpcError> {
        let (open, text) = match channel {
            ChannelSpec::Name(name) => (self.open_channel, name),
            ChannelSpec::Json(json) => (optional(self.open_channel_json)?, json),
        };
        let text = CString::new(text.as_str()).map_err(|_| CpcError::NoMatchingChannel)?;
        // SAFETY: `text` outlives the call
        let handle = unsafe { open(text.as_ptr()) };
        CpcError::check(handle)?;
        Ok(ChannelHandle(handle))
    }

    fn close(&mut self, handle: ChannelHandle) -> Result<(), CpcError> {
        CpcError::check(unsafe { (self.close_channel)(handle.0) })
    }

    fn apply_params(
        &mut self,
        handle: ChannelHandle,
        params: &ControllerParams,
    ) -> Result<(), CpcError> {
        // SAFETY: the init block holds the channel parameters followed by the packed
        // CAN parameters
        unsafe {
            let init = (self.get_init_params_ptr)(handle.0);
            if init.is_null() {
                return Err(CpcError::Unknown);
            }
            let bytes: [u8; PARAMS_LEN] = params.to_bytes();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), init.add(INIT_PARAMS_OFFSET), PARAMS_LEN);
            CpcError::check((self.can_init)(handle.0, 0))
        }
    }

    fn send(&mut self, handle: ChannelHandle, frame: &[u8]) -> Result<(), CpcError> {
        if frame.len() != FRAME_LEN {
            return Err(CpcError::CanWrongLength);
        }
        let send = match FrameType::from_code(frame[0]) {
            Some(FrameType::Can) => self.send_msg,
            Some(FrameType::CanFd) => self.send_msg_fd,
            Some(FrameType::XCan) => optional(self.send_xmsg)?,
            Some(FrameType::Rtr) => optional(self.send_rtr)?,
            Some(FrameType::XRtr) => optional(self.send_xrtr)?,
            _ => return Err(CpcError::ServiceNotSupported),
        };
        let confirm = frame[2];
        // SAFETY: the payload starts with the message layout the send function expects
        CpcError::check(unsafe { send(handle.0, confirm, frame[HEADER_LEN..].as_ptr()) })
    }

    fn wait_for_event(
        &mut self,
        handle: ChannelHandle,
        timeout_ms: u32,
        events: EventMask,
    ) -> Result<EventMask, CpcError> {
        let wait = optional(self.wait_for_event)?;
        // the library takes the infinite timeout as all bits set
        let result = unsafe { wait(handle.0, timeout_ms as c_int, events.bits()) };
        CpcError::check(result)?;
        Ok(EventMask::from_bits_truncate(result as u8))
    }

    fn poll_frame(&mut self, handle: ChannelHandle) -> Option<Vec<u8>> {
        // SAFETY: a non-null result points to one complete frame owned by the library
        unsafe {
            let frame = (self.handle)(handle.0);
            if frame.is_null() {
                return None;
            }
            Some(std::slice::from_raw_parts(frame, FRAME_LEN).to_vec())
        }
    }

    fn clear_queues(&mut self, handle: ChannelHandle) -> Result<(), CpcError> {
        self.clear_command_queue(handle)?;
        let clear = optional(self.clear_msg_queue)?;
        CpcError::check(unsafe { clear(handle.0) })
    }

    fn clear_command_queue(&mut self, handle: ChannelHandle) -> Result<(), CpcError> {
        let clear = optional(self.clear_cmd_queue)?;
        CpcError::check(unsafe { clear(handle.0, 0) })
    }

    fn enable_notification(
        &mut self,
        handle: ChannelHandle,
        class: NotificationClass,
        on: bool,
    ) -> Result<(), CpcError> {
        let value = class.control_code() | if on { CONTROL_ON } else { CONTROL_OFF };
        CpcError::check(unsafe { (self.control)(handle.0, value) })
    }

    fn request_info(
        &mut self,
        handle: ChannelHandle,
        source: u8,
        info_type: u8,
    ) -> Result<(), CpcError> {
        let request = optional(self.request_info)?;
        CpcError::check(unsafe { request(handle.0, 0, source, info_type) })
    }

    fn cached_info(&mut self, handle: ChannelHandle, source: u8, info_type: u8) -> Option<Vec<u8>> {
        let get = self.get_info?;
        // SAFETY: the returned string stays valid until the next call
        unsafe {
            let text = get(handle.0, source, info_type);
            if text.is_null() {
                return None;
            }
            Some(CStr::from_ptr(text).to_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.0.2.1"), Some(vec![3, 0, 2, 1]));
        assert_eq!(parse_version("6.1.0.4d"), Some(vec![6, 1, 0, 4]));
        assert_eq!(parse_version("3.x"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_version_ordering() {
        let required = [3u32, 0, 2, 1];
        assert!(vec![3u32, 0, 2, 0].as_slice() < required.as_slice());
        assert!(vec![3u32, 1].as_slice() > required.as_slice());
        assert!(vec![3u32, 0, 2, 1, 5].as_slice() > required.as_slice());
    }

    #[test]
    fn test_load_missing_library() {
        let err = CpcLibrary::load_from("/nonexistent/libcpc-missing.so")
            .err()
            .unwrap();
        assert!(matches!(err, CpcLibraryError::Load { .. }));
        assert!(err.to_string().contains("libcpc-missing.so"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_version_not_required() {
        assert!(check_version(false, None).is_ok());
    }
}
