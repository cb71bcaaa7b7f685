//! Scripted in-memory transport for unit tests

use std::collections::{HashMap, VecDeque};

use super::{ChannelHandle, ChannelSpec, CpcError, DeviceTransport, EventMask, NotificationClass};
use crate::timing::{ControllerFamily, ControllerParams};

/// Mock transport recording every call and replaying queued frames
#[derive(Debug)]
pub(crate) struct MockTransport {
    /// Channel names accepted by `open`
    pub known_channels: Vec<String>,
    /// Families the device answers with `WrongControllerType`
    pub rejected_families: Vec<ControllerFamily>,
    /// Error returned by every `apply_params`, if set
    pub apply_error: Option<CpcError>,
    /// Error returned by `enable_notification` for one class
    pub notification_error: Option<(NotificationClass, CpcError)>,
    /// Error returned by `wait_for_event`, if set
    pub wait_error: Option<CpcError>,
    /// Error returned by `send`, if set
    pub send_error: Option<CpcError>,
    /// Whether write readiness is reported
    pub write_ready: bool,
    /// Whether sent frames are queued back for reception
    pub loopback: bool,
    /// Frames pending reception
    pub rx: VecDeque<Vec<u8>>,
    /// Library-sourced info answers
    pub library_info: HashMap<(u8, u8), Vec<u8>>,

    pub opened: Vec<ChannelSpec>,
    pub closed: Vec<ChannelHandle>,
    pub applied: Vec<ControllerParams>,
    pub sent: Vec<Vec<u8>>,
    pub notifications: Vec<(NotificationClass, bool)>,
    pub info_requests: Vec<(u8, u8)>,
    pub waits: Vec<(u32, EventMask)>,
    pub queue_clears: usize,
    pub command_clears: usize,
    next_handle: i32,
}

impl MockTransport {
    /// Mock that knows a single channel named `CHAN00`
    pub fn new() -> Self {
        Self::with_channels(&["CHAN00"])
    }

    pub fn with_channels(names: &[&str]) -> Self {
        Self {
            known_channels: names.iter().map(|s| s.to_string()).collect(),
            rejected_families: Vec::new(),
            apply_error: None,
            notification_error: None,
            wait_error: None,
            send_error: None,
            write_ready: true,
            loopback: false,
            rx: VecDeque::new(),
            library_info: HashMap::new(),
            opened: Vec::new(),
            closed: Vec::new(),
            applied: Vec::new(),
            sent: Vec::new(),
            notifications: Vec::new(),
            info_requests: Vec::new(),
            waits: Vec::new(),
            queue_clears: 0,
            command_clears: 0,
            next_handle: 0,
        }
    }

    /// Queue a raw frame for reception
    pub fn push_frame(&mut self, frame: Vec<u8>) {
        self.rx.push_back(frame);
    }

    fn accepts(&self, channel: &ChannelSpec) -> bool {
        match channel {
            ChannelSpec::Name(name) => self.known_channels.iter().any(|c| c == name),
            ChannelSpec::Json(json) => serde_json::from_str::<serde_json::Value>(json)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .map(|obj| {
                    obj.keys()
                        .any(|key| self.known_channels.iter().any(|c| c == key))
                })
                .unwrap_or(false),
        }
    }
}

impl DeviceTransport for MockTransport {
    fn open(&mut self, channel: &ChannelSpec) -> Result<ChannelHandle, CpcError> {
        self.opened.push(channel.clone());
        if !self.accepts(channel) {
            return Err(CpcError::NoMatchingChannel);
        }
        let handle = ChannelHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn close(&mut self, handle: ChannelHandle) -> Result<(), CpcError> {
        self.closed.push(handle);
        Ok(())
    }

    fn apply_params(
        &mut self,
        _handle: ChannelHandle,
        params: &ControllerParams,
    ) -> Result<(), CpcError> {
        if self.rejected_families.contains(&params.family()) {
            return Err(CpcError::WrongControllerType);
        }
        if let Some(err) = self.apply_error {
            return Err(err);
        }
        self.applied.push(params.clone());
        Ok(())
    }

    fn send(&mut self, _handle: ChannelHandle, frame: &[u8]) -> Result<(), CpcError> {
        if let Some(err) = self.send_error {
            return Err(err);
        }
        self.sent.push(frame.to_vec());
        if self.loopback {
            self.rx.push_back(frame.to_vec());
        }
        Ok(())
    }

    fn wait_for_event(
        &mut self,
        _handle: ChannelHandle,
        timeout_ms: u32,
        events: EventMask,
    ) -> Result<EventMask, CpcError> {
        self.waits.push((timeout_ms, events));
        if let Some(err) = self.wait_error {
            return Err(err);
        }
        let mut ready = EventMask::empty();
        if !self.rx.is_empty() {
            ready |= EventMask::READ;
        }
        if self.write_ready {
            ready |= EventMask::WRITE;
        }
        Ok(ready & events)
    }

    fn poll_frame(&mut self, _handle: ChannelHandle) -> Option<Vec<u8>> {
        self.rx.pop_front()
    }

    fn clear_queues(&mut self, _handle: ChannelHandle) -> Result<(), CpcError> {
        self.queue_clears += 1;
        self.rx.clear();
        Ok(())
    }

    fn clear_command_queue(&mut self, _handle: ChannelHandle) -> Result<(), CpcError> {
        self.command_clears += 1;
        Ok(())
    }

    fn enable_notification(
        &mut self,
        _handle: ChannelHandle,
        class: NotificationClass,
        on: bool,
    ) -> Result<(), CpcError> {
        if let Some((failing, err)) = self.notification_error {
            if failing == class {
                return Err(err);
            }
        }
        self.notifications.push((class, on));
        Ok(())
    }

    fn request_info(
        &mut self,
        _handle: ChannelHandle,
        source: u8,
        info_type: u8,
    ) -> Result<(), CpcError> {
        self.info_requests.push((source, info_type));
        Ok(())
    }

    fn cached_info(
        &mut self,
        _handle: ChannelHandle,
        source: u8,
        info_type: u8,
    ) -> Option<Vec<u8>> {
        self.library_info.get(&(source, info_type)).cloned()
    }
}
