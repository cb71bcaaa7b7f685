//! Bus session controller
//!
//! [`WuenscheBus`] owns one open channel. It derives controller parameters from the
//! configured timing, drives the device through a [`DeviceTransport`], and folds the
//! asynchronous device reports (info answers, bus state, parameter echoes, counters) into
//! its own state while receiving.

use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::BusConfig;
use crate::info::{
    self, InfoTable, REQUESTED_TYPES, SOURCE_DRIVER, SOURCE_INTERFACE, SOURCE_LIBRARY,
};
use crate::state::BusStateMachine;
use crate::timing::{
    from_controller_params, to_controller_params, ControllerFamily, ControllerParams, Timing,
};
use crate::transport::{
    ChannelHandle, ChannelSpec, CpcError, DeviceTransport, EventMask, NotificationClass,
    WAIT_INFINITE,
};
use crate::types::{BusState, Message, Result, WuenscheError};
use crate::wire::{self, FrameBody, WireFrame};

/// Convert a caller timeout into transport wait units
///
/// `None` waits forever. Other values are rounded up to whole milliseconds.
pub fn timeout_ms(timeout: Option<Duration>) -> Result<u32> {
    let Some(timeout) = timeout else {
        return Ok(WAIT_INFINITE);
    };
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    if millis >= WAIT_INFINITE as u128 {
        return Err(WuenscheError::TimeoutConversionError(format!(
            "{:?} exceeds the longest finite wait",
            timeout
        )));
    }
    Ok(millis as u32)
}

/// Timeout from fractional seconds
pub fn duration_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(WuenscheError::TimeoutConversionError(format!(
            "faulty value '{}'",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| WuenscheError::TimeoutConversionError(format!("'{}': {}", secs, e)))
}

/// An open CPC channel
pub struct WuenscheBus<T: DeviceTransport> {
    transport: T,
    handle: Option<ChannelHandle>,
    channel_info: String,
    params: ControllerParams,
    machine: BusStateMachine,
    timing: Option<Timing>,
    info: InfoTable,
    error_counters: Option<(u8, u8)>,
    busload: Option<u8>,
    disconnected: bool,
}

impl<T: DeviceTransport> WuenscheBus<T> {
    /// Open and configure a channel
    ///
    /// The channel is closed again if any step after opening fails.
    pub fn open(mut transport: T, config: BusConfig) -> Result<Self> {
        let machine = BusStateMachine::new(config.state)?;
        let params = build_params(&config, ControllerFamily::Generic, machine.listen_only())?;
        let (handle, channel_info) = open_channel(&mut transport, &config.channel)?;
        log::info!("Opened channel {} (handle {})", channel_info, handle.0);

        let mut bus = Self {
            transport,
            handle: Some(handle),
            channel_info,
            params,
            machine,
            timing: config.timing,
            info: InfoTable::new(),
            error_counters: None,
            busload: None,
            disconnected: false,
        };

        if let Err(e) = bus.initialise(&config) {
            log::warn!("Closing channel {}: {}", bus.channel_info, e);
            bus.shutdown();
            return Err(e);
        }
        Ok(bus)
    }

    fn initialise(&mut self, config: &BusConfig) -> Result<()> {
        let params = self.params;
        if config.request_info {
            self.request_initial_info()?;
        }
        self.configure(config, params)?;

        let handle = self.handle()?;
        for class in NotificationClass::ALL {
            self.transport
                .enable_notification(handle, class, true)
                .map_err(|source| WuenscheError::NotificationEnableFailed { class, source })?;
        }
        Ok(())
    }

    fn request_initial_info(&mut self) -> Result<()> {
        let handle = self.handle()?;
        self.info.touch_source(SOURCE_LIBRARY);
        for info_type in REQUESTED_TYPES {
            for source in [SOURCE_INTERFACE, SOURCE_DRIVER] {
                if let Err(e) = self.transport.request_info(handle, source, info_type) {
                    log::debug!(
                        "Info request {}/{} failed: {}",
                        info::source_name(source),
                        info::type_name(info_type),
                        e
                    );
                }
            }
            if let Some(raw) = self.transport.cached_info(handle, SOURCE_LIBRARY, info_type) {
                self.info
                    .insert(SOURCE_LIBRARY, info_type, info::text_from_bytes(&raw));
            }
        }
        // answers already queued by the device
        if let Some(message) = self.receive(Some(Duration::ZERO))? {
            log::debug!("Dropping message received before configuration: {}", message);
        }
        Ok(())
    }

    fn configure(&mut self, config: &BusConfig, params: ControllerParams) -> Result<()> {
        let target = config.state;
        match self.commit(params, target) {
            Err(WuenscheError::ConfigurationFailed(CpcError::WrongControllerType)) => {
                let family = ControllerFamily::fallback(params.is_fd());
                log::info!(
                    "Device rejected {} parameters, retrying with {}",
                    params.family(),
                    family
                );
                let retry = build_params(config, family, target == BusState::Passive)?;
                self.commit(retry, target)
            }
            other => other,
        }
    }

    /// Apply `params` and adopt them together with `target` if the device accepts them
    fn commit(&mut self, params: ControllerParams, target: BusState) -> Result<()> {
        let handle = self.handle()?;
        self.transport
            .apply_params(handle, &params)
            .map_err(WuenscheError::ConfigurationFailed)?;
        self.params = params;
        self.machine.set_target(target)?;
        self.machine.on_applied();
        log::debug!("Applied {} parameters, state {}", params.family(), target);
        Ok(())
    }

    fn handle(&self) -> Result<ChannelHandle> {
        match self.handle {
            Some(handle) => Ok(handle),
            None if self.disconnected => Err(WuenscheError::DeviceDisconnected),
            None => Err(WuenscheError::ChannelClosed),
        }
    }

    /// Transmit a message, waiting up to `timeout` for buffer space
    pub fn send(&mut self, message: &Message, timeout: Option<Duration>) -> Result<()> {
        let handle = self.handle()?;
        let wait = timeout_ms(timeout)?;
        let frame = wire::encode(message, false)?;

        let ready = self
            .transport
            .wait_for_event(handle, wait, EventMask::WRITE)
            .map_err(WuenscheError::SendFailed)?;
        if !ready.contains(EventMask::WRITE) {
            return Err(WuenscheError::SendTimeout);
        }

        self.transport
            .send(handle, &frame)
            .map_err(WuenscheError::SendFailed)?;
        log::trace!("Sent {}", message);
        Ok(())
    }

    /// Next received message
    ///
    /// Returns `Ok(None)` when nothing arrives within `timeout` or when the pending frames
    /// were all status reports.
    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let handle = self.handle()?;
        let wait = timeout_ms(timeout)?;

        let ready = self
            .transport
            .wait_for_event(handle, wait, EventMask::READ)
            .map_err(WuenscheError::ReceiveFailed)?;
        if !ready.contains(EventMask::READ) {
            return Ok(None);
        }

        while let Some(raw) = self.transport.poll_frame(handle) {
            let frame = match wire::decode(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Skipping frame: {}", e);
                    continue;
                }
            };
            if let Some(message) = self.process_frame(frame)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn process_frame(&mut self, frame: WireFrame) -> Result<Option<Message>> {
        match frame.body {
            FrameBody::Info {
                source,
                info_type,
                text,
            } => self.info.insert(source, info_type, text),
            FrameBody::BusState(can_state) => {
                log::debug!("Bus state report: {:?}", can_state);
                self.machine.on_bus_state(can_state);
            }
            FrameBody::Params(echoed) => self.on_params_echo(echoed),
            FrameBody::ErrorCounter { rx, tx } => {
                log::debug!("Error counters: rx {} tx {}", rx, tx);
                self.error_counters = Some((rx, tx));
            }
            FrameBody::Busload(load) => self.busload = Some(load),
            FrameBody::Overrun { event, count } => {
                log::warn!("Overrun of {:?} ({} lost)", event, count);
            }
            FrameBody::Disconnected => {
                log::warn!("Device behind {} disconnected", self.channel_info);
                self.disconnected = true;
                self.shutdown();
                return Err(WuenscheError::DeviceDisconnected);
            }
            FrameBody::Housekeeping(frame_type) => {
                log::trace!("Ignoring {:?} frame", frame_type);
            }
            FrameBody::Unrecognized(code) => {
                log::debug!("Ignoring frame with unknown type {}", code);
            }
            FrameBody::Classic { .. } | FrameBody::Fd { .. } | FrameBody::BusError { .. } => {
                return Ok(frame.into_message());
            }
        }
        Ok(None)
    }

    fn on_params_echo(&mut self, echoed: ControllerParams) {
        self.timing = from_controller_params(&echoed).ok();
        self.machine.on_params_echo(echoed.listen_only());
        if let Err(e) = self.params.copy_from(&echoed) {
            log::warn!("Adopting echoed parameters: {}", e);
            self.params = echoed;
        }
    }

    /// Clear pending commands and received frames, then reapply the current parameters
    pub fn reset(&mut self) -> Result<()> {
        let handle = self.handle()?;
        self.transport
            .clear_queues(handle)
            .map_err(WuenscheError::Device)?;
        let target = self.machine.target();
        self.commit(self.params, target)
    }

    /// Drop commands not yet sent to the device
    pub fn flush_tx_buffer(&mut self) -> Result<()> {
        let handle = self.handle()?;
        self.transport
            .clear_command_queue(handle)
            .map_err(WuenscheError::Device)
    }

    /// Close the channel; later calls are no-ops
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.transport.close(handle) {
                log::warn!("Failed to close channel {}: {}", self.channel_info, e);
            } else {
                log::info!("Closed channel {}", self.channel_info);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Current bit timing, derived from the controller parameters on first use
    pub fn timing(&mut self) -> Option<Timing> {
        if self.timing.is_none() {
            self.timing = from_controller_params(&self.params).ok();
        }
        self.timing
    }

    /// Reconfigure the controller with a new timing
    ///
    /// The controller family and the listen-only mode stay as they are.
    pub fn set_timing(&mut self, timing: impl Into<Timing>) -> Result<()> {
        let timing = timing.into();
        let mut params = to_controller_params(&timing, self.params.family())?;
        params.set_listen_only(self.machine.listen_only());
        let target = self.machine.target();
        self.commit(params, target)?;
        self.timing = Some(timing);
        Ok(())
    }

    /// Observed bus state
    pub fn state(&self) -> BusState {
        self.machine.state()
    }

    /// Bus state last requested
    pub fn target_state(&self) -> BusState {
        self.machine.target()
    }

    /// Switch between Active and Passive (listen-only) operation
    pub fn set_state(&mut self, state: BusState) -> Result<()> {
        if state == BusState::Error {
            return Err(WuenscheError::InvalidStateRequest(state));
        }
        let mut params = self.params;
        params.set_listen_only(state == BusState::Passive);
        self.commit(params, state)
    }

    /// Ask for an info string
    ///
    /// Interface and driver answer asynchronously; the value shows up in [`read_info`]
    /// after a later [`receive`]. Library answers are stored immediately. Returns whether
    /// the request was accepted (or, for the library, whether an answer was available).
    ///
    /// [`read_info`]: WuenscheBus::read_info
    /// [`receive`]: WuenscheBus::receive
    pub fn request_info(&mut self, source: &str, info_type: &str) -> Result<bool> {
        let source = info::source_code(source)?;
        let info_type = info::type_code(info_type)?;
        let handle = self.handle()?;

        if source == SOURCE_LIBRARY {
            return Ok(match self.transport.cached_info(handle, source, info_type) {
                Some(raw) => {
                    self.info
                        .insert(source, info_type, info::text_from_bytes(&raw));
                    true
                }
                None => false,
            });
        }

        match self.transport.request_info(handle, source, info_type) {
            Ok(()) => Ok(true),
            Err(e) => {
                log::debug!("Info request rejected: {}", e);
                Ok(false)
            }
        }
    }

    /// Info string received so far
    pub fn read_info(&self, source: &str, info_type: &str) -> Option<&str> {
        let source = info::source_code(source)
            .map(info::source_name)
            .unwrap_or_else(|_| source.to_string());
        let info_type = info::type_code(info_type)
            .map(info::type_name)
            .unwrap_or_else(|_| info_type.to_string());
        self.info.get(&source, &info_type)
    }

    /// All info strings received so far
    pub fn info(&self) -> &InfoTable {
        &self.info
    }

    pub fn info_sources() -> Vec<&'static str> {
        info::info_sources()
    }

    pub fn info_types() -> Vec<&'static str> {
        info::info_types()
    }

    /// Last reported (rx, tx) error counters
    pub fn error_counters(&self) -> Option<(u8, u8)> {
        self.error_counters
    }

    /// Last reported bus load in percent
    pub fn busload(&self) -> Option<u8> {
        self.busload
    }

    /// Channel name or the JSON descriptor the channel was opened with
    pub fn channel_info(&self) -> &str {
        &self.channel_info
    }

    pub fn controller_params(&self) -> &ControllerParams {
        &self.params
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: DeviceTransport> Drop for WuenscheBus<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_params(
    config: &BusConfig,
    family: ControllerFamily,
    listen_only: bool,
) -> Result<ControllerParams> {
    let timing = match config.timing {
        Some(timing) => timing,
        None => config.timing_request.resolve_for(family)?,
    };
    let mut params = to_controller_params(&timing, family)?;
    params.set_listen_only(listen_only);
    Ok(params)
}

/// Open a channel by name, falling back to a JSON channel descriptor
fn open_channel<T: DeviceTransport>(
    transport: &mut T,
    channel: &str,
) -> Result<(ChannelHandle, String)> {
    let channel = channel.trim();
    let failed = |source| WuenscheError::ChannelOpenFailed {
        channel: channel.to_string(),
        source,
    };
    if channel.is_empty() {
        return Err(failed(CpcError::NoMatchingChannel));
    }

    let mut last_error = match transport.open(&ChannelSpec::Name(channel.to_string())) {
        Ok(handle) => return Ok((handle, channel.to_string())),
        Err(e) => e,
    };

    let Ok(descriptor) = serde_json::from_str::<Value>(channel) else {
        return Err(failed(last_error));
    };
    for candidate in descriptor_candidates(&descriptor) {
        let json = candidate.to_string();
        match transport.open(&ChannelSpec::Json(json.clone())) {
            Ok(handle) => return Ok((handle, json)),
            Err(e) => {
                log::debug!("Channel descriptor {} not usable: {}", json, e);
                last_error = e;
            }
        }
    }
    Err(failed(last_error))
}

/// Single-channel descriptors to try, in order
fn descriptor_candidates(descriptor: &Value) -> Vec<Value> {
    let Some(object) = descriptor.as_object() else {
        return Vec::new();
    };
    let named = |name: &str, value: &Value| {
        let mut map = Map::new();
        map.insert(name.to_string(), value.clone());
        Value::Object(map)
    };
    if object.contains_key("InterfaceType") {
        return vec![named("UNNAMED", descriptor)];
    }
    object
        .iter()
        .filter(|(_, value)| value.get("InterfaceType").is_some())
        .map(|(name, value)| named(name, value))
        .collect()
}
