//! Bus configuration types
//!
//! [`BusConfig`] carries everything needed to open a channel. It deserialises from the
//! application config file; the timing fields sit at the same level as the channel
//! settings.

use serde::{Deserialize, Serialize};

use crate::timing::{Timing, TimingRequest};
use crate::types::BusState;

/// Channel opened when none is configured
pub const DEFAULT_CHANNEL: &str = "CHAN00";

/// Parameters for opening a bus session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Channel name from the system configuration, or a JSON channel descriptor
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Requested bus state, Active or Passive (listen-only)
    #[serde(default)]
    pub state: BusState,

    /// Ask interface, driver and library for info strings while opening
    #[serde(default = "default_true")]
    pub request_info: bool,

    /// Explicit bit timing; overrides `timing_request` when set
    #[serde(skip)]
    pub timing: Option<Timing>,

    /// Loose timing parameters used when no explicit timing is given
    #[serde(flatten)]
    pub timing_request: TimingRequest,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            state: BusState::Active,
            request_info: true,
            timing: None,
            timing_request: TimingRequest::default(),
        }
    }
}

impl BusConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the channel identifier
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Builder method: set the requested bus state
    pub fn with_state(mut self, state: BusState) -> Self {
        self.state = state;
        self
    }

    /// Builder method: enable or disable the info requests on open
    pub fn with_request_info(mut self, enabled: bool) -> Self {
        self.request_info = enabled;
        self
    }

    /// Builder method: use an explicit bit timing
    pub fn with_timing(mut self, timing: impl Into<Timing>) -> Self {
        self.timing = Some(timing.into());
        self
    }

    /// Builder method: set a classic bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.timing_request.bitrate = Some(bitrate);
        self
    }

    /// Builder method: request FD operation with nominal and data bitrates
    pub fn with_fd_bitrates(mut self, nom_bitrate: u32, data_bitrate: u32) -> Self {
        self.timing_request = TimingRequest::with_fd_bitrates(nom_bitrate, data_bitrate);
        self
    }

    /// Builder method: replace the loose timing parameters
    pub fn with_timing_request(mut self, request: TimingRequest) -> Self {
        self.timing_request = request;
        self
    }
}
