//! EMS Wünsche CPC bus adapter
//!
//! A library that drives EMS Dr. Thomas Wünsche CAN-to-PC (CPC) interfaces through a
//! uniform bus abstraction: open a channel, send and receive CAN/CAN-FD messages,
//! reconfigure the bit timing or listen-only mode, reset.
//!
//! # Architecture
//!
//! - [`wire`] encodes and decodes the fixed 81-byte device frames
//! - [`timing`] derives bit timings and packs them into the register layouts of the
//!   generic, SJA1000 and LPC546xx controller families
//! - [`state`] tracks the observed and the requested bus state
//! - [`session`] composes the above into [`WuenscheBus`]
//!
//! The library does NOT load the vendor library itself. All device access goes through
//! the [`DeviceTransport`] trait; the CLI crate implements it on top of the dynamically
//! loaded CPC library.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_wuensche::{BusConfig, DeviceTransport, Message, WuenscheBus};
//! use std::time::Duration;
//!
//! fn run<T: DeviceTransport>(transport: T) -> can_wuensche::Result<()> {
//!     let config = BusConfig::new().with_channel("CHAN00").with_bitrate(500_000);
//!     let mut bus = WuenscheBus::open(transport, config)?;
//!
//!     bus.send(&Message::new_standard(0x123, &[0xDE, 0xAD]), Some(Duration::from_secs(1)))?;
//!     while let Some(message) = bus.receive(Some(Duration::from_millis(100)))? {
//!         println!("{}", message);
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod info;
pub mod session;
pub mod state;
pub mod timing;
pub mod transport;
pub mod types;
pub mod wire;

// Re-export main types for convenience
pub use config::{BusConfig, DEFAULT_CHANNEL};
pub use info::InfoTable;
pub use session::{duration_from_secs, timeout_ms, WuenscheBus};
pub use state::BusStateMachine;
pub use timing::{BitTiming, BitTimingFd, ControllerFamily, ControllerParams, Timing, TimingRequest};
pub use transport::{
    ChannelHandle, ChannelSpec, CpcError, DeviceTransport, EventMask, NotificationClass,
};
pub use types::{BusState, Message, Result, Timestamp, WuenscheError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        assert!(!VERSION.is_empty());
        assert_eq!(WuenscheBus::<transport::mock::MockTransport>::info_types().len(), 4);
    }
}
