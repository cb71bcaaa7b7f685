//! Bit timing derivation from loosely specified user parameters

use serde::{Deserialize, Serialize};

use super::defaults::{generic_timing, sja1000_timing};
use super::params::ControllerFamily;
use super::{BitTiming, BitTimingFd, Timing, DEFAULT_SAMPLE_POINT};
use crate::types::{Result, WuenscheError};

fn default_bitrate() -> Option<u32> {
    Some(500_000)
}

/// Timing parameters as a user supplies them
///
/// Every field is optional. [`TimingRequest::resolve_for`] tries the supported ways of
/// deriving a timing in a fixed order and returns the first one that works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingRequest {
    /// Restrict derivation to FD (`true`) or classic (`false`) timing
    pub fd: Option<bool>,
    /// Controller clock frequency in Hz
    pub f_clock: Option<u32>,

    #[serde(default = "default_bitrate")]
    pub bitrate: Option<u32>,
    /// Classic sample point in percent, 69 if unset
    pub sample_point: Option<f64>,
    pub brp: Option<u32>,
    pub tseg1: Option<u32>,
    pub tseg2: Option<u32>,
    pub sjw: Option<u32>,
    /// 1 or 3, 1 if unset
    pub nof_samples: Option<u32>,
    pub btr0: Option<u8>,
    pub btr1: Option<u8>,

    pub nom_bitrate: Option<u32>,
    pub nom_sample_point: Option<f64>,
    pub nom_brp: Option<u32>,
    pub nom_tseg1: Option<u32>,
    pub nom_tseg2: Option<u32>,
    pub nom_sjw: Option<u32>,
    pub data_bitrate: Option<u32>,
    pub data_sample_point: Option<f64>,
    pub data_brp: Option<u32>,
    pub data_tseg1: Option<u32>,
    pub data_tseg2: Option<u32>,
    pub data_sjw: Option<u32>,
}

impl Default for TimingRequest {
    fn default() -> Self {
        Self {
            fd: None,
            f_clock: None,
            bitrate: default_bitrate(),
            sample_point: None,
            brp: None,
            tseg1: None,
            tseg2: None,
            sjw: None,
            nof_samples: None,
            btr0: None,
            btr1: None,
            nom_bitrate: None,
            nom_sample_point: None,
            nom_brp: None,
            nom_tseg1: None,
            nom_tseg2: None,
            nom_sjw: None,
            data_bitrate: None,
            data_sample_point: None,
            data_brp: None,
            data_tseg1: None,
            data_tseg2: None,
            data_sjw: None,
        }
    }
}

fn require<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| WuenscheError::NoSuitableTiming(format!("{} not set", name)))
}

impl TimingRequest {
    /// Request for a classic bitrate with all other parameters derived
    pub fn with_bitrate(bitrate: u32) -> Self {
        Self {
            bitrate: Some(bitrate),
            ..Self::default()
        }
    }

    /// Request for FD nominal and data bitrates
    pub fn with_fd_bitrates(nom_bitrate: u32, data_bitrate: u32) -> Self {
        Self {
            fd: Some(true),
            bitrate: None,
            nom_bitrate: Some(nom_bitrate),
            data_bitrate: Some(data_bitrate),
            ..Self::default()
        }
    }

    /// Derive a timing usable with `family`
    pub fn resolve_for(&self, family: ControllerFamily) -> Result<Timing> {
        let try_fd = self.fd != Some(false);
        let try_classic = self.fd != Some(true);

        if family == ControllerFamily::Sja1000 && !try_classic {
            return Err(WuenscheError::NoSuitableTiming(
                "CAN-FD requested for the SJA1000 controller".to_string(),
            ));
        }

        if try_fd && family != ControllerFamily::Sja1000 {
            let attempts: [(&str, fn(&Self) -> Result<Timing>); 4] = [
                ("FD segments", Self::fd_from_segments),
                ("FD sample points", Self::fd_from_sample_points),
                ("FD bitrates and segments", Self::fd_from_bitrates_and_segments),
                ("generic tables", Self::fd_from_tables),
            ];
            if let Some(timing) = self.first_success(&attempts) {
                return Ok(timing);
            }
        }

        if try_classic {
            let attempts: [(&str, fn(&Self) -> Result<Timing>); 5] = [
                ("segments", Self::classic_from_segments),
                ("sample point", Self::classic_from_sample_point),
                ("bitrate and segments", Self::classic_from_bitrate_and_segments),
                ("bus timing registers", Self::classic_from_registers),
                ("SJA1000 table", Self::classic_from_table),
            ];
            if let Some(timing) = self.first_success(&attempts) {
                return Ok(timing);
            }
        }

        Err(WuenscheError::NoSuitableTiming(format!(
            "no usable timing parameters for the {} controller",
            family
        )))
    }

    fn first_success(&self, attempts: &[(&str, fn(&Self) -> Result<Timing>)]) -> Option<Timing> {
        for (name, attempt) in attempts {
            match attempt(self) {
                Ok(timing) => {
                    log::debug!("Bit timing from {}: {}", name, timing);
                    return Some(timing);
                }
                Err(e) => log::debug!("Bit timing from {} not possible: {}", name, e),
            }
        }
        None
    }

    fn fd_from_segments(&self) -> Result<Timing> {
        Ok(Timing::Fd(BitTimingFd::new(
            require(self.f_clock, "f_clock")?,
            require(self.nom_brp, "nom_brp")?,
            require(self.nom_tseg1, "nom_tseg1")?,
            require(self.nom_tseg2, "nom_tseg2")?,
            require(self.nom_sjw, "nom_sjw")?,
            require(self.data_brp, "data_brp")?,
            require(self.data_tseg1, "data_tseg1")?,
            require(self.data_tseg2, "data_tseg2")?,
            require(self.data_sjw, "data_sjw")?,
        )?))
    }

    fn fd_from_sample_points(&self) -> Result<Timing> {
        Ok(Timing::Fd(BitTimingFd::from_sample_point(
            require(self.f_clock, "f_clock")?,
            require(self.nom_bitrate, "nom_bitrate")?,
            require(self.nom_sample_point, "nom_sample_point")?,
            require(self.data_bitrate, "data_bitrate")?,
            require(self.data_sample_point, "data_sample_point")?,
        )?))
    }

    fn fd_from_bitrates_and_segments(&self) -> Result<Timing> {
        Ok(Timing::Fd(BitTimingFd::from_bitrate_and_segments(
            require(self.f_clock, "f_clock")?,
            require(self.nom_bitrate, "nom_bitrate")?,
            require(self.nom_tseg1, "nom_tseg1")?,
            require(self.nom_tseg2, "nom_tseg2")?,
            require(self.nom_sjw, "nom_sjw")?,
            require(self.data_bitrate, "data_bitrate")?,
            require(self.data_tseg1, "data_tseg1")?,
            require(self.data_tseg2, "data_tseg2")?,
            require(self.data_sjw, "data_sjw")?,
        )?))
    }

    fn fd_from_tables(&self) -> Result<Timing> {
        generic_timing(
            require(self.nom_bitrate, "nom_bitrate")?,
            self.data_bitrate,
            self.f_clock,
        )
    }

    fn nof_samples(&self) -> u32 {
        self.nof_samples.unwrap_or(1)
    }

    fn classic_from_segments(&self) -> Result<Timing> {
        Ok(Timing::Classic(BitTiming::new(
            require(self.f_clock, "f_clock")?,
            require(self.brp, "brp")?,
            require(self.tseg1, "tseg1")?,
            require(self.tseg2, "tseg2")?,
            require(self.sjw, "sjw")?,
            self.nof_samples(),
        )?))
    }

    fn classic_from_sample_point(&self) -> Result<Timing> {
        Ok(Timing::Classic(BitTiming::from_sample_point(
            require(self.f_clock, "f_clock")?,
            require(self.bitrate, "bitrate")?,
            self.sample_point.unwrap_or(DEFAULT_SAMPLE_POINT),
        )?))
    }

    fn classic_from_bitrate_and_segments(&self) -> Result<Timing> {
        Ok(Timing::Classic(BitTiming::from_bitrate_and_segments(
            require(self.f_clock, "f_clock")?,
            require(self.bitrate, "bitrate")?,
            require(self.tseg1, "tseg1")?,
            require(self.tseg2, "tseg2")?,
            require(self.sjw, "sjw")?,
            self.nof_samples(),
        )?))
    }

    fn classic_from_registers(&self) -> Result<Timing> {
        Ok(Timing::Classic(BitTiming::from_registers(
            require(self.f_clock, "f_clock")?,
            require(self.btr0, "btr0")?,
            require(self.btr1, "btr1")?,
        )?))
    }

    fn classic_from_table(&self) -> Result<Timing> {
        Ok(Timing::Classic(sja1000_timing(
            require(self.bitrate, "bitrate")?,
            self.f_clock,
        )?))
    }
}
