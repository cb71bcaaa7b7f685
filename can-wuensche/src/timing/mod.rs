//! CAN bit timing
//!
//! Abstract nominal/data bit timing descriptions and their conversion to and from the
//! register sets of the supported controller families.

mod defaults;
mod params;
mod request;
mod translate;

pub use defaults::{generic_timing, sja1000_timing};
pub use params::{
    Cccr, ControllerFamily, ControllerParams, FamilyBits, GenericConfig, GenericParams,
    Lpc546xxParams, RegisterField, SegmentRegs, Sja1000Params, FAMILY_BITS, PARAMS_LEN,
};
pub use request::TimingRequest;
pub use translate::{from_controller_params, to_controller_params};

use std::fmt;

use crate::types::{Result, WuenscheError};

/// Reference clock of the SJA1000 register tables
pub const SJA1000_CLOCK: u32 = 8_000_000;

/// Sample point used when none is configured, in percent
pub const DEFAULT_SAMPLE_POINT: f64 = 69.0;

fn invalid(reason: impl Into<String>) -> WuenscheError {
    WuenscheError::NoSuitableTiming(reason.into())
}

/// Largest prescaler or segment length accepted by any controller register
pub const MAX_SEGMENT: u32 = 0xFFFF;

fn check_range(name: &str, value: u32) -> Result<()> {
    if value == 0 || value > MAX_SEGMENT {
        return Err(invalid(format!(
            "{} {} outside 1..={}",
            name, value, MAX_SEGMENT
        )));
    }
    Ok(())
}

/// Time quanta per bit for two segments, rejecting out-of-range segments
fn bit_time(tseg1: u32, tseg2: u32) -> Result<u32> {
    check_range("tseg1", tseg1)?;
    check_range("tseg2", tseg2)?;
    Ok(1 + tseg1 + tseg2)
}

/// Prescaler closest to `f_clock / (bitrate * nbt)`
///
/// The cast saturates for ratios beyond `u32`; `validate` rejects the result.
fn nearest_prescaler(f_clock: u32, bitrate: u32, nbt: u32) -> u32 {
    (f_clock as f64 / (bitrate as f64 * nbt as f64)).round_ties_even() as u32
}

fn deviation_ok(effective: f64, bitrate: u32) -> bool {
    (effective - bitrate as f64).abs() <= bitrate as f64 / 256.0
}

/// Segment split for a given bit time and sample point, as (tseg1, tseg2)
fn split_segments(nbt: u32, sample_point: f64) -> (u32, u32) {
    let tseg1 = ((sample_point / 100.0 * nbt as f64).round_ties_even() as u32)
        .saturating_sub(1)
        .min(nbt - 2);
    (tseg1, nbt - tseg1 - 1)
}

/// Rescale a synchronisation jump width to a new bit time
fn rescale_sjw(sjw: u32, nbt: u32, new_nbt: u32, max: u32) -> u32 {
    let scaled = (sjw as f64 / nbt as f64 * new_nbt as f64).round_ties_even() as u32;
    scaled.min(max).max(1)
}

/// Classic CAN bit timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    f_clock: u32,
    brp: u32,
    tseg1: u32,
    tseg2: u32,
    sjw: u32,
    nof_samples: u32,
}

impl BitTiming {
    /// Build a timing from explicit segments
    pub fn new(
        f_clock: u32,
        brp: u32,
        tseg1: u32,
        tseg2: u32,
        sjw: u32,
        nof_samples: u32,
    ) -> Result<Self> {
        let timing = Self {
            f_clock,
            brp,
            tseg1,
            tseg2,
            sjw,
            nof_samples,
        };
        timing.validate()?;
        Ok(timing)
    }

    fn validate(&self) -> Result<()> {
        if self.f_clock == 0 {
            return Err(invalid("clock frequency must be positive"));
        }
        check_range("brp", self.brp)?;
        check_range("tseg1", self.tseg1)?;
        check_range("tseg2", self.tseg2)?;
        check_range("sjw", self.sjw)?;
        if self.sjw > self.tseg2 {
            return Err(invalid(format!(
                "sjw {} exceeds tseg2 {}",
                self.sjw, self.tseg2
            )));
        }
        if self.nof_samples != 1 && self.nof_samples != 3 {
            return Err(invalid(format!(
                "nof_samples must be 1 or 3, got {}",
                self.nof_samples
            )));
        }
        if self.sample_point() < 50.0 {
            return Err(invalid(format!(
                "sample point {:.2}% is below 50%",
                self.sample_point()
            )));
        }
        Ok(())
    }

    /// Ranges accepted by the sample point search
    fn is_strict(&self) -> bool {
        (8..=25).contains(&self.nbt())
            && self.brp <= 32
            && self.tseg1 <= 16
            && self.tseg2 <= 8
            && self.sjw <= 4
    }

    /// Decode SJA1000 bus timing registers
    pub fn from_registers(f_clock: u32, btr0: u8, btr1: u8) -> Result<Self> {
        let brp = (btr0 & 0x3F) as u32 + 1;
        let sjw = (btr0 >> 6) as u32 + 1;
        let tseg1 = (btr1 & 0x0F) as u32 + 1;
        let tseg2 = ((btr1 >> 4) & 0x07) as u32 + 1;
        let nof_samples = if btr1 & 0x80 != 0 { 3 } else { 1 };
        Self::new(f_clock, brp, tseg1, tseg2, sjw, nof_samples)
    }

    /// Search the prescaler range for the timing closest to `sample_point` percent
    pub fn from_sample_point(f_clock: u32, bitrate: u32, sample_point: f64) -> Result<Self> {
        if !(sample_point >= 50.0) {
            return Err(invalid(format!(
                "sample point {} must be at least 50%",
                sample_point
            )));
        }
        if f_clock == 0 || bitrate == 0 {
            return Err(invalid("clock and bitrate must be positive"));
        }

        let mut best: Option<(f64, BitTiming)> = None;
        for brp in 1..=64u32 {
            let nbt = (f_clock as u64 / (bitrate as u64 * brp as u64)) as u32;
            if nbt < 8 {
                break;
            }
            let effective = f_clock as f64 / (nbt as f64 * brp as f64);
            if !deviation_ok(effective, bitrate) {
                continue;
            }
            let (tseg1, tseg2) = split_segments(nbt, sample_point);
            let candidate = match Self::new(f_clock, brp, tseg1, tseg2, tseg2.min(4), 1) {
                Ok(c) if c.is_strict() => c,
                _ => continue,
            };
            let error = (candidate.sample_point() - sample_point).abs();
            if best.as_ref().map_or(true, |(e, _)| error < *e) {
                best = Some((error, candidate));
            }
        }

        best.map(|(_, timing)| timing).ok_or_else(|| {
            invalid(format!(
                "no timing for {} bit/s at {}% with a {} Hz clock",
                bitrate, sample_point, f_clock
            ))
        })
    }

    /// Derive the prescaler from a bitrate and fixed segments
    pub fn from_bitrate_and_segments(
        f_clock: u32,
        bitrate: u32,
        tseg1: u32,
        tseg2: u32,
        sjw: u32,
        nof_samples: u32,
    ) -> Result<Self> {
        if bitrate == 0 {
            return Err(invalid("bitrate must be positive"));
        }
        let nbt = bit_time(tseg1, tseg2)?;
        let brp = nearest_prescaler(f_clock, bitrate, nbt);
        let timing = Self::new(f_clock, brp, tseg1, tseg2, sjw, nof_samples)?;
        if !deviation_ok(timing.bitrate_exact(), bitrate) {
            return Err(invalid(format!(
                "effective bitrate {} deviates from {}",
                timing.bitrate(),
                bitrate
            )));
        }
        Ok(timing)
    }

    /// Equivalent timing for another clock frequency
    pub fn recreate_with_f_clock(&self, f_clock: u32) -> Result<Self> {
        if let Ok(timing) = Self::from_bitrate_and_segments(
            f_clock,
            self.bitrate(),
            self.tseg1,
            self.tseg2,
            self.sjw,
            self.nof_samples,
        ) {
            if timing.is_strict() {
                return Ok(timing);
            }
        }

        let base = Self::from_sample_point(f_clock, self.bitrate(), self.sample_point())?;
        if (base.sample_point() - self.sample_point()).abs() > 1.0 {
            return Err(invalid(format!(
                "sample point {:.2}% not reachable at {} Hz",
                self.sample_point(),
                f_clock
            )));
        }
        let sjw = rescale_sjw(self.sjw, self.nbt(), base.nbt(), 4.min(base.tseg2));
        Self::new(f_clock, base.brp, base.tseg1, base.tseg2, sjw, self.nof_samples)
    }

    pub fn f_clock(&self) -> u32 {
        self.f_clock
    }

    pub fn brp(&self) -> u32 {
        self.brp
    }

    pub fn tseg1(&self) -> u32 {
        self.tseg1
    }

    pub fn tseg2(&self) -> u32 {
        self.tseg2
    }

    pub fn sjw(&self) -> u32 {
        self.sjw
    }

    pub fn nof_samples(&self) -> u32 {
        self.nof_samples
    }

    /// Number of time quanta per bit
    pub fn nbt(&self) -> u32 {
        1 + self.tseg1 + self.tseg2
    }

    /// Bitrate in bit/s, truncated
    pub fn bitrate(&self) -> u32 {
        (self.f_clock as u64 / (self.brp as u64 * self.nbt() as u64)) as u32
    }

    fn bitrate_exact(&self) -> f64 {
        self.f_clock as f64 / (self.brp as f64 * self.nbt() as f64)
    }

    /// Sample point in percent
    pub fn sample_point(&self) -> f64 {
        100.0 * (1 + self.tseg1) as f64 / self.nbt() as f64
    }
}

impl fmt::Display for BitTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bit/s, sample point {:.2}%, f_clock {} Hz (brp {}, tseg1 {}, tseg2 {}, sjw {}, samples {})",
            self.bitrate(),
            self.sample_point(),
            self.f_clock,
            self.brp,
            self.tseg1,
            self.tseg2,
            self.sjw,
            self.nof_samples
        )
    }
}

/// CAN-FD bit timing with separate nominal and data phase segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTimingFd {
    f_clock: u32,
    nom_brp: u32,
    nom_tseg1: u32,
    nom_tseg2: u32,
    nom_sjw: u32,
    data_brp: u32,
    data_tseg1: u32,
    data_tseg2: u32,
    data_sjw: u32,
}

impl BitTimingFd {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        f_clock: u32,
        nom_brp: u32,
        nom_tseg1: u32,
        nom_tseg2: u32,
        nom_sjw: u32,
        data_brp: u32,
        data_tseg1: u32,
        data_tseg2: u32,
        data_sjw: u32,
    ) -> Result<Self> {
        let timing = Self {
            f_clock,
            nom_brp,
            nom_tseg1,
            nom_tseg2,
            nom_sjw,
            data_brp,
            data_tseg1,
            data_tseg2,
            data_sjw,
        };
        timing.validate()?;
        Ok(timing)
    }

    fn validate(&self) -> Result<()> {
        if self.f_clock == 0 {
            return Err(invalid("clock frequency must be positive"));
        }
        let segments = [
            ("nom_brp", self.nom_brp),
            ("nom_tseg1", self.nom_tseg1),
            ("nom_tseg2", self.nom_tseg2),
            ("nom_sjw", self.nom_sjw),
            ("data_brp", self.data_brp),
            ("data_tseg1", self.data_tseg1),
            ("data_tseg2", self.data_tseg2),
            ("data_sjw", self.data_sjw),
        ];
        for (name, value) in segments {
            check_range(name, value)?;
        }
        if self.nom_sjw > self.nom_tseg2 {
            return Err(invalid(format!(
                "nom_sjw {} exceeds nom_tseg2 {}",
                self.nom_sjw, self.nom_tseg2
            )));
        }
        if self.data_sjw > self.data_tseg2 {
            return Err(invalid(format!(
                "data_sjw {} exceeds data_tseg2 {}",
                self.data_sjw, self.data_tseg2
            )));
        }
        if self.nom_sample_point() < 50.0 || self.data_sample_point() < 50.0 {
            return Err(invalid("sample points must be at least 50%"));
        }
        if self.data_bitrate_exact() < self.nom_bitrate_exact() {
            return Err(invalid(format!(
                "data bitrate {} is below nominal bitrate {}",
                self.data_bitrate(),
                self.nom_bitrate()
            )));
        }
        Ok(())
    }

    fn is_strict(&self) -> bool {
        (8..=80).contains(&self.nbt())
            && (5..=25).contains(&self.dbt())
            && self.nom_brp <= 256
            && self.nom_tseg1 <= 256
            && self.nom_tseg2 <= 128
            && self.nom_sjw <= 128
            && self.data_brp <= 256
            && self.data_tseg1 <= 32
            && self.data_tseg2 <= 16
            && self.data_sjw <= 16
    }

    /// Search both prescaler ranges for the timings closest to the requested sample points
    pub fn from_sample_point(
        f_clock: u32,
        nom_bitrate: u32,
        nom_sample_point: f64,
        data_bitrate: u32,
        data_sample_point: f64,
    ) -> Result<Self> {
        if !(nom_sample_point >= 50.0) || !(data_sample_point >= 50.0) {
            return Err(invalid("sample points must be at least 50%"));
        }
        if f_clock == 0 || nom_bitrate == 0 || data_bitrate == 0 {
            return Err(invalid("clock and bitrates must be positive"));
        }

        let mut candidates = Vec::new();
        for nom_brp in 1..=256u32 {
            let nbt = (f_clock as u64 / (nom_bitrate as u64 * nom_brp as u64)) as u32;
            if nbt < 8 {
                break;
            }
            let effective = f_clock as f64 / (nbt as f64 * nom_brp as f64);
            if !deviation_ok(effective, nom_bitrate) {
                continue;
            }
            let (nom_tseg1, nom_tseg2) = split_segments(nbt, nom_sample_point);
            let nom_sjw = nom_tseg2.min(128);

            for data_brp in 1..=256u32 {
                let dbt = (f_clock as u64 / (data_bitrate as u64 * data_brp as u64)) as u32;
                if dbt < 5 {
                    break;
                }
                let effective = f_clock as f64 / (dbt as f64 * data_brp as f64);
                if !deviation_ok(effective, data_bitrate) {
                    continue;
                }
                let (data_tseg1, data_tseg2) = split_segments(dbt, data_sample_point);
                let data_sjw = data_tseg2.min(16);
                match Self::new(
                    f_clock, nom_brp, nom_tseg1, nom_tseg2, nom_sjw, data_brp, data_tseg1,
                    data_tseg2, data_sjw,
                ) {
                    Ok(c) if c.is_strict() => candidates.push(c),
                    _ => continue,
                }
            }
        }

        if candidates.iter().any(|c| c.nom_brp == c.data_brp) {
            candidates.retain(|c| c.nom_brp == c.data_brp);
        }
        candidates
            .into_iter()
            .min_by(|a, b| {
                let nom_a = (a.nom_sample_point() - nom_sample_point).abs();
                let nom_b = (b.nom_sample_point() - nom_sample_point).abs();
                let data_a = (a.data_sample_point() - data_sample_point).abs();
                let data_b = (b.data_sample_point() - data_sample_point).abs();
                nom_a
                    .total_cmp(&nom_b)
                    .then(data_a.total_cmp(&data_b))
                    .then(a.nom_brp.cmp(&b.nom_brp))
            })
            .ok_or_else(|| {
                invalid(format!(
                    "no FD timing for {}/{} bit/s with a {} Hz clock",
                    nom_bitrate, data_bitrate, f_clock
                ))
            })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_bitrate_and_segments(
        f_clock: u32,
        nom_bitrate: u32,
        nom_tseg1: u32,
        nom_tseg2: u32,
        nom_sjw: u32,
        data_bitrate: u32,
        data_tseg1: u32,
        data_tseg2: u32,
        data_sjw: u32,
    ) -> Result<Self> {
        if nom_bitrate == 0 || data_bitrate == 0 {
            return Err(invalid("bitrates must be positive"));
        }
        let nbt = bit_time(nom_tseg1, nom_tseg2)?;
        let dbt = bit_time(data_tseg1, data_tseg2)?;
        let nom_brp = nearest_prescaler(f_clock, nom_bitrate, nbt);
        let data_brp = nearest_prescaler(f_clock, data_bitrate, dbt);
        let timing = Self::new(
            f_clock, nom_brp, nom_tseg1, nom_tseg2, nom_sjw, data_brp, data_tseg1, data_tseg2,
            data_sjw,
        )?;
        if !deviation_ok(timing.nom_bitrate_exact(), nom_bitrate)
            || !deviation_ok(timing.data_bitrate_exact(), data_bitrate)
        {
            return Err(invalid(format!(
                "effective bitrates {}/{} deviate from {}/{}",
                timing.nom_bitrate(),
                timing.data_bitrate(),
                nom_bitrate,
                data_bitrate
            )));
        }
        Ok(timing)
    }

    /// Equivalent timing for another clock frequency
    pub fn recreate_with_f_clock(&self, f_clock: u32) -> Result<Self> {
        if let Ok(timing) = Self::from_bitrate_and_segments(
            f_clock,
            self.nom_bitrate(),
            self.nom_tseg1,
            self.nom_tseg2,
            self.nom_sjw,
            self.data_bitrate(),
            self.data_tseg1,
            self.data_tseg2,
            self.data_sjw,
        ) {
            if timing.is_strict() {
                return Ok(timing);
            }
        }

        let base = Self::from_sample_point(
            f_clock,
            self.nom_bitrate(),
            self.nom_sample_point(),
            self.data_bitrate(),
            self.data_sample_point(),
        )?;
        if (base.nom_sample_point() - self.nom_sample_point()).abs() > 1.0
            || (base.data_sample_point() - self.data_sample_point()).abs() > 1.0
        {
            return Err(invalid(format!(
                "sample points not reachable at {} Hz",
                f_clock
            )));
        }
        let nom_sjw = rescale_sjw(self.nom_sjw, self.nbt(), base.nbt(), 128.min(base.nom_tseg2));
        let data_sjw = rescale_sjw(self.data_sjw, self.dbt(), base.dbt(), 16.min(base.data_tseg2));
        Self::new(
            f_clock,
            base.nom_brp,
            base.nom_tseg1,
            base.nom_tseg2,
            nom_sjw,
            base.data_brp,
            base.data_tseg1,
            base.data_tseg2,
            data_sjw,
        )
    }

    pub fn f_clock(&self) -> u32 {
        self.f_clock
    }

    pub fn nom_brp(&self) -> u32 {
        self.nom_brp
    }

    pub fn nom_tseg1(&self) -> u32 {
        self.nom_tseg1
    }

    pub fn nom_tseg2(&self) -> u32 {
        self.nom_tseg2
    }

    pub fn nom_sjw(&self) -> u32 {
        self.nom_sjw
    }

    pub fn data_brp(&self) -> u32 {
        self.data_brp
    }

    pub fn data_tseg1(&self) -> u32 {
        self.data_tseg1
    }

    pub fn data_tseg2(&self) -> u32 {
        self.data_tseg2
    }

    pub fn data_sjw(&self) -> u32 {
        self.data_sjw
    }

    /// Nominal time quanta per bit
    pub fn nbt(&self) -> u32 {
        1 + self.nom_tseg1 + self.nom_tseg2
    }

    /// Data phase time quanta per bit
    pub fn dbt(&self) -> u32 {
        1 + self.data_tseg1 + self.data_tseg2
    }

    pub fn nom_bitrate(&self) -> u32 {
        (self.f_clock as u64 / (self.nom_brp as u64 * self.nbt() as u64)) as u32
    }

    pub fn data_bitrate(&self) -> u32 {
        (self.f_clock as u64 / (self.data_brp as u64 * self.dbt() as u64)) as u32
    }

    fn nom_bitrate_exact(&self) -> f64 {
        self.f_clock as f64 / (self.nom_brp as f64 * self.nbt() as f64)
    }

    fn data_bitrate_exact(&self) -> f64 {
        self.f_clock as f64 / (self.data_brp as f64 * self.dbt() as f64)
    }

    pub fn nom_sample_point(&self) -> f64 {
        100.0 * (1 + self.nom_tseg1) as f64 / self.nbt() as f64
    }

    pub fn data_sample_point(&self) -> f64 {
        100.0 * (1 + self.data_tseg1) as f64 / self.dbt() as f64
    }
}

impl fmt::Display for BitTimingFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} bit/s, sample points {:.2}%/{:.2}%, f_clock {} Hz \
             (nominal brp {} tseg1 {} tseg2 {} sjw {}, data brp {} tseg1 {} tseg2 {} sjw {})",
            self.nom_bitrate(),
            self.data_bitrate(),
            self.nom_sample_point(),
            self.data_sample_point(),
            self.f_clock,
            self.nom_brp,
            self.nom_tseg1,
            self.nom_tseg2,
            self.nom_sjw,
            self.data_brp,
            self.data_tseg1,
            self.data_tseg2,
            self.data_sjw
        )
    }
}

/// Either a classic or an FD bit timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Classic(BitTiming),
    Fd(BitTimingFd),
}

impl Timing {
    pub fn is_fd(&self) -> bool {
        matches!(self, Timing::Fd(_))
    }

    pub fn f_clock(&self) -> u32 {
        match self {
            Timing::Classic(t) => t.f_clock(),
            Timing::Fd(t) => t.f_clock(),
        }
    }

    /// Equivalent timing for another clock frequency
    pub fn recreate_with_f_clock(&self, f_clock: u32) -> Result<Self> {
        match self {
            Timing::Classic(t) => t.recreate_with_f_clock(f_clock).map(Timing::Classic),
            Timing::Fd(t) => t.recreate_with_f_clock(f_clock).map(Timing::Fd),
        }
    }
}

impl From<BitTiming> for Timing {
    fn from(timing: BitTiming) -> Self {
        Timing::Classic(timing)
    }
}

impl From<BitTimingFd> for Timing {
    fn from(timing: BitTimingFd) -> Self {
        Timing::Fd(timing)
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timing::Classic(t) => write!(f, "classic {}", t),
            Timing::Fd(t) => write!(f, "FD {}", t),
        }
    }
}
