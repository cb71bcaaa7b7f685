//! Built-in timing tables for common bitrates

use super::{BitTiming, BitTimingFd, Timing, SJA1000_CLOCK};
use crate::types::{Result, WuenscheError};

/// Reference clock of the generic nominal+data table
const GENERIC_CLOCK: u32 = 40_000_000;

/// Reference clock of the generic nominal-only table
const GENERIC_NOMINAL_CLOCK: u32 = 8_000_000;

/// SJA1000 bus timing registers (btr0, btr1) at 8 MHz
const SJA1000_BTR: [(u32, (u8, u8)); 9] = [
    (1_000_000, (0x00, 0x14)),
    (800_000, (0x00, 0x16)),
    (500_000, (0x00, 0x1C)),
    (250_000, (0x01, 0x1C)),
    (125_000, (0x03, 0x1C)),
    (100_000, (0x04, 0x1C)),
    (50_000, (0x09, 0x1C)),
    (20_000, (0x18, 0x1C)),
    (10_000, (0x31, 0x1C)),
];

/// Generic segments (brp, tseg1, tseg2, sjw) at 40 MHz
const GENERIC_SEGMENTS: [(u32, (u32, u32, u32, u32)); 13] = [
    (5_000_000, (1, 5, 2, 1)),
    (4_000_000, (1, 7, 2, 1)),
    (2_500_000, (1, 11, 4, 3)),
    (2_000_000, (1, 15, 4, 3)),
    (1_000_000, (2, 15, 4, 3)),
    (800_000, (5, 7, 2, 1)),
    (500_000, (4, 15, 4, 3)),
    (250_000, (8, 15, 4, 3)),
    (125_000, (16, 15, 4, 3)),
    (100_000, (20, 15, 4, 3)),
    (50_000, (20, 31, 8, 7)),
    (20_000, (50, 31, 8, 7)),
    (10_000, (100, 31, 8, 7)),
];

/// Generic nominal segments (brp, tseg1, tseg2, sjw) at 8 MHz
const GENERIC_NOMINAL_SEGMENTS: [(u32, (u32, u32, u32, u32)); 9] = [
    (1_000_000, (1, 5, 2, 1)),
    (800_000, (2, 3, 1, 1)),
    (500_000, (2, 5, 2, 1)),
    (250_000, (4, 5, 2, 1)),
    (125_000, (8, 5, 2, 1)),
    (100_000, (8, 7, 2, 1)),
    (50_000, (8, 15, 4, 3)),
    (20_000, (10, 31, 8, 7)),
    (10_000, (20, 31, 8, 7)),
];

fn lookup<T: Copy>(table: &[(u32, T)], bitrate: u32) -> Option<T> {
    table
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, entry)| *entry)
}

fn not_tabulated(kind: &str, bitrate: u32) -> WuenscheError {
    WuenscheError::NoSuitableTiming(format!("no {} table entry for {} bit/s", kind, bitrate))
}

/// Classic timing from the SJA1000 register table, rescaled if `f_clock` differs from 8 MHz
pub fn sja1000_timing(bitrate: u32, f_clock: Option<u32>) -> Result<BitTiming> {
    let (btr0, btr1) =
        lookup(&SJA1000_BTR, bitrate).ok_or_else(|| not_tabulated("SJA1000", bitrate))?;
    let timing = BitTiming::from_registers(SJA1000_CLOCK, btr0, btr1)?;
    match f_clock {
        None => Ok(timing),
        Some(clock) if clock == SJA1000_CLOCK => Ok(timing),
        Some(clock) => timing.recreate_with_f_clock(clock),
    }
}

/// Timing from the generic tables
///
/// With only a nominal bitrate this yields a classic timing: from the 8 MHz table when the
/// clock is unset or 8 MHz, otherwise from the 40 MHz table rescaled to `f_clock`. With a
/// data bitrate both phases come from the 40 MHz table.
pub fn generic_timing(
    nom_bitrate: u32,
    data_bitrate: Option<u32>,
    f_clock: Option<u32>,
) -> Result<Timing> {
    let Some(data_bitrate) = data_bitrate else {
        if f_clock.map_or(true, |clock| clock == GENERIC_NOMINAL_CLOCK) {
            let (brp, tseg1, tseg2, sjw) = lookup(&GENERIC_NOMINAL_SEGMENTS, nom_bitrate)
                .ok_or_else(|| not_tabulated("generic nominal", nom_bitrate))?;
            let timing = BitTiming::new(GENERIC_NOMINAL_CLOCK, brp, tseg1, tseg2, sjw, 1)?;
            return Ok(Timing::Classic(timing));
        }
        let (brp, tseg1, tseg2, sjw) = lookup(&GENERIC_SEGMENTS, nom_bitrate)
            .ok_or_else(|| not_tabulated("generic", nom_bitrate))?;
        let timing = Timing::Classic(BitTiming::new(GENERIC_CLOCK, brp, tseg1, tseg2, sjw, 1)?);
        return rescale(timing, f_clock);
    };

    let data = lookup(&GENERIC_SEGMENTS, data_bitrate)
        .ok_or_else(|| not_tabulated("generic data", data_bitrate))?;
    let nominal = lookup(&GENERIC_SEGMENTS, nom_bitrate)
        .ok_or_else(|| not_tabulated("generic", nom_bitrate))?;
    let timing = BitTimingFd::new(
        GENERIC_CLOCK,
        nominal.0,
        nominal.1,
        nominal.2,
        nominal.3,
        data.0,
        data.1,
        data.2,
        data.3,
    )?;
    rescale(Timing::Fd(timing), f_clock)
}

fn rescale(timing: Timing, f_clock: Option<u32>) -> Result<Timing> {
    match f_clock {
        Some(clock) if clock != timing.f_clock() => timing.recreate_with_f_clock(clock),
        _ => Ok(timing),
    }
}
