//! Conversion between abstract bit timing and controller register sets

use super::params::{
    Cccr, ControllerFamily, ControllerParams, GenericConfig, GenericParams, Lpc546xxParams,
    SegmentRegs, Sja1000Params,
};
use super::{BitTiming, BitTimingFd, Timing, SJA1000_CLOCK};
use crate::types::{Result, WuenscheError};

/// Data phase enable bit of the LPC546xx DBTP register
const DBTP_ENABLE: u32 = 1 << 23;

fn unsupported(family: ControllerFamily, reason: impl Into<String>) -> WuenscheError {
    WuenscheError::UnsupportedByController {
        family,
        reason: reason.into(),
    }
}

/// Check that `value` fits a register field holding `value - 1` in `max - 1`
fn fit(family: ControllerFamily, name: &str, value: u32, max: u32) -> Result<u32> {
    if value == 0 || value > max {
        return Err(unsupported(
            family,
            format!("{} = {} outside 1..={}", name, value, max),
        ));
    }
    Ok(value - 1)
}

fn u16_field(name: &str, value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        unsupported(
            ControllerFamily::Generic,
            format!("{} = {} exceeds 16 bits", name, value),
        )
    })
}

fn generic_segments(brp: u32, tseg1: u32, tseg2: u32, sjw: u32) -> Result<SegmentRegs> {
    Ok(SegmentRegs {
        tseg1: u16_field("tseg1", tseg1)?,
        tseg2: u16_field("tseg2", tseg2)?,
        brp: u16_field("brp", brp)?,
        sjw: u16_field("sjw", sjw)?,
    })
}

/// Pack classic segments into the LPC546xx NBTP layout
fn nbtp(brp: u32, tseg1: u32, tseg2: u32, sjw: u32) -> Result<u32> {
    let family = ControllerFamily::Lpc546xx;
    Ok(fit(family, "tseg2", tseg2, 0x80)?
        | fit(family, "tseg1", tseg1, 0x100)? << 8
        | fit(family, "brp", brp, 0x200)? << 16
        | fit(family, "sjw", sjw, 0x80)? << 25)
}

/// Pack data phase segments into the LPC546xx DBTP layout
fn dbtp(timing: &BitTimingFd) -> Result<u32> {
    let family = ControllerFamily::Lpc546xx;
    Ok(fit(family, "data_sjw", timing.data_sjw(), 0x10)?
        | fit(family, "data_tseg2", timing.data_tseg2(), 0x10)? << 4
        | fit(family, "data_tseg1", timing.data_tseg1(), 0x20)? << 8
        | fit(family, "data_brp", timing.data_brp(), 0x20)? << 16
        | DBTP_ENABLE)
}

/// Transmitter delay compensation offset, half the data bit time plus three quanta
fn tdcr(timing: &BitTimingFd) -> u32 {
    let offset = ((3 + timing.data_tseg1() + timing.data_tseg2()) as f64 / 2.0).round_ties_even();
    (offset as u32) << 8
}

fn sja1000_registers(timing: &BitTiming) -> Result<(u8, u8)> {
    let family = ControllerFamily::Sja1000;
    let brp = fit(family, "brp", timing.brp(), 64)?;
    let sjw = fit(family, "sjw", timing.sjw(), 4)?;
    let tseg1 = fit(family, "tseg1", timing.tseg1(), 16)?;
    let tseg2 = fit(family, "tseg2", timing.tseg2(), 8)?;
    let sam = if timing.nof_samples() == 3 { 0x80 } else { 0 };
    Ok(((sjw << 6 | brp) as u8, (sam | tseg2 << 4 | tseg1) as u8))
}

/// Build device-native parameters for `family`
pub fn to_controller_params(timing: &Timing, family: ControllerFamily) -> Result<ControllerParams> {
    match (timing, family) {
        (Timing::Classic(t), ControllerFamily::Generic) => {
            let segments = generic_segments(t.brp(), t.tseg1(), t.tseg2(), t.sjw())?;
            Ok(ControllerParams::Generic(GenericParams {
                config: GenericConfig::CLASSIC,
                can_clk: t.f_clock(),
                nominal: segments,
                data: segments,
                reserved: [0; 5],
            }))
        }
        (Timing::Fd(t), ControllerFamily::Generic) => Ok(ControllerParams::Generic(GenericParams {
            config: GenericConfig::FD,
            can_clk: t.f_clock(),
            nominal: generic_segments(t.nom_brp(), t.nom_tseg1(), t.nom_tseg2(), t.nom_sjw())?,
            data: generic_segments(t.data_brp(), t.data_tseg1(), t.data_tseg2(), t.data_sjw())?,
            reserved: [0; 5],
        })),
        (Timing::Classic(t), ControllerFamily::Sja1000) => {
            let normalised = if t.f_clock() == SJA1000_CLOCK {
                *t
            } else {
                t.recreate_with_f_clock(SJA1000_CLOCK).map_err(|e| {
                    unsupported(family, format!("cannot run at the 8 MHz reference: {}", e))
                })?
            };
            let (btr0, btr1) = sja1000_registers(&normalised)?;
            Ok(ControllerParams::Sja1000(Sja1000Params::with_btr(btr0, btr1)))
        }
        (Timing::Fd(_), ControllerFamily::Sja1000) => {
            Err(unsupported(family, "CAN-FD is not supported"))
        }
        (Timing::Classic(t), ControllerFamily::Lpc546xx) => {
            Ok(ControllerParams::Lpc546xx(Lpc546xxParams {
                nbtp: nbtp(t.brp(), t.tseg1(), t.tseg2(), t.sjw())?,
                cclk: t.f_clock(),
                ..Lpc546xxParams::default()
            }))
        }
        (Timing::Fd(t), ControllerFamily::Lpc546xx) => {
            Ok(ControllerParams::Lpc546xx(Lpc546xxParams {
                dbtp: dbtp(t)?,
                cccr: (Cccr::FDOE | Cccr::BRSE).bits(),
                nbtp: nbtp(t.nom_brp(), t.nom_tseg1(), t.nom_tseg2(), t.nom_sjw())?,
                tdcr: tdcr(t),
                cclk: t.f_clock(),
                ..Lpc546xxParams::default()
            }))
        }
    }
}

/// Recover the bit timing encoded in a parameter set
pub fn from_controller_params(params: &ControllerParams) -> Result<Timing> {
    let fd = params.is_fd();
    match params {
        ControllerParams::Generic(p) => {
            let n = p.nominal;
            if fd {
                let d = p.data;
                Ok(Timing::Fd(BitTimingFd::new(
                    p.can_clk,
                    n.brp as u32,
                    n.tseg1 as u32,
                    n.tseg2 as u32,
                    n.sjw as u32,
                    d.brp as u32,
                    d.tseg1 as u32,
                    d.tseg2 as u32,
                    d.sjw as u32,
                )?))
            } else {
                Ok(Timing::Classic(BitTiming::new(
                    p.can_clk,
                    n.brp as u32,
                    n.tseg1 as u32,
                    n.tseg2 as u32,
                    n.sjw as u32,
                    1,
                )?))
            }
        }
        ControllerParams::Sja1000(p) => Ok(Timing::Classic(BitTiming::from_registers(
            SJA1000_CLOCK,
            p.btr0,
            p.btr1,
        )?)),
        ControllerParams::Lpc546xx(p) => {
            let nom_tseg1 = ((p.nbtp >> 8) & 0xFF) + 1;
            let nom_tseg2 = (p.nbtp & 0x7F) + 1;
            let nom_brp = ((p.nbtp >> 16) & 0x1FF) + 1;
            let nom_sjw = ((p.nbtp >> 25) & 0x7F) + 1;
            if fd {
                Ok(Timing::Fd(BitTimingFd::new(
                    p.cclk,
                    nom_brp,
                    nom_tseg1,
                    nom_tseg2,
                    nom_sjw,
                    ((p.dbtp >> 16) & 0x1F) + 1,
                    ((p.dbtp >> 8) & 0x1F) + 1,
                    ((p.dbtp >> 4) & 0x0F) + 1,
                    (p.dbtp & 0x0F) + 1,
                )?))
            } else {
                Ok(Timing::Classic(BitTiming::new(
                    p.cclk, nom_brp, nom_tseg1, nom_tseg2, nom_sjw, 1,
                )?))
            }
        }
    }
}
