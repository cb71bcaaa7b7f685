//! Controller parameter register sets
//!
//! One variant per controller family, each holding the full register layout the device
//! expects. The packed form is the `cc_type` byte followed by a 44-byte union.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

use crate::types::{Result, WuenscheError};

/// Packed length of a parameter block: `cc_type` plus the register union
pub const PARAMS_LEN: usize = 45;

const UNION_LEN: usize = 44;

/// Supported CAN controller families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerFamily {
    Generic,
    Sja1000,
    Lpc546xx,
}

impl ControllerFamily {
    /// Vendor `cc_type` code
    pub fn code(&self) -> u8 {
        match self {
            ControllerFamily::Sja1000 => 2,
            ControllerFamily::Lpc546xx => 5,
            ControllerFamily::Generic => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(ControllerFamily::Sja1000),
            5 => Some(ControllerFamily::Lpc546xx),
            6 => Some(ControllerFamily::Generic),
            _ => None,
        }
    }

    /// Family used for the retry after the device rejects generic parameters
    pub fn fallback(fd: bool) -> Self {
        if fd {
            ControllerFamily::Lpc546xx
        } else {
            ControllerFamily::Sja1000
        }
    }
}

impl fmt::Display for ControllerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerFamily::Generic => write!(f, "generic"),
            ControllerFamily::Sja1000 => write!(f, "SJA1000"),
            ControllerFamily::Lpc546xx => write!(f, "LPC546xx"),
        }
    }
}

bitflags! {
    /// Generic controller configuration word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GenericConfig: u32 {
        const FD = 0x01;
        const FD_BOSCH = 0x02;
        const LISTEN_ONLY = 0x10;
        const SINGLE_SHOT = 0x20;
        const VERSION_MINOR = 0x0F00_0000;
        const VERSION_MAJOR = 0xF000_0000;
    }
}

impl GenericConfig {
    /// Classic operation, no flags set
    pub const CLASSIC: Self = Self::empty();
}

bitflags! {
    /// LPC546xx CC control register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Cccr: u32 {
        const INIT = 0x0001;
        const ASM = 0x0004;
        const MON = 0x0020;
        const DAR = 0x0040;
        const FDOE = 0x0100;
        const BRSE = 0x0200;
        const PXHD = 0x1000;
        const EFBI = 0x2000;
        const TXP = 0x4000;
        const NISO = 0x8000;
    }
}

/// One set of bit timing segments as stored by the generic controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentRegs {
    pub tseg1: u16,
    pub tseg2: u16,
    pub brp: u16,
    pub sjw: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericParams {
    pub config: GenericConfig,
    pub can_clk: u32,
    pub nominal: SegmentRegs,
    pub data: SegmentRegs,
    pub reserved: [u32; 5],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sja1000Params {
    pub mode: u8,
    pub acc_code: [u8; 4],
    pub acc_mask: [u8; 4],
    pub btr0: u8,
    pub btr1: u8,
    pub outp_contr: u8,
}

impl Sja1000Params {
    pub const DEFAULT_ACC_CODE: u8 = 0x55;
    pub const DEFAULT_ACC_MASK: u8 = 0xFF;
    pub const DEFAULT_OUTP_CONTR: u8 = 0xDA;

    /// Default register set around the given bus timing registers
    pub fn with_btr(btr0: u8, btr1: u8) -> Self {
        Self {
            mode: 0,
            acc_code: [Self::DEFAULT_ACC_CODE; 4],
            acc_mask: [Self::DEFAULT_ACC_MASK; 4],
            btr0,
            btr1,
            outp_contr: Self::DEFAULT_OUTP_CONTR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lpc546xxParams {
    pub dbtp: u32,
    pub test: u32,
    pub cccr: u32,
    pub nbtp: u32,
    pub psr: u32,
    pub tdcr: u32,
    pub gfc: u32,
    pub sidfc: u32,
    pub xidfc: u32,
    pub xidam: u32,
    pub cclk: u32,
}

/// Register holding a family's mode bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterField {
    GenericConfig,
    Sja1000Mode,
    Lpc546xxCccr,
}

/// Mode bit assignments of one controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyBits {
    pub family: ControllerFamily,
    pub field: RegisterField,
    pub listen_only: u32,
    /// Bits marking FD operation; zero if the family cannot run FD
    pub fd: u32,
}

/// Listen-only and FD bit locations per family
pub static FAMILY_BITS: [FamilyBits; 3] = [
    FamilyBits {
        family: ControllerFamily::Generic,
        field: RegisterField::GenericConfig,
        listen_only: GenericConfig::LISTEN_ONLY.bits(),
        fd: GenericConfig::FD.bits() | GenericConfig::FD_BOSCH.bits(),
    },
    FamilyBits {
        family: ControllerFamily::Sja1000,
        field: RegisterField::Sja1000Mode,
        listen_only: 0x02,
        fd: 0,
    },
    FamilyBits {
        family: ControllerFamily::Lpc546xx,
        field: RegisterField::Lpc546xxCccr,
        listen_only: Cccr::MON.bits(),
        fd: Cccr::FDOE.bits(),
    },
];

/// Device-native controller parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerParams {
    Generic(GenericParams),
    Sja1000(Sja1000Params),
    Lpc546xx(Lpc546xxParams),
}

impl ControllerParams {
    pub fn family(&self) -> ControllerFamily {
        match self {
            ControllerParams::Generic(_) => ControllerFamily::Generic,
            ControllerParams::Sja1000(_) => ControllerFamily::Sja1000,
            ControllerParams::Lpc546xx(_) => ControllerFamily::Lpc546xx,
        }
    }

    /// Mode bit table entry for this family
    pub fn bits(&self) -> &'static FamilyBits {
        let family = self.family();
        // every family has exactly one entry
        FAMILY_BITS
            .iter()
            .find(|b| b.family == family)
            .unwrap_or(&FAMILY_BITS[0])
    }

    /// Value of a mode register, if this family has it
    pub fn register(&self, field: RegisterField) -> Option<u32> {
        match (self, field) {
            (ControllerParams::Generic(p), RegisterField::GenericConfig) => Some(p.config.bits()),
            (ControllerParams::Sja1000(p), RegisterField::Sja1000Mode) => Some(p.mode as u32),
            (ControllerParams::Lpc546xx(p), RegisterField::Lpc546xxCccr) => Some(p.cccr),
            _ => None,
        }
    }

    fn set_register(&mut self, field: RegisterField, value: u32) {
        match (self, field) {
            (ControllerParams::Generic(p), RegisterField::GenericConfig) => {
                p.config = GenericConfig::from_bits_retain(value)
            }
            (ControllerParams::Sja1000(p), RegisterField::Sja1000Mode) => p.mode = value as u8,
            (ControllerParams::Lpc546xx(p), RegisterField::Lpc546xxCccr) => p.cccr = value,
            _ => {}
        }
    }

    fn mode_register(&self) -> u32 {
        self.register(self.bits().field).unwrap_or(0)
    }

    pub fn is_fd(&self) -> bool {
        self.mode_register() & self.bits().fd != 0
    }

    pub fn listen_only(&self) -> bool {
        self.mode_register() & self.bits().listen_only != 0
    }

    pub fn set_listen_only(&mut self, listen_only: bool) {
        let bits = *self.bits();
        let value = self.mode_register();
        let value = if listen_only {
            value | bits.listen_only
        } else {
            value & !bits.listen_only
        };
        self.set_register(bits.field, value);
    }

    /// Field-exact copy from another parameter set of the same family
    pub fn copy_from(&mut self, src: &ControllerParams) -> Result<()> {
        if self.family() != src.family() {
            return Err(WuenscheError::ControllerFamilyMismatch {
                expected: self.family(),
                found: src.family(),
            });
        }
        *self = *src;
        Ok(())
    }

    /// Packed little-endian layout
    pub fn to_bytes(&self) -> [u8; PARAMS_LEN] {
        let mut out = [0u8; PARAMS_LEN];
        out[0] = self.family().code();
        let regs = &mut out[1..];
        match self {
            ControllerParams::Generic(p) => {
                LittleEndian::write_u32(&mut regs[0..4], p.config.bits());
                LittleEndian::write_u32(&mut regs[4..8], p.can_clk);
                let segments = [
                    p.nominal.tseg1,
                    p.nominal.tseg2,
                    p.nominal.brp,
                    p.nominal.sjw,
                    p.data.tseg1,
                    p.data.tseg2,
                    p.data.brp,
                    p.data.sjw,
                ];
                LittleEndian::write_u16_into(&segments, &mut regs[8..24]);
                LittleEndian::write_u32_into(&p.reserved, &mut regs[24..44]);
            }
            ControllerParams::Sja1000(p) => {
                regs[0] = p.mode;
                regs[1..5].copy_from_slice(&p.acc_code);
                regs[5..9].copy_from_slice(&p.acc_mask);
                regs[9] = p.btr0;
                regs[10] = p.btr1;
                regs[11] = p.outp_contr;
            }
            ControllerParams::Lpc546xx(p) => {
                let words = [
                    p.dbtp, p.test, p.cccr, p.nbtp, p.psr, p.tdcr, p.gfc, p.sidfc, p.xidfc,
                    p.xidam, p.cclk,
                ];
                LittleEndian::write_u32_into(&words, &mut regs[0..44]);
            }
        }
        out
    }

    /// Parse a packed parameter block
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < PARAMS_LEN {
            return Err(WuenscheError::MalformedFrame(format!(
                "parameter block is {} bytes, expected {}",
                raw.len(),
                PARAMS_LEN
            )));
        }
        let family = ControllerFamily::from_code(raw[0]).ok_or_else(|| {
            WuenscheError::MalformedFrame(format!("unknown controller type {}", raw[0]))
        })?;
        let mut rdr = Cursor::new(&raw[1..1 + UNION_LEN]);
        let truncated = |e: std::io::Error| WuenscheError::MalformedFrame(e.to_string());

        let params = match family {
            ControllerFamily::Generic => {
                let config = GenericConfig::from_bits_retain(
                    rdr.read_u32::<LittleEndian>().map_err(truncated)?,
                );
                let can_clk = rdr.read_u32::<LittleEndian>().map_err(truncated)?;
                let mut segments = [0u16; 8];
                rdr.read_u16_into::<LittleEndian>(&mut segments)
                    .map_err(truncated)?;
                let mut reserved = [0u32; 5];
                rdr.read_u32_into::<LittleEndian>(&mut reserved)
                    .map_err(truncated)?;
                ControllerParams::Generic(GenericParams {
                    config,
                    can_clk,
                    nominal: SegmentRegs {
                        tseg1: segments[0],
                        tseg2: segments[1],
                        brp: segments[2],
                        sjw: segments[3],
                    },
                    data: SegmentRegs {
                        tseg1: segments[4],
                        tseg2: segments[5],
                        brp: segments[6],
                        sjw: segments[7],
                    },
                    reserved,
                })
            }
            ControllerFamily::Sja1000 => {
                let regs = &raw[1..];
                ControllerParams::Sja1000(Sja1000Params {
                    mode: regs[0],
                    acc_code: [regs[1], regs[2], regs[3], regs[4]],
                    acc_mask: [regs[5], regs[6], regs[7], regs[8]],
                    btr0: regs[9],
                    btr1: regs[10],
                    outp_contr: regs[11],
                })
            }
            ControllerFamily::Lpc546xx => {
                let mut w = [0u32; 11];
                rdr.read_u32_into::<LittleEndian>(&mut w).map_err(truncated)?;
                ControllerParams::Lpc546xx(Lpc546xxParams {
                    dbtp: w[0],
                    test: w[1],
                    cccr: w[2],
                    nbtp: w[3],
                    psr: w[4],
                    tdcr: w[5],
                    gfc: w[6],
                    sidfc: w[7],
                    xidfc: w[8],
                    xidam: w[9],
                    cclk: w[10],
                })
            }
        };
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic() -> ControllerParams {
        ControllerParams::Generic(GenericParams {
            config: GenericConfig::FD,
            can_clk: 40_000_000,
            nominal: SegmentRegs {
                tseg1: 15,
                tseg2: 4,
                brp: 4,
                sjw: 3,
            },
            data: SegmentRegs {
                tseg1: 15,
                tseg2: 4,
                brp: 1,
                sjw: 3,
            },
            reserved: [0; 5],
        })
    }

    #[test]
    fn test_family_codes() {
        for family in [
            ControllerFamily::Generic,
            ControllerFamily::Sja1000,
            ControllerFamily::Lpc546xx,
        ] {
            assert_eq!(ControllerFamily::from_code(family.code()), Some(family));
        }
        assert_eq!(ControllerFamily::from_code(4), None);
        assert_eq!(ControllerFamily::fallback(true), ControllerFamily::Lpc546xx);
        assert_eq!(ControllerFamily::fallback(false), ControllerFamily::Sja1000);
    }

    #[test]
    fn test_listen_only_bits() {
        let mut params = generic();
        assert!(!params.listen_only());
        params.set_listen_only(true);
        assert!(params.listen_only());
        assert_eq!(params.register(RegisterField::GenericConfig), Some(0x11));
        params.set_listen_only(false);
        assert_eq!(params.register(RegisterField::GenericConfig), Some(0x01));

        let mut sja = ControllerParams::Sja1000(Sja1000Params::with_btr(0x00, 0x1C));
        sja.set_listen_only(true);
        assert_eq!(sja.register(RegisterField::Sja1000Mode), Some(0x02));
        assert!(!sja.is_fd());

        let mut lpc = ControllerParams::Lpc546xx(Lpc546xxParams {
            cccr: (Cccr::FDOE | Cccr::BRSE).bits(),
            ..Lpc546xxParams::default()
        });
        lpc.set_listen_only(true);
        assert_eq!(lpc.register(RegisterField::Lpc546xxCccr), Some(0x320));
        assert!(lpc.is_fd());
    }

    #[test]
    fn test_fd_detection_bosch() {
        let mut params = generic();
        if let ControllerParams::Generic(p) = &mut params {
            p.config = GenericConfig::FD_BOSCH;
        }
        assert!(params.is_fd());
    }

    #[test]
    fn test_copy_from() {
        let mut dst = ControllerParams::Generic(GenericParams {
            config: GenericConfig::CLASSIC,
            can_clk: 8_000_000,
            nominal: SegmentRegs::default(),
            data: SegmentRegs::default(),
            reserved: [0; 5],
        });
        dst.copy_from(&generic()).unwrap();
        assert_eq!(dst, generic());

        let sja = ControllerParams::Sja1000(Sja1000Params::with_btr(0x00, 0x1C));
        let err = dst.copy_from(&sja).unwrap_err();
        assert!(matches!(
            err,
            WuenscheError::ControllerFamilyMismatch {
                expected: ControllerFamily::Generic,
                found: ControllerFamily::Sja1000
            }
        ));
        assert_eq!(dst, generic());
    }

    #[test]
    fn test_packed_layout() {
        let bytes = generic().to_bytes();
        assert_eq!(bytes[0], 6);
        assert_eq!(&bytes[1..5], &[0x01, 0, 0, 0]);
        assert_eq!(&bytes[5..9], &40_000_000u32.to_le_bytes());
        assert_eq!(&bytes[9..11], &[15, 0]);
        assert_eq!(ControllerParams::from_bytes(&bytes).unwrap(), generic());

        let sja = ControllerParams::Sja1000(Sja1000Params::with_btr(0x01, 0x1C));
        let bytes = sja.to_bytes();
        assert_eq!(&bytes[..13], &[2, 0, 0x55, 0x55, 0x55, 0x55, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x1C, 0xDA]);
        assert_eq!(ControllerParams::from_bytes(&bytes).unwrap(), sja);
    }

    #[test]
    fn test_from_bytes_rejects_bad_blocks() {
        assert!(ControllerParams::from_bytes(&[6; 10]).is_err());
        let mut bytes = [0u8; PARAMS_LEN];
        bytes[0] = 4;
        assert!(matches!(
            ControllerParams::from_bytes(&bytes),
            Err(WuenscheError::MalformedFrame(_))
        ));
    }
}
