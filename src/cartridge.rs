//! Cartridge functions and structures.
//!
//! Models the cartridge header, the banked ROM/RAM address space and
//! the supported MBCs (Memory Bank Controllers). The MBC set is a
//! closed one so the controllers are represented as a tagged enum
//! matched in the read and write paths, no dynamic dispatch involved.

use core::fmt;
use std::{
    cmp::max,
    fmt::{Display, Formatter},
};

use dotmatrix_common::util::bytes_to_string;

use crate::{error::Error, gb::GameBoyMode, warnln};

pub const ROM_BANK_SIZE: usize = 16384;
pub const RAM_BANK_SIZE: usize = 8192;

/// The set of memory bank controllers the core knows how to drive.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MbcKind {
    NoMbc,
    Mbc1,
    Mbc3,
    Mbc5,
}

impl MbcKind {
    pub fn description(&self) -> &'static str {
        match self {
            MbcKind::NoMbc => "No MBC",
            MbcKind::Mbc1 => "MBC1",
            MbcKind::Mbc3 => "MBC3",
            MbcKind::Mbc5 => "MBC5",
        }
    }
}

impl Display for MbcKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Cartridge type as encoded at header offset 0x0147.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CartridgeType {
    RomOnly = 0x00,
    Mbc1 = 0x01,
    Mbc1Ram = 0x02,
    Mbc1RamBattery = 0x03,
    Mbc3TimerBattery = 0x0f,
    Mbc3TimerRamBattery = 0x10,
    Mbc3 = 0x11,
    Mbc3Ram = 0x12,
    Mbc3RamBattery = 0x13,
    Mbc5 = 0x19,
    Mbc5Ram = 0x1a,
    Mbc5RamBattery = 0x1b,
}

impl CartridgeType {
    pub fn from_u8(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0x00 => CartridgeType::RomOnly,
            0x01 => CartridgeType::Mbc1,
            0x02 => CartridgeType::Mbc1Ram,
            0x03 => CartridgeType::Mbc1RamBattery,
            0x0f => CartridgeType::Mbc3TimerBattery,
            0x10 => CartridgeType::Mbc3TimerRamBattery,
            0x11 => CartridgeType::Mbc3,
            0x12 => CartridgeType::Mbc3Ram,
            0x13 => CartridgeType::Mbc3RamBattery,
            0x19 => CartridgeType::Mbc5,
            0x1a => CartridgeType::Mbc5Ram,
            0x1b => CartridgeType::Mbc5RamBattery,
            value => return Err(Error::UnsupportedCartridge(value)),
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            CartridgeType::RomOnly => "ROM Only",
            CartridgeType::Mbc1 => "MBC1",
            CartridgeType::Mbc1Ram => "MBC1 + RAM",
            CartridgeType::Mbc1RamBattery => "MBC1 + RAM + Battery",
            CartridgeType::Mbc3TimerBattery => "MBC3 + Timer + Battery",
            CartridgeType::Mbc3TimerRamBattery => "MBC3 + Timer + RAM + Battery",
            CartridgeType::Mbc3 => "MBC3",
            CartridgeType::Mbc3Ram => "MBC3 + RAM",
            CartridgeType::Mbc3RamBattery => "MBC3 + RAM + Battery",
            CartridgeType::Mbc5 => "MBC5",
            CartridgeType::Mbc5Ram => "MBC5 + RAM",
            CartridgeType::Mbc5RamBattery => "MBC5 + RAM + Battery",
        }
    }

    pub fn mbc_kind(&self) -> MbcKind {
        match self {
            CartridgeType::RomOnly => MbcKind::NoMbc,
            CartridgeType::Mbc1 | CartridgeType::Mbc1Ram | CartridgeType::Mbc1RamBattery => {
                MbcKind::Mbc1
            }
            CartridgeType::Mbc3TimerBattery
            | CartridgeType::Mbc3TimerRamBattery
            | CartridgeType::Mbc3
            | CartridgeType::Mbc3Ram
            | CartridgeType::Mbc3RamBattery => MbcKind::Mbc3,
            CartridgeType::Mbc5 | CartridgeType::Mbc5Ram | CartridgeType::Mbc5RamBattery => {
                MbcKind::Mbc5
            }
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self,
            CartridgeType::Mbc1RamBattery
                | CartridgeType::Mbc3TimerBattery
                | CartridgeType::Mbc3TimerRamBattery
                | CartridgeType::Mbc3RamBattery
                | CartridgeType::Mbc5RamBattery
        )
    }
}

impl Display for CartridgeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// ROM size as encoded at header offset 0x0148, in number
/// of 16 KiB banks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RomSize {
    Size32K,
    Size64K,
    Size128K,
    Size256K,
    Size512K,
    Size1M,
    Size2M,
    Size4M,
    Size8M,
    SizeUnknown,
}

impl RomSize {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RomSize::Size32K,
            0x01 => RomSize::Size64K,
            0x02 => RomSize::Size128K,
            0x03 => RomSize::Size256K,
            0x04 => RomSize::Size512K,
            0x05 => RomSize::Size1M,
            0x06 => RomSize::Size2M,
            0x07 => RomSize::Size4M,
            0x08 => RomSize::Size8M,
            _ => RomSize::SizeUnknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RomSize::Size32K => "32 KB",
            RomSize::Size64K => "64 KB",
            RomSize::Size128K => "128 KB",
            RomSize::Size256K => "256 KB",
            RomSize::Size512K => "512 KB",
            RomSize::Size1M => "1 MB",
            RomSize::Size2M => "2 MB",
            RomSize::Size4M => "4 MB",
            RomSize::Size8M => "8 MB",
            RomSize::SizeUnknown => "Unknown",
        }
    }

    pub fn rom_banks(&self) -> u16 {
        match self {
            RomSize::Size32K => 2,
            RomSize::Size64K => 4,
            RomSize::Size128K => 8,
            RomSize::Size256K => 16,
            RomSize::Size512K => 32,
            RomSize::Size1M => 64,
            RomSize::Size2M => 128,
            RomSize::Size4M => 256,
            RomSize::Size8M => 512,
            RomSize::SizeUnknown => 0,
        }
    }
}

impl Display for RomSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// External RAM size as encoded at header offset 0x0149.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RamSize {
    NoRam,
    Unused,
    Size8K,
    Size32K,
    Size64K,
    Size128K,
    SizeUnknown,
}

impl RamSize {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => RamSize::NoRam,
            0x01 => RamSize::Unused,
            0x02 => RamSize::Size8K,
            0x03 => RamSize::Size32K,
            0x04 => RamSize::Size128K,
            0x05 => RamSize::Size64K,
            _ => RamSize::SizeUnknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RamSize::NoRam => "No RAM",
            RamSize::Unused => "Unused",
            RamSize::Size8K => "8 KB",
            RamSize::Size32K => "32 KB",
            RamSize::Size64K => "64 KB",
            RamSize::Size128K => "128 KB",
            RamSize::SizeUnknown => "Unknown",
        }
    }

    pub fn ram_banks(&self) -> u16 {
        match self {
            RamSize::NoRam => 0,
            RamSize::Unused => 0,
            RamSize::Size8K => 1,
            RamSize::Size32K => 4,
            RamSize::Size64K => 8,
            RamSize::Size128K => 16,
            RamSize::SizeUnknown => 0,
        }
    }
}

impl Display for RamSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// CGB support flag at header offset 0x0143.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CgbFlag {
    NoCgb = 0x00,
    CgbCompatible = 0x80,
    CgbOnly = 0xc0,
}

impl CgbFlag {
    pub fn description(&self) -> &'static str {
        match self {
            CgbFlag::NoCgb => "No CGB support",
            CgbFlag::CgbCompatible => "CGB backwards compatible",
            CgbFlag::CgbOnly => "CGB only",
        }
    }
}

impl Display for CgbFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Structure that defines the ROM and RAM contents of a Game Boy
/// cartridge together with the live banking state of its MBC.
#[derive(Clone, Debug)]
pub struct Cartridge {
    /// The complete data of the cartridge ROM, read only.
    rom_data: Vec<u8>,

    /// The external (battery backed) RAM of the cartridge.
    ram_data: Vec<u8>,

    /// The controller in charge of the banking behavior.
    kind: MbcKind,

    rom_bank_count: u16,
    ram_bank_count: u16,

    /// Write protection latch for the external RAM.
    ram_enabled: bool,

    /// Low ROM bank register, 5 bits on MBC1, 7 on MBC3 and
    /// 9 on MBC5 (bit 8 loaded separately).
    rom_bank: u16,

    /// MBC1 secondary 2 bit register, upper ROM bank bits or the
    /// RAM bank depending on the banking mode.
    bank2: u8,

    /// RAM bank register for MBC3/MBC5.
    ram_bank: u8,

    /// MBC1 banking mode, false for simple (mode 0) and true for
    /// advanced (mode 1, bank2 also remaps 0x0000-0x3FFF and RAM).
    advanced_mode: bool,

    /// Selected MBC3 RTC register (0x08-0x0C) in place of a RAM
    /// bank, when any.
    rtc_selected: Option<u8>,

    /// Latched MBC3 RTC registers S/M/H/DL/DH (stub, frozen time).
    rtc_latched: [u8; 5],

    /// Previous value written to the MBC3 latch range, the latch
    /// fires on a 0x00 to 0x01 sequence.
    rtc_latch_last: u8,
}

impl Cartridge {
    pub fn new() -> Self {
        Self {
            rom_data: vec![],
            ram_data: vec![],
            kind: MbcKind::NoMbc,
            rom_bank_count: 0,
            ram_bank_count: 0,
            ram_enabled: false,
            rom_bank: 1,
            bank2: 0,
            ram_bank: 0,
            advanced_mode: false,
            rtc_selected: None,
            rtc_latched: [0u8; 5],
            rtc_latch_last: 0xff,
        }
    }

    pub fn from_data(data: &[u8]) -> Result<Self, Error> {
        let mut cartridge = Cartridge::new();
        cartridge.set_data(data)?;
        Ok(cartridge)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x3FFF: ROM bank 00 (MBC1 advanced mode remaps)
            // 0x4000-0x7FFF: switchable ROM bank
            0x0000..=0x7fff => self.read_rom(addr),
            // 0xA000-0xBFFF: external RAM / RTC register
            0xa000..=0xbfff => self.read_ram(addr),
            _ => {
                warnln!("Reading from unknown Cartridge location 0x{:04x}", addr);
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0x0000-0x7FFF: MBC control registers
            0x0000..=0x7fff => self.write_control(addr, value),
            // 0xA000-0xBFFF: external RAM / RTC register
            0xa000..=0xbfff => self.write_ram(addr, value),
            _ => warnln!("Writing to unknown Cartridge location 0x{:04x}", addr),
        }
    }

    fn read_rom(&self, addr: u16) -> u8 {
        let bank = match addr {
            0x0000..=0x3fff => self.lower_bank(),
            _ => self.upper_bank(),
        };
        let offset = bank as usize * ROM_BANK_SIZE + (addr as usize & 0x3fff);
        *self.rom_data.get(offset).unwrap_or(&0xff)
    }

    /// Bank mapped at 0x0000-0x3FFF, fixed to zero except under the
    /// MBC1 advanced banking mode.
    fn lower_bank(&self) -> u16 {
        match self.kind {
            MbcKind::Mbc1 if self.advanced_mode => ((self.bank2 as u16) << 5) & self.bank_mask(),
            _ => 0,
        }
    }

    /// Bank mapped at 0x4000-0x7FFF for the current MBC state.
    fn upper_bank(&self) -> u16 {
        let bank = match self.kind {
            MbcKind::NoMbc => 1,
            MbcKind::Mbc1 => ((self.bank2 as u16) << 5) | self.rom_bank,
            MbcKind::Mbc3 | MbcKind::Mbc5 => self.rom_bank,
        };
        bank & self.bank_mask()
    }

    fn bank_mask(&self) -> u16 {
        max(self.rom_bank_count, 1) - 1
    }

    fn write_control(&mut self, addr: u16, value: u8) {
        match self.kind {
            MbcKind::NoMbc => (),
            MbcKind::Mbc1 => match addr {
                // 0x0000-0x1FFF: RAM enable, 0x0A in the low nibble
                0x0000..=0x1fff => self.ram_enabled = value & 0x0f == 0x0a,
                // 0x2000-0x3FFF: low 5 bits of the ROM bank, zero
                // maps the following bank instead
                0x2000..=0x3fff => {
                    let mut bank = (value & 0x1f) as u16;
                    if bank == 0 {
                        bank = 1;
                    }
                    self.rom_bank = bank;
                }
                // 0x4000-0x5FFF: 2 bit upper ROM bank / RAM bank
                0x4000..=0x5fff => self.bank2 = value & 0x03,
                // 0x6000-0x7FFF: banking mode select
                _ => self.advanced_mode = value & 0x01 == 0x01,
            },
            MbcKind::Mbc3 => match addr {
                // 0x0000-0x1FFF: RAM and RTC enable
                0x0000..=0x1fff => self.ram_enabled = value & 0x0f == 0x0a,
                // 0x2000-0x3FFF: 7 bit ROM bank, zero maps bank one
                0x2000..=0x3fff => {
                    let mut bank = (value & 0x7f) as u16;
                    if bank == 0 {
                        bank = 1;
                    }
                    self.rom_bank = bank;
                }
                // 0x4000-0x5FFF: RAM bank (0-3) or RTC register
                0x4000..=0x5fff => match value {
                    0x00..=0x03 => {
                        self.ram_bank = value;
                        self.rtc_selected = None;
                    }
                    0x08..=0x0c => self.rtc_selected = Some(value),
                    _ => (),
                },
                // 0x6000-0x7FFF: RTC latch on a 0x00 to 0x01 edge
                _ => {
                    if self.rtc_latch_last == 0x00 && value == 0x01 {
                        self.latch_rtc();
                    }
                    self.rtc_latch_last = value;
                }
            },
            MbcKind::Mbc5 => match addr {
                // 0x0000-0x1FFF: RAM enable
                0x0000..=0x1fff => self.ram_enabled = value & 0x0f == 0x0a,
                // 0x2000-0x2FFF: low 8 bits of the ROM bank, zero
                // is a valid bank on MBC5
                0x2000..=0x2fff => self.rom_bank = (self.rom_bank & 0x0100) | value as u16,
                // 0x3000-0x3FFF: bit 8 of the ROM bank
                0x3000..=0x3fff => {
                    self.rom_bank = (self.rom_bank & 0x00ff) | (((value & 0x01) as u16) << 8)
                }
                // 0x4000-0x5FFF: 4 bit RAM bank
                0x4000..=0x5fff => self.ram_bank = value & 0x0f,
                _ => (),
            },
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xff;
        }
        if self.kind == MbcKind::Mbc3 {
            if let Some(register) = self.rtc_selected {
                return self.rtc_latched[(register - 0x08) as usize];
            }
        }
        let offset = self.ram_offset() + (addr as usize & 0x1fff);
        *self.ram_data.get(offset).unwrap_or(&0xff)
    }

    fn write_ram(&mut self, addr: u16, value: u8) {
        if !self.ram_enabled {
            return;
        }
        if self.kind == MbcKind::Mbc3 {
            if let Some(register) = self.rtc_selected {
                self.rtc_latched[(register - 0x08) as usize] = value;
                return;
            }
        }
        let offset = self.ram_offset() + (addr as usize & 0x1fff);
        if let Some(byte) = self.ram_data.get_mut(offset) {
            *byte = value;
        }
    }

    fn ram_offset(&self) -> usize {
        let bank = match self.kind {
            MbcKind::NoMbc => 0,
            MbcKind::Mbc1 => {
                if self.advanced_mode {
                    self.bank2
                } else {
                    0
                }
            }
            MbcKind::Mbc3 | MbcKind::Mbc5 => self.ram_bank,
        };
        let bank = (bank as u16) % max(self.ram_bank_count, 1);
        bank as usize * RAM_BANK_SIZE
    }

    /// Freezes the current RTC counters into the latched registers.
    /// The clock itself is a stub so the counters read as a fixed
    /// point in time.
    fn latch_rtc(&mut self) {
        // stub counters, nothing to copy, the latched values keep
        // whatever was last written through the register window
    }

    fn set_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.ensure_data(data)?;
        self.rom_data = data.to_vec();
        self.kind = self.rom_type()?.mbc_kind();
        self.rom_bank_count = self.rom_size().rom_banks();
        self.ram_bank_count = self.ram_size().ram_banks();
        self.rom_bank = 1;
        self.bank2 = 0;
        self.ram_bank = 0;
        self.advanced_mode = false;
        self.ram_enabled = false;
        self.allocate_ram();
        if !self.valid_checksum() {
            // a broken header checksum is reported but must not
            // prevent execution
            warnln!(
                "Invalid header checksum 0x{:02x} (expected 0x{:02x})",
                self.rom_data[0x014d],
                self.checksum()
            );
        }
        Ok(())
    }

    fn allocate_ram(&mut self) {
        let ram_banks = max(self.ram_bank_count, 1);
        self.ram_data = vec![0u8; ram_banks as usize * RAM_BANK_SIZE];
    }

    /// Ensures that the provided data is a plausible Game Boy ROM
    /// image: large enough to hold two banks and bank aligned.
    fn ensure_data(&self, data: &[u8]) -> Result<(), Error> {
        if data.len() < 2 * ROM_BANK_SIZE {
            return Err(Error::RomSize);
        }
        if data.len() % ROM_BANK_SIZE != 0 {
            return Err(Error::RomSize);
        }
        Ok(())
    }
}

impl Cartridge {
    pub fn title(&self) -> String {
        if self.rom_data.len() < 0x0144 {
            return String::new();
        }
        bytes_to_string(&self.rom_data[0x0134..=0x0143])
    }

    pub fn rom_type(&self) -> Result<CartridgeType, Error> {
        CartridgeType::from_u8(*self.rom_data.get(0x0147).unwrap_or(&0xff))
    }

    pub fn rom_size(&self) -> RomSize {
        RomSize::from_u8(*self.rom_data.get(0x0148).unwrap_or(&0xff))
    }

    pub fn ram_size(&self) -> RamSize {
        RamSize::from_u8(*self.rom_data.get(0x0149).unwrap_or(&0xff))
    }

    pub fn cgb_flag(&self) -> CgbFlag {
        match *self.rom_data.get(0x0143).unwrap_or(&0x00) {
            0x80 => CgbFlag::CgbCompatible,
            0xc0 => CgbFlag::CgbOnly,
            _ => CgbFlag::NoCgb,
        }
    }

    /// The hardware mode the cartridge was built for, used to pick
    /// the running mode when none is forced by configuration.
    pub fn gb_mode(&self) -> GameBoyMode {
        match self.cgb_flag() {
            CgbFlag::CgbCompatible | CgbFlag::CgbOnly => GameBoyMode::Cgb,
            CgbFlag::NoCgb => GameBoyMode::Dmg,
        }
    }

    /// A cartridge is legacy (DMG only) when bit 7 of the CGB flag
    /// byte is unset.
    pub fn is_legacy(&self) -> bool {
        self.rom_data.get(0x0143).unwrap_or(&0x00) & 0x80 == 0x00
    }

    pub fn has_battery(&self) -> bool {
        self.rom_type().map(|t| t.has_battery()).unwrap_or(false)
    }

    /// Computes the header checksum over 0x0134-0x014C with the
    /// documented subtract-and-decrement rule.
    pub fn checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for i in 0x0134..=0x014c {
            sum = sum
                .wrapping_sub(*self.rom_data.get(i).unwrap_or(&0x00))
                .wrapping_sub(1);
        }
        sum
    }

    pub fn valid_checksum(&self) -> bool {
        *self.rom_data.get(0x014d).unwrap_or(&0x00) == self.checksum()
    }

    pub fn mbc_kind(&self) -> MbcKind {
        self.kind
    }

    pub fn rom_bank(&self) -> u16 {
        self.upper_bank()
    }

    pub fn ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    pub fn rom_data(&self) -> &[u8] {
        &self.rom_data
    }

    pub fn ram_data(&self) -> &[u8] {
        &self.ram_data
    }

    /// Restores the battery backed RAM from a raw copy, typically
    /// provided by the host at startup.
    pub fn set_ram_data(&mut self, data: &[u8]) {
        let len = self.ram_data.len().min(data.len());
        self.ram_data[..len].copy_from_slice(&data[..len]);
    }

    pub fn description(&self) -> String {
        format!(
            "Title: {}, Type: {}, ROM: {}, RAM: {}, CGB: {}",
            self.title(),
            self.rom_type()
                .map(|t| t.description())
                .unwrap_or("Unknown"),
            self.rom_size(),
            self.ram_size(),
            self.cgb_flag()
        )
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Cartridge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
