//! MMU (Memory Management Unit) functions and structures.
//!
//! Owns every memory backing store of the system (WRAM, HRAM, boot
//! overlay) together with the memory mapped components (PPU, Timer,
//! Joypad, Serial, DMA, Cartridge) and decodes the complete 16 bit
//! address space over them. No address may ever panic: unmapped or
//! guarded locations read 0xFF and swallow writes.

use crate::{
    cartridge::Cartridge,
    consts::{
        BGPI_ADDR, BOOT_ADDR, DMA_ADDR, HDMA1_ADDR, HDMA5_ADDR, IF_ADDR, KEY0_ADDR, KEY1_ADDR,
        OPRI_ADDR, SVBK_ADDR, VBK_ADDR,
    },
    dma::{Dma, HDMA_BLOCK_SIZE},
    gb::{Components, GameBoyMode, GameBoySpeed},
    joypad::Joypad,
    ppu::Ppu,
    serial::Serial,
    timer::Timer,
    warnln,
};

pub const BOOT_SIZE_DMG: usize = 256;
pub const BOOT_SIZE_CGB: usize = 2304;

pub const WRAM_SIZE_DMG: usize = 8192;
pub const WRAM_SIZE_CGB: usize = 32768;

pub const HRAM_SIZE: usize = 127;

/// Number of bytes moved by one OAM DMA transfer.
pub const OAM_DMA_LENGTH: u16 = 160;

pub trait BusComponent {
    fn read(&self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);
}

pub struct Mmu {
    /// Register that controls the interrupts that are considered
    /// to be enabled and should be triggered.
    pub ie: u8,

    /// Compatibility control register (KEY0), loaded from the CGB
    /// flag of the cartridge header by boot code.
    key0: u8,

    /// A speed switch was armed through KEY1 and will be performed
    /// by the next STOP instruction.
    switching: bool,

    /// The speed the system currently runs at, normal (4.194304
    /// MHz) or double (8.388608 MHz, CGB only).
    speed: GameBoySpeed,

    /// The PPU, owner of VRAM, OAM and the palette RAM, reachable
    /// both as a memory region and through the LCD registers.
    ppu: Ppu,

    /// The timer, memory mapped at the DIV/TIMA/TMA/TAC registers.
    timer: Timer,

    /// The joypad selection matrix behind the P1 register.
    joypad: Joypad,

    /// The (stubbed) serial transfer registers.
    serial: Serial,

    /// The OAM DMA and (CGB) HDMA register file; the transfers are
    /// executed here, where full bus access is available.
    dma: Dma,

    /// The cartridge currently inserted into the system, covering
    /// the ROM and external RAM regions.
    cartridge: Cartridge,

    /// Controls the boot ROM overlay over 0x0000-0x00FF (plus
    /// 0x0200-0x08FF on CGB), cleared once and for all by a write
    /// to 0xFF50.
    boot_active: bool,

    /// The boot image served while the overlay is active, may be
    /// empty when running from the synthesized post-boot state.
    boot: Vec<u8>,

    /// Working RAM, 8 KiB on DMG and 32 KiB (8 banks) on CGB.
    wram: Vec<u8>,

    /// The WRAM bank mapped at 0xD000-0xDFFF (CGB only).
    wram_bank: u8,

    /// Byte offset of the selected WRAM bank, kept consistent with
    /// `wram_bank`.
    wram_offset: usize,

    /// High RAM, the only memory unconditionally reachable during
    /// an OAM DMA on real hardware.
    hram: [u8; HRAM_SIZE],

    /// The running hardware mode of the system.
    mode: GameBoyMode,
}

impl Mmu {
    pub fn new(components: Components, mode: GameBoyMode) -> Self {
        let wram_size = match mode {
            GameBoyMode::Dmg => WRAM_SIZE_DMG,
            GameBoyMode::Cgb => WRAM_SIZE_CGB,
        };
        Self {
            ie: 0x0,
            key0: 0x0,
            switching: false,
            speed: GameBoySpeed::Normal,
            ppu: components.ppu,
            timer: components.timer,
            joypad: components.joypad,
            serial: components.serial,
            dma: components.dma,
            cartridge: Cartridge::new(),
            boot_active: false,
            boot: vec![],
            wram: vec![0u8; wram_size],
            wram_bank: 0x1,
            wram_offset: 0x1000,
            hram: [0u8; HRAM_SIZE],
            mode,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            // 0x0000-0x08FF - boot overlay while active, otherwise
            // cartridge ROM
            0x0000..=0x08ff if self.boot_active => {
                let addr = addr as usize;
                if addr <= 0x00ff || (self.mode.is_cgb() && addr >= 0x0200) {
                    return *self.boot.get(addr).unwrap_or(&0xff);
                }
                self.cartridge.read(addr as u16)
            }

            // 0x0000-0x3FFF - ROM bank 0 (fixed)
            // 0x4000-0x7FFF - ROM bank N (switchable)
            0x0000..=0x7fff => self.cartridge.read(addr),

            // 0x8000-0x9FFF - VRAM (banked on CGB)
            0x8000..=0x9fff => self.ppu.read(addr),

            // 0xA000-0xBFFF - External (cartridge) RAM
            0xa000..=0xbfff => self.cartridge.read(addr),

            // 0xC000-0xCFFF - WRAM bank 0
            0xc000..=0xcfff => self.wram[(addr & 0x0fff) as usize],

            // 0xD000-0xDFFF - WRAM bank 1-7 (banked on CGB)
            0xd000..=0xdfff => self.wram[self.wram_offset + (addr & 0x0fff) as usize],

            // 0xE000-0xFDFF - Echo of 0xC000-0xDDFF, bank aware
            0xe000..=0xefff => self.wram[(addr & 0x0fff) as usize],
            0xf000..=0xfdff => self.wram[self.wram_offset + (addr & 0x0fff) as usize],

            // 0xFE00-0xFE9F - OAM
            0xfe00..=0xfe9f => self.ppu.read(addr),

            // 0xFEA0-0xFEFF - Not usable
            0xfea0..=0xfeff => {
                if self.mode.is_cgb() {
                    0x00
                } else {
                    0xff
                }
            }

            // 0xFF00 - P1: Joypad
            0xff00 => self.joypad.read(addr),

            // 0xFF01-0xFF02 - Serial transfer
            0xff01..=0xff02 => self.serial.read(addr),

            // 0xFF04-0xFF07 - Timer and divider
            0xff04..=0xff07 => self.timer.read(addr),

            // 0xFF0F - IF: Interrupt flag, bits 5-7 always set
            IF_ADDR => self.compose_if() | 0xe0,

            // 0xFF10-0xFF3F - Audio registers (APU not present)
            0xff10..=0xff3f => 0xff,

            // 0xFF40-0xFF45, 0xFF47-0xFF4B - PPU registers
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.read(addr),

            // 0xFF46 - DMA: OAM DMA source and start
            DMA_ADDR => self.dma.read(addr),

            // 0xFF4C - KEY0: Compatibility flag (CGB only)
            KEY0_ADDR => self.key0,

            // 0xFF4D - KEY1: Speed switching (CGB only)
            KEY1_ADDR => {
                (if self.switching { 0x01 } else { 0x00 }) | ((self.speed as u8) << 7) | 0x7e
            }

            // 0xFF4F - VBK: VRAM bank select (CGB only)
            VBK_ADDR => self.ppu.read(addr),

            // 0xFF50 - Boot overlay control
            BOOT_ADDR => u8::from(!self.boot_active) | 0xfe,

            // 0xFF51-0xFF55 - HDMA registers (CGB only)
            HDMA1_ADDR..=HDMA5_ADDR => self.dma.read(addr),

            // 0xFF68-0xFF6C - Color palettes and priority (CGB only)
            BGPI_ADDR..=OPRI_ADDR => self.ppu.read(addr),

            // 0xFF70 - SVBK: WRAM bank select (CGB only)
            SVBK_ADDR => (self.wram_bank & 0x07) | 0xf8,

            // 0xFF80-0xFFFE - HRAM
            0xff80..=0xfffe => self.hram[(addr & 0x007f) as usize],

            // 0xFFFF - IE: Interrupt enable
            0xffff => self.ie,

            addr => {
                warnln!("Reading from unknown location 0x{:04x}", addr);
                0xff
            }
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            // 0x0000-0x7FFF - MBC control registers
            0x0000..=0x7fff => self.cartridge.write(addr, value),

            // 0x8000-0x9FFF - VRAM (banked on CGB)
            0x8000..=0x9fff => self.ppu.write(addr, value),

            // 0xA000-0xBFFF - External (cartridge) RAM
            0xa000..=0xbfff => self.cartridge.write(addr, value),

            // 0xC000-0xCFFF - WRAM bank 0
            0xc000..=0xcfff => self.wram[(addr & 0x0fff) as usize] = value,

            // 0xD000-0xDFFF - WRAM bank 1-7 (banked on CGB)
            0xd000..=0xdfff => self.wram[self.wram_offset + (addr & 0x0fff) as usize] = value,

            // 0xE000-0xFDFF - Echo of 0xC000-0xDDFF, bank aware
            0xe000..=0xefff => self.wram[(addr & 0x0fff) as usize] = value,
            0xf000..=0xfdff => self.wram[self.wram_offset + (addr & 0x0fff) as usize] = value,

            // 0xFE00-0xFE9F - OAM
            0xfe00..=0xfe9f => self.ppu.write(addr, value),

            // 0xFEA0-0xFEFF - Not usable
            0xfea0..=0xfeff => (),

            // 0xFF00 - P1: Joypad
            0xff00 => self.joypad.write(addr, value),

            // 0xFF01-0xFF02 - Serial transfer
            0xff01..=0xff02 => self.serial.write(addr, value),

            // 0xFF04-0xFF07 - Timer and divider
            0xff04..=0xff07 => self.timer.write(addr, value),

            // 0xFF0F - IF: Interrupt flag, distributed to the
            // owning devices
            IF_ADDR => {
                self.ppu.set_int_vblank(value & 0x01 == 0x01);
                self.ppu.set_int_stat(value & 0x02 == 0x02);
                self.timer.set_int_timer(value & 0x04 == 0x04);
                self.serial.set_int_serial(value & 0x08 == 0x08);
                self.joypad.set_int_joypad(value & 0x10 == 0x10);
            }

            // 0xFF10-0xFF3F - Audio registers (APU not present)
            0xff10..=0xff3f => (),

            // 0xFF40-0xFF45, 0xFF47-0xFF4B - PPU registers
            0xff40..=0xff45 | 0xff47..=0xff4b => self.ppu.write(addr, value),

            // 0xFF46 - DMA: a write performs the OAM transfer on
            // the spot, the busy window stays observable
            DMA_ADDR => {
                self.dma.write(addr, value);
                self.run_oam_dma();
            }

            // 0xFF4C - KEY0: Compatibility flag (CGB only)
            KEY0_ADDR => {
                self.key0 = value;
                if value == 0x04 {
                    self.ppu.set_dmg_compat(true);
                }
            }

            // 0xFF4D - KEY1: Speed switching (CGB only)
            KEY1_ADDR => self.switching = value & 0x01 == 0x01,

            // 0xFF4F - VBK: VRAM bank select (CGB only)
            VBK_ADDR => self.ppu.write(addr, value),

            // 0xFF50 - Boot overlay control, disable is one way
            BOOT_ADDR => {
                if value & 0x01 == 0x01 {
                    self.boot_active = false;
                }
            }

            // 0xFF51-0xFF55 - HDMA registers; a general purpose
            // start transfers immediately
            HDMA1_ADDR..=HDMA5_ADDR => {
                self.dma.write(addr, value);
                if self.dma.take_request_general() {
                    if self.mode.is_cgb() {
                        let count = self.dma.pending();
                        self.run_hdma(count);
                    } else {
                        self.dma.advance_hdma(self.dma.pending());
                    }
                }
            }

            // 0xFF68-0xFF6C - Color palettes and priority (CGB only)
            BGPI_ADDR..=OPRI_ADDR => self.ppu.write(addr, value),

            // 0xFF70 - SVBK: WRAM bank select, bank 0 maps bank 1
            SVBK_ADDR => {
                let mut bank = value & 0x07;
                if bank == 0x0 {
                    bank = 0x1;
                }
                self.wram_bank = bank;
                self.wram_offset = bank as usize * 0x1000;
            }

            // 0xFF80-0xFFFE - HRAM
            0xff80..=0xfffe => self.hram[(addr & 0x007f) as usize] = value,

            // 0xFFFF - IE: Interrupt enable, low five bits
            0xffff => self.ie = value & 0x1f,

            addr => warnln!("Writing to unknown location 0x{:04x}", addr),
        }
    }

    /// Reads a byte bypassing the PPU mode lockout, the view the
    /// DMA engines have of the bus.
    pub fn read_raw(&self, addr: u16) -> u8 {
        match addr {
            0x8000..=0x9fff | 0xfe00..=0xfe9f => self.ppu.read_raw(addr),
            _ => self.read(addr),
        }
    }

    /// Writes a byte bypassing the PPU mode lockout.
    pub fn write_raw(&mut self, addr: u16, value: u8) {
        match addr {
            0x8000..=0x9fff | 0xfe00..=0xfe9f => self.ppu.write_raw(addr, value),
            _ => self.write(addr, value),
        }
    }

    /// Raises one of the five interrupt lines, the entry point
    /// used by devices external to the MMU and by tests.
    pub fn request_interrupt(&mut self, bit: u8) {
        match bit {
            0 => self.ppu.set_int_vblank(true),
            1 => self.ppu.set_int_stat(true),
            2 => self.timer.set_int_timer(true),
            3 => self.serial.set_int_serial(true),
            4 => self.joypad.set_int_joypad(true),
            bit => warnln!("Requesting unknown interrupt bit {}", bit),
        }
    }

    /// Ticks the DMA controller, feeding HBlank pulses from the
    /// PPU into an active HBlank HDMA transfer. With the LCD off no
    /// pulses arrive, so such a transfer stalls until re-enable.
    pub fn clock_dma(&mut self, cycles: u16) {
        self.dma.clock(cycles);
        if self.ppu.take_hblank_pulse() && self.dma.active_hblank() && self.mode.is_cgb() {
            let count = HDMA_BLOCK_SIZE.min(self.dma.pending());
            self.run_hdma(count);
        }
    }

    fn run_oam_dma(&mut self) {
        if !self.dma.take_request_oam() {
            return;
        }
        let source = (self.dma.value_oam() as u16) << 8;
        for index in 0..OAM_DMA_LENGTH {
            let byte = self.read_raw(source.wrapping_add(index));
            self.ppu.write_raw(0xfe00 + index, byte);
        }
    }

    fn run_hdma(&mut self, count: u16) {
        for _ in 0..count {
            let byte = self.read_raw(self.dma.source());
            let destination = self.dma.destination();
            self.ppu.write_raw(destination, byte);
            self.dma.advance_hdma(1);
        }
    }

    /// Composes the five interrupt flag bits out of the device
    /// owned lines.
    fn compose_if(&self) -> u8 {
        (if self.ppu.int_vblank() { 0x01 } else { 0x00 })
            | (if self.ppu.int_stat() { 0x02 } else { 0x00 })
            | (if self.timer.int_timer() { 0x04 } else { 0x00 })
            | (if self.serial.int_serial() { 0x08 } else { 0x00 })
            | (if self.joypad.int_joypad() { 0x10 } else { 0x00 })
    }

    /// Installs the boot image and activates the overlay.
    pub fn set_boot(&mut self, data: &[u8]) {
        self.boot = data.to_vec();
        self.boot_active = true;
    }

    pub fn boot_active(&self) -> bool {
        self.boot_active
    }

    pub fn set_boot_active(&mut self, value: bool) {
        self.boot_active = value;
    }

    /// Performs the speed switch armed through KEY1.
    pub fn switch_speed(&mut self) {
        self.speed = self.speed.switch();
        self.switching = false;
    }

    #[inline(always)]
    pub fn speed(&self) -> GameBoySpeed {
        self.speed
    }

    #[inline(always)]
    pub fn speed_switching(&self) -> bool {
        self.switching
    }

    #[inline(always)]
    pub fn mode(&self) -> GameBoyMode {
        self.mode
    }

    #[inline(always)]
    pub fn ppu(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    #[inline(always)]
    pub fn ppu_i(&self) -> &Ppu {
        &self.ppu
    }

    #[inline(always)]
    pub fn timer(&mut self) -> &mut Timer {
        &mut self.timer
    }

    #[inline(always)]
    pub fn timer_i(&self) -> &Timer {
        &self.timer
    }

    #[inline(always)]
    pub fn joypad(&mut self) -> &mut Joypad {
        &mut self.joypad
    }

    #[inline(always)]
    pub fn joypad_i(&self) -> &Joypad {
        &self.joypad
    }

    #[inline(always)]
    pub fn serial(&mut self) -> &mut Serial {
        &mut self.serial
    }

    #[inline(always)]
    pub fn serial_i(&self) -> &Serial {
        &self.serial
    }

    #[inline(always)]
    pub fn dma(&mut self) -> &mut Dma {
        &mut self.dma
    }

    #[inline(always)]
    pub fn dma_i(&self) -> &Dma {
        &self.dma
    }

    #[inline(always)]
    pub fn cartridge(&mut self) -> &mut Cartridge {
        &mut self.cartridge
    }

    #[inline(always)]
    pub fn cartridge_i(&self) -> &Cartridge {
        &self.cartridge
    }

    pub fn set_cartridge(&mut self, cartridge: Cartridge) {
        self.cartridge = cartridge;
    }
}

impl BusComponent for Mmu {
    fn read(&self, addr: u16) -> u8 {
        self.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.write(addr, value);
    }
}

impl Default for Mmu {
    fn default() -> Self {
        let mode = GameBoyMode::Dmg;
        Mmu::new(Components::new(mode), mode)
    }
}

#[cfg(test)]
mod tests {
    use super::Mmu;
    use crate::{
        consts::{IE_ADDR, IF_ADDR, KEY1_ADDR, SVBK_ADDR},
        gb::{Components, GameBoyMode},
    };

    fn mmu_cgb() -> Mmu {
        let mode = GameBoyMode::Cgb;
        Mmu::new(Components::new(mode), mode)
    }

    #[test]
    fn test_wram_and_hram_round_trip() {
        let mut mmu = Mmu::default();
        mmu.write(0xc000, 0x11);
        mmu.write(0xdfff, 0x22);
        mmu.write(0xff80, 0x33);
        mmu.write(0xfffe, 0x44);
        assert_eq!(mmu.read(0xc000), 0x11);
        assert_eq!(mmu.read(0xdfff), 0x22);
        assert_eq!(mmu.read(0xff80), 0x33);
        assert_eq!(mmu.read(0xfffe), 0x44);
    }

    #[test]
    fn test_echo_ram_mirrors() {
        let mut mmu = Mmu::default();
        mmu.write(0xc123, 0x55);
        assert_eq!(mmu.read(0xe123), 0x55);

        mmu.write(0xf000, 0x66);
        assert_eq!(mmu.read(0xd000), 0x66);
    }

    #[test]
    fn test_echo_ram_follows_wram_bank() {
        let mut mmu = mmu_cgb();
        mmu.write(SVBK_ADDR, 0x03);
        mmu.write(0xd000, 0x77);
        assert_eq!(mmu.read(0xf000), 0x77);

        mmu.write(SVBK_ADDR, 0x04);
        assert_eq!(mmu.read(0xf000), 0x00);
    }

    #[test]
    fn test_svbk_bank_zero_maps_one() {
        let mut mmu = mmu_cgb();
        mmu.write(SVBK_ADDR, 0x01);
        mmu.write(0xd000, 0xaa);
        mmu.write(SVBK_ADDR, 0x00);
        assert_eq!(mmu.read(SVBK_ADDR) & 0x07, 0x01);
        assert_eq!(mmu.read(0xd000), 0xaa);
    }

    #[test]
    fn test_if_upper_bits_forced() {
        let mut mmu = Mmu::default();
        mmu.write(IF_ADDR, 0x00);
        assert_eq!(mmu.read(IF_ADDR), 0xe0);

        mmu.write(IF_ADDR, 0x1f);
        assert_eq!(mmu.read(IF_ADDR), 0xff);

        mmu.request_interrupt(2);
        mmu.write(IF_ADDR, 0x00);
        mmu.request_interrupt(4);
        assert_eq!(mmu.read(IF_ADDR), 0xe0 | 0x10);
    }

    #[test]
    fn test_ie_stores_low_five_bits() {
        let mut mmu = Mmu::default();
        mmu.write(IE_ADDR, 0xff);
        assert_eq!(mmu.read(IE_ADDR), 0x1f);
    }

    #[test]
    fn test_unusable_region() {
        let mut mmu = Mmu::default();
        mmu.write(0xfea0, 0x12);
        assert_eq!(mmu.read(0xfea0), 0xff);

        let mut mmu = mmu_cgb();
        mmu.write(0xfeff, 0x12);
        assert_eq!(mmu.read(0xfeff), 0x00);
    }

    #[test]
    fn test_rom_region_never_panics() {
        let mut mmu = Mmu::default();
        // no cartridge inserted, the bus stays tolerant
        assert_eq!(mmu.read(0x0000), 0xff);
        assert_eq!(mmu.read(0x7fff), 0xff);
        mmu.write(0x2000, 0x01);
        assert_eq!(mmu.read(0xa000), 0xff);
    }

    #[test]
    fn test_oam_dma_copies_block() {
        let mut mmu = Mmu::default();
        for index in 0..160u16 {
            mmu.write(0xc100 + index, index as u8);
        }
        mmu.write(0xff46, 0xc1);

        // LCD is off so OAM is freely readable
        for index in 0..160u16 {
            assert_eq!(mmu.read(0xfe00 + index), index as u8);
        }
        assert!(mmu.dma_i().active_oam());
        mmu.clock_dma(640);
        assert!(!mmu.dma_i().active_oam());
    }

    #[test]
    fn test_boot_overlay_and_disable() {
        let mut mmu = Mmu::default();
        let mut boot = vec![0u8; 256];
        boot[0x00] = 0x31;
        boot[0xff] = 0xe0;
        mmu.set_boot(&boot);

        assert_eq!(mmu.read(0x0000), 0x31);
        assert_eq!(mmu.read(0x00ff), 0xe0);

        // one way disable
        mmu.write(0xff50, 0x01);
        assert!(!mmu.boot_active());
        assert_eq!(mmu.read(0x0000), 0xff);
        mmu.write(0xff50, 0x00);
        assert!(!mmu.boot_active());
    }

    #[test]
    fn test_key1_speed_switch() {
        let mut mmu = mmu_cgb();
        assert_eq!(mmu.read(KEY1_ADDR), 0x7e);

        mmu.write(KEY1_ADDR, 0x01);
        assert_eq!(mmu.read(KEY1_ADDR), 0x7f);
        assert!(mmu.speed_switching());

        mmu.switch_speed();
        assert!(!mmu.speed_switching());
        assert_eq!(mmu.read(KEY1_ADDR), 0xfe);
    }

    #[test]
    fn test_hdma_general_transfer() {
        let mut mmu = mmu_cgb();
        for index in 0..32u16 {
            mmu.write(0xc200 + index, 0x40 + index as u8);
        }
        mmu.write(0xff51, 0xc2);
        mmu.write(0xff52, 0x00);
        mmu.write(0xff53, 0x00);
        mmu.write(0xff54, 0x40);
        // two blocks, general purpose, runs immediately
        mmu.write(0xff55, 0x01);

        for index in 0..32u16 {
            assert_eq!(mmu.read(0x8040 + index), 0x40 + index as u8);
        }
        assert_eq!(mmu.read(0xff55), 0xff);
    }
}
