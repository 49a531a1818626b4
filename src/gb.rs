//! Game Boy emulation entrypoint and associated functions and structures.
//!
//! Most of the meaningful publicly available functions and structures to build
//! a working emulator should be present here.
//!
//! # Examples
//!
//! Creates a simple [`GameBoy`] instance with the synthesized post-boot
//! state and runs it for one full frame.
//!
//! ```rust
//! use dotmatrix::gb::{GameBoy, GameBoyConfig};
//! let mut game_boy = GameBoy::new(GameBoyConfig::default());
//! game_boy.load_cartridge_empty().unwrap();
//! game_boy.clock_frame();
//! println!("Presented frame {}", game_boy.frame_id());
//! ```

use std::fmt::{self, Display, Formatter};

use crate::{
    cartridge::Cartridge,
    consts::{BGP_ADDR, IF_ADDR, LCDC_ADDR},
    cpu::Cpu,
    dma::Dma,
    error::Error,
    joypad::{Joypad, JoypadButton},
    mmu::Mmu,
    ppu::{Ppu, PpuMode, FRAME_BUFFER_SIZE, FRAME_CYCLES},
    serial::Serial,
    timer::Timer,
};

/// Enumeration that describes the running hardware modes of the
/// emulator: the original DMG or the Game Boy Color.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameBoyMode {
    Dmg = 1,
    Cgb = 2,
}

impl GameBoyMode {
    pub fn description(&self) -> &'static str {
        match self {
            GameBoyMode::Dmg => "Game Boy (DMG)",
            GameBoyMode::Cgb => "Game Boy Color (CGB)",
        }
    }

    pub fn is_dmg(&self) -> bool {
        *self == GameBoyMode::Dmg
    }

    pub fn is_cgb(&self) -> bool {
        *self == GameBoyMode::Cgb
    }
}

impl Display for GameBoyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Normal or (CGB) double speed operation, switched through the
/// KEY1 register and the STOP instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameBoySpeed {
    Normal = 0,
    Double = 1,
}

impl GameBoySpeed {
    pub fn description(&self) -> &'static str {
        match self {
            GameBoySpeed::Normal => "Normal Speed",
            GameBoySpeed::Double => "Double Speed",
        }
    }

    pub fn switch(&self) -> Self {
        match self {
            GameBoySpeed::Normal => GameBoySpeed::Double,
            GameBoySpeed::Double => GameBoySpeed::Normal,
        }
    }

    pub fn multiplier(&self) -> u8 {
        match self {
            GameBoySpeed::Normal => 1,
            GameBoySpeed::Double => 2,
        }
    }
}

impl Display for GameBoySpeed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Construction-time configuration of a [`GameBoy`] instance.
#[derive(Clone, PartialEq, Eq)]
pub struct GameBoyConfig {
    /// The hardware model to emulate.
    pub mode: GameBoyMode,

    /// An optional boot ROM image; when present (and the stub is
    /// not forced) execution starts at 0x0000 with the overlay
    /// active instead of from the synthesized post-boot state.
    pub boot_rom: Option<Vec<u8>>,

    /// Forces the synthesized post-boot state even when a boot
    /// image was provided.
    pub boot_stub: bool,

    /// Overrides the DMG compatibility decision normally taken
    /// from the cartridge CGB flag (CGB mode only).
    pub dmg_compat_forced: Option<bool>,
}

impl Default for GameBoyConfig {
    fn default() -> Self {
        Self {
            mode: GameBoyMode::Dmg,
            boot_rom: None,
            boot_stub: true,
            dmg_compat_forced: None,
        }
    }
}

/// Aggregation structure allowing the bundling of all the memory
/// mapped components of a Game Boy into a single element.
pub struct Components {
    pub ppu: Ppu,
    pub timer: Timer,
    pub joypad: Joypad,
    pub serial: Serial,
    pub dma: Dma,
}

impl Components {
    pub fn new(mode: GameBoyMode) -> Self {
        Self {
            ppu: Ppu::new(mode),
            timer: Timer::new(),
            joypad: Joypad::new(),
            serial: Serial::new(),
            dma: Dma::new(),
        }
    }
}

/// Top level structure that abstracts the usage of the Game Boy
/// system, owning the complete component tree through the CPU and
/// acting as the driver of the master loop.
///
/// The per-instruction ordering is fixed: the CPU executes and
/// returns its T-cycle cost, then the Timer, the PPU and the DMA
/// engine are stepped by that cost, making any interrupt they raise
/// visible at the next CPU boundary.
pub struct GameBoy {
    /// The hardware mode the system is running as.
    mode: GameBoyMode,

    /// The configuration the system was built from.
    config: GameBoyConfig,

    /// The CPU, which in turn owns the MMU and through it every
    /// other component.
    cpu: Cpu,
}

impl GameBoy {
    /// The clock frequency of the DMG Game Boy in Hz.
    pub const CPU_FREQ: u32 = 4194304;

    pub fn new(config: GameBoyConfig) -> Self {
        let mode = config.mode;
        let mmu = Mmu::new(Components::new(mode), mode);
        let cpu = Cpu::new(mmu);
        let mut game_boy = Self { mode, config, cpu };

        match (game_boy.config.boot_rom.clone(), game_boy.config.boot_stub) {
            (Some(boot), false) => game_boy.cpu.mmu().set_boot(&boot),
            _ => game_boy.boot_state(),
        }

        game_boy
    }

    /// Applies the synthesized post-boot state: the documented
    /// register file of a finished boot sequence, with the PPU
    /// starting a fresh frame.
    fn boot_state(&mut self) {
        self.cpu.boot();
        let mmu = self.cpu.mmu();
        mmu.set_boot_active(false);
        mmu.write(LCDC_ADDR, 0x91);
        mmu.write(BGP_ADDR, 0xfc);
        mmu.write(IF_ADDR, 0x01);
    }

    /// Loads a cartridge from its raw ROM image, deciding the DMG
    /// compatibility behavior for legacy cartridges on CGB.
    pub fn load_cartridge(&mut self, data: &[u8]) -> Result<(), Error> {
        let cartridge = Cartridge::from_data(data)?;
        if self.mode.is_cgb() {
            let compat = self
                .config
                .dmg_compat_forced
                .unwrap_or_else(|| cartridge.is_legacy());
            self.cpu.mmu().ppu().set_dmg_compat(compat);
        }
        self.cpu.mmu().set_cartridge(cartridge);
        Ok(())
    }

    /// Loads a minimal idle cartridge (a tight jump at the entry
    /// point), useful for tests and benchmarks that only need the
    /// bus populated and a well behaved program.
    pub fn load_cartridge_empty(&mut self) -> Result<(), Error> {
        let mut data = vec![0x00u8; 0x8000];
        // JR -2, spins at the entry point without touching memory
        data[0x0100] = 0x18;
        data[0x0101] = 0xfe;
        let mut checksum: u8 = 0;
        for byte in &data[0x0134..=0x014c] {
            checksum = checksum.wrapping_sub(*byte).wrapping_sub(1);
        }
        data[0x014d] = checksum;
        self.load_cartridge(&data)
    }

    /// Runs one iteration of the master loop: a single CPU step
    /// followed by the matching Timer, PPU and DMA steps. Returns
    /// the T-cycles consumed, in CPU clock terms.
    pub fn clock(&mut self) -> u16 {
        let cycles = self.cpu.clock() as u16;

        // in double speed only the CPU and the timer run faster,
        // the pixel pipeline keeps its own pace
        let cycles_base = match self.speed() {
            GameBoySpeed::Normal => cycles,
            GameBoySpeed::Double => cycles >> 1,
        };

        self.cpu.mmu().timer().clock(cycles);
        self.cpu.mmu().ppu().clock(cycles_base);
        self.cpu.mmu().clock_dma(cycles_base);

        cycles
    }

    /// Runs the master loop until at least `count` T-cycles have
    /// been consumed, returning the exact amount.
    pub fn clocks_cycles(&mut self, count: u64) -> u64 {
        let mut total = 0u64;
        while total < count {
            total += self.clock() as u64;
        }
        total
    }

    /// Runs the master loop until the next frame is published (or
    /// an equivalent time passes with the LCD off).
    pub fn clock_frame(&mut self) -> u64 {
        let frame_id = self.frame_id();
        let mut total = 0u64;
        while self.frame_id() == frame_id && total < 2 * FRAME_CYCLES as u64 {
            total += self.clock() as u64;
        }
        total
    }

    /// Clocks the system until the PC reaches the provided address,
    /// bounded to keep broken programs from spinning forever.
    pub fn step_to(&mut self, addr: u16) -> u64 {
        let mut total = 0u64;
        while self.cpu.pc() != addr && total < 10 * FRAME_CYCLES as u64 {
            total += self.clock() as u64;
        }
        total
    }

    /// The most recent complete frame, row-major RGB888. The view
    /// stays valid until the next publish.
    pub fn presented_frame_buffer(&self) -> &[u8; FRAME_BUFFER_SIZE] {
        self.cpu.mmu_i().ppu_i().front_frame()
    }

    /// Strictly increasing identifier of the presented frame.
    pub fn frame_id(&self) -> u64 {
        self.cpu.mmu_i().ppu_i().frame_id()
    }

    /// Single-use latch reporting whether a new frame was published
    /// since the last call.
    pub fn frame_ready_and_reset(&mut self) -> bool {
        self.cpu.mmu().ppu().frame_ready_and_reset()
    }

    /// Forwards a host button state change into the joypad matrix,
    /// raising the joypad interrupt when it becomes visible.
    pub fn set_button_state(&mut self, button: JoypadButton, pressed: bool) {
        self.cpu.mmu().joypad().set_button_state(button, pressed);
    }

    /// Raw view of the battery backed cartridge RAM, to be
    /// persisted by the host at shutdown.
    pub fn external_ram(&self) -> &[u8] {
        self.cpu.mmu_i().cartridge_i().ram_data()
    }

    /// Restores the battery backed cartridge RAM from a raw copy.
    pub fn set_external_ram(&mut self, data: &[u8]) {
        self.cpu.mmu().cartridge().set_ram_data(data);
    }

    /// Whether the CPU latched on an illegal opcode; the system
    /// accepts input and register pokes but makes no progress.
    pub fn is_frozen(&self) -> bool {
        self.cpu.is_frozen()
    }

    #[inline(always)]
    pub fn cpu(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    #[inline(always)]
    pub fn cpu_i(&self) -> &Cpu {
        &self.cpu
    }

    #[inline(always)]
    pub fn mmu(&mut self) -> &mut Mmu {
        self.cpu.mmu()
    }

    #[inline(always)]
    pub fn mmu_i(&self) -> &Mmu {
        self.cpu.mmu_i()
    }

    #[inline(always)]
    pub fn ppu(&mut self) -> &mut Ppu {
        self.cpu.mmu().ppu()
    }

    #[inline(always)]
    pub fn ppu_i(&self) -> &Ppu {
        self.cpu.mmu_i().ppu_i()
    }

    #[inline(always)]
    pub fn ppu_mode(&self) -> PpuMode {
        self.ppu_i().mode()
    }

    #[inline(always)]
    pub fn mode(&self) -> GameBoyMode {
        self.mode
    }

    #[inline(always)]
    pub fn speed(&self) -> GameBoySpeed {
        self.cpu.mmu_i().speed()
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new(GameBoyConfig::default())
    }
}

impl Display for GameBoy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] frame {}",
            self.mode.description(),
            self.speed().description(),
            self.frame_id()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{GameBoyMode, GameBoySpeed};
    use crate::{
        consts::{BGP_ADDR, IF_ADDR, KEY1_ADDR, LCDC_ADDR, P1_ADDR, TAC_ADDR, TIMA_ADDR, TMA_ADDR},
        joypad::JoypadButton,
        ppu::{DISPLAY_WIDTH, FRAME_CYCLES},
        test::{build_test, TestOptions},
    };

    #[test]
    fn test_post_boot_state() {
        let gb = build_test(TestOptions::default());
        assert_eq!(gb.cpu_i().pc(), 0x0100);
        assert_eq!(gb.cpu_i().sp(), 0xfffe);
        assert_eq!(gb.cpu_i().af(), 0x01b0);
        assert_eq!(gb.cpu_i().bc(), 0x0013);
        assert_eq!(gb.cpu_i().de(), 0x00d8);
        assert_eq!(gb.cpu_i().hl(), 0x014d);
        assert_eq!(gb.mmu_i().read(LCDC_ADDR), 0x91);
        assert_eq!(gb.mmu_i().read(BGP_ADDR), 0xfc);
        assert_eq!(gb.mmu_i().read(IF_ADDR), 0xe1);
        assert_eq!(gb.mmu_i().read(0xffff), 0x00);
    }

    #[test]
    fn test_cgb_post_boot_accumulator() {
        let gb = build_test(TestOptions {
            mode: Some(GameBoyMode::Cgb),
            ..Default::default()
        });
        assert_eq!(gb.cpu_i().af() >> 8, 0x11);
    }

    #[test]
    fn test_first_frame_renders_background() {
        let mut gb = build_test(TestOptions::default());

        // tile 0 row 0 reads color index one for every pixel; the
        // tilemap is zero filled already
        gb.mmu().write(0x8000, 0xff);
        gb.mmu().write(0x8001, 0x00);
        gb.mmu().write(BGP_ADDR, 0xe4);

        let cycles = gb.clocks_cycles(FRAME_CYCLES as u64);
        assert_eq!(cycles, FRAME_CYCLES as u64);
        assert_eq!(gb.frame_id(), 1);
        assert!(gb.frame_ready_and_reset());

        // BGP 0xE4 maps index 1 to shade 1, the light gray
        let frame = gb.presented_frame_buffer();
        for x in 0..DISPLAY_WIDTH {
            assert_eq!(frame[x * 3], 0xc0);
            assert_eq!(frame[x * 3 + 1], 0xc0);
            assert_eq!(frame[x * 3 + 2], 0xc0);
        }
    }

    #[test]
    fn test_lcd_disabled_produces_no_frames() {
        let mut gb = build_test(TestOptions::default());
        gb.mmu().write(LCDC_ADDR, 0x11);

        gb.clocks_cycles(2 * FRAME_CYCLES as u64);
        assert_eq!(gb.frame_id(), 0);
        assert!(!gb.frame_ready_and_reset());

        // re-enabling restarts a frame from scratch
        gb.mmu().write(LCDC_ADDR, 0x91);
        gb.clocks_cycles(FRAME_CYCLES as u64);
        assert_eq!(gb.frame_id(), 1);
    }

    #[test]
    fn test_timer_overflow_scenario() {
        let mut gb = build_test(TestOptions::default());
        gb.mmu().write(TAC_ADDR, 0x05);
        gb.mmu().write(TMA_ADDR, 0xf0);
        gb.mmu().write(TIMA_ADDR, 0xfe);

        gb.clocks_cycles(1024);
        assert_eq!(gb.mmu_i().read(IF_ADDR) & 0x04, 0x04);
        assert!(gb.mmu_i().read(TIMA_ADDR) >= 0xf0);
        assert!(gb.mmu_i().timer_i().div() > 0);
    }

    #[test]
    fn test_halt_interrupt_scenario() {
        let mut gb = build_test(TestOptions::default());

        // LD A, 0x0F; LDH [0x0F], A; LD A, 0x01; LDH [0xFF], A;
        // EI; HALT — with the VBlank flag already raised the halt
        // resolves straight into the handler
        let program: [u8; 10] = [0x3e, 0x0f, 0xe0, 0x0f, 0x3e, 0x01, 0xe0, 0xff, 0xfb, 0x76];
        for (offset, byte) in program.iter().enumerate() {
            gb.mmu().write(0xc000 + offset as u16, *byte);
        }
        gb.cpu().set_pc(0xc000);
        gb.cpu().set_sp(0xdff0);

        // six instructions plus the interrupt service boundary
        for _ in 0..7 {
            gb.clock();
        }

        assert_eq!(gb.cpu_i().pc(), 0x0040);
        assert!(!gb.cpu_i().ime());
        assert_eq!(gb.mmu_i().read(IF_ADDR) & 0x01, 0x00);
        assert_eq!(gb.cpu_i().sp(), 0xdfee);
        assert_eq!(gb.mmu_i().read(0xdfee), 0x0a);
        assert_eq!(gb.mmu_i().read(0xdfef), 0xc0);
    }

    #[test]
    fn test_button_press_raises_interrupt() {
        let mut gb = build_test(TestOptions::default());
        gb.mmu().write(IF_ADDR, 0x00);
        gb.mmu().write(P1_ADDR, 0x20);

        gb.set_button_state(JoypadButton::Right, true);
        assert_eq!(gb.mmu_i().read(IF_ADDR) & 0x10, 0x10);
        assert_eq!(gb.mmu_i().read(P1_ADDR) & 0x0f, 0x0e);

        gb.set_button_state(JoypadButton::Right, false);
        assert_eq!(gb.mmu_i().read(P1_ADDR) & 0x0f, 0x0f);
    }

    #[test]
    fn test_double_speed_switch() {
        let mut gb = build_test(TestOptions {
            mode: Some(GameBoyMode::Cgb),
            ..Default::default()
        });
        assert_eq!(gb.speed(), GameBoySpeed::Normal);

        gb.mmu().write(KEY1_ADDR, 0x01);

        // STOP at 0xC000 performs the armed switch
        gb.mmu().write(0xc000, 0x10);
        gb.mmu().write(0xc001, 0x00);
        gb.cpu().set_pc(0xc000);
        gb.clock();

        assert_eq!(gb.speed(), GameBoySpeed::Double);
        assert!(!gb.cpu_i().stopped());

        // a frame now costs twice the T-cycles in CPU terms
        let cycles = gb.clock_frame();
        assert!(cycles > FRAME_CYCLES as u64 + FRAME_CYCLES as u64 / 2);
    }

    #[test]
    fn test_frozen_core_keeps_presenting() {
        let mut gb = build_test(TestOptions::default());
        gb.clock_frame();
        assert_eq!(gb.frame_id(), 1);

        gb.mmu().write(0xc000, 0xd3);
        gb.cpu().set_pc(0xc000);
        gb.clock();
        assert!(gb.is_frozen());

        // devices keep running and frames keep being published
        gb.clock_frame();
        assert_eq!(gb.frame_id(), 2);
    }
}
