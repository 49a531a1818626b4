//! Test and benchmark support utilities.
//!
//! Builds fully assembled [`GameBoy`] instances around synthesized
//! in-memory cartridge images, no ROM files involved.

use crate::{
    cartridge::ROM_BANK_SIZE,
    gb::{GameBoy, GameBoyConfig, GameBoyMode},
};

#[derive(Default)]
pub struct TestOptions {
    pub mode: Option<GameBoyMode>,
    pub cartridge_type: Option<u8>,
    pub rom_size: Option<u8>,
    pub ram_size: Option<u8>,
    pub boot_rom: Option<Vec<u8>>,
}

/// Builds a synthetic ROM image: the requested header bytes, a
/// valid header checksum, a tight idle loop at the entry point and
/// the bank number stamped at the start of every bank (to make
/// banking observable from tests).
pub fn rom_image(cartridge_type: u8, rom_size: u8, ram_size: u8, cgb_flag: u8) -> Vec<u8> {
    let banks = 2usize << rom_size;
    let mut data = vec![0u8; banks * ROM_BANK_SIZE];
    for bank in 0..banks {
        data[bank * ROM_BANK_SIZE] = bank as u8;
        data[bank * ROM_BANK_SIZE + 1] = (bank >> 8) as u8;
    }

    // JR -2, spins at the entry point without touching memory
    data[0x0100] = 0x18;
    data[0x0101] = 0xfe;

    data[0x0134..0x013a].copy_from_slice(b"TESTER");
    data[0x0143] = cgb_flag;
    data[0x0147] = cartridge_type;
    data[0x0148] = rom_size;
    data[0x0149] = ram_size;

    let mut checksum: u8 = 0;
    for i in 0x0134..=0x014c {
        checksum = checksum.wrapping_sub(data[i]).wrapping_sub(1);
    }
    data[0x014d] = checksum;

    data
}

/// Assembles a [`GameBoy`] according to the provided options, with
/// a synthesized cartridge already loaded.
pub fn build_test(options: TestOptions) -> GameBoy {
    let mode = options.mode.unwrap_or(GameBoyMode::Dmg);
    let boot_stub = options.boot_rom.is_none();
    let config = GameBoyConfig {
        mode,
        boot_rom: options.boot_rom,
        boot_stub,
        dmg_compat_forced: None,
    };

    let cgb_flag = if mode.is_cgb() { 0x80 } else { 0x00 };
    let image = rom_image(
        options.cartridge_type.unwrap_or(0x00),
        options.rom_size.unwrap_or(0x00),
        options.ram_size.unwrap_or(0x00),
        cgb_flag,
    );

    let mut game_boy = GameBoy::new(config);
    game_boy.load_cartridge(&image).unwrap();
    game_boy
}

#[cfg(test)]
mod tests {
    use super::{build_test, rom_image, TestOptions};
    use crate::gb::GameBoyMode;

    #[test]
    fn test_rom_image_checksum() {
        let image = rom_image(0x00, 0x00, 0x00, 0x00);
        let mut checksum: u8 = 0;
        for i in 0x0134..=0x014c {
            checksum = checksum.wrapping_sub(image[i]).wrapping_sub(1);
        }
        assert_eq!(image[0x014d], checksum);
        assert_eq!(image.len(), 0x8000);
    }

    #[test]
    fn test_build_test_modes() {
        let gb = build_test(TestOptions::default());
        assert!(gb.mode().is_dmg());

        let gb = build_test(TestOptions {
            mode: Some(GameBoyMode::Cgb),
            ..Default::default()
        });
        assert!(gb.mode().is_cgb());
    }
}
