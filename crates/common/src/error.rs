#![allow(clippy::uninlined_format_args)]

//! Error related data structures to be shared and used.
//!
//! This module contains the [`Error`] enum, which represents the
//! construction-time failures of the dotmatrix domain. Runtime bus
//! faults are never propagated as errors (they are silently handled
//! at the hardware-semantics level).

use std::fmt::{self, Display, Formatter};

/// Top level enum for error handling within dotmatrix.
///
/// All variants are produced at load/construction time; once a core
/// is assembled no operation on it returns an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    RomSize,
    UnsupportedCartridge(u8),
    IncompatibleBootRom,
    InvalidParameter(String),
    CustomError(String),
}

impl Error {
    pub fn description(&self) -> String {
        match self {
            Error::RomSize => String::from("Invalid ROM size"),
            Error::UnsupportedCartridge(rom_type) => {
                format!("Unsupported cartridge type 0x{:02x}", rom_type)
            }
            Error::IncompatibleBootRom => String::from("Incompatible Boot ROM"),
            Error::InvalidParameter(message) => format!("Invalid parameter: {}", message),
            Error::CustomError(message) => String::from(message),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
