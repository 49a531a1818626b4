//! Assorted utility functions and structures.

use std::{cell::RefCell, rc::Rc};

/// Shared mutable type able to be passed between types
/// allowing for circular referencing and interior mutability.
pub type SharedMut<T> = Rc<RefCell<T>>;

/// Capitalizes the first character in the provided string.
pub fn capitalize(string: &str) -> String {
    let mut chars = string.chars();
    match chars.next() {
        None => String::new(),
        Some(chr) => chr.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// Interprets the provided sequence of bytes as a printable
/// string, stopping at the first NUL byte.
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{bytes_to_string, capitalize};

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("dotmatrix"), "Dotmatrix");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_bytes_to_string() {
        assert_eq!(bytes_to_string(b"TETRIS\x00\x00\x00"), "TETRIS");
        assert_eq!(bytes_to_string(b""), "");
    }
}
