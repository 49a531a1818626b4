//! Error related data structures.

pub use dotmatrix_common::error::Error;
