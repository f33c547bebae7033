#![forbid(unsafe_code)]

pub mod canonical;
pub mod error;

pub use crate::canonical::{strip_paths, to_canonical_bytes};
pub use crate::error::{Error, Result};

pub const CRATE_NAME: &str = "vigil-core";
