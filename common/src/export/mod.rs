//! Export core modules shared across CLI and HTTP wrappers.

#[cfg(feature = "excel")]
pub mod excel_core;
