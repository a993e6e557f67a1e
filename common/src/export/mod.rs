//! Export core modules shared across the CLI and batch runner.

#[cfg(feature = "excel")]
pub mod excel_core;
