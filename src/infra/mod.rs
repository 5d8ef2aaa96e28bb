//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod fs;
pub mod markup;
pub mod telemetry;
