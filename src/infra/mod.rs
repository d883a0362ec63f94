//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod generator;
pub mod http;
pub mod options;
pub mod telemetry;
