//! Domain layer types and invariants.

pub mod error;
pub mod features;
pub mod license;
pub mod options;
pub mod request;
pub mod settings;
pub mod tier;
