//! Application services: options, licensing, feature wiring and the admin
//! operations built on them.

pub mod error;
pub mod license;
pub mod operations;
pub mod options;
pub mod wiring;
