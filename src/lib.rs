//! Page cache and optimization front for a site.
//!
//! Requests are planned against the stored options and the license tier,
//! answered from the file-backed page cache when possible, and otherwise
//! generated, optimized and captured.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod optimize;
pub mod util;
