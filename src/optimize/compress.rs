//! Gzip transport encoding.

use std::io::Write;

use flate2::{Compression, write::GzEncoder};

use crate::domain::request::PageRequest;

/// Bodies smaller than this are sent as-is.
pub const MIN_COMPRESS_BYTES: usize = 2048;

/// Whether a `len`-byte identity body should be gzipped for `request`.
pub fn should_compress(request: &PageRequest, len: usize) -> bool {
    !request.admin && len >= MIN_COMPRESS_BYTES && request.accepts_gzip()
}

pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 3), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}
