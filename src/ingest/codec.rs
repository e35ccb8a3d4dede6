//! Gzip + Newline-Delimited JSON Helpers
//!
//! Source objects are gzip-compressed newline-delimited JSON. Delivery
//! services commonly concatenate gzip members into one object, so reads go
//! through `MultiGzDecoder`. Compacted output is written as a single member.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Result as IoResult, Write};

/// Upper bound on a single record line. Lines beyond this are treated as
/// invalid records, not buffered.
pub const RECORD_LINE_BYTES_MAX: usize = 1024 * 1024;

/// Gzip-compress `data` as a single member
pub fn gzip_compress(data: &[u8], level: u32) -> IoResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a gzip object, accepting concatenated members
pub fn gzip_decompress(data: &[u8]) -> IoResult<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Iterator over non-empty lines of a newline-delimited buffer
///
/// Yields line slices without the trailing newline, in file order.
pub struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Lines { data, pos: 0 }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.pos < self.data.len() {
            let rest = &self.data[self.pos..];
            let end = memchr::memchr(b'\n', rest).unwrap_or(rest.len());
            let line = &rest[..end];
            self.pos += end + 1;
            // tolerate blank lines and a missing final newline
            let line = if line.last() == Some(&b'\r') {
                &line[..end - 1]
            } else {
                line
            };
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}
