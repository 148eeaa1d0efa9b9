//! `Range` header parsing.
//!
//! The parser is deliberately lenient: a numeric field that does not parse
//! is treated as if it were absent instead of failing the whole request.
//! Only the unit prefix is strict.
//!
//! Limitations:
//!
//! * Only the first range of a multi-range header (`bytes=0-99,200-299`) is
//!   honoured. No `multipart/byteranges` responses are produced.
//! * Suffix ranges (`bytes=-500`) do not mean "the last 500 bytes". The start
//!   defaults to 0 and the trailing number is read as the end offset.

use tracing::debug;

const BYTES_UNIT: &str = "bytes=";

/// A satisfiable byte range with an inclusive `end`.
///
/// Always holds `start <= end < total size` of the resource it was parsed
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Why a present `Range` header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRange {
    /// The header did not start with the `bytes=` unit.
    MalformedUnit,
    /// The first byte position is at or past the end of the resource.
    NotSatisfiable,
}

/// Result of evaluating a `Range` header against a resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No header was sent, serve the whole resource.
    Full,
    /// Serve the given sub-range.
    Partial(ByteRange),
    Invalid(InvalidRange),
}

/// Evaluates a raw `Range` header value against `total_size`.
pub fn parse_range(header: Option<&str>, total_size: u64) -> RangeOutcome {
    let Some(header) = header else {
        return RangeOutcome::Full;
    };

    let value = header.trim();
    let spec = match value.get(..BYTES_UNIT.len()) {
        Some(unit) if unit.eq_ignore_ascii_case(BYTES_UNIT) => &value[BYTES_UNIT.len()..],
        _ => {
            debug!("range header {:?} does not use the bytes unit", header);
            return RangeOutcome::Invalid(InvalidRange::MalformedUnit);
        }
    };

    let first = spec.split(',').next().unwrap_or_default();
    let mut fields = first.split('-');
    let start = fields.next().and_then(parse_offset);
    let end = fields.next().and_then(parse_offset);

    let start = start.unwrap_or(0);
    if start >= total_size {
        debug!("range start {} is past the resource size {}", start, total_size);
        return RangeOutcome::Invalid(InvalidRange::NotSatisfiable);
    }

    let last = total_size - 1;
    let end = match end {
        Some(end) if end >= start => end.min(last),
        _ => last,
    };

    RangeOutcome::Partial(ByteRange { start, end })
}

/// Parses a plain decimal offset. Signs, whitespace inside the digits and
/// overflowing values are all rejected.
fn parse_offset(field: &str) -> Option<u64> {
    let field = field.trim();
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
