//! HTTP Range request handling
//!
//! Byte-range parsing per RFC 7233 and the partial-content decision for a
//! fully materialised body. Only single ranges are served; several ranges
//! degrade to the full body rather than a `multipart/byteranges` response.

use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, ACCEPT_RANGES, CONTENT_RANGE};
use hyper::{Response, StatusCode};

/// Inclusive byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

/// Range header parse result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeParseResult {
    /// Not a range header at all (no `=`) - serve the full content
    Malformed,
    /// No requested range overlaps the content - 416
    Unsatisfiable,
    /// Satisfiable ranges, in request order
    Ranges { unit: String, ranges: Vec<ByteRange> },
}

/// Parser options
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOptions {
    /// Merge overlapping and adjacent ranges
    pub combine: bool,
}

/// Parse a `Range` header against content of `size` bytes
///
/// Supported forms, comma separated:
/// - `start-end` - specific range, `end` clamped to the last byte
/// - `start-` - from `start` to the end
/// - `-suffix` - the last `suffix` bytes
///
/// Inverted ranges and ranges reaching outside the content (a suffix longer
/// than the content included) are dropped; when none remain the header is
/// unsatisfiable.
///
/// # Examples
/// ```
/// use devserve::http::range::{parse_range_header, ByteRange, RangeOptions, RangeParseResult};
///
/// let result = parse_range_header(1000, "bytes=0-99", RangeOptions::default());
/// assert_eq!(
///     result,
///     RangeParseResult::Ranges {
///         unit: "bytes".to_string(),
///         ranges: vec![ByteRange { start: 0, end: 99 }],
///     }
/// );
///
/// let result = parse_range_header(1000, "bytes=2000-", RangeOptions::default());
/// assert_eq!(result, RangeParseResult::Unsatisfiable);
/// ```
pub fn parse_range_header(size: usize, header: &str, options: RangeOptions) -> RangeParseResult {
    let Some((unit, spec)) = header.split_once('=') else {
        return RangeParseResult::Malformed;
    };

    let size = i128::try_from(size).unwrap_or(i128::MAX);
    let last = size - 1;
    let mut ranges = Vec::new();

    for part in spec.split(',') {
        let mut bounds = part.split('-');
        let first = bounds.next().and_then(parse_leading_int);
        let second = bounds.next().and_then(parse_leading_int);

        let (start, end) = match (first, second) {
            // A suffix longer than the content starts before byte 0 and is dropped
            (None, Some(suffix)) => (size - suffix, last),
            (Some(start), None) => (start, last),
            (Some(start), Some(end)) => (start, end.min(last)),
            (None, None) => continue,
        };
        if start > end || start < 0 {
            continue;
        }

        if let (Ok(start), Ok(end)) = (usize::try_from(start), usize::try_from(end)) {
            ranges.push(ByteRange { start, end });
        }
    }

    if ranges.is_empty() {
        return RangeParseResult::Unsatisfiable;
    }
    if options.combine {
        ranges = combine_ranges(ranges);
    }

    RangeParseResult::Ranges {
        unit: unit.trim().to_string(),
        ranges,
    }
}

/// Leading decimal digits after optional whitespace; anything after them
/// is ignored
fn parse_leading_int(s: &str) -> Option<i128> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    Some(s[..digits].bytes().fold(0i128, |acc, d| {
        acc.saturating_mul(10).saturating_add(i128::from(d - b'0'))
    }))
}

/// Merge overlapping/adjacent ranges, keeping the order in which each
/// merged group first appeared
fn combine_ranges(ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    let mut ordered: Vec<(usize, ByteRange)> = ranges.into_iter().enumerate().collect();
    ordered.sort_by_key(|(_, range)| range.start);

    let mut merged: Vec<(usize, ByteRange)> = Vec::with_capacity(ordered.len());
    for (index, range) in ordered {
        match merged.last_mut() {
            Some((first_index, current)) if range.start <= current.end.saturating_add(1) => {
                current.end = current.end.max(range.end);
                *first_index = (*first_index).min(index);
            }
            _ => merged.push((index, range)),
        }
    }

    merged.sort_by_key(|(index, _)| *index);
    merged.into_iter().map(|(_, range)| range).collect()
}

/// Where the range decision writes its status and headers
pub trait ResponseSink {
    fn set_header(&mut self, name: HeaderName, value: &str);
    fn set_status(&mut self, status: StatusCode);
}

impl<B> ResponseSink for Response<B> {
    fn set_header(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers_mut().insert(name, value);
        }
    }

    fn set_status(&mut self, status: StatusCode) {
        *self.status_mut() = status;
    }
}

/// Apply the request's `Range` header to `content`
///
/// Always advertises `Accept-Ranges: bytes`. A single satisfiable range
/// yields 206 with `Content-Range` and the sliced body; an unsatisfiable
/// header yields 416 with `bytes */<len>` and the content untouched (the
/// caller decides what body to send). Anything else, including several
/// ranges that overlap, leaves status and body alone.
pub fn serve(content: Bytes, range_header: Option<&str>, sink: &mut impl ResponseSink) -> Bytes {
    sink.set_header(ACCEPT_RANGES, "bytes");

    let Some(header) = range_header else {
        return content;
    };
    let length = content.len();

    match parse_range_header(length, header, RangeOptions::default()) {
        RangeParseResult::Unsatisfiable => {
            sink.set_header(CONTENT_RANGE, &format!("bytes */{length}"));
            sink.set_status(StatusCode::RANGE_NOT_SATISFIABLE);
            content
        }
        RangeParseResult::Ranges { unit, ranges } if unit == "bytes" && ranges.len() == 1 => {
            let ByteRange { start, end } = ranges[0];
            sink.set_status(StatusCode::PARTIAL_CONTENT);
            sink.set_header(CONTENT_RANGE, &format!("bytes {start}-{end}/{length}"));
            content.slice(start..=end)
        }
        RangeParseResult::Ranges { .. } | RangeParseResult::Malformed => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN: &[u8] = b"0123456789";

    fn ranges(result: RangeParseResult) -> Vec<ByteRange> {
        match result {
            RangeParseResult::Ranges { ranges, .. } => ranges,
            other => panic!("Expected Ranges, got {other:?}"),
        }
    }

    fn head() -> Response<()> {
        Response::new(())
    }

    #[test]
    fn test_standard_range() {
        let r = ranges(parse_range_header(100, "bytes=0-9", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 0, end: 9 }]);
    }

    #[test]
    fn test_open_range() {
        let r = ranges(parse_range_header(100, "bytes=50-", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 50, end: 99 }]);
    }

    #[test]
    fn test_suffix_range() {
        let r = ranges(parse_range_header(100, "bytes=-20", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 80, end: 99 }]);

        let r = ranges(parse_range_header(100, "bytes=-100", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 0, end: 99 }]);
    }

    #[test]
    fn test_suffix_longer_than_content_is_unsatisfiable() {
        assert_eq!(
            parse_range_header(100, "bytes=-500", RangeOptions::default()),
            RangeParseResult::Unsatisfiable
        );
        let r = ranges(parse_range_header(100, "bytes=-500,0-9", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 0, end: 9 }]);
    }

    #[test]
    fn test_end_is_clamped() {
        let r = ranges(parse_range_header(100, "bytes=90-500", RangeOptions::default()));
        assert_eq!(r, vec![ByteRange { start: 90, end: 99 }]);
    }

    #[test]
    fn test_not_satisfiable() {
        assert_eq!(
            parse_range_header(100, "bytes=200-", RangeOptions::default()),
            RangeParseResult::Unsatisfiable
        );
        assert_eq!(
            parse_range_header(100, "bytes=9-5", RangeOptions::default()),
            RangeParseResult::Unsatisfiable
        );
        assert_eq!(
            parse_range_header(100, "bytes=a-b", RangeOptions::default()),
            RangeParseResult::Unsatisfiable
        );
        assert_eq!(
            parse_range_header(0, "bytes=0-", RangeOptions::default()),
            RangeParseResult::Unsatisfiable
        );
    }

    #[test]
    fn test_malformed() {
        assert_eq!(
            parse_range_header(100, "0-9", RangeOptions::default()),
            RangeParseResult::Malformed
        );
    }

    #[test]
    fn test_unit_is_reported() {
        match parse_range_header(100, "items=0-9", RangeOptions::default()) {
            RangeParseResult::Ranges { unit, .. } => assert_eq!(unit, "items"),
            other => panic!("Expected Ranges, got {other:?}"),
        }
    }

    #[test]
    fn test_multiple_ranges_keep_order() {
        let r = ranges(parse_range_header(100, "bytes=50-59, 0-9", RangeOptions::default()));
        assert_eq!(
            r,
            vec![ByteRange { start: 50, end: 59 }, ByteRange { start: 0, end: 9 }]
        );
    }

    #[test]
    fn test_combine_overlapping_and_adjacent() {
        let options = RangeOptions { combine: true };
        let r = ranges(parse_range_header(100, "bytes=0-4,2-6,7-9", options));
        assert_eq!(r, vec![ByteRange { start: 0, end: 9 }]);

        let r = ranges(parse_range_header(100, "bytes=50-59,0-1,3-4,55-70", options));
        assert_eq!(
            r,
            vec![
                ByteRange { start: 50, end: 70 },
                ByteRange { start: 0, end: 1 },
                ByteRange { start: 3, end: 4 },
            ]
        );
    }

    #[test]
    fn test_serve_without_range_header() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), None, &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[ACCEPT_RANGES], "bytes");
        assert!(res.headers().get(CONTENT_RANGE).is_none());
    }

    #[test]
    fn test_serve_single_range() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=0-4"), &mut res);
        assert_eq!(body, &TEN[0..5]);
        assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(res.headers()[CONTENT_RANGE], "bytes 0-4/10");
    }

    #[test]
    fn test_serve_unsatisfiable() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=1000-2000"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(res.headers()[CONTENT_RANGE], "bytes */10");
    }

    #[test]
    fn test_serve_multi_range_degrades_to_full() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=0-1,3-4"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(CONTENT_RANGE).is_none());
        assert_eq!(res.headers()[ACCEPT_RANGES], "bytes");
    }

    #[test]
    fn test_serve_overlapping_ranges_degrade_to_full() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=0-4,2-6"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(CONTENT_RANGE).is_none());
    }

    #[test]
    fn test_serve_ignores_other_units_and_garbage() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("items=0-4"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::OK);

        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("garbage"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[test]
    fn test_serve_suffix_range() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=-3"), &mut res);
        assert_eq!(body, &TEN[7..]);
        assert_eq!(res.headers()[CONTENT_RANGE], "bytes 7-9/10");
    }

    #[test]
    fn test_serve_oversized_suffix() {
        let mut res = head();
        let body = serve(Bytes::from_static(TEN), Some("bytes=-500"), &mut res);
        assert_eq!(body, TEN);
        assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(res.headers()[CONTENT_RANGE], "bytes */10");
    }
}
