//! Wire-level constants shared with the data service.
//!
//! The service shapes request and response bodies through a small set of
//! custom headers: the Depth/Role policy (`X-Json-*`, `X-Get-Full-Json`) and
//! the paging policy (`X-List-*`, `X-Page-*`). Header names are
//! case-insensitive on the wire; `http` stores them lowercased.

use crate::{CodecError, CodecResult};
use http::{HeaderMap, HeaderName};

/// Traversal directions, as an integer mask or comma-separated flag names.
pub const X_JSON_KEYS: HeaderName = HeaderName::from_static("x-json-keys");

/// Maximum traversal depth. Negative means unbounded.
pub const X_JSON_MAX_DEPTH: HeaderName = HeaderName::from_static("x-json-maxdepth");

/// Forces a full (non-diff) body.
pub const X_GET_FULL_JSON: HeaderName = HeaderName::from_static("x-get-full-json");

/// First index of an inclusive list window.
pub const X_LIST_FROM: HeaderName = HeaderName::from_static("x-list-from");

/// Last index of an inclusive list window.
pub const X_LIST_TO: HeaderName = HeaderName::from_static("x-list-to");

/// Zero-based page index.
pub const X_PAGE_INDEX: HeaderName = HeaderName::from_static("x-page-index");

/// Page size.
pub const X_PAGE_SIZE: HeaderName = HeaderName::from_static("x-page-size");

/// Total number of list items, echoed on paged responses.
pub const X_LIST_COUNT: HeaderName = HeaderName::from_static("x-list-count");

/// Total number of pages, echoed on page-mode responses.
pub const X_PAGE_COUNT: HeaderName = HeaderName::from_static("x-page-count");

/// Returns a header value as trimmed text, or `None` if absent or empty.
pub(crate) fn header_text<'a>(headers: &'a HeaderMap, name: &HeaderName) -> CodecResult<Option<&'a str>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| invalid_header(name, &String::from_utf8_lossy(value.as_bytes())))?
        .trim();
    Ok((!text.is_empty()).then_some(text))
}

/// Parses an integer header.
pub(crate) fn header_int(headers: &HeaderMap, name: &HeaderName) -> CodecResult<Option<i64>> {
    header_text(headers, name)?
        .map(|text| text.parse::<i64>().map_err(|_| invalid_header(name, text)))
        .transpose()
}

/// Parses a boolean header (`true`/`false`/`1`/`0`, case-insensitive).
pub(crate) fn header_bool(headers: &HeaderMap, name: &HeaderName) -> CodecResult<Option<bool>> {
    header_text(headers, name)?
        .map(|text| match text.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid_header(name, text)),
        })
        .transpose()
}

pub(crate) fn invalid_header(name: &HeaderName, value: &str) -> CodecError {
    CodecError::InvalidHeader {
        name: name.to_string(),
        value: value.to_string(),
    }
}
