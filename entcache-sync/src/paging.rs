//! Paging policy for list endpoints.
//!
//! A client asks for a slice of a list either as an inclusive index window
//! (`X-List-From`/`X-List-To`) or as a page (`X-Page-Index`/`X-Page-Size`).
//! Responses echo the total count (`X-List-Count`) and, in page mode, the
//! page count (`X-Page-Count`).

use crate::config::CodecConfig;
use crate::protocol::{
    header_int, invalid_header, X_LIST_COUNT, X_LIST_FROM, X_LIST_TO, X_PAGE_COUNT, X_PAGE_INDEX,
    X_PAGE_SIZE,
};
use crate::CodecResult;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::ops::Range;

/// A requested slice of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageRequest {
    /// The whole list.
    #[default]
    All,
    /// Inclusive index window.
    Window { from: usize, to: usize },
    /// Zero-based page of `size` items.
    Page { index: usize, size: usize },
}

impl PageRequest {
    /// Reads the request from headers. A window takes precedence over a page.
    /// Window lengths and page sizes are clamped to `config.max_page_size`.
    pub fn from_headers(headers: &HeaderMap, config: &CodecConfig) -> CodecResult<Self> {
        let max = config.max_page_size.max(1);
        let from = non_negative(headers, &X_LIST_FROM)?;
        let to = non_negative(headers, &X_LIST_TO)?;
        if from.is_some() || to.is_some() {
            let from = from.unwrap_or(0);
            let to = to.unwrap_or_else(|| from.saturating_add(config.page_size.max(1) - 1));
            let to = to.min(from.saturating_add(max - 1));
            return Ok(Self::Window { from, to });
        }

        let index = non_negative(headers, &X_PAGE_INDEX)?;
        let size = non_negative(headers, &X_PAGE_SIZE)?;
        if index.is_none() && size.is_none() {
            return Ok(Self::All);
        }
        let size = match size {
            Some(0) | None => config.page_size,
            Some(size) => size,
        };
        Ok(Self::Page {
            index: index.unwrap_or(0),
            size: size.clamp(1, max),
        })
    }

    /// Index range selected from a list of `count` items.
    pub fn window(&self, count: usize) -> Range<usize> {
        match *self {
            Self::All => 0..count,
            Self::Window { from, to } => {
                let start = from.min(count);
                let end = to.saturating_add(1).min(count);
                start..end.max(start)
            }
            Self::Page { index, size } => {
                let start = index.saturating_mul(size).min(count);
                let end = start.saturating_add(size).min(count);
                start..end
            }
        }
    }

    /// Writes the request as headers.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        match *self {
            Self::All => {}
            Self::Window { from, to } => {
                headers.insert(X_LIST_FROM, HeaderValue::from(from));
                headers.insert(X_LIST_TO, HeaderValue::from(to));
            }
            Self::Page { index, size } => {
                headers.insert(X_PAGE_INDEX, HeaderValue::from(index));
                headers.insert(X_PAGE_SIZE, HeaderValue::from(size));
            }
        }
    }
}

/// What a paged response reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// Total items in the unpaged list.
    pub count: usize,
    /// Total pages, in page mode only.
    pub page_count: Option<usize>,
    /// Range actually returned.
    pub range: Range<usize>,
}

impl PageInfo {
    pub fn new(request: &PageRequest, count: usize) -> Self {
        let page_count = match *request {
            PageRequest::Page { size, .. } => Some(count.div_ceil(size.max(1))),
            _ => None,
        };
        Self {
            count,
            page_count,
            range: request.window(count),
        }
    }

    /// Echoes the counts as response headers.
    pub fn write_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_LIST_COUNT, HeaderValue::from(self.count));
        if let Some(pages) = self.page_count {
            headers.insert(X_PAGE_COUNT, HeaderValue::from(pages));
        }
    }
}

/// Slices `items` per `request`.
pub fn paginate<T: Clone>(items: &[T], request: &PageRequest) -> (Vec<T>, PageInfo) {
    let info = PageInfo::new(request, items.len());
    (items[info.range.clone()].to_vec(), info)
}

fn non_negative(headers: &HeaderMap, name: &HeaderName) -> CodecResult<Option<usize>> {
    header_int(headers, name)?
        .map(|value| usize::try_from(value).map_err(|_| invalid_header(name, &value.to_string())))
        .transpose()
}
