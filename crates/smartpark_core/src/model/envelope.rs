//! Result envelopes returned by entity services.
//!
//! # Responsibility
//! - Wrap every operation outcome into one uniform shape.
//! - Describe one page of list results.
//!
//! # Invariants
//! - `success == true` implies `data` is set and `error` is `None`.
//! - `success == false` implies `error` is set and `message` explains it.
//! - `pages` is derived from the total row count, never a pre-query value.

use serde::Serialize;

pub const SUCCESS_MESSAGE: &str = "Success";

/// Failure category carried by unsuccessful envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Bootstrap,
    Validation,
    Query,
    NotFound,
}

/// Uniform `{success, message, data}` operation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Set when the same call may succeed on retry (timeouts).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

impl<T> Response<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(data),
            error: None,
            retryable: false,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(kind),
            retryable,
        }
    }

    /// Converts into a plain `Result`, keeping the failure message.
    pub fn into_result(self) -> Result<T, (ErrorKind, String)> {
        match (self.data, self.error) {
            (Some(data), None) if self.success => Ok(data),
            (_, kind) => Err((kind.unwrap_or(ErrorKind::Query), self.message)),
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub pages: u64,
    pub current_page: u32,
    pub page_size: u32,
    /// Rows on this page.
    pub count: u64,
    /// Rows matching the list filter across all pages.
    pub total: u64,
    pub items: Vec<T>,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, current_page: u32, page_size: u32, total: u64) -> Self {
        Self {
            pages: page_count(total, page_size),
            current_page,
            page_size,
            count: items.len() as u64,
            total,
            items,
        }
    }
}

/// `ceil(total / page_size)`; zero when `page_size` is zero.
pub fn page_count(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 50), 0);
        assert_eq!(page_count(1, 50), 1);
        assert_eq!(page_count(50, 50), 1);
        assert_eq!(page_count(51, 50), 2);
        assert_eq!(page_count(10, 0), 0);
    }

    #[test]
    fn page_result_counts_returned_rows() {
        let page = PageResult::new(vec![1, 2, 3], 1, 3, 7);
        assert_eq!(page.count, 3);
        assert_eq!(page.pages, 3);
        assert_eq!(page.current_page, 1);
    }

    #[test]
    fn envelopes_serialize_in_wire_shape() {
        let ok = serde_json::to_value(Response::ok(PageResult::new(vec!["a"], 0, 50, 1))).unwrap();
        assert_eq!(
            ok,
            json!({
                "success": true,
                "message": "Success",
                "data": {
                    "pages": 1,
                    "currentPage": 0,
                    "pageSize": 50,
                    "count": 1,
                    "total": 1,
                    "items": ["a"]
                }
            })
        );

        let failed = serde_json::to_value(Response::<()>::failure(
            ErrorKind::Connection,
            "timed out",
            true,
        ))
        .unwrap();
        assert_eq!(
            failed,
            json!({
                "success": false,
                "message": "timed out",
                "data": null,
                "error": "connection",
                "retryable": true
            })
        );
    }

    #[test]
    fn into_result_splits_outcomes() {
        assert_eq!(Response::ok(5).into_result(), Ok(5));
        let err = Response::<u8>::failure(ErrorKind::NotFound, "gone", false).into_result();
        assert_eq!(err, Err((ErrorKind::NotFound, "gone".to_string())));
    }
}
