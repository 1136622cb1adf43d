//! Cursor pagination over list endpoints.

use std::future::Future;

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;

/// Page size hint sent with every list request.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Query parameter carrying the page size.
pub const PAGE_LIMIT_PARAM: &str = "page.limit";

/// Query parameter carrying the cursor.
pub const PAGE_CURSOR_PARAM: &str = "page.cursor";

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Cursor of the next page; empty or missing on the last page
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Request for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Page size hint
    pub limit: usize,
    /// Cursor returned by the previous page
    pub cursor: Option<String>,
}

impl PageRequest {
    /// First page with the default size.
    #[must_use]
    pub fn first() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }

    /// Query parameters for this page.
    #[must_use]
    pub fn query(&self) -> Vec<(String, String)> {
        let mut query = vec![(PAGE_LIMIT_PARAM.to_string(), self.limit.to_string())];
        if let Some(cursor) = &self.cursor {
            query.push((PAGE_CURSOR_PARAM.to_string(), cursor.clone()));
        }
        query
    }
}

/// Scans pages until an item matches.
///
/// Follows the server cursor until it is empty. An empty page also ends the
/// scan even when it carries a cursor.
///
/// # Errors
///
/// Returns the first error from `fetch`.
pub async fn find_in_pages<T, F, Fut, P>(mut fetch: F, mut matches: P) -> Result<Option<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
    P: FnMut(&T) -> bool,
{
    let mut request = PageRequest::first();
    let mut pages = 0usize;

    loop {
        pages += 1;
        let page = fetch(request.clone()).await?;
        let empty = page.items.is_empty();

        if let Some(found) = page.items.into_iter().find(|item| matches(item)) {
            debug!(pages, "Found matching item");
            return Ok(Some(found));
        }

        match page.next_cursor {
            Some(cursor) if !cursor.is_empty() && !empty => request.cursor = Some(cursor),
            _ => {
                debug!(pages, "No matching item");
                return Ok(None);
            }
        }
    }
}

/// Collects every item of every page.
///
/// # Errors
///
/// Returns the first error from `fetch`.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut request = PageRequest::first();
    let mut all = Vec::new();

    loop {
        let page = fetch(request.clone()).await?;
        let empty = page.items.is_empty();
        all.extend(page.items);

        match page.next_cursor {
            Some(cursor) if !cursor.is_empty() && !empty => request.cursor = Some(cursor),
            _ => return Ok(all),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(items: &[&str], cursor: Option<&str>) -> Page<String> {
        Page {
            items: items.iter().map(|s| (*s).to_string()).collect(),
            next_cursor: cursor.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_find_follows_cursor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let found = find_in_pages(
            move |request: PageRequest| {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(request.limit, DEFAULT_PAGE_SIZE);
                    match n {
                        0 => {
                            assert_eq!(request.cursor, None);
                            Ok(page(&["platform"], Some("cursor-2")))
                        }
                        _ => {
                            assert_eq!(request.cursor.as_deref(), Some("cursor-2"));
                            Ok(page(&["engineering-team"], None))
                        }
                    }
                }
            },
            |item: &String| item == "engineering-team",
        )
        .await
        .unwrap();

        assert_eq!(found.as_deref(), Some("engineering-team"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_page_with_cursor_terminates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let found = find_in_pages(
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(page(&[], Some("again"))) }
            },
            |_: &String| true,
        )
        .await
        .unwrap();

        assert_eq!(found, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collect_pages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let all = collect_pages(move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if n == 0 {
                    page(&["a", "b"], Some("next"))
                } else {
                    page(&["c"], Some(""))
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_page_query_and_deserialize() {
        let request = PageRequest {
            limit: 50,
            cursor: Some("abc".into()),
        };
        assert_eq!(
            request.query(),
            vec![
                ("page.limit".to_string(), "50".to_string()),
                ("page.cursor".to_string(), "abc".to_string())
            ]
        );

        let page: Page<serde_json::Value> =
            serde_json::from_str(r#"{"items": [{"id": "1"}], "nextCursor": "c2"}"#).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
        let empty: Page<serde_json::Value> = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }
}
