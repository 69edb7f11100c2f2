//! Exhaustive pagination over a paged collection endpoint.
//!
//! The analytics rollup needs the entire filtered set while the
//! transport only exposes paged access, so this loop trades request
//! count for completeness. Pages are fetched strictly sequentially:
//! each offset comes from the previous page's response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::ApiError;

/// Filter predicates for the image collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageFilter {
    /// Keep only images with at least one detection of this label.
    pub label: Option<String>,
    /// Inclusive lower creation-time bound.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper creation-time bound.
    pub to: Option<DateTime<Utc>>,
}

/// A request for one page of a collection.
#[derive(Debug, Clone)]
pub struct PageWindow {
    pub limit: u32,
    pub offset: u32,
    pub filter: ImageFilter,
}

/// One fetched page plus the server's next-offset cursor.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` when the server signals there is no further page.
    pub next_offset: Option<u32>,
}

/// Anything that can serve pages of a collection.
#[async_trait]
pub trait PageSource {
    type Item;

    async fn fetch_page(&self, window: &PageWindow) -> Result<Page<Self::Item>, ApiError>;
}

/// Result of an exhaustive fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub items: Vec<T>,
    /// Set when the safety bound stopped the walk before the server
    /// signalled exhaustion. The accumulated items are still valid,
    /// just incomplete.
    pub truncated: bool,
}

/// Fetch every page of `source` matching `filter`, starting at offset 0.
///
/// Stops when the server reports no further page, when a page comes back
/// shorter than the requested limit, or when the next offset would pass
/// `max_offset`. The bound protects against a misbehaving server that
/// keeps handing out cursors; tripping it is logged and reported via
/// [`FetchOutcome::truncated`], not treated as an error.
pub async fn fetch_exhaustive<S: PageSource>(
    source: &S,
    limit: u32,
    filter: ImageFilter,
    max_offset: u32,
) -> Result<FetchOutcome<S::Item>, ApiError> {
    let mut items = Vec::new();
    let mut offset = 0u32;
    let mut truncated = false;

    loop {
        let window = PageWindow {
            limit,
            offset,
            filter: filter.clone(),
        };
        let page = source.fetch_page(&window).await?;
        let short_page = (page.items.len() as u32) < limit;
        items.extend(page.items);

        let Some(next) = page.next_offset else {
            break;
        };
        if short_page {
            break;
        }
        offset = next;
        if offset > max_offset {
            warn!(
                offset,
                max_offset, "pagination safety bound reached; returning partial results"
            );
            truncated = true;
            break;
        }
    }

    Ok(FetchOutcome { items, truncated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a scripted sequence of page sizes.
    struct ScriptedSource {
        pages: Vec<usize>,
        limit: u32,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(pages: Vec<usize>, limit: u32) -> Self {
            Self {
                pages,
                limit,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        type Item = u32;

        async fn fetch_page(&self, window: &PageWindow) -> Result<Page<u32>, ApiError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(window.limit, self.limit);
            let size = self.pages.get(index).copied().unwrap_or(0);
            let items = (0..size as u32).map(|i| window.offset + i).collect();
            let next_offset = if index + 1 < self.pages.len() {
                Some(window.offset + size as u32)
            } else {
                None
            };
            Ok(Page { items, next_offset })
        }
    }

    /// Always returns a full page with a cursor; never exhausts.
    struct EndlessSource;

    #[async_trait]
    impl PageSource for EndlessSource {
        type Item = u32;

        async fn fetch_page(&self, window: &PageWindow) -> Result<Page<u32>, ApiError> {
            Ok(Page {
                items: vec![0; window.limit as usize],
                next_offset: Some(window.offset + window.limit),
            })
        }
    }

    #[tokio::test]
    async fn test_three_full_pages_then_short_final() {
        let source = ScriptedSource::new(vec![100, 100, 100, 37], 100);
        let outcome = fetch_exhaustive(&source, 100, ImageFilter::default(), 10_000)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 337);
        assert!(!outcome.truncated);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stops_on_missing_next_offset() {
        let source = ScriptedSource::new(vec![50], 50);
        let outcome = fetch_exhaustive(&source, 50, ImageFilter::default(), 10_000)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 50);
        assert!(!outcome.truncated);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_page_ends_walk_despite_cursor() {
        // Server hands out a cursor alongside a short page; the short
        // page wins and the walk stops.
        let source = ScriptedSource::new(vec![100, 40, 100], 100);
        let outcome = fetch_exhaustive(&source, 100, ImageFilter::default(), 10_000)
            .await
            .unwrap();
        assert_eq!(outcome.items.len(), 140);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_safety_bound_truncates() {
        let outcome = fetch_exhaustive(&EndlessSource, 100, ImageFilter::default(), 500)
            .await
            .unwrap();
        assert!(outcome.truncated);
        // Offsets walked: 100, 200, ..., 500, then 600 > 500 stops the
        // loop after six fetched pages.
        assert_eq!(outcome.items.len(), 600);
    }

    #[tokio::test]
    async fn test_empty_collection() {
        let source = ScriptedSource::new(vec![0], 100);
        let outcome = fetch_exhaustive(&source, 100, ImageFilter::default(), 10_000)
            .await
            .unwrap();
        assert!(outcome.items.is_empty());
        assert!(!outcome.truncated);
    }
}
