//! Pagination primitives shared across all list endpoints.

use serde::{Deserialize, Serialize};

/// Pagination query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListQuery {
    /// Maximum items per page.
    const MAX_PAGE_SIZE: i64 = 200;

    /// Default items per page.
    const DEFAULT_PAGE_SIZE: i64 = 50;

    pub fn limit(&self) -> i64 {
        self.page_size
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

/// Paged result envelope returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T: Serialize> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, query: &ListQuery) -> Self {
        let page_size = query.limit();
        Self {
            items,
            total,
            page: query.page(),
            page_size,
            total_pages: (total as u64).div_ceil(page_size as u64) as i64,
        }
    }
}
