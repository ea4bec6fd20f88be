use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Items per page, at most 100.
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.limit()
    }

    pub fn paginate(&self, total_items: i64) -> Pagination {
        Pagination::new(self.page(), self.limit(), total_items)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Pagination {
    pub current_page: i64,
    pub items_per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub next_page: Option<i64>,
    pub prev_page: Option<i64>,
}

impl Pagination {
    pub fn new(current_page: i64, items_per_page: i64, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + items_per_page - 1) / items_per_page
        };
        let has_next_page = current_page < total_pages;
        let has_prev_page = current_page > 1;

        Self {
            current_page,
            items_per_page,
            total_items,
            total_pages,
            has_next_page,
            has_prev_page,
            next_page: has_next_page.then_some(current_page + 1),
            prev_page: has_prev_page.then_some(current_page - 1),
        }
    }
}

/// A page of results plus the paging metadata.
#[derive(Debug, Serialize, ToSchema)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_clamping() {
        let query = PageQuery::default();
        assert_eq!((query.page(), query.limit(), query.offset()), (1, 10, 0));

        let query = PageQuery {
            page: Some(0),
            limit: Some(1_000),
        };
        assert_eq!((query.page(), query.limit()), (1, MAX_PAGE_SIZE));

        let query = PageQuery {
            page: Some(3),
            limit: Some(25),
        };
        assert_eq!(query.offset(), 50);
    }

    #[test]
    fn test_middle_page() {
        let pagination = Pagination::new(2, 10, 35);
        assert_eq!(pagination.total_pages, 4);
        assert_eq!(pagination.next_page, Some(3));
        assert_eq!(pagination.prev_page, Some(1));
    }

    #[test]
    fn test_last_page() {
        let pagination = Pagination::new(4, 10, 35);
        assert!(!pagination.has_next_page);
        assert_eq!(pagination.next_page, None);
    }

    #[test]
    fn test_empty_result() {
        let pagination = Pagination::new(1, 10, 0);
        assert_eq!(pagination.total_pages, 0);
        assert!(!pagination.has_next_page && !pagination.has_prev_page);
    }
}
