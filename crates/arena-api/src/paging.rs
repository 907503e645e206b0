//! Page/count handling.
//!
//! Two policies coexist on purpose. Friendship listings reject anything that
//! is not a positive integer; the leaderboard quietly falls back to page 1 of
//! 10. Both address the window `[(page-1)*count, page*count-1]`.

use arena_types::api::PageQuery;

use crate::error::ApiError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_COUNT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub count: i64,
}

impl Page {
    /// Both values must be present, numeric and at least 1.
    pub fn strict(query: &PageQuery) -> Result<Self, ApiError> {
        let page = parse_positive(query.page.as_deref()).ok_or_else(|| ApiError::invalid("page"))?;
        let count = parse_positive(query.count.as_deref()).ok_or_else(|| ApiError::invalid("count"))?;
        Ok(Self { page, count })
    }

    /// Anything unusable is replaced by the default.
    pub fn lenient(query: &PageQuery) -> Self {
        Self {
            page: parse_positive(query.page.as_deref()).unwrap_or(DEFAULT_PAGE),
            count: parse_positive(query.count.as_deref()).unwrap_or(DEFAULT_COUNT),
        }
    }

    /// Zero-based index of the first entry on this page.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.count)
    }
}

fn parse_positive(raw: Option<&str>) -> Option<i64> {
    raw?.trim().parse::<i64>().ok().filter(|v| *v >= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, count: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(String::from),
            count: count.map(String::from),
        }
    }

    #[test]
    fn strict_accepts_positive_numbers() {
        let page = Page::strict(&query(Some("3"), Some("5"))).unwrap();
        assert_eq!(page, Page { page: 3, count: 5 });
        assert_eq!(page.offset(), 10);
    }

    #[test]
    fn strict_names_the_bad_field() {
        let err = Page::strict(&query(Some("0"), Some("5"))).unwrap_err();
        assert!(matches!(&err, ApiError::InvalidArgument(msg) if msg.contains("page")));

        let err = Page::strict(&query(Some("1"), Some("ten"))).unwrap_err();
        assert!(matches!(&err, ApiError::InvalidArgument(msg) if msg.contains("count")));

        assert!(Page::strict(&query(None, Some("5"))).is_err());
        assert!(Page::strict(&query(Some("-2"), Some("5"))).is_err());
    }

    #[test]
    fn lenient_falls_back_per_field() {
        assert_eq!(Page::lenient(&query(Some("0"), Some("5"))), Page { page: 1, count: 5 });
        assert_eq!(Page::lenient(&query(Some("2"), Some("x"))), Page { page: 2, count: 10 });
        assert_eq!(Page::lenient(&PageQuery::default()), Page { page: 1, count: 10 });
    }

    #[test]
    fn huge_offsets_saturate() {
        let page = Page { page: i64::MAX, count: i64::MAX };
        assert_eq!(page.offset(), i64::MAX);
    }
}
