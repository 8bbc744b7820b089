//! Page/limit validation shared by every listing endpoint.

use serde::Serialize;

use crate::error::ValidationError;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// A validated, 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Validate raw query values. Missing values take the defaults
    /// (page 1, limit 10).
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Result<Self, ValidationError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(i64::from(DEFAULT_LIMIT));

        if page < 1 || page > i64::from(u32::MAX) {
            return Err(ValidationError::Page(page));
        }
        if !(1..=i64::from(MAX_LIMIT)).contains(&limit) {
            return Err(ValidationError::Limit {
                got: limit,
                max: MAX_LIMIT,
            });
        }

        Ok(Self {
            page: page as u32,
            limit: limit as u32,
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One page of rows plus the exact size of the full matching set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let req = PageRequest::new(None, None).unwrap();
        assert_eq!(req, PageRequest::default());
        assert_eq!(req.offset(), 0);
        assert_eq!(req.limit(), 10);
    }

    #[test]
    fn test_offset_is_page_minus_one_times_limit() {
        let req = PageRequest::new(Some(3), Some(20)).unwrap();
        assert_eq!(req.offset(), 40);
        assert_eq!(req.page(), 3);
    }

    #[test]
    fn test_rejects_page_zero() {
        assert_eq!(
            PageRequest::new(Some(0), None).unwrap_err(),
            ValidationError::Page(0)
        );
        assert!(PageRequest::new(Some(-4), None).is_err());
    }

    #[test]
    fn test_limit_bounds() {
        assert!(PageRequest::new(None, Some(1)).is_ok());
        assert!(PageRequest::new(None, Some(100)).is_ok());
        assert_eq!(
            PageRequest::new(None, Some(101)).unwrap_err(),
            ValidationError::Limit { got: 101, max: 100 }
        );
        assert!(PageRequest::new(None, Some(0)).is_err());
    }

    #[test]
    fn test_large_page_does_not_overflow() {
        let req = PageRequest::new(Some(i64::from(u32::MAX)), Some(100)).unwrap();
        assert_eq!(req.offset(), (u64::from(u32::MAX) - 1) * 100);
    }
}
