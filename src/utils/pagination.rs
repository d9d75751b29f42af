use serde_json::{json, Value};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;
pub const MAX_PAGE: i64 = 100_000;

/// Page/limit pair normalised from optional query parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Page {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit).max(0) as u64
    }

    pub fn meta(&self, total: u64) -> Value {
        json!({
            "page": self.page,
            "limit": self.limit,
            "total": total,
            "pages": (total as f64 / self.limit as f64).ceil() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_bad_input() {
        assert_eq!(Page::new(Some(0), Some(1000)), Page { page: 1, limit: MAX_LIMIT });
        assert_eq!(Page::new(None, Some(-5)), Page { page: 1, limit: 1 });
        assert_eq!(Page::new(None, None).limit, DEFAULT_LIMIT);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let page = Page::new(Some(i64::MAX), Some(100));
        assert_eq!(page.page, MAX_PAGE);
        assert_eq!(page.skip(), ((MAX_PAGE - 1) * 100) as u64);
    }

    #[test]
    fn skip_and_meta() {
        let page = Page::new(Some(3), Some(10));
        assert_eq!(page.skip(), 20);
        let meta = page.meta(41);
        assert_eq!(meta["pages"], 5);
        assert_eq!(meta["total"], 41);
    }
}
