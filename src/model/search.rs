use serde::{Deserialize, Serialize};
use std::fmt;

/// How multiple match properties combine within one search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriteria {
    All,
    Any,
    None,
}

impl MatchCriteria {
    pub const EVERY: [MatchCriteria; 3] = [MatchCriteria::All, MatchCriteria::Any, MatchCriteria::None];
}

impl fmt::Display for MatchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchCriteria::All => "ALL",
            MatchCriteria::Any => "ANY",
            MatchCriteria::None => "NONE",
        };
        f.write_str(label)
    }
}

/// Paging window for a search; a page size of zero means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub from: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self { from: 0, page_size }
    }

    pub fn unlimited() -> Self {
        Self {
            from: 0,
            page_size: 0,
        }
    }

    /// A result of `result_len` items may have been cut short by this page
    pub fn truncates(&self, result_len: usize) -> bool {
        self.page_size > 0 && result_len >= self.page_size
    }

    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let skipped = items.into_iter().skip(self.from);
        if self.page_size == 0 {
            skipped.collect()
        } else {
            skipped.take(self.page_size).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        let page = PageRequest { from: 1, page_size: 2 };
        assert_eq!(page.apply(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(PageRequest::unlimited().apply(vec![1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_truncation_detection() {
        assert!(PageRequest::first(4).truncates(4));
        assert!(!PageRequest::first(4).truncates(3));
        assert!(!PageRequest::unlimited().truncates(1000));
    }
}
