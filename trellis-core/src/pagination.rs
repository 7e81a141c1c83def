//! JSON-API-style pagination: `page[offset]` / `page[limit]` parameters
//! and the `self/first/last/next/prev` link block.

use serde::{Deserialize, Serialize};

use crate::Error;

pub const MAX_PAGE_SIZE: u64 = 300;
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Below this size an exact count is considered cheap; above it the
/// catalog reports a lower bound instead.
pub const EXACT_COUNT_THRESHOLD: u64 = 10_000;

fn default_limit() -> u64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct PageParams {
    #[serde(rename = "page[offset]", default)]
    pub offset: u64,
    #[serde(rename = "page[limit]", default = "default_limit")]
    pub limit: u64,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageParams {
    /// Bound the limit to `[0, MAX_PAGE_SIZE]`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.limit > MAX_PAGE_SIZE {
            return Err(Error::BadRequest(format!(
                "page[limit] must be at most {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

/// Pagination links embedded in listing responses.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub first: String,
    pub last: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

impl PageLinks {
    /// Compute links from the (possibly approximate) collection count.
    pub fn compute(base_url: &str, offset: u64, limit: u64, count: u64) -> Self {
        let link = |offset: u64| format!("{base_url}?page[offset]={offset}&page[limit]={limit}");
        let last_offset = if limit == 0 || count == 0 {
            0
        } else {
            ((count - 1) / limit) * limit
        };
        let next = if limit > 0 && offset + limit < count {
            Some(link(offset + limit))
        } else {
            None
        };
        let prev = if offset > 0 {
            Some(link(offset.saturating_sub(limit)))
        } else {
            None
        };
        Self {
            self_link: link(offset),
            first: link(0),
            last: link(last_offset),
            next,
            prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_bounded() {
        assert!(PageParams {
            offset: 0,
            limit: MAX_PAGE_SIZE
        }
        .validate()
        .is_ok());
        assert!(PageParams {
            offset: 0,
            limit: MAX_PAGE_SIZE + 1
        }
        .validate()
        .is_err());
    }

    #[test]
    fn page_params_deserialize_bracket_keys() {
        let params: PageParams =
            serde_urlencoded_from_str("page[offset]=3&page[limit]=7").unwrap();
        assert_eq!(params.offset, 3);
        assert_eq!(params.limit, 7);
        let params: PageParams = serde_urlencoded_from_str("").unwrap();
        assert_eq!(params.limit, DEFAULT_PAGE_SIZE);
    }

    // Minimal stand-in for the axum Query extractor used in the server.
    fn serde_urlencoded_from_str(query: &str) -> Result<PageParams, String> {
        let pairs: Vec<(String, String)> = query
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (k, v) = part.split_once('=').unwrap_or((part, ""));
                (k.to_string(), v.to_string())
            })
            .collect();
        let mut params = PageParams::default();
        for (key, value) in pairs {
            match key.as_str() {
                "page[offset]" => params.offset = value.parse().map_err(|_| "offset")?,
                "page[limit]" => params.limit = value.parse().map_err(|_| "limit")?,
                _ => {}
            }
        }
        Ok(params)
    }

    #[test]
    fn links_walk_a_ten_item_collection() {
        let links = PageLinks::compute("http://x/search/", 0, 1, 10);
        assert_eq!(
            links.next.as_deref(),
            Some("http://x/search/?page[offset]=1&page[limit]=1")
        );
        assert!(links.prev.is_none());
        assert_eq!(links.last, "http://x/search/?page[offset]=9&page[limit]=1");

        let links = PageLinks::compute("http://x/search/", 9, 1, 10);
        assert!(links.next.is_none());
        assert_eq!(
            links.prev.as_deref(),
            Some("http://x/search/?page[offset]=8&page[limit]=1")
        );
    }
}
