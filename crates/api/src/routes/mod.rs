//! Request handlers, grouped by resource.

pub mod inventory;
pub mod ops;
pub mod orders;
pub mod payments;

use serde::Deserialize;

use common::PageRequest;

/// `?page=&limit=` query. Unparseable values fall back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    page: Option<String>,
    limit: Option<String>,
}

impl PageQuery {
    pub fn to_request(&self) -> PageRequest {
        let parse = |v: &Option<String>| v.as_deref().and_then(|v| v.trim().parse::<u32>().ok());
        PageRequest {
            page: parse(&self.page),
            limit: parse(&self.limit),
        }
    }
}
