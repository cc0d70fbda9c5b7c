//! Tower layers applied to every transport attempt
//!
//! Redirects and retries are not layers here: the dispatch engine drives
//! them itself so it can inspect each intermediate response.

mod default_headers;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
