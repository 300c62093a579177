//! Utility functions shared by the fetcher, the normalizer and the CLI.
//!
//! - **URL validation**: scheme checks for fetching, SSRF checks for feeds
//!   users register
//! - **Text cleaning**: control-sequence stripping and truncation

mod text;
mod url_validator;

pub use text::{strip_control_chars, truncate_chars};
pub use url_validator::{parse_feed_url, validate_url, UrlValidationError};
