//! Parsing error types
//!
//! These only surface while building parsers (bad selectors or patterns).
//! Per-page extraction never fails; it yields empty fields instead.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParsingError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

pub type ParsingResult<T> = Result<T, ParsingError>;

impl From<regex::Error> for ParsingError {
    fn from(err: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: String::new(),
            reason: err.to_string(),
        }
    }
}
