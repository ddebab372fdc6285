//! Error types for version vector parsing

use std::num::ParseIntError;
use thiserror::Error;

/// Errors raised while decoding the `node:counter;node:counter` text form
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A pair did not contain the `:` separator
    #[error("Malformed version pair '{pair}': expected node:counter")]
    MissingSeparator { pair: String },

    /// A pair had an empty node identifier
    #[error("Malformed version pair '{pair}': node identifier is empty")]
    EmptyNode { pair: String },

    /// The counter was not an unsigned integer
    #[error("Invalid counter '{value}' for node '{node}': {source}")]
    InvalidCounter {
        node: String,
        value: String,
        #[source]
        source: ParseIntError,
    },
}
