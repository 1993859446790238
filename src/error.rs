//! The crate's error type.
//!
use std::fmt::{self, Display};

/// The library-identifying tag prepended to every rendered error, so a
/// caller juggling several in-process collaborators can tell at a glance
/// that an error came from here.
///
const TAG: &str = "schemata";

/// This crate's error type.
///
/// Every fallible operation returns `Result<T, Error>`. All errors are
/// reported immediately at the call that triggered them; there are no
/// retries, since the engine is synchronous and deterministic.
///
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Schema setup went wrong: a duplicate collection name, an unknown
    /// target template in a relationship, an ambiguous or missing
    /// auto-detected inverse, or a builder missing a required part.
    ///
    Configuration(String),

    /// A query could not be answered as asked: an unknown relationship
    /// name in a serializer `with`, or a malformed predicate.
    ///
    Query(String),

    /// An identity manager was asked to do something it cannot: insert a
    /// record whose id already exists, or accept an id of the wrong
    /// shape.
    ///
    Identity(String),

    /// The factory engine failed: a circular dependency among
    /// function-valued attributes, or an association naming an unknown
    /// template.
    ///
    Factory(String),

    /// A runtime integrity rule was violated: linking to a not-yet-saved
    /// target, or linking across mismatched templates.
    ///
    Integrity(String),

    /// Anything else.
    ///
    Other(String),
}

impl Error {
    /// Create an [`Error::Configuration`](#variant.Configuration).
    ///
    pub fn configuration<T: Display>(text: T) -> Self {
        Self::Configuration(text.to_string())
    }

    /// Create an [`Error::Query`](#variant.Query).
    ///
    pub fn query<T: Display>(text: T) -> Self {
        Self::Query(text.to_string())
    }

    /// Create an [`Error::Identity`](#variant.Identity).
    ///
    pub fn identity<T: Display>(text: T) -> Self {
        Self::Identity(text.to_string())
    }

    /// Create an [`Error::Factory`](#variant.Factory).
    ///
    pub fn factory<T: Display>(text: T) -> Self {
        Self::Factory(text.to_string())
    }

    /// Create an [`Error::Integrity`](#variant.Integrity).
    ///
    pub fn integrity<T: Display>(text: T) -> Self {
        Self::Integrity(text.to_string())
    }

    /// Create an [`Error::Other`](#variant.Other).
    ///
    pub fn other<T: Display>(text: T) -> Self {
        Self::Other(text.to_string())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Query(_) => "query",
            Self::Identity(_) => "identity",
            Self::Factory(_) => "factory",
            Self::Integrity(_) => "integrity",
            Self::Other(_) => "other",
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Configuration(t)
            | Self::Query(t)
            | Self::Identity(t)
            | Self::Factory(t)
            | Self::Integrity(t)
            | Self::Other(t) => t,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} error: {}", TAG, self.kind(), self.text())
    }
}

impl std::error::Error for Error {}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::other(err)
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_tag_and_kind() {
        let e = Error::integrity("target must be saved");
        let s = e.to_string();
        assert!(s.starts_with("schemata: integrity error:"));
        assert!(s.contains("target must be saved"));
    }

    #[test]
    fn from_str_is_other() {
        assert_eq!(Error::from("boom"), Error::Other("boom".to_string()));
    }
}
