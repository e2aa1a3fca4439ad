//! Content URL helpers
//!
//! Content URLs are opaque strings of the form `protocol://path`. The reserved
//! [`WILDCARD_PROTOCOL`] may stand in for any store's real protocol; a store
//! resolving such a URL reports its own protocol in the returned URL.

use crate::{Result, StoreError};

/// Protocol token any store may substitute with its own protocol
pub const WILDCARD_PROTOCOL: &str = "dummy-wildcard-store-protocol";

/// Separator between protocol and path
pub const PROTOCOL_DELIMITER: &str = "://";

/// Split a content URL into protocol and path
pub fn split(content_url: &str) -> Result<(&str, &str)> {
    match content_url.split_once(PROTOCOL_DELIMITER) {
        Some((protocol, path)) if !protocol.is_empty() && !path.is_empty() => Ok((protocol, path)),
        _ => Err(StoreError::InvalidContentUrl(content_url.to_string())),
    }
}

/// Build a content URL from its parts
pub fn make(protocol: &str, path: &str) -> String {
    format!("{}{}{}", protocol, PROTOCOL_DELIMITER, path)
}

/// Whether the URL uses the wildcard protocol
pub fn is_wildcard(content_url: &str) -> bool {
    matches!(split(content_url), Ok((WILDCARD_PROTOCOL, _)))
}

/// Replace the protocol of a content URL
pub fn with_protocol(content_url: &str, protocol: &str) -> Result<String> {
    let (_, path) = split(content_url)?;
    Ok(make(protocol, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_split() {
        assert_eq!(split("store://2024/1/2/a.bin").unwrap(), ("store", "2024/1/2/a.bin"));
        assert_eq!(split("s3://bucket://key").unwrap(), ("s3", "bucket://key"));
    }

    #[rstest]
    #[case::no_delimiter("no-protocol")]
    #[case::empty_protocol("://path")]
    #[case::empty_path("store://")]
    #[case::empty("")]
    fn test_split_rejects(#[case] url: &str) {
        assert!(matches!(split(url), Err(StoreError::InvalidContentUrl(_))));
    }

    #[test]
    fn test_wildcard() {
        let url = make(WILDCARD_PROTOCOL, "a/b.bin");
        assert!(is_wildcard(&url));
        assert!(!is_wildcard("store://a/b.bin"));
        assert_eq!(with_protocol(&url, "store").unwrap(), "store://a/b.bin");
    }

    proptest! {
        #[test]
        fn prop_make_then_split(protocol in "[a-z][a-z0-9+.-]{0,10}", path in "[a-zA-Z0-9/._-]{1,40}") {
            let url = make(&protocol, &path);
            prop_assert_eq!(split(&url).unwrap(), (protocol.as_str(), path.as_str()));
        }
    }
}
