//! Weak ETags derived from cache identity.
//!
//! The tag is `W/"<key>:<version>"`. It is not a content hash: two reads with
//! the same key and version are treated as equivalent because the cache bumps
//! the version exactly when the value changes.
//!
//! # Examples
//!
//! ```
//! use matchday_cache::etag::{build_weak_etag, matches_if_none_match_value};
//!
//! let etag = build_weak_etag("season:42:club-stats", 7);
//! assert_eq!(etag, r#"W/"season:42:club-stats:7""#);
//!
//! // Clients that drop the weak prefix or the quotes still match
//! assert!(matches_if_none_match_value(r#""season:42:club-stats:7""#, &etag));
//! assert!(matches_if_none_match_value("season:42:club-stats:7", &etag));
//! assert!(!matches_if_none_match_value(r#"W/"season:42:club-stats:6""#, &etag));
//! ```

use http::HeaderMap;
use http::header::IF_NONE_MATCH;

/// Render the weak validator for `key` at `version`.
///
/// Double quotes are stripped from the key so the result stays a single
/// quoted entity tag.
pub fn build_weak_etag(key: &str, version: u64) -> String {
    format!("W/\"{}:{}\"", key.replace('"', ""), version)
}

/// Check the request's `If-None-Match` headers against `etag`.
///
/// Every `If-None-Match` line is considered. Returns `false` when the header
/// is absent or not valid UTF-8.
pub fn matches_if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| matches_if_none_match_value(value, etag))
}

/// Check a raw `If-None-Match` value against `etag`.
///
/// The value may be `*` or a comma-separated list of entity tags, each
/// possibly weak-prefixed and/or quoted. Commas inside quotes belong to the
/// tag.
pub fn matches_if_none_match_value(header: &str, etag: &str) -> bool {
    let server = normalized_forms(etag.trim());

    split_list(header)
        .into_iter()
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| {
            candidate == "*"
                || normalized_forms(candidate)
                    .iter()
                    .any(|form| server.contains(form))
        })
}

/// Split on commas outside quoted sections.
fn split_list(header: &str) -> Vec<&str> {
    let mut tags = Vec::new();
    let mut quoted = false;
    let mut start = 0;

    for (i, c) in header.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                tags.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tags.push(&header[start..]);
    tags
}

/// The tag as sent, without the weak prefix, without quotes, and without both.
fn normalized_forms(tag: &str) -> [&str; 4] {
    let strong = strip_weak(tag);
    [tag, strong, strip_quotes(tag), strip_quotes(strong)]
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/")
        .or_else(|| tag.strip_prefix("w/"))
        .unwrap_or(tag)
}

fn strip_quotes(tag: &str) -> &str {
    tag.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_build_weak_etag() {
        assert_eq!(build_weak_etag("user:1:subs", 3), "W/\"user:1:subs:3\"");
        assert_eq!(build_weak_etag("odd\"key", 1), "W/\"oddkey:1\"");
    }

    #[test]
    fn test_etag_changes_with_version() {
        assert_eq!(build_weak_etag("k", 4), build_weak_etag("k", 4));
        assert_ne!(build_weak_etag("k", 4), build_weak_etag("k", 5));
        assert_ne!(build_weak_etag("k", 4), build_weak_etag("j", 4));
    }

    #[test]
    fn test_exact_match() {
        let etag = build_weak_etag("k", 1);
        assert!(matches_if_none_match(&headers(&etag), &etag));
    }

    #[test]
    fn test_variants_match() {
        let etag = build_weak_etag("season:5:club-stats", 9);
        for variant in [
            r#"W/"season:5:club-stats:9""#,
            r#"w/"season:5:club-stats:9""#,
            r#""season:5:club-stats:9""#,
            "season:5:club-stats:9",
            "W/season:5:club-stats:9",
        ] {
            assert!(
                matches_if_none_match(&headers(variant), &etag),
                "{} should match",
                variant
            );
        }
    }

    #[test]
    fn test_strong_server_tag_matches_weak_candidate() {
        assert!(matches_if_none_match_value(r#"W/"abc""#, r#""abc""#));
        assert!(matches_if_none_match_value("abc", r#""abc""#));
    }

    #[test]
    fn test_wildcard() {
        assert!(matches_if_none_match(&headers("*"), "W/\"anything:1\""));
        assert!(matches_if_none_match_value(r#""x", *"#, "W/\"k:2\""));
    }

    #[test]
    fn test_list() {
        let etag = build_weak_etag("k", 2);
        assert!(matches_if_none_match_value(r#"W/"k:1", W/"k:2""#, &etag));
        assert!(!matches_if_none_match_value(r#"W/"k:1", W/"k:3""#, &etag));
    }

    #[test]
    fn test_comma_inside_quoted_tag() {
        let etag = build_weak_etag("league:a,b:table", 3);
        assert!(matches_if_none_match(&headers(&etag), &etag));
        assert!(matches_if_none_match_value(
            &format!(r#"W/"other:1", {}"#, etag),
            &etag
        ));
        assert!(!matches_if_none_match_value(r#"W/"league:a", "b:table:3""#, &etag));
    }

    #[test]
    fn test_multiple_header_lines() {
        let etag = build_weak_etag("k", 2);
        let mut map = headers(r#"W/"k:1""#);
        map.append(IF_NONE_MATCH, HeaderValue::from_static(r#"W/"k:2""#));
        assert!(matches_if_none_match(&map, &etag));
    }

    #[test]
    fn test_missing_or_empty_header() {
        let etag = build_weak_etag("k", 1);
        assert!(!matches_if_none_match(&HeaderMap::new(), &etag));
        assert!(!matches_if_none_match_value("", &etag));
        assert!(!matches_if_none_match_value(" , ", &etag));
    }
}
