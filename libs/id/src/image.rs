//! Image reference helpers.
//!
//! Registry references may carry a `host:port` prefix, so a naive split on
//! `:` would confuse the registry port with the tag. Both helpers only look
//! for the tag in the final path segment.

/// Strips the `:tag` suffix from an image reference, preserving any
/// registry `host:port` prefix.
///
/// Everything after the first `:` of the final path segment is dropped.
///
/// ```
/// assert_eq!(pharos_id::strip_tag("test_url:5000/test:1.0"), "test_url:5000/test");
/// assert_eq!(pharos_id::strip_tag("nginx"), "nginx");
/// ```
pub fn strip_tag(reference: &str) -> String {
    let (path, last) = match reference.rfind('/') {
        Some(idx) => reference.split_at(idx + 1),
        None => ("", reference),
    };
    let name = last.split(':').next().unwrap_or(last);
    format!("{path}{name}")
}

/// Splits an image reference into its repository and optional tag.
///
/// The tag separator is the last `:` that is not followed by a `/`.
///
/// ```
/// assert_eq!(
///     pharos_id::split_repo_tag("test_url:5000/test:2.0"),
///     ("test_url:5000/test", Some("2.0"))
/// );
/// assert_eq!(pharos_id::split_repo_tag("test_url:5000/test"), ("test_url:5000/test", None));
/// ```
pub fn split_repo_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => {
            (&reference[..idx], Some(&reference[idx + 1..]))
        }
        _ => (reference, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tag_with_registry_port() {
        assert_eq!(strip_tag("test_url:5000/test:1.0"), "test_url:5000/test");
        assert_eq!(strip_tag("test_url:5000/test"), "test_url:5000/test");
    }

    #[test]
    fn test_strip_tag_plain() {
        assert_eq!(strip_tag("nginx:latest"), "nginx");
        assert_eq!(strip_tag("library/nginx"), "library/nginx");
        assert_eq!(strip_tag("a/b/c:1"), "a/b/c");
    }

    #[test]
    fn test_split_repo_tag() {
        assert_eq!(split_repo_tag("repo/img:latest"), ("repo/img", Some("latest")));
        assert_eq!(split_repo_tag("host:5000/img"), ("host:5000/img", None));
        assert_eq!(
            split_repo_tag("host:5000/img:2.0"),
            ("host:5000/img", Some("2.0"))
        );
        assert_eq!(split_repo_tag("img"), ("img", None));
    }
}
