//! Route path joining.

/// Join URL path segments into a single absolute path.
///
/// Every segment is split on `/` and empty pieces are dropped, so leading,
/// trailing and doubled slashes on the inputs never leak into the result.
/// Joining nothing (or only empty segments) yields `/`.
pub fn join_url<S: AsRef<str>>(segments: &[S]) -> String {
    let joined = segments
        .iter()
        .flat_map(|segment| segment.as_ref().split('/'))
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    format!("/{joined}")
}

/// Prefix `path` with `prefix`, treating an empty or root prefix as a no-op.
pub fn with_prefix(prefix: &str, path: &str) -> String {
    join_url(&[prefix, path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_no_elements() {
        let empty: [&str; 0] = [];
        assert_eq!(join_url(&empty), "/");
        assert_eq!(join_url(&["", "/"]), "/");
    }

    #[test]
    fn test_join_empty_prefix() {
        assert_eq!(with_prefix("", "token"), "/token");
        assert_eq!(with_prefix("/", "token"), "/token");
    }

    #[test]
    fn test_join_mixed_slashes() {
        assert_eq!(with_prefix("/api/", "/token"), "/api/token");
        assert_eq!(with_prefix("/api", "token/"), "/api/token");
        assert_eq!(join_url(&["/foo", "bar"]), "/foo/bar");
        assert_eq!(join_url(&["/foo/", "bar"]), "/foo/bar");
        assert_eq!(join_url(&["foo//", "//bar/"]), "/foo/bar");
    }

    #[test]
    fn test_join_keeps_parameters() {
        assert_eq!(
            join_url(&["auth", "{tenantId}", ".well-known", "openid-configuration"]),
            "/auth/{tenantId}/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_join_is_idempotent() {
        let once = with_prefix("/api/", "/v1/users/");
        assert_eq!(with_prefix("", &once), once);
    }
}
