//! Remote URL normalization.

/// Normalize a git remote URL to lowercase `host/owner/name`.
///
/// Accepts `git@host:owner/name(.git)`, `https://[user@]host/owner/name(.git)`
/// and `ssh://git@host[:port]/owner/name`. Returns `None` for anything that
/// does not carry a host and a path (local paths, `file://` remotes).
pub fn normalize_remote(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (host, path) = if raw.contains("://") {
        let parsed = url::Url::parse(raw).ok()?;
        if parsed.scheme() == "file" {
            return None;
        }
        (parsed.host_str()?.to_string(), parsed.path().to_string())
    } else {
        // scp-like syntax: [user@]host:path
        let (authority, path) = raw.split_once(':')?;
        if authority.contains('/') {
            return None;
        }
        let host = authority.rsplit('@').next()?;
        (host.to_string(), path.to_string())
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path).trim_end_matches('/');
    if host.is_empty() || path.is_empty() {
        return None;
    }

    Some(format!("{}/{}", host, path).to_lowercase())
}

/// Normalize an expected identity written by hand in a plan
pub fn normalize_identity(expected: &str) -> String {
    normalize_remote(expected).unwrap_or_else(|| {
        let trimmed = expected.trim().trim_matches('/');
        trimmed
            .strip_suffix(".git")
            .unwrap_or(trimmed)
            .to_lowercase()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_forms_normalize_identically() {
        let expected = Some("github.com/apolloconfig/apollo".to_string());
        assert_eq!(normalize_remote("git@github.com:apolloconfig/apollo.git"), expected);
        assert_eq!(normalize_remote("https://github.com/apolloconfig/apollo"), expected);
        assert_eq!(normalize_remote("https://github.com/ApolloConfig/Apollo.git/"), expected);
        assert_eq!(normalize_remote("https://token@github.com/apolloconfig/apollo.git"), expected);
        assert_eq!(normalize_remote("ssh://git@github.com/apolloconfig/apollo"), expected);
        assert_eq!(normalize_remote("ssh://git@github.com:22/apolloconfig/apollo.git"), expected);
    }

    #[test]
    fn test_local_paths_are_not_identities() {
        assert_eq!(normalize_remote("/srv/git/apollo.git"), None);
        assert_eq!(normalize_remote("file:///srv/git/apollo.git"), None);
        assert_eq!(normalize_remote(""), None);
    }

    #[test]
    fn test_identity_accepts_bare_form() {
        assert_eq!(
            normalize_identity("GitHub.com/apolloconfig/apollo"),
            "github.com/apolloconfig/apollo"
        );
        assert_eq!(
            normalize_identity("git@github.com:apolloconfig/apollo.git"),
            "github.com/apolloconfig/apollo"
        );
    }
}
