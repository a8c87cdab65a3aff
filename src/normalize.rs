//! URL normalization, fingerprinting, and documentation-likeness classification.

use sha1::{Digest, Sha1};
use url::Url;

const REJECTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "css", "js", "xml", "pdf", "zip", "tar", "gz", "mp4",
];

const REJECTED_PATH_TOKENS: &[&str] = &[
    "/cdn-cgi/",
    "/__/",
    "/wp-admin/",
    "/wp-includes/",
    "/login",
    "/signup",
    "/register",
    "/account/",
];

const DOC_PATH_SEGMENTS: &[&str] = &[
    "/docs/",
    "/documentation/",
    "/guide/",
    "/reference/",
    "/manual/",
    "/learn/",
    "/tutorial/",
    "/api/",
    "/getting-started",
    "/quickstart",
    "/introduction",
    "/overview",
    "/start",
    "/examples",
    "/usage",
];

/// Resolve `raw` against `base`, strip query/fragment, lowercase host/path, and
/// drop a trailing slash (except root). Returns `None` on anything unparsable
/// or, when `allow_external` is false, anything that resolves off `base`'s origin.
pub fn normalize(
    raw: &str,
    base: &Url,
    allow_external: bool,
    keep_fragment: bool,
) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }

    let mut resolved = if let Some(rest) = trimmed.strip_prefix("//") {
        Url::parse(&format!("https://{rest}")).ok()?
    } else {
        base.join(trimmed).ok()?
    };

    if !keep_fragment {
        resolved.set_fragment(None);
    }
    resolved.set_query(None);

    if !allow_external && resolved.origin() != base.origin() {
        return None;
    }

    let path = resolved.path().to_ascii_lowercase();
    if path.len() > 1 && path.ends_with('/') {
        resolved.set_path(&path[..path.len() - 1]);
    } else {
        resolved.set_path(&path);
    }

    Some(resolved)
}

/// SHA-1 digest of the canonical URL, used as the dedup/fingerprint key.
/// The fragment is always stripped before hashing; the scheme is stripped
/// by default so `http://` and `https://` fingerprint identically.
pub fn fingerprint(canonical: &Url, include_scheme: bool) -> String {
    let mut for_hash = canonical.clone();
    for_hash.set_fragment(None);

    let input = if include_scheme {
        for_hash.to_string()
    } else {
        let s = for_hash.to_string();
        s.splitn(2, "://").nth(1).map(str::to_string).unwrap_or(s)
    };

    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `url` looks like a documentation page rather than an asset,
/// an admin/auth surface, or unrelated site furniture.
pub fn is_documentation_like(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();

    if let Some(ext) = path.rsplit('.').next() {
        if path.contains('.') && REJECTED_EXTENSIONS.contains(&ext) {
            return false;
        }
    }

    if REJECTED_PATH_TOKENS.iter().any(|tok| path.contains(tok)) {
        return false;
    }

    if path == "/" {
        return true;
    }

    if DOC_PATH_SEGMENTS.iter().any(|seg| path.contains(seg)) {
        return true;
    }

    is_clean_path(&path)
}

/// A "clean path" consists only of `/`-separated `[\w-]+` segments (no dots,
/// query-like punctuation, or other noise) — a conservative fallback accept.
fn is_clean_path(path: &str) -> bool {
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .all(|seg| seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

/// True iff `candidate` shares `seed_url`'s origin and its path begins with
/// the seed's directory (the seed path up to and including its last `/`).
pub fn within_path_prefix(candidate: &Url, seed_url: &Url) -> bool {
    if candidate.origin() != seed_url.origin() {
        return false;
    }

    let seed_path = seed_url.path();
    let prefix = match seed_path.rfind('/') {
        Some(idx) => &seed_path[..=idx],
        None => "/",
    };

    candidate.path().starts_with(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://docs.example.com/guide/intro").unwrap()
    }

    #[test]
    fn normalize_strips_fragment_and_query() {
        let n = normalize("/guide/usage?x=1#section", &base(), false, false).unwrap();
        assert_eq!(n.as_str(), "https://docs.example.com/guide/usage");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("/guide/usage/", &base(), false, false).unwrap();
        let twice = normalize(once.as_str(), &base(), false, false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_rejects_javascript_and_mailto() {
        assert!(normalize("javascript:void(0)", &base(), true, false).is_none());
        assert!(normalize("mailto:a@b.com", &base(), true, false).is_none());
    }

    #[test]
    fn normalize_drops_external_when_disallowed() {
        assert!(normalize("https://other.com/x", &base(), false, false).is_none());
        assert!(normalize("https://other.com/x", &base(), true, false).is_some());
    }

    #[test]
    fn normalize_lowercases_path() {
        let n = normalize("/Guide/Intro", &base(), false, false).unwrap();
        assert_eq!(n.path(), "/guide/intro");
    }

    #[test]
    fn fingerprint_ignores_path_case() {
        let lower = normalize("/guide/intro", &base(), false, false).unwrap();
        let mixed = normalize("/Guide/Intro", &base(), false, false).unwrap();
        assert_eq!(fingerprint(&lower, false), fingerprint(&mixed, false));
    }

    #[test]
    fn normalize_keeps_root_slash() {
        let n = normalize("https://docs.example.com/", &base(), true, false).unwrap();
        assert_eq!(n.path(), "/");
    }

    #[test]
    fn fingerprint_ignores_scheme_by_default() {
        let http = Url::parse("http://docs.example.com/guide").unwrap();
        let https = Url::parse("https://docs.example.com/guide").unwrap();
        assert_eq!(fingerprint(&http, false), fingerprint(&https, false));
    }

    #[test]
    fn fingerprint_ignores_fragment() {
        let a = Url::parse("https://docs.example.com/guide#a").unwrap();
        let b = Url::parse("https://docs.example.com/guide#b").unwrap();
        assert_eq!(fingerprint(&a, false), fingerprint(&b, false));
    }

    #[test]
    fn is_documentation_like_rejects_assets_and_admin() {
        let asset = Url::parse("https://docs.example.com/logo.png").unwrap();
        assert!(!is_documentation_like(&asset));
        let admin = Url::parse("https://docs.example.com/wp-admin/").unwrap();
        assert!(!is_documentation_like(&admin));
    }

    #[test]
    fn is_documentation_like_accepts_doc_segments_and_root() {
        let root = Url::parse("https://docs.example.com/").unwrap();
        assert!(is_documentation_like(&root));
        let guide = Url::parse("https://docs.example.com/guide/intro").unwrap();
        assert!(is_documentation_like(&guide));
    }

    #[test]
    fn within_path_prefix_scopes_to_seed_directory() {
        let seed = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let inside = Url::parse("https://docs.example.com/guide/usage").unwrap();
        let outside = Url::parse("https://docs.example.com/about").unwrap();
        assert!(within_path_prefix(&inside, &seed));
        assert!(!within_path_prefix(&outside, &seed));
    }

    #[test]
    fn within_path_prefix_rejects_other_origin() {
        let seed = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let other = Url::parse("https://other.com/guide/usage").unwrap();
        assert!(!within_path_prefix(&other, &seed));
    }
}
