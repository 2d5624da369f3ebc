//! Lexical helpers for the slash-separated pathnames used by storage.
//!
//! Pathnames are always absolute, never carry a trailing slash (except the
//! root itself) and never contain `.` or `..` segments once normalized.

/// Lexically cleans a pathname: forces a leading slash, drops empty and `.`
/// segments and resolves `..` against the preceding segment.
pub fn normalize_pathname(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut out = String::with_capacity(raw.len() + 1);
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Returns the parent directory of a normalized pathname, `/` for top-level
/// entries and for the root.
pub fn parent_pathname(pathname: &str) -> &str {
    match pathname.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &pathname[..idx],
    }
}

/// Last segment of a normalized pathname (empty for the root).
pub fn base_name(pathname: &str) -> &str {
    match pathname.rfind('/') {
        Some(idx) => &pathname[idx + 1..],
        None => pathname,
    }
}

/// Joins a child name onto a directory pathname.
pub fn join_pathname(dir: &str, name: &str) -> String {
    if dir == "/" || dir.is_empty() {
        format!("/{}", name.trim_start_matches('/'))
    } else {
        format!(
            "{}/{}",
            dir.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

/// True when `path` is `prefix` itself or lives underneath it.
///
/// Matching is segment-aware: `/site` is a prefix of `/site/a` but not of
/// `/sitemap`.
pub fn has_path_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Rewrites the leading `old` prefix of `path` into `new`, once.
///
/// Returns `None` when `path` is not under `old`.
pub fn replace_path_prefix(path: &str, old: &str, new: &str) -> Option<String> {
    if !has_path_prefix(path, old) {
        return None;
    }
    let old = old.trim_end_matches('/');
    let rest = &path[old.len()..];
    let new = new.trim_end_matches('/');
    if rest.is_empty() {
        Some(if new.is_empty() { "/".to_string() } else { new.to_string() })
    } else {
        Some(format!("{new}{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cleans_segments() {
        assert_eq!(normalize_pathname(""), "/");
        assert_eq!(normalize_pathname("photos//2024/./a.jpg"), "/photos/2024/a.jpg");
        assert_eq!(normalize_pathname("/photos/../docs/"), "/docs");
        assert_eq!(normalize_pathname("/../../"), "/");
    }

    #[test]
    fn parent_and_base() {
        assert_eq!(parent_pathname("/a/b.jpg"), "/a");
        assert_eq!(parent_pathname("/b.jpg"), "/");
        assert_eq!(parent_pathname("/"), "/");
        assert_eq!(base_name("/a/b.jpg"), "b.jpg");
        assert_eq!(base_name("/"), "");
        assert_eq!(join_pathname("/", "x"), "/x");
        assert_eq!(join_pathname("/a/", "x"), "/a/x");
    }

    #[test]
    fn prefix_is_segment_aware() {
        assert!(has_path_prefix("/site", "/site"));
        assert!(has_path_prefix("/site/index.html", "/site"));
        assert!(!has_path_prefix("/sitemap.xml", "/site"));
        assert!(has_path_prefix("/anything", "/"));
    }

    #[test]
    fn prefix_replacement_happens_once() {
        assert_eq!(
            replace_path_prefix("/site/site/a", "/site", "/www").as_deref(),
            Some("/www/site/a")
        );
        assert_eq!(replace_path_prefix("/site", "/site", "/www").as_deref(), Some("/www"));
        assert_eq!(replace_path_prefix("/other", "/site", "/www"), None);
    }
}
