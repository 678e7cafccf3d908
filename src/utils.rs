/// Whether a listing entry name is one of the synthetic current/parent
/// directory markers servers include in listings.
///
/// Recursing into these would loop forever, so every directory walk skips
/// them.
pub(crate) fn is_virtual_directory(name: &str) -> bool {
    matches!(name, "." | "..")
}

/// Normalize a logical remote path: forward slashes, a single leading `/`,
/// no trailing slash except for the root itself, `.` and `..` components
/// collapsed.
///
/// Path locks are keyed by the normalized form, so two spellings of the
/// same path always contend.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            component => components.push(component),
        }
    }

    format!("/{}", components.join("/"))
}

/// Resolve `name` against the directory at `parent`.
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    let parent = normalize_path(parent);
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// The parent directory of a normalized path, `None` for the root.
pub(crate) fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path);
    if normalized == "/" {
        return None;
    }

    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

/// The final component of a normalized path, empty for the root.
pub(crate) fn file_name(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(idx) => normalized[idx + 1..].to_string(),
        None => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/a//b/"), "/a/b");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn collapses_dot_components() {
        assert_eq!(normalize_path("/a/./b"), "/a/b");
        assert_eq!(normalize_path("/a/../b"), "/b");
        assert_eq!(normalize_path("/a/b/.."), "/a");
        assert_eq!(normalize_path("/.."), "/");
    }

    #[test]
    fn joins_against_root_and_nested_parents() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a/", "b"), "/a/b");
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent_path("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent_path("/a").as_deref(), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(file_name("/a/b"), "b");
    }

    #[test]
    fn virtual_directories() {
        assert!(is_virtual_directory("."));
        assert!(is_virtual_directory(".."));
        assert!(!is_virtual_directory(".hidden"));
    }
}
