//! Helpers for the absolute, forward-slash separated repository paths used
//! throughout the crate. Folder paths always end with a `/`.

/// Normalize a repository path: make it absolute, collapse duplicate
/// separators and resolve `.` and `..` components. Returns `None` for an
/// empty path or one that escapes the repository root.
pub fn normalize(path: &str) -> Option<String> {
    if path.trim().is_empty() {
        return None;
    }

    let trailing_slash = path.ends_with('/');
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop()?;
            }
            _ => components.push(component),
        }
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    normalized.push_str(&components.join("/"));
    if trailing_slash && !components.is_empty() {
        normalized.push('/');
    }
    Some(normalized)
}

/// Resolve `path` against `folder` unless it is already absolute.
pub fn join(folder: &str, path: &str) -> Option<String> {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", folder.trim_end_matches('/'), path))
    }
}

/// Split a normalized file path into its folder (with trailing slash) and
/// file name.
pub fn split_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// The folders containing `path`, nearest first, ending with the root
/// folder `/`.
pub fn ancestor_folders(path: &str) -> Vec<&str> {
    let (folder, _) = split_file(path);
    let mut folders = vec![folder];
    let mut current = folder;
    while current.len() > 1 {
        let without_slash = &current[..current.len() - 1];
        let idx = without_slash.rfind('/').unwrap_or(0);
        current = &current[..=idx];
        folders.push(current);
    }
    folders
}

/// The part of `path` below `folder`. `folder` must be one of the
/// path's ancestor folders.
pub fn relative_to<'a>(path: &'a str, folder: &str) -> &'a str {
    path.strip_prefix(folder).unwrap_or(path)
}

/// Normalize a folder path so that it's absolute and ends with a `/`.
pub fn normalize_folder(folder: &str) -> String {
    match normalize(folder) {
        Some(mut folder) => {
            if !folder.ends_with('/') {
                folder.push('/');
            }
            folder
        }
        None => "/".to_owned(),
    }
}
