use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components, fold `..` into the
/// preceding normal component and strip trailing separators.
///
/// Does not touch the filesystem, so symlinks are not followed. A `..` that
/// would climb above the root of an absolute path is dropped.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }

    if out.is_empty() {
        return PathBuf::from(".");
    }

    out.iter().collect()
}

/// Render a path with forward slashes regardless of platform.
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
