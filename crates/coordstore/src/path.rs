use crate::error::{Error, Result};

pub const SEPARATOR: char = '/';

/// Join a parent path and a child name
#[must_use]
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Extracts the final component of a path
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit_once(SEPARATOR).map_or(path, |(_, name)| name)
}

/// Extracts the parent of a path; `None` for the root
#[must_use]
pub fn dirname(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once(SEPARATOR) {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// All proper ancestors of `path`, outermost first, excluding the root
#[must_use]
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = dirname(path);
    while let Some(p) = current {
        if p == "/" {
            break;
        }
        out.push(p);
        current = dirname(p);
    }
    out.reverse();
    out
}

/// Reject paths the store cannot address
pub fn validate(path: &str) -> Result<()> {
    if !path.starts_with(SEPARATOR) {
        return Err(Error::bad_arguments(format!("path must be absolute: {path}")));
    }
    if path.len() > 1 && path.ends_with(SEPARATOR) {
        return Err(Error::bad_arguments(format!("trailing slash: {path}")));
    }
    if path.len() > 1 && path[1..].split(SEPARATOR).any(str::is_empty) {
        return Err(Error::bad_arguments(format!("empty component: {path}")));
    }
    Ok(())
}
