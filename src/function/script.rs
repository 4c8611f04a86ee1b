//! Primary script file resolution.

use crate::error::{ValidationError, INVALID_SCRIPT_FILE_MESSAGE};
use std::path::{Component, Path, PathBuf};

/// Name of the per-function declaration file.
pub const FUNCTION_CONFIG_FILE_NAME: &str = "function.json";

/// Extensions that never hold a function's code.
const NON_SCRIPT_EXTENSIONS: &[&str] = &["txt", "md"];

/// Conventional entry-point file names, checked in order after `run.*`.
const CONVENTIONAL_ENTRY_POINTS: &[&str] = &["index.js", "index.mjs", "index.cjs", "__init__.py"];

/// Determine the primary script of a function directory.
///
/// With a `scriptFile` hint the hint is resolved relative to `directory` and
/// must name an existing file. Without one, the directory's script candidates
/// are inspected: a single candidate wins; otherwise a file with stem `run`,
/// then the conventional entry points. `Ok(None)` means nothing could be
/// determined, which callers treat as a configuration error.
pub fn determine_primary_script_file(
    script_file: Option<&str>,
    directory: &Path,
) -> Result<Option<PathBuf>, ValidationError> {
    let directory = absolute(directory)?;

    if let Some(hint) = script_file.filter(|s| !s.trim().is_empty()) {
        let candidate = normalize(&directory.join(hint));
        return match find_file(&candidate) {
            Some(found) => Ok(Some(found)),
            None => Err(ValidationError::FunctionConfiguration(
                INVALID_SCRIPT_FILE_MESSAGE.to_string(),
            )),
        };
    }

    let candidates = script_candidates(&directory)?;
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.into_iter().next()),
        _ => Ok(select_by_convention(&candidates)),
    }
}

fn select_by_convention(candidates: &[PathBuf]) -> Option<PathBuf> {
    let named = |wanted: &str| {
        candidates
            .iter()
            .find(|p| file_name(p).eq_ignore_ascii_case(wanted))
    };

    candidates
        .iter()
        .find(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.eq_ignore_ascii_case("run"))
        })
        .or_else(|| CONVENTIONAL_ENTRY_POINTS.iter().find_map(|name| named(name)))
        .cloned()
}

fn script_candidates(directory: &Path) -> Result<Vec<PathBuf>, ValidationError> {
    let entries = std::fs::read_dir(directory).map_err(|e| {
        ValidationError::FunctionConfiguration(format!(
            "Unable to read function directory '{}': {}",
            directory.display(),
            e
        ))
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| !file_name(path).eq_ignore_ascii_case(FUNCTION_CONFIG_FILE_NAME))
        .filter(|path| {
            !path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| NON_SCRIPT_EXTENSIONS.iter().any(|n| ext.eq_ignore_ascii_case(n)))
        })
        .collect();
    candidates.sort();
    Ok(candidates)
}

/// Find `path` on disk, matching the file name case-insensitively.
/// Returns the path with the on-disk spelling.
fn find_file(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    let wanted = path.file_name()?.to_str()?;

    let mut fallback = None;
    for entry in std::fs::read_dir(parent).ok()?.filter_map(|e| e.ok()) {
        let entry_path = entry.path();
        if !entry_path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == wanted {
            return Some(entry_path);
        }
        if fallback.is_none() && name.eq_ignore_ascii_case(wanted) {
            fallback = Some(entry_path);
        }
    }
    fallback
}

fn absolute(path: &Path) -> Result<PathBuf, ValidationError> {
    let absolute = std::path::absolute(path).map_err(|e| {
        ValidationError::FunctionConfiguration(format!(
            "Unable to resolve function directory '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(normalize(&absolute))
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
