//! Locates a transform tool binary on the host system.

use crate::error::PipeError;
use std::path::PathBuf;
use which::which;

/// Locates a transform tool executable.
///
/// Resolution order:
/// 1. `explicit_path` if provided and the file exists.
/// 2. The path in the `env_var` environment variable.
/// 3. Each of `names` resolved via `$PATH`, in order.
/// 4. Common install location fallbacks (platform-specific).
///
/// # Errors
///
/// Returns `PipeError::ExecutableNotFound` when no valid executable can be
/// located.
pub fn discover_tool(
    names: &[&str],
    env_var: &str,
    explicit_path: Option<PathBuf>,
) -> Result<PathBuf, PipeError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path);
        }
        return Err(PipeError::ExecutableNotFound(format!(
            "Explicit path does not exist: {}",
            path.display()
        )));
    }

    if let Ok(path_str) = std::env::var(env_var) {
        let path = PathBuf::from(path_str);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(env_var, path = %path.display(), "ignoring missing tool override");
    }

    for name in names {
        if let Ok(path) = which(name) {
            return Ok(path);
        }
    }

    for name in names {
        for location in fallback_locations(name) {
            if location.exists() {
                return Ok(location);
            }
        }
    }

    Err(PipeError::ExecutableNotFound(format!(
        "none of [{}] found. Searched: {env_var}, PATH, common install locations.",
        names.join(", ")
    )))
}

#[cfg(unix)]
fn fallback_locations(name: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".local/bin").join(name));
    }
    locations.push(PathBuf::from("/usr/local/bin").join(name));
    locations.push(PathBuf::from("/opt/homebrew/bin").join(name));
    locations.push(PathBuf::from("/usr/bin").join(name));
    locations
}

#[cfg(windows)]
fn fallback_locations(name: &str) -> Vec<PathBuf> {
    let exe = format!("{name}.exe");
    vec![
        PathBuf::from(r"C:\Program Files (x86)\GnuPG\bin").join(&exe),
        PathBuf::from(r"C:\Program Files\Git\usr\bin").join(&exe),
    ]
}
