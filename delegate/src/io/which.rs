//! Executable lookup on `PATH`, without running anything.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve `program` to an executable path.
///
/// A name containing a path separator is checked as-is (relative names are
/// resolved against `base`); a bare name is searched in `path_var`.
pub fn resolve_executable(program: &str, path_var: Option<&OsStr>, base: &Path) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let candidate = base.join(program);
        return is_executable(&candidate).then_some(candidate);
    }
    let paths = path_var?;
    std::env::split_paths(paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// Resolve `program` against the current process's `PATH`.
pub fn which(program: &str, base: &Path) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    resolve_executable(program, path_var.as_deref(), base)
}

/// Returns true when `path` points to a regular executable file.
pub fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}
