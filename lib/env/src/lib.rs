//! Directory conventions for Dispatch: where to find INI credential files,
//! and where to write rotating log files (§6). Resolves locations via the
//! XDG-aware `directories` crate plus an explicit override env var, rather
//! than a single fixed home directory.

use directories::ProjectDirs;
use std::{env, path::PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "dispatch", "dispatch")
}

/// Root directory for Dispatch's own state (currently: logs only, per the
/// "no persistent storage" non-goal).
#[inline]
pub fn dispatch_home() -> PathBuf {
    if let Ok(x) = env::var("DISPATCH_HOME") {
        PathBuf::from(x)
    } else {
        project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".dispatch"))
    }
}

/// `<root>/.logs`, holding the daily-rolling `dispatch.log` (§4.13).
#[inline]
pub fn dispatch_log_dir() -> PathBuf {
    if let Ok(x) = env::var("DISPATCH_LOG_DIR") {
        PathBuf::from(x)
    } else {
        dispatch_home().join(".logs")
    }
}

/// Tool data dir searched for replica credential INI files (§4.3, first of
/// three INI search locations).
#[inline]
pub fn tool_data_dir() -> PathBuf {
    if let Ok(x) = env::var("DISPATCH_TOOL_DATA_DIR") {
        PathBuf::from(x)
    } else {
        dispatch_home()
    }
}

/// `$HOME`, the second INI search location.
#[inline]
pub fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// The project root (current working directory), the third and last INI
/// search location.
#[inline]
pub fn project_root() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Candidate paths for the replica credentials INI file, in the order
/// `connect()` must try them (§4.3).
pub fn replica_ini_candidates(filename: &str) -> Vec<PathBuf> {
    let mut candidates = vec![tool_data_dir().join(filename)];
    if let Some(home) = home_dir() {
        candidates.push(home.join(filename));
    }
    candidates.push(project_root().join(filename));
    candidates
}
