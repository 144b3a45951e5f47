//! Application directories.
//!
//! Resolved with the [`dirs`] crate so each platform gets its usual
//! location (`~/.local/share/rollcall` and `~/.config/rollcall` on Linux).
//!
//! # Environment Overrides
//!
//! - `ROLLCALL_DATA_DIR` overrides [`data_dir`]
//! - `ROLLCALL_CONFIG_DIR` overrides [`config_dir`]

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "rollcall";

/// Root for the SQLite database.
///
/// Resolves to `dirs::data_dir()/rollcall/` unless `ROLLCALL_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var_os("ROLLCALL_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/rollcall-data",
    )
}

/// Holds `config.toml`.
///
/// Resolves to `dirs::config_dir()/rollcall/` unless `ROLLCALL_CONFIG_DIR` is set.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(
        std::env::var_os("ROLLCALL_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/rollcall-config",
    )
}

fn resolve(override_dir: Option<OsString>, base: Option<PathBuf>, fallback: &str) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    base.map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn override_wins_over_platform_dir() {
        let path = resolve(
            Some(OsString::from("/srv/rollcall")),
            Some(PathBuf::from("/home/u/.local/share")),
            "/tmp/x",
        );
        assert_eq!(path, PathBuf::from("/srv/rollcall"));
    }

    #[test]
    fn empty_override_is_ignored() {
        let path = resolve(
            Some(OsString::new()),
            Some(PathBuf::from("/home/u/.config")),
            "/tmp/x",
        );
        assert_eq!(path, PathBuf::from("/home/u/.config/rollcall"));
    }

    #[test]
    fn fallback_when_no_platform_dir() {
        assert_eq!(resolve(None, None, "/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn platform_dirs_are_app_scoped() {
        if std::env::var_os("ROLLCALL_DATA_DIR").is_none() {
            assert!(data_dir().ends_with(APP_DIR) || data_dir().starts_with("/tmp"));
        }
        if std::env::var_os("ROLLCALL_CONFIG_DIR").is_none() {
            assert!(config_dir().ends_with(APP_DIR) || config_dir().starts_with("/tmp"));
        }
    }
}
