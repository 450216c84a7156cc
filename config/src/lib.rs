//! Environment and config-file loading for the petition orchestrator.
//!
//! Precedence, low to high: XDG `config.toml` `[env]` table, `.env` in the
//! working directory (or an override directory), process environment already
//! set before `load_and_apply` runs. Existing env vars are never overwritten.

mod dotenv;
mod settings;
mod xdg_toml;

use std::path::Path;

use thiserror::Error;

pub use settings::{
    CacheConfig, DispatchConfig, EngineConfig, MemoryConfig, ObservabilityConfig, ProviderConfig,
    RoutingConfig, Settings, StateBackend,
};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads `[env]` from the XDG config file for `app_name`, then `.env` (from
/// `override_dir` or the current directory), and applies both to the process
/// environment without overwriting variables already set.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    for (k, v) in xdg_map {
        apply_if_unset(&k, &v);
    }

    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    for (k, v) in dotenv_map {
        apply_if_unset(&k, &v);
    }

    Ok(())
}

fn apply_if_unset(key: &str, value: &str) {
    if std::env::var_os(key).is_none() {
        std::env::set_var(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_and_apply_missing_sources_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_and_apply("config-crate-test-app-xyz", Some(dir.path()));
        assert!(result.is_ok());
    }

    #[test]
    fn apply_if_unset_does_not_overwrite_existing_env() {
        std::env::set_var("CONFIG_CRATE_TEST_PRESERVE", "original");
        apply_if_unset("CONFIG_CRATE_TEST_PRESERVE", "overwritten");
        assert_eq!(
            std::env::var("CONFIG_CRATE_TEST_PRESERVE").unwrap(),
            "original"
        );
        std::env::remove_var("CONFIG_CRATE_TEST_PRESERVE");
    }

    #[test]
    fn dotenv_applies_when_no_env_and_no_xdg() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "CONFIG_CRATE_TEST_FROM_DOTENV=hi\n").unwrap();
        std::env::remove_var("CONFIG_CRATE_TEST_FROM_DOTENV");
        load_and_apply("config-crate-test-app-xyz", Some(dir.path())).unwrap();
        assert_eq!(
            std::env::var("CONFIG_CRATE_TEST_FROM_DOTENV").unwrap(),
            "hi"
        );
        std::env::remove_var("CONFIG_CRATE_TEST_FROM_DOTENV");
    }
}
