//! Rclone invocation configuration.
//!
//! Holds the binary path, optional config file, provider environment
//! variables and global flags shared by every operation of a client.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::binary;
use crate::error::RcloneError;

/// Configuration for an [`Rclone`](crate::Rclone) client.
///
/// Environment variables are overlaid on the inherited process environment
/// at spawn time; use `RCLONE_*` variables to configure remotes without a
/// config file.
#[derive(Debug, Clone)]
pub struct RcloneConfig {
    binary: PathBuf,
    config_path: Option<PathBuf>,
    env: BTreeMap<String, String>,
    global_flags: Vec<String>,
    default_timeout: Option<Duration>,
    strict: bool,
}

impl RcloneConfig {
    /// Create a configuration for a known binary path.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: None,
            env: BTreeMap::new(),
            global_flags: Vec::new(),
            default_timeout: None,
            strict: false,
        }
    }

    /// Create a configuration by locating rclone on `PATH`.
    pub fn discover() -> Result<Self, RcloneError> {
        Ok(Self::new(binary::find_rclone()?))
    }

    /// Set the rclone config file passed via `--config`.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable for spawned processes.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a global flag passed to every invocation (e.g. `--fast-list`).
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.global_flags.push(flag.into());
        self
    }

    /// Set the default timeout applied when a call does not supply one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Treat non-zero exits as errors by default.
    ///
    /// Individual calls can override this via
    /// [`ExecOptions::strict`](crate::ExecOptions).
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Validate the configuration.
    ///
    /// Checked when the client is constructed; environment keys must be
    /// non-empty and free of `=` and NUL, values free of NUL.
    pub fn validate(&self) -> Result<(), RcloneError> {
        if self.binary.as_os_str().is_empty() {
            return Err(RcloneError::Config("binary path is empty".to_string()));
        }
        for (key, value) in &self.env {
            if key.is_empty() {
                return Err(RcloneError::Config(
                    "environment variable name is empty".to_string(),
                ));
            }
            if key.contains('=') || key.contains('\0') {
                return Err(RcloneError::Config(format!(
                    "invalid environment variable name: {:?}",
                    key
                )));
            }
            if value.contains('\0') {
                return Err(RcloneError::Config(format!(
                    "environment variable {} contains NUL",
                    key
                )));
            }
        }
        for flag in &self.global_flags {
            if flag.is_empty() {
                return Err(RcloneError::Config("empty global flag".to_string()));
            }
        }
        Ok(())
    }

    /// Default rclone config file location for this platform.
    pub fn default_config_file() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("rclone").join("rclone.conf"))
    }

    /// Build the full argument vector for one invocation.
    pub(crate) fn command_args(&self, op_args: Vec<String>, extra: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref config) = self.config_path {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args.extend(self.global_flags.iter().cloned());
        args.extend(op_args);
        args.extend(extra.iter().cloned());
        args
    }

    pub(crate) fn binary(&self) -> &Path {
        &self.binary
    }

    pub(crate) fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub(crate) fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub(crate) fn strict(&self) -> bool {
        self.strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let config = RcloneConfig::new("/usr/bin/rclone")
            .with_env("RCLONE_S3_PROVIDER", "AWS")
            .with_flag("--fast-list");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_binary() {
        let config = RcloneConfig::new("");
        assert!(matches!(config.validate(), Err(RcloneError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_env_key() {
        let config = RcloneConfig::new("rclone").with_env("FOO=BAR", "x");
        assert!(matches!(config.validate(), Err(RcloneError::Config(_))));

        let config = RcloneConfig::new("rclone").with_env("", "x");
        assert!(matches!(config.validate(), Err(RcloneError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_nul_in_value() {
        let config = RcloneConfig::new("rclone").with_env("RCLONE_TOKEN", "a\0b");
        assert!(matches!(config.validate(), Err(RcloneError::Config(_))));
    }

    #[test]
    fn test_command_args_prepends_config_and_flags() {
        let config = RcloneConfig::new("rclone")
            .with_config_file("/tmp/rclone.conf")
            .with_flag("--fast-list");

        let args = config.command_args(
            vec!["copy".to_string(), "a".to_string(), "b".to_string()],
            &["--dry-run".to_string()],
        );

        assert_eq!(args[0], "--config");
        assert_eq!(args[1], "/tmp/rclone.conf");
        assert_eq!(args[2], "--fast-list");
        assert_eq!(args[3], "copy");
        assert_eq!(args.last().map(String::as_str), Some("--dry-run"));
    }

    #[test]
    fn test_default_config_file_shape() {
        if let Some(path) = RcloneConfig::default_config_file() {
            assert!(path.ends_with("rclone/rclone.conf"));
        }
    }
}
