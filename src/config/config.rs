use crate::config::types::{ChannelError, Result};
use crate::exec::recording::RecordingSyntax;
/// Channel configuration: defaults plus optional JSON config file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name the helper binaries live under
pub const BIN_DIR_NAME: &str = "bin";
/// Namespace-entry helper binary name
pub const NSEXEC_BIN: &str = "nsexec";

/// Runtime configuration for a [`crate::channel::NamespaceChannel`].
///
/// Every field has a default, so a config file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Directory holding the helper binary; derived from the running executable when unset
    pub bin_dir: Option<PathBuf>,
    /// Helper binary file name inside `bin_dir`
    pub helper_name: String,
    /// Deadline for each helper subprocess
    pub timeout_secs: u64,
    /// Where transcript `<id>.time` / `<id>.out` files are written
    pub transcript_dir: PathBuf,
    /// Terminal recording utility
    pub recorder: String,
    /// Recording syntax override; detected from the host when unset
    pub recording_syntax: Option<RecordingSyntax>,
    /// Delay between SIGTERM and SIGKILL when a deadline expires
    pub kill_grace_ms: u64,
    /// Upper bound on collected combined output
    pub output_limit_bytes: usize,
    /// How long to keep draining output after the subprocess exits
    pub collection_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bin_dir: None,
            helper_name: NSEXEC_BIN.to_string(),
            timeout_secs: 60,
            transcript_dir: PathBuf::from("/tmp"),
            recorder: "script".to_string(),
            recording_syntax: None,
            kill_grace_ms: 200,
            output_limit_bytes: 10 * 1024 * 1024, // 10 MB
            collection_timeout_ms: 5000,
        }
    }
}

impl ChannelConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChannelError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ChannelConfig = serde_json::from_str(&content)
            .map_err(|e| ChannelError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every invocation fail
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ChannelError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(ChannelError::Config(
                "output_limit_bytes must be greater than zero".to_string(),
            ));
        }
        if self.helper_name.is_empty() || self.helper_name.contains('/') {
            return Err(ChannelError::Config(format!(
                "helper_name must be a bare file name, got '{}'",
                self.helper_name
            )));
        }
        if self.recorder.trim().is_empty() {
            return Err(ChannelError::Config("recorder must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn collection_timeout(&self) -> Duration {
        Duration::from_millis(self.collection_timeout_ms)
    }

    /// Resolved helper directory
    pub fn resolved_bin_dir(&self) -> PathBuf {
        self.bin_dir.clone().unwrap_or_else(default_bin_dir)
    }

    /// Full path of the namespace-entry helper
    pub fn helper_path(&self) -> PathBuf {
        self.resolved_bin_dir().join(&self.helper_name)
    }
}

/// Directory of the running executable, descending into `bin/` unless already there
pub fn default_bin_dir() -> PathBuf {
    let program_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    bin_dir_for(&program_dir)
}

fn bin_dir_for(program_dir: &Path) -> PathBuf {
    if program_dir.file_name().and_then(|name| name.to_str()) == Some(BIN_DIR_NAME) {
        program_dir.to_path_buf()
    } else {
        program_dir.join(BIN_DIR_NAME)
    }
}
