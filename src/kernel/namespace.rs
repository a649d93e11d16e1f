/// Namespace entry flags for the nsexec helper
/// Translates a requested namespace set into `-t <pid> [-p] [-m] [-n]`
use crate::config::types::{ChannelError, ExecutionContext, NamespaceSet, Result};
use std::fmt;

/// Separator and shell the helper runs inside the target namespaces
pub const SHELL_INVOCATION: [&str; 3] = ["--", "/bin/sh", "-c"];

/// Ordered helper flags for entering a target's namespaces
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceFlags {
    target_pid: String,
    namespaces: NamespaceSet,
}

impl NamespaceFlags {
    /// Compose flags for `target_pid`.
    ///
    /// The pid must be present and numeric; anything else is rejected before
    /// a single file or process is touched.
    pub fn compose(target_pid: Option<&str>, namespaces: NamespaceSet) -> Result<Self> {
        let pid = target_pid
            .map(str::trim)
            .filter(|pid| !pid.is_empty())
            .ok_or_else(|| ChannelError::Namespace("target pid is required".to_string()))?;

        if !pid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ChannelError::Namespace(format!(
                "target pid must be numeric, got '{}'",
                pid
            )));
        }

        Ok(Self {
            target_pid: pid.to_string(),
            namespaces,
        })
    }

    pub fn from_context(context: &ExecutionContext) -> Result<Self> {
        Self::compose(context.target_pid.as_deref(), context.namespaces)
    }

    pub fn target_pid(&self) -> &str {
        &self.target_pid
    }

    pub fn namespaces(&self) -> NamespaceSet {
        self.namespaces
    }

    /// `-t <pid>` first, then `-p`, `-m`, `-n` in fixed order when requested
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.target_pid.clone()];

        if self.namespaces.pid {
            args.push("-p".to_string());
        }
        if self.namespaces.mount {
            args.push("-m".to_string());
        }
        if self.namespaces.network {
            args.push("-n".to_string());
        }

        args
    }

    /// Full helper argv prefix: flags, separator, then `/bin/sh -c`
    pub fn helper_args(&self) -> Vec<String> {
        let mut args = self.to_args();
        args.extend(SHELL_INVOCATION.iter().map(|s| s.to_string()));
        args
    }

    /// Names of the selected namespaces, for logging
    pub fn enabled_namespaces(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.namespaces.pid {
            names.push("PID");
        }
        if self.namespaces.mount {
            names.push("Mount");
        }
        if self.namespaces.network {
            names.push("Network");
        }
        names
    }
}

impl fmt::Display for NamespaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

/// Check if namespace handles are visible on this system
pub fn is_supported() -> bool {
    std::fs::read_dir("/proc/self/ns").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_order_is_fixed() {
        let flags = NamespaceFlags::compose(Some("1234"), NamespaceSet::new(false, true, true))
            .unwrap();
        assert_eq!(flags.to_args(), vec!["-t", "1234", "-m", "-n"]);

        let all = NamespaceFlags::compose(Some("1"), NamespaceSet::all()).unwrap();
        assert_eq!(all.to_string(), "-t 1 -p -m -n");
    }

    #[test]
    fn no_namespaces_yields_target_only() {
        let flags = NamespaceFlags::compose(Some("42"), NamespaceSet::default()).unwrap();
        assert_eq!(flags.to_args(), vec!["-t", "42"]);
        assert!(flags.enabled_namespaces().is_empty());
    }

    #[test]
    fn helper_args_end_with_shell() {
        let flags = NamespaceFlags::compose(Some("7"), NamespaceSet::new(true, false, false))
            .unwrap();
        assert_eq!(
            flags.helper_args(),
            vec!["-t", "7", "-p", "--", "/bin/sh", "-c"]
        );
    }

    #[test]
    fn missing_or_malformed_pid_is_rejected() {
        assert!(NamespaceFlags::compose(None, NamespaceSet::all()).is_err());
        assert!(NamespaceFlags::compose(Some("  "), NamespaceSet::all()).is_err());
        assert!(NamespaceFlags::compose(Some("12; rm -rf /"), NamespaceSet::all()).is_err());
    }
}
