//! Process discovery and host probing
//!
//! The channel reaches the host's process table only through the
//! [`ProcessInspector`] capability, injected at construction:
//! - [`procfs::ProcInspector`]: reads `/proc`, `PATH`, and `/etc/os-release`
//! - [`fake::FakeInspector`]: answers from a [`fake::FakeBehavior`] table, for tests

pub mod fake;
pub mod procfs;

use crate::config::types::{Response, ResponseCode, Result};

pub use fake::{FakeBehavior, FakeInspector};
pub use procfs::ProcInspector;

/// Process listing arguments for `ps` on most hosts
pub const DEFAULT_PS_ARGS: &str = "-eo user,pid,ppid,args";
/// Busybox `ps` (Alpine) has no `-e`
pub const ALPINE_PS_ARGS: &str = "-o user,pid,ppid,args";

/// Discovery and probing operations used around script execution
pub trait ProcessInspector: Send + Sync {
    /// Pids whose full command line contains `name`
    fn pids_by_process_cmd_name(&self, name: &str) -> Result<Vec<String>>;

    /// Pids whose process name equals `name`
    fn pids_by_process_name(&self, name: &str) -> Result<Vec<String>>;

    /// Arguments to pass `ps` for a user/pid/ppid/args listing
    fn ps_args(&self) -> String;

    fn is_alpine_platform(&self) -> bool;

    fn is_command_available(&self, name: &str) -> bool;

    fn process_exists(&self, pid: &str) -> Result<bool>;

    /// User name owning `pid`
    fn pid_user(&self, pid: &str) -> Result<String>;

    /// Pids owning a socket bound to local `port`
    fn pids_by_local_port(&self, port: &str) -> Result<Vec<String>>;

    /// `CommandNotFound` for the first unavailable command, `None` if all exist
    fn missing_commands(&self, names: &[&str]) -> Option<Response> {
        names
            .iter()
            .find(|name| !self.is_command_available(name))
            .map(|name| Response::fail_with_flags(ResponseCode::CommandNotFound, &[name]))
    }

    /// Union of [`Self::pids_by_local_port`] over `ports`, first-seen order
    fn pids_by_local_ports(&self, ports: &[String]) -> Result<Vec<String>> {
        let mut pids: Vec<String> = Vec::new();
        for port in ports {
            for pid in self.pids_by_local_port(port)? {
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
        Ok(pids)
    }
}
