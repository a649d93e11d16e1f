use super::{ProcessInspector, ALPINE_PS_ARGS, DEFAULT_PS_ARGS};
/// `/proc`-backed process inspector
use crate::config::types::{ChannelError, Result};
use log::debug;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{Pid, Uid, User};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SOCKET_TABLES: [&str; 4] = ["tcp", "tcp6", "udp", "udp6"];

/// Reads the live process table
#[derive(Clone, Debug)]
pub struct ProcInspector {
    proc_root: PathBuf,
    os_release: PathBuf,
}

impl Default for ProcInspector {
    fn default() -> Self {
        Self::new("/proc", "/etc/os-release")
    }
}

impl ProcInspector {
    /// Inspector rooted at alternative `/proc` and `os-release` locations
    pub fn new(proc_root: impl Into<PathBuf>, os_release: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            os_release: os_release.into(),
        }
    }

    fn pids(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.proc_root).map_err(|e| {
            ChannelError::Inspect(format!(
                "Failed to list {}: {}",
                self.proc_root.display(),
                e
            ))
        })?;

        let mut pids: Vec<u32> = entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn cmdline(&self, pid: u32) -> Option<String> {
        let raw = fs::read(self.proc_root.join(pid.to_string()).join("cmdline")).ok()?;
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        Some(args.join(" "))
    }

    fn comm(&self, pid: u32) -> Option<String> {
        fs::read_to_string(self.proc_root.join(pid.to_string()).join("comm"))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    fn matching_pids<F>(&self, mut predicate: F) -> Result<Vec<String>>
    where
        F: FnMut(u32) -> bool,
    {
        let own = std::process::id();
        Ok(self
            .pids()?
            .into_iter()
            .filter(|&pid| pid != own && predicate(pid))
            .map(|pid| pid.to_string())
            .collect())
    }

    fn socket_inodes(&self, port: u16) -> HashSet<u64> {
        let mut inodes = HashSet::new();
        for table in SOCKET_TABLES {
            let path = self.proc_root.join("net").join(table);
            match fs::read_to_string(&path) {
                Ok(content) => inodes.extend(parse_socket_table(&content, port)),
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
        inodes
    }

    fn owns_socket(&self, pid: u32, inodes: &HashSet<u64>) -> bool {
        let Ok(fds) = fs::read_dir(self.proc_root.join(pid.to_string()).join("fd")) else {
            return false;
        };
        fds.flatten().any(|fd| {
            fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target))
                .is_some_and(|inode| inodes.contains(&inode))
        })
    }
}

/// Inodes of sockets bound to local `port` in a `/proc/net/{tcp,udp}[6]` table
pub fn parse_socket_table(content: &str, port: u16) -> Vec<u64> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode: u64 = fields.get(9)?.parse().ok()?;
            (local_port == port && inode != 0).then_some(inode)
        })
        .collect()
}

/// Inode from an fd link target such as `socket:[12345]`
fn socket_inode(target: &Path) -> Option<u64> {
    target
        .to_str()?
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Real uid from a `/proc/<pid>/status` body
pub fn parse_status_uid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

fn parse_pid(pid: &str) -> Result<i32> {
    pid.trim()
        .parse()
        .map_err(|_| ChannelError::Inspect(format!("invalid pid '{}'", pid)))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

impl ProcessInspector for ProcInspector {
    fn pids_by_process_cmd_name(&self, name: &str) -> Result<Vec<String>> {
        self.matching_pids(|pid| {
            self.cmdline(pid)
                .is_some_and(|cmdline| cmdline.contains(name))
        })
    }

    fn pids_by_process_name(&self, name: &str) -> Result<Vec<String>> {
        self.matching_pids(|pid| self.comm(pid).as_deref() == Some(name))
    }

    fn ps_args(&self) -> String {
        if self.is_alpine_platform() {
            ALPINE_PS_ARGS.to_string()
        } else {
            DEFAULT_PS_ARGS.to_string()
        }
    }

    fn is_alpine_platform(&self) -> bool {
        fs::read_to_string(&self.os_release)
            .map(|content| {
                content
                    .lines()
                    .any(|line| line.trim() == "ID=alpine" || line.trim() == "ID=\"alpine\"")
            })
            .unwrap_or(false)
    }

    fn is_command_available(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if name.contains('/') {
            return is_executable(Path::new(name));
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
            .unwrap_or(false)
    }

    fn process_exists(&self, pid: &str) -> Result<bool> {
        let pid = parse_pid(pid)?;
        if pid <= 0 {
            return Err(ChannelError::Inspect(format!(
                "pid {} does not name a single process",
                pid
            )));
        }
        match kill(Pid::from_raw(pid), None) {
            Ok(()) | Err(Errno::EPERM) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(ChannelError::Inspect(format!("check pid {}: {}", pid, e))),
        }
    }

    fn pid_user(&self, pid: &str) -> Result<String> {
        let pid = parse_pid(pid)?;
        let status_path = self.proc_root.join(pid.to_string()).join("status");
        let status = fs::read_to_string(&status_path).map_err(|e| {
            ChannelError::Inspect(format!("read {}: {}", status_path.display(), e))
        })?;
        let uid = parse_status_uid(&status).ok_or_else(|| {
            ChannelError::Inspect(format!("no Uid line in {}", status_path.display()))
        })?;

        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.name),
            Ok(None) => Ok(uid.to_string()),
            Err(e) => {
                debug!("User lookup for uid {} failed: {}", uid, e);
                Ok(uid.to_string())
            }
        }
    }

    fn pids_by_local_port(&self, port: &str) -> Result<Vec<String>> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ChannelError::Inspect(format!("invalid port '{}'", port)))?;

        let inodes = self.socket_inodes(port);
        if inodes.is_empty() {
            return Ok(Vec::new());
        }
        self.matching_pids(|pid| self.owns_socket(pid, &inodes))
    }
}
