use super::{ProcessInspector, DEFAULT_PS_ARGS};
/// Table-driven inspector for unit tests
use crate::config::types::Result;
use std::collections::HashMap;

/// Answers a [`FakeInspector`] gives. Defaults describe an empty host.
#[derive(Clone, Debug)]
pub struct FakeBehavior {
    /// Returned by `pids_by_process_cmd_name`, keyed by name; missing names yield `[]`
    pub cmd_name_pids: HashMap<String, Vec<String>>,
    /// Returned by `pids_by_process_name`, keyed by name
    pub process_name_pids: HashMap<String, Vec<String>>,
    pub ps_args: String,
    pub alpine: bool,
    pub available_commands: Vec<String>,
    pub existing_pids: Vec<String>,
    pub pid_user: String,
    /// Returned by `pids_by_local_port`, keyed by port
    pub port_pids: HashMap<String, Vec<String>>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            cmd_name_pids: HashMap::new(),
            process_name_pids: HashMap::new(),
            ps_args: DEFAULT_PS_ARGS.to_string(),
            alpine: false,
            available_commands: Vec::new(),
            existing_pids: Vec::new(),
            pid_user: "admin".to_string(),
            port_pids: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FakeInspector {
    behavior: FakeBehavior,
}

impl FakeInspector {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self { behavior }
    }

    pub fn behavior(&self) -> &FakeBehavior {
        &self.behavior
    }
}

impl ProcessInspector for FakeInspector {
    fn pids_by_process_cmd_name(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .behavior
            .cmd_name_pids
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn pids_by_process_name(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .behavior
            .process_name_pids
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    fn ps_args(&self) -> String {
        self.behavior.ps_args.clone()
    }

    fn is_alpine_platform(&self) -> bool {
        self.behavior.alpine
    }

    fn is_command_available(&self, name: &str) -> bool {
        self.behavior.available_commands.iter().any(|c| c == name)
    }

    fn process_exists(&self, pid: &str) -> Result<bool> {
        Ok(self.behavior.existing_pids.iter().any(|p| p == pid))
    }

    fn pid_user(&self, _pid: &str) -> Result<String> {
        Ok(self.behavior.pid_user.clone())
    }

    fn pids_by_local_port(&self, port: &str) -> Result<Vec<String>> {
        Ok(self.behavior.port_pids.get(port).cloned().unwrap_or_default())
    }
}
