//! Namespace channel: runs script packages inside a target's namespaces
//!
//! [`NamespaceChannel::run_script`] drives the full pipeline:
//! flag composition, package staging, entry point normalization, transcript
//! wrapping, deadline-bounded execution through the nsexec helper, and
//! response decoding. Every failure along the way becomes a [`Response`].

use crate::config::config::{ChannelConfig, NSEXEC_BIN};
use crate::config::types::{ExecutionRequest, Response, ResponseCode, Result};
use crate::exec::decoder::decode_outcome;
use crate::exec::executor::{run_with_deadline, ExecLimits, Invocation, NamespaceExecutor};
use crate::exec::privilege::make_executable;
use crate::exec::recording::{RecordingSyntax, RecordingWrapper};
use crate::exec::stager::{stage_package, StageError};
use crate::inspect::ProcessInspector;
use crate::kernel::namespace::NamespaceFlags;
use crate::observability::audit::events;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Executes packaged scripts in the namespaces of a running process.
///
/// Holds no per-invocation state; share it behind an `Arc` for concurrent use.
pub struct NamespaceChannel {
    config: ChannelConfig,
    bin_dir: PathBuf,
    executor: NamespaceExecutor,
    wrapper: RecordingWrapper,
    inspector: Arc<dyn ProcessInspector>,
}

impl NamespaceChannel {
    /// Build a channel from `config`, probing the recording syntax unless configured
    pub fn new(config: ChannelConfig, inspector: Arc<dyn ProcessInspector>) -> Result<Self> {
        config.validate()?;

        let bin_dir = config.resolved_bin_dir();
        let limits = ExecLimits {
            timeout: config.timeout(),
            kill_grace: config.kill_grace(),
            output_limit: config.output_limit_bytes,
            collection_timeout: config.collection_timeout(),
        };
        let executor = NamespaceExecutor::new(bin_dir.join(&config.helper_name), limits);
        let syntax = config
            .recording_syntax
            .unwrap_or_else(RecordingSyntax::detect);
        let wrapper =
            RecordingWrapper::new(config.recorder.clone(), syntax, config.transcript_dir.clone());

        debug!(
            "Namespace channel ready: helper {}, recording syntax {:?}",
            executor.helper().display(),
            syntax
        );

        Ok(Self {
            config,
            bin_dir,
            executor,
            wrapper,
            inspector,
        })
    }

    /// Channel name
    pub fn name(&self) -> &'static str {
        NSEXEC_BIN
    }

    /// Directory holding the helper binaries
    pub fn script_path(&self) -> &Path {
        &self.bin_dir
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn executor(&self) -> &NamespaceExecutor {
        &self.executor
    }

    pub fn recording_syntax(&self) -> RecordingSyntax {
        self.wrapper.syntax()
    }

    pub fn inspector(&self) -> &dyn ProcessInspector {
        self.inspector.as_ref()
    }

    /// Run the script package of `request` inside the target's namespaces
    pub fn run_script(&self, request: &ExecutionRequest) -> Response {
        let started = Instant::now();
        let package = request.package.display().to_string();
        events::execution_start(&request.uid, request.context.target_pid.as_deref(), &package);

        let (command, response) = self.run_pipeline(request);

        info!(
            "Script {} finished: code {}, success {}",
            package, response.code, response.success
        );
        events::execution_end(
            &request.uid,
            &command,
            response.code,
            started.elapsed().as_millis() as u64,
        );
        response
    }

    /// Returns the last helper command attempted (empty if none) and the response
    fn run_pipeline(&self, request: &ExecutionRequest) -> (String, Response) {
        let package = request.package.display().to_string();
        // One deadline for the whole call; chmod and the script share it
        let deadline = Instant::now() + self.executor.limits().timeout;

        let flags = match NamespaceFlags::from_context(&request.context) {
            Ok(flags) => flags,
            Err(e) => {
                let detail = format!("{}, package {}", e, package);
                return (
                    String::new(),
                    Response::fail_with_flags(ResponseCode::CommandIllegal, &[&detail]),
                );
            }
        };

        let staged = match stage_package(&request.package) {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Staging {} failed: {}", package, e);
                events::staging_failure(&request.uid, &package, &e.to_string());
                return (String::new(), staging_response(&e));
            }
        };
        debug!(
            "Staged {} at {}, entering {:?} of pid {}",
            package,
            staged.staging_dir.display(),
            flags.enabled_namespaces(),
            flags.target_pid()
        );
        if staged.skipped_entries > 0 {
            warn!(
                "{} unsafe entries skipped while staging {}",
                staged.skipped_entries, package
            );
        }

        if let Err(failure) =
            make_executable(&self.executor, &flags, &staged.entry_point, deadline)
        {
            let command = failure.invocation.to_string();
            let response = Response::fail_with_flags(
                ResponseCode::OsCmdExecFailed,
                &[&failure.invocation, &failure.detail],
            );
            return (command, response);
        }

        let wrapped = self
            .wrapper
            .wrap(&staged.entry_point, &request.uid, &request.args);
        let (invocation, outcome) = self.executor.execute_until(&flags, &wrapped, deadline);
        let output = outcome.output_lossy();
        debug!("Command Result, output: {:?}, err: {:?}", output, outcome.failure);
        if outcome.truncated {
            warn!(
                "Output of {} exceeded {} bytes and was truncated",
                invocation,
                self.executor.limits().output_limit
            );
        }

        let response = decode_outcome(&output, outcome.failure.as_ref(), &invocation);
        (invocation.to_string(), response)
    }

    /// Run `script args` with `/bin/sh -c` on the host, without namespace entry
    pub fn run(&self, script: &str, args: &str) -> Response {
        let command = if args.is_empty() {
            script.to_string()
        } else {
            format!("{} {}", script, args)
        };
        let invocation = Invocation::shell(command);
        debug!("Command: {}", invocation);

        let outcome = run_with_deadline(&invocation, self.executor.limits());
        let output = outcome.output_lossy();
        debug!("Command Result, output: {:?}, err: {:?}", output, outcome.failure);
        decode_outcome(&output, outcome.failure.as_ref(), &invocation)
    }

    pub fn pids_by_process_cmd_name(&self, name: &str) -> Result<Vec<String>> {
        self.inspector.pids_by_process_cmd_name(name)
    }

    pub fn pids_by_process_name(&self, name: &str) -> Result<Vec<String>> {
        self.inspector.pids_by_process_name(name)
    }

    pub fn ps_args(&self) -> String {
        self.inspector.ps_args()
    }

    pub fn is_alpine_platform(&self) -> bool {
        self.inspector.is_alpine_platform()
    }

    pub fn is_command_available(&self, name: &str) -> bool {
        self.inspector.is_command_available(name)
    }

    pub fn process_exists(&self, pid: &str) -> Result<bool> {
        self.inspector.process_exists(pid)
    }

    pub fn pid_user(&self, pid: &str) -> Result<String> {
        self.inspector.pid_user(pid)
    }

    pub fn pids_by_local_port(&self, port: &str) -> Result<Vec<String>> {
        self.inspector.pids_by_local_port(port)
    }

    pub fn pids_by_local_ports(&self, ports: &[String]) -> Result<Vec<String>> {
        self.inspector.pids_by_local_ports(ports)
    }

    pub fn missing_commands(&self, names: &[&str]) -> Option<Response> {
        self.inspector.missing_commands(names)
    }
}

fn staging_response(err: &StageError) -> Response {
    match err {
        StageError::Unrecognized { path, .. } => {
            Response::fail_with_flags(ResponseCode::ChaosbladeFileNotFound, &[&path.display()])
        }
        StageError::MissingEntryPoint { .. } => {
            let detail = format!(" {}", err);
            Response::fail_with_flags(ResponseCode::FileNotExist, &[&detail])
        }
        StageError::StagingDir { .. } => {
            Response::fail_with_flags(ResponseCode::FileNotExist, &[err])
        }
    }
}
