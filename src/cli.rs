use crate::channel::NamespaceChannel;
use crate::config::config::ChannelConfig;
use crate::config::types::{
    ExecutionContext, ExecutionRequest, NamespaceSet, Response, ResponseCode,
    Result as ChannelResult,
};
use crate::inspect::{ProcInspector, ProcessInspector};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Helper directory override
    #[arg(long, global = true)]
    bin_dir: Option<PathBuf>,
    /// Subprocess deadline in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script package inside the namespaces of a target process
    RunScript {
        /// Target process id
        #[arg(long)]
        pid: Option<String>,
        /// Enter the target's PID namespace
        #[arg(long)]
        pid_ns: bool,
        /// Enter the target's mount namespace
        #[arg(long)]
        mnt_ns: bool,
        /// Enter the target's network namespace
        #[arg(long)]
        net_ns: bool,
        /// Script package (tar or tar.gz containing `main`)
        #[arg(long)]
        package: PathBuf,
        /// Invocation id naming the transcript files; random when omitted
        #[arg(long)]
        uid: Option<String>,
        /// Argument string appended to the entry point
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
    },
    /// Run a shell command on the host
    Run {
        script: String,
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
    },
    /// List pids by process name or command line
    Pids {
        name: String,
        /// Match against the full command line instead of the process name
        #[arg(long)]
        cmdline: bool,
    },
    /// List pids owning sockets on local ports
    PortPids {
        #[arg(required = true)]
        ports: Vec<String>,
    },
    /// Show the user owning a process
    PidUser { pid: String },
    /// Check whether a process exists
    ProcessExists { pid: String },
}

impl Cli {
    fn channel_config(&self) -> Result<ChannelConfig> {
        let mut config = match &self.config {
            Some(path) => ChannelConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ChannelConfig::default(),
        };
        if let Some(dir) = &self.bin_dir {
            config.bin_dir = Some(dir.clone());
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }
        Ok(config)
    }
}

/// Print `response` as JSON and exit non-zero on failure
fn emit(response: &Response) -> Result<()> {
    println!("{}", response.to_json());
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Inspector results are wrapped in a response so every subcommand prints one shape
fn inspected<T: Serialize>(value: ChannelResult<T>) -> Response {
    let rendered = value
        .map_err(anyhow::Error::from)
        .and_then(|v| serde_json::to_string(&v).map_err(anyhow::Error::from));
    match rendered {
        Ok(json) => Response::success(json),
        Err(e) => Response::fail_with_flags(ResponseCode::CommandIllegal, &[&e]),
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.channel_config()?;

    if unsafe { libc::geteuid() } != 0 {
        log::warn!("Not running as root; entering another process's namespaces may be refused");
    }
    if !crate::kernel::namespace::is_supported() {
        log::warn!("/proc/self/ns is not readable; namespace entry is unavailable on this host");
    }

    let inspector: Arc<dyn ProcessInspector> = Arc::new(ProcInspector::default());
    let channel = NamespaceChannel::new(config, inspector).context("building channel")?;

    match cli.command {
        Commands::RunScript {
            pid,
            pid_ns,
            mnt_ns,
            net_ns,
            package,
            uid,
            args,
        } => {
            let context = ExecutionContext {
                target_pid: pid,
                namespaces: NamespaceSet::new(pid_ns, mnt_ns, net_ns),
            };
            let uid = uid.unwrap_or_else(|| Uuid::new_v4().to_string());
            let request = ExecutionRequest::new(context, package, uid, args);
            emit(&channel.run_script(&request))
        }
        Commands::Run { script, args } => emit(&channel.run(&script, &args)),
        Commands::Pids { name, cmdline } => {
            let pids = if cmdline {
                channel.pids_by_process_cmd_name(&name)
            } else {
                channel.pids_by_process_name(&name)
            };
            emit(&inspected(pids))
        }
        Commands::PortPids { ports } => emit(&inspected(channel.pids_by_local_ports(&ports))),
        Commands::PidUser { pid } => emit(&inspected(channel.pid_user(&pid))),
        Commands::ProcessExists { pid } => emit(&inspected(channel.process_exists(&pid))),
    }
}
