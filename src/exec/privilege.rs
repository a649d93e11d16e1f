//! Entry point permission normalization inside the target namespaces.

use crate::exec::executor::{shell_quote, ExecOutcome, Invocation, NamespaceExecutor};
use crate::kernel::namespace::NamespaceFlags;
use std::path::Path;
use std::time::Instant;

/// Mode granting read/write/execute to owner, group, and other
pub const ENTRY_POINT_MODE: u32 = 0o777;

/// Shell command that makes `entry_point` executable
pub fn chmod_command(entry_point: &Path) -> String {
    format!(
        "chmod {:o} {}",
        ENTRY_POINT_MODE,
        shell_quote(&entry_point.to_string_lossy())
    )
}

/// Failed normalization: the helper command and its combined output plus error
#[derive(Debug)]
pub struct NormalizeFailure {
    pub invocation: Invocation,
    pub detail: String,
}

/// Run `chmod 777 <entry_point>` through the helper, so the mode is applied
/// where the script will actually execute. `deadline` is the one the caller
/// also applies to the script itself.
pub fn make_executable(
    executor: &NamespaceExecutor,
    flags: &NamespaceFlags,
    entry_point: &Path,
    deadline: Instant,
) -> Result<(), NormalizeFailure> {
    let (invocation, outcome) =
        executor.execute_until(flags, &chmod_command(entry_point), deadline);
    log::debug!(
        "Command Result, chmod output: {:?}, err: {:?}",
        outcome.output_lossy(),
        outcome.failure
    );

    match outcome {
        ExecOutcome {
            failure: Some(failure),
            output,
            ..
        } => {
            let mut detail = String::from_utf8_lossy(&output).into_owned();
            detail.push(' ');
            detail.push_str(&failure.to_string());
            Err(NormalizeFailure { invocation, detail })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::NamespaceSet;
    use crate::exec::executor::ExecLimits;
    use std::time::Duration;

    #[test]
    fn chmod_command_uses_octal_mode() {
        assert_eq!(
            chmod_command(Path::new("/tmp/1700000000/main")),
            "chmod 777 /tmp/1700000000/main"
        );
        assert_eq!(
            chmod_command(Path::new("/tmp/my pkgs/1700000000/main")),
            "chmod 777 '/tmp/my pkgs/1700000000/main'"
        );
    }

    #[test]
    fn unlaunchable_helper_is_failure_with_command() {
        let executor = NamespaceExecutor::new(
            "/nonexistent/bin/nsexec",
            ExecLimits {
                timeout: Duration::from_secs(5),
                ..ExecLimits::default()
            },
        );
        let flags = NamespaceFlags::compose(Some("1"), NamespaceSet::new(false, true, false))
            .unwrap();

        let deadline = Instant::now() + executor.limits().timeout;
        let failure =
            make_executable(&executor, &flags, Path::new("/tmp/x/main"), deadline).unwrap_err();
        assert_eq!(
            failure.invocation.to_string(),
            "/nonexistent/bin/nsexec -t 1 -m -- /bin/sh -c chmod 777 /tmp/x/main"
        );
        assert!(failure.detail.contains("launch failed"));
    }

    #[test]
    fn spent_deadline_fails_before_chmod() {
        let executor = NamespaceExecutor::new("/bin/true", ExecLimits::default());
        let flags = NamespaceFlags::compose(Some("1"), NamespaceSet::all()).unwrap();

        let failure =
            make_executable(&executor, &flags, Path::new("/tmp/x/main"), Instant::now())
                .unwrap_err();
        assert!(failure.detail.contains("deadline exceeded"));
    }
}
