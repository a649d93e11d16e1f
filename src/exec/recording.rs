//! Transcript recording wrapper.
//!
//! Wraps the entry point in a terminal recorder so the session's output and
//! timing end up in `<dir>/<id>.out` and `<dir>/<id>.time`.

use crate::exec::executor::shell_quote;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Argument syntax of the host's `script(1)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingSyntax {
    /// BSD/macOS: the command follows the output file directly
    Bsd,
    /// util-linux: the command is passed as a `-c` string
    Gnu,
}

impl RecordingSyntax {
    /// Host family of the compile target; callers keep the result
    pub fn detect() -> Self {
        if cfg!(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
            target_os = "dragonfly"
        )) {
            Self::Bsd
        } else {
            Self::Gnu
        }
    }
}

/// Transcript artifact paths for one invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transcript {
    pub timing: PathBuf,
    pub output: PathBuf,
}

impl Transcript {
    pub fn new(dir: &Path, uid: &str) -> Self {
        Self {
            timing: dir.join(format!("{}.time", uid)),
            output: dir.join(format!("{}.out", uid)),
        }
    }
}

/// Builds the recorded shell command for an entry point
#[derive(Clone, Debug)]
pub struct RecordingWrapper {
    recorder: String,
    syntax: RecordingSyntax,
    transcript_dir: PathBuf,
}

impl RecordingWrapper {
    pub fn new(
        recorder: impl Into<String>,
        syntax: RecordingSyntax,
        transcript_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            recorder: recorder.into(),
            syntax,
            transcript_dir: transcript_dir.into(),
        }
    }

    pub fn syntax(&self) -> RecordingSyntax {
        self.syntax
    }

    pub fn transcript(&self, uid: &str) -> Transcript {
        Transcript::new(&self.transcript_dir, uid)
    }

    /// Shell command running `entry_point args` under the recorder.
    ///
    /// Paths are quoted; `args` is a caller-supplied shell fragment and is
    /// embedded verbatim.
    pub fn wrap(&self, entry_point: &Path, uid: &str, args: &str) -> String {
        let transcript = self.transcript(uid);
        let main = shell_quote(&entry_point.to_string_lossy());
        let prefix = format!(
            "{} -t 2>{} -a {}",
            self.recorder,
            shell_quote(&transcript.timing.to_string_lossy()),
            shell_quote(&transcript.output.to_string_lossy())
        );

        let mut recorded = match self.syntax {
            RecordingSyntax::Bsd => main,
            // Nested inside the double-quoted -c string of the outer shell
            RecordingSyntax::Gnu => escape_double_quoted(&main),
        };
        if !args.is_empty() {
            recorded.push(' ');
            recorded.push_str(args);
        }

        match self.syntax {
            RecordingSyntax::Bsd => format!("{} {}", prefix, recorded),
            RecordingSyntax::Gnu => format!("{} -c \"{}\"", prefix, recorded),
        }
    }
}

fn escape_double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapper(syntax: RecordingSyntax) -> RecordingWrapper {
        RecordingWrapper::new("script", syntax, "/tmp")
    }

    #[test]
    fn gnu_form_uses_command_string() {
        let cmd = wrapper(RecordingSyntax::Gnu).wrap(Path::new("/opt/s/1/main"), "abc", "--fast 3");
        assert_eq!(
            cmd,
            "script -t 2>/tmp/abc.time -a /tmp/abc.out -c \"/opt/s/1/main --fast 3\""
        );
    }

    #[test]
    fn bsd_form_appends_command() {
        let cmd = wrapper(RecordingSyntax::Bsd).wrap(Path::new("/opt/s/1/main"), "abc", "");
        assert_eq!(cmd, "script -t 2>/tmp/abc.time -a /tmp/abc.out /opt/s/1/main");
    }

    #[test]
    fn empty_args_add_no_trailing_space() {
        let cmd = wrapper(RecordingSyntax::Gnu).wrap(Path::new("/x/main"), "id", "");
        assert!(cmd.ends_with("-c \"/x/main\""));
    }

    #[test]
    fn spaced_entry_point_is_quoted() {
        let main = Path::new("/opt/my pkgs/1/main");
        let gnu = wrapper(RecordingSyntax::Gnu).wrap(main, "abc", "--fast");
        assert!(gnu.ends_with("-c \"'/opt/my pkgs/1/main' --fast\""));
        let bsd = wrapper(RecordingSyntax::Bsd).wrap(main, "abc", "--fast");
        assert!(bsd.ends_with("/tmp/abc.out '/opt/my pkgs/1/main' --fast"));
    }

    #[test]
    fn gnu_form_escapes_for_the_outer_quotes() {
        let cmd = wrapper(RecordingSyntax::Gnu).wrap(Path::new("/opt/$x/1/main"), "abc", "");
        assert!(cmd.ends_with("-c \"'/opt/\\$x/1/main'\""));
    }

    #[test]
    fn transcript_paths_follow_uid() {
        let t = RecordingWrapper::new("script", RecordingSyntax::Gnu, "/var/tmp").transcript("u1");
        assert_eq!(t.timing, PathBuf::from("/var/tmp/u1.time"));
        assert_eq!(t.output, PathBuf::from("/var/tmp/u1.out"));
    }

    #[test]
    fn detect_matches_linux_host() {
        if cfg!(target_os = "linux") {
            assert_eq!(RecordingSyntax::detect(), RecordingSyntax::Gnu);
        }
    }
}
