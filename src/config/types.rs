/// Core types and structures for the nschannel system
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Context key carrying the target process id
pub const NS_TARGET_KEY: &str = "ns_target";
/// Context key selecting the target's PID namespace
pub const NS_PID_KEY: &str = "ns_pid";
/// Context key selecting the target's mount namespace
pub const NS_MNT_KEY: &str = "ns_mnt";
/// Context key selecting the target's network namespace
pub const NS_NET_KEY: &str = "ns_net";

const FLAG_TRUE: &str = "true";

/// Stable response codes - CLOSED SET
///
/// Codes are part of the wire contract and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    /// Target pid missing or malformed in the execution context
    CommandIllegal,
    /// A required host command is unavailable
    CommandNotFound,
    /// Script package missing or not a recognizable archive
    ChaosbladeFileNotFound,
    /// Staged package lacks the entry point
    FileNotExist,
    /// Subprocess exited non-zero, timed out, or failed to launch
    OsCmdExecFailed,
    /// Output was not a structured response (decode sentinel)
    ResultUnmarshalFailed,
}

impl ResponseCode {
    /// Numeric wire code
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 200,
            Self::CommandIllegal => 45001,
            Self::CommandNotFound => 45002,
            Self::ChaosbladeFileNotFound => 47001,
            Self::FileNotExist => 47002,
            Self::OsCmdExecFailed => 56001,
            Self::ResultUnmarshalFailed => 56002,
        }
    }

    /// Reverse lookup of a wire code
    pub fn from_code(code: i32) -> Option<Self> {
        [
            Self::Ok,
            Self::CommandIllegal,
            Self::CommandNotFound,
            Self::ChaosbladeFileNotFound,
            Self::FileNotExist,
            Self::OsCmdExecFailed,
            Self::ResultUnmarshalFailed,
        ]
        .into_iter()
        .find(|kind| kind.code() == code)
    }

    /// Render the human-readable message, substituting flags in order
    pub fn render(self, flags: &[&dyn fmt::Display]) -> String {
        let flag = |idx: usize| {
            flags
                .get(idx)
                .map(|value| value.to_string())
                .unwrap_or_default()
        };

        match self {
            Self::Ok => "success".to_string(),
            Self::CommandIllegal => format!("illegal command, err: {}", flag(0)),
            Self::CommandNotFound => format!("`{}`: command not found", flag(0)),
            Self::ChaosbladeFileNotFound => format!("`{}`: chaosblade file not found", flag(0)),
            Self::FileNotExist => format!("`{}`: file not exist", flag(0)),
            Self::OsCmdExecFailed => format!("`{}`: cmd exec failed, err: {}", flag(0), flag(1)),
            Self::ResultUnmarshalFailed => format!(
                "`{}`: exec result unmarshal failed, err: {}",
                flag(0),
                flag(1)
            ),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "Ok",
            Self::CommandIllegal => "CommandIllegal",
            Self::CommandNotFound => "CommandNotFound",
            Self::ChaosbladeFileNotFound => "ChaosbladeFileNotFound",
            Self::FileNotExist => "FileNotExist",
            Self::OsCmdExecFailed => "OsCmdExecFailed",
            Self::ResultUnmarshalFailed => "ResultUnmarshalFailed",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Result of one channel invocation.
///
/// Wire shape: `{"code": int, "success": bool, "result": string?, "err": string?}`.
/// Either decoded from the script's own output or synthesized locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub code: i32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl Response {
    /// Successful response carrying `result` as payload
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Ok.code(),
            success: true,
            result: Some(result.into()),
            err: None,
        }
    }

    /// Failure response whose message is rendered from `code` and `flags`
    pub fn fail_with_flags(code: ResponseCode, flags: &[&dyn fmt::Display]) -> Self {
        Self {
            code: code.code(),
            success: false,
            result: None,
            err: Some(code.render(flags)),
        }
    }

    /// Typed view of the wire code, `None` for codes outside the closed set
    pub fn kind(&self) -> Option<ResponseCode> {
        ResponseCode::from_code(self.code)
    }

    pub fn is(&self, code: ResponseCode) -> bool {
        self.code == code.code()
    }

    /// Serialize to the JSON wire shape
    pub fn to_json(&self) -> String {
        // A struct of integers, booleans and strings always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"code\":{},\"success\":{}}}", self.code, self.success)
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

/// Namespaces of the target process to enter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSet {
    pub pid: bool,
    pub mount: bool,
    pub network: bool,
}

impl NamespaceSet {
    pub fn new(pid: bool, mount: bool, network: bool) -> Self {
        Self {
            pid,
            mount,
            network,
        }
    }

    /// All three supported namespaces
    pub fn all() -> Self {
        Self::new(true, true, true)
    }

    pub fn is_empty(&self) -> bool {
        !(self.pid || self.mount || self.network)
    }
}

/// Caller-scoped execution context: who to enter and which namespaces
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Target process id, kept as supplied by the caller
    pub target_pid: Option<String>,
    pub namespaces: NamespaceSet,
}

impl ExecutionContext {
    pub fn new(target_pid: impl Into<String>, namespaces: NamespaceSet) -> Self {
        Self {
            target_pid: Some(target_pid.into()),
            namespaces,
        }
    }

    /// Build a context from key/value pairs (`ns_target`, `ns_pid`, `ns_mnt`, `ns_net`).
    /// A namespace is selected only when its value is exactly `true`.
    pub fn from_pairs(pairs: &HashMap<String, String>) -> Self {
        let selected = |key: &str| pairs.get(key).map(String::as_str) == Some(FLAG_TRUE);

        Self {
            target_pid: pairs.get(NS_TARGET_KEY).cloned(),
            namespaces: NamespaceSet {
                pid: selected(NS_PID_KEY),
                mount: selected(NS_MNT_KEY),
                network: selected(NS_NET_KEY),
            },
        }
    }
}

/// One script execution request. Consumed once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub context: ExecutionContext,
    /// Script package (tar or gzip tar) on the host filesystem
    pub package: PathBuf,
    /// Invocation id; names the transcript files and must be unique per concurrent call
    pub uid: String,
    /// Free-form argument string appended to the entry point
    #[serde(default)]
    pub args: String,
}

impl ExecutionRequest {
    pub fn new(
        context: ExecutionContext,
        package: impl Into<PathBuf>,
        uid: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            context,
            package: package.into(),
            uid: uid.into(),
            args: args.into(),
        }
    }
}

/// Custom error types for nschannel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Inspect error: {0}")]
    Inspect(String),
}

impl From<nix::errno::Errno> for ChannelError {
    fn from(err: nix::errno::Errno) -> Self {
        ChannelError::Process(err.to_string())
    }
}

/// Result type alias for nschannel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_wire_shape_omits_absent_fields() {
        let json = Response::success("").to_json();
        assert_eq!(json, r#"{"code":200,"success":true,"result":""}"#);

        let fail = Response::fail_with_flags(ResponseCode::CommandIllegal, &[&"missing pid"]);
        let value: serde_json::Value = serde_json::from_str(&fail.to_json()).unwrap();
        assert_eq!(value["code"], 45001);
        assert_eq!(value["success"], false);
        assert_eq!(value["err"], "illegal command, err: missing pid");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn codes_round_trip_through_lookup() {
        for kind in [
            ResponseCode::Ok,
            ResponseCode::CommandIllegal,
            ResponseCode::CommandNotFound,
            ResponseCode::ChaosbladeFileNotFound,
            ResponseCode::FileNotExist,
            ResponseCode::OsCmdExecFailed,
            ResponseCode::ResultUnmarshalFailed,
        ] {
            assert_eq!(ResponseCode::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ResponseCode::from_code(0), None);
    }

    #[test]
    fn render_tolerates_missing_flags() {
        assert_eq!(
            ResponseCode::OsCmdExecFailed.render(&[&"nsexec -t 1"]),
            "`nsexec -t 1`: cmd exec failed, err: "
        );
    }

    #[test]
    fn context_from_pairs_requires_literal_true() {
        let mut pairs = HashMap::new();
        pairs.insert(NS_TARGET_KEY.to_string(), "1234".to_string());
        pairs.insert(NS_MNT_KEY.to_string(), "true".to_string());
        pairs.insert(NS_NET_KEY.to_string(), "yes".to_string());

        let ctx = ExecutionContext::from_pairs(&pairs);
        assert_eq!(ctx.target_pid.as_deref(), Some("1234"));
        assert_eq!(ctx.namespaces, NamespaceSet::new(false, true, false));
    }

    #[test]
    fn context_without_target_has_no_pid() {
        let ctx = ExecutionContext::from_pairs(&HashMap::new());
        assert!(ctx.target_pid.is_none());
        assert!(ctx.namespaces.is_empty());
    }

    #[test]
    fn errno_becomes_process_error() {
        let err = ChannelError::from(nix::errno::Errno::ESRCH);
        assert!(matches!(err, ChannelError::Process(_)));
        assert!(err.to_string().starts_with("Process error: "));
    }
}
