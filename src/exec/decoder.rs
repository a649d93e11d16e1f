//! Response decoding with local fallback.
//!
//! A script may print its own structured [`Response`]; that verdict wins over
//! the helper's exit status. Otherwise the response is synthesized from the
//! exit status and raw output.
//!
//! Caveat: a script that exits 0 without printing a structured response is
//! reported as success with its raw output, even if the text describes a
//! failure. Scripts that need to report failure must exit non-zero or print a
//! structured response.

use crate::config::types::{Response, ResponseCode};
use crate::exec::executor::ExecFailure;
use std::fmt;

/// Decode `content` as a [`Response`].
///
/// Undecodable content yields a `ResultUnmarshalFailed` response, which
/// callers treat as "no structured payload".
pub fn decode(content: &str) -> Response {
    let content = content.trim();
    match serde_json::from_str::<Response>(content) {
        Ok(response) => response,
        Err(e) => {
            log::debug!("Output is not a structured response: {}", e);
            Response::fail_with_flags(ResponseCode::ResultUnmarshalFailed, &[&content, &e])
        }
    }
}

/// Apply the decode policy to a finished subprocess.
///
/// 1. Non-empty output that decodes to a response other than the decode
///    sentinel is returned verbatim.
/// 2. Otherwise a clean exit is a success carrying the raw output.
/// 3. Otherwise `OsCmdExecFailed` with `command`, the output, and the error.
pub fn decode_outcome(
    output: &str,
    failure: Option<&ExecFailure>,
    command: &dyn fmt::Display,
) -> Response {
    if !output.trim().is_empty() {
        let response = decode(output);
        if !response.is(ResponseCode::ResultUnmarshalFailed) {
            return response;
        }
    }

    match failure {
        None => Response::success(output),
        Some(failure) => {
            let detail = format!("{} {}", output, failure);
            Response::fail_with_flags(ResponseCode::OsCmdExecFailed, &[command, &detail])
        }
    }
}
