use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::config::AuthorityMode;
use crate::error::{FrameError, ProtocolError};
use crate::ids::RequestId;
use crate::types::{ActionKind, AuditEntry, Decision};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Client-side cap on a response frame. Audit answers echo whole requests, so
/// they can be many times larger than any single request frame.
pub const MAX_RESPONSE_BYTES: usize = 256 * 1024 * 1024;
pub const DEFAULT_AUDIT_LIMIT: usize = 50;
pub const NO_DECISION_MESSAGE: &str = "No decisions made yet.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutePayload {
    /// Command line the requester wants to run.
    #[serde(alias = "target")]
    pub cmd: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub uid: u32,
    #[serde(default = "default_process")]
    pub process: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditQueryPayload {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

impl Default for AuditQueryPayload {
    fn default() -> Self {
        Self {
            limit: DEFAULT_AUDIT_LIMIT,
            action: None,
            decision: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum AuthorityRequest {
    Execute(ExecutePayload),
    Status,
    Audit(AuditQueryPayload),
    Explain,
}

impl AuthorityRequest {
    /// Decodes one frame body. The `command` field is inspected first so an
    /// unrecognized command can be reported by name.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidPayload("frame is not valid UTF-8".to_string()))?;
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        if !value.is_object() {
            return Err(ProtocolError::InvalidPayload("expected a JSON object".to_string()));
        }
        let command = match value.get("command") {
            Some(Value::String(command)) => command.clone(),
            Some(other) => return Err(ProtocolError::UnknownCommand(other.to_string())),
            None => return Err(ProtocolError::MissingCommand),
        };
        match command.as_str() {
            "execute" => Ok(AuthorityRequest::Execute(serde_json::from_value(value)?)),
            "status" => Ok(AuthorityRequest::Status),
            "audit" => Ok(AuthorityRequest::Audit(serde_json::from_value(value)?)),
            "explain" => Ok(AuthorityRequest::Explain),
            _ => Err(ProtocolError::UnknownCommand(command)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthorityRequest::Execute(_) => "execute",
            AuthorityRequest::Status => "status",
            AuthorityRequest::Audit(_) => "audit",
            AuthorityRequest::Explain => "explain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub request_id: RequestId,
    pub decision: Decision,
    pub reason: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: String,
    pub requests_processed: u64,
    pub mode: AuthorityMode,
    pub policies_loaded: usize,
    pub audit_entries: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPayload {
    pub entries: Vec<AuditEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub request_id: RequestId,
    pub decision: Decision,
    pub reason: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoDecision {
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Response bodies carry no tag; variants are told apart by their fields, so
/// the more specific shapes come first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorityResponse {
    Execute(ExecuteResult),
    Status(StatusPayload),
    Audit(AuditPayload),
    Explain(Explanation),
    NoDecision(NoDecision),
    Error(ErrorPayload),
}

impl AuthorityResponse {
    pub fn error(message: impl Into<String>) -> Self {
        AuthorityResponse::Error(ErrorPayload {
            error: message.into(),
        })
    }

    pub fn no_decision() -> Self {
        AuthorityResponse::NoDecision(NoDecision {
            explanation: NO_DECISION_MESSAGE.to_string(),
        })
    }
}

impl From<ProtocolError> for AuthorityResponse {
    fn from(error: ProtocolError) -> Self {
        AuthorityResponse::error(error.to_string())
    }
}

fn default_process() -> String {
    "unknown".to_string()
}

fn default_audit_limit() -> usize {
    DEFAULT_AUDIT_LIMIT
}

/// Writes `payload` behind a 4-byte big-endian length prefix.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32::<BigEndian>(len)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame body. A clean EOF before the prefix is
/// reported as [`FrameError::Closed`].
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, FrameError> {
    let len = match reader.read_u32::<BigEndian>() {
        Ok(len) => len as usize,
        Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(error) => return Err(FrameError::Io(error)),
    };
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|error| {
        if error.kind() == ErrorKind::UnexpectedEof {
            FrameError::Truncated(error)
        } else {
            FrameError::Io(error)
        }
    })?;
    Ok(body)
}

/// Blocking round trip used by command-line clients.
pub fn send_request(socket_path: &Path, request: &AuthorityRequest) -> Result<AuthorityResponse> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to authority at {}", socket_path.display()))?;
    let payload = serde_json::to_vec(request).context("serialize request")?;
    write_frame(&mut stream, &payload).context("send request frame")?;
    let body = read_frame(&mut stream, MAX_RESPONSE_BYTES).context("read response frame")?;
    let response = serde_json::from_slice(&body).context("parse response")?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"{}").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, b'{', b'}']);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor, 16).unwrap(), b"{}".to_vec());
        assert!(matches!(read_frame(&mut cursor, 16), Err(FrameError::Closed)));
    }

    #[test]
    fn oversized_and_truncated_frames_are_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 1, 0]);
        assert!(matches!(
            read_frame(&mut cursor, 16),
            Err(FrameError::TooLarge { len: 256, max: 16 })
        ));

        let mut cursor = Cursor::new(vec![0, 0, 0, 5, b'a', b'b']);
        assert!(matches!(read_frame(&mut cursor, 16), Err(FrameError::Truncated(_))));
    }

    #[test]
    fn execute_request_defaults_requester_fields() {
        let request = AuthorityRequest::from_slice(br#"{"command":"execute","cmd":"ls -la"}"#).unwrap();
        match request {
            AuthorityRequest::Execute(payload) => {
                assert_eq!(payload.cmd, "ls -la");
                assert_eq!(payload.pid, 0);
                assert_eq!(payload.uid, 0);
                assert_eq!(payload.process, "unknown");
                assert!(payload.args.is_empty());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn execute_without_cmd_is_rejected() {
        let error = AuthorityRequest::from_slice(br#"{"command":"execute","pid":4}"#).unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidPayload(_)));
    }

    #[test]
    fn unknown_and_missing_commands_are_named() {
        let error = AuthorityRequest::from_slice(br#"{"command":"reboot"}"#).unwrap_err();
        assert_eq!(error.to_string(), "Unknown command: reboot");

        let error = AuthorityRequest::from_slice(br#"{"limit":3}"#).unwrap_err();
        assert!(matches!(error, ProtocolError::MissingCommand));

        let error = AuthorityRequest::from_slice(b"not json").unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidPayload(_)));
    }

    #[test]
    fn audit_limit_defaults_to_fifty() {
        let request = AuthorityRequest::from_slice(br#"{"command":"audit"}"#).unwrap();
        assert_eq!(request, AuthorityRequest::Audit(AuditQueryPayload::default()));

        let request =
            AuthorityRequest::from_slice(br#"{"command":"audit","limit":3,"decision":"deny"}"#).unwrap();
        match request {
            AuthorityRequest::Audit(query) => {
                assert_eq!(query.limit, 3);
                assert_eq!(query.decision, Some(Decision::Deny));
                assert_eq!(query.action, None);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn requests_serialize_with_command_tag() {
        let value = serde_json::to_value(AuthorityRequest::Status).unwrap();
        assert_eq!(value, serde_json::json!({"command": "status"}));

        let value = serde_json::to_value(AuthorityRequest::Execute(ExecutePayload {
            cmd: "ls".to_string(),
            args: Map::new(),
            pid: 7,
            uid: 1000,
            process: "kalpana-shell".to_string(),
        }))
        .unwrap();
        assert_eq!(value["command"], "execute");
        assert_eq!(value["cmd"], "ls");
        assert_eq!(value["process"], "kalpana-shell");
    }

    #[test]
    fn untagged_responses_resolve_by_shape() {
        let response: AuthorityResponse = serde_json::from_str(
            r#"{"request_id":"REQ-1","decision":"audit","reason":"r","allowed":true}"#,
        )
        .unwrap();
        assert!(matches!(response, AuthorityResponse::Execute(_)));

        let response: AuthorityResponse =
            serde_json::from_str(r#"{"explanation":"No decisions made yet."}"#).unwrap();
        assert!(matches!(response, AuthorityResponse::NoDecision(_)));

        let response: AuthorityResponse = serde_json::from_str(
            r#"{"request_id":"REQ-1","decision":"deny","reason":"r","explanation":"e"}"#,
        )
        .unwrap();
        assert!(matches!(response, AuthorityResponse::Explain(_)));

        let response: AuthorityResponse = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert!(matches!(response, AuthorityResponse::Error(_)));
    }

    #[test]
    fn client_accepts_responses_larger_than_a_request_frame() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("core.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let big = "x".repeat(DEFAULT_MAX_FRAME_BYTES * 2);
        let expected = big.clone();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let body = read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES).unwrap();
            assert_eq!(body, br#"{"command":"status"}"#.to_vec());
            let reply = serde_json::to_vec(&AuthorityResponse::error(big)).unwrap();
            write_frame(&mut stream, &reply).unwrap();
        });

        let response = send_request(&socket, &AuthorityRequest::Status).unwrap();
        server.join().unwrap();
        match response {
            AuthorityResponse::Error(payload) => assert_eq!(payload.error, expected),
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
