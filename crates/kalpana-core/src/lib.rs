pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod types;

pub use config::{AuthorityMode, Config, ConfigPaths};
pub use error::{FrameError, KalpanaError, ProtocolError};
pub use ids::{RequestId, RequestIdGenerator};
pub use ipc::{AuthorityRequest, AuthorityResponse};
pub use types::{ActionKind, ActionRequest, ActionResponse, AuditEntry, Decision, Requester};
