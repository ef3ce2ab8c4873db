use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::debug;

use audit_log::{AuditLogger, AuditQuery};
use kalpana_core::config::{AuthorityMode, Config};
use kalpana_core::ids::RequestIdGenerator;
use kalpana_core::ipc::{
    AuditPayload, AuditQueryPayload, AuthorityRequest, AuthorityResponse, ExecutePayload, ExecuteResult,
    Explanation, StatusPayload,
};
use kalpana_core::types::{ActionKind, ActionRequest, ActionResponse, AuditEntry, Requester};
use policy_engine::{PolicyEngine, PolicySet};

/// An action as described by a caller, before the authority assigns it an id.
#[derive(Debug, Clone)]
pub struct ActionDraft {
    pub action: ActionKind,
    pub requester: Requester,
    pub target: String,
    pub parameters: Map<String, Value>,
}

impl ActionDraft {
    pub fn new(action: ActionKind, requester: Requester, target: impl Into<String>) -> Self {
        Self {
            action,
            requester,
            target: target.into(),
            parameters: Map::new(),
        }
    }
}

impl From<ExecutePayload> for ActionDraft {
    fn from(payload: ExecutePayload) -> Self {
        let requester = Requester {
            pid: payload.pid,
            uid: payload.uid,
            name: payload.process,
        };
        let mut draft = ActionDraft::new(ActionKind::SystemCommand, requester, payload.cmd);
        draft.parameters = payload.args;
        draft
    }
}

struct AuthorityState {
    ids: RequestIdGenerator,
    last_decision: Option<ActionResponse>,
    audit: AuditLogger,
}

/// The shared context every connection handler talks to.
///
/// Id generation, evaluation, the last-decision slot and the audit append all
/// happen under one lock, so audit order always matches id order.
pub struct Authority {
    mode: AuthorityMode,
    started_at: OffsetDateTime,
    policy: PolicyEngine,
    state: Mutex<AuthorityState>,
}

impl Authority {
    pub fn new(mode: AuthorityMode, policy: PolicyEngine, audit: AuditLogger) -> Self {
        Self {
            mode,
            started_at: OffsetDateTime::now_utc(),
            policy,
            state: Mutex::new(AuthorityState {
                ids: RequestIdGenerator::new(),
                last_decision: None,
                audit,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let policies = PolicySet::load(&config.paths.policy_dir);
        let policy = PolicyEngine::from_config(&config.policy, policies);
        let audit = AuditLogger::open(&config.paths.audit_log);
        Self::new(config.authority.mode, policy, audit)
    }

    fn lock(&self) -> MutexGuard<'_, AuthorityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one request through evaluation and the audit trail.
    pub fn submit(&self, draft: ActionDraft) -> ActionResponse {
        let mut state = self.lock();
        let now = OffsetDateTime::now_utc();
        let request = ActionRequest {
            id: state.ids.next(now),
            action: draft.action,
            requester: draft.requester,
            target: draft.target,
            parameters: draft.parameters,
            created_at: now,
        };

        let response = self.policy.evaluate(&request);
        debug!(
            request_id = %request.id,
            action = %request.action,
            requester = %request.requester.name,
            decision = %response.decision,
            "action evaluated"
        );
        state.last_decision = Some(response.clone());

        state.audit.log(AuditEntry {
            timestamp: OffsetDateTime::now_utc(),
            request,
            response: response.clone(),
            execution_result: None,
        });
        response
    }

    pub fn execute(&self, payload: ExecutePayload) -> ExecuteResult {
        let response = self.submit(ActionDraft::from(payload));
        ExecuteResult {
            allowed: response.decision.permits(),
            request_id: response.request_id,
            decision: response.decision,
            reason: response.reason,
        }
    }

    pub fn status(&self) -> StatusPayload {
        let state = self.lock();
        let uptime = OffsetDateTime::now_utc() - self.started_at;
        StatusPayload {
            status: "online".to_string(),
            requests_processed: state.ids.issued(),
            mode: self.mode,
            policies_loaded: self.policy.policies_loaded(),
            audit_entries: state.audit.len(),
            started_at: self.started_at,
            uptime_seconds: uptime.whole_seconds().max(0) as u64,
        }
    }

    pub fn audit(&self, query: &AuditQueryPayload) -> AuditPayload {
        let query = AuditQuery {
            action: query.action,
            decision: query.decision,
            limit: query.limit,
        };
        AuditPayload {
            entries: self.lock().audit.query(&query),
        }
    }

    pub fn explain(&self) -> AuthorityResponse {
        match &self.lock().last_decision {
            Some(last) => AuthorityResponse::Explain(Explanation {
                request_id: last.request_id.clone(),
                decision: last.decision,
                reason: last.reason.clone(),
                explanation: format!("The action was {} because: {}", last.decision, last.reason),
            }),
            None => AuthorityResponse::no_decision(),
        }
    }

    pub fn dispatch(&self, request: AuthorityRequest) -> AuthorityResponse {
        match request {
            AuthorityRequest::Execute(payload) => AuthorityResponse::Execute(self.execute(payload)),
            AuthorityRequest::Status => AuthorityResponse::Status(self.status()),
            AuthorityRequest::Audit(query) => AuthorityResponse::Audit(self.audit(&query)),
            AuthorityRequest::Explain => self.explain(),
        }
    }

    /// Decodes and dispatches one frame body. Protocol errors become `error` responses.
    pub fn handle_frame(&self, body: &[u8]) -> AuthorityResponse {
        match AuthorityRequest::from_slice(body) {
            Ok(request) => {
                debug!(command = request.name(), "dispatching request");
                self.dispatch(request)
            }
            Err(error) => {
                debug!(%error, "rejected request");
                AuthorityResponse::from(error)
            }
        }
    }

    pub fn mode(&self) -> AuthorityMode {
        self.mode
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }
}
