use kalpana_core::ids::RequestId;
use kalpana_core::types::{ActionResponse, Decision};

/// Outcome of a single rule, before it is bound to a request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reason: String,
}

impl Verdict {
    pub fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }

    pub fn into_response(self, request_id: RequestId) -> ActionResponse {
        ActionResponse::new(request_id, self.decision, self.reason)
    }
}
