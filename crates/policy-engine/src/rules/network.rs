use kalpana_core::types::{ActionKind, Decision};

use crate::decision::Verdict;

pub const NETWORK_REASON: &str = "Network action logged for review";
pub const ESCALATION_REASON: &str = "Privilege escalation requires authority approval";

pub fn evaluate_network(action: ActionKind) -> Option<Verdict> {
    if action.is_network() {
        return Some(Verdict::new(Decision::Audit, NETWORK_REASON));
    }
    None
}

pub fn evaluate_escalation(action: ActionKind) -> Option<Verdict> {
    if action == ActionKind::PrivilegeEscalate {
        return Some(Verdict::new(Decision::Deny, ESCALATION_REASON));
    }
    None
}
