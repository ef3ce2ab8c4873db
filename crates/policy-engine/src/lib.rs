use std::collections::BTreeSet;

use kalpana_core::config::PolicyConfig;
use kalpana_core::types::{ActionKind, ActionRequest, ActionResponse, Decision};

mod decision;
pub mod documents;
pub mod rules;

pub use decision::Verdict;
pub use documents::{LoadedPolicy, PolicyDocument, PolicyLoadWarning, PolicyRule, PolicySet};

pub const DEFAULT_REASON: &str = "Unknown action sandboxed by default";

/// Decides every action request. Evaluation is pure: no I/O and no state
/// changes, so identical requests always get identical answers.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    trusted_processes: BTreeSet<String>,
    protected_paths: Vec<String>,
    /// Loaded for reporting; evaluation does not consult these yet.
    policies: PolicySet,
}

impl PolicyEngine {
    /// Creates an engine with the built-in trusted and protected sets.
    pub fn new(policies: PolicySet) -> Self {
        Self::from_config(&PolicyConfig::default(), policies)
    }

    /// Creates an engine with the built-in sets extended by `config`.
    pub fn from_config(config: &PolicyConfig, policies: PolicySet) -> Self {
        let trusted_processes = rules::trusted::DEFAULT_TRUSTED_PROCESSES
            .iter()
            .map(|name| name.to_string())
            .chain(config.trusted_processes.iter().cloned())
            .collect();

        let mut protected_paths: Vec<String> = rules::protected::DEFAULT_PROTECTED_PATHS
            .iter()
            .map(|path| path.to_string())
            .collect();
        for path in &config.protected_paths {
            if !protected_paths.contains(path) {
                protected_paths.push(path.clone());
            }
        }

        Self {
            trusted_processes,
            protected_paths,
            policies,
        }
    }

    /// Evaluates a request. The first matching rule wins:
    /// protected path, trusted process, network, privilege escalation, default sandbox.
    pub fn evaluate(&self, request: &ActionRequest) -> ActionResponse {
        let verdict = rules::protected::evaluate_protected(request.action, &request.target, &self.protected_paths)
            .or_else(|| rules::trusted::evaluate_trusted(&request.requester, &self.trusted_processes))
            .or_else(|| rules::network::evaluate_network(request.action))
            .or_else(|| rules::network::evaluate_escalation(request.action))
            .unwrap_or_else(|| Verdict::new(Decision::Sandbox, DEFAULT_REASON));
        verdict.into_response(request.id.clone())
    }

    pub fn policies_loaded(&self) -> usize {
        self.policies.len()
    }

    /// First loaded rule for `action`, for inspection only.
    pub fn rule_for(&self, action: ActionKind) -> Option<&PolicyRule> {
        self.policies
            .documents
            .iter()
            .find_map(|loaded| loaded.document.rule_for(action))
    }

    pub fn is_trusted(&self, process: &str) -> bool {
        self.trusted_processes.contains(process)
    }

    pub fn protected_paths(&self) -> &[String] {
        &self.protected_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalpana_core::ids::RequestId;
    use kalpana_core::types::Requester;
    use serde_json::Map;
    use time::OffsetDateTime;

    fn create_test_engine() -> PolicyEngine {
        PolicyEngine::new(PolicySet::default())
    }

    fn request(process: &str, action: ActionKind, target: &str) -> ActionRequest {
        ActionRequest {
            id: RequestId("REQ-20240101000000-000001".to_string()),
            action,
            requester: Requester {
                pid: 100,
                uid: 1000,
                name: process.to_string(),
            },
            target: target.to_string(),
            parameters: Map::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn protected_write_is_denied() {
        let engine = create_test_engine();
        let response = engine.evaluate(&request("unknown-script", ActionKind::FileWrite, "/kalpana/core/config"));
        assert_eq!(response.decision, Decision::Deny);
        assert!(response.reason.contains("Protected"));
        assert_eq!(response.request_id.as_str(), "REQ-20240101000000-000001");
    }

    #[test]
    fn protected_path_outranks_trusted_process() {
        let engine = create_test_engine();
        for action in [ActionKind::FileWrite, ActionKind::FileDelete] {
            let response = engine.evaluate(&request("kalpana-shell", action, "/boot/vmlinuz"));
            assert_eq!(response.decision, Decision::Deny);
        }
    }

    #[test]
    fn trusted_process_is_allowed() {
        let engine = create_test_engine();
        let response = engine.evaluate(&request("kalpana-shell", ActionKind::FileWrite, "/tmp/note.txt"));
        assert_eq!(response.decision, Decision::Allow);
        assert!(response.reason.contains("Trusted"));
    }

    #[test]
    fn network_is_audited() {
        let engine = create_test_engine();
        let response = engine.evaluate(&request("unknown-script", ActionKind::NetworkConnect, "1.2.3.4:443"));
        assert_eq!(response.decision, Decision::Audit);
        assert!(response.reason.contains("Network"));
    }

    #[test]
    fn escalation_needs_approval() {
        let engine = create_test_engine();
        let response = engine.evaluate(&request("unknown-script", ActionKind::PrivilegeEscalate, "sudo -i"));
        assert_eq!(response.decision, Decision::Deny);
        assert!(response.reason.contains("approval"));
    }

    #[test]
    fn everything_else_is_sandboxed() {
        let engine = create_test_engine();
        let response = engine.evaluate(&request("unknown-script", ActionKind::PackageInstall, "vim"));
        assert_eq!(response.decision, Decision::Sandbox);
        assert!(response.reason.contains("Unknown action"));

        let response = engine.evaluate(&request("unknown-script", ActionKind::SystemCommand, "ls -la"));
        assert_eq!(response.decision, Decision::Sandbox);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let engine = create_test_engine();
        for action in ActionKind::ALL {
            for process in ["unknown-script", "kalpana-ui"] {
                for target in ["/kalpana/core/x", "/tmp/x", "8.8.8.8:53"] {
                    let first = engine.evaluate(&request(process, action, target));
                    let second = engine.evaluate(&request(process, action, target));
                    assert_eq!(first.decision, second.decision);
                    assert_eq!(first.reason, second.reason);
                }
            }
        }
    }

    #[test]
    fn config_extends_builtin_sets() {
        let config = PolicyConfig {
            trusted_processes: vec!["backup-agent".to_string()],
            protected_paths: vec!["/etc/shadow".to_string(), "/boot".to_string()],
        };
        let engine = PolicyEngine::from_config(&config, PolicySet::default());
        assert!(engine.is_trusted("backup-agent"));
        assert!(engine.is_trusted("systemd"));
        assert_eq!(engine.protected_paths().len(), 3);

        let response = engine.evaluate(&request("backup-agent", ActionKind::FileWrite, "/etc/shadow"));
        assert_eq!(response.decision, Decision::Deny);
    }

    #[test]
    fn loaded_documents_are_reported_not_consulted() {
        let mut policies = PolicySet::default();
        policies.documents.push(LoadedPolicy {
            path: "default.json".into(),
            document: PolicyDocument::default_document(),
        });
        let engine = PolicyEngine::new(policies);
        assert_eq!(engine.policies_loaded(), 1);
        assert!(engine.rule_for(ActionKind::NetworkConnect).unwrap().audit);

        // The default document allows file reads, but unknown requesters are still sandboxed.
        let response = engine.evaluate(&request("unknown-script", ActionKind::FileRead, "/tmp/x"));
        assert_eq!(response.decision, Decision::Sandbox);
    }
}
