//! Trusted requester evaluation.
//!
//! Requests from a small set of known process names are allowed outright once
//! the protected-path check has passed.

use std::collections::BTreeSet;

use kalpana_core::types::{Decision, Requester};

use crate::decision::Verdict;

pub const DEFAULT_TRUSTED_PROCESSES: [&str; 3] = ["kalpana-shell", "kalpana-ui", "systemd"];

/// Allows requests whose process name is in `trusted` (exact match).
pub fn evaluate_trusted(requester: &Requester, trusted: &BTreeSet<String>) -> Option<Verdict> {
    if trusted.contains(&requester.name) {
        return Some(Verdict::new(
            Decision::Allow,
            format!("Trusted process: {}", requester.name),
        ));
    }
    None
}
