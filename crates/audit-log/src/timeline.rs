use time::format_description::well_known::Rfc3339;

use crate::AuditRecord;

/// One human-readable line per record, in log order.
pub fn timeline(records: &[AuditRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let stamp = record
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| record.timestamp.to_string());
            format!(
                "{stamp} {id} {decision:<7} {action} by {requestor}: {target} ({reason})",
                id = record.request_id,
                decision = record.decision.as_str().to_uppercase(),
                action = record.action,
                requestor = record.requestor,
                target = record.target,
                reason = record.reason,
            )
        })
        .collect()
}
