use kalpana_core::types::{ActionKind, Decision};

use crate::decision::Verdict;

pub const PROTECTED_PATH_REASON: &str = "Protected system path - modification forbidden";

/// Paths no requester may modify: the boot partition and the authority's own install.
pub const DEFAULT_PROTECTED_PATHS: [&str; 2] = ["/boot", "/kalpana/core"];

/// Denies writes and deletes whose target mentions a protected path.
///
/// Targets may be whole command lines, so the check is containment rather than
/// a path prefix match.
pub fn evaluate_protected(action: ActionKind, target: &str, protected: &[String]) -> Option<Verdict> {
    if !action.is_modification() {
        return None;
    }
    if protected.iter().any(|path| !path.is_empty() && target.contains(path.as_str())) {
        return Some(Verdict::new(Decision::Deny, PROTECTED_PATH_REASON));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Vec<String> {
        DEFAULT_PROTECTED_PATHS.iter().map(|path| path.to_string()).collect()
    }

    #[test]
    fn write_under_protected_path_is_denied() {
        let verdict = evaluate_protected(ActionKind::FileWrite, "/kalpana/core/config", &defaults()).unwrap();
        assert_eq!(verdict.decision, Decision::Deny);

        let verdict = evaluate_protected(ActionKind::FileDelete, "rm -rf /boot/grub", &defaults()).unwrap();
        assert_eq!(verdict.decision, Decision::Deny);
    }

    #[test]
    fn reads_of_protected_paths_fall_through() {
        assert!(evaluate_protected(ActionKind::FileRead, "/kalpana/core/config", &defaults()).is_none());
        assert!(evaluate_protected(ActionKind::SystemCommand, "cat /boot/config", &defaults()).is_none());
    }

    #[test]
    fn unrelated_writes_fall_through() {
        assert!(evaluate_protected(ActionKind::FileWrite, "/tmp/note.txt", &defaults()).is_none());
    }

    #[test]
    fn empty_entries_never_match() {
        let protected = vec![String::new()];
        assert!(evaluate_protected(ActionKind::FileWrite, "/tmp/note.txt", &protected).is_none());
    }
}
