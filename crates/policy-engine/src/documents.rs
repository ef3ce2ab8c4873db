//! Policy documents on disk.
//!
//! Documents are loaded once at startup. A malformed file never stops the
//! authority: it is skipped and reported as a [`PolicyLoadWarning`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use kalpana_core::types::ActionKind;

pub const DEFAULT_DOCUMENT_FILE: &str = "default.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub action: ActionKind,
    #[serde(default)]
    pub allow: bool,
    #[serde(default, rename = "except")]
    pub exceptions: Vec<String>,
    #[serde(default)]
    pub audit: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_trusted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub version: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub path: PathBuf,
    pub document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLoadWarning {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub documents: Vec<LoadedPolicy>,
    pub warnings: Vec<PolicyLoadWarning>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PolicyRule {
    fn new(action: ActionKind, allow: bool) -> Self {
        Self {
            action,
            allow,
            exceptions: Vec::new(),
            audit: false,
            allow_trusted: false,
        }
    }
}

impl PolicyDocument {
    /// The restrictive document written on first run.
    pub fn default_document() -> Self {
        let mut process_start = PolicyRule::new(ActionKind::ProcessStart, false);
        process_start.allow_trusted = true;

        let mut file_read = PolicyRule::new(ActionKind::FileRead, true);
        file_read.exceptions = vec!["/kalpana/core/*".to_string()];

        let mut file_write = PolicyRule::new(ActionKind::FileWrite, false);
        file_write.exceptions = vec!["/users/*".to_string(), "/tmp/*".to_string()];

        let mut network_connect = PolicyRule::new(ActionKind::NetworkConnect, true);
        network_connect.audit = true;

        Self {
            name: "default".to_string(),
            version: "1.0".to_string(),
            rules: vec![
                process_start,
                file_read,
                file_write,
                network_connect,
                PolicyRule::new(ActionKind::PrivilegeEscalate, false),
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read policy {}", path.display()))?;
        let document = serde_json::from_str(&contents)
            .with_context(|| format!("parse policy {}", path.display()))?;
        Ok(document)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("render policy JSON")?;
        fs::write(path, contents).with_context(|| format!("write policy {}", path.display()))?;
        Ok(())
    }

    pub fn rule_for(&self, action: ActionKind) -> Option<&PolicyRule> {
        self.rules.iter().find(|rule| rule.action == action)
    }
}

impl PolicySet {
    /// Loads every `*.json` document directly under `dir`, in file name order.
    pub fn load(dir: &Path) -> Self {
        let mut set = Self::default();

        if let Err(error) = ensure_default_document(dir) {
            set.warn(dir, format!("{error:#}"));
        }

        let files = match policy_files(dir) {
            Ok(files) => files,
            Err(error) => {
                set.warn(dir, format!("{error:#}"));
                return set;
            }
        };

        for path in files {
            match PolicyDocument::load(&path) {
                Ok(document) => {
                    info!(policy = %document.name, version = %document.version, path = %path.display(), "policy loaded");
                    set.documents.push(LoadedPolicy { path, document });
                }
                Err(error) => set.warn(&path, format!("{error:#}")),
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn warn(&mut self, path: &Path, message: String) {
        warn!(path = %path.display(), %message, "policy document skipped");
        self.warnings.push(PolicyLoadWarning {
            path: path.to_path_buf(),
            message,
        });
    }
}

fn ensure_default_document(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create policy dir {}", dir.display()))?;
    if !policy_files(dir)?.is_empty() {
        return Ok(());
    }
    let path = dir.join(DEFAULT_DOCUMENT_FILE);
    PolicyDocument::default_document().save(&path)?;
    info!(path = %path.display(), "wrote default policy");
    Ok(())
}

fn policy_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("list policy dir {}", dir.display()))?;
        let is_json = entry.path().extension().map(|ext| ext == "json").unwrap_or(false);
        if entry.file_type().is_file() && is_json {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dir_gets_default_document() {
        let dir = tempfile::tempdir().unwrap();
        let policy_dir = dir.path().join("policy");

        let set = PolicySet::load(&policy_dir);
        assert!(set.warnings.is_empty());
        assert_eq!(set.len(), 1);
        assert_eq!(set.documents[0].document, PolicyDocument::default_document());
        assert!(policy_dir.join(DEFAULT_DOCUMENT_FILE).exists());
    }

    #[test]
    fn existing_documents_suppress_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let custom = PolicyDocument {
            name: "lab".to_string(),
            version: "2".to_string(),
            rules: vec![PolicyRule::new(ActionKind::ServiceControl, false)],
        };
        custom.save(&dir.path().join("lab.json")).unwrap();

        let set = PolicySet::load(dir.path());
        assert_eq!(set.len(), 1);
        assert_eq!(set.documents[0].document.name, "lab");
        assert!(!dir.path().join(DEFAULT_DOCUMENT_FILE).exists());
    }

    #[test]
    fn malformed_documents_are_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        PolicyDocument::default_document()
            .save(&dir.path().join("a.json"))
            .unwrap();
        fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        fs::write(
            dir.path().join("c.json"),
            r#"{"name":"x","version":"1","rules":[{"action":"teleport"}]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = PolicySet::load(dir.path());
        assert_eq!(set.len(), 1);
        assert_eq!(set.warnings.len(), 2);
        assert!(set.warnings[0].path.ends_with("b.json"));
        assert!(set.warnings[1].path.ends_with("c.json"));
    }

    #[test]
    fn rule_fields_use_wire_names() {
        let rule: PolicyRule = serde_json::from_str(
            r#"{"action":"file_write","allow":false,"except":["/tmp/*"],"audit":true}"#,
        )
        .unwrap();
        assert_eq!(rule.exceptions, vec!["/tmp/*".to_string()]);
        assert!(rule.audit);
        assert!(!rule.allow_trusted);

        let document = PolicyDocument::default_document();
        assert!(document.rule_for(ActionKind::ProcessStart).unwrap().allow_trusted);
        assert!(document.rule_for(ActionKind::PackageInstall).is_none());
    }

    #[test]
    fn uncreatable_dir_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let set = PolicySet::load(&blocker.join("policy"));
        assert!(set.is_empty());
        assert!(!set.warnings.is_empty());
    }
}
