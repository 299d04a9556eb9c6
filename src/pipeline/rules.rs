//! Versioned persistence for vendor and template shield rules.
//!
//! Rules are never updated or deleted in place. Saving a rule for a scope
//! appends a new version row and marks the previous active version as
//! superseded, keeping the full audit trail (actor, timestamp, version
//! chain) intact. Tenant and store scoping keeps one customer's rules out
//! of another's documents.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::CleanupShield;

/// What a rule is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleScope {
    Vendor { vendor_id: String },
    Template { template_id: String },
}

/// One version row of a shield rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldRule {
    pub id: String,
    pub tenant_id: String,
    /// Optional store-level narrowing within a tenant.
    pub store_id: Option<String>,
    pub scope: RuleScope,
    pub shield: CleanupShield,
    pub version: u32,
    pub active: bool,
    /// Id of the version that replaced this one, if any.
    pub superseded_by: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence contract for shield rules. The production deployment backs
/// this with the relational store; tests and the CLI use the file store.
pub trait ShieldRuleStore: Send + Sync {
    /// Append a new version for the scope, superseding any active one.
    fn save_rule(
        &self,
        tenant_id: &str,
        store_id: Option<&str>,
        scope: RuleScope,
        shield: CleanupShield,
        created_by: &str,
    ) -> Result<ShieldRule>;

    /// Active rules for a tenant/store, optionally narrowed to one scope.
    fn active_rules(
        &self,
        tenant_id: &str,
        store_id: Option<&str>,
        scope: Option<&RuleScope>,
    ) -> Result<Vec<ShieldRule>>;

    /// Every version ever saved for a scope, oldest first.
    fn history(&self, tenant_id: &str, scope: &RuleScope) -> Result<Vec<ShieldRule>>;
}

/// JSON-file-backed rule store.
pub struct FileShieldRuleStore {
    path: PathBuf,
    rules: Mutex<Vec<ShieldRule>>,
}

impl FileShieldRuleStore {
    pub fn open(path: &Path) -> Result<Self> {
        let rules = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            rules: Mutex::new(rules),
        })
    }

    /// Rule mutations persist before returning, so a poisoned lock still
    /// holds a consistent list and can be recovered.
    fn rules(&self) -> std::sync::MutexGuard<'_, Vec<ShieldRule>> {
        self.rules.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, rules: &[ShieldRule]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(rules)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl ShieldRuleStore for FileShieldRuleStore {
    fn save_rule(
        &self,
        tenant_id: &str,
        store_id: Option<&str>,
        scope: RuleScope,
        shield: CleanupShield,
        created_by: &str,
    ) -> Result<ShieldRule> {
        let mut rules = self.rules();

        let new_id = uuid::Uuid::new_v4().to_string();
        let prior_version = rules
            .iter_mut()
            .filter(|r| r.tenant_id == tenant_id && r.scope == scope && r.active)
            .map(|r| {
                // Archive, never delete.
                r.active = false;
                r.superseded_by = Some(new_id.clone());
                r.version
            })
            .max()
            .unwrap_or(0);

        let rule = ShieldRule {
            id: new_id,
            tenant_id: tenant_id.to_string(),
            store_id: store_id.map(|s| s.to_string()),
            scope,
            shield,
            version: prior_version + 1,
            active: true,
            superseded_by: None,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };
        rules.push(rule.clone());
        self.persist(&rules)?;
        tracing::info!(
            rule = %rule.id,
            version = rule.version,
            tenant = tenant_id,
            "saved shield rule version"
        );
        Ok(rule)
    }

    fn active_rules(
        &self,
        tenant_id: &str,
        store_id: Option<&str>,
        scope: Option<&RuleScope>,
    ) -> Result<Vec<ShieldRule>> {
        let rules = self.rules();
        Ok(rules
            .iter()
            .filter(|r| r.active && r.tenant_id == tenant_id)
            .filter(|r| match (&r.store_id, store_id) {
                // Tenant-wide rules apply to every store.
                (None, _) => true,
                (Some(rule_store), Some(query_store)) => rule_store == query_store,
                (Some(_), None) => false,
            })
            .filter(|r| scope.map_or(true, |s| &r.scope == s))
            .cloned()
            .collect())
    }

    fn history(&self, tenant_id: &str, scope: &RuleScope) -> Result<Vec<ShieldRule>> {
        let rules = self.rules();
        let mut versions: Vec<ShieldRule> = rules
            .iter()
            .filter(|r| r.tenant_id == tenant_id && &r.scope == scope)
            .cloned()
            .collect();
        if versions.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no rule versions for {:?}",
                scope
            )));
        }
        versions.sort_by_key(|r| r.version);
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedBox, ShieldType};
    use tempfile::tempdir;

    fn shield() -> CleanupShield {
        CleanupShield::auto_detected(
            ShieldType::VendorSpecific,
            NormalizedBox::new(0.0, 0.0, 0.2, 0.1),
            0.9,
        )
    }

    fn vendor_scope(id: &str) -> RuleScope {
        RuleScope::Vendor {
            vendor_id: id.to_string(),
        }
    }

    #[test]
    fn test_save_supersedes_prior_version() {
        let dir = tempdir().unwrap();
        let store = FileShieldRuleStore::open(&dir.path().join("rules.json")).unwrap();

        let v1 = store
            .save_rule("t1", None, vendor_scope("acme"), shield(), "ops")
            .unwrap();
        let v2 = store
            .save_rule("t1", None, vendor_scope("acme"), shield(), "ops")
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);

        let history = store.history("t1", &vendor_scope("acme")).unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].active);
        assert_eq!(history[0].superseded_by.as_deref(), Some(v2.id.as_str()));
        assert!(history[1].active);
    }

    #[test]
    fn test_active_rules_scoped_by_tenant() {
        let dir = tempdir().unwrap();
        let store = FileShieldRuleStore::open(&dir.path().join("rules.json")).unwrap();
        store
            .save_rule("t1", None, vendor_scope("acme"), shield(), "ops")
            .unwrap();
        store
            .save_rule("t2", None, vendor_scope("acme"), shield(), "ops")
            .unwrap();

        let t1 = store.active_rules("t1", None, None).unwrap();
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].tenant_id, "t1");
    }

    #[test]
    fn test_store_scoping() {
        let dir = tempdir().unwrap();
        let store = FileShieldRuleStore::open(&dir.path().join("rules.json")).unwrap();
        store
            .save_rule("t1", Some("store-9"), vendor_scope("acme"), shield(), "ops")
            .unwrap();
        store
            .save_rule("t1", None, vendor_scope("globex"), shield(), "ops")
            .unwrap();

        // Store-specific query sees both the store rule and tenant-wide rules.
        assert_eq!(store.active_rules("t1", Some("store-9"), None).unwrap().len(), 2);
        // A different store sees only tenant-wide rules.
        assert_eq!(store.active_rules("t1", Some("store-2"), None).unwrap().len(), 1);
    }

    #[test]
    fn test_versions_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        {
            let store = FileShieldRuleStore::open(&path).unwrap();
            store
                .save_rule("t1", None, vendor_scope("acme"), shield(), "ops")
                .unwrap();
        }
        let store = FileShieldRuleStore::open(&path).unwrap();
        let history = store.history("t1", &vendor_scope("acme")).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_history_for_unknown_scope_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileShieldRuleStore::open(&dir.path().join("rules.json")).unwrap();
        let err = store.history("t1", &vendor_scope("nobody")).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
