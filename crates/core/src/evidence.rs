use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodyEventType {
    Created,
    Accessed,
    Verified,
    Sealed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyEntry {
    pub event_type: CustodyEventType,
    pub actor: String,
    pub timestamp_ms: u64,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: String,
    pub item_type: String,
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
    pub hash: String,
    pub hash_algorithm: &'static str,
    pub custody_chain: Vec<CustodyEntry>,
    pub verified: bool,
    pub sealed: bool,
    pub sealed_by: Option<String>,
    pub sealed_at: Option<u64>,
    pub tags: Vec<String>,
    pub case_id: Option<String>,
    pub investigation_id: Option<String>,
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn hash_value(data: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(data).expect("evidence payload is always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

impl EvidenceItem {
    fn new(
        id: String,
        item_type: String,
        data: serde_json::Value,
        actor: &str,
        case_id: Option<String>,
        investigation_id: Option<String>,
    ) -> Self {
        let hash = hash_value(&data);
        Self {
            id,
            item_type,
            data,
            metadata: HashMap::new(),
            hash,
            hash_algorithm: "SHA-256",
            custody_chain: vec![CustodyEntry {
                event_type: CustodyEventType::Created,
                actor: actor.to_string(),
                timestamp_ms: now_ms(),
                details: None,
            }],
            verified: false,
            sealed: false,
            sealed_by: None,
            sealed_at: None,
            tags: Vec::new(),
            case_id,
            investigation_id,
        }
    }

    pub fn verify(&mut self) -> bool {
        let recomputed = hash_value(&self.data);
        let ok = recomputed == self.hash;
        self.verified = ok;
        self.custody_chain.push(CustodyEntry {
            event_type: CustodyEventType::Verified,
            actor: "system".to_string(),
            timestamp_ms: now_ms(),
            details: Some(if ok { "pass".to_string() } else { "fail".to_string() }),
        });
        ok
    }

    fn seal(&mut self, actor: &str) -> Result<()> {
        if self.sealed {
            return Err(Error::IllegalState("evidence item already sealed".into()));
        }
        self.sealed = true;
        self.sealed_by = Some(actor.to_string());
        self.sealed_at = Some(now_ms());
        self.custody_chain.push(CustodyEntry {
            event_type: CustodyEventType::Sealed,
            actor: actor.to_string(),
            timestamp_ms: now_ms(),
            details: None,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub case_id: Option<String>,
    pub investigation_id: Option<String>,
    pub item_ids: Vec<String>,
    pub package_hash: Option<String>,
    pub sealed: bool,
    pub sealed_by: Option<String>,
}

pub fn package_hash(item_hashes: &[String]) -> String {
    let mut sorted = item_hashes.to_vec();
    sorted.sort();
    let joined = sorted.join("");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub action: String,
    pub actor: Option<String>,
    pub timestamp_ms: u64,
    pub details: Option<String>,
    pub investigation_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct EvidenceStats {
    pub evidence_collected: u64,
    pub verifications_failed: u64,
    pub items_sealed: u64,
}

struct Inner {
    items: HashMap<String, EvidenceItem>,
    packages: HashMap<String, EvidencePackage>,
    audit_log: Vec<AuditEntry>,
    stats: EvidenceStats,
    next_id: u64,
}

/// Content-addressed evidence items, sealable packages, append-only
/// custody/audit logs, tamper detection.
pub struct EvidenceManager {
    inner: Mutex<Inner>,
    vault_dir: PathBuf,
    auto_verify: bool,
    events: EventBus,
}

impl EvidenceManager {
    pub fn new(config: &crate::config::VaultConfig, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: HashMap::new(),
                packages: HashMap::new(),
                audit_log: Vec::new(),
                stats: EvidenceStats::default(),
                next_id: 1,
            }),
            vault_dir: config.evidence_dir.clone(),
            auto_verify: config.auto_verify,
            events,
        }
    }

    fn audit(inner: &mut Inner, action: &str, actor: Option<&str>, details: Option<String>, investigation_id: Option<String>) {
        inner.audit_log.push(AuditEntry {
            action: action.to_string(),
            actor: actor.map(str::to_string),
            timestamp_ms: now_ms(),
            details,
            investigation_id,
        });
    }

    pub async fn collect_evidence(
        &self,
        item_type: &str,
        data: serde_json::Value,
        actor: &str,
        case_id: Option<String>,
        investigation_id: Option<String>,
    ) -> Result<EvidenceItem> {
        let mut inner = self.inner.lock().await;
        let id = format!("ev-{}", inner.next_id);
        inner.next_id += 1;
        let mut item = EvidenceItem::new(id.clone(), item_type.to_string(), data, actor, case_id, investigation_id.clone());

        self.persist_item(&item).await?;

        if self.auto_verify {
            item.verify();
        }

        inner.stats.evidence_collected += 1;
        Self::audit(&mut inner, "evidence-collected", Some(actor), Some(id.clone()), investigation_id);
        inner.items.insert(id.clone(), item.clone());
        self.events.publish(Event::EvidenceCollected { item_id: id });
        Ok(item)
    }

    async fn persist_item(&self, item: &EvidenceItem) -> Result<()> {
        let items_dir = self.vault_dir.join("items");
        tokio::fs::create_dir_all(&items_dir).await?;
        let path = items_dir.join(format!("{}.json", item.id));
        let json = serde_json::to_string_pretty(item)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Writes the (optionally filtered) audit log to its own
    /// newline-delimited JSON file, distinct from any bundled package
    /// export. Returns the written path.
    pub async fn export_audit_log(&self, investigation_id: Option<&str>) -> Result<PathBuf> {
        let entries = self.audit_log(investigation_id).await;
        tokio::fs::create_dir_all(&self.vault_dir).await?;
        let path = self.vault_dir.join(format!("audit-{}.jsonl", now_ms()));
        let mut body = String::new();
        for entry in &entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    pub async fn verify(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let ok = {
            let item = inner.items.get_mut(id).ok_or_else(|| Error::not_found("evidence", id))?;
            item.verify()
        };
        if !ok {
            inner.stats.verifications_failed += 1;
            self.events.publish(Event::VerificationFailed { item_id: id.to_string() });
        }
        Ok(ok)
    }

    pub async fn get_evidence(&self, id: &str, actor: &str, reason: &str) -> Result<EvidenceItem> {
        let mut inner = self.inner.lock().await;
        {
            let item = inner.items.get_mut(id).ok_or_else(|| Error::not_found("evidence", id))?;
            item.custody_chain.push(CustodyEntry {
                event_type: CustodyEventType::Accessed,
                actor: actor.to_string(),
                timestamp_ms: now_ms(),
                details: Some(reason.to_string()),
            });
        }
        Ok(inner.items.get(id).unwrap().clone())
    }

    pub async fn seal_item(&self, id: &str, actor: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item = inner.items.get_mut(id).ok_or_else(|| Error::not_found("evidence", id))?;
        item.seal(actor)?;
        inner.stats.items_sealed += 1;
        Ok(())
    }

    pub async fn create_package(
        &self,
        name: &str,
        description: Option<&str>,
        case_id: Option<String>,
        investigation_id: Option<String>,
    ) -> Result<EvidencePackage> {
        let mut inner = self.inner.lock().await;
        let id = format!("pkg-{}", inner.next_id);
        inner.next_id += 1;
        let package = EvidencePackage {
            id: id.clone(),
            name: name.to_string(),
            description: description.map(str::to_string),
            case_id,
            investigation_id,
            item_ids: Vec::new(),
            package_hash: None,
            sealed: false,
            sealed_by: None,
        };
        inner.packages.insert(id, package.clone());
        Ok(package)
    }

    pub async fn add_to_package(&self, package_id: &str, item_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.items.contains_key(item_id) {
            return Err(Error::not_found("evidence", item_id));
        }
        let package = inner.packages.get_mut(package_id).ok_or_else(|| Error::not_found("package", package_id))?;
        if package.sealed {
            return Err(Error::IllegalState("package is sealed".into()));
        }
        package.item_ids.push(item_id.to_string());
        Ok(())
    }

    /// Recursively seals every item in the package, then the package
    /// itself; sealed packages reject further additions.
    pub async fn seal_package(&self, package_id: &str, actor: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let item_ids = {
            let package = inner.packages.get(package_id).ok_or_else(|| Error::not_found("package", package_id))?;
            if package.sealed {
                return Err(Error::IllegalState("package already sealed".into()));
            }
            package.item_ids.clone()
        };

        let mut hashes = Vec::with_capacity(item_ids.len());
        for item_id in &item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| Error::not_found("evidence", item_id))?;
            if !item.sealed {
                item.seal(actor)?;
                inner.stats.items_sealed += 1;
            }
            hashes.push(item.hash.clone());
        }

        let hash = package_hash(&hashes);
        let package = inner.packages.get_mut(package_id).unwrap();
        package.package_hash = Some(hash);
        package.sealed = true;
        package.sealed_by = Some(actor.to_string());
        inner.stats.items_sealed += 1;
        Ok(())
    }

    pub async fn export_package(&self, package_id: &str, format: &str, include_audit: bool) -> Result<String> {
        let inner = self.inner.lock().await;
        let package = inner.packages.get(package_id).ok_or_else(|| Error::not_found("package", package_id))?;
        let items: Vec<&EvidenceItem> = package.item_ids.iter().filter_map(|id| inner.items.get(id)).collect();

        match format {
            "json" => {
                #[derive(Serialize)]
                struct Envelope<'a> {
                    package: &'a EvidencePackage,
                    items: Vec<&'a EvidenceItem>,
                    audit: Option<Vec<&'a AuditEntry>>,
                }
                let audit = include_audit.then(|| {
                    inner
                        .audit_log
                        .iter()
                        .filter(|a| a.investigation_id == package.investigation_id)
                        .collect()
                });
                Ok(serde_json::to_string_pretty(&Envelope { package, items, audit })?)
            }
            "swgde-report" => Ok(render_swgde_report(package, &items)),
            other => Err(Error::UnknownExportFormat(other.to_string())),
        }
    }

    pub async fn stats(&self) -> EvidenceStats {
        let inner = self.inner.lock().await;
        EvidenceStats {
            evidence_collected: inner.stats.evidence_collected,
            verifications_failed: inner.stats.verifications_failed,
            items_sealed: inner.stats.items_sealed,
        }
    }

    pub async fn audit_log(&self, investigation_id: Option<&str>) -> Vec<AuditEntry> {
        let inner = self.inner.lock().await;
        inner
            .audit_log
            .iter()
            .filter(|a| investigation_id.map_or(true, |id| a.investigation_id.as_deref() == Some(id)))
            .cloned()
            .collect()
    }
}

fn render_swgde_report(package: &EvidencePackage, items: &[&EvidenceItem]) -> String {
    let mut out = String::new();
    out.push_str("DIGITAL FORENSIC EXAMINATION REPORT\n");
    out.push_str("SWGDE Requirements for Report Writing Compliant\n\n");
    out.push_str(&format!("Package: {}\n", package.name));
    if let Some(case_id) = &package.case_id {
        out.push_str(&format!("Case ID: {case_id}\n"));
    }
    out.push_str("Hash Algorithm: SHA-256\n\n");
    out.push_str("Chain of Custody:\n");
    for item in items {
        out.push_str(&format!("  Item {} ({}):\n", item.id, item.item_type));
        for entry in &item.custody_chain {
            out.push_str(&format!(
                "    - {:?} by {} at {}\n",
                entry.event_type, entry.actor, entry.timestamp_ms
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;

    fn vault_config(dir: &std::path::Path) -> VaultConfig {
        VaultConfig { evidence_dir: dir.to_path_buf(), recordings_dir: dir.to_path_buf(), auto_verify: true }
    }

    #[tokio::test]
    async fn evidence_package_export_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EvidenceManager::new(&vault_config(dir.path()), EventBus::new(16));

        for kind in ["screenshot", "html_source", "network_log"] {
            let item = manager
                .collect_evidence(kind, serde_json::json!({"kind": kind}), "investigator", Some("CASE-2024-001".into()), None)
                .await
                .unwrap();
            manager.verify(&item.id).await.unwrap();
        }

        let stats = manager.stats().await;
        assert_eq!(stats.evidence_collected, 3);

        let package = manager
            .create_package("bundle", None, Some("CASE-2024-001".into()), None)
            .await
            .unwrap();
        let items = {
            let inner = manager.inner.lock().await;
            inner.items.keys().cloned().collect::<Vec<_>>()
        };
        for id in &items {
            manager.add_to_package(&package.id, id).await.unwrap();
        }
        manager.seal_package(&package.id, "Detective Smith").await.unwrap();

        let report = manager.export_package(&package.id, "swgde-report", true).await.unwrap();
        assert!(report.contains("CASE-2024-001"));
        assert!(report.contains("SHA-256"));
        assert!(report.contains("Chain of Custody"));

        let stats = manager.stats().await;
        assert_eq!(stats.items_sealed, 4);
    }

    #[tokio::test]
    async fn sealed_item_rejects_reseal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EvidenceManager::new(&vault_config(dir.path()), EventBus::new(16));
        let item = manager
            .collect_evidence("note", serde_json::json!("x"), "inv", None, None)
            .await
            .unwrap();
        manager.seal_item(&item.id, "inv").await.unwrap();
        let err = manager.seal_item(&item.id, "inv").await;
        assert!(matches!(err, Err(Error::IllegalState(_))));
    }

    #[test]
    fn package_hash_is_order_independent() {
        let a = package_hash(&["h2".into(), "h1".into()]);
        let b = package_hash(&["h1".into(), "h2".into()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn persisted_item_lands_under_items_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EvidenceManager::new(&vault_config(dir.path()), EventBus::new(16));
        let item = manager
            .collect_evidence("note", serde_json::json!("x"), "inv", None, None)
            .await
            .unwrap();
        let path = dir.path().join("items").join(format!("{}.json", item.id));
        assert!(path.exists(), "expected {path:?} to exist");
    }

    #[tokio::test]
    async fn audit_log_exports_to_its_own_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EvidenceManager::new(&vault_config(dir.path()), EventBus::new(16));
        manager
            .collect_evidence("note", serde_json::json!("x"), "inv", None, Some("INV-1".into()))
            .await
            .unwrap();
        let path = manager.export_audit_log(Some("INV-1")).await.unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(path.extension().unwrap(), "jsonl");
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["action"], "evidence-collected");
    }

    #[tokio::test]
    async fn unknown_export_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = EvidenceManager::new(&vault_config(dir.path()), EventBus::new(16));
        let package = manager.create_package("p", None, None, None).await.unwrap();
        let err = manager.export_package(&package.id, "xml", false).await;
        assert!(matches!(err, Err(Error::UnknownExportFormat(_))));
    }
}
