//! Submission deduplication.
//!
//! Retried submissions with the same requester, references, prompt and style
//! map back to the task created by the first one for as long as the entry is
//! fresh.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::styles::Style;
use crate::task::TaskRegistry;

/// Canonical form hashed into a fingerprint. Field order is fixed by the
/// struct, so the hash never depends on how the client ordered its JSON.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    requester: &'a str,
    references: Vec<&'a str>,
    prompt: &'a str,
    style: Option<&'static str>,
}

/// Deterministic hash of the fields that make two submissions identical.
pub fn fingerprint(
    requester: &str,
    source_references: &[String],
    prompt: Option<&str>,
    style: Option<Style>,
) -> String {
    let input = FingerprintInput {
        requester,
        references: source_references.iter().map(|r| r.trim()).collect(),
        prompt: prompt.map(str::trim).unwrap_or(""),
        style: style.map(|s| s.as_str()),
    };
    // Serializing a struct of strings cannot fail.
    let canonical = serde_json::to_vec(&input).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub task_id: String,
    pub recorded_at: DateTime<Utc>,
    /// False while the claiming submission has not created its task yet.
    /// An unconfirmed entry whose task is missing is in flight, not stale.
    pub confirmed: bool,
}

/// Fingerprint to task id map with a freshness window.
pub struct DedupCache {
    entries: RwLock<HashMap<String, DedupEntry>>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::hours(1)),
        }
    }

    fn is_fresh(&self, entry: &DedupEntry, now: DateTime<Utc>) -> bool {
        now - entry.recorded_at < self.ttl
    }

    /// Task id recorded for `fingerprint`, if still fresh.
    pub async fn lookup(&self, fingerprint: &str) -> Option<String> {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(fingerprint)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.task_id.clone())
    }

    pub async fn record(&self, fingerprint: &str, task_id: &str) {
        self.entries.write().await.insert(
            fingerprint.to_string(),
            DedupEntry {
                task_id: task_id.to_string(),
                recorded_at: Utc::now(),
                confirmed: true,
            },
        );
    }

    /// Atomically take `fingerprint` for `task_id` unless a fresh entry
    /// already exists.
    ///
    /// Returns the existing entry when the fingerprint is taken, so two
    /// concurrent identical submissions resolve to a single task. A new claim
    /// starts unconfirmed; call [`confirm`](Self::confirm) once the task is in
    /// the registry, or [`forget`](Self::forget) if it never will be.
    pub async fn claim(&self, fingerprint: &str, task_id: &str) -> Option<DedupEntry> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(fingerprint) {
            if self.is_fresh(existing, now) {
                return Some(existing.clone());
            }
        }
        entries.insert(
            fingerprint.to_string(),
            DedupEntry {
                task_id: task_id.to_string(),
                recorded_at: now,
                confirmed: false,
            },
        );
        None
    }

    /// Mark the claim for `task_id` as backed by a registry task.
    pub async fn confirm(&self, fingerprint: &str, task_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(fingerprint) {
            Some(entry) if entry.task_id == task_id => {
                entry.confirmed = true;
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `fingerprint` if it still points at `task_id`.
    pub async fn forget(&self, fingerprint: &str, task_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        if entries
            .get(fingerprint)
            .is_some_and(|entry| entry.task_id == task_id)
        {
            entries.remove(fingerprint);
            return true;
        }
        false
    }

    /// Drop entries that are past the TTL, and confirmed entries whose task no
    /// longer exists. Fresh unconfirmed claims are left to their submitter.
    /// Returns the number removed.
    pub async fn sweep(&self, registry: &TaskRegistry) -> usize {
        let now = Utc::now();
        let snapshot: Vec<(String, DedupEntry)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(fp, entry)| (fp.clone(), entry.clone()))
            .collect();

        let mut doomed = Vec::new();
        for (fp, entry) in snapshot {
            let gone = entry.confirmed && registry.get(&entry.task_id).await.is_none();
            if !self.is_fresh(&entry, now) || gone {
                doomed.push((fp, entry));
            }
        }

        if doomed.is_empty() {
            return 0;
        }

        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for (fp, entry) in doomed {
            // Skip entries re-claimed since the snapshot.
            if entries.get(&fp) == Some(&entry) {
                entries.remove(&fp);
                removed += 1;
            }
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    #[cfg(test)]
    async fn backdate(&self, fingerprint: &str, by: Duration) {
        if let Some(entry) = self.entries.write().await.get_mut(fingerprint) {
            entry.recorded_at -= by;
        }
    }
}
