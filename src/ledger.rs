//! Append-only service history per site.
//!
//! Every completed action on a site (mowing, inspection, repair, ...) is
//! recorded here. The most recent maintenance-kind entry determines the
//! site's `last_maintenance_at`, which feeds risk scoring.
//!
//! Entries are persisted per site under scope `<site_id>`, key `service_log`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::FieldOpsError;
use crate::persistence::{load_json, save_json, LocalPersistence};

/// Persistence key holding a site's service log.
pub const SERVICE_LOG_KEY: &str = "service_log";

/// Window used by [`LedgerStats::recent_entries`].
const RECENT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Mowing,
    Maintenance,
    Inspection,
    Repair,
    Note,
}

impl ServiceKind {
    /// Mowing and general maintenance reset the maintenance clock.
    pub fn is_maintenance(&self) -> bool {
        matches!(self, Self::Mowing | Self::Maintenance)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mowing => "mowing",
            Self::Maintenance => "maintenance",
            Self::Inspection => "inspection",
            Self::Repair => "repair",
            Self::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mowing" => Some(Self::Mowing),
            "maintenance" => Some(Self::Maintenance),
            "inspection" => Some(Self::Inspection),
            "repair" => Some(Self::Repair),
            "note" => Some(Self::Note),
            _ => None,
        }
    }
}

/// One recorded action on a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub id: String,
    pub site_id: String,
    pub kind: ServiceKind,
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Ledger-derived view of a single site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub site_id: String,
    pub entry_count: usize,
    pub last_maintenance_at: Option<DateTime<Utc>>,
    pub last_entry: Option<ServiceEntry>,
}

/// Aggregate counts across the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_entries: usize,
    pub sites_serviced: usize,
    pub by_kind: BTreeMap<ServiceKind, usize>,
    pub by_worker: BTreeMap<String, usize>,
    /// Entries within the last 30 days before `now`.
    pub recent_entries: usize,
}

/// The operations ledger.
pub struct OperationsLedger {
    persistence: Arc<dyn LocalPersistence>,
    entries: Mutex<HashMap<String, Vec<ServiceEntry>>>,
}

impl OperationsLedger {
    pub fn new(persistence: Arc<dyn LocalPersistence>) -> Self {
        Self {
            persistence,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load the logs of the given sites from persistence, replacing any cached copy.
    ///
    /// Returns the number of entries loaded.
    pub fn load(&self, site_ids: &[String]) -> Result<usize, FieldOpsError> {
        let mut loaded = HashMap::new();
        for site_id in site_ids {
            let log: Option<Vec<ServiceEntry>> =
                load_json(self.persistence.as_ref(), site_id, SERVICE_LOG_KEY)?;
            if let Some(log) = log {
                loaded.insert(site_id.clone(), log);
            }
        }

        let count = loaded.values().map(Vec::len).sum();
        let mut entries = self.entries.lock();
        for (site_id, log) in loaded {
            entries.insert(site_id, log);
        }
        log::debug!("Ledger loaded {} entries", count);
        Ok(count)
    }

    /// Load every site log present in persistence.
    pub fn load_all(&self) -> Result<usize, FieldOpsError> {
        let scopes = self.persistence.scopes_with(SERVICE_LOG_KEY)?;
        self.load(&scopes)
    }

    /// Append an entry and persist the site's log.
    pub fn record(
        &self,
        site_id: &str,
        kind: ServiceKind,
        worker: &str,
        note: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Result<ServiceEntry, FieldOpsError> {
        if site_id.trim().is_empty() {
            return Err(FieldOpsError::NotFound(site_id.to_string()));
        }

        let entry = ServiceEntry {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            kind,
            worker: worker.trim().to_string(),
            note: note
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            occurred_at,
        };

        let snapshot = {
            let mut entries = self.entries.lock();
            let log = entries.entry(site_id.to_string()).or_default();
            log.push(entry.clone());
            log.clone()
        };

        if let Err(e) = save_json(self.persistence.as_ref(), site_id, SERVICE_LOG_KEY, &snapshot) {
            // Keep memory and disk consistent: an entry that was not stored is not recorded.
            let mut entries = self.entries.lock();
            if let Some(log) = entries.get_mut(site_id) {
                log.retain(|e| e.id != entry.id);
            }
            return Err(e);
        }

        log::info!(
            "Recorded {} for site {} by {}",
            kind.as_str(),
            site_id,
            entry.worker
        );
        Ok(entry)
    }

    /// A site's entries, newest first.
    pub fn entries_for(&self, site_id: &str) -> Vec<ServiceEntry> {
        let mut log: Vec<ServiceEntry> = self
            .entries
            .lock()
            .get(site_id)
            .cloned()
            .unwrap_or_default();
        // Later insertions win ties on the timestamp.
        log.reverse();
        log.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        log
    }

    pub fn last_maintenance(&self, site_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .get(site_id)?
            .iter()
            .filter(|e| e.kind.is_maintenance())
            .map(|e| e.occurred_at)
            .max()
    }

    pub fn site_status(&self, site_id: &str) -> SiteStatus {
        let entries = self.entries_for(site_id);
        SiteStatus {
            site_id: site_id.to_string(),
            entry_count: entries.len(),
            last_maintenance_at: entries
                .iter()
                .filter(|e| e.kind.is_maintenance())
                .map(|e| e.occurred_at)
                .max(),
            last_entry: entries.into_iter().next(),
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> LedgerStats {
        let cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
        let entries = self.entries.lock();

        let mut stats = LedgerStats::default();
        for log in entries.values() {
            if log.is_empty() {
                continue;
            }
            stats.sites_serviced += 1;
            for entry in log {
                stats.total_entries += 1;
                *stats.by_kind.entry(entry.kind).or_insert(0) += 1;
                if !entry.worker.is_empty() {
                    *stats.by_worker.entry(entry.worker.clone()).or_insert(0) += 1;
                }
                if entry.occurred_at > cutoff && entry.occurred_at <= now {
                    stats.recent_entries += 1;
                }
            }
        }
        stats
    }
}
