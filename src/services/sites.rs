// Sites service: read model and site commands.
// Merges the sync mirror with ledger-derived status and risk, and turns
// crew actions into ledger entries plus site edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FieldOpsError;
use crate::geo;
use crate::ledger::{OperationsLedger, ServiceEntry, ServiceKind};
use crate::risk::{self, RiskAssessment, RiskLevel};
use crate::state::AppState;
use crate::sync::WriteOutcome;
use crate::types::{Category, District, Position, Site, SitePatch};

/// A site as shown to the crew.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteView {
    #[serde(flatten)]
    pub site: Site,
    pub risk: RiskAssessment,
    /// Local edits not yet confirmed by the remote store.
    pub unconfirmed: bool,
    /// A local edit was refused or gave up retrying; the value shown was
    /// not saved.
    pub unsaved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Near {
    pub center: Position,
    pub radius_km: f64,
}

/// Read-model filter. Every criterion left empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteFilter {
    #[serde(default)]
    pub district: Option<District>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub include_archived: bool,
    /// Case-insensitive match on name, id or notes.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub near: Option<Near>,
}

impl SiteFilter {
    pub fn matches(&self, view: &SiteView) -> bool {
        let site = &view.site;
        if site.archived && !self.include_archived {
            return false;
        }
        if self.district.is_some_and(|d| d != site.district) {
            return false;
        }
        if self.category.is_some_and(|c| c != site.category) {
            return false;
        }
        if self.risk_level.is_some_and(|l| l != view.risk.level) {
            return false;
        }
        if self.completed.is_some_and(|c| c != site.is_completed) {
            return false;
        }
        if let Some(ref text) = self.text {
            let needle = text.trim().to_lowercase();
            if !needle.is_empty() {
                let hit = site.name.to_lowercase().contains(&needle)
                    || site.id.to_lowercase().contains(&needle)
                    || site
                        .notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle));
                if !hit {
                    return false;
                }
            }
        }
        if let Some(near) = self.near {
            if geo::distance_km(near.center, site.position) > near.radius_km {
                return false;
            }
        }
        true
    }
}

/// Fold ledger history into the sites: the newer of the site's own
/// `last_maintenance_at` and the ledger's last maintenance wins.
pub fn with_ledger_status(sites: &[Site], ledger: &OperationsLedger) -> Vec<Site> {
    sites
        .iter()
        .map(|site| {
            let mut site = site.clone();
            if let Some(logged) = ledger.last_maintenance(&site.id) {
                if site.last_maintenance_at.map_or(true, |own| logged > own) {
                    site.last_maintenance_at = Some(logged);
                }
            }
            site
        })
        .collect()
}

fn views(state: &AppState, filter: &SiteFilter, now: DateTime<Utc>) -> Vec<SiteView> {
    with_ledger_status(&state.sync.sites(), &state.ledger)
        .into_iter()
        .map(|site| {
            let risk = risk::assess(&site, now);
            let unconfirmed = state.sync.is_unconfirmed(&site.id);
            let unsaved = state.sync.has_unsaved_change(&site.id);
            let distance_km = filter
                .near
                .map(|near| geo::distance_km(near.center, site.position));
            SiteView {
                site,
                risk,
                unconfirmed,
                unsaved,
                distance_km,
            }
        })
        .filter(|view| filter.matches(view))
        .collect()
}

/// Filtered sites ordered by name.
pub fn current_sites(state: &AppState, filter: &SiteFilter, now: DateTime<Utc>) -> Vec<SiteView> {
    let mut sites = views(state, filter, now);
    sites.sort_by(|a, b| {
        a.site
            .name
            .to_lowercase()
            .cmp(&b.site.name.to_lowercase())
            .then_with(|| a.site.id.cmp(&b.site.id))
    });
    sites
}

/// Filtered sites, most urgent first (ties by name).
pub fn prioritized_sites(
    state: &AppState,
    filter: &SiteFilter,
    now: DateTime<Utc>,
) -> Vec<SiteView> {
    let mut sites = current_sites(state, filter, now);
    sites.sort_by(|a, b| b.risk.score.cmp(&a.risk.score));
    sites
}

/// Flip a site's completion flag.
pub async fn toggle_completion(
    state: &AppState,
    site_id: &str,
) -> Result<WriteOutcome, FieldOpsError> {
    let site = state
        .sync
        .site(site_id)
        .ok_or_else(|| FieldOpsError::NotFound(site_id.to_string()))?;
    state
        .sync
        .apply_local_edit(site_id, SitePatch::completion(!site.is_completed))
        .await
}

/// Record maintenance done now: a ledger entry plus a site edit marking it
/// completed and maintained.
pub async fn record_maintenance(
    state: &AppState,
    site_id: &str,
    worker: &str,
    note: Option<&str>,
) -> Result<(ServiceEntry, WriteOutcome), FieldOpsError> {
    record_service(state, site_id, ServiceKind::Maintenance, worker, note).await
}

/// Record any service action. Only maintenance kinds touch the site itself.
///
/// The ledger entry is kept even if the site edit is refused remotely.
pub async fn record_service(
    state: &AppState,
    site_id: &str,
    kind: ServiceKind,
    worker: &str,
    note: Option<&str>,
) -> Result<(ServiceEntry, WriteOutcome), FieldOpsError> {
    if state.sync.site(site_id).is_none() {
        return Err(FieldOpsError::NotFound(site_id.to_string()));
    }

    let entry = state
        .ledger
        .record(site_id, kind, worker, note, Utc::now())?;

    let outcome = if kind.is_maintenance() {
        state
            .sync
            .apply_local_edit(site_id, SitePatch::maintained(entry.occurred_at))
            .await?
    } else {
        WriteOutcome::Confirmed
    };
    Ok((entry, outcome))
}

/// Replace (or with an empty string, clear) a site's note.
pub async fn set_note(
    state: &AppState,
    site_id: &str,
    note: &str,
) -> Result<WriteOutcome, FieldOpsError> {
    state
        .sync
        .apply_local_edit(site_id, SitePatch::note(note))
        .await
}
