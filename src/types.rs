use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration loaded from `~/.fieldops/config.json`.
///
/// Every section is optional; a missing file or a partial file falls back to
/// the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub route: RouteTuning,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    /// Override for the local SQLite file (defaults to `~/.fieldops/fieldops.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

/// Tunable cost parameters for route statistics.
///
/// These are planning assumptions for a mowing crew, not measured truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTuning {
    /// Average field-travel speed between sites, km/h.
    #[serde(default = "default_average_speed_kmh")]
    pub average_speed_kmh: f64,
    /// Servicing throughput, m² per hour.
    #[serde(default = "default_throughput_sqm_per_hour")]
    pub throughput_sqm_per_hour: f64,
    /// Consumption rate applied to total time, litres per hour.
    #[serde(default = "default_fuel_liters_per_hour")]
    pub fuel_liters_per_hour: f64,
}

fn default_average_speed_kmh() -> f64 {
    8.0
}

fn default_throughput_sqm_per_hour() -> f64 {
    4000.0
}

fn default_fuel_liters_per_hour() -> f64 {
    3.5
}

impl Default for RouteTuning {
    fn default() -> Self {
        Self {
            average_speed_kmh: default_average_speed_kmh(),
            throughput_sqm_per_hour: default_throughput_sqm_per_hour(),
            fuel_liters_per_hour: default_fuel_liters_per_hour(),
        }
    }
}

/// Remote synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Name of the remote collection holding the site documents.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Dispatch attempts before a pending write becomes `Failed`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// A subscription with no initial snapshot after this long counts as disconnected.
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
}

fn default_collection() -> String {
    "areals".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_watchdog_secs() -> u64 {
    15
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            watchdog_secs: default_watchdog_secs(),
        }
    }
}

/// Live-navigation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationConfig {
    #[serde(default = "default_position_timeout_secs")]
    pub position_timeout_secs: u64,
    /// Distance under which the crew counts as arrived at the target, metres.
    #[serde(default = "default_arrival_radius_m")]
    pub arrival_radius_m: f64,
}

fn default_position_timeout_secs() -> u64 {
    10
}

fn default_arrival_radius_m() -> f64 {
    50.0
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            position_timeout_secs: default_position_timeout_secs(),
            arrival_radius_m: default_arrival_radius_m(),
        }
    }
}

// =============================================================================
// Sites
// =============================================================================

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Administrative district a site belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum District {
    #[serde(rename = "CB")]
    CeskeBudejovice,
    #[serde(rename = "CK")]
    CeskyKrumlov,
    #[serde(rename = "JH")]
    JindrichuvHradec,
    #[serde(rename = "PI")]
    Pisek,
    #[serde(rename = "PT")]
    Prachatice,
    #[serde(rename = "ST")]
    Strakonice,
}

impl District {
    pub const ALL: [District; 6] = [
        District::CeskeBudejovice,
        District::CeskyKrumlov,
        District::JindrichuvHradec,
        District::Pisek,
        District::Prachatice,
        District::Strakonice,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::CeskeBudejovice => "CB",
            Self::CeskyKrumlov => "CK",
            Self::JindrichuvHradec => "JH",
            Self::Pisek => "PI",
            Self::Prachatice => "PT",
            Self::Strakonice => "ST",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.code().eq_ignore_ascii_case(code))
    }
}

impl fmt::Display for District {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Administrative risk classification ("I." / "II." / none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(alias = "I.", alias = "I")]
    HighRisk,
    #[serde(alias = "II.", alias = "II")]
    MediumRisk,
    #[default]
    Uncategorized,
}

impl Category {
    /// Parse the legacy label; anything unrecognised is uncategorized.
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "I." | "I" | "HighRisk" => Self::HighRisk,
            "II." | "II" | "MediumRisk" => Self::MediumRisk,
            _ => Self::Uncategorized,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HighRisk => "I.",
            Self::MediumRisk => "II.",
            Self::Uncategorized => "-",
        }
    }
}

/// A fixed water-infrastructure site ("areal").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub district: District,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub area_sqm: f64,
    #[serde(default)]
    pub fence_length_m: f64,
    pub position: Position,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_maintenance_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

/// One mutable field of a [`Site`]. Patches and conflict handling work per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteField {
    Name,
    District,
    Category,
    AreaSqm,
    FenceLengthM,
    Position,
    IsCompleted,
    LastMaintenanceAt,
    Notes,
    Archived,
}

impl SiteField {
    pub const ALL: [SiteField; 10] = [
        SiteField::Name,
        SiteField::District,
        SiteField::Category,
        SiteField::AreaSqm,
        SiteField::FenceLengthM,
        SiteField::Position,
        SiteField::IsCompleted,
        SiteField::LastMaintenanceAt,
        SiteField::Notes,
        SiteField::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::District => "district",
            Self::Category => "category",
            Self::AreaSqm => "area_sqm",
            Self::FenceLengthM => "fence_length_m",
            Self::Position => "position",
            Self::IsCompleted => "is_completed",
            Self::LastMaintenanceAt => "last_maintenance_at",
            Self::Notes => "notes",
            Self::Archived => "archived",
        }
    }

    /// Whether two versions of a site disagree on this field.
    pub fn differs(self, a: &Site, b: &Site) -> bool {
        match self {
            Self::Name => a.name != b.name,
            Self::District => a.district != b.district,
            Self::Category => a.category != b.category,
            Self::AreaSqm => a.area_sqm != b.area_sqm,
            Self::FenceLengthM => a.fence_length_m != b.fence_length_m,
            Self::Position => a.position != b.position,
            Self::IsCompleted => a.is_completed != b.is_completed,
            Self::LastMaintenanceAt => a.last_maintenance_at != b.last_maintenance_at,
            Self::Notes => a.notes != b.notes,
            Self::Archived => a.archived != b.archived,
        }
    }

    /// Copy this field's value from `from` into `to`.
    pub fn copy(self, from: &Site, to: &mut Site) {
        match self {
            Self::Name => to.name = from.name.clone(),
            Self::District => to.district = from.district,
            Self::Category => to.category = from.category,
            Self::AreaSqm => to.area_sqm = from.area_sqm,
            Self::FenceLengthM => to.fence_length_m = from.fence_length_m,
            Self::Position => to.position = from.position,
            Self::IsCompleted => to.is_completed = from.is_completed,
            Self::LastMaintenanceAt => to.last_maintenance_at = from.last_maintenance_at,
            Self::Notes => to.notes = from.notes.clone(),
            Self::Archived => to.archived = from.archived,
        }
    }
}

/// A field-named partial update of a [`Site`].
///
/// `notes: Some("")` clears the note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<District>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fence_length_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_maintenance_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl SitePatch {
    pub fn completion(done: bool) -> Self {
        Self {
            is_completed: Some(done),
            ..Default::default()
        }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self {
            notes: Some(text.into()),
            ..Default::default()
        }
    }

    /// Maintenance was performed at `at`: marks the site completed as well.
    pub fn maintained(at: DateTime<Utc>) -> Self {
        Self {
            is_completed: Some(true),
            last_maintenance_at: Some(at),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Fields this patch sets.
    pub fn fields(&self) -> Vec<SiteField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(SiteField::Name);
        }
        if self.district.is_some() {
            fields.push(SiteField::District);
        }
        if self.category.is_some() {
            fields.push(SiteField::Category);
        }
        if self.area_sqm.is_some() {
            fields.push(SiteField::AreaSqm);
        }
        if self.fence_length_m.is_some() {
            fields.push(SiteField::FenceLengthM);
        }
        if self.position.is_some() {
            fields.push(SiteField::Position);
        }
        if self.is_completed.is_some() {
            fields.push(SiteField::IsCompleted);
        }
        if self.last_maintenance_at.is_some() {
            fields.push(SiteField::LastMaintenanceAt);
        }
        if self.notes.is_some() {
            fields.push(SiteField::Notes);
        }
        if self.archived.is_some() {
            fields.push(SiteField::Archived);
        }
        fields
    }

    pub fn apply_to(&self, site: &mut Site) {
        if let Some(ref name) = self.name {
            site.name = name.clone();
        }
        if let Some(district) = self.district {
            site.district = district;
        }
        if let Some(category) = self.category {
            site.category = category;
        }
        if let Some(area) = self.area_sqm {
            site.area_sqm = area.max(0.0);
        }
        if let Some(fence) = self.fence_length_m {
            site.fence_length_m = fence.max(0.0);
        }
        if let Some(position) = self.position {
            site.position = position;
        }
        if let Some(done) = self.is_completed {
            site.is_completed = done;
        }
        if let Some(at) = self.last_maintenance_at {
            site.last_maintenance_at = Some(at);
        }
        if let Some(ref notes) = self.notes {
            site.notes = normalize_notes(notes);
        }
        if let Some(archived) = self.archived {
            site.archived = archived;
        }
    }

    /// True when `site` already holds every value this patch sets.
    pub fn matches(&self, site: &Site) -> bool {
        let mut patched = site.clone();
        self.apply_to(&mut patched);
        self.fields().into_iter().all(|f| !f.differs(&patched, site))
    }

    /// Validate values before they are applied or queued.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(area) = self.area_sqm {
            if !area.is_finite() || area < 0.0 {
                return Err(format!("area_sqm must be non-negative, got {}", area));
            }
        }
        if let Some(fence) = self.fence_length_m {
            if !fence.is_finite() || fence < 0.0 {
                return Err(format!("fence_length_m must be non-negative, got {}", fence));
            }
        }
        if let Some(position) = self.position {
            if !position.is_valid() {
                return Err(format!(
                    "position out of range: {}, {}",
                    position.lat, position.lng
                ));
            }
        }
        Ok(())
    }
}

fn normalize_notes(notes: &str) -> Option<String> {
    let trimmed = notes.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
