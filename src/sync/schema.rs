//! Boundary adapter between remote documents and [`Site`].
//!
//! The canonical schema is snake_case (`area_sqm`, `is_completed`, ...).
//! Older documents in the collection still carry the legacy field names
//! (`nazev`, `okres`, `kategorie`, `vymera`, `oploceni`, `lat`/`lng`,
//! `hotovo`, `posledni_udrzba`, `poznamka`). Both are read here; only the
//! canonical schema is ever written. When a document carries both names
//! for a field, the canonical one wins.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::error::FieldOpsError;
use crate::types::{Category, District, Position, Site, SitePatch};

fn invalid(id: &str, reason: impl Into<String>) -> FieldOpsError {
    FieldOpsError::InvalidDocument {
        id: id.to_string(),
        reason: reason.into(),
    }
}

/// First present, non-null value among `keys`.
fn field<'a>(doc: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| !v.is_null())
}

/// Numbers may arrive as JSON numbers or as strings with a decimal comma.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| if c == ',' { '.' } else { c })
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "ano" | "1" => Some(true),
            "false" | "ne" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339 timestamps, or bare dates (taken as midnight UTC).
fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

fn position(id: &str, doc: &Map<String, Value>) -> Result<Position, FieldOpsError> {
    let (lat, lng) = match doc.get("position").and_then(Value::as_object) {
        Some(pos) => (
            pos.get("lat").and_then(as_f64),
            pos.get("lng").and_then(as_f64),
        ),
        None => (
            doc.get("lat").and_then(as_f64),
            doc.get("lng").and_then(as_f64),
        ),
    };

    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            let position = Position::new(lat, lng);
            if position.is_valid() {
                Ok(position)
            } else {
                Err(invalid(id, format!("position out of range: {}, {}", lat, lng)))
            }
        }
        _ => Err(invalid(id, "missing coordinates")),
    }
}

/// Read a remote document into a [`Site`].
pub fn normalize_document(id: &str, doc: &Value) -> Result<Site, FieldOpsError> {
    let doc = doc
        .as_object()
        .ok_or_else(|| invalid(id, "document is not an object"))?;

    let district_code = field(doc, &["district", "okres"])
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(id, "missing district"))?;
    let district = District::from_code(district_code)
        .ok_or_else(|| invalid(id, format!("unknown district '{}'", district_code)))?;

    let name = field(doc, &["name", "nazev"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(id)
        .to_string();

    let category = field(doc, &["category", "kategorie"])
        .and_then(Value::as_str)
        .map(Category::from_label)
        .unwrap_or_default();

    let area_sqm = field(doc, &["area_sqm", "vymera"])
        .and_then(as_f64)
        .unwrap_or(0.0)
        .max(0.0);
    let fence_length_m = field(doc, &["fence_length_m", "oploceni"])
        .and_then(as_f64)
        .unwrap_or(0.0)
        .max(0.0);

    let is_completed = field(doc, &["is_completed", "hotovo"])
        .and_then(as_bool)
        .unwrap_or(false);
    let last_maintenance_at =
        field(doc, &["last_maintenance_at", "posledni_udrzba"]).and_then(as_timestamp);

    let notes = field(doc, &["notes", "poznamka"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let archived = doc.get("archived").and_then(as_bool).unwrap_or(false);

    Ok(Site {
        id: id.to_string(),
        name,
        district,
        category,
        area_sqm,
        fence_length_m,
        position: position(id, doc)?,
        is_completed,
        last_maintenance_at,
        notes,
        archived,
    })
}

/// Canonical wire form of a patch.
pub fn encode_patch(patch: &SitePatch) -> Result<Value, FieldOpsError> {
    Ok(serde_json::to_value(patch)?)
}

/// Canonical document for a site (the id is the document key, not a field).
pub fn encode_site(site: &Site) -> Result<Value, FieldOpsError> {
    let mut value = serde_json::to_value(site)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("id");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_legacy_document() {
        let doc = json!({
            "nazev": "Amerika II",
            "okres": "PI",
            "kategorie": "II.",
            "vymera": 3303,
            "oploceni": "210,5",
            "lat": 49.305131,
            "lng": 14.166126,
            "hotovo": false,
            "posledni_udrzba": "2024-05-14",
            "poznamka": "  klic u hraze  "
        });
        let site = normalize_document("pi-amerika-ii", &doc).unwrap();
        assert_eq!(site.name, "Amerika II");
        assert_eq!(site.district, District::Pisek);
        assert_eq!(site.category, Category::MediumRisk);
        assert_eq!(site.area_sqm, 3303.0);
        assert_eq!(site.fence_length_m, 210.5);
        assert_eq!(site.position, Position::new(49.305131, 14.166126));
        assert_eq!(
            site.last_maintenance_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap())
        );
        assert_eq!(site.notes.as_deref(), Some("klic u hraze"));
    }

    #[test]
    fn test_canonical_wins_over_legacy() {
        let doc = json!({
            "name": "Drahonice",
            "district": "ST",
            "position": {"lat": 49.202902, "lng": 14.063713},
            "hotovo": false,
            "is_completed": true
        });
        let site = normalize_document("st-drahonice", &doc).unwrap();
        assert!(site.is_completed);
        assert_eq!(site.category, Category::Uncategorized);
    }

    #[test]
    fn test_rejects_bad_documents() {
        let no_coords = json!({"name": "X", "district": "CB"});
        assert!(matches!(
            normalize_document("x", &no_coords),
            Err(FieldOpsError::InvalidDocument { .. })
        ));

        let bad_district = json!({"district": "ZZ", "lat": 49.0, "lng": 14.0});
        assert!(normalize_document("x", &bad_district).is_err());

        assert!(normalize_document("x", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_patch_encodes_canonical_names_only() {
        let encoded = encode_patch(&SitePatch::completion(true)).unwrap();
        assert_eq!(encoded, json!({"is_completed": true}));
    }

    #[test]
    fn test_encoded_site_reads_back() {
        let doc = json!({"name": "A", "district": "CK", "category": "I.", "lat": 48.8, "lng": 14.3});
        let site = normalize_document("ck-a", &doc).unwrap();
        let encoded = encode_site(&site).unwrap();
        assert!(encoded.get("id").is_none());
        assert_eq!(normalize_document("ck-a", &encoded).unwrap(), site);
    }
}
