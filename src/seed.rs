//! Embedded site dataset.
//!
//! Loaded once into an empty mirror so the app is usable before the first
//! remote snapshot arrives. The file uses the legacy document schema and
//! goes through the same adapter as remote documents.

use crate::error::FieldOpsError;
use crate::sync::schema::normalize_document;
use crate::types::Site;

const AREALS_JSON: &str = include_str!("../data/areals.json");

/// Parse the embedded dataset. Invalid entries are skipped with a warning.
pub fn seed_sites() -> Result<Vec<Site>, FieldOpsError> {
    parse_sites(AREALS_JSON)
}

/// Parse a JSON array of site documents, each carrying its `id`.
pub fn parse_sites(json: &str) -> Result<Vec<Site>, FieldOpsError> {
    let documents: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| FieldOpsError::Config(format!("Invalid site dataset: {}", e)))?;

    let mut sites = Vec::with_capacity(documents.len());
    for doc in &documents {
        let Some(id) = doc.get("id").and_then(|v| v.as_str()) else {
            log::warn!("Skipping site document without id");
            continue;
        };
        match normalize_document(id, doc) {
            Ok(site) => sites.push(site),
            Err(e) => log::warn!("Skipping seed site {}: {}", id, e),
        }
    }
    Ok(sites)
}

/// Seed documents keyed by id, for populating an in-process remote store.
pub fn seed_documents() -> Result<Vec<(String, serde_json::Value)>, FieldOpsError> {
    seed_sites()?
        .iter()
        .map(|site| Ok((site.id.clone(), crate::sync::schema::encode_site(site)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_km;
    use crate::types::{Category, District};

    #[test]
    fn test_embedded_dataset_parses() {
        let sites = seed_sites().unwrap();
        assert_eq!(sites.len(), 13);
        for district in District::ALL {
            assert!(
                sites.iter().any(|s| s.district == district),
                "no site in {}",
                district
            );
        }

        let plav = sites.iter().find(|s| s.id == "cb-uv-plav").unwrap();
        assert_eq!(plav.category, Category::HighRisk);
        assert!(plav.last_maintenance_at.is_none());
    }

    #[test]
    fn test_reference_pair_distance() {
        let sites = seed_sites().unwrap();
        let amerika = sites.iter().find(|s| s.id == "pi-amerika-ii").unwrap();
        let drahonice = sites.iter().find(|s| s.id == "st-drahonice").unwrap();
        let d = distance_km(amerika.position, drahonice.position);
        assert!((d - 13.7).abs() < 0.5, "distance {}", d);
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let json = r#"[
            {"id": "ok", "okres": "CB", "lat": 49.0, "lng": 14.0},
            {"okres": "CB", "lat": 49.0, "lng": 14.0},
            {"id": "no-coords", "okres": "CB"}
        ]"#;
        let sites = parse_sites(json).unwrap();
        assert_eq!(sites.len(), 1);
        assert!(parse_sites("{").is_err());
    }

    #[test]
    fn test_seed_documents_are_canonical() {
        let docs = seed_documents().unwrap();
        let (_, plav) = docs.iter().find(|(id, _)| id == "cb-uv-plav").unwrap();
        assert!(plav.get("area_sqm").is_some());
        assert!(plav.get("vymera").is_none());
    }
}
