//! Maintenance-urgency risk scoring for sites.
//!
//! Additive model capped at 100:
//! - Category: I. +40, II. +20, uncategorized +0
//! - Maintenance age: no record +50, >12 months +40, (6,12] +25, (3,6] +10, else +0
//! - Not completed this cycle: +20
//!
//! Missing maintenance data counts as the worst case, never as zero risk.
//! Everything here is pure: `now` is always passed in.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Category, Site};

pub const MAX_SCORE: u8 = 100;

const HIGH_RISK_POINTS: u8 = 40;
const MEDIUM_RISK_POINTS: u8 = 20;

const NO_RECORD_POINTS: u8 = 50;
const OVER_YEAR_POINTS: u8 = 40;
const OVER_HALF_YEAR_POINTS: u8 = 25;
const OVER_QUARTER_POINTS: u8 = 10;

const INCOMPLETE_POINTS: u8 = 20;

const CRITICAL_THRESHOLD: u8 = 70;
const HIGH_THRESHOLD: u8 = 50;
const MEDIUM_THRESHOLD: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Score with its per-factor breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub category_points: u8,
    pub maintenance_points: u8,
    pub completion_points: u8,
    /// Whole days since last maintenance, `None` when never maintained.
    pub days_since_maintenance: Option<i64>,
}

pub fn level_for_score(score: u8) -> RiskLevel {
    if score >= CRITICAL_THRESHOLD {
        RiskLevel::Critical
    } else if score >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn category_points(category: Category) -> u8 {
    match category {
        Category::HighRisk => HIGH_RISK_POINTS,
        Category::MediumRisk => MEDIUM_RISK_POINTS,
        Category::Uncategorized => 0,
    }
}

/// Points for time since last maintenance, measured in calendar months.
fn maintenance_points(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    let last = match last {
        Some(t) => t,
        None => return NO_RECORD_POINTS,
    };
    let months_ago = |m: u32| now.checked_sub_months(Months::new(m));

    if months_ago(12).is_some_and(|cutoff| last < cutoff) {
        OVER_YEAR_POINTS
    } else if months_ago(6).is_some_and(|cutoff| last < cutoff) {
        OVER_HALF_YEAR_POINTS
    } else if months_ago(3).is_some_and(|cutoff| last < cutoff) {
        OVER_QUARTER_POINTS
    } else {
        0
    }
}

/// Score from the raw inputs.
pub fn score_parts(
    category: Category,
    last_maintenance_at: Option<DateTime<Utc>>,
    is_completed: bool,
    now: DateTime<Utc>,
) -> u8 {
    let completion = if is_completed { 0 } else { INCOMPLETE_POINTS };
    let total = category_points(category) as u16
        + maintenance_points(last_maintenance_at, now) as u16
        + completion as u16;
    total.min(MAX_SCORE as u16) as u8
}

pub fn score(site: &Site, now: DateTime<Utc>) -> u8 {
    score_parts(site.category, site.last_maintenance_at, site.is_completed, now)
}

pub fn level(site: &Site, now: DateTime<Utc>) -> RiskLevel {
    level_for_score(score(site, now))
}

pub fn assess(site: &Site, now: DateTime<Utc>) -> RiskAssessment {
    let category_points = category_points(site.category);
    let maintenance_points = maintenance_points(site.last_maintenance_at, now);
    let completion_points = if site.is_completed { 0 } else { INCOMPLETE_POINTS };
    let score = score(site, now);

    RiskAssessment {
        score,
        level: level_for_score(score),
        category_points,
        maintenance_points,
        completion_points,
        days_since_maintenance: site
            .last_maintenance_at
            .map(|t| (now - t).num_days().max(0)),
    }
}

/// Sites ordered by descending score; equal scores fall back to name order.
pub fn prioritize<'a>(sites: &'a [Site], now: DateTime<Utc>) -> Vec<(&'a Site, RiskAssessment)> {
    let mut scored: Vec<(&Site, RiskAssessment)> =
        sites.iter().map(|s| (s, assess(s, now))).collect();
    scored.sort_by(|(a, ra), (b, rb)| rb.score.cmp(&ra.score).then_with(|| a.name.cmp(&b.name)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::site;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn months_before(m: u32) -> DateTime<Utc> {
        now().checked_sub_months(Months::new(m)).unwrap()
    }

    #[test]
    fn test_level_thresholds_are_exact() {
        assert_eq!(level_for_score(69), RiskLevel::High);
        assert_eq!(level_for_score(70), RiskLevel::Critical);
        assert_eq!(level_for_score(49), RiskLevel::Medium);
        assert_eq!(level_for_score(50), RiskLevel::High);
        assert_eq!(level_for_score(29), RiskLevel::Low);
        assert_eq!(level_for_score(30), RiskLevel::Medium);
        assert_eq!(level_for_score(0), RiskLevel::Low);
        assert_eq!(level_for_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_high_risk_stale_incomplete_site_is_critical() {
        let mut s = site("cb-uv-plav", 48.95, 14.47);
        s.category = Category::from_label("I.");
        s.is_completed = false;
        s.last_maintenance_at = Some(months_before(13));

        let a = assess(&s, now());
        assert_eq!(a.category_points, 40);
        assert_eq!(a.maintenance_points, 40);
        assert_eq!(a.completion_points, 20);
        assert_eq!(a.score, 100);
        assert_eq!(a.level, RiskLevel::Critical);
    }

    #[test]
    fn test_score_is_capped() {
        // 40 + 50 + 20 = 110 before the cap
        let mut s = site("a", 49.0, 14.0);
        s.category = Category::HighRisk;
        assert_eq!(score(&s, now()), MAX_SCORE);
    }

    #[test]
    fn test_missing_maintenance_is_worst_case() {
        let s = site("a", 49.0, 14.0);
        let never = score_parts(Category::Uncategorized, None, true, now());
        let ancient = score_parts(
            Category::Uncategorized,
            Some(months_before(60)),
            true,
            now(),
        );
        assert_eq!(never, 50);
        assert!(never > ancient);
        assert_eq!(score(&s, now()), 70);
    }

    #[test]
    fn test_maintenance_age_boundaries() {
        let pts = |t| maintenance_points(Some(t), now());
        assert_eq!(pts(now()), 0);
        assert_eq!(pts(months_before(3)), 0);
        assert_eq!(pts(months_before(3) - chrono::Duration::days(1)), 10);
        assert_eq!(pts(months_before(6)), 10);
        assert_eq!(pts(months_before(6) - chrono::Duration::days(1)), 25);
        assert_eq!(pts(months_before(12)), 25);
        assert_eq!(pts(months_before(12) - chrono::Duration::days(1)), 40);
    }

    #[test]
    fn test_future_maintenance_counts_as_fresh() {
        let future = now() + chrono::Duration::days(3);
        assert_eq!(maintenance_points(Some(future), now()), 0);
    }

    #[test]
    fn test_score_in_range_and_monotonic() {
        let categories = [
            Category::Uncategorized,
            Category::MediumRisk,
            Category::HighRisk,
        ];
        // Ordered from freshest to stalest; None is the stalest.
        let ages: Vec<Option<DateTime<Utc>>> = vec![
            Some(now()),
            Some(months_before(4)),
            Some(months_before(8)),
            Some(months_before(14)),
            None,
        ];

        for (ci, &cat) in categories.iter().enumerate() {
            for (ai, &age) in ages.iter().enumerate() {
                for done in [true, false] {
                    let s = score_parts(cat, age, done, now());
                    assert!(s <= 100);

                    if ci + 1 < categories.len() {
                        assert!(score_parts(categories[ci + 1], age, done, now()) >= s);
                    }
                    if ai + 1 < ages.len() {
                        assert!(score_parts(cat, ages[ai + 1], done, now()) >= s);
                    }
                    if done {
                        assert!(score_parts(cat, age, false, now()) >= s);
                    }
                }
            }
        }
    }

    #[test]
    fn test_prioritize_orders_by_score_then_name() {
        let mut a = site("a", 49.0, 14.0);
        a.name = "Zliv".into();
        a.is_completed = true;
        a.last_maintenance_at = Some(now());
        let mut b = site("b", 49.0, 14.0);
        b.name = "Borek".into();
        b.category = Category::HighRisk;
        let mut c = site("c", 49.0, 14.0);
        c.name = "Adamov".into();
        c.category = Category::HighRisk;

        let sites = vec![a, b, c];
        let ranked = prioritize(&sites, now());
        let ids: Vec<&str> = ranked.iter().map(|(s, _)| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
