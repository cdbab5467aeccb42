//! City records and the denormalized stats summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Move by a degree offset, clamped to valid latitude/longitude.
    pub fn offset(&self, d_lat: f64, d_lng: f64) -> Self {
        Self {
            lat: (self.lat + d_lat).clamp(-90.0, 90.0),
            lng: (self.lng + d_lng).clamp(-180.0, 180.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Which unit system generated metrics should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitPreference {
    #[default]
    Metric,
    Imperial,
}

impl std::fmt::Display for UnitPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Imperial => write!(f, "imperial"),
        }
    }
}

impl std::str::FromStr for UnitPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            other => Err(format!("unknown unit preference: {other}")),
        }
    }
}

/// The inputs onboarding needs about a city.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityProfile {
    pub name: String,
    pub country: String,
    pub coordinates: Coordinates,
    pub population: u64,
    #[serde(default)]
    pub unit_preference: UnitPreference,
}

/// A persisted city.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: Uuid,
    #[serde(flatten)]
    pub profile: CityProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CityStats>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl City {
    pub fn new(profile: CityProfile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            profile,
            stats: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Hotspot counts by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

/// Quick-win counts by impact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactCounts {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

/// Per-module content counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCounts {
    pub hotspots: u32,
    pub quick_wins: u32,
}

/// Denormalized city summary, recomputed from the full content set.
///
/// Holds no timestamps and uses ordered maps, so recomputing over unchanged
/// content serializes to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityStats {
    pub total_hotspots: u32,
    pub active_hotspots: u32,
    pub hotspots_by_severity: SeverityCounts,
    pub total_quick_wins: u32,
    pub quick_wins_by_impact: ImpactCounts,
    pub estimated_co2_reduction_tons: f64,
    pub modules: BTreeMap<Uuid, ModuleCounts>,
}
