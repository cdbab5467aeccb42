//! The module catalog: six fixed topic modules and their domain framing.
//!
//! `ModuleSlug` is a closed enum; every per-module table is an exhaustive
//! `match`, so adding a module is a compile-checked edit.

pub mod prompts;

use serde::{Deserialize, Serialize};

pub use prompts::{Prompt, hotspot_prompt, quick_win_prompt};

/// Topic module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleSlug {
    UrbanHeat,
    CoastalPlastic,
    PortEmissions,
    Biodiversity,
    AirQuality,
    FloodResilience,
}

impl ModuleSlug {
    /// All modules in processing order.
    pub const ALL: [ModuleSlug; 6] = [
        ModuleSlug::UrbanHeat,
        ModuleSlug::CoastalPlastic,
        ModuleSlug::PortEmissions,
        ModuleSlug::Biodiversity,
        ModuleSlug::AirQuality,
        ModuleSlug::FloodResilience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrbanHeat => "urban-heat",
            Self::CoastalPlastic => "coastal-plastic",
            Self::PortEmissions => "port-emissions",
            Self::Biodiversity => "biodiversity",
            Self::AirQuality => "air-quality",
            Self::FloodResilience => "flood-resilience",
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.entry().display_name
    }

    /// Static catalog entry for this module.
    pub fn entry(&self) -> &'static CatalogEntry {
        match self {
            Self::UrbanHeat => &URBAN_HEAT,
            Self::CoastalPlastic => &COASTAL_PLASTIC,
            Self::PortEmissions => &PORT_EMISSIONS,
            Self::Biodiversity => &BIODIVERSITY,
            Self::AirQuality => &AIR_QUALITY,
            Self::FloodResilience => &FLOOD_RESILIENCE,
        }
    }
}

impl std::fmt::Display for ModuleSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|slug| slug.as_str() == s)
            .ok_or_else(|| format!("unknown module slug: {s}"))
    }
}

/// A metric the model is asked to report, with units per system.
#[derive(Debug)]
pub struct MetricHint {
    pub key: &'static str,
    pub metric_unit: &'static str,
    pub imperial_unit: &'static str,
}

/// Domain framing for one module.
#[derive(Debug)]
pub struct CatalogEntry {
    pub slug: ModuleSlug,
    pub display_name: &'static str,
    /// What a hotspot means in this domain.
    pub hotspot_focus: &'static str,
    /// Domain vocabulary the model should use.
    pub vocabulary: &'static [&'static str],
    pub metrics: &'static [MetricHint],
    /// What a quick win means in this domain.
    pub quick_win_focus: &'static str,
}

static URBAN_HEAT: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::UrbanHeat,
    display_name: "Urban Heat",
    hotspot_focus: "urban heat islands where land surface temperature runs well above the city average",
    vocabulary: &[
        "heat island",
        "land surface temperature",
        "tree canopy",
        "impervious surface",
        "cooling center",
    ],
    metrics: &[
        MetricHint {
            key: "surface_temp_anomaly",
            metric_unit: "°C",
            imperial_unit: "°F",
        },
        MetricHint {
            key: "tree_canopy_cover",
            metric_unit: "%",
            imperial_unit: "%",
        },
    ],
    quick_win_focus: "cooling neighborhoods fast: shade, cool roofs, tree planting, cooling centers",
};

static COASTAL_PLASTIC: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::CoastalPlastic,
    display_name: "Coastal Plastic",
    hotspot_focus: "shoreline and waterway sites where marine debris and plastic litter accumulate",
    vocabulary: &[
        "marine debris",
        "beach litter",
        "storm-drain outfall",
        "microplastics",
        "river mouth",
    ],
    metrics: &[
        MetricHint {
            key: "debris_density",
            metric_unit: "items/100m",
            imperial_unit: "items/100yd",
        },
        MetricHint {
            key: "plastic_share",
            metric_unit: "%",
            imperial_unit: "%",
        },
    ],
    quick_win_focus: "stopping plastic at the source: drain screens, cleanups, refill stations, bans on single-use items",
};

static PORT_EMISSIONS: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::PortEmissions,
    display_name: "Port Emissions",
    hotspot_focus: "port terminals, berths and freight corridors with concentrated shipping and drayage exhaust",
    vocabulary: &[
        "shipping exhaust",
        "NOx",
        "SO2",
        "PM2.5",
        "shore power",
        "drayage trucks",
    ],
    metrics: &[
        MetricHint {
            key: "nox_emissions",
            metric_unit: "t/yr",
            imperial_unit: "tons/yr",
        },
        MetricHint {
            key: "vessel_calls",
            metric_unit: "calls/yr",
            imperial_unit: "calls/yr",
        },
    ],
    quick_win_focus: "cutting port pollution: shore power, idling limits, clean truck programs, green shipping incentives",
};

static BIODIVERSITY: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::Biodiversity,
    display_name: "Biodiversity",
    hotspot_focus: "habitats under pressure from development, fragmentation or invasive species",
    vocabulary: &[
        "habitat loss",
        "green corridor",
        "pollinators",
        "invasive species",
        "native planting",
    ],
    metrics: &[
        MetricHint {
            key: "habitat_area",
            metric_unit: "ha",
            imperial_unit: "acres",
        },
        MetricHint {
            key: "species_count",
            metric_unit: "species",
            imperial_unit: "species",
        },
    ],
    quick_win_focus: "restoring nature in the city: pollinator gardens, invasive removal, wildlife corridors, rewilding verges",
};

static AIR_QUALITY: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::AirQuality,
    display_name: "Air Quality",
    hotspot_focus: "neighborhoods with elevated fine particulate and nitrogen dioxide exposure",
    vocabulary: &[
        "PM2.5",
        "NO2",
        "traffic corridor",
        "industrial source",
        "air quality index",
    ],
    metrics: &[
        MetricHint {
            key: "pm25_annual_mean",
            metric_unit: "µg/m³",
            imperial_unit: "µg/m³",
        },
        MetricHint {
            key: "no2_annual_mean",
            metric_unit: "µg/m³",
            imperial_unit: "µg/m³",
        },
    ],
    quick_win_focus: "cleaner air quickly: school streets, anti-idling, low-emission zones, sensor networks",
};

static FLOOD_RESILIENCE: CatalogEntry = CatalogEntry {
    slug: ModuleSlug::FloodResilience,
    display_name: "Flood Resilience",
    hotspot_focus: "low-lying areas and drainage basins exposed to pluvial, fluvial or coastal flooding",
    vocabulary: &[
        "flood zone",
        "impervious surface",
        "drainage capacity",
        "sea-level rise",
        "storm surge",
    ],
    metrics: &[
        MetricHint {
            key: "flood_depth_100yr",
            metric_unit: "m",
            imperial_unit: "ft",
        },
        MetricHint {
            key: "impervious_cover",
            metric_unit: "%",
            imperial_unit: "%",
        },
    ],
    quick_win_focus: "absorbing water where it falls: rain gardens, depaving, drain clearing, flood warning signage",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_six_modules_in_order() {
        assert_eq!(ModuleSlug::ALL.len(), 6);
        assert_eq!(ModuleSlug::ALL[0], ModuleSlug::UrbanHeat);
        assert_eq!(ModuleSlug::ALL[5], ModuleSlug::FloodResilience);
    }

    #[test]
    fn entries_point_back_to_their_slug() {
        for slug in ModuleSlug::ALL {
            assert_eq!(slug.entry().slug, slug);
            assert!(!slug.entry().vocabulary.is_empty());
            assert!(!slug.entry().metrics.is_empty());
        }
    }

    #[test]
    fn slug_parse_roundtrip() {
        for slug in ModuleSlug::ALL {
            assert_eq!(slug.as_str().parse::<ModuleSlug>().unwrap(), slug);
        }
        assert!("volcanoes".parse::<ModuleSlug>().is_err());
    }

    #[test]
    fn display_matches_serde() {
        for slug in ModuleSlug::ALL {
            let json = serde_json::to_string(&slug).unwrap();
            assert_eq!(json, format!("\"{slug}\""));
        }
    }
}
