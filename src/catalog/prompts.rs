//! Prompt builders for hotspot and quick-win generation.
//!
//! Pure string interpolation over the catalog entry and city inputs. The
//! output contract embedded in each system prompt is the shape the sanitizer
//! expects back.

use crate::city::model::{CityProfile, UnitPreference};

use super::{CatalogEntry, ModuleSlug};

/// A system/user prompt pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Hotspots requested per module.
pub const HOTSPOTS_MIN: usize = 4;
pub const HOTSPOTS_MAX: usize = 6;

/// Quick wins requested per module.
pub const QUICK_WINS_MIN: usize = 3;
pub const QUICK_WINS_MAX: usize = 4;

/// Build the hotspot prompt for one module and city.
pub fn hotspot_prompt(module: ModuleSlug, city: &CityProfile) -> Prompt {
    let entry = module.entry();
    let metric_lines = metric_lines(entry, city.unit_preference);
    let units = match city.unit_preference {
        UnitPreference::Metric => "metric units (°C, km, mm, hectares)",
        UnitPreference::Imperial => "imperial units (°F, miles, inches, acres)",
    };

    let system = format!(
        "You are a climate risk analyst specializing in {display}. \
         You identify {focus}.\n\n\
         Use the vocabulary of the field: {vocab}.\n\n\
         Respond ONLY with a JSON object of this exact shape:\n\
         {{\"hotspots\": [{{\n\
         \x20 \"name\": string,\n\
         \x20 \"description\": string (1-2 sentences),\n\
         \x20 \"latOffset\": number (degrees from the city center, between -0.15 and 0.15),\n\
         \x20 \"lngOffset\": number (degrees from the city center, between -0.15 and 0.15),\n\
         \x20 \"address\": string,\n\
         \x20 \"neighborhood\": string,\n\
         \x20 \"severity\": \"low\" | \"medium\" | \"high\" | \"critical\",\n\
         \x20 \"metrics\": [{{\"key\": string, \"value\": number, \"unit\": string, \"trend\": \"up\" | \"down\" | \"stable\"}}],\n\
         \x20 \"displayValue\": string (the headline metric, formatted for display)\n\
         }}]}}\n\n\
         Report metrics in {units}. Preferred metric keys:\n{metric_lines}",
        display = entry.display_name,
        focus = entry.hotspot_focus,
        vocab = entry.vocabulary.join(", "),
    );

    let user = format!(
        "City: {name}, {country}\n\
         Center: {lat:.4}, {lng:.4}\n\
         Population: {population}\n\n\
         Identify {min}-{max} distinct {display} hotspots in {name}. \
         Spread them across different neighborhoods and vary their severity \
         to reflect real differences in exposure.",
        name = city.name,
        country = city.country,
        lat = city.coordinates.lat,
        lng = city.coordinates.lng,
        population = city.population,
        min = HOTSPOTS_MIN,
        max = HOTSPOTS_MAX,
        display = entry.display_name,
    );

    Prompt { system, user }
}

/// Build the quick-win prompt for one module and city.
pub fn quick_win_prompt(module: ModuleSlug, city_name: &str, country: &str) -> Prompt {
    let entry = module.entry();

    let system = format!(
        "You are a municipal climate action advisor specializing in {display}. \
         You recommend concrete, low-cost actions a city can start within weeks, \
         focused on {focus}.\n\n\
         Use the vocabulary of the field: {vocab}.\n\n\
         Respond ONLY with a JSON object of this exact shape:\n\
         {{\"quickWins\": [{{\n\
         \x20 \"title\": string (imperative, under 80 characters),\n\
         \x20 \"description\": string (2-3 sentences),\n\
         \x20 \"impact\": \"low\" | \"medium\" | \"high\",\n\
         \x20 \"effort\": \"low\" | \"medium\" | \"high\",\n\
         \x20 \"estimatedDays\": integer,\n\
         \x20 \"co2ReductionTons\": number (annual, omit if not applicable),\n\
         \x20 \"tags\": [string],\n\
         \x20 \"steps\": [string]\n\
         }}]}}",
        display = entry.display_name,
        focus = entry.quick_win_focus,
        vocab = entry.vocabulary.join(", "),
    );

    let user = format!(
        "City: {city_name}, {country}\n\n\
         Suggest {min}-{max} {display} quick wins for {city_name}. \
         Each must be actionable by the city government or community groups \
         without new legislation.",
        min = QUICK_WINS_MIN,
        max = QUICK_WINS_MAX,
        display = entry.display_name,
    );

    Prompt { system, user }
}

fn metric_lines(entry: &CatalogEntry, units: UnitPreference) -> String {
    entry
        .metrics
        .iter()
        .map(|m| {
            let unit = match units {
                UnitPreference::Metric => m.metric_unit,
                UnitPreference::Imperial => m.imperial_unit,
            };
            format!("- {} ({})", m.key, unit)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
