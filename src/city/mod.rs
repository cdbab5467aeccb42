//! Cities: profile, coordinates and the aggregate stats summary.

pub mod model;
pub mod stats;

pub use model::{City, CityProfile, CityStats, Coordinates, ModuleCounts, UnitPreference};
pub use stats::compute_city_stats;
