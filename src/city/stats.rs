//! City-level aggregate statistics.

use crate::content::model::{Hotspot, HotspotStatus, Level, QuickWin, Severity};

use super::model::CityStats;

/// Summarize a city's content. Inactive quick wins are ignored.
///
/// Pure over its inputs: the same rows always yield the same summary, so
/// recomputing after a partial run is safe.
pub fn compute_city_stats(hotspots: &[Hotspot], quick_wins: &[QuickWin]) -> CityStats {
    let mut stats = CityStats::default();

    for hotspot in hotspots {
        stats.total_hotspots += 1;
        if hotspot.status == HotspotStatus::Active {
            stats.active_hotspots += 1;
        }
        let by_severity = &mut stats.hotspots_by_severity;
        match hotspot.content.severity {
            Severity::Low => by_severity.low += 1,
            Severity::Medium => by_severity.medium += 1,
            Severity::High => by_severity.high += 1,
            Severity::Critical => by_severity.critical += 1,
        }
        stats.modules.entry(hotspot.module_id).or_default().hotspots += 1;
    }

    let mut co2 = 0.0;
    for quick_win in quick_wins.iter().filter(|q| q.is_active) {
        stats.total_quick_wins += 1;
        let by_impact = &mut stats.quick_wins_by_impact;
        match quick_win.content.impact {
            Level::Low => by_impact.low += 1,
            Level::Medium => by_impact.medium += 1,
            Level::High => by_impact.high += 1,
        }
        co2 += quick_win.content.co2_reduction_tons.unwrap_or(0.0);
        stats.modules.entry(quick_win.module_id).or_default().quick_wins += 1;
    }
    stats.estimated_co2_reduction_tons = round_hundredths(co2);

    stats
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::city::model::Coordinates;
    use crate::content::model::{HotspotDraft, QuickWinDraft};
    use chrono::Utc;
    use uuid::Uuid;

    fn hotspot(module_id: Uuid, severity: Severity) -> Hotspot {
        Hotspot::from_draft(
            Uuid::nil(),
            module_id,
            HotspotDraft {
                name: "x".into(),
                description: String::new(),
                coordinates: Coordinates::new(0.0, 0.0),
                address: None,
                neighborhood: None,
                severity,
                metrics: vec![],
                display_value: None,
            },
            Utc::now(),
        )
    }

    fn quick_win(module_id: Uuid, impact: Level, co2: Option<f64>) -> QuickWin {
        QuickWin::from_draft(
            Uuid::nil(),
            module_id,
            QuickWinDraft {
                title: "x".into(),
                description: String::new(),
                impact,
                effort: Level::Low,
                estimated_days: None,
                co2_reduction_tons: co2,
                tags: vec![],
                steps: None,
                sort_order: 0,
            },
            Utc::now(),
        )
    }

    #[test]
    fn empty_city_has_zeroed_stats() {
        assert_eq!(compute_city_stats(&[], &[]), CityStats::default());
    }

    #[test]
    fn counts_by_severity_impact_and_module() {
        let heat = Uuid::new_v4();
        let air = Uuid::new_v4();
        let mut resolved = hotspot(air, Severity::Low);
        resolved.status = HotspotStatus::Resolved;

        let hotspots = vec![
            hotspot(heat, Severity::Critical),
            hotspot(heat, Severity::High),
            resolved,
        ];
        let quick_wins = vec![
            quick_win(heat, Level::High, Some(12.345)),
            quick_win(air, Level::Low, Some(0.004)),
            quick_win(air, Level::Medium, None),
        ];

        let stats = compute_city_stats(&hotspots, &quick_wins);
        assert_eq!(stats.total_hotspots, 3);
        assert_eq!(stats.active_hotspots, 2);
        assert_eq!(stats.hotspots_by_severity.critical, 1);
        assert_eq!(stats.hotspots_by_severity.low, 1);
        assert_eq!(stats.total_quick_wins, 3);
        assert_eq!(stats.quick_wins_by_impact.high, 1);
        assert_eq!(stats.estimated_co2_reduction_tons, 12.35);
        assert_eq!(stats.modules[&heat].hotspots, 2);
        assert_eq!(stats.modules[&heat].quick_wins, 1);
        assert_eq!(stats.modules[&air].quick_wins, 2);
    }

    #[test]
    fn inactive_quick_wins_are_ignored() {
        let module = Uuid::new_v4();
        let mut retired = quick_win(module, Level::High, Some(100.0));
        retired.is_active = false;

        let stats = compute_city_stats(&[], &[retired]);
        assert_eq!(stats.total_quick_wins, 0);
        assert_eq!(stats.estimated_co2_reduction_tons, 0.0);
        assert!(stats.modules.is_empty());
    }
}
