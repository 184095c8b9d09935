//! Physical/behavioral rule filter.
//!
//! Drops concrete scenarios that violate static plausibility constraints.
//! Rejections are non-fatal; only an empty surviving batch escalates (the
//! pipeline raises that, not this module).

use std::collections::BTreeSet;

use crate::config::BatchConfig;
use crate::rejection::{Rejection, RejectionLog, RuleCategory};
use crate::scenario::ConcreteScenario;

const KMH_TO_MS: f64 = 1.0 / 3.6;

/// Apply every rule to every scenario; survivors keep their order.
#[must_use]
pub fn filter_rules(
    scenarios: Vec<ConcreteScenario>,
    cfg: &BatchConfig,
    rejections: &mut RejectionLog,
) -> Vec<ConcreteScenario> {
    scenarios
        .into_iter()
        .filter(|scenario| {
            let verdict = check_speed_range(scenario, cfg).and_then(|()| check_lane_sides(scenario));
            match verdict {
                Ok(()) => true,
                Err(reason) => {
                    rejections.push(Rejection {
                        functional_id: scenario.functional_id.clone(),
                        logical_id: scenario.logical_id.clone(),
                        concrete_id: scenario.concrete_id.clone(),
                        reason,
                        category: RuleCategory::Physical,
                    });
                    false
                }
            }
        })
        .collect()
}

/// Every entity's initial speed (m/s) must lie in the configured km/h
/// interval; a violation by any entity drops the scenario.
fn check_speed_range(scenario: &ConcreteScenario, cfg: &BatchConfig) -> Result<(), String> {
    let min_ms = cfg.speed.min_kmh * KMH_TO_MS;
    let max_ms = cfg.speed.max_kmh * KMH_TO_MS;

    for name in scenario.entity_names() {
        let speed = scenario
            .attr_f64(&format!("{name}.Ini.Speed"))
            .unwrap_or(0.0);
        if speed < min_ms || speed > max_ms {
            return Err(format!(
                "{name} initial speed {speed:.2} m/s outside [{min_ms:.2}, {max_ms:.2}] m/s"
            ));
        }
    }
    Ok(())
}

/// Lane/side consistency: the relative side values present among entities
/// must be expressible on the declared lane count without conflicting
/// outermost assignments.
fn check_lane_sides(scenario: &ConcreteScenario) -> Result<(), String> {
    let lane_num = scenario.attr_i64("Lane.Num").unwrap_or(0);
    if !(1..=4).contains(&lane_num) {
        return Ok(());
    }

    let mut sides: BTreeSet<i64> = BTreeSet::new();
    for name in scenario.entity_names() {
        sides.insert(scenario.attr_i64(&format!("{name}.Rel.Side")).unwrap_or(0));
    }

    let allowed: &[i64] = match lane_num {
        1 => &[0],
        2 => &[0, -1, 1],
        3 => &[0, -1, 1, -2, 2],
        _ => &[0, -1, 1, -2, 2, -3, 3],
    };
    if let Some(bad) = sides.iter().find(|s| !allowed.contains(s)) {
        return Err(format!(
            "side {bad} cannot exist on a {lane_num}-lane road"
        ));
    }

    let conflict = match lane_num {
        2 => sides.contains(&-1) && sides.contains(&1),
        3 => sides.contains(&-2) && sides.contains(&2),
        4 => {
            (sides.contains(&-2) || sides.contains(&-3))
                && (sides.contains(&2) || sides.contains(&3))
        }
        _ => false,
    };
    if conflict {
        return Err(format!(
            "conflicting outer sides {sides:?} on a {lane_num}-lane road"
        ));
    }
    Ok(())
}
