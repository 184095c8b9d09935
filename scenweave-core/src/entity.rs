//! Materialization of typed entity views from concrete attribute paths.
//!
//! Runs after the rule filters, before waypoint resolution. A scenario whose
//! dynamic cells no longer parse into the closed trigger/action unions is a
//! behavioral rejection, not a crash.

use smallvec::SmallVec;

use crate::scenario::{
    ActionSpec, ActionType, ConcreteScenario, DistMode, EndType, EntityId, EntityRole, EventSpec,
    RelPlacement, RuleMode, TriggerSpec, TriggerType,
};

/// Why an entity view could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityError {
    #[error("{entity} has no parsable {kind} specification: {cell}")]
    MalformedDynamic {
        entity: String,
        kind: &'static str,
        cell: String,
    },
    #[error("{entity} references unknown entity {reference}")]
    UnknownReference { entity: String, reference: String },
}

/// Build the typed entity list of a scenario in place.
///
/// # Errors
///
/// Returns the first malformed dynamic cell or dangling reference; the
/// caller turns that into a per-scenario rejection.
pub fn materialize_entities(scenario: &mut ConcreteScenario) -> Result<(), EntityError> {
    let names = scenario.entity_names();
    let mut entities = Vec::with_capacity(names.len());

    for name in &names {
        let Some(id) = EntityId::from_name(name) else {
            continue;
        };
        let attr = |tail: &str| scenario.attr_text(&format!("{name}.{tail}")).unwrap_or("");
        let attr_f64 =
            |tail: &str| scenario.attr_f64(&format!("{name}.{tail}")).unwrap_or(0.0);

        let rel = scenario
            .attr_text(&format!("{name}.Rel.Ref"))
            .filter(|r| !r.is_empty())
            .map(|reference| RelPlacement {
                reference: reference.to_string(),
                #[allow(clippy::cast_possible_truncation)]
                side: scenario
                    .attr_i64(&format!("{name}.Rel.Side"))
                    .unwrap_or(0) as i32,
                longitudinal: attr_f64("Rel.Long"),
            });
        if let Some(rel) = &rel {
            if !names.iter().any(|n| n == &rel.reference) {
                return Err(EntityError::UnknownReference {
                    entity: name.clone(),
                    reference: rel.reference.clone(),
                });
            }
        }

        entities.push(EntityRole {
            id,
            name: name.clone(),
            category: attr("Phy.Category").to_string(),
            model: attr("Phy.Model").to_string(),
            speed: attr_f64("Ini.Speed"),
            lat_offset: attr_f64("Ini.Latoffset"),
            heading: attr_f64("Ini.Heading"),
            route: attr("Ini.Route").to_string(),
            rel,
            events: collect_events(scenario, name)?,
            waypoints: SmallVec::new(),
        });
    }

    scenario.entities = entities;
    Ok(())
}

fn collect_events(scenario: &ConcreteScenario, name: &str) -> Result<Vec<EventSpec>, EntityError> {
    let mut events = Vec::new();
    for dyn_index in 1.. {
        let prefix = format!("{name}.Dyn{dyn_index}");
        if scenario.attr(&format!("{prefix}.Trigger.Type")).is_none() {
            // A raw cell under the bare trigger path means the compact form
            // never parsed; surface it instead of skipping the event.
            if let Some(raw) = scenario.attr_text(&format!("{prefix}.Trigger")) {
                return Err(EntityError::MalformedDynamic {
                    entity: name.to_string(),
                    kind: "trigger",
                    cell: raw.to_string(),
                });
            }
            break;
        }
        let trigger = parse_trigger(scenario, name, &prefix)?;
        let actions = parse_actions(scenario, name, &prefix)?;
        events.push(EventSpec { trigger, actions });
    }
    Ok(events)
}

fn parse_trigger(
    scenario: &ConcreteScenario,
    entity: &str,
    prefix: &str,
) -> Result<TriggerSpec, EntityError> {
    let type_cell = scenario
        .attr_text(&format!("{prefix}.Trigger.Type"))
        .unwrap_or("");
    let trigger_type =
        TriggerType::from_token(type_cell).ok_or_else(|| EntityError::MalformedDynamic {
            entity: entity.to_string(),
            kind: "trigger",
            cell: type_cell.to_string(),
        })?;

    let rule = scenario
        .attr_text(&format!("{prefix}.Trigger.Rule"))
        .and_then(RuleMode::from_token)
        .unwrap_or(RuleMode::GreaterThan);
    let dist_mode = scenario
        .attr_text(&format!("{prefix}.Trigger.Disttype"))
        .and_then(DistMode::from_token)
        .unwrap_or(DistMode::Euclidean);

    Ok(TriggerSpec {
        trigger_type,
        value: scenario
            .attr_f64(&format!("{prefix}.Trigger.Value"))
            .unwrap_or(0.0),
        rule,
        dist_mode,
        reference: scenario
            .attr_text(&format!("{prefix}.Trigger.Ref"))
            .unwrap_or("")
            .to_string(),
    })
}

fn parse_actions(
    scenario: &ConcreteScenario,
    entity: &str,
    prefix: &str,
) -> Result<Vec<ActionSpec>, EntityError> {
    let mut actions = Vec::new();
    for action_index in 1.. {
        let path = format!("{prefix}.Action{action_index}");
        let Some(type_cell) = scenario.attr_text(&format!("{path}.Type")) else {
            break;
        };
        let action_type =
            ActionType::from_token(type_cell).ok_or_else(|| EntityError::MalformedDynamic {
                entity: entity.to_string(),
                kind: "action",
                cell: type_cell.to_string(),
            })?;
        actions.push(ActionSpec {
            action_type,
            value: scenario.attr_f64(&format!("{path}.Value")).unwrap_or(0.0),
            end_type: scenario
                .attr_text(&format!("{path}.Endtype"))
                .and_then(EndType::from_token)
                .unwrap_or(EndType::None),
            end_value: scenario
                .attr_f64(&format!("{path}.Endvalue"))
                .unwrap_or(0.0),
        });
    }
    Ok(actions)
}
