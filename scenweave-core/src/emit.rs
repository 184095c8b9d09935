//! Flat key→scalar records for the external emission layer.
//!
//! One behavior record per concrete scenario and one road record per
//! distinct synthetic map; keys are dotted attribute paths. Serialization
//! and schema compliance of the final artifact formats stay external.

use std::collections::BTreeMap;

use crate::scenario::{ConcreteScenario, Waypoint};
use crate::value::Scalar;

/// One flat emission record.
pub type Record = BTreeMap<String, Scalar>;

/// Attribute-path prefixes belonging to the road description.
const ROAD_PREFIXES: [&str; 5] = ["Road.", "Junction.", "Lane.", "Marking.", "Trafficlight."];

fn insert_waypoint(record: &mut Record, prefix: &str, waypoint: &Waypoint) {
    match waypoint {
        Waypoint::Lane {
            road_id,
            lane_id,
            offset,
            s,
            heading,
        } => {
            record.insert(format!("{prefix}.RoadId"), Scalar::Int(i64::from(*road_id)));
            record.insert(format!("{prefix}.LaneId"), Scalar::Int(i64::from(*lane_id)));
            record.insert(format!("{prefix}.Offset"), Scalar::Float(*offset));
            record.insert(format!("{prefix}.S"), Scalar::Float(*s));
            record.insert(format!("{prefix}.Heading"), Scalar::Float(*heading));
        }
        Waypoint::World { x, y, z } => {
            record.insert(format!("{prefix}.X"), Scalar::Float(*x));
            record.insert(format!("{prefix}.Y"), Scalar::Float(*y));
            record.insert(format!("{prefix}.Z"), Scalar::Float(*z));
        }
    }
}

/// Behavior record of one scenario: identity, every concrete attribute and
/// the resolved waypoint sequences.
#[must_use]
pub fn behavior_record(scenario: &ConcreteScenario) -> Record {
    let mut record: Record = scenario.attrs.clone();
    record.insert(
        "ConcreteId".to_string(),
        Scalar::Text(scenario.concrete_id.clone()),
    );
    record.insert(
        "FuncId".to_string(),
        Scalar::Text(scenario.functional_id.clone()),
    );
    record.insert(
        "LogicId".to_string(),
        Scalar::Text(scenario.logical_id.clone()),
    );
    record.insert(
        "MapFile".to_string(),
        Scalar::Text(scenario.map_file.clone()),
    );
    if !scenario.description.is_empty() {
        record.insert(
            "Description".to_string(),
            Scalar::Text(scenario.description.clone()),
        );
    }
    for entity in &scenario.entities {
        for (i, waypoint) in entity.waypoints.iter().enumerate() {
            insert_waypoint(
                &mut record,
                &format!("{}.Ini.Wpts.{}", entity.name, i + 1),
                waypoint,
            );
        }
    }
    record
}

#[must_use]
pub fn behavior_records(scenarios: &[ConcreteScenario]) -> Vec<Record> {
    scenarios.iter().map(behavior_record).collect()
}

/// Road records: one per distinct map key, carrying only the road-family
/// attributes, in first-occurrence order.
#[must_use]
pub fn road_records(scenarios: &[ConcreteScenario]) -> Vec<Record> {
    let mut seen: Vec<&str> = Vec::new();
    let mut records = Vec::new();
    for scenario in scenarios {
        if scenario.map_file.is_empty() || seen.contains(&scenario.map_file.as_str()) {
            continue;
        }
        seen.push(&scenario.map_file);

        let mut record: Record = scenario
            .attrs
            .iter()
            .filter(|(path, _)| ROAD_PREFIXES.iter().any(|p| path.starts_with(p)))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        record.insert(
            "MapFile".to_string(),
            Scalar::Text(scenario.map_file.clone()),
        );
        records.push(record);
    }
    records
}
