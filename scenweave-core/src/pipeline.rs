//! Pipeline orchestration: raw table to emission-ready records.
//!
//! A strict forward transform. Each stage consumes the full collection and
//! produces a new one; only waypoint resolution mutates scenarios in place.
//! Per-scenario problems land in the rejection log; whole-batch problems
//! abort with a stage-distinguished error.

use serde::{Deserialize, Serialize};

use crate::config::BatchConfig;
use crate::emit::{self, Record};
use crate::entity::materialize_entities;
use crate::expand::expand_all;
use crate::junction::{synthesize_junction, JunctionPlan, JunctionSpec};
use crate::rejection::{Rejection, RejectionLog, RuleCategory};
use crate::road::{build_lanes, marks_from_scenario, synthesize_road, LaneSpec, RoadPlan, RoadSpec};
use crate::rules::filter_rules;
use crate::scenario::ConcreteScenario;
use crate::select::select;
use crate::table::{build_logical, RawTable};
use crate::waypoint::{resolve_indexed, resolve_synthetic, MapService, RouteCatalog};

/// Batch-fatal pipeline failures, distinguished by stage for caller
/// messaging.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("required columns missing from the input table: {0:?}")]
    MissingColumns(Vec<String>),
    #[error("no test-case rows defined")]
    NoTestCaseRows,
    #[error("no logical scenarios defined")]
    NoLogicalScenarios,
    #[error("logical scenario {logical_id} expands to zero concrete scenarios")]
    NoConcreteScenarios { logical_id: String },
    #[error("all scenarios filtered out during {stage}")]
    FilteredToEmpty { stage: &'static str },
    #[error("scenario {0} has no map key for externally-indexed resolution")]
    MapKeyMissing(String),
    #[error("failed to open map session for {map}")]
    MapSession {
        map: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Roads and junctions of one distinct synthetic map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticMap {
    pub name: String,
    pub roads: Vec<RoadPlan>,
    pub junctions: Vec<JunctionPlan>,
}

/// Batch counters for caller reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub logical_count: usize,
    pub expanded_count: usize,
    pub surviving_count: usize,
    pub rejected_count: usize,
    pub map_count: usize,
}

/// Everything the emission layer needs from one batch.
#[derive(Debug)]
pub struct BatchOutput {
    pub scenarios: Vec<ConcreteScenario>,
    pub rejections: RejectionLog,
    pub behavior_records: Vec<Record>,
    pub road_records: Vec<Record>,
    pub maps: Vec<SyntheticMap>,
    pub stats: BatchStats,
}

/// Shared front half of both map modes: table → logical → concrete →
/// rule-filtered → down-selected → typed entities.
fn prepare(
    table: &RawTable,
    cfg: &BatchConfig,
    rejections: &mut RejectionLog,
) -> Result<(Vec<ConcreteScenario>, BatchStats), PipelineError> {
    let logicals = build_logical(table, cfg, rejections)?;
    let logical_count = logicals.len();

    let concretes = expand_all(&logicals, cfg, rejections)?;
    let expanded_count = concretes.len();

    let concretes = filter_rules(concretes, cfg, rejections);
    if concretes.is_empty() {
        return Err(PipelineError::FilteredToEmpty {
            stage: "rule filtering",
        });
    }

    let concretes = apply_selection(concretes, cfg, rejections);
    if concretes.is_empty() {
        return Err(PipelineError::FilteredToEmpty {
            stage: "density selection",
        });
    }

    let mut typed = Vec::with_capacity(concretes.len());
    for mut scenario in concretes {
        match materialize_entities(&mut scenario) {
            Ok(()) => typed.push(scenario),
            Err(err) => rejections.push(Rejection {
                functional_id: scenario.functional_id.clone(),
                logical_id: scenario.logical_id.clone(),
                concrete_id: scenario.concrete_id.clone(),
                reason: err.to_string(),
                category: RuleCategory::Behavior,
            }),
        }
    }
    if typed.is_empty() {
        return Err(PipelineError::FilteredToEmpty {
            stage: "entity materialization",
        });
    }

    let stats = BatchStats {
        logical_count,
        expanded_count,
        ..BatchStats::default()
    };
    Ok((typed, stats))
}

/// Config-gated density down-selection. Dropped scenarios are recorded so
/// no data disappears silently; noise and unsampled members carry distinct
/// reasons.
fn apply_selection(
    scenarios: Vec<ConcreteScenario>,
    cfg: &BatchConfig,
    rejections: &mut RejectionLog,
) -> Vec<ConcreteScenario> {
    if !cfg.selection.enabled {
        return scenarios;
    }
    let mask = select(&scenarios, &cfg.selection);
    scenarios
        .into_iter()
        .zip(mask)
        .filter_map(|(scenario, keep)| {
            if keep {
                Some(scenario)
            } else {
                rejections.push(Rejection {
                    functional_id: scenario.functional_id.clone(),
                    logical_id: scenario.logical_id.clone(),
                    concrete_id: scenario.concrete_id.clone(),
                    reason: "not kept by density-based representative sampling".to_string(),
                    category: RuleCategory::Design,
                });
                None
            }
        })
        .collect()
}

/// Synthesize the road network of every distinct synthetic map key.
fn synthesize_maps(scenarios: &[ConcreteScenario], cfg: &BatchConfig) -> Vec<SyntheticMap> {
    let mut seen: Vec<&str> = Vec::new();
    let mut maps = Vec::new();
    for scenario in scenarios {
        if scenario.map_file.is_empty() || seen.contains(&scenario.map_file.as_str()) {
            continue;
        }
        seen.push(&scenario.map_file);

        let road_spec = RoadSpec::from_scenario(scenario, &cfg.virtual_map);
        let lane_spec = LaneSpec::from_scenario(scenario, &cfg.virtual_map);
        let (lane_mark, center_mark) = marks_from_scenario(scenario);
        let base = RoadPlan {
            id: cfg.virtual_map.start_road_id,
            plan_view: synthesize_road(&road_spec, &cfg.virtual_map),
            lanes: build_lanes(&road_spec, &lane_spec, lane_mark, center_mark, &cfg.virtual_map),
            speed_limit: road_spec.speed_limit,
            predecessor: None,
            successor: None,
        };

        let junction_spec = JunctionSpec::from_scenario(scenario);
        let (junctions, junction_roads) =
            synthesize_junction(&junction_spec, &base, &cfg.virtual_map);

        // Hub and ramp layouts replace the base road with their legs; a
        // plain road keeps the base itself.
        let roads = if junction_roads.is_empty() {
            vec![base]
        } else {
            junction_roads
        };
        maps.push(SyntheticMap {
            name: scenario.map_file.clone(),
            roads,
            junctions,
        });
    }
    maps
}

fn finish(
    scenarios: Vec<ConcreteScenario>,
    rejections: RejectionLog,
    maps: Vec<SyntheticMap>,
    mut stats: BatchStats,
) -> BatchOutput {
    stats.surviving_count = scenarios.len();
    stats.rejected_count = rejections.len();
    stats.map_count = maps.len();
    // Road records exist only for synthetic maps; externally-indexed maps
    // are queried, never emitted.
    let road_records = if maps.is_empty() {
        Vec::new()
    } else {
        emit::road_records(&scenarios)
    };
    BatchOutput {
        behavior_records: emit::behavior_records(&scenarios),
        road_records,
        scenarios,
        rejections,
        maps,
        stats,
    }
}

/// Run a batch against synthetic (procedurally generated) maps.
///
/// # Errors
///
/// Stage-level failures per [`PipelineError`]; per-scenario problems reduce
/// the batch and land in the rejection log instead.
pub fn run_batch_synthetic(
    table: &RawTable,
    cfg: &BatchConfig,
) -> Result<BatchOutput, PipelineError> {
    let mut rejections = RejectionLog::new();
    let (scenarios, stats) = prepare(table, cfg, &mut rejections)?;

    let mut resolved = Vec::with_capacity(scenarios.len());
    for mut scenario in scenarios {
        match resolve_synthetic(&mut scenario, &cfg.virtual_map) {
            Ok(()) => resolved.push(scenario),
            Err(err) => rejections.push(Rejection {
                functional_id: scenario.functional_id.clone(),
                logical_id: scenario.logical_id.clone(),
                concrete_id: scenario.concrete_id.clone(),
                reason: err.to_string(),
                category: RuleCategory::Physical,
            }),
        }
    }
    if resolved.is_empty() {
        return Err(PipelineError::FilteredToEmpty {
            stage: "waypoint resolution",
        });
    }
    debug_assert!(resolved.iter().all(crate::waypoint::all_entities_resolved));

    let maps = synthesize_maps(&resolved, cfg);
    Ok(finish(resolved, rejections, maps, stats))
}

/// Run a batch against externally-indexed (real) maps.
///
/// One map-engine session is opened per distinct map name and held for the
/// whole resolution pass against that map, then released; a failed open is
/// structural and aborts the batch.
///
/// # Errors
///
/// Stage-level failures per [`PipelineError`].
pub fn run_batch_indexed<M: MapService>(
    table: &RawTable,
    cfg: &BatchConfig,
    service: &M,
    catalog: &RouteCatalog,
) -> Result<BatchOutput, PipelineError> {
    let mut rejections = RejectionLog::new();
    let (scenarios, stats) = prepare(table, cfg, &mut rejections)?;

    let mut map_names: Vec<String> = Vec::new();
    for scenario in &scenarios {
        if scenario.map_file.is_empty() {
            return Err(PipelineError::MapKeyMissing(scenario.concrete_id.clone()));
        }
        if !map_names.contains(&scenario.map_file) {
            map_names.push(scenario.map_file.clone());
        }
    }

    let mut resolved = Vec::with_capacity(scenarios.len());
    let mut remaining = scenarios;
    for map_name in map_names {
        let session =
            service
                .open_session(&map_name)
                .map_err(|err| PipelineError::MapSession {
                    map: map_name.clone(),
                    source: Box::new(err),
                })?;

        let (mine, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|s| s.map_file == map_name);
        remaining = rest;

        for mut scenario in mine {
            match resolve_indexed(&mut scenario, catalog, &session) {
                Ok(()) => resolved.push(scenario),
                Err(err) => rejections.push(Rejection {
                    functional_id: scenario.functional_id.clone(),
                    logical_id: scenario.logical_id.clone(),
                    concrete_id: scenario.concrete_id.clone(),
                    reason: err.to_string(),
                    category: RuleCategory::Physical,
                }),
            }
        }
        // Session drops here: scoped acquisition per map.
        drop(session);
    }

    if resolved.is_empty() {
        return Err(PipelineError::FilteredToEmpty {
            stage: "waypoint resolution",
        });
    }
    Ok(finish(resolved, rejections, Vec::new(), stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(ToString::to_string).collect())
                .collect(),
        }
    }

    fn base_table() -> RawTable {
        table(
            &[
                "FuncId",
                "LogicId",
                "Road.Type",
                "Lane.Num",
                "Ego.Phy.Model",
                "Ego.Ini.Speed",
                "Env.Time",
                "Env.Weather",
            ],
            &[&[
                "F01", "L01", "straight", "2/3", "sedan", "10", "noon", "sunny",
            ]],
        )
    }

    #[test]
    fn synthetic_batch_produces_records_and_maps() {
        let output = run_batch_synthetic(&base_table(), &BatchConfig::default()).unwrap();
        // Lane.Num 2/3 is the only list attribute.
        assert_eq!(output.scenarios.len(), 2);
        assert_eq!(output.behavior_records.len(), 2);
        // Distinct lane counts mean distinct synthetic maps.
        assert_eq!(output.maps.len(), 2);
        assert_eq!(output.road_records.len(), 2);
        assert_eq!(output.stats.surviving_count, 2);
        assert!(output
            .scenarios
            .iter()
            .all(crate::waypoint::all_entities_resolved));
    }

    #[test]
    fn speeding_scenarios_reduce_the_batch_not_abort_it() {
        let raw = table(
            &[
                "FuncId",
                "LogicId",
                "Road.Type",
                "Lane.Num",
                "Ego.Phy.Model",
                "Ego.Ini.Speed",
                "Env.Time",
                "Env.Weather",
            ],
            &[&[
                "F01", "L01", "straight", "2", "sedan", "10/99", "noon", "sunny",
            ]],
        );
        let output = run_batch_synthetic(&raw, &BatchConfig::default()).unwrap();
        assert_eq!(output.scenarios.len(), 1);
        assert_eq!(output.rejections.len(), 1);
    }

    #[test]
    fn fully_filtered_batch_is_a_stage_error() {
        let raw = table(
            &[
                "FuncId",
                "LogicId",
                "Road.Type",
                "Lane.Num",
                "Ego.Phy.Model",
                "Ego.Ini.Speed",
                "Env.Time",
                "Env.Weather",
            ],
            &[&[
                "F01", "L01", "straight", "2", "sedan", "99", "noon", "sunny",
            ]],
        );
        let err = run_batch_synthetic(&raw, &BatchConfig::default()).expect_err("all speeding");
        assert!(matches!(
            err,
            PipelineError::FilteredToEmpty {
                stage: "rule filtering"
            }
        ));
    }
}
