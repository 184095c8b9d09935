//! Scenweave Core Engine
//!
//! Platform-agnostic core of the scenweave scenario generator: turns
//! normalized logical-scenario tables into simulator-ready concrete
//! scenarios, with rule- and density-based down-selection, procedural
//! road/junction synthesis for synthetic maps and waypoint resolution
//! against both synthetic and externally-indexed maps. This crate performs
//! no I/O beyond the injected map-service collaborator; acquisition of the
//! source table and emission of the final artifact formats live outside.

pub mod config;
pub mod emit;
pub mod entity;
pub mod expand;
pub mod junction;
pub mod pipeline;
pub mod rejection;
pub mod road;
pub mod rules;
pub mod scenario;
pub mod select;
pub mod table;
pub mod value;
pub mod waypoint;

// Re-export commonly used types
pub use config::{BatchConfig, ColumnsCfg, SelectionCfg, SpeedRuleCfg, VirtualMapCfg, VocabCfg};
pub use emit::{behavior_records, road_records, Record};
pub use entity::{materialize_entities, EntityError};
pub use expand::{expand, expand_all};
pub use junction::{
    synthesize_junction, Connection, ContactPoint, IncomingLeg, JunctionPlan, JunctionSpec,
    PolePlan, SignalPlan,
};
pub use pipeline::{
    run_batch_indexed, run_batch_synthetic, BatchOutput, BatchStats, PipelineError, SyntheticMap,
};
pub use rejection::{Rejection, RejectionLog, RuleCategory};
pub use road::{
    build_lanes, synthesize_road, total_length, Geometry, LaneDef, LanePlan, LaneSlice, LaneSpec,
    LaneType, MarkColor, MarkType, PlanView, RoadLink, RoadMark, RoadPlan, RoadSpec,
    TransitionLane, WidthStage,
};
pub use rules::filter_rules;
pub use scenario::{
    ActionSpec, ActionType, AttrFamily, ConcreteScenario, DistMode, EndType, EntityId, EntityRole,
    EventSpec, JunctionType, LogicalScenario, PositionType, RelPlacement, RoadDirection, RoadType,
    RuleMode, TriggerSpec, TriggerType, Waypoint, WaypointSeq,
};
pub use select::select;
pub use table::{build_logical, RawTable};
pub use value::{parse_cell, CellValue, Markers, ParamValue, Scalar};
pub use waypoint::{
    all_entities_resolved, ego_lane_id, resolve_indexed, resolve_synthetic, synthetic_map_name,
    MapService, MapSession, ResolveError, RouteCatalog, RouteCode, RouteEndpoints,
};
