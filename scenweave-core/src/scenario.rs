//! Scenario data model: logical and concrete scenarios, entity roles, and
//! the closed dispatch enums used across the pipeline.
//!
//! Attribute paths (dotted, e.g. `Npc1.Dyn2.Action1.Type`) are the backbone
//! of both scenario forms. Typed entity views are materialized from the
//! paths once a concrete scenario has survived the rule filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::{ParamValue, Scalar};

/// Maximum waypoints stored inline without allocation; one start plus one
/// end covers every synthetic route.
pub type WaypointSeq = SmallVec<[Waypoint; 2]>;

/// One authored row describing a scenario family with parameterized
/// attributes. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalScenario {
    pub functional_id: String,
    pub logical_id: String,
    /// Naming template for concrete ids; empty means counter-based naming.
    pub naming: String,
    pub description: String,
    /// Externally-indexed map name; empty for synthetic maps.
    pub map_file: String,
    /// Classification prefix derived from the classification dictionary.
    pub classify: String,
    pub attrs: BTreeMap<String, ParamValue>,
    /// Factor of the unit suffix stripped from each attribute cell.
    pub unit_factors: BTreeMap<String, f64>,
}

impl LogicalScenario {
    /// Derived identity used for deduplication.
    #[must_use]
    pub fn identity(&self) -> (&str, &str) {
        (&self.functional_id, &self.logical_id)
    }

    /// Identity joined by the link symbol, the base of every concrete id.
    #[must_use]
    pub fn joined_id(&self, link: &str) -> String {
        match (self.functional_id.is_empty(), self.logical_id.is_empty()) {
            (false, false) => format!("{}{link}{}", self.functional_id, self.logical_id),
            (false, true) => self.functional_id.clone(),
            _ => self.logical_id.clone(),
        }
    }
}

/// One fully expanded scenario instance; every attribute is scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteScenario {
    pub functional_id: String,
    pub logical_id: String,
    /// Globally unique after dedup; earliest occurrence wins.
    pub concrete_id: String,
    pub description: String,
    /// Map key: externally-indexed map name, or the derived synthetic map
    /// name once road synthesis has run.
    pub map_file: String,
    pub attrs: BTreeMap<String, Scalar>,
    /// Typed entity views; populated after the rule filters.
    #[serde(default)]
    pub entities: Vec<EntityRole>,
}

impl ConcreteScenario {
    #[must_use]
    pub fn attr(&self, path: &str) -> Option<&Scalar> {
        self.attrs.get(path)
    }

    #[must_use]
    pub fn attr_f64(&self, path: &str) -> Option<f64> {
        self.attrs.get(path).and_then(Scalar::as_f64)
    }

    #[must_use]
    pub fn attr_i64(&self, path: &str) -> Option<i64> {
        self.attrs.get(path).and_then(Scalar::as_i64)
    }

    #[must_use]
    pub fn attr_text(&self, path: &str) -> Option<&str> {
        self.attrs.get(path).and_then(Scalar::as_text)
    }

    /// Names of entities with a physical model, in Ego-first order.
    #[must_use]
    pub fn entity_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.attrs.contains_key("Ego.Phy.Model") {
            names.push("Ego".to_string());
        }
        for k in 1.. {
            let name = format!("Npc{k}");
            if self.attrs.contains_key(&format!("{name}.Phy.Model")) {
                names.push(name);
            } else {
                break;
            }
        }
        names
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityRole> {
        self.entities.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn ego(&self) -> Option<&EntityRole> {
        self.entities.iter().find(|e| e.id == EntityId::Ego)
    }
}

/// Identity of a traffic participant within one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Ego,
    Npc(u8),
}

impl EntityId {
    /// Parse from an attribute-path prefix (`Ego`, `Npc3`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "Ego" {
            return Some(Self::Ego);
        }
        name.strip_prefix("Npc")
            .and_then(|n| n.parse::<u8>().ok())
            .map(Self::Npc)
    }
}

/// Relative placement of an entity against a named reference entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelPlacement {
    /// Name of the referenced entity (single hop only).
    pub reference: String,
    /// Lane-wise side offset relative to the reference.
    pub side: i32,
    /// Longitudinal offset in meters relative to the reference.
    pub longitudinal: f64,
}

/// A traffic participant with its physical attributes, initial state and
/// dynamic events. Owns its waypoint sequence once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRole {
    pub id: EntityId,
    pub name: String,
    pub category: String,
    pub model: String,
    /// Initial speed in m/s.
    pub speed: f64,
    pub lat_offset: f64,
    pub heading: f64,
    /// Route token; resolved against `RouteCode` or the registered routes.
    pub route: String,
    pub rel: Option<RelPlacement>,
    pub events: Vec<EventSpec>,
    pub waypoints: WaypointSeq,
}

impl EntityRole {
    /// An entity is active when a physical model is declared for it.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.model.is_empty()
    }

    /// Length 1 = placement, >= 2 = route.
    #[must_use]
    pub fn is_routed(&self) -> bool {
        self.waypoints.len() >= 2
    }
}

/// One dynamic event: a trigger firing one or more actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub trigger: TriggerSpec,
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub trigger_type: TriggerType,
    pub value: f64,
    pub rule: RuleMode,
    pub dist_mode: DistMode,
    /// Referenced entity for entity-conditioned triggers; empty otherwise.
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: ActionType,
    pub value: f64,
    pub end_type: EndType,
    pub end_value: f64,
}

/// Waypoint in lane coordinates or world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Waypoint {
    Lane {
        road_id: u32,
        lane_id: i32,
        offset: f64,
        s: f64,
        heading: f64,
    },
    World {
        x: f64,
        y: f64,
        z: f64,
    },
}

impl Waypoint {
    /// Copy with offset and heading replaced; world waypoints are returned
    /// unchanged.
    #[must_use]
    pub fn with_offset_heading(&self, offset: f64, heading: f64) -> Self {
        match *self {
            Self::Lane {
                road_id,
                lane_id,
                s,
                ..
            } => Self::Lane {
                road_id,
                lane_id,
                offset,
                s,
                heading,
            },
            Self::World { .. } => self.clone(),
        }
    }
}

macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// All variants, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Canonical token for this variant.
            #[must_use]
            pub const fn token(self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }

            /// Parse a canonical token, case-sensitively.
            #[must_use]
            pub fn from_token(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

token_enum! {
    /// Shape of the synthesized road.
    RoadType {
        Straight => "straight",
        Curve => "curve",
        CurveIn => "curveIn",
        CurveOut => "curveOut",
        CurveS => "curveS",
    }
}

token_enum! {
    /// Traffic direction layout of the synthesized road.
    RoadDirection {
        Same => "same",
        Opposite => "opposite",
    }
}

token_enum! {
    /// Closed set of junction layouts. Roundabout and the four "analogous"
    /// ramp styles are documented no-ops in the synthesizer.
    JunctionType {
        None => "none",
        Crossroad => "crossroad",
        TRoad => "tRoad",
        YJunction => "yJunction",
        DirectConverging => "directConverging",
        DirectConvergingTwolane => "directConvergingTwolane",
        ParallelConverging => "parallelConverging",
        ParallelConvergingTwolane => "parallelConvergingTwolane",
        AnalogousConverging => "analogousConverging",
        AnalogousConvergingTwolane => "analogousConvergingTwolane",
        DirectDiverging => "directDiverging",
        DirectDivergingTwolane => "directDivergingTwolane",
        ParallelDiverging => "parallelDiverging",
        ParallelDivergingTwolane => "parallelDivergingTwolane",
        AnalogousDiverging => "analogousDiverging",
        AnalogousDivergingTwolane => "analogousDivergingTwolane",
        Roundabout => "roundabout",
    }
}

token_enum! {
    /// Trigger condition kinds.
    TriggerType {
        Time => "time",
        Ttc => "ttc",
        Thw => "thw",
        Distance => "distance",
        Speed => "speed",
    }
}

token_enum! {
    /// Action kinds fired by a trigger.
    ActionType {
        Speed => "speed",
        LaneChange => "laneChange",
        LaneOffset => "laneOffset",
        Stop => "stop",
        UserDefined => "userDefined",
    }
}

token_enum! {
    /// Distance interpretation for entity-conditioned triggers.
    DistMode {
        Euclidean => "euclidean",
        Lane => "lane",
    }
}

token_enum! {
    /// Comparison rule of a trigger condition.
    RuleMode {
        GreaterThan => "greaterThan",
        LessThan => "lessThan",
        EqualTo => "equalTo",
    }
}

token_enum! {
    /// How an action run terminates.
    EndType {
        None => "none",
        Time => "time",
        Distance => "distance",
    }
}

token_enum! {
    /// Placement flavor of a position specification.
    PositionType {
        Lane => "lane",
        World => "world",
        Relative => "relative",
    }
}

/// Structural families used by paired expansion: attributes pair only with
/// members of their own family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrFamily {
    /// Road, junction, lane and marking attributes.
    Road,
    /// Traffic-light / signal attributes.
    Signal,
    /// Per-entity attributes including triggers and actions.
    Entity,
    /// Environment attributes (time, weather).
    Environment,
}

impl AttrFamily {
    /// Family of a dotted attribute path, if it belongs to one.
    #[must_use]
    pub fn of(path: &str) -> Option<Self> {
        let head = path.split('.').next().unwrap_or_default();
        match head {
            "Road" | "Junction" | "Lane" | "Marking" => Some(Self::Road),
            "Trafficlight" => Some(Self::Signal),
            "Env" => Some(Self::Environment),
            _ if head == "Ego" || head.starts_with("Npc") => Some(Self::Entity),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_parses_prefixes() {
        assert_eq!(EntityId::from_name("Ego"), Some(EntityId::Ego));
        assert_eq!(EntityId::from_name("Npc2"), Some(EntityId::Npc(2)));
        assert_eq!(EntityId::from_name("Bystander"), None);
    }

    #[test]
    fn token_round_trip_is_total() {
        for t in RoadType::ALL {
            assert_eq!(RoadType::from_token(t.token()), Some(*t));
        }
        for t in JunctionType::ALL {
            assert_eq!(JunctionType::from_token(t.token()), Some(*t));
        }
        for t in TriggerType::ALL {
            assert_eq!(TriggerType::from_token(t.token()), Some(*t));
        }
        for t in ActionType::ALL {
            assert_eq!(ActionType::from_token(t.token()), Some(*t));
        }
    }

    #[test]
    fn junction_union_covers_all_layouts() {
        // Three hub layouts, eight ramp layouts, four analogous no-ops,
        // roundabout and none.
        assert_eq!(JunctionType::ALL.len(), 17);
    }

    #[test]
    fn families_follow_path_prefixes() {
        assert_eq!(AttrFamily::of("Road.Type"), Some(AttrFamily::Road));
        assert_eq!(AttrFamily::of("Marking.Status"), Some(AttrFamily::Road));
        assert_eq!(AttrFamily::of("Trafficlight.Cycle"), Some(AttrFamily::Signal));
        assert_eq!(AttrFamily::of("Npc3.Ini.Speed"), Some(AttrFamily::Entity));
        assert_eq!(AttrFamily::of("Env.Weather"), Some(AttrFamily::Environment));
        assert_eq!(AttrFamily::of("Naming"), None);
    }

    #[test]
    fn joined_id_tolerates_missing_halves() {
        let mut logical = LogicalScenario {
            functional_id: "F01".into(),
            logical_id: "L02".into(),
            naming: String::new(),
            description: String::new(),
            map_file: String::new(),
            classify: String::new(),
            attrs: BTreeMap::new(),
            unit_factors: BTreeMap::new(),
        };
        assert_eq!(logical.joined_id("_"), "F01_L02");
        logical.logical_id.clear();
        assert_eq!(logical.joined_id("_"), "F01");
    }
}
