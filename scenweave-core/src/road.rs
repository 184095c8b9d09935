//! Road geometry synthesis for synthetic maps.
//!
//! A `RoadSpec` dispatches to a deterministic geometry sequence; the total
//! length derives from the road type and curve radius. Lane layouts carry
//! per-lane types, widths and road marks, plus an optional lane-count change
//! along the road.

use serde::{Deserialize, Serialize};

use crate::config::VirtualMapCfg;
use crate::scenario::{ConcreteScenario, RoadDirection, RoadType};

/// Road family of one scenario, in meters and canonical tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadSpec {
    pub road_type: RoadType,
    pub curve_radius: f64,
    pub direction: RoadDirection,
    pub speed_limit: f64,
    pub total_length: f64,
}

impl RoadSpec {
    /// Read the road family out of a concrete scenario. Unknown tokens fall
    /// back to a straight one-way road; the rule filters have already had
    /// their say at this point.
    #[must_use]
    pub fn from_scenario(scenario: &ConcreteScenario, cfg: &VirtualMapCfg) -> Self {
        let road_type = scenario
            .attr_text("Road.Type")
            .and_then(RoadType::from_token)
            .unwrap_or(RoadType::Straight);
        let curve_radius = scenario.attr_f64("Road.Curve").unwrap_or(0.0);
        let direction = scenario
            .attr_text("Road.Direction")
            .and_then(RoadDirection::from_token)
            .unwrap_or(RoadDirection::Same);
        let speed_limit = scenario.attr_f64("Road.Speedlimit").unwrap_or(0.0);

        Self {
            road_type,
            curve_radius,
            direction,
            speed_limit,
            total_length: total_length(road_type, curve_radius, cfg),
        }
    }
}

/// Arc length cap of a pure curve: a fixed share of the full circle.
fn max_curve_length(radius: f64, cfg: &VirtualMapCfg) -> f64 {
    (2.0 * 3.14 * radius * cfg.ratio_len_perimeter_curve).floor()
}

/// Deterministic total length per road type.
///
/// Straight and S-curve roads use the configured base length regardless of
/// radius; a pure curve is radius-driven; curve-in/out mix a fixed straight
/// share with an arc bounded by the max-curve cap.
#[must_use]
pub fn total_length(road_type: RoadType, radius: f64, cfg: &VirtualMapCfg) -> f64 {
    match road_type {
        RoadType::Straight | RoadType::CurveS => cfg.base_len,
        RoadType::Curve => max_curve_length(radius, cfg),
        RoadType::CurveIn | RoadType::CurveOut => {
            let straight = (cfg.base_len * cfg.ratio_len_total_straight).floor();
            let curve = max_curve_length(radius, cfg).min(cfg.base_len - straight);
            straight + curve
        }
    }
}

/// One plan-view primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Line { length: f64 },
    Arc { curvature: f64, length: f64 },
}

impl Geometry {
    #[must_use]
    pub const fn length(&self) -> f64 {
        match self {
            Self::Line { length } | Self::Arc { length, .. } => *length,
        }
    }
}

/// Ordered geometry sequence of one road reference line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanView {
    pub geometries: Vec<Geometry>,
}

impl PlanView {
    #[must_use]
    pub fn total_length(&self) -> f64 {
        self.geometries.iter().map(Geometry::length).sum()
    }
}

/// A curved type with zero radius is a logged anomaly, never a crash; the
/// resulting arc degenerates but the plan still materializes.
fn check_radius(road_type: RoadType, radius: f64) {
    if radius.abs() < 1e-9 {
        log::error!("road type {} with zero curve radius", road_type.token());
    }
}

/// Build the plan view for one road spec.
#[must_use]
pub fn synthesize_road(spec: &RoadSpec, cfg: &VirtualMapCfg) -> PlanView {
    let total = spec.total_length;
    let geometries = match spec.road_type {
        RoadType::Straight => vec![Geometry::Line { length: total }],
        RoadType::Curve => {
            check_radius(spec.road_type, spec.curve_radius);
            vec![Geometry::Arc {
                curvature: 1.0 / spec.curve_radius,
                length: total,
            }]
        }
        RoadType::CurveIn => {
            check_radius(spec.road_type, spec.curve_radius);
            let straight = (total * cfg.ratio_len_total_straight).floor();
            vec![
                Geometry::Line { length: straight },
                Geometry::Arc {
                    curvature: 1.0 / spec.curve_radius,
                    length: total - straight,
                },
            ]
        }
        RoadType::CurveOut => {
            check_radius(spec.road_type, spec.curve_radius);
            let straight = (total * cfg.ratio_len_total_straight).floor();
            vec![
                Geometry::Arc {
                    curvature: 1.0 / spec.curve_radius,
                    length: total - straight,
                },
                Geometry::Line { length: straight },
            ]
        }
        RoadType::CurveS => {
            check_radius(spec.road_type, spec.curve_radius);
            let third = (total / 3.0).floor();
            vec![
                Geometry::Arc {
                    curvature: 1.0 / spec.curve_radius,
                    length: third,
                },
                Geometry::Arc {
                    curvature: -1.0 / spec.curve_radius,
                    length: third,
                },
                Geometry::Arc {
                    curvature: 1.0 / spec.curve_radius,
                    length: third,
                },
            ]
        }
    };
    PlanView { geometries }
}

/// Road-mark line style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkType {
    Solid,
    Broken,
    SolidSolid,
    SolidBroken,
    BrokenSolid,
    BrokenBroken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkColor {
    White,
    Yellow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadMark {
    pub mark_type: MarkType,
    pub color: MarkColor,
}

impl RoadMark {
    #[must_use]
    pub const fn solid() -> Self {
        Self {
            mark_type: MarkType::Solid,
            color: MarkColor::White,
        }
    }

    #[must_use]
    pub const fn broken() -> Self {
        Self {
            mark_type: MarkType::Broken,
            color: MarkColor::White,
        }
    }
}

/// Drivability class of one lane slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneType {
    Driving,
    Entry,
    Exit,
    Shoulder,
}

/// One ordinary lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSlice {
    pub lane_type: LaneType,
    pub width: f64,
    pub road_mark: RoadMark,
}

/// Lane-count change along the road (merge or split section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneDef {
    pub s_start: f64,
    pub s_end: f64,
    pub lanes_start: u32,
    pub lanes_end: u32,
    /// Lane id created or removed by the change.
    pub sub_lane: i32,
}

/// Piecewise-linear width stage of a transition lane: `w(s) = a + b·(s-s0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidthStage {
    pub a: f64,
    pub b: f64,
    pub s_offset: f64,
    pub lane_type: LaneType,
}

/// Extra lane whose width tapers along the road (ramp transitions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionLane {
    pub stages: Vec<WidthStage>,
    pub road_mark: RoadMark,
}

/// Complete lane layout of one road.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanePlan {
    pub right: Vec<LaneSlice>,
    pub left: Vec<LaneSlice>,
    pub center_mark: RoadMark,
    pub defs: Vec<LaneDef>,
    pub transitions: Vec<TransitionLane>,
}

impl LanePlan {
    #[must_use]
    pub fn right_lane_count(&self) -> usize {
        self.right.len()
    }

    #[must_use]
    pub fn lane_width(&self) -> f64 {
        self.right.first().map_or(0.0, |l| l.width)
    }
}

/// Lane family of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSpec {
    pub num: u32,
    pub num2: u32,
    pub num2_dist: f64,
    pub width: f64,
}

impl LaneSpec {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_scenario(scenario: &ConcreteScenario, cfg: &VirtualMapCfg) -> Self {
        Self {
            num: scenario.attr_i64("Lane.Num").unwrap_or(1).max(0) as u32,
            num2: scenario.attr_i64("Lane.Num2").unwrap_or(0).max(0) as u32,
            num2_dist: scenario.attr_f64("Lane.Num2Dist").unwrap_or(0.0),
            width: scenario
                .attr_f64("Lane.Width")
                .filter(|w| *w > 0.0)
                .unwrap_or(cfg.lane_width),
        }
    }
}

/// Read the marking family; missing cells default to broken white lines
/// between lanes and a solid center line.
#[must_use]
pub fn marks_from_scenario(scenario: &ConcreteScenario) -> (RoadMark, RoadMark) {
    let mark_type = match scenario.attr_text("Marking.Type") {
        Some("solid") => MarkType::Solid,
        Some("solid_solid") => MarkType::SolidSolid,
        Some("solid_broken") => MarkType::SolidBroken,
        Some("broken_solid") => MarkType::BrokenSolid,
        Some("broken_broken") => MarkType::BrokenBroken,
        _ => MarkType::Broken,
    };
    let color = match scenario.attr_text("Marking.Color") {
        Some("yellow") => MarkColor::Yellow,
        _ => MarkColor::White,
    };
    let lane_mark = RoadMark { mark_type, color };
    let center_mark = RoadMark {
        mark_type: MarkType::Solid,
        color,
    };
    (lane_mark, center_mark)
}

/// Build the lane layout: `num` right lanes, mirrored left lanes for
/// opposite-direction roads, and a merge/split section when the lane count
/// changes along the road.
#[must_use]
pub fn build_lanes(
    road: &RoadSpec,
    lane: &LaneSpec,
    lane_mark: RoadMark,
    center_mark: RoadMark,
    cfg: &VirtualMapCfg,
) -> LanePlan {
    let slice = |mark: RoadMark| LaneSlice {
        lane_type: LaneType::Driving,
        width: lane.width,
        road_mark: mark,
    };
    let right: Vec<LaneSlice> = (0..lane.num)
        .map(|i| {
            // Outermost line is solid, inner separators follow the marking
            // family.
            if i + 1 == lane.num {
                slice(RoadMark::solid())
            } else {
                slice(lane_mark)
            }
        })
        .collect();
    let left = if road.direction == RoadDirection::Opposite {
        right.clone()
    } else {
        Vec::new()
    };

    let mut defs = Vec::new();
    if lane.num2 != 0 && lane.num2 != lane.num {
        let s_start = cfg.start_s + lane.num2_dist;
        let s_end = if lane.num2 > lane.num {
            s_start + cfg.split_len_change
        } else {
            s_start + cfg.merge_len_change
        };
        #[allow(clippy::cast_possible_wrap)]
        let sub_lane = if lane.num > lane.num2 {
            -(lane.num as i32)
        } else {
            -(lane.num as i32) - 1
        };
        defs.push(LaneDef {
            s_start,
            s_end,
            lanes_start: lane.num,
            lanes_end: lane.num2,
            sub_lane,
        });
    }

    LanePlan {
        right,
        left,
        center_mark,
        defs,
        transitions: Vec::new(),
    }
}

/// A synthesized road: reference line, lanes, limits and links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadPlan {
    pub id: u32,
    pub plan_view: PlanView,
    pub lanes: LanePlan,
    pub speed_limit: f64,
    pub predecessor: Option<RoadLink>,
    pub successor: Option<RoadLink>,
}

impl RoadPlan {
    #[must_use]
    pub fn length(&self) -> f64 {
        self.plan_view.total_length()
    }

    /// Copy of this road with a new id and a single-geometry reference line
    /// of the given length, used when carving junction legs out of the base
    /// road.
    #[must_use]
    pub fn derived(&self, id: u32, length: f64) -> Self {
        let mut road = self.clone();
        road.id = id;
        road.predecessor = None;
        road.successor = None;
        road.plan_view = PlanView {
            geometries: vec![Geometry::Line { length }],
        };
        road
    }
}

/// Link of a road end to a junction or neighboring road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoadLink {
    Junction(u32),
    Road(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;

    fn cfg() -> VirtualMapCfg {
        BatchConfig::default().virtual_map
    }

    fn spec(road_type: RoadType, radius: f64) -> RoadSpec {
        let cfg = cfg();
        RoadSpec {
            road_type,
            curve_radius: radius,
            direction: RoadDirection::Same,
            speed_limit: 33.0,
            total_length: total_length(road_type, radius, &cfg),
        }
    }

    #[test]
    fn straight_and_s_curve_lengths_ignore_radius() {
        let cfg = cfg();
        for radius in [0.0, 50.0, 500.0] {
            assert!((total_length(RoadType::Straight, radius, &cfg) - cfg.base_len).abs() < 1e-9);
            assert!((total_length(RoadType::CurveS, radius, &cfg) - cfg.base_len).abs() < 1e-9);
        }
    }

    #[test]
    fn pure_curve_length_follows_radius() {
        let cfg = cfg();
        let short = total_length(RoadType::Curve, 100.0, &cfg);
        let long = total_length(RoadType::Curve, 300.0, &cfg);
        assert!(long > short);
        assert!((short - (2.0 * 3.14 * 100.0 * cfg.ratio_len_perimeter_curve).floor()).abs() < 1e-9);
    }

    #[test]
    fn mixed_curve_is_bounded_by_the_max_curve_cap() {
        let cfg = cfg();
        let straight = (cfg.base_len * cfg.ratio_len_total_straight).floor();
        for radius in [10.0, 100.0, 10_000.0] {
            let total = total_length(RoadType::CurveIn, radius, &cfg);
            let curve_part = total - straight;
            assert!(curve_part <= max_curve_length(radius, &cfg) + 1e-9);
            assert!(total <= cfg.base_len + 1e-9);
        }
    }

    #[test]
    fn straight_road_is_a_single_line() {
        let plan = synthesize_road(&spec(RoadType::Straight, 0.0), &cfg());
        assert_eq!(plan.geometries.len(), 1);
        assert!(matches!(plan.geometries[0], Geometry::Line { .. }));
    }

    #[test]
    fn pure_curve_is_a_single_arc_with_radius_curvature() {
        let plan = synthesize_road(&spec(RoadType::Curve, 200.0), &cfg());
        assert_eq!(plan.geometries.len(), 1);
        match plan.geometries[0] {
            Geometry::Arc { curvature, .. } => assert!((curvature - 0.005).abs() < 1e-12),
            Geometry::Line { .. } => panic!("expected an arc"),
        }
    }

    #[test]
    fn curve_in_is_line_then_arc_and_curve_out_mirrors() {
        let plan_in = synthesize_road(&spec(RoadType::CurveIn, 200.0), &cfg());
        assert!(matches!(plan_in.geometries[0], Geometry::Line { .. }));
        assert!(matches!(plan_in.geometries[1], Geometry::Arc { .. }));

        let plan_out = synthesize_road(&spec(RoadType::CurveOut, 200.0), &cfg());
        assert!(matches!(plan_out.geometries[0], Geometry::Arc { .. }));
        assert!(matches!(plan_out.geometries[1], Geometry::Line { .. }));
    }

    #[test]
    fn s_curve_is_three_equal_arcs_with_negated_middle() {
        let plan = synthesize_road(&spec(RoadType::CurveS, 150.0), &cfg());
        assert_eq!(plan.geometries.len(), 3);
        let curvatures: Vec<f64> = plan
            .geometries
            .iter()
            .map(|g| match g {
                Geometry::Arc { curvature, .. } => *curvature,
                Geometry::Line { .. } => panic!("expected arcs"),
            })
            .collect();
        assert!(curvatures[0] > 0.0);
        assert!((curvatures[1] + curvatures[0]).abs() < 1e-12);
        assert!((curvatures[2] - curvatures[0]).abs() < 1e-12);
        let lengths: Vec<f64> = plan.geometries.iter().map(Geometry::length).collect();
        assert!((lengths[0] - lengths[1]).abs() < 1e-9);
        assert!((lengths[1] - lengths[2]).abs() < 1e-9);
    }

    #[test]
    fn zero_radius_curve_never_panics() {
        let plan = synthesize_road(&spec(RoadType::Curve, 0.0), &cfg());
        assert_eq!(plan.geometries.len(), 1);
    }

    #[test]
    fn opposite_direction_mirrors_the_lane_set() {
        let cfg = cfg();
        let mut road = spec(RoadType::Straight, 0.0);
        road.direction = RoadDirection::Opposite;
        let lane = LaneSpec {
            num: 2,
            num2: 0,
            num2_dist: 0.0,
            width: 3.5,
        };
        let lanes = build_lanes(&road, &lane, RoadMark::broken(), RoadMark::solid(), &cfg);
        assert_eq!(lanes.right.len(), 2);
        assert_eq!(lanes.left.len(), 2);
    }

    #[test]
    fn lane_count_change_creates_a_merge_section() {
        let cfg = cfg();
        let road = spec(RoadType::Straight, 0.0);
        let lane = LaneSpec {
            num: 3,
            num2: 2,
            num2_dist: 100.0,
            width: 3.5,
        };
        let lanes = build_lanes(&road, &lane, RoadMark::broken(), RoadMark::solid(), &cfg);
        assert_eq!(lanes.defs.len(), 1);
        let def = &lanes.defs[0];
        assert!((def.s_start - (cfg.start_s + 100.0)).abs() < 1e-9);
        assert!((def.s_end - def.s_start - cfg.merge_len_change).abs() < 1e-9);
        assert_eq!(def.sub_lane, -3);
    }

    #[test]
    fn lane_count_increase_creates_a_split_section() {
        let cfg = cfg();
        let road = spec(RoadType::Straight, 0.0);
        let lane = LaneSpec {
            num: 2,
            num2: 3,
            num2_dist: 0.0,
            width: 3.5,
        };
        let lanes = build_lanes(&road, &lane, RoadMark::broken(), RoadMark::solid(), &cfg);
        let def = &lanes.defs[0];
        assert_eq!(def.lanes_start, 2);
        assert_eq!(def.lanes_end, 3);
        assert_eq!(def.sub_lane, -3);
    }
}
