//! Junction synthesis for synthetic maps.
//!
//! A `JunctionSpec` dispatches to one of three families: plain intersections
//! (incoming legs around a circular hub, pairwise connected), merge/diverge
//! ramps (four roads wired through two connectors, with width tapers from a
//! design-speed lookup table), and documented no-ops for the variants the
//! generator does not lay out (roundabouts and the "analogous" ramp styles).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::config::VirtualMapCfg;
use crate::road::{
    Geometry, LaneDef, LaneType, PlanView, RoadLink, RoadMark, RoadPlan, TransitionLane,
    WidthStage,
};
use crate::scenario::{ConcreteScenario, JunctionType};

/// Junction family of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionSpec {
    pub junction_type: JunctionType,
    /// Number of junctions along the base road.
    pub count: u32,
    /// Traffic lights present on the junction legs.
    pub trafficlight: bool,
    /// Signal cycle length in seconds; zero when static.
    pub cycle: f64,
}

impl JunctionSpec {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_scenario(scenario: &ConcreteScenario) -> Self {
        Self {
            junction_type: scenario
                .attr_text("Junction.Type")
                .and_then(JunctionType::from_token)
                .unwrap_or(JunctionType::None),
            count: scenario.attr_i64("Junction.Num").unwrap_or(0).max(0) as u32,
            trafficlight: scenario.attr_i64("Trafficlight.Status").unwrap_or(0) != 0,
            cycle: scenario.attr_f64("Trafficlight.Cycle").unwrap_or(0.0),
        }
    }

    /// Incoming leg count of the hub families.
    #[must_use]
    pub const fn leg_count(&self) -> u32 {
        match self.junction_type {
            JunctionType::Crossroad => 4,
            JunctionType::TRoad | JunctionType::YJunction => 3,
            _ => 0,
        }
    }
}

/// Which end of a road meets the junction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPoint {
    Predecessor,
    Successor,
}

/// One road entering a junction hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingLeg {
    pub road_id: u32,
    pub radius: f64,
    pub angle: f64,
    pub contact: ContactPoint,
}

/// Lane-level wiring between two roads of a junction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub incoming_road: u32,
    pub linked_road: u32,
    pub incoming_lane: Option<i32>,
    pub linked_lane: Option<i32>,
}

impl Connection {
    const fn whole_road(incoming: u32, linked: u32) -> Self {
        Self {
            incoming_road: incoming,
            linked_road: linked,
            incoming_lane: None,
            linked_lane: None,
        }
    }
}

/// Pole object carrying a signal head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolePlan {
    pub id: u32,
    pub road_id: u32,
    pub s: f64,
    pub t: f64,
    pub heading: f64,
}

/// Signal head bound to a pole, with its control linkage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPlan {
    pub id: u32,
    pub road_id: u32,
    pub pole_id: u32,
    pub s: f64,
    pub t: f64,
    pub z_offset: f64,
    pub control_ref: u32,
}

/// One synthesized junction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionPlan {
    pub id: u32,
    pub name: String,
    pub incoming: Vec<IncomingLeg>,
    pub connections: Vec<Connection>,
    pub poles: Vec<PolePlan>,
    pub signals: Vec<SignalPlan>,
}

/// Ramp stage lengths and gradient for one design speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampRule {
    pub l1: f64,
    pub l2: f64,
    pub gradient_rate: f64,
    pub l3: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RampKind {
    DecelOneLane,
    DecelTwoLane,
    AccelOneLaneDirect,
    AccelOneLaneParallel,
    AccelTwoLane,
}

/// Design-standard taper table, rows keyed by design speed in km/h.
/// Reproduced verbatim from the highway ramp design tables.
fn ramp_rule(kind: RampKind, design_speed: u32) -> RampRule {
    let rule = |l1: f64, l2: f64, gradient_rate: f64, l3: f64, total: f64| RampRule {
        l1,
        l2,
        gradient_rate,
        l3,
        total,
    };
    match kind {
        RampKind::DecelOneLane => match design_speed {
            100 => rule(125.0, 90.0, 0.04444, 0.0, 215.0),
            80 => rule(110.0, 80.0, 0.05, 0.0, 190.0),
            60 => rule(95.0, 70.0, 0.05714, 0.0, 165.0),
            _ => rule(145.0, 100.0, 0.04, 0.0, 245.0),
        },
        RampKind::DecelTwoLane => match design_speed {
            100 => rule(190.0, 80.0, 0.05, 250.0, 520.0),
            80 => rule(170.0, 70.0, 0.05714, 200.0, 440.0),
            60 => rule(140.0, 60.0, 0.06667, 180.0, 380.0),
            _ => rule(225.0, 90.0, 0.04444, 300.0, 615.0),
        },
        RampKind::AccelOneLaneDirect => match design_speed {
            100 => rule(200.0, 160.0, 0.025, 0.0, 360.0),
            80 => rule(180.0, 160.0, 0.05714, 0.0, 340.0),
            60 => rule(155.0, 140.0, 0.06667, 0.0, 295.0),
            _ => rule(230.0, 180.0, 0.02222, 0.0, 410.0),
        },
        RampKind::AccelOneLaneParallel => match design_speed {
            100 => rule(200.0, 80.0, 0.025, 0.0, 280.0),
            80 => rule(180.0, 70.0, 0.05714, 0.0, 250.0),
            60 => rule(155.0, 60.0, 0.06667, 0.0, 215.0),
            _ => rule(230.0, 90.0, 0.02222, 0.0, 320.0),
        },
        RampKind::AccelTwoLane => match design_speed {
            100 => rule(350.0, 160.0, 0.025, 350.0, 860.0),
            80 => rule(310.0, 150.0, 0.02667, 300.0, 760.0),
            60 => rule(270.0, 140.0, 0.02857, 250.0, 660.0),
            _ => rule(400.0, 180.0, 0.02222, 400.0, 980.0),
        },
    }
}

/// Curvature and arc length of a ramp taper from the gradient-rate formula:
/// `w2` is lane-width-derived, `half_angle = atan((g·L + w2)/L)`,
/// `radius = L / (2·sin·cos(half_angle))`, `curvature = -1/radius`,
/// `arc_length = radius · 2·half_angle`.
#[must_use]
pub fn taper_curvature_arclength(
    tangent_len: f64,
    gradient_rate: f64,
    through_lanes: usize,
    ramp_lanes: usize,
    lane_width: f64,
) -> (f64, f64) {
    if gradient_rate.abs() < 1e-9 {
        return (0.0, 0.0);
    }
    let w2 = (through_lanes + ramp_lanes) as f64 * lane_width;
    let w3 = gradient_rate * tangent_len + w2;
    let half_angle = (w3 / tangent_len).atan();
    let radius = tangent_len / (2.0 * half_angle.sin() * half_angle.cos());
    let curvature = -1.0 / radius;
    let arc_length = radius * (2.0 * half_angle);
    (curvature, arc_length)
}

/// Synthesize the junctions and extra roads of one scenario.
///
/// Returns `(junctions, roads)`; the unimplemented variants return empty
/// vectors by contract. The base road is the scenario's synthesized main
/// road; junction legs derive from it.
#[must_use]
pub fn synthesize_junction(
    spec: &JunctionSpec,
    base: &RoadPlan,
    cfg: &VirtualMapCfg,
) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
    let ctx = SynthContext::new(spec, base, cfg);
    match spec.junction_type {
        JunctionType::None => (Vec::new(), Vec::new()),
        JunctionType::Crossroad => {
            ctx.hub(&[0.0, PI / 2.0, 3.0 * PI / 2.0, PI])
        }
        JunctionType::TRoad => ctx.hub(&[0.0, PI / 2.0, 3.0 * PI / 2.0]),
        JunctionType::YJunction => ctx.hub(&[0.0, 1.3 * PI / 2.0, 3.2 * PI / 2.0]),
        JunctionType::DirectConverging => ctx.direct_converging(),
        JunctionType::DirectConvergingTwolane => ctx.direct_converging_twolane(),
        JunctionType::ParallelConverging => ctx.parallel_converging(),
        JunctionType::ParallelConvergingTwolane => ctx.parallel_converging_twolane(),
        JunctionType::DirectDiverging => ctx.direct_diverging(),
        JunctionType::DirectDivergingTwolane => ctx.direct_diverging_twolane(),
        JunctionType::ParallelDiverging => ctx.parallel_diverging(),
        JunctionType::ParallelDivergingTwolane => ctx.parallel_diverging_twolane(),
        JunctionType::AnalogousConverging
        | JunctionType::AnalogousConvergingTwolane
        | JunctionType::AnalogousDiverging
        | JunctionType::AnalogousDivergingTwolane
        | JunctionType::Roundabout => {
            log::debug!(
                "junction type {} is not laid out, returning empty plans",
                spec.junction_type.token()
            );
            (Vec::new(), Vec::new())
        }
    }
}

/// Shared geometry context of one synthesis call.
struct SynthContext<'a> {
    spec: &'a JunctionSpec,
    base: &'a RoadPlan,
    cfg: &'a VirtualMapCfg,
    /// Leg length: the base road split evenly around its junctions.
    leg_len: f64,
    through_lanes: usize,
    width: f64,
}

impl<'a> SynthContext<'a> {
    fn new(spec: &'a JunctionSpec, base: &'a RoadPlan, cfg: &'a VirtualMapCfg) -> Self {
        let through_lanes = base.lanes.right_lane_count();
        Self {
            spec,
            base,
            cfg,
            leg_len: base.length() / f64::from(spec.count + 1),
            through_lanes,
            width: base.lanes.lane_width(),
        }
    }

    /// Plain intersection: legs at fixed angles around a circular hub,
    /// pairwise connected, with optional signal heads per leg.
    fn hub(&self, angles: &[f64]) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let mut junction = JunctionPlan {
            id: self.cfg.start_junction_id,
            name: self.spec.junction_type.token().to_string(),
            incoming: Vec::new(),
            connections: Vec::new(),
            poles: Vec::new(),
            signals: Vec::new(),
        };
        let mut roads = Vec::with_capacity(angles.len());

        for (i, &angle) in angles.iter().enumerate() {
            let road_id = self.cfg.start_road_id + i as u32;
            let mut road = self.base.derived(road_id, self.leg_len);
            road.successor = Some(RoadLink::Junction(junction.id));

            if self.spec.trafficlight {
                let pole_id = self.cfg.start_object_id + i as u32;
                let signal_id = self.cfg.start_signal_id + i as u32;
                let t_pole = self.through_lanes as f64 * self.width + 1.0;
                junction.poles.push(PolePlan {
                    id: pole_id,
                    road_id,
                    s: self.leg_len,
                    t: t_pole,
                    heading: -1.571,
                });
                // Signals on opposite legs share a control group.
                let control_value = signal_id.saturating_sub(1 + 2 * i as u32);
                let control_ref = if i < 3 {
                    100_000_000 + control_value
                } else {
                    control_value
                };
                junction.signals.push(SignalPlan {
                    id: signal_id,
                    road_id,
                    pole_id,
                    s: self.leg_len,
                    t: t_pole / 2.0,
                    z_offset: 5.95,
                    control_ref,
                });
            }

            junction.incoming.push(IncomingLeg {
                road_id,
                radius: self.cfg.junction_radius,
                angle,
                contact: ContactPoint::Successor,
            });
            for j in 0..i {
                junction.connections.push(Connection::whole_road(
                    self.cfg.start_road_id + j as u32,
                    road_id,
                ));
            }
            roads.push(road);
        }

        (vec![junction], roads)
    }

    /// Four-road ramp skeleton: entry straight, transition, exit straight
    /// and the ramp itself, wired through two connectors.
    fn ramp(
        &self,
        converging: bool,
        transition_len: f64,
        transition_lanes: Vec<TransitionLane>,
        ramp_geometry: Vec<Geometry>,
        ramp_lanes: u32,
        ramp_defs: Vec<LaneDef>,
    ) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let first_road = self.cfg.start_road_id;
        let junction1_id = self.cfg.start_junction_id;
        let junction2_id = self.cfg.start_junction_id + 1;

        let mut rd1 = self.base.derived(first_road, self.leg_len);
        let mut rd2 = self.base.derived(first_road + 1, transition_len);
        let mut rd3 = self.base.derived(first_road + 2, self.leg_len);

        // The transition road separates from its outermost through lane
        // with a broken line and carries the tapering extra lanes.
        if let Some(outer) = rd2.lanes.right.last_mut() {
            outer.road_mark = RoadMark::broken();
        }
        rd2.lanes.transitions = transition_lanes;

        let mut rd4 = RoadPlan {
            id: first_road + 3,
            plan_view: PlanView {
                geometries: ramp_geometry,
            },
            lanes: crate::road::LanePlan {
                right: (0..ramp_lanes)
                    .map(|i| crate::road::LaneSlice {
                        lane_type: if converging { LaneType::Entry } else { LaneType::Exit },
                        width: self.width,
                        // Multi-lane ramps keep a broken line between lanes.
                        road_mark: if ramp_lanes > 1 && i == 0 {
                            RoadMark::broken()
                        } else {
                            RoadMark::solid()
                        },
                    })
                    .collect(),
                left: Vec::new(),
                center_mark: RoadMark::solid(),
                defs: ramp_defs,
                transitions: Vec::new(),
            },
            speed_limit: self.base.speed_limit,
            predecessor: None,
            successor: None,
        };

        rd1.successor = Some(RoadLink::Junction(junction1_id));
        rd2.predecessor = Some(RoadLink::Junction(junction1_id));
        rd2.successor = Some(RoadLink::Junction(junction2_id));
        rd3.predecessor = Some(RoadLink::Junction(junction2_id));

        #[allow(clippy::cast_possible_wrap)]
        let merge_lane = -(self.through_lanes as i32) - 1;
        let names = if converging {
            ("Converging", "Straight")
        } else {
            ("Straight", "Diverging")
        };

        let mut junction1 = JunctionPlan {
            id: junction1_id,
            name: names.0.to_string(),
            incoming: Vec::new(),
            connections: vec![Connection::whole_road(rd1.id, rd2.id)],
            poles: Vec::new(),
            signals: Vec::new(),
        };
        let mut junction2 = JunctionPlan {
            id: junction2_id,
            name: names.1.to_string(),
            incoming: Vec::new(),
            connections: vec![Connection::whole_road(rd2.id, rd3.id)],
            poles: Vec::new(),
            signals: Vec::new(),
        };

        if converging {
            rd4.successor = Some(RoadLink::Junction(junction1_id));
            junction1.connections.push(Connection {
                incoming_road: rd4.id,
                linked_road: rd2.id,
                incoming_lane: Some(-1),
                linked_lane: Some(merge_lane),
            });
        } else {
            rd4.predecessor = Some(RoadLink::Junction(junction2_id));
            junction2.connections.push(Connection {
                incoming_road: rd2.id,
                linked_road: rd4.id,
                incoming_lane: Some(merge_lane),
                linked_lane: Some(-1),
            });
        }

        (vec![junction1, junction2], vec![rd1, rd2, rd3, rd4])
    }

    #[allow(clippy::unused_self)]
    fn stage(&self, a: f64, b: f64, s_offset: f64, lane_type: LaneType) -> WidthStage {
        WidthStage {
            a,
            b,
            s_offset,
            lane_type,
        }
    }

    #[allow(clippy::unused_self)]
    fn lane(&self, stages: Vec<WidthStage>, road_mark: RoadMark) -> TransitionLane {
        TransitionLane { stages, road_mark }
    }

    fn direct_converging(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::AccelOneLaneDirect, self.cfg.design_speed);
        let (accel_len, converging_len) = (rule.l1, rule.l2);
        let (curvature, arc_len) = taper_curvature_arclength(
            accel_len,
            rule.gradient_rate,
            self.through_lanes,
            1,
            self.width,
        );
        let w = self.width;
        self.ramp(
            true,
            converging_len,
            vec![self.lane(
                vec![self.stage(w, -(w / converging_len), 0.0, LaneType::Entry)],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Line {
                    length: self.leg_len - arc_len,
                },
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
            ],
            1,
            Vec::new(),
        )
    }

    fn direct_converging_twolane(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::AccelTwoLane, self.cfg.design_speed);
        let (accel_len, keeping_len, converging_len) = (rule.l1, rule.l3, rule.l2);
        let (curvature, arc_len) = taper_curvature_arclength(
            accel_len,
            rule.gradient_rate,
            self.through_lanes,
            1,
            self.width,
        );
        let w = self.width;
        self.ramp(
            true,
            keeping_len + converging_len,
            vec![self.lane(
                vec![
                    self.stage(w, 0.0, 0.0, LaneType::Driving),
                    self.stage(w, -(w / converging_len), keeping_len, LaneType::Entry),
                ],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Line {
                    length: self.leg_len - arc_len,
                },
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
            ],
            2,
            vec![LaneDef {
                s_start: self.leg_len - arc_len * 3.0 / 4.0,
                s_end: self.leg_len,
                lanes_start: 2,
                lanes_end: 1,
                sub_lane: -1,
            }],
        )
    }

    fn parallel_converging(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::AccelOneLaneParallel, self.cfg.design_speed);
        let accel_len = rule.l1 / 2.0;
        let keeping_len = rule.l1 / 2.0;
        let converging_len = rule.l2;
        let (curvature, arc_len) = taper_curvature_arclength(
            accel_len,
            rule.gradient_rate,
            self.through_lanes,
            1,
            self.width,
        );
        let w = self.width;
        self.ramp(
            true,
            keeping_len + converging_len,
            vec![self.lane(
                vec![
                    self.stage(w, 0.0, 0.0, LaneType::Driving),
                    self.stage(w, -(w / converging_len), keeping_len, LaneType::Entry),
                ],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Line {
                    length: self.leg_len - arc_len,
                },
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
            ],
            1,
            Vec::new(),
        )
    }

    fn parallel_converging_twolane(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::AccelTwoLane, self.cfg.design_speed);
        let accel_len = rule.l1 / 2.0;
        let keeping_len = rule.l1 / 2.0;
        let converging_len = rule.l2;
        let keeping_len2 = rule.l3;
        let converging_len2 = rule.l2;
        let (curvature, arc_len) = taper_curvature_arclength(
            accel_len,
            rule.gradient_rate,
            self.through_lanes,
            2,
            self.width,
        );
        let w = self.width;
        self.ramp(
            true,
            keeping_len + converging_len + keeping_len2 + converging_len2,
            vec![
                self.lane(
                    vec![
                        self.stage(w, 0.0, 0.0, LaneType::Driving),
                        self.stage(
                            w,
                            -(w / converging_len2),
                            keeping_len + converging_len + keeping_len2,
                            LaneType::Entry,
                        ),
                    ],
                    RoadMark::broken(),
                ),
                self.lane(
                    vec![
                        self.stage(w, 0.0, 0.0, LaneType::Driving),
                        self.stage(w, -(w / converging_len), keeping_len, LaneType::Entry),
                        self.stage(0.0, 0.0, keeping_len + converging_len, LaneType::Entry),
                    ],
                    RoadMark::solid(),
                ),
            ],
            vec![
                Geometry::Line {
                    length: self.leg_len - arc_len,
                },
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
            ],
            2,
            Vec::new(),
        )
    }

    fn direct_diverging(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::DecelOneLane, self.cfg.design_speed);
        let (diverging_len, decel_len) = (rule.l2, rule.l1);
        let (curvature, arc_len) = taper_curvature_arclength(
            decel_len,
            rule.gradient_rate,
            self.through_lanes,
            1,
            self.width,
        );
        let w = self.width;
        self.ramp(
            false,
            diverging_len,
            vec![self.lane(
                vec![self.stage(0.0, w / diverging_len, 0.0, LaneType::Exit)],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
                Geometry::Line {
                    length: self.leg_len - decel_len,
                },
            ],
            1,
            Vec::new(),
        )
    }

    fn direct_diverging_twolane(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::DecelTwoLane, self.cfg.design_speed);
        let (diverging_len, keeping_len, decel_len) = (rule.l2, rule.l3, rule.l1);
        let (curvature, arc_len) = taper_curvature_arclength(
            decel_len,
            rule.gradient_rate,
            self.through_lanes,
            2,
            self.width,
        );
        let w = self.width;
        self.ramp(
            false,
            diverging_len + keeping_len,
            vec![self.lane(
                vec![
                    self.stage(0.0, w / diverging_len, 0.0, LaneType::Exit),
                    self.stage(w, 0.0, diverging_len, LaneType::Entry),
                ],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
                Geometry::Line {
                    length: self.leg_len - arc_len,
                },
            ],
            2,
            vec![LaneDef {
                s_start: 0.01,
                s_end: decel_len / 2.0,
                lanes_start: 1,
                lanes_end: 2,
                sub_lane: -1,
            }],
        )
    }

    fn parallel_diverging(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::DecelOneLane, self.cfg.design_speed);
        let diverging_len = rule.l2;
        let keeping_len = rule.l1 / 2.0;
        let decel_len = rule.l1 / 2.0;
        let (curvature, arc_len) = taper_curvature_arclength(
            decel_len,
            rule.gradient_rate,
            self.through_lanes,
            1,
            self.width,
        );
        let w = self.width;
        self.ramp(
            false,
            diverging_len + keeping_len,
            vec![self.lane(
                vec![
                    self.stage(0.0, w / diverging_len, 0.0, LaneType::Exit),
                    self.stage(w, 0.0, diverging_len, LaneType::Driving),
                ],
                RoadMark::solid(),
            )],
            vec![
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
                Geometry::Line {
                    length: self.leg_len - decel_len,
                },
            ],
            1,
            Vec::new(),
        )
    }

    fn parallel_diverging_twolane(&self) -> (Vec<JunctionPlan>, Vec<RoadPlan>) {
        let rule = ramp_rule(RampKind::DecelTwoLane, self.cfg.design_speed);
        let diverging_len = rule.l2;
        let keeping_len = rule.l3;
        let diverging_len2 = rule.l2;
        let keeping_len2 = (rule.l1 - rule.l2) / 2.0;
        let decel_len = keeping_len2;
        let (curvature, arc_len) = taper_curvature_arclength(
            decel_len,
            rule.gradient_rate,
            self.through_lanes,
            2,
            self.width,
        );
        let w = self.width;
        self.ramp(
            false,
            diverging_len + keeping_len + keeping_len2 + keeping_len2,
            vec![
                self.lane(
                    vec![
                        self.stage(0.0, w / diverging_len, 0.0, LaneType::Exit),
                        self.stage(w, 0.0, diverging_len, LaneType::Driving),
                    ],
                    RoadMark::broken(),
                ),
                self.lane(
                    vec![
                        self.stage(
                            0.0,
                            w / diverging_len2,
                            diverging_len + keeping_len,
                            LaneType::Exit,
                        ),
                        self.stage(
                            w,
                            0.0,
                            diverging_len + keeping_len + diverging_len2,
                            LaneType::Driving,
                        ),
                    ],
                    RoadMark::solid(),
                ),
            ],
            vec![
                Geometry::Arc {
                    curvature,
                    length: arc_len,
                },
                Geometry::Line {
                    length: self.leg_len - decel_len,
                },
            ],
            2,
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::road::{LanePlan, LaneSlice};

    fn cfg() -> VirtualMapCfg {
        BatchConfig::default().virtual_map
    }

    fn base_road(lanes: usize, length: f64) -> RoadPlan {
        RoadPlan {
            id: 1,
            plan_view: PlanView {
                geometries: vec![Geometry::Line { length }],
            },
            lanes: LanePlan {
                right: (0..lanes)
                    .map(|_| LaneSlice {
                        lane_type: LaneType::Driving,
                        width: 3.5,
                        road_mark: RoadMark::broken(),
                    })
                    .collect(),
                left: Vec::new(),
                center_mark: RoadMark::solid(),
                defs: Vec::new(),
                transitions: Vec::new(),
            },
            speed_limit: 33.0,
            predecessor: None,
            successor: None,
        }
    }

    fn spec(junction_type: JunctionType) -> JunctionSpec {
        JunctionSpec {
            junction_type,
            count: 1,
            trafficlight: false,
            cycle: 0.0,
        }
    }

    #[test]
    fn every_junction_variant_dispatches_without_panic() {
        let base = base_road(2, 1000.0);
        let cfg = cfg();
        for junction_type in JunctionType::ALL {
            let _ = synthesize_junction(&spec(*junction_type), &base, &cfg);
        }
    }

    #[test]
    fn unimplemented_variants_return_empty_plans() {
        let base = base_road(2, 1000.0);
        let cfg = cfg();
        for junction_type in [
            JunctionType::Roundabout,
            JunctionType::AnalogousConverging,
            JunctionType::AnalogousConvergingTwolane,
            JunctionType::AnalogousDiverging,
            JunctionType::AnalogousDivergingTwolane,
        ] {
            let (junctions, roads) = synthesize_junction(&spec(junction_type), &base, &cfg);
            assert!(junctions.is_empty(), "{junction_type:?}");
            assert!(roads.is_empty(), "{junction_type:?}");
        }
    }

    #[test]
    fn crossroad_has_four_legs_fully_connected() {
        let (junctions, roads) =
            synthesize_junction(&spec(JunctionType::Crossroad), &base_road(2, 1000.0), &cfg());
        assert_eq!(junctions.len(), 1);
        assert_eq!(roads.len(), 4);
        assert_eq!(junctions[0].incoming.len(), 4);
        // Pairwise connections of 4 legs.
        assert_eq!(junctions[0].connections.len(), 6);
        // Legs split the base road evenly around the junction.
        assert!((roads[0].length() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn t_and_y_junctions_have_three_legs() {
        for junction_type in [JunctionType::TRoad, JunctionType::YJunction] {
            let (junctions, roads) =
                synthesize_junction(&spec(junction_type), &base_road(2, 1000.0), &cfg());
            assert_eq!(roads.len(), 3);
            assert_eq!(junctions[0].incoming.len(), 3);
            assert_eq!(junctions[0].connections.len(), 3);
        }
    }

    #[test]
    fn traffic_lights_add_one_signal_per_leg() {
        let mut junction_spec = spec(JunctionType::Crossroad);
        junction_spec.trafficlight = true;
        let (junctions, _) = synthesize_junction(&junction_spec, &base_road(2, 1000.0), &cfg());
        assert_eq!(junctions[0].signals.len(), 4);
        assert_eq!(junctions[0].poles.len(), 4);
        let ids: Vec<u32> = junctions[0].signals.iter().map(|s| s.id).collect();
        let mut unique = ids.clone();
        unique.dedup();
        assert_eq!(ids, unique);
        for signal in &junctions[0].signals {
            assert_eq!(
                signal.pole_id,
                junctions[0].poles[(signal.id - cfg().start_signal_id) as usize].id
            );
        }
    }

    #[test]
    fn ramp_families_build_four_roads_and_two_connectors() {
        for junction_type in [
            JunctionType::DirectConverging,
            JunctionType::DirectConvergingTwolane,
            JunctionType::ParallelConverging,
            JunctionType::ParallelConvergingTwolane,
            JunctionType::DirectDiverging,
            JunctionType::DirectDivergingTwolane,
            JunctionType::ParallelDiverging,
            JunctionType::ParallelDivergingTwolane,
        ] {
            let (junctions, roads) =
                synthesize_junction(&spec(junction_type), &base_road(2, 1000.0), &cfg());
            assert_eq!(junctions.len(), 2, "{junction_type:?}");
            assert_eq!(roads.len(), 4, "{junction_type:?}");
        }
    }

    #[test]
    fn converging_ramp_merges_into_the_lane_past_the_through_lanes() {
        let (junctions, roads) = synthesize_junction(
            &spec(JunctionType::DirectConverging),
            &base_road(2, 1000.0),
            &cfg(),
        );
        let merge = junctions[0]
            .connections
            .iter()
            .find(|c| c.incoming_road == roads[3].id)
            .expect("ramp connection");
        assert_eq!(merge.incoming_lane, Some(-1));
        assert_eq!(merge.linked_lane, Some(-3));
    }

    #[test]
    fn diverging_ramp_exits_from_the_second_connector() {
        let (junctions, roads) = synthesize_junction(
            &spec(JunctionType::DirectDiverging),
            &base_road(2, 1000.0),
            &cfg(),
        );
        assert!(junctions[0]
            .connections
            .iter()
            .all(|c| c.linked_road != roads[3].id));
        assert!(junctions[1]
            .connections
            .iter()
            .any(|c| c.linked_road == roads[3].id));
        // Ramp taper sits at the start of the diverging ramp.
        assert!(matches!(
            roads[3].plan_view.geometries[0],
            Geometry::Arc { .. }
        ));
    }

    #[test]
    fn transition_road_length_follows_the_design_table() {
        // accel_twolane at 120 km/h: keeping l3=400 plus converging l2=180.
        let (_, roads) = synthesize_junction(
            &spec(JunctionType::DirectConvergingTwolane),
            &base_road(2, 1000.0),
            &cfg(),
        );
        assert!((roads[1].length() - 580.0).abs() < 1e-9);
    }

    #[test]
    fn taper_formula_matches_the_gradient_rate_definition() {
        let tangent_len = 230.0;
        let gradient = 0.02222;
        let (curvature, arc_len) =
            taper_curvature_arclength(tangent_len, gradient, 2, 1, 3.5);

        let w2 = 3.0 * 3.5;
        let half_angle = ((gradient * tangent_len + w2) / tangent_len).atan();
        let radius = tangent_len / (2.0 * half_angle.sin() * half_angle.cos());
        assert!((curvature + 1.0 / radius).abs() < 1e-12);
        assert!((arc_len - radius * 2.0 * half_angle).abs() < 1e-9);
        assert!(curvature < 0.0);
    }

    #[test]
    fn zero_gradient_rate_collapses_the_taper() {
        assert_eq!(taper_curvature_arclength(100.0, 0.0, 2, 1, 3.5), (0.0, 0.0));
    }

    #[test]
    fn design_speed_selects_the_table_row() {
        let at_120 = ramp_rule(RampKind::DecelOneLane, 120);
        let at_60 = ramp_rule(RampKind::DecelOneLane, 60);
        assert!((at_120.l1 - 145.0).abs() < f64::EPSILON);
        assert!((at_60.l1 - 95.0).abs() < f64::EPSILON);
        assert!((at_60.gradient_rate - 0.05714).abs() < 1e-12);
    }

    #[test]
    fn twolane_ramp_carries_a_lane_count_change() {
        let (_, roads) = synthesize_junction(
            &spec(JunctionType::DirectDivergingTwolane),
            &base_road(2, 1000.0),
            &cfg(),
        );
        let ramp = &roads[3];
        assert_eq!(ramp.lanes.defs.len(), 1);
        assert_eq!(ramp.lanes.defs[0].lanes_start, 1);
        assert_eq!(ramp.lanes.defs[0].lanes_end, 2);
    }
}
