//! Waypoint resolution: entity placement specs become resolved waypoint
//! sequences, in place. This is the one documented exception to the
//! immutable-record pipeline.
//!
//! Synthetic maps resolve through a fixed route-code table against the
//! synthesized geometry. Externally-indexed maps resolve through
//! pre-registered routes and the opaque map-engine primitive behind
//! [`MapSession`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use crate::config::VirtualMapCfg;
use crate::road::total_length;
use crate::scenario::{ConcreteScenario, RoadType, Waypoint};

/// Lane sentinel resolved to the outermost lane of the road.
const LANE_OUTERMOST: i32 = 98;
/// Lane sentinel resolved to the rule lane for the road's lane count.
const LANE_RULE: i32 = 99;

macro_rules! route_codes {
    ($($variant:ident => $token:literal = $endpoints:expr),+ $(,)?) => {
        /// Closed set of route codes on synthetic maps. A code maps entity
        /// start/end onto the synthesized road network; codes without
        /// endpoints are not laid out and reject the scenario.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum RouteCode {
            $($variant),+
        }

        impl RouteCode {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            #[must_use]
            pub const fn token(self) -> &'static str {
                match self {
                    $(Self::$variant => $token),+
                }
            }

            #[must_use]
            pub fn from_token(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Road-endpoint row of this code, `None` for the codes the
            /// synthesizer does not lay out.
            #[must_use]
            pub const fn endpoints(self) -> Option<RouteEndpoints> {
                match self {
                    $(Self::$variant => $endpoints),+
                }
            }
        }
    };
}

/// One row of the route-code table: road offsets, lane selectors (with the
/// `±98`/`±99` sentinels) and longitudinal placement factors for both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteEndpoints {
    pub start_road: u32,
    pub end_road: u32,
    pub start_lane: i32,
    pub end_lane: i32,
    pub start_s_factor: f64,
    pub end_s_factor: f64,
}

const fn row(
    start_road: u32,
    end_road: u32,
    start_lane: i32,
    end_lane: i32,
    start_s_factor: f64,
    end_s_factor: f64,
) -> Option<RouteEndpoints> {
    Some(RouteEndpoints {
        start_road,
        end_road,
        start_lane,
        end_lane,
        start_s_factor,
        end_s_factor,
    })
}

route_codes! {
    // No junction traversal: the entity keeps its own declared lane and the
    // configured start position.
    None => "none" = row(0, 0, 0, 0, 0.0, -1.0),
    WestToWest => "w2w" = row(0, 0, -1, 1, -1.0, -1.0),
    WestToEast => "w2e" = row(0, 3, -99, -99, -1.0, 0.0),
    WestToNorth => "w2n" = row(0, 2, -1, -1, -1.0, 0.0),
    WestToSouth => "w2s" = row(0, 1, -98, -98, -1.0, 0.0),
    EastToWest => "e2w" = row(3, 0, 99, 99, 0.0, -1.0),
    EastToEast => "e2e" = row(3, 3, 1, -1, 0.0, 0.0),
    EastToNorth => "e2n" = row(3, 2, 98, 98, 0.0, 0.0),
    EastToSouth => "e2s" = row(3, 1, 1, -1, 0.0, 0.0),
    NorthToWest => "n2w" = row(2, 0, 98, 98, 0.0, -1.0),
    NorthToEast => "n2e" = row(2, 3, 1, -1, 0.0, 0.0),
    NorthToNorth => "n2n" = row(2, 2, 1, -1, 0.0, 0.0),
    NorthToSouth => "n2s" = row(2, 1, 99, -99, 0.0, 0.0),
    SouthToWest => "s2w" = row(1, 0, 1, 1, 0.0, -1.0),
    SouthToEast => "s2e" = row(1, 3, 98, -98, 0.0, 0.0),
    SouthToNorth => "s2n" = row(1, 2, 99, -99, 0.0, 0.0),
    SouthToSouth => "s2s" = row(1, 1, 1, -1, 0.0, 0.0),
    // Oncoming traffic on the same road pair.
    Opposite => "opposite" = row(0, 0, 1, 1, 0.0, 0.0),
    EntryRamp => "entryRamp" = row(3, 2, 0, -98, -1.0, 0.0),
    ExitRamp => "exitRamp" = row(0, 3, -98, -1, -1.0, 0.0),
    MainRamp => "mainRamp" = row(0, 2, -98, -98, -1.0, 0.0),
    SideRamp => "sideRamp" = Option::None,
    RoundaboutEntry => "roundaboutEntry" = Option::None,
    RoundaboutExit => "roundaboutExit" = Option::None,
    RoundaboutInside => "roundaboutInside" = Option::None,
}

/// Why a scenario could not be resolved. Every variant becomes a
/// per-scenario rejection, never a crash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{entity} declares unknown route token {token:?}")]
    UnknownRouteToken { entity: String, token: String },
    #[error("{entity} route {route} is not laid out on synthetic maps")]
    UnsupportedRoute { entity: String, route: String },
    #[error("{entity} route {route} is not registered for map {map}")]
    UnregisteredRoute {
        entity: String,
        route: String,
        map: String,
    },
    #[error("{entity} reference chain through {reference} exceeds one hop")]
    MultiHopReference { entity: String, reference: String },
    #[error("{entity} references {reference} which has no resolved waypoint yet")]
    UnresolvedReference { entity: String, reference: String },
    #[error("{entity} relative position does not exist on the map")]
    PositionNotFound { entity: String },
}

/// External map-engine collaborator: sessions are opened per distinct map
/// name and held for the whole resolution pass against that map.
pub trait MapService {
    type Session: MapSession;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a query session on one map.
    ///
    /// # Errors
    ///
    /// A failed open is structural and aborts the batch.
    fn open_session(&self, map_name: &str) -> Result<Self::Session, Self::Error>;
}

/// One open map-engine session. Dropping the session releases it.
pub trait MapSession {
    /// Walk from `origin` along the lane path by the given offsets; `None`
    /// means the position does not exist on the map.
    fn next_waypoint_along_path(
        &self,
        origin: &Waypoint,
        lateral_offset: f64,
        longitudinal_offset: f64,
        heading_offset: f64,
    ) -> Option<Waypoint>;
}

/// Pre-registered routes of externally-indexed maps, keyed by map name and
/// route token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteCatalog {
    routes: BTreeMap<String, BTreeMap<String, Vec<Waypoint>>>,
}

impl RouteCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, map_name: &str, route: &str, waypoints: Vec<Waypoint>) {
        self.routes
            .entry(map_name.to_string())
            .or_default()
            .insert(route.to_string(), waypoints);
    }

    #[must_use]
    pub fn get(&self, map_name: &str, route: &str) -> Option<&Vec<Waypoint>> {
        self.routes.get(map_name)?.get(route)
    }

    /// Map names with at least one registered route.
    #[must_use]
    pub fn map_names(&self) -> Vec<&str> {
        self.routes.keys().map(String::as_str).collect()
    }
}

/// Derived name of the synthetic map hosting one scenario: the distinct
/// road/junction signature plus the configured suffix.
#[must_use]
pub fn synthetic_map_name(scenario: &ConcreteScenario, cfg: &VirtualMapCfg) -> String {
    let field = |path: &str| {
        scenario
            .attr(path)
            .map_or_else(|| "none".to_string(), ToString::to_string)
    };
    let mut parts = vec![
        field("Road.Type"),
        field("Road.Curve"),
        field("Road.Direction"),
        field("Road.Speedlimit"),
        field("Junction.Type"),
        field("Junction.Num"),
        field("Lane.Num"),
        field("Lane.Num2"),
        field("Lane.Num2Dist"),
        field("Lane.Width"),
        field("Marking.Type"),
    ];
    for entity in &scenario.entities {
        if !entity.route.is_empty() && entity.route != "none" {
            parts.push(entity.route.clone());
        }
    }
    format!("{}{}", parts.join("-"), cfg.map_suffix)
}

/// Rule lane id of the ego vehicle from lane count and the set of relative
/// sides present among entities.
#[must_use]
pub fn ego_lane_id(lane_num: i64, sides: &BTreeSet<i64>) -> i32 {
    match lane_num {
        2 => {
            if sides.contains(&-1) {
                -2
            } else {
                -1
            }
        }
        3 => {
            if sides.contains(&-2) {
                -3
            } else if sides.contains(&2) {
                -1
            } else {
                -2
            }
        }
        4 => {
            if sides.len() == 1 {
                -2
            } else if sides.contains(&-2) {
                -3
            } else if sides.contains(&3) {
                -1
            } else {
                -4
            }
        }
        _ => -1,
    }
}

/// Resolve the `±98`/`±99` lane sentinels of a route endpoint against the
/// road's lane count.
#[allow(clippy::cast_possible_truncation)]
fn resolve_lane_sentinel(lane: i32, lane_num: i64) -> i32 {
    match lane.abs() {
        LANE_OUTERMOST => lane / LANE_OUTERMOST * lane_num as i32,
        LANE_RULE => {
            if matches!(lane_num, 1 | 2) {
                lane / LANE_RULE
            } else {
                lane / LANE_RULE * 2
            }
        }
        _ => lane,
    }
}

/// Relative contribution of an entity's reference: the reference's own
/// longitudinal/side offsets, added exactly once (the one documented level
/// of indirection). A reference whose own target is not Ego is a multi-hop
/// chain and rejected.
fn reference_contribution(
    scenario: &ConcreteScenario,
    entity_name: &str,
) -> Result<(f64, i32), ResolveError> {
    let Some(entity) = scenario.entity(entity_name) else {
        return Ok((0.0, 0));
    };
    let Some(rel) = &entity.rel else {
        return Ok((0.0, 0));
    };
    let Some(reference) = scenario.entity(&rel.reference) else {
        return Ok((0.0, 0));
    };
    if let Some(ref_rel) = &reference.rel {
        if ref_rel.reference != "Ego" {
            return Err(ResolveError::MultiHopReference {
                entity: entity_name.to_string(),
                reference: rel.reference.clone(),
            });
        }
        return Ok((ref_rel.longitudinal, ref_rel.side));
    }
    Ok((0.0, 0))
}

/// Resolve all entities of one scenario against the synthesized map. The
/// scenario's `map_file` is set to the derived synthetic map name.
///
/// # Errors
///
/// Any [`ResolveError`] drops the scenario (a rejection, not a batch
/// failure).
pub fn resolve_synthetic(
    scenario: &mut ConcreteScenario,
    cfg: &VirtualMapCfg,
) -> Result<(), ResolveError> {
    scenario.map_file = synthetic_map_name(scenario, cfg);

    let lane_num = scenario.attr_i64("Lane.Num").unwrap_or(1);
    let junction_num = scenario.attr_i64("Junction.Num").unwrap_or(0).max(0) as f64;
    let road_type = scenario
        .attr_text("Road.Type")
        .and_then(RoadType::from_token)
        .unwrap_or(RoadType::Straight);
    let radius = scenario.attr_f64("Road.Curve").unwrap_or(0.0);
    let road_len = total_length(road_type, radius, cfg);
    let segment_len = road_len / (junction_num + 1.0);

    let sides: BTreeSet<i64> = scenario
        .entities
        .iter()
        .map(|e| e.rel.as_ref().map_or(0, |r| i64::from(r.side)))
        .collect();
    let base_lane = ego_lane_id(lane_num, &sides);

    // Reference contributions read sibling state, so compute them before
    // mutating any entity.
    let contributions: Vec<(f64, i32)> = scenario
        .entities
        .iter()
        .map(|e| reference_contribution(scenario, &e.name))
        .collect::<Result<_, _>>()?;

    for index in 0..scenario.entities.len() {
        let (ref_long, ref_side) = contributions[index];
        let entity = &scenario.entities[index];
        let name = entity.name.clone();

        let token = if entity.route.is_empty() {
            "none"
        } else {
            entity.route.as_str()
        };
        let code = RouteCode::from_token(token).ok_or_else(|| ResolveError::UnknownRouteToken {
            entity: name.clone(),
            token: token.to_string(),
        })?;
        let endpoints = code.endpoints().ok_or_else(|| ResolveError::UnsupportedRoute {
            entity: name.clone(),
            route: code.token().to_string(),
        })?;
        let unrouted = matches!(code, RouteCode::None | RouteCode::Opposite);

        let (rel_long, rel_side) = entity
            .rel
            .as_ref()
            .map_or((0.0, 0), |r| (r.longitudinal, r.side));

        // Start: `s = |k·L/(J+1) + relLong + refRelLong + base|`.
        let base_s = if unrouted { cfg.start_s } else { cfg.junction_offset_s };
        let start_s =
            (endpoints.start_s_factor * segment_len + rel_long + ref_long + base_s).abs();
        let lane_base = if code == RouteCode::None {
            base_lane
        } else {
            resolve_lane_sentinel(endpoints.start_lane, lane_num)
        };
        let start_lane = lane_base - rel_side - ref_side;

        let start = Waypoint::Lane {
            road_id: cfg.start_road_id + endpoints.start_road,
            lane_id: start_lane,
            offset: entity.lat_offset,
            s: start_s,
            heading: entity.heading,
        };

        // End: routed entities get a destination; an unrouted entity is a
        // pure placement (single waypoint).
        let end = if !unrouted {
            let end_lane = if code == RouteCode::None {
                base_lane
            } else {
                resolve_lane_sentinel(endpoints.end_lane, lane_num)
            };
            let end_s =
                (endpoints.end_s_factor * segment_len + cfg.end_s_offset.abs()).abs();
            Some(Waypoint::Lane {
                road_id: cfg.start_road_id + endpoints.end_road,
                lane_id: end_lane,
                offset: entity.lat_offset,
                s: end_s,
                heading: entity.heading,
            })
        } else {
            Option::None
        };

        let entity = &mut scenario.entities[index];
        entity.waypoints = match end {
            Some(end) => smallvec![start, end],
            Option::None => smallvec![start],
        };
    }
    Ok(())
}

/// Resolve one scenario against a pre-registered route catalog and an open
/// map-engine session.
///
/// # Errors
///
/// Any [`ResolveError`] drops the scenario; an empty answer from the map
/// primitive is [`ResolveError::PositionNotFound`].
pub fn resolve_indexed(
    scenario: &mut ConcreteScenario,
    catalog: &RouteCatalog,
    session: &impl MapSession,
) -> Result<(), ResolveError> {
    let map_name = scenario.map_file.clone();

    for index in 0..scenario.entities.len() {
        let entity = &scenario.entities[index];
        let name = entity.name.clone();
        let route = if entity.route.is_empty() {
            "none".to_string()
        } else {
            entity.route.clone()
        };

        // Relative placement without a route goes through the opaque map
        // primitive against the reference's already-resolved position.
        let rel_placement = entity.rel.clone().filter(|_| route == "none");
        let resolved: crate::scenario::WaypointSeq = if let Some(rel) = rel_placement {
            let reference = scenario.entity(&rel.reference).ok_or_else(|| {
                ResolveError::UnresolvedReference {
                    entity: name.clone(),
                    reference: rel.reference.clone(),
                }
            })?;
            if reference
                .rel
                .as_ref()
                .is_some_and(|r| r.reference != "Ego")
            {
                return Err(ResolveError::MultiHopReference {
                    entity: name.clone(),
                    reference: rel.reference.clone(),
                });
            }
            let origin = reference.waypoints.first().cloned().ok_or_else(|| {
                ResolveError::UnresolvedReference {
                    entity: name.clone(),
                    reference: rel.reference.clone(),
                }
            })?;
            let waypoint = session
                .next_waypoint_along_path(
                    &origin,
                    f64::from(rel.side),
                    rel.longitudinal,
                    entity.heading,
                )
                .ok_or_else(|| ResolveError::PositionNotFound {
                    entity: name.clone(),
                })?;
            smallvec![waypoint]
        } else {
            let waypoints =
                catalog
                    .get(&map_name, &route)
                    .ok_or_else(|| ResolveError::UnregisteredRoute {
                        entity: name.clone(),
                        route: route.clone(),
                        map: map_name.clone(),
                    })?;
            let mut seq: crate::scenario::WaypointSeq = waypoints.iter().cloned().collect();
            if let Some(first) = seq.first_mut() {
                *first = first.with_offset_heading(entity.lat_offset, entity.heading);
            }
            seq
        };

        scenario.entities[index].waypoints = resolved;
    }
    Ok(())
}

/// Post-resolution invariant: every active entity owns a non-empty waypoint
/// sequence.
#[must_use]
pub fn all_entities_resolved(scenario: &ConcreteScenario) -> bool {
    scenario
        .entities
        .iter()
        .filter(|e| e.is_active())
        .all(|e| !e.waypoints.is_empty())
}
