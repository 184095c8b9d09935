//! Batch configuration: one immutable value per batch.
//!
//! Defaults live here; the optional user-settings dictionary is merged on
//! top exactly once, before the first pipeline stage runs. Nothing mutates
//! the configuration afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Markers;

/// Column-name conventions of the normalized input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsCfg {
    pub functional_id: String,
    pub logical_id: String,
    pub naming: String,
    pub description: String,
    pub map_file: String,
    /// Optional readiness column; rows whose value differs from
    /// `ready_token` are rejected as unfinished designs.
    pub status: String,
    pub ready_token: String,
    /// Level-attribute columns that must exist for generalization.
    pub levels: Vec<String>,
}

impl Default for ColumnsCfg {
    fn default() -> Self {
        Self {
            functional_id: "FuncId".to_string(),
            logical_id: "LogicId".to_string(),
            naming: "Naming".to_string(),
            description: "Description".to_string(),
            map_file: "MapFile".to_string(),
            status: "Status".to_string(),
            ready_token: "ready".to_string(),
            levels: vec![
                "Road.Type".to_string(),
                "Lane.Num".to_string(),
                "Ego.Phy.Model".to_string(),
                "Ego.Ini.Speed".to_string(),
                "Env.Time".to_string(),
                "Env.Weather".to_string(),
            ],
        }
    }
}

/// Table-driven shorthand-to-canonical substitutions, applied per column
/// group before cell parsing. Mapping content is configuration, not engine
/// logic; the defaults only carry the identity-preserving canonical tokens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabCfg {
    /// Substitutions keyed by attribute-path prefix (for example `Road.Type`
    /// or `Env.Weather`); the inner map rewrites whole cell tokens.
    pub substitutions: BTreeMap<String, BTreeMap<String, String>>,
    /// Classification-label dictionary: column name to label-to-canonical
    /// mapping, used to build the concrete-id prefix.
    pub classification: BTreeMap<String, BTreeMap<String, String>>,
}

/// Speed plausibility interval, authored in km/h.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedRuleCfg {
    pub min_kmh: f64,
    pub max_kmh: f64,
}

impl Default for SpeedRuleCfg {
    fn default() -> Self {
        Self {
            min_kmh: 0.0,
            max_kmh: 130.0,
        }
    }
}

/// Density-based selection settings. Disabled by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCfg {
    pub enabled: bool,
    pub eps: f64,
    pub min_samples: usize,
    pub keep_fraction: f64,
    pub seed: u64,
}

impl Default for SelectionCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            eps: 0.25,
            min_samples: 3,
            keep_fraction: 0.5,
            seed: 0x5CE7_0A11,
        }
    }
}

/// Constants of the synthetic (virtual) map generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMapCfg {
    /// Base road length in meters for straight and S-curve roads.
    pub base_len: f64,
    /// Share of a full circle used as the arc length of a pure curve.
    pub ratio_len_perimeter_curve: f64,
    /// Straight share of a curve-in / curve-out road.
    pub ratio_len_total_straight: f64,
    /// Longitudinal start position of unrouted entities.
    pub start_s: f64,
    /// Start position of routed entities approaching a junction.
    pub junction_offset_s: f64,
    /// Distance kept from the road end by resolved end waypoints.
    pub end_s_offset: f64,
    pub start_road_id: u32,
    pub start_junction_id: u32,
    pub start_object_id: u32,
    pub start_signal_id: u32,
    /// Radius of the circular hub shared by plain intersections.
    pub junction_radius: f64,
    pub lane_width: f64,
    /// Transition lengths of lane-count changes along a road.
    pub split_len_change: f64,
    pub merge_len_change: f64,
    /// Design speed (km/h) selecting the ramp-taper table row.
    pub design_speed: u32,
    /// Suffix appended to derived synthetic map names.
    pub map_suffix: String,
}

impl Default for VirtualMapCfg {
    fn default() -> Self {
        Self {
            base_len: 1000.0,
            ratio_len_perimeter_curve: 0.25,
            ratio_len_total_straight: 0.4,
            start_s: 20.0,
            junction_offset_s: 0.0,
            end_s_offset: -10.0,
            start_road_id: 1,
            start_junction_id: 100,
            start_object_id: 1,
            start_signal_id: 1000,
            junction_radius: 20.0,
            lane_width: 3.5,
            split_len_change: 50.0,
            merge_len_change: 50.0,
            design_speed: 120,
            map_suffix: ".xodr".to_string(),
        }
    }
}

/// The complete batch configuration, constructed once and threaded through
/// every stage entry point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub markers: Markers,
    /// Symbol joining id segments in derived concrete ids.
    pub link_symbol: LinkSymbol,
    pub columns: ColumnsCfg,
    pub vocab: VocabCfg,
    pub speed: SpeedRuleCfg,
    pub selection: SelectionCfg,
    pub virtual_map: VirtualMapCfg,
}

/// Newtype so the link symbol can default independently of the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkSymbol(pub String);

impl Default for LinkSymbol {
    fn default() -> Self {
        Self("_".to_string())
    }
}

impl std::ops::Deref for LinkSymbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl BatchConfig {
    /// Merge the user-settings dictionary over the defaults of `self` and
    /// return the merged configuration. Scalars override, nested objects
    /// merge recursively, everything else replaces wholesale.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the merged document no longer
    /// deserializes into a valid configuration.
    pub fn with_overrides(
        &self,
        overrides: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        let mut base = serde_json::to_value(self)?;
        deep_merge(&mut base, overrides);
        serde_json::from_value(base)
    }
}

fn deep_merge(base: &mut serde_json::Value, overrides: &serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(over_map)) => {
            for (key, value) in over_map {
                match base_map.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_round_trip_through_serde() {
        let cfg = BatchConfig::default();
        let text = serde_json::to_string(&cfg).unwrap();
        let back: BatchConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn overrides_merge_deeply_without_touching_siblings() {
        let cfg = BatchConfig::default();
        let merged = cfg
            .with_overrides(&json!({
                "speed": { "max_kmh": 90.0 },
                "selection": { "enabled": true, "keep_fraction": 0.2 }
            }))
            .unwrap();
        assert!((merged.speed.max_kmh - 90.0).abs() < f64::EPSILON);
        assert!((merged.speed.min_kmh - 0.0).abs() < f64::EPSILON);
        assert!(merged.selection.enabled);
        assert_eq!(merged.selection.min_samples, 3);
        assert_eq!(merged.virtual_map, cfg.virtual_map);
    }

    #[test]
    fn partial_config_document_fills_from_defaults() {
        let cfg: BatchConfig = serde_json::from_str(r#"{"speed":{"min_kmh":10}}"#).unwrap();
        assert!((cfg.speed.min_kmh - 10.0).abs() < f64::EPSILON);
        assert!((cfg.speed.max_kmh - 130.0).abs() < f64::EPSILON);
    }
}
