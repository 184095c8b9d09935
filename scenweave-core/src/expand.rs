//! Generalization engine: expands logical scenarios into concrete ones.
//!
//! Cartesian mode explodes every list attribute independently. Paired mode
//! expands attributes marked paired lock-step within their structural group
//! (road / signal / entity / environment families). Non-paired list
//! attributes sharing a group with paired members go through the bucket
//! redistribution policy; that policy is reproduced literally and pinned by
//! the characterization tests at the bottom of this file.

use std::collections::{BTreeMap, HashSet};

use crate::config::BatchConfig;
use crate::pipeline::PipelineError;
use crate::rejection::{Rejection, RejectionLog, RuleCategory};
use crate::scenario::{AttrFamily, ConcreteScenario, LogicalScenario};
use crate::value::Scalar;

/// One independent choice dimension of the expansion.
enum Axis {
    /// Unpaired list attribute outside any paired group.
    List { path: String, values: Vec<Scalar> },
    /// All paired attributes of one structural group, expanded lock-step.
    Group {
        len: usize,
        members: Vec<(String, Vec<Scalar>)>,
    },
    /// Non-paired list attribute inside a paired group, redistributed into
    /// multiplicity buckets.
    Buckets {
        path: String,
        buckets: Vec<Vec<Scalar>>,
    },
}

impl Axis {
    fn len(&self) -> usize {
        match self {
            Self::List { values, .. } => values.len(),
            Self::Group { len, .. } => *len,
            Self::Buckets { buckets, .. } => buckets.len(),
        }
    }
}

/// Expand one logical scenario.
///
/// # Errors
///
/// [`PipelineError::NoConcreteScenarios`] when the expansion is empty (an
/// empty list attribute collapses the whole product).
pub fn expand(
    logical: &LogicalScenario,
    cfg: &BatchConfig,
) -> Result<Vec<ConcreteScenario>, PipelineError> {
    let mut constants: Vec<(String, Scalar)> = Vec::new();
    let mut axes: Vec<Axis> = Vec::new();

    // Families that contain at least one paired attribute.
    let paired_families: HashSet<Option<AttrFamily>> = logical
        .attrs
        .iter()
        .filter(|(_, v)| v.is_paired())
        .map(|(path, _)| AttrFamily::of(path))
        .collect();

    // Lock-step groups first, in family declaration order.
    for family in [
        Some(AttrFamily::Road),
        Some(AttrFamily::Signal),
        Some(AttrFamily::Entity),
        Some(AttrFamily::Environment),
        None,
    ] {
        if !paired_families.contains(&family) {
            continue;
        }
        let members: Vec<(String, Vec<Scalar>)> = logical
            .attrs
            .iter()
            .filter(|(path, v)| v.is_paired() && AttrFamily::of(path) == family)
            .map(|(path, v)| (path.clone(), v.values()))
            .collect();
        let len = members.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        if len == 0 || members.iter().any(|(_, v)| v.is_empty()) {
            return Err(empty_result(logical, cfg));
        }
        axes.push(Axis::Group { len, members });
    }

    // Remaining attributes: scalars broadcast, lists become cartesian or
    // bucket axes depending on their family.
    for (path, value) in &logical.attrs {
        if value.is_paired() {
            continue;
        }
        let values = value.values();
        match values.len() {
            0 => return Err(empty_result(logical, cfg)),
            1 => constants.push((path.clone(), values.into_iter().next().unwrap_or(Scalar::Int(0)))),
            _ if paired_families.contains(&AttrFamily::of(path)) => {
                let group_len = group_len_of(&axes, AttrFamily::of(path));
                axes.push(Axis::Buckets {
                    path: path.clone(),
                    buckets: redistribute(&values, group_len),
                });
            }
            _ => axes.push(Axis::List {
                path: path.clone(),
                values,
            }),
        }
    }

    let total: usize = axes.iter().map(Axis::len).product();
    if total == 0 {
        return Err(empty_result(logical, cfg));
    }

    let mut concretes = Vec::with_capacity(total);
    let mut indices = vec![0usize; axes.len()];
    for counter in 1..=total {
        let mut attrs: BTreeMap<String, Scalar> = BTreeMap::new();
        for (path, value) in &constants {
            attrs.insert(path.clone(), scaled(logical, path, value.clone()));
        }
        for (axis, &idx) in axes.iter().zip(&indices) {
            match axis {
                Axis::List { path, values } => {
                    attrs.insert(path.clone(), scaled(logical, path, values[idx].clone()));
                }
                Axis::Group { members, .. } => {
                    for (path, values) in members {
                        let slot = idx.min(values.len() - 1);
                        attrs.insert(path.clone(), scaled(logical, path, values[slot].clone()));
                    }
                }
                Axis::Buckets { path, buckets } => {
                    // Every element of a bucket carries the same value; the
                    // first stands for the whole paired span.
                    let value = buckets[idx][0].clone();
                    attrs.insert(path.clone(), scaled(logical, path, value));
                }
            }
        }

        let concrete_id = concrete_id(logical, &attrs, counter, cfg);
        concretes.push(ConcreteScenario {
            functional_id: logical.functional_id.clone(),
            logical_id: logical.logical_id.clone(),
            concrete_id,
            description: logical.description.clone(),
            map_file: logical.map_file.clone(),
            attrs,
            entities: Vec::new(),
        });

        // Mixed-radix increment over the axis lengths.
        for (slot, axis) in indices.iter_mut().zip(&axes) {
            *slot += 1;
            if *slot < axis.len() {
                break;
            }
            *slot = 0;
        }
    }

    Ok(concretes)
}

/// Expand a whole batch and deduplicate concrete ids globally, keeping the
/// earliest occurrence of each id.
///
/// # Errors
///
/// Propagates per-logical empty expansions; an entirely empty batch after
/// dedup cannot happen (dedup only removes later duplicates).
pub fn expand_all(
    logicals: &[LogicalScenario],
    cfg: &BatchConfig,
    rejections: &mut RejectionLog,
) -> Result<Vec<ConcreteScenario>, PipelineError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for logical in logicals {
        for concrete in expand(logical, cfg)? {
            if seen.insert(concrete.concrete_id.clone()) {
                out.push(concrete);
            } else {
                rejections.push(Rejection {
                    functional_id: concrete.functional_id.clone(),
                    logical_id: concrete.logical_id.clone(),
                    concrete_id: concrete.concrete_id.clone(),
                    reason: "duplicate concrete id, earliest occurrence kept".to_string(),
                    category: RuleCategory::Design,
                });
            }
        }
    }
    log::info!("expanded {} concrete scenarios", out.len());
    Ok(out)
}

fn empty_result(logical: &LogicalScenario, cfg: &BatchConfig) -> PipelineError {
    PipelineError::NoConcreteScenarios {
        logical_id: logical.joined_id(&cfg.link_symbol),
    }
}

fn group_len_of(axes: &[Axis], family: Option<AttrFamily>) -> usize {
    axes.iter()
        .find_map(|axis| match axis {
            Axis::Group { len, members } => members
                .first()
                .filter(|(path, _)| AttrFamily::of(path) == family)
                .map(|_| *len),
            _ => None,
        })
        .unwrap_or(1)
}

/// Redistribution of a non-paired list that shares a group with paired
/// members: replicate the list across the paired span, then bucket the
/// replica per distinct value (first-occurrence order). Each bucket's size
/// is the value's multiplicity times the span; duplicated values therefore
/// collapse into one bucket instead of multiplying the expansion.
fn redistribute(values: &[Scalar], group_len: usize) -> Vec<Vec<Scalar>> {
    let mut replicated = Vec::with_capacity(values.len() * group_len);
    for _ in 0..group_len.max(1) {
        replicated.extend_from_slice(values);
    }

    let mut order: Vec<Scalar> = Vec::new();
    for value in &replicated {
        if !order.contains(value) {
            order.push(value.clone());
        }
    }

    order
        .into_iter()
        .map(|value| {
            let count = replicated.iter().filter(|v| *v == &value).count();
            vec![value; count]
        })
        .collect()
}

fn scaled(logical: &LogicalScenario, path: &str, value: Scalar) -> Scalar {
    match logical.unit_factors.get(path) {
        Some(factor) => value.scaled(*factor),
        None => value,
    }
}

/// Derived unique id: classification prefix, functional and logical ids and
/// a naming suffix (template substitution or counter), `+`/`%` stripped.
fn concrete_id(
    logical: &LogicalScenario,
    attrs: &BTreeMap<String, Scalar>,
    counter: usize,
    cfg: &BatchConfig,
) -> String {
    let suffix = if logical.naming.is_empty() {
        counter.to_string()
    } else {
        render_naming(&logical.naming, attrs)
    };
    let suffix: String = suffix.chars().filter(|c| *c != '+' && *c != '%').collect();

    let mut parts: Vec<&str> = Vec::new();
    if !logical.classify.is_empty() {
        parts.push(&logical.classify);
    }
    if !logical.functional_id.is_empty() {
        parts.push(&logical.functional_id);
    }
    if !logical.logical_id.is_empty() {
        parts.push(&logical.logical_id);
    }
    if !suffix.is_empty() {
        parts.push(&suffix);
    }
    parts.join(&cfg.link_symbol)
}

/// Substitute `{attribute.path}` placeholders with concrete values.
/// Unknown placeholders render empty.
fn render_naming(template: &str, attrs: &BTreeMap<String, Scalar>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let path = &rest[open + 1..open + close];
        if let Some(value) = attrs.get(path) {
            out.push_str(&value.to_string());
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ParamValue;

    fn logical(attrs: Vec<(&str, ParamValue)>) -> LogicalScenario {
        LogicalScenario {
            functional_id: "F01".into(),
            logical_id: "L01".into(),
            naming: String::new(),
            description: String::new(),
            map_file: String::new(),
            classify: String::new(),
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            unit_factors: BTreeMap::new(),
        }
    }

    fn ints(values: &[i64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::Int).collect()
    }

    #[test]
    fn two_independent_lists_expand_cartesian() {
        let logical = logical(vec![
            ("Ego.Ini.Speed", ParamValue::Enum(ints(&[10, 20, 30]))),
            ("Env.Time", ParamValue::Enum(ints(&[1, 2, 3, 4]))),
            ("Road.Type", ParamValue::Scalar(Scalar::Text("straight".into()))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        assert_eq!(concretes.len(), 12);
        // Scalars broadcast unchanged.
        assert!(concretes
            .iter()
            .all(|c| c.attr_text("Road.Type") == Some("straight")));
    }

    #[test]
    fn paired_lists_in_one_group_expand_lock_step() {
        let logical = logical(vec![
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3, 4, 5]))),
            ("Npc1.Rel.Long", ParamValue::Paired(ints(&[10, 20, 30, 40, 50]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        assert_eq!(concretes.len(), 5);
        for (i, c) in concretes.iter().enumerate() {
            let speed = c.attr_i64("Npc1.Ini.Speed").unwrap();
            let long = c.attr_i64("Npc1.Rel.Long").unwrap();
            assert_eq!(long, speed * 10, "slot {i} must stay aligned");
        }
    }

    #[test]
    fn length_one_paired_sibling_broadcasts_to_group_length() {
        let logical = logical(vec![
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3, 4, 5]))),
            ("Npc1.Rel.Side", ParamValue::Paired(ints(&[7]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        assert_eq!(concretes.len(), 5);
        assert!(concretes
            .iter()
            .all(|c| c.attr_i64("Npc1.Rel.Side") == Some(7)));
    }

    #[test]
    fn paired_groups_in_different_families_multiply() {
        let logical = logical(vec![
            ("Road.Curve", ParamValue::Paired(ints(&[100, 200]))),
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        assert_eq!(concretes.len(), 6);
    }

    // Characterization of the redistribution policy for non-paired lists
    // sharing a group with paired members.
    #[test]
    fn unpaired_list_in_paired_group_buckets_by_distinct_value() {
        let logical = logical(vec![
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3, 4, 5]))),
            ("Npc1.Rel.Long", ParamValue::Enum(ints(&[10, 20]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        // Five lock-step slots times two buckets.
        assert_eq!(concretes.len(), 10);
        let with_10 = concretes
            .iter()
            .filter(|c| c.attr_i64("Npc1.Rel.Long") == Some(10))
            .count();
        assert_eq!(with_10, 5);
    }

    #[test]
    fn redistribution_collapses_duplicate_values_into_one_bucket() {
        let logical = logical(vec![
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3]))),
            ("Npc1.Rel.Long", ParamValue::Enum(ints(&[10, 10, 20]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        // Two distinct bucket values, not three raw elements.
        assert_eq!(concretes.len(), 6);
    }

    #[test]
    fn redistribution_bucket_sizes_follow_multiplicity() {
        let buckets = redistribute(&ints(&[10, 10, 20]), 3);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].len(), 6);
        assert_eq!(buckets[1].len(), 3);
        assert_eq!(buckets[0][0], Scalar::Int(10));
        assert_eq!(buckets[1][0], Scalar::Int(20));
    }

    #[test]
    fn unpaired_list_outside_the_paired_family_stays_cartesian() {
        let logical = logical(vec![
            ("Npc1.Ini.Speed", ParamValue::Paired(ints(&[1, 2, 3]))),
            ("Env.Time", ParamValue::Enum(ints(&[10, 10, 20]))),
        ]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        // Environment is not the paired family, so the duplicate survives.
        assert_eq!(concretes.len(), 9);
    }

    #[test]
    fn counter_naming_produces_unique_ids() {
        let logical = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Enum(ints(&[10, 20, 30])),
        )]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        let ids: Vec<&str> = concretes.iter().map(|c| c.concrete_id.as_str()).collect();
        assert_eq!(ids, vec!["F01_L01_1", "F01_L01_2", "F01_L01_3"]);
    }

    #[test]
    fn naming_template_substitutes_and_strips_reserved_chars() {
        let mut l = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Enum(ints(&[10, 20])),
        )]);
        l.naming = "v{Ego.Ini.Speed}+%".to_string();
        let concretes = expand(&l, &BatchConfig::default()).unwrap();
        assert_eq!(concretes[0].concrete_id, "F01_L01_v10");
        assert_eq!(concretes[1].concrete_id, "F01_L01_v20");
    }

    #[test]
    fn classification_prefixes_the_concrete_id() {
        let mut l = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Scalar(Scalar::Int(10)),
        )]);
        l.classify = "Urban".to_string();
        let concretes = expand(&l, &BatchConfig::default()).unwrap();
        assert_eq!(concretes[0].concrete_id, "Urban_F01_L01_1");
    }

    #[test]
    fn range_attribute_expands_before_product() {
        let logical = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Range {
                min: 10.0,
                step: 5.0,
                max: 80.0,
            },
        )]);
        let concretes = expand(&logical, &BatchConfig::default()).unwrap();
        assert_eq!(concretes.len(), 15);
        assert_eq!(concretes[0].attr_i64("Ego.Ini.Speed"), Some(10));
        assert_eq!(concretes[14].attr_i64("Ego.Ini.Speed"), Some(80));
    }

    #[test]
    fn unit_factor_applies_to_expanded_values() {
        let mut l = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Enum(ints(&[36, 72])),
        )]);
        l.unit_factors
            .insert("Ego.Ini.Speed".to_string(), 1.0 / 3.6);
        let concretes = expand(&l, &BatchConfig::default()).unwrap();
        let v0 = concretes[0].attr_f64("Ego.Ini.Speed").unwrap();
        assert!((v0 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn empty_list_attribute_is_an_empty_result_error() {
        let logical = logical(vec![("Ego.Ini.Speed", ParamValue::Enum(vec![]))]);
        let err = expand(&logical, &BatchConfig::default()).expect_err("empty");
        assert!(matches!(err, PipelineError::NoConcreteScenarios { .. }));
    }

    #[test]
    fn global_dedup_keeps_earliest_and_logs_later() {
        let l1 = logical(vec![(
            "Ego.Ini.Speed",
            ParamValue::Scalar(Scalar::Int(10)),
        )]);
        let l2 = l1.clone();
        let mut log = RejectionLog::new();
        let concretes = expand_all(&[l1, l2], &BatchConfig::default(), &mut log).unwrap();
        assert_eq!(concretes.len(), 1);
        assert_eq!(log.len(), 1);
        assert!(log.get(1).unwrap().reason.contains("duplicate concrete id"));
    }
}
