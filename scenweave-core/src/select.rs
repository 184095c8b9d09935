//! Density-based selection filter (optional, config-gated).
//!
//! Builds a feature vector per scenario, projects it to at most three
//! variance-preserving components, density-clusters the projection and keeps
//! an evenly spaced representative subset of every cluster. Noise is never
//! kept. The clustering primitives are implemented directly over plain
//! buffers; with a fixed seed the whole pass is deterministic.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SelectionCfg;
use crate::scenario::ConcreteScenario;

/// Sentinel used for absent categorical features.
const NONE_SENTINEL: &str = "none";

/// Compute the keep-mask for a batch. `mask[i]` is true when scenario `i`
/// survives the down-selection. Empty input yields an empty mask.
#[must_use]
pub fn select(scenarios: &[ConcreteScenario], params: &SelectionCfg) -> Vec<bool> {
    if scenarios.is_empty() {
        return Vec::new();
    }

    let features = feature_matrix(scenarios);
    let normalized = min_max_normalize(features);
    let projected = project(&normalized, params.seed);
    let labels = dbscan(&projected, params.eps, params.min_samples);

    let mut mask = vec![false; scenarios.len()];
    let max_label = labels.iter().copied().max().unwrap_or(-1);
    for label in 0..=max_label {
        let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == label).collect();
        if members.is_empty() {
            continue;
        }
        for index in representative_subset(&projected, &members, params.keep_fraction) {
            mask[index] = true;
        }
    }
    log::debug!(
        "selection kept {}/{} scenarios",
        mask.iter().filter(|k| **k).count(),
        scenarios.len()
    );
    mask
}

/// Feature extraction. Numeric features pass through; categoricals are
/// label-encoded in first-occurrence order over the batch.
fn feature_matrix(scenarios: &[ConcreteScenario]) -> Vec<Vec<f64>> {
    let mut encoders: Vec<LabelEncoder> = (0..CATEGORICAL_COUNT).map(|_| LabelEncoder::new()).collect();

    scenarios
        .iter()
        .map(|scenario| {
            let mut row = Vec::with_capacity(3 + CATEGORICAL_COUNT + 1);
            // Road shape numerics.
            row.push(scenario.attr_f64("Road.Curve").unwrap_or(0.0));
            row.push(scenario.attr_f64("Road.Speedlimit").unwrap_or(0.0));
            row.push(scenario.attr_f64("Lane.Num").unwrap_or(0.0));

            let nearest = nearest_ahead(scenario);
            let nearest_name = nearest.as_deref();
            let first = |entity: Option<&str>, tail: &str| -> String {
                entity
                    .and_then(|e| scenario.attr_text(&format!("{e}.{tail}")))
                    .unwrap_or(NONE_SENTINEL)
                    .to_string()
            };

            row.push(
                nearest_name
                    .and_then(|e| scenario.attr_f64(&format!("{e}.Ini.Speed")))
                    .unwrap_or(0.0),
            );

            let categoricals = [
                first(Some("Road"), "Type"),
                first(Some("Road"), "Direction"),
                first(Some("Junction"), "Type"),
                first(nearest_name, "Phy.Category"),
                first(nearest_name, "Phy.Model"),
                first(nearest_name, "Dyn1.Action1.Type"),
                first(nearest_name, "Dyn1.Trigger.Type"),
                first(Some("Ego"), "Dyn1.Action1.Type"),
                first(Some("Ego"), "Dyn1.Trigger.Type"),
                first(Some("Env"), "Time"),
                first(Some("Env"), "Weather"),
            ];
            for (encoder, token) in encoders.iter_mut().zip(categoricals) {
                row.push(encoder.encode(&token));
            }
            row
        })
        .collect()
}

const CATEGORICAL_COUNT: usize = 11;

/// Other entity with the smallest positive longitudinal gap among those
/// sharing the ego reference; `None` when no entity sits ahead.
fn nearest_ahead(scenario: &ConcreteScenario) -> Option<String> {
    scenario
        .entity_names()
        .into_iter()
        .filter(|name| name != "Ego")
        .filter(|name| scenario.attr_text(&format!("{name}.Rel.Ref")) == Some("Ego"))
        .filter_map(|name| {
            let gap = scenario.attr_f64(&format!("{name}.Rel.Long"))?;
            (gap > 0.0).then_some((name, gap))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
}

struct LabelEncoder {
    seen: Vec<String>,
}

impl LabelEncoder {
    fn new() -> Self {
        Self { seen: Vec::new() }
    }

    fn encode(&mut self, token: &str) -> f64 {
        if let Some(index) = self.seen.iter().position(|t| t == token) {
            return index as f64;
        }
        self.seen.push(token.to_string());
        (self.seen.len() - 1) as f64
    }
}

/// Joint min-max normalization to [0,1]; constant columns collapse to zero.
fn min_max_normalize(mut matrix: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    if matrix.is_empty() {
        return matrix;
    }
    let dims = matrix[0].len();
    for d in 0..dims {
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for row in &matrix {
            min = min.min(row[d]);
            max = max.max(row[d]);
        }
        let span = max - min;
        for row in &mut matrix {
            row[d] = if span > 0.0 { (row[d] - min) / span } else { 0.0 };
        }
    }
    matrix
}

/// Variance-preserving projection to `min(3, n)` components: covariance plus
/// seeded power iteration with deflation. Stabilizes the density estimate
/// only; the projection itself carries no semantics.
fn project(matrix: &[Vec<f64>], seed: u64) -> Vec<Vec<f64>> {
    let n = matrix.len();
    let dims = matrix.first().map_or(0, Vec::len);
    let components = n.min(3);
    if n == 0 || dims == 0 {
        return vec![Vec::new(); n];
    }

    // Center the columns.
    let mut means = vec![0.0; dims];
    for row in matrix {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in &mut means {
        *m /= n as f64;
    }
    let centered: Vec<Vec<f64>> = matrix
        .iter()
        .map(|row| row.iter().zip(&means).map(|(v, m)| v - m).collect())
        .collect();

    // Covariance matrix.
    let mut cov = vec![vec![0.0; dims]; dims];
    for row in &centered {
        for i in 0..dims {
            for j in 0..dims {
                cov[i][j] += row[i] * row[j];
            }
        }
    }
    let denom = (n.max(2) - 1) as f64;
    for line in &mut cov {
        for v in line.iter_mut() {
            *v /= denom;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(components);
    for _ in 0..components {
        let mut v: Vec<f64> = (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
        normalize(&mut v);
        for _ in 0..64 {
            let mut next = mat_vec(&cov, &v);
            if normalize(&mut next) < 1e-12 {
                break;
            }
            v = next;
        }
        // Deflate the captured direction out of the covariance.
        let lambda = dot(&v, &mat_vec(&cov, &v));
        for i in 0..dims {
            for j in 0..dims {
                cov[i][j] -= lambda * v[i] * v[j];
            }
        }
        basis.push(v);
    }

    centered
        .iter()
        .map(|row| basis.iter().map(|axis| dot(row, axis)).collect())
        .collect()
}

fn mat_vec(matrix: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    matrix.iter().map(|line| dot(line, v)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Classic density clustering. Labels are cluster ids from zero upward;
/// −1 marks noise.
fn dbscan(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<i64> {
    const UNVISITED: i64 = -2;
    const NOISE: i64 = -1;

    let mut labels = vec![UNVISITED; points.len()];
    let mut cluster = 0i64;

    for start in 0..points.len() {
        if labels[start] != UNVISITED {
            continue;
        }
        let neighbors = region_query(points, start, eps);
        if neighbors.len() < min_samples {
            labels[start] = NOISE;
            continue;
        }

        labels[start] = cluster;
        let mut queue: Vec<usize> = neighbors;
        let mut head = 0;
        while head < queue.len() {
            let point = queue[head];
            head += 1;
            if labels[point] == NOISE {
                labels[point] = cluster;
            }
            if labels[point] != UNVISITED {
                continue;
            }
            labels[point] = cluster;
            let expansion = region_query(points, point, eps);
            if expansion.len() >= min_samples {
                queue.extend(expansion);
            }
        }
        cluster += 1;
    }

    labels
}

fn region_query(points: &[Vec<f64>], center: usize, eps: f64) -> Vec<usize> {
    (0..points.len())
        .filter(|&i| distance(&points[center], &points[i]) <= eps)
        .collect()
}

/// Evenly spaced subset of a cluster: members sorted ascending by distance
/// to the centroid, then every `size/keep`-th index. Representative
/// sampling, not a prefix.
fn representative_subset(points: &[Vec<f64>], members: &[usize], keep_fraction: f64) -> Vec<usize> {
    let size = members.len();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let keep = ((size as f64) * keep_fraction).ceil().max(0.0) as usize;
    let keep = keep.min(size);
    if keep == 0 {
        return Vec::new();
    }

    let dims = points[members[0]].len();
    let mut centroid = vec![0.0; dims];
    for &m in members {
        for (c, v) in centroid.iter_mut().zip(&points[m]) {
            *c += v;
        }
    }
    for c in &mut centroid {
        *c /= size as f64;
    }

    let mut ordered: Vec<(f64, usize)> = members
        .iter()
        .map(|&m| (distance(&points[m], &centroid), m))
        .collect();
    ordered.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    (0..keep).map(|j| ordered[j * size / keep].1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Scalar;
    use std::collections::BTreeMap;

    fn scenario(id: usize, speed: f64) -> ConcreteScenario {
        ConcreteScenario {
            functional_id: "F01".into(),
            logical_id: "L01".into(),
            concrete_id: format!("F01_L01_{id}"),
            description: String::new(),
            map_file: String::new(),
            attrs: BTreeMap::from([
                ("Road.Type".to_string(), Scalar::Text("straight".into())),
                ("Lane.Num".to_string(), Scalar::Int(2)),
                ("Ego.Phy.Model".to_string(), Scalar::Text("car".into())),
                ("Ego.Ini.Speed".to_string(), Scalar::Float(speed)),
            ]),
            entities: Vec::new(),
        }
    }

    fn params() -> SelectionCfg {
        SelectionCfg {
            enabled: true,
            eps: 0.3,
            min_samples: 3,
            keep_fraction: 0.2,
            seed: 7,
        }
    }

    #[test]
    fn empty_input_yields_empty_mask() {
        assert!(select(&[], &params()).is_empty());
    }

    #[test]
    fn single_cluster_of_ten_keeps_exactly_two() {
        let scenarios: Vec<ConcreteScenario> = (0..10).map(|i| scenario(i, 20.0)).collect();
        let mask = select(&scenarios, &params());
        assert_eq!(mask.len(), 10);
        assert_eq!(mask.iter().filter(|k| **k).count(), 2);
    }

    #[test]
    fn identical_input_and_seed_give_identical_masks() {
        let scenarios: Vec<ConcreteScenario> =
            (0..12).map(|i| scenario(i, 10.0 + (i % 3) as f64)).collect();
        let a = select(&scenarios, &params());
        let b = select(&scenarios, &params());
        assert_eq!(a, b);
    }

    #[test]
    fn sparse_points_are_noise_and_never_kept() {
        // Fewer samples than min_samples: everything is noise.
        let scenarios: Vec<ConcreteScenario> = (0..2).map(|i| scenario(i, i as f64 * 50.0)).collect();
        let mask = select(&scenarios, &params());
        assert!(mask.iter().all(|k| !k));
    }

    #[test]
    fn representative_subset_is_evenly_spaced_not_a_prefix() {
        let points: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let members: Vec<usize> = (0..10).collect();
        let kept = representative_subset(&points, &members, 0.2);
        // Sorted by distance to centroid (4.5): nearest are 4,5 then 3,6 ...
        // Even spacing over the sorted order picks positions 0 and 5.
        assert_eq!(kept.len(), 2);
        assert_ne!(kept[0], kept[1]);
    }

    #[test]
    fn dbscan_separates_distant_groups() {
        let mut points: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64 * 0.01, 0.0]).collect();
        points.extend((0..5).map(|i| vec![10.0 + i as f64 * 0.01, 0.0]));
        let labels = dbscan(&points, 0.1, 3);
        assert_eq!(labels[0], 0);
        assert_eq!(labels[9], 1);
        assert!(labels.iter().all(|&l| l >= 0));
    }

    #[test]
    fn dbscan_marks_outliers_as_noise() {
        let mut points: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64 * 0.01]).collect();
        points.push(vec![100.0]);
        let labels = dbscan(&points, 0.1, 3);
        assert_eq!(labels[5], -1);
    }
}
