//! Artifact writing: one JSON file per behavior record (keyed by unique
//! concrete id) and one per distinct synthetic map, written from a
//! fixed-size worker pool. Artifacts are independent, so no ordering is
//! required across workers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};

use scenweave_core::{BatchOutput, Record, Scalar};

/// File-name stem of one record: the concrete id for behavior records, the
/// map key for road records.
fn record_stem(record: &Record, key: &str) -> Option<String> {
    match record.get(key) {
        Some(Scalar::Text(value)) if !value.is_empty() => Some(value.clone()),
        _ => None,
    }
}

fn write_pool(records: &[(String, &Record)], dir: &Path, workers: usize) -> Result<()> {
    let next = AtomicUsize::new(0);
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some((stem, record)) = records.get(index) else {
                    break;
                };
                let path = dir.join(format!("{stem}.json"));
                let result = serde_json::to_string_pretty(record)
                    .map_err(anyhow::Error::from)
                    .and_then(|text| fs::write(&path, text).map_err(anyhow::Error::from));
                if let Err(err) = result {
                    let mut failures = failures.lock().unwrap_or_else(|e| e.into_inner());
                    failures.push(format!("{}: {err}", path.display()));
                }
            });
        }
    });

    let failures = failures.into_inner().unwrap_or_else(|e| e.into_inner());
    if failures.is_empty() {
        Ok(())
    } else {
        bail!("{} artifacts failed to write: {:?}", failures.len(), failures)
    }
}

/// Write all behavior and road records under `output/behaviors` and
/// `output/roads`.
pub fn write_artifacts(output: &BatchOutput, dir: &Path, workers: usize) -> Result<()> {
    let behaviors_dir = dir.join("behaviors");
    let roads_dir = dir.join("roads");
    fs::create_dir_all(&behaviors_dir)
        .with_context(|| format!("creating {}", behaviors_dir.display()))?;
    fs::create_dir_all(&roads_dir).with_context(|| format!("creating {}", roads_dir.display()))?;

    let behaviors: Vec<(String, &Record)> = output
        .behavior_records
        .iter()
        .filter_map(|record| record_stem(record, "ConcreteId").map(|stem| (stem, record)))
        .collect();
    let roads: Vec<(String, &Record)> = output
        .road_records
        .iter()
        .filter_map(|record| record_stem(record, "MapFile").map(|stem| (stem, record)))
        .collect();

    write_pool(&behaviors, &behaviors_dir, workers)?;
    write_pool(&roads, &roads_dir, workers)?;
    log::info!(
        "wrote {} behavior and {} road artifacts",
        behaviors.len(),
        roads.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenweave_core::{run_batch_synthetic, BatchConfig, RawTable};

    fn sample_output() -> BatchOutput {
        let table = RawTable {
            columns: [
                "FuncId",
                "LogicId",
                "Road.Type",
                "Lane.Num",
                "Ego.Phy.Model",
                "Ego.Ini.Speed",
                "Env.Time",
                "Env.Weather",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            rows: vec![
                ["F01", "L01", "straight", "2/3", "sedan", "10", "noon", "sunny"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            ],
        };
        run_batch_synthetic(&table, &BatchConfig::default()).unwrap()
    }

    #[test]
    fn writes_one_file_per_record() {
        let output = sample_output();
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(&output, dir.path(), 2).unwrap();

        let behaviors = fs::read_dir(dir.path().join("behaviors")).unwrap().count();
        let roads = fs::read_dir(dir.path().join("roads")).unwrap().count();
        assert_eq!(behaviors, output.behavior_records.len());
        assert_eq!(roads, output.road_records.len());
    }

    #[test]
    fn artifacts_round_trip_as_json_records() {
        let output = sample_output();
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(&output, dir.path(), 1).unwrap();

        let first = &output.scenarios[0].concrete_id;
        let text =
            fs::read_to_string(dir.path().join("behaviors").join(format!("{first}.json"))).unwrap();
        let parsed: Record = serde_json::from_str(&text).unwrap();
        assert!(parsed.contains_key("Ego.Ini.Speed"));
    }
}
