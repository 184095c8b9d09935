//! Logical scenario table builder.
//!
//! Normalizes the raw tabular input (dotted attribute columns, one row per
//! authored scenario family) into `LogicalScenario` records: schema check,
//! merged-cell forward fill, vocabulary substitution, compound-cell
//! splitting, identity dedup.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::BatchConfig;
use crate::pipeline::PipelineError;
use crate::rejection::{Rejection, RejectionLog, RuleCategory};
use crate::scenario::LogicalScenario;
use crate::value::parse_cell;

/// In-memory form of the acquired table. Acquisition and sheet parsing are
/// external; this is the normalized hand-off shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    #[must_use]
    pub fn cell<'a>(&'a self, row: &'a [String], name: &str) -> &'a str {
        self.column_index(name)
            .and_then(|i| row.get(i))
            .map_or("", String::as_str)
    }
}

/// Build the logical scenario sequence from a raw table.
///
/// # Errors
///
/// - [`PipelineError::MissingColumns`] when the id or configured level
///   columns are absent.
/// - [`PipelineError::NoTestCaseRows`] when the table has no rows at all.
/// - [`PipelineError::NoLogicalScenarios`] when every row was rejected.
pub fn build_logical(
    raw: &RawTable,
    cfg: &BatchConfig,
    rejections: &mut RejectionLog,
) -> Result<Vec<LogicalScenario>, PipelineError> {
    check_schema(raw, cfg)?;
    if raw.rows.is_empty() {
        return Err(PipelineError::NoTestCaseRows);
    }

    let rows = forward_fill(raw, cfg);
    let rows = substitute_vocabulary(raw, rows, cfg);

    let mut seen: Vec<(String, String)> = Vec::new();
    let mut logicals = Vec::new();

    for row in &rows {
        let functional_id = raw.cell(row, &cfg.columns.functional_id).to_string();
        let logical_id = raw.cell(row, &cfg.columns.logical_id).to_string();
        let row_id = join_id(&functional_id, &logical_id, &cfg.link_symbol);

        // Readiness gate: unfinished rows are design rejections, not errors.
        if let Some(status_idx) = raw.column_index(&cfg.columns.status) {
            let status = row.get(status_idx).map_or("", String::as_str);
            if !status.is_empty() && status != cfg.columns.ready_token {
                rejections.push(Rejection {
                    functional_id,
                    logical_id,
                    concrete_id: row_id,
                    reason: format!("row status {status:?} is not ready for generalization"),
                    category: RuleCategory::Design,
                });
                continue;
            }
        }

        // Every scenario needs an ego vehicle before anything else applies.
        if raw.cell(row, "Ego.Phy.Model").is_empty() {
            rejections.push(Rejection {
                functional_id,
                logical_id,
                concrete_id: row_id,
                reason: "scenario declares no Ego entity".to_string(),
                category: RuleCategory::Design,
            });
            continue;
        }

        // Identity dedup, earliest occurrence kept.
        let identity = (functional_id.clone(), logical_id.clone());
        if seen.contains(&identity) {
            rejections.push(Rejection {
                functional_id,
                logical_id,
                concrete_id: row_id,
                reason: "duplicate scenario identity, first occurrence kept".to_string(),
                category: RuleCategory::Design,
            });
            continue;
        }
        seen.push(identity);

        logicals.push(build_row(raw, row, cfg));
    }

    if logicals.is_empty() {
        return Err(PipelineError::NoLogicalScenarios);
    }
    log::info!("built {} logical scenarios", logicals.len());
    Ok(logicals)
}

fn check_schema(raw: &RawTable, cfg: &BatchConfig) -> Result<(), PipelineError> {
    let mut required = vec![
        cfg.columns.functional_id.clone(),
        cfg.columns.logical_id.clone(),
    ];
    required.extend(cfg.columns.levels.iter().cloned());

    let missing: Vec<String> = required
        .into_iter()
        .filter(|name| raw.column_index(name).is_none())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingColumns(missing))
    }
}

/// Columns forward-filled from the previous row when blank, reproducing the
/// spreadsheet merged-cell idiom. Attribute cells are never filled: a blank
/// attribute means "not set for this family".
fn descriptive_columns(cfg: &BatchConfig) -> Vec<String> {
    let mut cols = vec![
        cfg.columns.functional_id.clone(),
        cfg.columns.description.clone(),
        cfg.columns.naming.clone(),
        cfg.columns.map_file.clone(),
        cfg.columns.status.clone(),
    ];
    cols.extend(cfg.vocab.classification.keys().cloned());
    cols
}

fn forward_fill(raw: &RawTable, cfg: &BatchConfig) -> Vec<Vec<String>> {
    let fill_idx: Vec<usize> = descriptive_columns(cfg)
        .iter()
        .filter_map(|name| raw.column_index(name))
        .collect();

    let mut rows = raw.rows.clone();
    for r in 1..rows.len() {
        for &i in &fill_idx {
            if rows[r].get(i).is_none_or(|cell| cell.is_empty()) {
                let previous = rows[r - 1].get(i).cloned().unwrap_or_default();
                if let Some(cell) = rows[r].get_mut(i) {
                    *cell = previous;
                }
            }
        }
    }
    rows
}

/// Table-driven shorthand translation. The substitution tables are external
/// configuration; the engine only applies them to the matching columns.
fn substitute_vocabulary(
    raw: &RawTable,
    mut rows: Vec<Vec<String>>,
    cfg: &BatchConfig,
) -> Vec<Vec<String>> {
    for (prefix, table) in &cfg.vocab.substitutions {
        for (i, column) in raw.columns.iter().enumerate() {
            if !column.starts_with(prefix.as_str()) {
                continue;
            }
            for row in &mut rows {
                if let Some(cell) = row.get_mut(i) {
                    for (from, to) in table {
                        if cell.contains(from.as_str()) {
                            *cell = cell.replace(from.as_str(), to.as_str());
                        }
                    }
                }
            }
        }
    }
    rows
}

fn join_id(functional_id: &str, logical_id: &str, link: &str) -> String {
    match (functional_id.is_empty(), logical_id.is_empty()) {
        (false, false) => format!("{functional_id}{link}{logical_id}"),
        (false, true) => functional_id.to_string(),
        _ => logical_id.to_string(),
    }
}

fn build_row(raw: &RawTable, row: &[String], cfg: &BatchConfig) -> LogicalScenario {
    let mut attrs = BTreeMap::new();
    let mut unit_factors = BTreeMap::new();

    for (i, column) in raw.columns.iter().enumerate() {
        if !column.contains('.') {
            continue;
        }
        let cell = row.get(i).map_or("", String::as_str);

        // Lane counts always materialize, blank cells included, so the
        // downstream lane rules see explicit zeros.
        if column == "Lane.Num" {
            for (path, value) in split_lane_cell(cell, cfg) {
                attrs.insert(path, value);
            }
            continue;
        }
        if cell.is_empty() {
            continue;
        }
        if is_trigger_column(column) {
            split_trigger_cell(column, cell, cfg, &mut attrs, &mut unit_factors);
            continue;
        }
        if is_action_column(column) {
            split_action_cell(column, cell, cfg, &mut attrs, &mut unit_factors);
            continue;
        }

        let parsed = parse_cell(cell, &cfg.markers);
        if (parsed.unit_factor - 1.0).abs() > f64::EPSILON {
            unit_factors.insert(column.clone(), parsed.unit_factor);
        }
        attrs.insert(column.clone(), parsed.value);
    }

    let classify = classification_prefix(raw, row, cfg);

    LogicalScenario {
        functional_id: raw.cell(row, &cfg.columns.functional_id).to_string(),
        logical_id: raw.cell(row, &cfg.columns.logical_id).to_string(),
        naming: raw.cell(row, &cfg.columns.naming).to_string(),
        description: raw.cell(row, &cfg.columns.description).to_string(),
        map_file: raw.cell(row, &cfg.columns.map_file).to_string(),
        classify,
        attrs,
        unit_factors,
    }
}

fn is_trigger_column(column: &str) -> bool {
    column.ends_with(".Trigger")
}

fn is_action_column(column: &str) -> bool {
    column
        .rsplit('.')
        .next()
        .is_some_and(|tail| tail.starts_with("Action") && tail != "Action")
        || column.ends_with(".Action")
}

/// `N[-M[@D]]`: lane count, changed lane count and the distance at which the
/// change happens. Missing parts default to zero. A cell using the
/// enumeration or range markers stays a generalized lane count with no
/// change section.
fn split_lane_cell(cell: &str, cfg: &BatchConfig) -> Vec<(String, crate::value::ParamValue)> {
    use crate::value::{ParamValue, Scalar};

    let zero = || ParamValue::Scalar(Scalar::Int(0));
    let trimmed = cell.trim();
    if trimmed.contains(cfg.markers.enumeration.as_str())
        || trimmed.contains(cfg.markers.range.as_str())
    {
        return vec![
            ("Lane.Num".to_string(), parse_cell(trimmed, &cfg.markers).value),
            ("Lane.Num2".to_string(), zero()),
            ("Lane.Num2Dist".to_string(), zero()),
        ];
    }

    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^(\d+)(?:-(\d+))?(?:@(\d+))?").expect("lane pattern"));

    let (num, num2, num2dist) = pattern.captures(trimmed).map_or((0, 0, 0), |caps| {
        let get = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<i64>().ok())
                .unwrap_or(0)
        };
        (get(1), get(2), get(3))
    });

    vec![
        ("Lane.Num".to_string(), ParamValue::Scalar(Scalar::Int(num))),
        (
            "Lane.Num2".to_string(),
            ParamValue::Scalar(Scalar::Int(num2)),
        ),
        (
            "Lane.Num2Dist".to_string(),
            ParamValue::Scalar(Scalar::Int(num2dist)),
        ),
    ]
}

/// Compact trigger cell `[Ref.][distmode.]type<rule>value`, split into the
/// five dotted sub-columns.
fn split_trigger_cell(
    column: &str,
    cell: &str,
    cfg: &BatchConfig,
    attrs: &mut BTreeMap<String, crate::value::ParamValue>,
    unit_factors: &mut BTreeMap<String, f64>,
) {
    use crate::value::{ParamValue, Scalar};

    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(Ego|Npc\d+)\.)?(?:(euclidean|lane)\.)?(time|ttc|thw|distance|speed)(>|<|=)(.+)$",
        )
        .expect("trigger pattern")
    });

    let Some(caps) = pattern.captures(cell.trim()) else {
        // Malformed cells stay raw; downstream materialization rejects them.
        attrs.insert(
            column.to_string(),
            ParamValue::Scalar(Scalar::Text(cell.trim().to_string())),
        );
        return;
    };

    let text = |m: Option<regex::Match<'_>>| m.map_or(String::new(), |m| m.as_str().to_string());
    let rule = match &caps[4] {
        ">" => "greaterThan",
        "<" => "lessThan",
        _ => "equalTo",
    };

    attrs.insert(
        format!("{column}.Ref"),
        ParamValue::Scalar(Scalar::Text(text(caps.get(1)))),
    );
    attrs.insert(
        format!("{column}.Disttype"),
        ParamValue::Scalar(Scalar::Text(text(caps.get(2)))),
    );
    attrs.insert(
        format!("{column}.Type"),
        ParamValue::Scalar(Scalar::Text(caps[3].to_string())),
    );
    attrs.insert(
        format!("{column}.Rule"),
        ParamValue::Scalar(Scalar::Text(rule.to_string())),
    );

    let parsed = parse_cell(&caps[5], &cfg.markers);
    if (parsed.unit_factor - 1.0).abs() > f64::EPSILON {
        unit_factors.insert(format!("{column}.Value"), parsed.unit_factor);
    }
    attrs.insert(format!("{column}.Value"), parsed.value);
}

/// Compact action cell `type=value[@endtype=endvalue]`; a missing end clause
/// gets the `none`/0 end.
fn split_action_cell(
    column: &str,
    cell: &str,
    cfg: &BatchConfig,
    attrs: &mut BTreeMap<String, crate::value::ParamValue>,
    unit_factors: &mut BTreeMap<String, f64>,
) {
    use crate::value::{ParamValue, Scalar};

    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(
            r"^(speed|laneChange|laneOffset|stop|userDefined)=([^@]+)(?:@(none|time|distance)=(.+))?$",
        )
        .expect("action pattern")
    });

    let Some(caps) = pattern.captures(cell.trim()) else {
        attrs.insert(
            column.to_string(),
            ParamValue::Scalar(Scalar::Text(cell.trim().to_string())),
        );
        return;
    };

    attrs.insert(
        format!("{column}.Type"),
        ParamValue::Scalar(Scalar::Text(caps[1].to_string())),
    );

    let parsed = parse_cell(&caps[2], &cfg.markers);
    if (parsed.unit_factor - 1.0).abs() > f64::EPSILON {
        unit_factors.insert(format!("{column}.Value"), parsed.unit_factor);
    }
    attrs.insert(format!("{column}.Value"), parsed.value);

    let end_type = caps.get(3).map_or("none", |m| m.as_str());
    attrs.insert(
        format!("{column}.Endtype"),
        ParamValue::Scalar(Scalar::Text(end_type.to_string())),
    );
    let end_value = caps.get(4).map_or_else(
        || ParamValue::Scalar(Scalar::Int(0)),
        |m| parse_cell(m.as_str(), &cfg.markers).value,
    );
    attrs.insert(format!("{column}.Endvalue"), end_value);
}

/// Canonical classification labels joined into the concrete-id prefix.
fn classification_prefix(raw: &RawTable, row: &[String], cfg: &BatchConfig) -> String {
    let mut labels = Vec::new();
    for (column, table) in &cfg.vocab.classification {
        let cell = raw.cell(row, column);
        if cell.is_empty() {
            continue;
        }
        let label = table.get(cell).cloned().unwrap_or_else(|| cell.to_string());
        if !label.is_empty() {
            labels.push(label);
        }
    }
    labels.join(&cfg.link_symbol)
}
