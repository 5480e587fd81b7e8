//! Data transformation worker.
//!
//! The language model plans, the code executes: MAKER votes a
//! [`TransformationPlan`] into existence (temperature 0.0, transformations
//! must be deterministic), then the plan's typed steps are applied to a CSV
//! dataset from the blob store with no model in the loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::capability::{Sampler, TaskInput};
use crate::error::{Error, Result};
use crate::maker::{CancelToken, MakerConfig, first_to_ahead_by_k, parse_last_json};
use crate::store::BlobStore;

/// Raw-output cap for plans (transform specs run longer than verdicts).
const TRANSFORM_RAW_CAP: usize = 1600;

/// One typed transformation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformStep {
    /// Rename columns.
    Rename {
        /// Old name to new name.
        mapping: HashMap<String, String>,
    },
    /// Convert column value types.
    Convert {
        /// Column to target type ("int" | "float" | "string").
        conversions: HashMap<String, String>,
    },
    /// Drop duplicate rows by key columns.
    Dedupe {
        /// Columns forming the dedupe key.
        keys: Vec<String>,
    },
    /// Fill missing values.
    FillMissing {
        /// Column to fill value.
        fill_values: HashMap<String, Value>,
    },
    /// Keep rows where a column equals a value.
    Filter {
        /// Column to test.
        column: String,
        /// Value rows must equal.
        equals: Value,
    },
}

/// The typed result MAKER validates for this worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationPlan {
    /// Ordered steps to apply.
    pub steps: Vec<TransformStep>,
    /// Declared output schema (column to type).
    #[serde(default)]
    pub output_schema: Value,
    /// Plan provenance (input path, spec echo).
    #[serde(default)]
    pub provenance: Value,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    /// Blob key of the transformed dataset.
    pub output_path: String,
    /// Row count after transformation.
    pub rows: usize,
    /// Column names after transformation.
    pub columns: Vec<String>,
    /// The executed plan.
    pub plan: TransformationPlan,
}

/// In-memory tabular dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Column names.
    pub headers: Vec<String>,
    /// Row values, one cell per column.
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Parses a CSV byte buffer (first row is the header).
    ///
    /// # Errors
    ///
    /// Returns an error for malformed CSV.
    pub fn from_csv(bytes: &[u8]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::permanent(format!("csv parse: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::permanent(format!("csv parse: {e}")))?;
            let mut row: Vec<Value> = record
                .iter()
                .map(|cell| Value::String(cell.to_string()))
                .collect();
            row.resize(headers.len(), Value::Null);
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    /// Renders the table back to CSV bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.headers)
            .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
        for row in &self.rows {
            let record: Vec<String> = row.iter().map(cell_to_string).collect();
            writer
                .write_record(&record)
                .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::invariant(format!("csv render: {e}")))
    }

    /// Applies the plan's steps in order.
    ///
    /// Unknown columns in a step are ignored rather than fatal, matching
    /// the tolerant execution the planner is prompted for.
    #[must_use]
    pub fn apply(mut self, steps: &[TransformStep]) -> Self {
        for step in steps {
            match step {
                TransformStep::Rename { mapping } => {
                    for header in &mut self.headers {
                        if let Some(new_name) = mapping.get(header) {
                            *header = new_name.clone();
                        }
                    }
                }
                TransformStep::Convert { conversions } => {
                    for (column, target) in conversions {
                        let Some(idx) = self.column_index(column) else {
                            continue;
                        };
                        for row in &mut self.rows {
                            row[idx] = convert_cell(&row[idx], target);
                        }
                    }
                }
                TransformStep::Dedupe { keys } => {
                    let indices: Vec<usize> = keys
                        .iter()
                        .filter_map(|k| self.column_index(k))
                        .collect();
                    if indices.is_empty() {
                        continue;
                    }
                    let mut seen = std::collections::HashSet::new();
                    self.rows.retain(|row| {
                        let key: Vec<String> =
                            indices.iter().map(|&i| cell_to_string(&row[i])).collect();
                        seen.insert(key)
                    });
                }
                TransformStep::FillMissing { fill_values } => {
                    for (column, fill) in fill_values {
                        let Some(idx) = self.column_index(column) else {
                            continue;
                        };
                        for row in &mut self.rows {
                            let empty = match &row[idx] {
                                Value::Null => true,
                                Value::String(s) => s.is_empty(),
                                _ => false,
                            };
                            if empty {
                                row[idx] = fill.clone();
                            }
                        }
                    }
                }
                TransformStep::Filter { column, equals } => {
                    let Some(idx) = self.column_index(column) else {
                        continue;
                    };
                    let target = cell_to_string(equals);
                    self.rows.retain(|row| cell_to_string(&row[idx]) == target);
                }
            }
        }
        self
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn convert_cell(value: &Value, target: &str) -> Value {
    let text = cell_to_string(value);
    match target {
        "int" => text.trim().parse::<i64>().map_or(Value::Null, Value::from),
        "float" => text.trim().parse::<f64>().map_or(Value::Null, Value::from),
        "string" => Value::String(text),
        _ => value.clone(),
    }
}

/// Transformation worker.
pub struct Transformer {
    sampler: Arc<dyn Sampler>,
    blobs: Arc<dyn BlobStore>,
    config: MakerConfig,
    model: String,
    cancel: CancelToken,
}

impl Transformer {
    /// Creates a transformer.
    #[must_use]
    pub fn new(
        sampler: Arc<dyn Sampler>,
        blobs: Arc<dyn BlobStore>,
        config: MakerConfig,
        model: impl Into<String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            sampler,
            blobs,
            config: config.max_raw_len(TRANSFORM_RAW_CAP),
            model: model.into(),
            cancel,
        }
    }

    /// Plans and executes a transformation over a blob-store dataset.
    ///
    /// # Errors
    ///
    /// Returns an error when the dataset is missing, the planner fails to
    /// converge, or the output cannot be written.
    pub async fn transform(&self, data_path: &str, spec: &Value) -> Result<TransformOutcome> {
        let bytes = self.blobs.get(data_path).await?;
        let table = Table::from_csv(&bytes)?;
        info!(
            data_path,
            rows = table.rows.len(),
            columns = table.headers.len(),
            "planning transformation"
        );

        let input = TaskInput::new(build_transform_prompt(data_path, &table.headers, spec))
            .with_system(
                "You are a precise data transformer. Return ONLY valid JSON matching \
                 TransformationPlan. No explanations.",
            )
            .with_model(&self.model)
            .with_temperature(0.0)
            .with_max_tokens(1600);

        let plan: TransformationPlan = first_to_ahead_by_k(
            &input,
            self.sampler.as_ref(),
            parse_last_json,
            &self.config,
            &self.cancel,
        )
        .await?;

        let transformed = table.apply(&plan.steps);
        let output_path = output_path_for(data_path);
        self.blobs.put(&output_path, &transformed.to_csv()?).await?;

        info!(
            output = %output_path,
            rows = transformed.rows.len(),
            steps = plan.steps.len(),
            "transformation complete"
        );
        Ok(TransformOutcome {
            output_path,
            rows: transformed.rows.len(),
            columns: transformed.headers,
            plan,
        })
    }
}

fn build_transform_prompt(data_path: &str, headers: &[String], spec: &Value) -> String {
    format!(
        "Plan a transformation for the dataset at {data_path} with columns {headers:?}.\n\
         Requested spec: {spec}\n\
         Allowed step types: rename {{mapping}}, convert {{conversions}}, dedupe {{keys}}, \
         fill_missing {{fill_values}}, filter {{column, equals}}.\n\
         Return {{\"steps\": [...], \"output_schema\": {{...}}, \"provenance\": {{...}}}}."
    )
}

fn output_path_for(data_path: &str) -> String {
    data_path.strip_suffix(".csv").map_or_else(
        || format!("{data_path}_transformed.csv"),
        |stem| format!("{stem}_transformed.csv"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalBlobStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedSampler(String);

    #[async_trait]
    impl Sampler for FixedSampler {
        async fn sample(&self, _input: &TaskInput) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn table() -> Table {
        Table::from_csv(b"name,score\nalice,10\nbob,\nalice,10\n").unwrap()
    }

    #[test]
    fn test_csv_round_trip() {
        let table = table();
        assert_eq!(table.headers, vec!["name", "score"]);
        assert_eq!(table.rows.len(), 3);

        let bytes = table.to_csv().unwrap();
        let again = Table::from_csv(&bytes).unwrap();
        assert_eq!(again.rows.len(), 3);
    }

    #[test]
    fn test_rename_step() {
        let steps = vec![TransformStep::Rename {
            mapping: HashMap::from([("name".to_string(), "user".to_string())]),
        }];
        let out = table().apply(&steps);
        assert_eq!(out.headers, vec!["user", "score"]);
    }

    #[test]
    fn test_convert_step() {
        let steps = vec![TransformStep::Convert {
            conversions: HashMap::from([("score".to_string(), "int".to_string())]),
        }];
        let out = table().apply(&steps);
        assert_eq!(out.rows[0][1], json!(10));
        // Unparseable cell coerces to null.
        assert_eq!(out.rows[1][1], Value::Null);
    }

    #[test]
    fn test_dedupe_step() {
        let steps = vec![TransformStep::Dedupe {
            keys: vec!["name".to_string(), "score".to_string()],
        }];
        let out = table().apply(&steps);
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn test_fill_missing_step() {
        let steps = vec![TransformStep::FillMissing {
            fill_values: HashMap::from([("score".to_string(), json!("0"))]),
        }];
        let out = table().apply(&steps);
        assert_eq!(out.rows[1][1], json!("0"));
    }

    #[test]
    fn test_filter_step() {
        let steps = vec![TransformStep::Filter {
            column: "name".to_string(),
            equals: json!("alice"),
        }];
        let out = table().apply(&steps);
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn test_unknown_column_ignored() {
        let steps = vec![TransformStep::Filter {
            column: "ghost".to_string(),
            equals: json!("x"),
        }];
        let out = table().apply(&steps);
        assert_eq!(out.rows.len(), 3);
    }

    #[test]
    fn test_plan_deserializes_tagged_steps() {
        let plan: TransformationPlan = serde_json::from_value(json!({
            "steps": [
                {"type": "rename", "mapping": {"a": "b"}},
                {"type": "dedupe", "keys": ["b"]}
            ],
            "output_schema": {"b": "string"},
            "provenance": {"data_path": "in.csv"}
        }))
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(output_path_for("data/in.csv"), "data/in_transformed.csv");
        assert_eq!(output_path_for("data/in"), "data/in_transformed.csv");
    }

    #[tokio::test]
    async fn test_transform_end_to_end() {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        blobs
            .put("in.csv", b"name,score\nalice,10\nbob,7\nalice,10\n")
            .await
            .unwrap();

        let plan = json!({
            "steps": [
                {"type": "dedupe", "keys": ["name"]},
                {"type": "convert", "conversions": {"score": "int"}}
            ],
            "output_schema": {},
            "provenance": {"data_path": "in.csv"}
        })
        .to_string();

        let transformer = Transformer::new(
            Arc::new(FixedSampler(plan)),
            Arc::clone(&blobs),
            MakerConfig::with_k(2),
            "test-model",
            CancelToken::new(),
        );

        let outcome = transformer
            .transform("in.csv", &json!({"dedupe_on": "name"}))
            .await
            .unwrap();

        assert_eq!(outcome.output_path, "in_transformed.csv");
        assert_eq!(outcome.rows, 2);

        let out = blobs.get("in_transformed.csv").await.unwrap();
        let out_table = Table::from_csv(&out).unwrap();
        assert_eq!(out_table.rows.len(), 2);
    }
}
