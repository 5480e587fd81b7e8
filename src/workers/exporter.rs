//! Deliverable export worker.
//!
//! MAKER votes an [`ExportManifest`] describing the deliverable's layout;
//! rendering and upload are deterministic. CSV and JSON renderers are built
//! in; richer formats belong to external renderers behind the same
//! manifest.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::capability::{Sampler, TaskInput};
use crate::error::{Error, Result};
use crate::maker::{CancelToken, MakerConfig, first_to_ahead_by_k, parse_last_json};
use crate::store::BlobStore;
use crate::workers::transformer::Table;

/// Raw-output cap for export manifests.
const EXPORT_RAW_CAP: usize = 900;

/// One manifest section: a heading and the data keys it presents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSection {
    /// Section heading.
    pub heading: String,
    /// Top-level data keys included in the section.
    #[serde(default)]
    pub keys: Vec<String>,
}

/// The typed result MAKER validates for this worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Deliverable format ("csv" | "json").
    pub format: String,
    /// Deliverable title.
    pub title: String,
    /// Ordered sections.
    #[serde(default)]
    pub sections: Vec<ExportSection>,
}

/// One uploaded deliverable.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    /// Blob key of the rendered file.
    pub key: String,
    /// Format rendered.
    pub format: String,
}

/// Result of an export request.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    /// Uploaded deliverables.
    pub files: Vec<ExportedFile>,
    /// Manifests that drove the rendering.
    pub manifests: Vec<ExportManifest>,
}

/// Export worker.
pub struct Exporter {
    sampler: Arc<dyn Sampler>,
    blobs: Arc<dyn BlobStore>,
    config: MakerConfig,
    model: String,
    cancel: CancelToken,
}

impl Exporter {
    /// Creates an exporter.
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
            config: config.max_raw_len(EXPORT_RAW_CAP),
            model: model.into(),
            cancel,
        }
    }

    /// Renders deliverables in the requested formats.
    ///
    /// With a `data_path`, the tabular dataset is the deliverable body;
    /// otherwise the structured `data` payload is laid out per manifest.
    /// Unsupported formats are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the planner fails or an upload fails.
    pub async fn export(
        &self,
        formats: &[String],
        data: &Value,
        data_path: Option<&str>,
    ) -> Result<ExportOutcome> {
        let mut files = Vec::new();
        let mut manifests = Vec::new();

        for format in formats {
            let format = normalize_format(format);
            if format != "csv" && format != "json" {
                warn!(%format, "unsupported export format, skipping");
                continue;
            }

            let manifest = self.plan_manifest(&format, data, data_path).await?;
            let bytes = match data_path {
                Some(path) => self.render_table(path, &format).await?,
                None => render_structured(&manifest, data)?,
            };

            let key = format!("exports/{}-{}.{format}", slug(&manifest.title), Uuid::new_v4());
            self.blobs.put(&key, &bytes).await?;
            info!(%key, %format, "deliverable uploaded");

            files.push(ExportedFile {
                key,
                format: format.clone(),
            });
            manifests.push(manifest);
        }

        if files.is_empty() {
            return Err(Error::permanent(format!(
                "no renderable format among {formats:?}"
            )));
        }
        Ok(ExportOutcome { files, manifests })
    }

    async fn plan_manifest(
        &self,
        format: &str,
        data: &Value,
        data_path: Option<&str>,
    ) -> Result<ExportManifest> {
        let keys: Vec<&str> = data
            .as_object()
            .map(|o| o.keys().map(String::as_str).collect())
            .unwrap_or_default();
        let prompt = format!(
            "Plan a {format} deliverable. Input data keys: {keys:?}. Source dataset: {}.\n\
             Return {{\"format\": \"{format}\", \"title\": ..., \"sections\": \
             [{{\"heading\": ..., \"keys\": [...]}}]}}.",
            data_path.unwrap_or("inline"),
        );
        let input = TaskInput::new(prompt)
            .with_system("You are a precise report planner. Return only valid JSON.")
            .with_model(&self.model)
            .with_temperature(0.1)
            .with_max_tokens(900);

        first_to_ahead_by_k(
            &input,
            self.sampler.as_ref(),
            parse_last_json,
            &self.config,
            &self.cancel,
        )
        .await
    }

    /// Tabular deliverable: the dataset itself, re-rendered.
    async fn render_table(&self, data_path: &str, format: &str) -> Result<Vec<u8>> {
        let bytes = self.blobs.get(data_path).await?;
        let table = Table::from_csv(&bytes)?;
        if format == "json" {
            let rows: Vec<Value> = table
                .rows
                .iter()
                .map(|row| {
                    let obj: serde_json::Map<String, Value> = table
                        .headers
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect();
                    Value::Object(obj)
                })
                .collect();
            return Ok(serde_json::to_vec_pretty(&rows)?);
        }
        table.to_csv()
    }
}

/// Lays structured data out per the manifest's sections.
fn render_structured(manifest: &ExportManifest, data: &Value) -> Result<Vec<u8>> {
    if manifest.format == "json" {
        let sections: Vec<Value> = manifest
            .sections
            .iter()
            .map(|section| {
                let entries: serde_json::Map<String, Value> = section
                    .keys
                    .iter()
                    .filter_map(|key| data.get(key).map(|v| (key.clone(), v.clone())))
                    .collect();
                json!({ "heading": section.heading, "entries": entries })
            })
            .collect();
        return Ok(serde_json::to_vec_pretty(&json!({
            "title": manifest.title,
            "sections": sections,
        }))?);
    }

    // CSV layout: heading, key, value rows.
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["section", "key", "value"])
        .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
    for section in &manifest.sections {
        for key in &section.keys {
            let value = data
                .get(key)
                .map(Value::to_string)
                .unwrap_or_default();
            writer
                .write_record([section.heading.as_str(), key.as_str(), value.as_str()])
                .map_err(|e| Error::invariant(format!("csv render: {e}")))?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| Error::invariant(format!("csv render: {e}")))
}

fn normalize_format(format: &str) -> String {
    let format = format.to_lowercase();
    match format.as_str() {
        "excel" | "xlsx" => "csv".to_string(),
        other => other.to_string(),
    }
}

fn slug(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "export".to_string()
    } else {
        trimmed.chars().take(40).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalBlobStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedSampler(String);

    #[async_trait]
    impl Sampler for FixedSampler {
        async fn sample(&self, _input: &TaskInput) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn manifest_json(format: &str) -> String {
        json!({
            "format": format,
            "title": "Research Report",
            "sections": [{"heading": "Findings", "keys": ["research"]}]
        })
        .to_string()
    }

    fn exporter(blobs: Arc<dyn BlobStore>, manifest: &str) -> Exporter {
        Exporter::new(
            Arc::new(FixedSampler(manifest.to_string())),
            blobs,
            MakerConfig::with_k(2),
            "test-model",
            CancelToken::new(),
        )
    }

    #[tokio::test]
    async fn test_json_export_of_structured_data() {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let exporter = exporter(Arc::clone(&blobs), &manifest_json("json"));

        let data = json!({"research": {"synthesis": "all good"}});
        let outcome = exporter
            .export(&["json".to_string()], &data, None)
            .await
            .unwrap();

        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].format, "json");
        let bytes = blobs.get(&outcome.files[0].key).await.unwrap();
        let rendered: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rendered["title"], "Research Report");
        assert_eq!(rendered["sections"][0]["entries"]["research"]["synthesis"], "all good");
    }

    #[tokio::test]
    async fn test_excel_normalizes_to_csv() {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let exporter = exporter(Arc::clone(&blobs), &manifest_json("csv"));

        let data = json!({"research": "summary"});
        let outcome = exporter
            .export(&["excel".to_string()], &data, None)
            .await
            .unwrap();

        assert_eq!(outcome.files[0].format, "csv");
        let bytes = blobs.get(&outcome.files[0].key).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("section,key,value"));
        assert!(text.contains("Findings"));
    }

    #[tokio::test]
    async fn test_tabular_export_from_data_path() {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        blobs.put("out.csv", b"a,b\n1,2\n").await.unwrap();
        let exporter = exporter(Arc::clone(&blobs), &manifest_json("json"));

        let outcome = exporter
            .export(&["json".to_string()], &json!({}), Some("out.csv"))
            .await
            .unwrap();

        let bytes = blobs.get(&outcome.files[0].key).await.unwrap();
        let rows: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(rows[0]["a"], "1");
    }

    #[tokio::test]
    async fn test_all_formats_unsupported_is_error() {
        let dir = TempDir::new().unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let exporter = exporter(blobs, &manifest_json("csv"));

        let err = exporter
            .export(&["pdf".to_string()], &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermanentIo { .. }));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Research Report!"), "research-report");
        assert_eq!(slug("///"), "export");
    }
}
