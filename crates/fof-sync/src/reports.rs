//! Per-run report files: JSON summary, near-duplicate review list, Parquet
//! snapshot of synced records and a SHA-256 manifest over all of them.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use fof_core::{Opportunity, Status};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::dedup::NearDuplicate;
use crate::SyncRunSummary;

pub const SUMMARY_FILE: &str = "sync_summary.json";
pub const NEAR_DUPLICATES_FILE: &str = "near_duplicates.json";
pub const SNAPSHOT_FILE: &str = "opportunities.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn run_dir(reports_root: &Path, run_id: Uuid) -> PathBuf {
    reports_root.join(run_id.to_string())
}

/// Write every report for one run into `reports_dir`; returns the manifest path.
pub async fn write_run_reports(
    reports_dir: &Path,
    summary: &SyncRunSummary,
    records: &[Opportunity],
    near_duplicates: &[NearDuplicate],
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let summary_path = reports_dir.join(SUMMARY_FILE);
    let bytes = serde_json::to_vec_pretty(summary).context("serializing sync summary")?;
    fs::write(&summary_path, bytes)
        .await
        .with_context(|| format!("writing {}", summary_path.display()))?;

    let near_path = reports_dir.join(NEAR_DUPLICATES_FILE);
    let bytes = serde_json::to_vec_pretty(near_duplicates).context("serializing near duplicates")?;
    fs::write(&near_path, bytes)
        .await
        .with_context(|| format!("writing {}", near_path.display()))?;

    let snapshot_path = reports_dir.join(SNAPSHOT_FILE);
    write_opportunities_parquet(&snapshot_path, records)?;

    let manifest = ReportManifest {
        schema_version: 1,
        run_id: summary.run_id,
        files: vec![
            manifest_entry("sync_summary", reports_dir, &summary_path)?,
            manifest_entry("near_duplicates", reports_dir, &near_path)?,
            manifest_entry("opportunities", reports_dir, &snapshot_path)?,
        ],
    };
    let manifest_path = reports_dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn joined(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    values
        .into_iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn write_opportunities_parquet(path: &Path, records: &[Opportunity]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("provider", DataType::Utf8, false),
        ArrowField::new("type", DataType::Utf8, false),
        ArrowField::new("amount", DataType::Utf8, true),
        ArrowField::new("application_deadline", DataType::Utf8, true),
        ArrowField::new("application_link", DataType::Utf8, true),
        ArrowField::new("counties", DataType::Utf8, false),
        ArrowField::new("constituencies", DataType::Utf8, false),
        ArrowField::new("active", DataType::Boolean, false),
        ArrowField::new("verified", DataType::Boolean, false),
        ArrowField::new("priority", DataType::Int32, false),
    ]));

    let names = StringArray::from(records.iter().map(|r| Some(r.name.as_str())).collect::<Vec<_>>());
    let providers =
        StringArray::from(records.iter().map(|r| Some(r.provider.as_str())).collect::<Vec<_>>());
    let kinds = StringArray::from(records.iter().map(|r| Some(r.kind.as_str())).collect::<Vec<_>>());
    let amounts = StringArray::from(records.iter().map(|r| r.amount.as_deref()).collect::<Vec<_>>());
    let deadlines = StringArray::from(
        records
            .iter()
            .map(|r| r.application_deadline.map(|d| d.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let links = StringArray::from(
        records
            .iter()
            .map(|r| r.application_link.as_deref())
            .collect::<Vec<_>>(),
    );
    let counties = StringArray::from(
        records
            .iter()
            .map(|r| Some(joined(&r.eligibility.counties)))
            .collect::<Vec<_>>(),
    );
    let constituencies = StringArray::from(
        records
            .iter()
            .map(|r| Some(joined(&r.eligibility.constituencies)))
            .collect::<Vec<_>>(),
    );
    let active = BooleanArray::from(
        records
            .iter()
            .map(|r| r.status == Status::Active)
            .collect::<Vec<_>>(),
    );
    let verified = BooleanArray::from(records.iter().map(|r| r.verified).collect::<Vec<_>>());
    let priorities = Int32Array::from(records.iter().map(|r| r.priority).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(names),
            Arc::new(providers),
            Arc::new(kinds),
            Arc::new(amounts),
            Arc::new(deadlines),
            Arc::new(links),
            Arc::new(counties),
            Arc::new(constituencies),
            Arc::new(active),
            Arc::new(verified),
            Arc::new(priorities),
        ],
    )
    .context("building opportunities record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}
