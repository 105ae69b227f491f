//! Operator-facing run reports written after a full pipeline pass.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::PipelineRunResult;

pub async fn write_run_report(reports_root: &Path, result: &PipelineRunResult) -> Result<PathBuf> {
    let report_dir = reports_root.join(result.pass_id.to_string());
    fs::create_dir_all(&report_dir)
        .await
        .with_context(|| format!("creating {}", report_dir.display()))?;

    let summary = serde_json::to_vec_pretty(result).context("serializing run summary")?;
    let summary_path = report_dir.join("summary.json");
    fs::write(&summary_path, &summary)
        .await
        .with_context(|| format!("writing {}", summary_path.display()))?;

    let brief = render_brief(result, &sha256_hex(&summary));
    let brief_path = report_dir.join("brief.md");
    fs::write(&brief_path, brief)
        .await
        .with_context(|| format!("writing {}", brief_path.display()))?;

    Ok(report_dir)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn render_brief(result: &PipelineRunResult, summary_sha256: &str) -> String {
    let mut lines = vec![
        "# Agricultural Intelligence Run Brief".to_string(),
        String::new(),
        format!("- Pass ID: `{}`", result.pass_id),
        format!("- Started: {}", result.started_at),
        format!("- Finished: {}", result.finished_at),
        format!("- summary.json sha256: `{summary_sha256}`"),
        String::new(),
        "## Jobs".to_string(),
    ];
    for report in &result.jobs {
        lines.push(format!(
            "- {}: {} (run `{}`, {} records, {} errors)",
            report.kind().dataset(),
            report.status(),
            report.run_id(),
            report.records_processed(),
            report.errors().len()
        ));
    }

    let errors: Vec<(&str, &String)> = result
        .jobs
        .iter()
        .flat_map(|r| r.errors().iter().map(move |e| (r.kind().dataset(), e)))
        .collect();
    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        for (dataset, error) in errors {
            lines.push(format!("- [{dataset}] {error}"));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}
