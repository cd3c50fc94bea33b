use super::{Sink, SinkError};
use crate::config::types::ReportFormat;
use crate::report::Report;
use async_trait::async_trait;
use std::path::PathBuf;

/// Writes each report to a path built from a template.
pub struct FileSink {
    name: String,
    template: String,
    format: ReportFormat,
}

impl FileSink {
    pub fn new(template: String, format: ReportFormat) -> Self {
        Self {
            name: format!("file:{}", template),
            template,
            format,
        }
    }

    /// Everything substituted comes from the report, so a retry of the same
    /// run lands on the same file.
    pub fn path_for(&self, report: &Report) -> PathBuf {
        PathBuf::from(
            self.template
                .replace("{task}", &sanitize(&report.task_name))
                .replace("{run_id}", &report.run_id.to_string())
                .replace("{timestamp}", &report.generated_at.format("%Y%m%d_%H%M%S").to_string())
                .replace("{host}", &sanitize(&report.host)),
        )
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>, SinkError> {
        match self.format {
            ReportFormat::Json => report.to_json_bytes().map_err(|e| SinkError::new(&self.name, e)),
            ReportFormat::Markdown => Ok(report.render_markdown().into_bytes()),
        }
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, report: &Report) -> Result<(), SinkError> {
        let path = self.path_for(report);
        let bytes = self.render(report)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::new(&self.name, format!("create {}: {}", parent.display(), e)))?;
        }

        // Write-then-rename so readers never see a partial report.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SinkError::new(&self.name, format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SinkError::new(&self.name, format!("rename to {}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "report written");
        Ok(())
    }
}
