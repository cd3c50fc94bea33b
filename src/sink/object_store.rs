use super::{Sink, SinkError};
use crate::config::types::{ObjectStoreSinkConfig, ReportFormat};
use crate::report::{sha256_hex, Report};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// Uploads reports with a plain HTTP `PUT` to an S3-style bucket path.
/// The object key depends only on the task and run id.
pub struct ObjectStoreSink {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
    token: Option<String>,
    format: ReportFormat,
}

impl ObjectStoreSink {
    pub fn new(config: &ObjectStoreSinkConfig) -> Result<Self, SinkError> {
        let name = format!("object_store:{}/{}", config.endpoint, config.bucket);
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SinkError::new(&name, format!("failed to build http client: {}", e)))?;

        Ok(Self {
            name,
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.trim_matches('/').to_string(),
            prefix: config.prefix.clone(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            format: config.format,
        })
    }

    pub fn object_url(&self, report: &Report) -> String {
        format!(
            "{}/{}/{}{}_{}.{}",
            self.endpoint,
            self.bucket,
            self.prefix,
            report.task_name,
            report.run_id,
            self.format.extension()
        )
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, report: &Report) -> Result<(), SinkError> {
        let (body, content_type) = match self.format {
            ReportFormat::Json => (
                report.to_json_bytes().map_err(|e| SinkError::new(&self.name, e))?,
                "application/json",
            ),
            ReportFormat::Markdown => (report.render_markdown().into_bytes(), "text/markdown"),
        };

        let url = self.object_url(report);
        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static(content_type))
            .header("x-amz-content-sha256", sha256_hex(&body));
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::new(&self.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SinkError::new(
                &self.name,
                format!("PUT {} returned {}: {}", url, status, detail.trim()),
            ));
        }

        tracing::debug!(url = %url, "report uploaded");
        Ok(())
    }
}
