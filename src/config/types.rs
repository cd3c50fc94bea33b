use crate::source::CallEdge;
use crate::window::WindowSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8001".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_llm_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_llm_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_task_window")]
    pub window: WindowSpec,
    #[serde(default = "default_deadline", with = "humantime_serde")]
    pub deadline: Duration,
    pub source: SourceConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub sink_timeout: Duration,
}

fn default_task_window() -> WindowSpec {
    WindowSpec::hours(24)
}

fn default_deadline() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Docker(DockerSourceConfig),
    File(FileSourceConfig),
    Query(QuerySourceConfig),
    Multi(MultiSourceConfig),
}

impl SourceConfig {
    /// Label records from this source carry.
    pub fn label(&self) -> String {
        match self {
            SourceConfig::Docker(c) => c.label.clone().unwrap_or_else(|| c.container.clone()),
            SourceConfig::File(c) => c.label.clone().unwrap_or_else(|| {
                c.path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "file".to_string())
            }),
            SourceConfig::Query(c) => c.label.clone().unwrap_or_else(|| "query".to_string()),
            SourceConfig::Multi(c) => c.label.clone().unwrap_or_else(|| "multi".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSourceConfig {
    pub container: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_tail")]
    pub tail: usize,
    #[serde(default)]
    pub max_lines: Option<usize>,
    #[serde(default)]
    pub max_bytes: Option<usize>,
    #[serde(default = "default_true")]
    pub prefilter: bool,
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
}

fn default_tail() -> usize {
    3000
}

fn default_true() -> bool {
    true
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TimestampConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampConfig {
    pub pattern: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySourceConfig {
    pub database: PathBuf,
    pub query: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSourceConfig {
    #[serde(default)]
    pub label: Option<String>,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub call_chain: Vec<CallEdge>,
    #[serde(default = "default_child_timeout", with = "humantime_serde")]
    pub child_timeout: Duration,
}

fn default_child_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Sequential,
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub mode: AnalysisMode,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_max_chunk_records")]
    pub max_chunk_records: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
    #[serde(default = "default_summary_timeout", with = "humantime_serde")]
    pub summary_timeout: Duration,
    #[serde(default = "default_correlation_slack", with = "humantime_serde")]
    pub correlation_slack: Duration,
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::default(),
            concurrency: default_concurrency(),
            max_chunk_chars: default_max_chunk_chars(),
            max_chunk_records: default_max_chunk_records(),
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            call_timeout: default_call_timeout(),
            summary_timeout: default_summary_timeout(),
            correlation_slack: default_correlation_slack(),
            prompts: PromptConfig::default(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}

fn default_max_chunk_chars() -> usize {
    5000
}

fn default_max_chunk_records() -> usize {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_summary_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_correlation_slack() -> Duration {
    Duration::from_secs(5 * 60)
}

/// Prompt template overrides. `analyze` may use `{log_chunk}`,
/// `{source_label}` and `{current_time}`; `summarize` may use `{findings}`,
/// `{call_chain}` and `{candidates}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default)]
    pub analyze: Option<String>,
    #[serde(default)]
    pub summarize: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    #[default]
    Markdown,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    File(FileSinkConfig),
    Duckdb(DuckDbSinkConfig),
    ObjectStore(ObjectStoreSinkConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSinkConfig {
    /// Path template; `{task}`, `{run_id}`, `{timestamp}` and `{host}` are
    /// substituted.
    pub path: String,
    #[serde(default)]
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckDbSinkConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSinkConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_object_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub format: ReportFormat,
}

fn default_object_prefix() -> String {
    "reports/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_fire_hour")]
    pub fire_hour: u32,
    #[serde(default = "default_task_window")]
    pub lookback: WindowSpec,
    #[serde(default)]
    pub tasks: Vec<ScheduledTaskConfig>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fire_hour: default_fire_hour(),
            lookback: default_task_window(),
            tasks: Vec::new(),
        }
    }
}

fn default_fire_hour() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskConfig {
    pub name: String,
    #[serde(default)]
    pub window: Option<WindowSpec>,
}
