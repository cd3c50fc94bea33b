use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Expands, parses and validates a YAML config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded = unexpanded_env_vars(yaml_string);
    if unexpanded.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with a literal value",
            unexpanded[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables\n\
             2. Replace the variables in the config file with literal values",
            unexpanded.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

fn expand_paths(config: &mut Config) {
    for task in &mut config.tasks {
        expand_source_paths(&mut task.source);
        for sink in &mut task.sinks {
            match sink {
                SinkConfig::File(c) => {
                    c.path = expand_tilde(Path::new(&c.path)).to_string_lossy().into_owned();
                }
                SinkConfig::Duckdb(c) => c.path = expand_tilde(&c.path),
                SinkConfig::ObjectStore(_) => {}
            }
        }
    }
}

fn expand_source_paths(source: &mut SourceConfig) {
    match source {
        SourceConfig::File(c) => c.path = expand_tilde(&c.path),
        SourceConfig::Query(c) => c.database = expand_tilde(&c.database),
        SourceConfig::Multi(c) => c.sources.iter_mut().for_each(expand_source_paths),
        SourceConfig::Docker(_) => {}
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.llm.base_url.trim().is_empty() {
        errors.push("llm.base_url cannot be empty".to_string());
    }
    if config.llm.model.trim().is_empty() {
        errors.push("llm.model cannot be empty".to_string());
    }

    if config.tasks.is_empty() {
        errors.push("config must define at least one task".to_string());
    }

    let mut task_names = HashSet::new();
    for (i, task) in config.tasks.iter().enumerate() {
        if task.name.trim().is_empty() {
            errors.push(format!("tasks[{}]: task name cannot be empty", i));
        } else if !task_names.insert(task.name.as_str()) {
            errors.push(format!("tasks[{}]: duplicate task name '{}'", i, task.name));
        }
        validate_task(task, &mut errors);
    }

    validate_monitoring(&config.monitoring, &task_names, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_task(task: &TaskConfig, errors: &mut Vec<String>) {
    let prefix = format!("task '{}'", task.name);

    if let Err(e) = task.window.validate() {
        errors.push(format!("{}: window: {}", prefix, e));
    }
    if task.deadline.is_zero() {
        errors.push(format!("{}: deadline must be greater than zero", prefix));
    }

    validate_source(&format!("{}, source", prefix), &task.source, errors);
    validate_analyzer(&prefix, &task.analyzer, errors);

    for (i, sink) in task.sinks.iter().enumerate() {
        let context = format!("{}, sinks[{}]", prefix, i);
        match sink {
            SinkConfig::File(c) if c.path.trim().is_empty() => {
                errors.push(format!("{}: path cannot be empty", context));
            }
            SinkConfig::ObjectStore(c) => {
                if c.endpoint.trim().is_empty() {
                    errors.push(format!("{}: endpoint cannot be empty", context));
                }
                if c.bucket.trim().is_empty() {
                    errors.push(format!("{}: bucket cannot be empty", context));
                }
            }
            _ => {}
        }
    }
}

fn validate_source(context: &str, source: &SourceConfig, errors: &mut Vec<String>) {
    match source {
        SourceConfig::Docker(c) => {
            if c.container.trim().is_empty() {
                errors.push(format!("{}: container cannot be empty", context));
            }
            if c.tail == 0 {
                errors.push(format!("{}: tail must be greater than zero", context));
            }
        }
        SourceConfig::File(c) => {
            if let Some(ts) = &c.timestamp {
                validate_timestamp_pattern(context, &ts.pattern, errors);
            }
        }
        SourceConfig::Query(c) => {
            if c.query.trim().is_empty() {
                errors.push(format!("{}: query cannot be empty", context));
            }
        }
        SourceConfig::Multi(c) => {
            if c.sources.is_empty() {
                errors.push(format!("{}: multi source needs at least one child", context));
            }
            if c.child_timeout.is_zero() {
                errors.push(format!("{}: child_timeout must be greater than zero", context));
            }

            let mut labels = HashSet::new();
            for (i, child) in c.sources.iter().enumerate() {
                let label = child.label();
                if !labels.insert(label.clone()) {
                    errors.push(format!(
                        "{}: duplicate child label '{}' (set 'label' to disambiguate)",
                        context, label
                    ));
                }
                validate_source(&format!("{}, sources[{}]", context, i), child, errors);
            }

            for edge in &c.call_chain {
                for end in [&edge.from, &edge.to] {
                    if !labels.contains(end.as_str()) {
                        errors.push(format!(
                            "{}: call_chain references unknown source '{}'",
                            context, end
                        ));
                    }
                }
            }
        }
    }
}

fn validate_timestamp_pattern(context: &str, pattern: &str, errors: &mut Vec<String>) {
    match Regex::new(pattern) {
        Ok(re) => {
            if re.capture_names().all(|name| name != Some("ts")) {
                errors.push(format!(
                    "{}: timestamp pattern must contain named capture group 'ts': {}",
                    context, pattern
                ));
            }
        }
        Err(e) => {
            errors.push(format!(
                "{}: invalid timestamp pattern regex: {} (error: {})",
                context, pattern, e
            ));
        }
    }
}

fn validate_analyzer(prefix: &str, analyzer: &AnalyzerConfig, errors: &mut Vec<String>) {
    let positive = [
        ("concurrency", analyzer.concurrency),
        ("max_chunk_chars", analyzer.max_chunk_chars),
        ("max_chunk_records", analyzer.max_chunk_records),
        ("max_attempts", analyzer.max_attempts as usize),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(format!("{}: analyzer.{} must be greater than zero", prefix, field));
        }
    }

    if analyzer.call_timeout.is_zero() {
        errors.push(format!("{}: analyzer.call_timeout must be greater than zero", prefix));
    }
    if analyzer.summary_timeout.is_zero() {
        errors.push(format!("{}: analyzer.summary_timeout must be greater than zero", prefix));
    }
    if analyzer.initial_backoff > analyzer.max_backoff {
        errors.push(format!(
            "{}: analyzer.initial_backoff cannot exceed analyzer.max_backoff",
            prefix
        ));
    }

    if let Some(template) = &analyzer.prompts.analyze {
        if !template.contains("{log_chunk}") {
            errors.push(format!(
                "{}: analyzer.prompts.analyze must contain the {{log_chunk}} placeholder",
                prefix
            ));
        }
    }
    if let Some(template) = &analyzer.prompts.summarize {
        if !template.contains("{findings}") {
            errors.push(format!(
                "{}: analyzer.prompts.summarize must contain the {{findings}} placeholder",
                prefix
            ));
        }
    }
}

fn validate_monitoring(
    monitoring: &MonitoringConfig,
    task_names: &HashSet<&str>,
    errors: &mut Vec<String>,
) {
    if monitoring.fire_hour > 23 {
        errors.push(format!(
            "monitoring.fire_hour must be between 0 and 23, got {}",
            monitoring.fire_hour
        ));
    }
    if let Err(e) = monitoring.lookback.validate() {
        errors.push(format!("monitoring.lookback: {}", e));
    }
    if monitoring.enabled && monitoring.tasks.is_empty() {
        errors.push("monitoring is enabled but lists no tasks".to_string());
    }

    for scheduled in &monitoring.tasks {
        if !task_names.contains(scheduled.name.as_str()) {
            errors.push(format!(
                "monitoring.tasks: references non-existent task '{}'",
                scheduled.name
            ));
        }
        if let Some(Err(e)) = scheduled.window.as_ref().map(|w| w.validate()) {
            errors.push(format!("monitoring.tasks '{}': window: {}", scheduled.name, e));
        }
    }
}
