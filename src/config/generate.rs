pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSIFT CONFIGURATION
# =============================================================================
# Each task collects logs from one source over a time window, has an LLM
# classify and deduplicate what it finds, and saves the report to its sinks.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logsift/config.yml
#   3. /etc/logsift/config.yml
#
# Any value may reference an environment variable as $env{NAME}.

# =============================================================================
# HTTP SERVER
# =============================================================================

server:
  listen: 127.0.0.1:8001

# =============================================================================
# LLM BACKEND
# =============================================================================
# Any OpenAI-compatible chat completions endpoint.

llm:
  base_url: http://localhost:8000/v1
  model: qwen2.5-7b-instruct
  # api_key: $env{LOGSIFT_API_KEY}
  timeout: 60s
  temperature: 0.3

# =============================================================================
# TASKS
# =============================================================================

tasks:
  - name: api-server
    description: Errors in the API container
    # Default window when a trigger does not give one.
    # Precedence: since > minutes_ago > hours_ago.
    window:
      hours_ago: 24
    deadline: 30m
    source:
      type: docker
      container: api-server
      tail: 3000
      # Keep only lines mentioning error/exception/fatal/... (all lines are
      # kept when none match)
      prefilter: true
      max_lines: 2000
    analyzer:
      # sequential or concurrent
      mode: concurrent
      concurrency: 3
      max_chunk_chars: 5000
      max_chunk_records: 500
      max_attempts: 3
      initial_backoff: 1s
      max_backoff: 30s
      call_timeout: 60s
    sinks:
      - type: file
        # Placeholders: {task} {run_id} {timestamp} {host}
        path: ~/logsift/reports/{task}_{timestamp}_{run_id}.md
        format: markdown

  - name: checkout-flow
    window:
      hours_ago: 6
    source:
      type: multi
      child_timeout: 5m
      sources:
        - type: docker
          container: gateway
        - type: docker
          container: orders
        - type: file
          label: payments
          path: /var/log/payments/app.log
          timestamp:
            # Regex must contain a named capture group 'ts'
            pattern: '^(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z)'
            # Format: strptime format string, 'iso8601', 'epoch', or 'epoch_ms'
            format: iso8601
      # Declared request flow; used to correlate findings across services
      call_chain:
        - from: gateway
          to: orders
          protocol: http
        - from: orders
          to: payments
          protocol: grpc
    analyzer:
      correlation_slack: 5m
    sinks:
      - type: file
        path: ~/logsift/reports/{task}_{run_id}.json
        format: json
      - type: duckdb
        path: ~/logsift/reports.duckdb

# =============================================================================
# DAILY MONITORING
# =============================================================================

monitoring:
  enabled: false
  # Local hour (0-23) at which scheduled tasks fire
  fire_hour: 2
  # Window used when a scheduled task does not give its own
  lookback:
    hours_ago: 24
  tasks:
    - name: api-server
    - name: checkout-flow
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, SourceConfig};

    #[test]
    fn test_starter_config_is_valid() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.monitoring.tasks.len(), 2);

        match &config.tasks[1].source {
            SourceConfig::Multi(multi) => {
                assert_eq!(multi.sources.len(), 3);
                assert_eq!(multi.call_chain.len(), 2);
            }
            other => panic!("expected multi source, got {:?}", other),
        }
    }
}
