/// Integration tests for configuration loading
use recap_engine::config::Config;
use sdk::errors::EngineError;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_load_minimal_config() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let path = write_config(
        &dir,
        &format!(
            r#"
[core]
data_dir = "{}"

[model]
model_name = "qwen3-32b"
base_url = "http://localhost:8000/v1"
"#,
            data_dir.display()
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.model.model_name, "qwen3-32b");
    assert_eq!(config.model.api_key_name, "openai_api_key");
    assert_eq!(config.model.tools, vec!["search", "visit"]);
    assert_eq!(config.research.max_cycles, 3);
    assert_eq!(config.research.max_turns, 30);
    assert!(config.research.continue_prompt.contains("{last_summary}"));
    assert!(config.research.summary_prompt.contains("{input}"));
    assert!(config.tools.server_url.is_none());

    // Data directory is created during validation
    assert!(data_dir.exists());
    assert_eq!(config.db_path(), data_dir.join("recap.db"));
}

#[test]
fn test_load_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        &format!(
            r#"
[core]
log_level = "debug"
data_dir = "{}"

[model]
model_name = "tongyi-deepresearch"
temperature = 0.6
top_p = 0.95
max_context_length = 100000
enable_qps_limit = true
tools = ["search"]

[model.extra_body]
repetition_penalty = 1.05

[research]
max_cycles = 5
max_turns = 12
continue_prompt = "Previous findings: {{last_summary}}"

[tools]
server_url = "http://localhost:9000"

[tools.summarizer]
model_name = "qwen3-8b"
"#,
            dir.path().display()
        ),
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.model.temperature, Some(0.6));
    assert_eq!(config.model.max_context_length, Some(100_000));
    assert!(config.model.enable_qps_limit);
    assert_eq!(config.model.tools, vec!["search"]);
    assert_eq!(config.model.extra_body["repetition_penalty"], 1.05);
    assert_eq!(config.research.max_cycles, 5);
    assert_eq!(
        config.research.continue_prompt,
        "Previous findings: {last_summary}"
    );
    assert_eq!(config.tools.server_url.as_deref(), Some("http://localhost:9000"));
    assert_eq!(config.tools.summarizer.model_name.as_deref(), Some("qwen3-8b"));
}

#[test]
fn test_missing_model_section() {
    let err = Config::from_toml_str("[core]\nlog_level = \"info\"\n").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_invalid_log_level() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        &format!(
            "[core]\nlog_level = \"loud\"\ndata_dir = \"{}\"\n\n[model]\nmodel_name = \"m\"\n",
            dir.path().display()
        ),
    );

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("Invalid log level"));
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_default_config_round_trip() {
    let config = Config::default_config();
    let serialized = toml::to_string_pretty(&config).unwrap();
    let parsed: Config = toml::from_str(&serialized).unwrap();

    assert_eq!(parsed.model.base_url, config.model.base_url);
    assert_eq!(parsed.research.system_prompt, config.research.system_prompt);
    assert_eq!(parsed.invoker.retry_attempts, config.invoker.retry_attempts);
    assert_eq!(parsed.tools.jina_url, config.tools.jina_url);
}
