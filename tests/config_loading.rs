use sqlpilot_core::config::AppConfig;
use sqlpilot_core::error::SqlPilotError;
use sqlpilot_test_utils::write_config;

fn load(toml_content: &str) -> Result<AppConfig, SqlPilotError> {
    let (_dir, path) = write_config(toml_content);
    AppConfig::load(&path)
}

#[test]
fn test_load_full_config_from_file() {
    let config = load(
        r#"
[model]
provider = "anthropic"
model_id = "claude-sonnet-4-20250514"
api_key = "sk-test-key"
max_tokens = 4096
temperature = 0.5

[model.retry]
max_retries = 5

[[fallback_models]]
provider = "openai"
model_id = "gpt-4o-mini"

[workflow]
retry_ceiling = 2
max_steps = 20
row_cap = 10
schema_file = "schema.txt"

[database]
path = "/data/shop.db"
read_only = false

[replies]
greeting = "Hi! Ask me about orders."

[log]
enabled = true
log_dir = "/tmp/sqlpilot-logs"
level = 3
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.model.model_id, "claude-sonnet-4-20250514");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);
    assert_eq!(config.model.retry.as_ref().unwrap().max_retries, 5);
    assert_eq!(config.model.retry.as_ref().unwrap().initial_backoff_ms, 1000);
    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].provider, "openai");

    assert_eq!(config.workflow.retry_ceiling, 2);
    assert_eq!(config.workflow.max_steps, 20);
    assert_eq!(config.workflow.row_cap, 10);
    assert_eq!(config.workflow.schema_file.as_deref(), Some("schema.txt"));

    assert_eq!(config.database_path().to_str(), Some("/data/shop.db"));
    assert!(!config.database.read_only);

    assert_eq!(config.replies.greeting, "Hi! Ask me about orders.");
    assert!(!config.replies.out_of_scope.is_empty());

    assert_eq!(config.log_dir().to_str(), Some("/tmp/sqlpilot-logs"));
    assert_eq!(config.log.unwrap().level, 3);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SQLPILOT_TEST_API_KEY", "expanded-key-value");

    let config = load(
        r#"
[model]
model_id = "test-model"
api_key = "${SQLPILOT_TEST_API_KEY}"
"#,
    )
    .expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("SQLPILOT_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let config = load(
        r#"
[model]
model_id = "llama3.2"
"#,
    )
    .expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert!(config.fallback_models.is_empty());
    assert_eq!(config.workflow.retry_ceiling, 3);
    assert_eq!(config.workflow.max_steps, 50);
    assert_eq!(config.workflow.row_cap, 100);
    assert!(config.workflow.schema_file.is_none());
    assert_eq!(config.database.path, "ecommerce.db");
    assert!(config.database.read_only);
    assert!(config.replies.greeting.starts_with("Hello"));
    assert!(config.log.is_none());
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SqlPilotError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_limits_are_rejected() {
    let err = load(
        r#"
[model]
model_id = "m"

[workflow]
max_steps = 0
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SqlPilotError::Config(_)));

    let err = load("[model]\nprovider = 42\n").unwrap_err();
    assert!(matches!(err, SqlPilotError::Config(_)));
}

#[test]
fn test_retry_ceiling_beyond_step_ceiling_is_rejected() {
    let err = load(
        r#"
[model]
model_id = "m"

[workflow]
retry_ceiling = 30
"#,
    )
    .unwrap_err();
    match err {
        SqlPilotError::Config(msg) => {
            assert!(msg.contains("max_steps"));
            assert!(msg.contains("66"));
        }
        other => panic!("expected Config error, got {other:?}"),
    }

    let config = load(
        r#"
[model]
model_id = "m"

[workflow]
retry_ceiling = 30
max_steps = 66
"#,
    )
    .expect("load config");
    assert_eq!(config.workflow.min_steps(), 66);
}
