//! Loading engine configuration from disk and building an engine from it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use assetscout::secrets::CredentialSource;
use assetscout::{load_config, ConfigError, Engine, JobStatus};

use common::{companies, ConfigBuilder, ScriptedTask};

const KEY_VAR: &str = "ASSETSCOUT_CONFIG_TEST_KEY";

fn write_config(dir: &TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("assetscout.json");
    std::fs::write(&path, json).unwrap();
    path
}

#[test]
fn test_builder_output_loads() {
    let dir = TempDir::new().unwrap();
    let json = ConfigBuilder::new()
        .database_path("/tmp/assetscout-test.db")
        .max_attempts(5)
        .provider("openai", &["sk-1", "sk-2"])
        .provider("perplexity", &["pplx-1"])
        .build_json();
    let config = load_config(write_config(&dir, &json)).unwrap();

    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_step(), Duration::from_millis(1));
    assert_eq!(config.scheduler.rescan_delay(), Duration::from_millis(5));
    assert_eq!(config.providers.len(), 2);

    let credentials = config.credentials();
    assert_eq!(credentials.parallel_credentials("openai").len(), 2);
    assert_eq!(credentials.parallel_credentials("perplexity").len(), 1);
    assert!(credentials.parallel_credentials("anthropic").is_empty());
}

#[test]
fn test_duplicate_providers_rejected() {
    let dir = TempDir::new().unwrap();
    let json = ConfigBuilder::new()
        .provider("openai", &["sk-1"])
        .provider("openai", &["sk-2"])
        .build_json();

    let err = load_config(write_config(&dir, &json)).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidProvider { id, .. } if id == "openai"));
}

#[tokio::test]
#[serial]
async fn test_engine_from_config_runs_with_env_credentials() {
    std::env::set_var(KEY_VAR, "sk-from-env");

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state").join("assetscout.db");
    let json = ConfigBuilder::new()
        .database_path(db_path.to_str().unwrap())
        .provider_from_env("openai", KEY_VAR)
        .build_json();
    let config = load_config(write_config(&dir, &json)).unwrap();

    let task = Arc::new(ScriptedTask::new());
    let engine = Engine::from_config(&config, task.clone()).unwrap();
    let mut rx = engine.subscribe();
    engine.start().await.unwrap();

    let id = engine
        .submit(companies(&["A", "B"]), "openai", None)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id == id && event.is_done() => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .unwrap();
    engine.shutdown().await.unwrap();

    let job = engine.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert!(db_path.exists());
    assert!(task
        .credentials_seen()
        .iter()
        .all(|key| key.as_deref() == Some("sk-from-env")));

    std::env::remove_var(KEY_VAR);
}

#[tokio::test]
#[serial]
async fn test_unset_env_credential_runs_without_key() {
    std::env::remove_var(KEY_VAR);

    let dir = TempDir::new().unwrap();
    let json = ConfigBuilder::new()
        .database_path(dir.path().join("assetscout.db").to_str().unwrap())
        .provider_from_env("openai", KEY_VAR)
        .build_json();
    let config = load_config(write_config(&dir, &json)).unwrap();

    assert!(config.credentials().parallel_credentials("openai").is_empty());
    let engine = Engine::from_config(&config, Arc::new(ScriptedTask::new())).unwrap();
    assert!(!engine.is_started());
}
