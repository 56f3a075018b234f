// tests/config.rs
use std::{env, fs};

use news_aggregator::config::AppConfig;

const OVERRIDES: &[&str] = &[
    "NEWS_CONFIG_PATH",
    "NEWSAPI_KEY",
    "GUARDIAN_API_KEY",
    "NYT_API_KEY",
    "NEWS_TIMEOUT",
    "NEWS_RETRY_ATTEMPTS",
    "NEWS_RETRY_SLEEP_MS",
    "NEWS_RETRY_MAX_SLEEP_MS",
    "NEWS_BATCH_SIZE",
    "NEWS_FAILURE_THRESHOLD",
    "NEWS_FETCH_INTERVAL_SECS",
    "NEWS_USE_PG_TRGM",
    "MESSAGING_DRIVER",
    "MESSAGING_DLQ_PREFIX",
    "MESSAGING_IDEMPOTENCY_TTL",
    "NEWS_BIND_ADDR",
];

fn clear_env() {
    for k in OVERRIDES {
        env::remove_var(k);
    }
}

#[test]
fn partial_toml_keeps_defaults_for_missing_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.toml");
    fs::write(
        &path,
        r#"
[newsapi]
key = "from-file"
base_url = "http://localhost:9000/v2"

[pipeline]
failure_threshold = 5

[dedup]
use_trigram = true
"#,
    )
    .unwrap();

    let cfg = AppConfig::load_from(&path).unwrap();
    assert_eq!(cfg.newsapi.api_key(), Some("from-file"));
    assert_eq!(cfg.newsapi.base_url.as_deref(), Some("http://localhost:9000/v2"));
    assert_eq!(cfg.newsapi.retry_attempts, 3);
    assert_eq!(cfg.pipeline.failure_threshold, 5);
    assert_eq!(cfg.pipeline.batch_size, 50);
    assert!(cfg.dedup.use_trigram);
    assert_eq!(cfg.dedup.trigram_threshold, 0.4);
    assert_eq!(cfg.guardian.api_key(), None);
    assert_eq!(cfg.messaging.idempotency_ttl_secs, 86_400);
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.toml");
    fs::write(&path, "[pipeline]\nfailure_threshold = \"three\"\n").unwrap();
    let err = AppConfig::load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("news.toml"));
}

#[serial_test::serial]
#[test]
fn default_uses_env_path_then_fallback_file() {
    // isolate CWD so the repo's own config/ is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // nothing on disk: built-in defaults
    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.pipeline.failure_threshold, 3);

    // ./config/news.toml
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("news.toml"), "[pipeline]\nbatch_size = 20\n").unwrap();
    assert_eq!(AppConfig::load_default().unwrap().pipeline.batch_size, 20);

    // NEWS_CONFIG_PATH wins over the fallback
    let custom = tmp.path().join("custom.toml");
    fs::write(&custom, "[pipeline]\nbatch_size = 7\n").unwrap();
    env::set_var("NEWS_CONFIG_PATH", &custom);
    assert_eq!(AppConfig::load_default().unwrap().pipeline.batch_size, 7);

    // and a dangling path is an error rather than a silent fallback
    env::set_var("NEWS_CONFIG_PATH", tmp.path().join("missing.toml"));
    assert!(AppConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn env_overrides_win_over_file_values() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    let path = tmp.path().join("news.toml");
    fs::write(
        &path,
        "[guardian]\nkey = \"file-key\"\n[server]\nbind_addr = \"127.0.0.1:1\"\n",
    )
    .unwrap();
    env::set_var("NEWS_CONFIG_PATH", &path);
    env::set_var("GUARDIAN_API_KEY", "env-key");
    env::set_var("NEWS_TIMEOUT", "3");
    env::set_var("MESSAGING_DLQ_PREFIX", "dead.");

    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.guardian.api_key(), Some("env-key"));
    assert_eq!(cfg.server.bind_addr, "127.0.0.1:1");
    assert_eq!(cfg.nyt.timeout_secs, 3);
    assert_eq!(cfg.messaging.dlq_prefix, "dead.");

    env::set_var("NEWS_BATCH_SIZE", "lots");
    assert!(AppConfig::load_default().is_err());

    clear_env();
    env::set_current_dir(old).unwrap();
}
