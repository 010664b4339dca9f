use std::io::Write;

use prior_index::{BackendKind, ErrorKind, SyncPolicy};
use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 23] = [
    "PRIOR_EMBEDDING_PROVIDER",
    "PRIOR_EMBEDDING_MODEL",
    "PRIOR_EMBEDDING_BASE_URL",
    "PRIOR_EMBEDDING_DIMENSION",
    "PRIOR_EMBEDDING_MAX_INPUT_TOKENS",
    "PRIOR_EMBEDDING_BATCH_SIZE",
    "PRIOR_BACKEND",
    "PRIOR_TABLE_PATH",
    "PRIOR_QDRANT_URL",
    "PRIOR_QDRANT_COLLECTION",
    "PRIOR_PINECONE_HOST",
    "PRIOR_PINECONE_NAMESPACE",
    "PRIOR_SYNC_MAX_ISSUES",
    "PRIOR_SYNC_FORCE_REFRESH",
    "PRIOR_SYNC_POLICY",
    "PRIOR_SEARCH_LIMIT",
    "PRIOR_GITHUB_API_URL",
    "PRIOR_OPENAI_API_KEY",
    "PRIOR_PINECONE_API_KEY",
    "PRIOR_QDRANT_API_KEY",
    "PRIOR_GITHUB_TOKEN",
    "GITHUB_TOKEN",
    "PRIOR_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("prior.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert_eq!(config.embedding.dimension, 1536);
    assert_eq!(config.embedding.max_input_tokens, 8191);
    assert_eq!(config.embedding.batch_size, 64);
    assert_eq!(config.sync.max_issues, 1000);
    assert!(!config.sync.force_refresh);
    assert_eq!(config.sync.policy, SyncPolicy::StopAtFirstIndexed);
    assert_eq!(config.search.limit, 5);
    assert_eq!(config.backend.kind, BackendKind::Table);
    assert_eq!(config.backend.table.table, "issues");
    assert_eq!(config.backend.qdrant.url, "http://localhost:6334");
    assert_eq!(config.github.api_url, "https://api.github.com");
    assert!(config.secrets.openai_api_key.is_none());
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.sync.max_issues, 1000);
    assert_eq!(config.backend.kind, BackendKind::Table);
}

#[test]
#[serial]
fn parse_valid_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[embedding]
provider = "ollama"
model = "nomic-embed-text"
base_url = "http://ollama:11434"
dimension = 768
max_input_tokens = 2048

[sync]
max_issues = 250
policy = "probe_all"

[search]
limit = 8

[backend]
kind = "qdrant"

[backend.qdrant]
url = "http://qdrant:6334"
collection = "widgets"
"#,
    );

    let config = Config::load(&path).unwrap();
    assert_eq!(config.embedding.provider, EmbeddingProvider::Ollama);
    assert_eq!(config.embedding.model, "nomic-embed-text");
    assert_eq!(config.embedding.dimension, 768);
    assert_eq!(config.embedding.batch_size, 64);
    assert_eq!(config.sync.max_issues, 250);
    assert_eq!(config.sync.policy, SyncPolicy::ProbeAll);
    assert_eq!(config.search.limit, 8);
    assert_eq!(config.backend.kind, BackendKind::Qdrant);
    assert_eq!(config.backend.qdrant.collection, "widgets");
    assert_eq!(config.backend.table.path, "./data/lancedb");
}

#[test]
#[serial]
fn lancedb_is_accepted_as_backend_alias() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[backend]\nkind = \"lancedb\"\n");
    let config = Config::load(&path).unwrap();
    assert_eq!(config.backend.kind, BackendKind::Table);
}

#[test]
#[serial]
fn malformed_toml_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[sync\nmax_issues = ");
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
#[serial]
fn env_overrides_file_values() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[sync]\nmax_issues = 10\n");

    unsafe {
        std::env::set_var("PRIOR_SYNC_MAX_ISSUES", "42");
        std::env::set_var("PRIOR_SYNC_FORCE_REFRESH", "true");
        std::env::set_var("PRIOR_BACKEND", "pinecone");
        std::env::set_var("PRIOR_PINECONE_HOST", "https://idx.svc.pinecone.io");
        std::env::set_var("PRIOR_EMBEDDING_DIMENSION", "384");
        std::env::set_var("PRIOR_SEARCH_LIMIT", "3");
    }
    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.sync.max_issues, 42);
    assert!(config.sync.force_refresh);
    assert_eq!(config.backend.kind, BackendKind::Pinecone);
    assert_eq!(config.backend.pinecone.host, "https://idx.svc.pinecone.io");
    assert_eq!(config.embedding.dimension, 384);
    assert_eq!(config.search.limit, 3);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("PRIOR_SYNC_MAX_ISSUES", "lots");
        std::env::set_var("PRIOR_BACKEND", "cassandra");
        std::env::set_var("PRIOR_SYNC_POLICY", "sometimes");
    }
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    clear_env();

    assert_eq!(config.sync.max_issues, 1000);
    assert_eq!(config.backend.kind, BackendKind::Table);
    assert_eq!(config.sync.policy, SyncPolicy::StopAtFirstIndexed);
}

#[test]
#[serial]
fn secrets_come_from_env_and_are_redacted() {
    clear_env();
    unsafe {
        std::env::set_var("PRIOR_OPENAI_API_KEY", "sk-test");
        std::env::set_var("GITHUB_TOKEN", "ghp_fallback");
    }
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    clear_env();

    let key = config.secrets.openai_api_key.as_ref().unwrap();
    assert_eq!(key.expose(), "sk-test");
    assert_eq!(format!("{key:?}"), "[REDACTED]");
    assert!(!format!("{config:?}").contains("sk-test"));
    assert_eq!(
        config.secrets.github_token.as_ref().map(Secret::expose),
        Some("ghp_fallback")
    );
}

#[test]
#[serial]
fn prior_github_token_wins_over_fallback() {
    clear_env();
    unsafe {
        std::env::set_var("PRIOR_GITHUB_TOKEN", "ghp_primary");
        std::env::set_var("GITHUB_TOKEN", "ghp_fallback");
    }
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    clear_env();

    assert_eq!(
        config.secrets.github_token.as_ref().map(Secret::expose),
        Some("ghp_primary")
    );
}

#[test]
fn validate_requires_openai_key() {
    let config = Config::default();
    let err = config.validate().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("PRIOR_OPENAI_API_KEY"));
}

#[test]
fn validate_accepts_local_setup() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::Ollama;
    config.validate().unwrap();
}

#[test]
fn validate_rejects_zero_dimension() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::Ollama;
    config.embedding.dimension = 0;
    assert!(config.validate().unwrap_err().to_string().contains("dimension"));
}

#[test]
fn validate_pinecone_needs_host_and_key() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::Ollama;
    config.backend.kind = BackendKind::Pinecone;
    assert!(config.validate().unwrap_err().to_string().contains("host"));

    config.backend.pinecone.host = "https://idx.svc.pinecone.io".into();
    assert!(
        config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("PRIOR_PINECONE_API_KEY")
    );

    config.secrets.pinecone_api_key = Some(Secret::new("pk"));
    config.validate().unwrap();
}

#[test]
fn validate_bounds_github_page_size() {
    let mut config = Config::default();
    config.embedding.provider = EmbeddingProvider::Ollama;
    config.github.per_page = 101;
    assert!(config.validate().unwrap_err().to_string().contains("per_page"));
}

#[test]
fn sync_and_search_config_follow_sections() {
    let mut config = Config::default();
    config.sync.max_issues = 7;
    config.sync.policy = SyncPolicy::ProbeAll;
    config.embedding.batch_size = 16;
    config.search.limit = 9;

    let sync = config.sync_config();
    assert_eq!(sync.max_issues, 7);
    assert_eq!(sync.policy, SyncPolicy::ProbeAll);
    assert_eq!(sync.embed_batch_size, 16);
    assert_eq!(config.search_config().limit, 9);
}
