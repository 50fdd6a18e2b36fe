use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn arx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("arx");
    path
}

const CHANGES: &str = r#"{"record_id": 42, "change_kind": "created", "fields": {"description": "The entity behaves unpredictably near water. It emits a low hum."}}
{"record_id": 7, "change_kind": "created", "fields": {"notes": "Dr. Rights oversees personnel evaluations at Site-19."}}

{"record_id": 13, "change_kind": "created", "fields": {"summary": "Containment breach in sector four was resolved by mobile task force Nu-7."}}
"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(root.join("changes.jsonl"), CHANGES).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/arx.sqlite"

[chunking]
max_chars = 800
overlap_chars = 100

[embedding]
provider = "hash"
dims = 384

[indexing]
max_retries = 0
backoff_ms = 1

[retrieval]
default_top_k = 10

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("arx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_arx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = arx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run arx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn setup_imported() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let changes = tmp.path().join("changes.jsonl");
    let (stdout, stderr, success) = run_arx(&config_path, &["import", changes.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

/// Record ids in the order `arx search` printed them.
fn result_ids(stdout: &str) -> Vec<i64> {
    stdout
        .lines()
        .filter_map(|line| line.split("] record ").nth(1))
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_arx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/arx.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_arx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_arx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_indexes_records() {
    let (tmp, config_path) = setup_test_env();
    let changes = tmp.path().join("changes.jsonl");

    let (stdout, stderr, success) = run_arx(&config_path, &["import", changes.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records indexed: 3"), "got: {}", stdout);
    assert!(stdout.contains("chunks written: 3"), "got: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_search_ranks_matching_record_first() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, stderr, success) =
        run_arx(&config_path, &["search", "creature that reacts to water"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let ids = result_ids(&stdout);
    assert_eq!(ids.first(), Some(&42), "got: {}", stdout);
    assert!(stdout.contains("excerpt: \"The entity behaves unpredictably near water."));
    assert!(stdout.contains("field: description"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_imported();

    let (stdout1, _, _) = run_arx(&config_path, &["search", "containment breach"]);
    let (stdout2, _, _) = run_arx(&config_path, &["search", "containment breach"]);
    assert_eq!(stdout1, stdout2);
    assert_eq!(result_ids(&stdout1).first(), Some(&13));
}

#[test]
fn test_search_top_k_limits_results() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, _, success) = run_arx(
        &config_path,
        &["search", "personnel evaluations", "--top-k", "1"],
    );
    assert!(success);
    assert_eq!(result_ids(&stdout), vec![7]);

    let (stdout, _, success) = run_arx(
        &config_path,
        &["search", "personnel evaluations", "--top-k", "0"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_imported();

    let (_, stderr, success) = run_arx(&config_path, &["search", "   "]);
    assert!(!success, "Empty query should fail");
    assert!(stderr.contains("query must not be empty"), "got: {}", stderr);
}

#[test]
fn test_search_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_arx(&config_path, &["init"]);

    let (stdout, _, success) = run_arx(&config_path, &["search", "anything at all"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_delete_removes_record_from_results() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, stderr, success) = run_arx(&config_path, &["delete", "7"]);
    assert!(success, "delete failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("deleted record 7"));

    let (stdout, _, _) = run_arx(&config_path, &["search", "personnel evaluations"]);
    assert!(!result_ids(&stdout).contains(&7), "got: {}", stdout);

    let (_, stderr, success) = run_arx(&config_path, &["get", "7"]);
    assert!(!success);
    assert!(stderr.contains("record not found"), "got: {}", stderr);
}

#[test]
fn test_get_record() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, stderr, success) = run_arx(&config_path, &["get", "42"]);
    assert!(success, "get failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("record_id:    42"));
    assert!(stdout.contains("index:        current"));
    assert!(stdout.contains("--- description ---"));
    assert!(stdout.contains("--- Chunks (1) ---"));
    assert!(stdout.contains("[description #0]"));
}

#[test]
fn test_reindex_single_and_stale() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, stderr, success) = run_arx(&config_path, &["reindex", "42"]);
    assert!(success, "reindex failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("state: indexed"));
    assert!(stdout.contains("chunks: 1"));

    let (stdout, _, success) = run_arx(&config_path, &["reindex", "--stale"]);
    assert!(success);
    assert!(stdout.contains("indexed: 0"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 3"), "got: {}", stdout);

    let (stdout, _, success) = run_arx(&config_path, &["reindex", "--all"]);
    assert!(success);
    assert!(stdout.contains("indexed: 3"), "got: {}", stdout);
}

#[test]
fn test_reindex_missing_record() {
    let (_tmp, config_path) = setup_imported();

    let (_, stderr, success) = run_arx(&config_path, &["reindex", "999"]);
    assert!(!success);
    assert!(stderr.contains("record not found: 999"), "got: {}", stderr);
}

#[test]
fn test_reindex_requires_target() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_arx(&config_path, &["reindex"]);
    assert!(!success, "reindex without a target should fail");
}

#[test]
fn test_import_reports_invalid_lines() {
    let (tmp, config_path) = setup_test_env();
    let bad = tmp.path().join("bad.jsonl");
    fs::write(
        &bad,
        concat!(
            r#"{"record_id": 1, "change_kind": "created", "fields": {"notes": "Fine."}}"#,
            "\n",
            r#"{"record_id": 2, "change_kind": "created", "fields": {"object_class": "Keter"}}"#,
            "\n",
            "not json\n",
        ),
    )
    .unwrap();

    let (stdout, stderr, success) = run_arx(&config_path, &["import", bad.to_str().unwrap()]);
    assert!(!success, "import with bad lines should fail");
    assert!(stdout.contains("records indexed: 1"), "got: {}", stdout);
    assert!(stdout.contains("failed: 2"), "got: {}", stdout);
    assert!(stderr.contains("line 2"), "got: {}", stderr);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_imported();

    let (stdout, stderr, success) = run_arx(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Records:     3"));
    assert!(stdout.contains("Chunks:      3"));
    assert!(stdout.contains("Stale:       0"));
    assert!(stdout.contains("Model:       feature-hash-v1"));
}

#[test]
fn test_dimension_change_is_refused() {
    let (_tmp, config_path) = setup_imported();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("dims = 384", "dims = 128")).unwrap();

    let (_, stderr, success) = run_arx(&config_path, &["search", "water"]);
    assert!(!success);
    assert!(stderr.contains("dimension mismatch"), "got: {}", stderr);
}

#[test]
fn test_disabled_provider_fails_search() {
    let (_tmp, config_path) = setup_imported();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("provider = \"hash\"", "provider = \"disabled\""),
    )
    .unwrap();

    let (_, stderr, success) = run_arx(&config_path, &["search", "water"]);
    assert!(!success);
    assert!(stderr.contains("embedding unavailable"), "got: {}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("overlap_chars = 100", "overlap_chars = 900")).unwrap();

    let (_, stderr, success) = run_arx(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap_chars"), "got: {}", stderr);
}

#[test]
fn test_model_change_is_not_pinned_by_read_commands() {
    let (_tmp, config_path) = setup_imported();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace(
            "provider = \"hash\"",
            "provider = \"ollama\"\nmodel = \"nomic-embed-text\"",
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_arx(&config_path, &["search", "water"]);
    assert!(!success);
    assert!(stderr.contains("index was built with model feature-hash-v1"), "got: {}", stderr);

    for args in [&["stats"][..], &["get", "42"][..]] {
        let (_, stderr, success) = run_arx(&config_path, args);
        assert!(success, "{:?} failed: {}", args, stderr);
    }
    let (stdout, _, _) = run_arx(&config_path, &["stats"]);
    assert!(stdout.contains("Model:       feature-hash-v1"), "got: {}", stdout);
    assert!(stdout.contains("Stale:       0"), "got: {}", stdout);
}
