use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docchat"))
}

/// Config pointing every backend at a closed local port.
fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("notes.txt"),
        "Rust is a systems programming language.\n\nCargo is its package manager.",
    )
    .unwrap();

    let config_content = format!(
        r#"[upload]
dir = "{}/uploads"

[embedding]
provider = "ollama"
url = "http://127.0.0.1:9"
timeout_secs = 2
max_retries = 0

[llm]
url = "http://127.0.0.1:9"
timeout_secs = 2
liveness_timeout_secs = 1
max_retries = 0

[logging]
level = "warn"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(docchat_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("status"));
    assert!(stdout.contains("ask"));
}

#[test]
fn test_status_reports_unreachable_llm() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_docchat(&config_path, &["status"]);
    assert!(!success, "status should fail: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ollama: not running"));
}

#[test]
fn test_ask_fails_when_llm_is_down() {
    let (tmp, config_path) = setup_test_env("");
    let file = tmp.path().join("notes.txt");

    let (_, stderr, success) = run_docchat(
        &config_path,
        &["ask", file.to_str().unwrap(), "What is Cargo?"],
    );
    assert!(!success);
    assert!(
        stderr.contains("Ollama is not running"),
        "unexpected stderr: {}",
        stderr
    );
}

#[test]
fn test_ask_reports_embedding_failure() {
    let (tmp, config_path) = setup_test_env("");
    let config = fs::read_to_string(&config_path)
        .unwrap()
        .replace("liveness_timeout_secs = 1", "liveness_timeout_secs = 1\ncheck_before_ingest = false");
    fs::write(&config_path, config).unwrap();
    let file = tmp.path().join("notes.txt");

    let (_, stderr, success) = run_docchat(
        &config_path,
        &["ask", file.to_str().unwrap(), "What is Cargo?"],
    );
    assert!(!success);
    assert!(stderr.contains("embedding failed"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_ask_rejects_unsupported_file() {
    let (tmp, config_path) = setup_test_env("");
    let file = tmp.path().join("image.png");
    fs::write(&file, [0x89, b'P', b'N', b'G']).unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["ask", file.to_str().unwrap(), "?"]);
    assert!(!success);
    assert!(stderr.contains("Only PDF, TXT, MD, DOCX files are supported"));
}

#[test]
fn test_invalid_config_is_reported() {
    let (_tmp, config_path) = setup_test_env("[retrieval]\ntop_k = 0");

    let (_, stderr, success) = run_docchat(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("retrieval.top_k"));
}

#[test]
fn test_missing_config_falls_back_to_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let output = Command::new(docchat_binary())
        .arg("--config")
        .arg(&missing)
        .arg("ask")
        .arg(tmp.path().join("absent.txt"))
        .arg("?")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read"), "unexpected stderr: {}", stderr);
}
