use std::env;
use std::fs;
use std::process::Command;

fn essence() -> Command {
    Command::new(env!("CARGO_BIN_EXE_essence"))
}

#[test]
fn main_lists_input_devices() {
    let output = essence()
        .arg("--list-input-devices")
        .env("ESSENCE_TEST_DEVICES", "Mic A,Mic B")
        .output()
        .expect("run essence");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available audio input devices:"));
    assert!(stdout.contains("  - Mic A"));
    assert!(stdout.contains("  - Mic B"));
}

#[test]
fn main_reports_no_input_devices() {
    let output = essence()
        .arg("--list-input-devices")
        .env("ESSENCE_TEST_DEVICES", "")
        .output()
        .expect("run essence");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No audio input devices detected."));
}

#[test]
fn main_renders_fenced_report() {
    let path = env::temp_dir().join(format!("essence_report_{}.json", std::process::id()));
    let report = r#"```json
{"report": {
  "overall_score": 88,
  "evaluation": [
    {"parameter": "Integration Quality", "score": 91, "feedback": "Tight API contract."},
    {"parameter": "Problem Relevance", "score": 70, "feedback": "Narrow audience."}
  ],
  "strengths": ["Fast streaming replies"],
  "areas_to_improve": "Offline mode",
  "recommendations": [],
  "next_steps": {"priority_fixes": ["Retry uploads"]},
  "overall_summary": "Solid demo."
}}
```"#;
    fs::write(&path, report).expect("write report");

    let output = essence()
        .arg("--report")
        .arg(&path)
        .output()
        .expect("run essence");
    let _ = fs::remove_file(&path);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Overall rating: 88/100 (Excellent)"));
    assert!(stdout.contains("Solid demo."));
    let integration = stdout.find("Integration Quality").expect("integration row");
    let relevance = stdout.find("Problem Relevance").expect("relevance row");
    assert!(integration < relevance);
    assert!(stdout.contains("STRENGTHS"));
    assert!(stdout.contains("  - Offline mode"));
    assert!(stdout.contains("Retry uploads"));
}

#[test]
fn main_rejects_report_with_backend_error() {
    let path = env::temp_dir().join(format!("essence_report_err_{}.json", std::process::id()));
    fs::write(&path, r#"{"error": "evaluation timed out"}"#).expect("write report");

    let output = essence()
        .arg("--report")
        .arg(&path)
        .output()
        .expect("run essence");
    let _ = fs::remove_file(&path);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("evaluation timed out"));
}

#[test]
fn main_rejects_non_websocket_server_url() {
    let dir = env::temp_dir().join(format!("essence_cli_cfg_{}", std::process::id()));
    let output = essence()
        .args(["--server-url", "http://localhost:8000", "--save-config"])
        .env("ESSENCE_CONFIG_DIR", &dir)
        .output()
        .expect("run essence");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--server-url must start with ws://"));
    assert!(!dir.join("config.toml").exists());
}

#[test]
fn main_saves_config_for_next_launch() {
    let dir = env::temp_dir().join(format!("essence_cli_save_{}", std::process::id()));
    let output = essence()
        .args(["--transport", "http", "--commit-wait-ms", "1500", "--save-config"])
        .env("ESSENCE_CONFIG_DIR", &dir)
        .env_remove("ESSENCE_SERVER_URL")
        .output()
        .expect("run essence");
    assert!(output.status.success());
    let saved = fs::read_to_string(dir.join("config.toml")).expect("config written");
    let _ = fs::remove_dir_all(&dir);
    assert!(saved.contains("transport = \"http\""));
    assert!(saved.contains("commit_wait_ms = 1500"));
}
