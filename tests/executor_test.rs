//! Function executor scenarios: sandbox, confirmation, boundaries

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use vox_agent::audio::wav;
use vox_agent::clock::{Clock, ManualClock};
use vox_agent::functions::{ExecutorConfig, FunctionExecutor};
use vox_agent::security::PathPolicy;

fn executor(tmp: &TempDir) -> FunctionExecutor {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(14));
    FunctionExecutor::new(ExecutorConfig::default(), clock)
        .with_path_policy(PathPolicy::new(vec![tmp.path().to_path_buf()]))
}

#[tokio::test]
async fn path_sandbox_denies_system_and_allows_tmp() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);

    let err = executor
        .execute("read_file", &json!({"path": "/etc/passwd"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PathDenied");

    let file = tmp.path().join("x.txt");
    std::fs::write(&file, "hello").unwrap();
    let result = executor
        .execute("read_file", &json!({"path": file.to_string_lossy()}))
        .await
        .unwrap();
    assert_eq!(result["content"], "hello");
    assert_eq!(result["size"], 5);
    assert_eq!(result["truncated"], false);
}

#[tokio::test]
async fn read_file_truncates_but_reports_true_size() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);

    let file = tmp.path().join("big.txt");
    let body = "b".repeat(4_000);
    std::fs::write(&file, &body).unwrap();

    let result = executor
        .execute("read_file", &json!({"path": file.to_string_lossy()}))
        .await
        .unwrap();
    assert_eq!(result["truncated"], true);
    assert_eq!(result["size"], 4_000);
    let content = result["content"].as_str().unwrap();
    assert!(content.ends_with("..."));
    assert_eq!(content.len(), 1_003);
}

#[tokio::test]
async fn confirmation_denied_leaves_file_in_place() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);
    let file = tmp.path().join("y.txt");
    std::fs::write(&file, "keep me").unwrap();

    let resolver = executor.clone();
    executor.set_confirmation_handler(Arc::new(move |req| {
        resolver.resolve_confirmation(&req.id, false);
    }));

    let err = executor
        .execute("delete_file", &json!({"path": file.to_string_lossy()}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NotApproved");
    assert!(file.exists());
}

#[tokio::test]
async fn sandbox_denial_short_circuits_before_confirmation() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);

    let invoked = Arc::new(AtomicBool::new(false));
    let resolver = executor.clone();
    let invoked_clone = invoked.clone();
    executor.set_confirmation_handler(Arc::new(move |req| {
        invoked_clone.store(true, Ordering::SeqCst);
        resolver.resolve_confirmation(&req.id, true);
    }));

    // Validation (gate 2) rejects the path, so the user is never prompted
    let err = executor
        .execute("delete_file", &json!({"path": "/etc/passwd"}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PathDenied");
    assert!(!invoked.load(Ordering::SeqCst));

    // A sandboxed path still goes through the channel
    let file = tmp.path().join("gated.txt");
    std::fs::write(&file, "x").unwrap();
    executor
        .execute("delete_file", &json!({"path": file.to_string_lossy()}))
        .await
        .unwrap();
    assert!(invoked.load(Ordering::SeqCst));
    assert!(!file.exists());
}

#[tokio::test]
async fn tool_call_reaches_exactly_one_terminal_state() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);

    let cases = vec![
        ("get_time", json!({}), true),
        ("read_file", json!({"path": "/etc/shadow"}), false),
        ("launch_application", json!({"app_name": "powershell"}), false),
        ("run_command", json!({"command": "shutdown /s"}), false),
    ];

    for (name, args, expect_ok) in cases {
        let call = vox_agent::types::ToolCall {
            call_id: format!("call-{}", name),
            name: name.to_string(),
            arguments: args,
        };
        let result = executor.execute_call(&call).await;
        assert_eq!(result.call_id, call.call_id);
        // Exactly one of result/error is populated
        assert_eq!(result.result.is_some(), expect_ok);
        assert_eq!(result.error.is_some(), !expect_ok);
    }
}

#[tokio::test]
async fn volume_is_clamped_to_bounds() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);

    let low = executor
        .execute("set_volume", &json!({"level": -5}))
        .await
        .unwrap();
    assert_eq!(low["level"], 0);

    let high = executor
        .execute("set_volume", &json!({"level": 150}))
        .await
        .unwrap();
    assert_eq!(high["level"], 100);
}

#[tokio::test]
async fn file_lifecycle_through_executor() {
    let tmp = TempDir::new().unwrap();
    let executor = executor(&tmp);
    let path = tmp.path().join("notes").join("todo.txt");

    let created = executor
        .execute(
            "create_file",
            &json!({"path": path.to_string_lossy(), "content": "buy milk"}),
        )
        .await
        .unwrap();
    assert_eq!(created["success"], true);

    let listing = executor
        .execute("list_files", &json!({"path": tmp.path().join("notes").to_string_lossy()}))
        .await
        .unwrap();
    assert_eq!(listing["count"], 1);

    let found = executor
        .execute(
            "search_files",
            &json!({"query": "todo", "directory": tmp.path().to_string_lossy()}),
        )
        .await
        .unwrap();
    assert_eq!(found["count"], 1);

    let dest = tmp.path().join("done.txt");
    executor
        .execute(
            "move_file",
            &json!({"source": path.to_string_lossy(), "destination": dest.to_string_lossy()}),
        )
        .await
        .unwrap();
    assert!(dest.exists());
    assert!(!path.exists());
}

#[test]
fn wav_round_trip_recovers_format_exactly() {
    let pcm: Vec<u8> = (0..32_000u32).map(|i| (i % 256) as u8).collect();
    let spec = wav::WavSpec {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };
    let encoded = wav::encode(&pcm, spec);
    let (parsed, offset, len) = wav::parse(&encoded).unwrap();

    assert_eq!(parsed.sample_rate, 16_000);
    assert_eq!(parsed.channels, 1);
    assert_eq!(parsed.bits_per_sample, 16);
    assert_eq!(len, pcm.len());
    assert_eq!(&encoded[offset..offset + len], &pcm[..]);
}
