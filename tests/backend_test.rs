//! Backend scenarios against in-process mock servers
//!
//! The premium tests run a real WebSocket server on a loopback port; the
//! efficient test answers the three REST stages over plain HTTP/1.1.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Message as WsMessage, Utf8Bytes};
use vox_agent::audio::{AudioFrame, CAPTURE_SAMPLE_RATE};
use vox_agent::backend::{BackendEvent, EfficientBackend, EfficientConfig, PremiumBackend, PremiumConfig};
use vox_agent::clock::{Clock, ManualClock};
use vox_agent::cost::CostLedger;
use vox_agent::types::Stage;

fn test_clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::at_hour(12))
}

async fn recv_event(
    sub: &mut vox_agent::events::Subscription<BackendEvent>,
) -> BackendEvent {
    tokio::time::timeout(Duration::from_secs(10), sub.recv())
        .await
        .expect("timed out waiting for backend event")
        .expect("event stream ended")
}

// ---- premium: reconnection (mock realtime server) ----

async fn serve_session_once(listener: &TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    // First frame from the client is the session configuration
    let config = ws.next().await.unwrap().unwrap();
    assert!(config.to_text().unwrap().contains("session.update"));
    // Give the client a beat to attach its subscriber
    tokio::time::sleep(Duration::from_millis(200)).await;
    ws.send(WsMessage::Text(Utf8Bytes::from(
        json!({"type": "session.created"}).to_string(),
    )))
    .await
    .unwrap();
    // Dropping the socket is an unsolicited disconnect
}

#[tokio::test]
async fn premium_reconnects_after_unsolicited_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // Initial session, dropped by the server, then the reconnect
        serve_session_once(&listener).await;
        serve_session_once(&listener).await;
        // Hold the second session open briefly
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let mut config = PremiumConfig::new("sk-test".into(), "alloy".into(), "hi".into());
    config.url = format!("ws://{}", addr);
    let backend = PremiumBackend::connect(config, CostLedger::new(1.0, 30.0), test_clock())
        .await
        .unwrap();
    let mut sub = backend.subscribe();

    // First session comes up, then drops
    assert!(matches!(recv_event(&mut sub).await, BackendEvent::SessionReady));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::Disconnected { .. }
    ));

    // Backoff schedule starts at attempt 1 (ManualClock sleeps instantly)
    match recv_event(&mut sub).await {
        BackendEvent::Reconnecting { attempt, delay_ms } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay_ms, 1_000);
        }
        other => panic!("expected Reconnecting, got {:?}", other),
    }
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::Reconnected { attempt: 1 }
    ));
    // Session configuration is re-issued and acknowledged
    assert!(matches!(recv_event(&mut sub).await, BackendEvent::SessionReady));

    backend.disconnect(true);
    server.await.unwrap();
}

#[tokio::test]
async fn premium_gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        serve_session_once(&listener).await;
        drop(listener); // every reconnect attempt is refused
    });

    let mut config = PremiumConfig::new("sk-test".into(), "alloy".into(), "hi".into());
    config.url = format!("ws://{}", addr);
    let backend = PremiumBackend::connect(config, CostLedger::new(1.0, 30.0), test_clock())
        .await
        .unwrap();
    let mut sub = backend.subscribe();

    assert!(matches!(recv_event(&mut sub).await, BackendEvent::SessionReady));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::Disconnected { .. }
    ));

    let mut attempts = Vec::new();
    loop {
        match recv_event(&mut sub).await {
            BackendEvent::Reconnecting { attempt, .. } => attempts.push(attempt),
            BackendEvent::ReconnectionFailed => break,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(attempts, vec![1, 2, 3, 4, 5]);

    backend.disconnect(true);
    server.await.unwrap();
}

#[tokio::test]
async fn premium_intentional_disconnect_suppresses_reconnection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await; // session.update
        // Wait for the client to go away
        while let Some(Ok(_)) = ws.next().await {}
    });

    let mut config = PremiumConfig::new("sk-test".into(), "alloy".into(), "hi".into());
    config.url = format!("ws://{}", addr);
    let backend = PremiumBackend::connect(config, CostLedger::new(1.0, 30.0), test_clock())
        .await
        .unwrap();
    let mut sub = backend.subscribe();

    backend.disconnect(true);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // No disconnect/reconnect events after an intentional teardown
    while let Some(event) = sub.try_recv() {
        assert!(
            !matches!(
                event,
                BackendEvent::Disconnected { .. } | BackendEvent::Reconnecting { .. }
            ),
            "unexpected event after intentional disconnect: {:?}",
            event
        );
    }
    server.await.unwrap();
}

// ---- efficient: end-to-end chain (mock REST server) ----

/// Read one HTTP/1.1 request, respond, close the connection
async fn answer_http(stream: tokio::net::TcpStream) {
    let mut stream = stream;
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    // Read headers
    let header_end = loop {
        let n = stream.read(&mut tmp).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length: usize = head
        .lines()
        .find_map(|l| {
            let l = l.to_ascii_lowercase();
            l.strip_prefix("content-length:").map(|v| v.trim().parse().unwrap())
        })
        .unwrap_or(0);

    // Read the body fully before answering
    while buf.len() - header_end < content_length {
        let n = stream.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    let (content_type, body): (&str, Vec<u8>) = if head.contains("/audio/transcriptions") {
        ("application/json", json!({"text": "what time is it"}).to_string().into_bytes())
    } else if head.contains("/chat/completions") {
        (
            "application/json",
            json!({
                "choices": [{"message": {"role": "assistant", "content": "It is noon."}}],
                "usage": {"prompt_tokens": 120, "completion_tokens": 9},
            })
            .to_string()
            .into_bytes(),
        )
    } else if head.contains("/audio/speech") {
        ("audio/mpeg", b"FAKE-MP3-BYTES".to_vec())
    } else {
        ("application/json", b"{}".to_vec())
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        content_type,
        body.len()
    );
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    stream.shutdown().await.ok();
}

#[tokio::test]
async fn efficient_end_to_end_emits_stages_and_records_costs() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(answer_http(stream));
        }
    });

    let mut config = EfficientConfig::new("sk-test".into(), "alloy".into(), "assistant".into());
    config.base_url = format!("http://{}", addr);
    let ledger = CostLedger::new(1.0, 30.0);
    let clock = test_clock();
    let backend = EfficientBackend::new(config, ledger.clone(), clock.clone()).unwrap();
    let mut sub = backend.subscribe();

    // Two seconds of captured audio
    let frame = AudioFrame::new(vec![7u8; 64_000], CAPTURE_SAMPLE_RATE, clock.now());
    backend.append_audio(frame).unwrap();
    backend.commit_audio().unwrap();

    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::StageStarted(Stage::Transcribe)
    ));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::Transcription(t) if t == "what time is it"
    ));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::StageStarted(Stage::Reason)
    ));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::TextDone(t) if t == "It is noon."
    ));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::StageStarted(Stage::Synthesize)
    ));
    assert!(matches!(
        recv_event(&mut sub).await,
        BackendEvent::AudioChunk(a) if a == b"FAKE-MP3-BYTES"
    ));
    assert!(matches!(recv_event(&mut sub).await, BackendEvent::AudioDone));
    assert!(matches!(recv_event(&mut sub).await, BackendEvent::ResponseDone));

    // Three ledger entries with non-zero cost, in stage order
    let entries = ledger.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].stage, Stage::Transcribe);
    assert_eq!(entries[1].stage, Stage::Reason);
    assert_eq!(entries[2].stage, Stage::Synthesize);
    assert!(entries.iter().all(|e| e.amount > 0.0));
    assert_eq!(entries[0].audio_seconds, Some(2.0));
}
