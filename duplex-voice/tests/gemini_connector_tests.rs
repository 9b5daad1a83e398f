//! Drives a session through `GeminiConnector` against a local WebSocket server.

#![cfg(feature = "gemini")]

mod support;

use std::time::Duration;

use duplex_voice::gemini::GeminiConnector;
use duplex_voice::{AudioSession, SessionState, ToolDefinition};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use support::{MockDevices, encoded_silence, wait_until};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

enum Seen {
    Uri(String),
    Frame(Value),
    Closed,
}

/// Accept one connection and script the server side of a Live session.
async fn serve(listener: TcpListener, seen: mpsc::UnboundedSender<Seen>, mut script: mpsc::UnboundedReceiver<Value>) {
    let (stream, _) = listener.accept().await.unwrap();
    let uri_tx = seen.clone();
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let _ = uri_tx.send(Seen::Uri(req.uri().to_string()));
        Ok(resp)
    })
    .await
    .unwrap();
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = seen.send(Seen::Frame(serde_json::from_str(text.as_str()).unwrap()));
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    let _ = seen.send(Seen::Closed);
                    break;
                }
                Some(Ok(_)) => {}
            },
            Some(reply) = script.recv() => {
                sink.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        }
    }
}

async fn next_frame(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap() {
            Some(Seen::Frame(value)) => return value,
            Some(_) => continue,
            None => panic!("server exited"),
        }
    }
}

#[tokio::test]
async fn test_live_session_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let (script, script_rx) = mpsc::unbounded_channel();
    tokio::spawn(serve(listener, seen_tx, script_rx));

    let devices = MockDevices::new();
    let rig = devices.rig.clone();
    let session = AudioSession::builder()
        .connector(GeminiConnector::new("test-key").with_url(format!("ws://{}/live", addr)))
        .devices(devices)
        .voice("Kore")
        .tool_fn(ToolDefinition::new("ping"), |_| Ok(json!("pong")))
        .build()
        .unwrap();

    session.start().await.unwrap();

    match tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap() {
        Some(Seen::Uri(uri)) => assert!(uri.ends_with("/live?key=test-key"), "uri was {}", uri),
        _ => panic!("expected handshake first"),
    }

    let setup = next_frame(&mut seen).await;
    assert_eq!(setup["setup"]["model"], session.config().model);
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );
    assert_eq!(setup["setup"]["tools"][0]["functionDeclarations"][0]["name"], "ping");

    script.send(json!({ "setupComplete": {} })).unwrap();
    tokio::time::timeout(Duration::from_secs(5), session.wait_for(|s| *s == SessionState::Active))
        .await
        .unwrap()
        .unwrap();

    rig.push_window(&vec![0.25; 4096], 48_000);
    let audio = next_frame(&mut seen).await;
    assert_eq!(audio["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");

    script
        .send(json!({
            "serverContent": { "modelTurn": { "parts": [
                { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": encoded_silence(0.2, 24_000) } }
            ] } }
        }))
        .unwrap();
    wait_until(|| session.pending_sources() == 1).await;

    script
        .send(json!({ "toolCall": { "functionCalls": [ { "id": "t1", "name": "ping", "args": {} } ] } }))
        .unwrap();
    let response = next_frame(&mut seen).await;
    assert_eq!(
        response,
        json!({ "toolResponse": { "functionResponses": [
            { "id": "t1", "name": "ping", "response": { "result": "pong" } }
        ] } })
    );

    session.stop().await;
    assert_eq!(session.state(), SessionState::Closed);
    loop {
        match tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap() {
            Some(Seen::Closed) | None => break,
            Some(_) => continue,
        }
    }
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _setup = ws.next().await;
        ws.send(Message::Text(json!({ "setupComplete": {} }).to_string().into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = ws.close(None).await;
    });

    let devices = MockDevices::new();
    let rig = devices.rig.clone();
    let session = AudioSession::builder()
        .connector(GeminiConnector::new("").with_url(format!("ws://{}", addr)))
        .devices(devices)
        .build()
        .unwrap();

    session.start().await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), session.wait_for(|s| s.is_terminal()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state, SessionState::Closed);
    assert_eq!(rig.capture_closes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_endpoint_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = AudioSession::builder()
        .connector(GeminiConnector::new("").with_url(format!("ws://{}", addr)))
        .devices(MockDevices::new())
        .build()
        .unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, duplex_voice::DuplexError::ConnectionError(_)));
    assert_eq!(session.state(), SessionState::Errored);
}
