//! WebSocket and status endpoints against a live server on a loopback port.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use quantpulse::broadcast::SignalBroadcaster;
use quantpulse::model::{Instrument, SignalKind, SignalPacket};
use quantpulse::server::{self, AppState};
use quantpulse::shutdown;
use quantpulse::state::{EngineState, SharedState};

async fn wait_for_subscribers(broadcaster: &SignalBroadcaster, n: usize) {
    for _ in 0..100 {
        if broadcaster.subscriber_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {} subscribers, have {}", n, broadcaster.subscriber_count());
}

#[tokio::test]
async fn subscriber_receives_packets_and_status_reports_engine() {
    let universe = vec![Instrument::new("RELIANCE.NS", "Reliance Industries")];
    let board = SharedState::new(&EngineState::new(universe, -0.02), 10);
    let broadcaster = SignalBroadcaster::new(8);
    let (trigger, sd) = shutdown::channel();

    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(server::serve(listener, AppState::new(board.clone(), broadcaster.clone(), sd)));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    wait_for_subscribers(&broadcaster, 1).await;

    let report = broadcaster.publish(&SignalPacket {
        emitted_at: Utc::now(),
        instrument: Instrument::new("RELIANCE.NS", "Reliance Industries"),
        price: 2456.349,
        signal: SignalKind::Buy,
        latency: Duration::from_micros(1500),
        cumulative_pnl: 0.0123,
    });
    assert_eq!(report.delivered, 1);

    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = match msg {
        Message::Text(text) => text,
        other => panic!("unexpected frame {:?}", other),
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["ticker"], "RELIANCE");
    assert_eq!(value["price"], 2456.35);
    assert_eq!(value["signal"], "BUY");
    assert_eq!(value["latency_us"], 1500.0);
    assert_eq!(value["pnl"], "1.23%");
    assert_eq!(value["timestamp"].as_str().unwrap().len(), 8);

    let status: serde_json::Value = reqwest::get(format!("http://{}/api/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["breaker"], "ACTIVE");
    assert_eq!(status["subscribers"], 1);
    assert_eq!(status["universe"][0]["id"], "RELIANCE.NS");

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    // closing the socket unregisters the subscriber
    ws.close(None).await.unwrap();
    wait_for_subscribers(&broadcaster, 0).await;

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn late_subscriber_gets_no_replay() {
    let board = SharedState::new(&EngineState::new(vec![], -0.02), 10);
    let broadcaster = SignalBroadcaster::new(8);
    let (trigger, sd) = shutdown::channel();
    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_task = tokio::spawn(server::serve(listener, AppState::new(board, broadcaster.clone(), sd)));

    let early = SignalPacket {
        emitted_at: Utc::now(),
        instrument: Instrument::new("TCS.NS", "TCS"),
        price: 3890.5,
        signal: SignalKind::Buy,
        latency: Duration::from_micros(10),
        cumulative_pnl: 0.0,
    };
    assert_eq!(broadcaster.publish(&early).delivered, 0);

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    wait_for_subscribers(&broadcaster, 1).await;
    let nothing = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(nothing.is_err());

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
