//! Client/server integration: a real session syncing through a real
//! coinstreak-server over loopback WebSockets.

use std::time::Duration;

use coinstreak_client::{PlayerCommand, SessionUpdate, SyncConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

fn unique_id(tag: &str) -> String {
    format!(
        "{tag}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

async fn start_server() -> (String, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let db = std::env::temp_dir().join(format!("{}.db", unique_id("coinstreak-e2e")));
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(coinstreak_server::serve_listener(listener, db, async {
        let _ = stop_rx.await;
    }));
    (format!("ws://{addr}"), stop_tx)
}

fn fast_config(server_url: &str, state_id: &str) -> SyncConfig {
    let mut cfg = SyncConfig::new(server_url, state_id);
    cfg.debounce = Duration::from_millis(50);
    cfg.max_wait = Duration::from_millis(1000);
    cfg.reconnect_delay = Duration::from_millis(100);
    cfg.load_timeout = Duration::from_millis(500);
    cfg
}

async fn next_matching<F>(
    updates: &mut mpsc::UnboundedReceiver<SessionUpdate>,
    what: &str,
    mut pred: F,
) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = updates.recv().await.expect("session ended early");
            if pred(&update) {
                return update;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

#[tokio::test]
async fn flip_is_persisted_and_pushed_to_a_watcher() {
    let (url, _stop) = start_server().await;
    let id = unique_id("e2e-flip");

    let (session, mut updates) = coinstreak_client::session::spawn(fast_config(&url, &id));
    let loaded = next_matching(&mut updates, "load", |u| {
        matches!(u, SessionUpdate::Loaded { .. })
    })
    .await;
    assert!(
        matches!(loaded, SessionUpdate::Loaded { restored: false }),
        "fresh id has nothing to restore"
    );

    // Second subscriber on the same id, speaking the wire format directly.
    let (mut watcher, _) = tokio_tungstenite::connect_async(format!("{url}/state/{id}"))
        .await
        .expect("watcher connect");

    session.command(PlayerCommand::Flip);
    next_matching(&mut updates, "flip result", |u| {
        matches!(u, SessionUpdate::Flipped(_))
    })
    .await;

    // The debounced put lands on the server and fans out to the watcher.
    let frame = tokio::time::timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("no push arrived")
        .expect("watcher stream ended")
        .expect("watcher read error");
    let Message::Text(text) = frame else {
        panic!("unexpected frame: {frame:?}");
    };
    let pushed: Value = serde_json::from_str(text.as_str()).expect("json frame");
    assert_eq!(pushed["type"], "get");
    assert_eq!(pushed["id"], Value::String(id.clone()));
    let heads = pushed["state"]["heads"].as_u64().expect("heads");
    let tails = pushed["state"]["tails"].as_u64().expect("tails");
    assert_eq!(heads + tails, 1, "exactly one flip was recorded");

    session.command(PlayerCommand::Shutdown);
}

#[tokio::test]
async fn existing_snapshot_is_restored_on_load() {
    let (url, _stop) = start_server().await;
    let id = unique_id("e2e-restore");

    // Seed the server record directly.
    let (mut seeder, _) = tokio_tungstenite::connect_async(format!("{url}/state/{id}"))
        .await
        .expect("seeder connect");
    let snapshot = json!({
        "heads": 40, "tails": 60, "headsInARow": 2, "maxHeadsStreak": 5,
        "cashCents": 1234, "headsChance": 0.35, "flipTimeMs": 800,
        "comboMult": 1.5, "baseWorthCents": 10, "autoFlipEnabled": false,
        "upgrades": { "headsChance": 3, "flipTime": 2, "comboMult": 1,
                      "baseWorth": 1, "autoFlip": 0 }
    });
    seeder
        .send(Message::Text(
            json!({ "type": "put", "id": id, "state": snapshot })
                .to_string()
                .into(),
        ))
        .await
        .expect("seed put");
    // Round-trip a get so the put is known to be stored before the session
    // starts.
    seeder
        .send(Message::Text(
            json!({ "type": "get", "id": id }).to_string().into(),
        ))
        .await
        .expect("seed get");
    let echoed = tokio::time::timeout(Duration::from_secs(5), seeder.next())
        .await
        .expect("seed not confirmed")
        .expect("seeder stream ended")
        .expect("seeder read error");
    assert!(matches!(echoed, Message::Text(_)));

    let (session, mut updates) = coinstreak_client::session::spawn(fast_config(&url, &id));
    let loaded = next_matching(&mut updates, "load", |u| {
        matches!(u, SessionUpdate::Loaded { .. })
    })
    .await;
    assert!(matches!(loaded, SessionUpdate::Loaded { restored: true }));

    session.command(PlayerCommand::Stats);
    let stats = next_matching(&mut updates, "stats", |u| {
        matches!(u, SessionUpdate::Stats(_))
    })
    .await;
    let SessionUpdate::Stats(snap) = stats else {
        unreachable!()
    };
    assert_eq!(snap.heads, 40);
    assert_eq!(snap.cash_cents, 1234);
    assert_eq!(snap.flip_time_ms, 800);
    assert_eq!(snap.upgrades.heads_chance, 3);

    session.command(PlayerCommand::Shutdown);
}

#[tokio::test]
async fn applying_a_remote_snapshot_does_not_echo_a_put() {
    let (url, _stop) = start_server().await;
    let id = unique_id("e2e-no-echo");

    let (session, mut updates) = coinstreak_client::session::spawn(fast_config(&url, &id));
    next_matching(&mut updates, "load", |u| {
        matches!(u, SessionUpdate::Loaded { .. })
    })
    .await;

    let (mut watcher, _) = tokio_tungstenite::connect_async(format!("{url}/state/{id}"))
        .await
        .expect("watcher connect");
    let (mut writer, _) = tokio_tungstenite::connect_async(format!("{url}/state/{id}"))
        .await
        .expect("writer connect");

    // Another client overwrites the shared record; the session and the
    // watcher both get the push.
    writer
        .send(Message::Text(
            json!({ "type": "put", "id": id, "state": { "heads": 9, "tails": 4 } })
                .to_string()
                .into(),
        ))
        .await
        .expect("remote put");

    let frame = tokio::time::timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("no fan-out arrived")
        .expect("watcher stream ended")
        .expect("watcher read error");
    let Message::Text(text) = frame else {
        panic!("unexpected frame: {frame:?}");
    };
    let pushed: Value = serde_json::from_str(text.as_str()).expect("json frame");
    assert_eq!(pushed["state"]["heads"], 9);

    // Were the session to persist what it just applied, its put would fan
    // out here well within the debounce plus this margin.
    let silence = tokio::time::timeout(Duration::from_millis(400), watcher.next()).await;
    assert!(silence.is_err(), "session echoed a put: {silence:?}");

    // It did apply the snapshot, though.
    session.command(PlayerCommand::Stats);
    let stats = next_matching(&mut updates, "stats", |u| {
        matches!(u, SessionUpdate::Stats(_))
    })
    .await;
    let SessionUpdate::Stats(snap) = stats else {
        unreachable!()
    };
    assert_eq!(snap.heads, 9);
    assert_eq!(snap.tails, 4);

    session.command(PlayerCommand::Shutdown);
}

#[tokio::test]
async fn session_is_playable_with_no_server_at_all() {
    // Discard port: connection attempts fail fast and retry in background.
    let cfg = fast_config("ws://127.0.0.1:9", &unique_id("e2e-offline"));
    let (session, mut updates) = coinstreak_client::session::spawn(cfg);

    let loaded = next_matching(&mut updates, "offline load", |u| {
        matches!(u, SessionUpdate::Loaded { .. })
    })
    .await;
    assert!(
        matches!(loaded, SessionUpdate::Loaded { restored: false }),
        "offline boot proceeds with defaults"
    );

    session.command(PlayerCommand::Flip);
    next_matching(&mut updates, "offline flip", |u| {
        matches!(u, SessionUpdate::Flipped(_))
    })
    .await;

    session.command(PlayerCommand::Shutdown);
}
