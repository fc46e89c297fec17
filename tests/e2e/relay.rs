//! The full relay over websockets: clients publish and subscribe, payments
//! come from a loopback upstream relay.

use super::harness::{
    mention, note, ws_upstream, MsatValuator, TestClient, TestKeys, UpstreamRelay,
};
use ppe_relay::protocol::{ClientMessage, RelayMessage};
use ppe_relay::record::KIND_TEXT_NOTE;
use ppe_relay::store::{EventStore, MemoryStore};
use ppe_relay::{Filter, RelayBuilder, RelayConfig, RelayEvent, Secrets};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct TestRelay {
    url: String,
    store: Arc<MemoryStore>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    events: ppe_relay::RelayEventsChannel,
    _dir: tempfile::TempDir,
}

impl TestRelay {
    async fn start(keys: &TestKeys, upstream: &UpstreamRelay, bot: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = RelayConfig {
            root_dir: dir.path().to_path_buf(),
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..RelayConfig::default()
        };
        config.upstream.relays = vec![upstream.url()];
        config.bot.enabled = bot;
        let secrets = Secrets {
            operator: keys.operator.clone(),
            bot: keys.bot.clone(),
        };

        let store = Arc::new(MemoryStore::new());
        let mut relay = RelayBuilder::new(config, secrets)
            .with_upstream(ws_upstream(&[upstream]))
            .with_store(store.clone())
            .with_valuator(Arc::new(MsatValuator))
            .build()
            .await
            .expect("build relay");

        let url = format!("ws://{}", relay.local_addr());
        let shutdown = relay.shutdown_handle();
        let events = relay.subscribe_events();
        let task = tokio::spawn(async move {
            relay.run().await.expect("relay run");
        });

        Self {
            url,
            store,
            shutdown,
            task,
            events,
            _dir: dir,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("signal shutdown");
        self.task.await.expect("relay task");
    }
}

#[tokio::test]
async fn test_unpaid_record_is_blocked() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    let relay = TestRelay::start(&keys, &upstream, false).await;

    let mut client = TestClient::connect(&relay.url).await.expect("connect");
    let (accepted, message) = client
        .publish(&note(&keys.payer, "free lunch"))
        .await
        .expect("publish");
    assert!(!accepted);
    assert_eq!(message, "blocked: no sufficient balance; top up");
    assert!(relay.store.is_empty());

    relay.stop().await;
}

#[tokio::test]
async fn test_paid_records_are_admitted_until_credit_runs_out() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:2000")]).await;
    let mut relay = TestRelay::start(&keys, &upstream, false).await;
    let mut client = TestClient::connect(&relay.url).await.expect("connect");

    for content in ["one", "two"] {
        let (accepted, message) = client
            .publish(&note(&keys.payer, content))
            .await
            .expect("publish");
        assert!(accepted, "{content}: {message}");
    }
    let (accepted, message) = client
        .publish(&note(&keys.payer, "three"))
        .await
        .expect("publish");
    assert!(!accepted);
    assert_eq!(message, "blocked: no sufficient balance; top up");
    assert_eq!(
        relay
            .store
            .count_by_author(keys.payer.public_key())
            .await
            .expect("count"),
        2
    );

    let mut admitted = 0;
    while let Ok(event) = relay.events.try_recv() {
        if matches!(event, RelayEvent::RecordAdmitted { .. }) {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 2);

    relay.stop().await;
}

#[tokio::test]
async fn test_disallowed_kind_is_blocked_before_payment() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:5000")]).await;
    let relay = TestRelay::start(&keys, &upstream, false).await;
    let mut client = TestClient::connect(&relay.url).await.expect("connect");

    let reaction = ppe_relay::UnsignedRecord::new(7, "+")
        .sign(&keys.payer)
        .expect("sign");
    let (accepted, message) = client.publish(&reaction).await.expect("publish");
    assert!(!accepted);
    assert_eq!(message, "blocked: received event kind 7 not allowed");

    relay.stop().await;
}

#[tokio::test]
async fn test_subscribers_get_stored_then_live_records() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:5000")]).await;
    let relay = TestRelay::start(&keys, &upstream, false).await;

    let mut writer = TestClient::connect(&relay.url).await.expect("connect");
    let stored = note(&keys.payer, "before");
    assert!(writer.publish(&stored).await.expect("publish").0);

    let mut reader = TestClient::connect(&relay.url).await.expect("connect");
    reader
        .send(&ClientMessage::Req {
            subscription_id: "feed".to_string(),
            filters: vec![Filter::new()
                .kinds([KIND_TEXT_NOTE])
                .authors([keys.payer.public_key().to_string()])],
        })
        .await
        .expect("req");
    assert!(matches!(
        reader.recv().await.expect("stored"),
        RelayMessage::Event { ref record, .. } if record.id == stored.id
    ));
    assert_eq!(
        reader.recv().await.expect("eose"),
        RelayMessage::Eose("feed".to_string())
    );

    let live = note(&keys.payer, "after");
    assert!(writer.publish(&live).await.expect("publish").0);
    assert!(matches!(
        reader.recv().await.expect("live"),
        RelayMessage::Event { ref subscription_id, ref record }
            if subscription_id == "feed" && record.id == live.id
    ));

    relay.stop().await;
}

#[tokio::test]
async fn test_malformed_input_is_refused() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    let relay = TestRelay::start(&keys, &upstream, false).await;
    let mut client = TestClient::connect(&relay.url).await.expect("connect");

    client.send_raw("[\"HELLO\"]").await.expect("send");
    assert!(matches!(
        client.recv().await.expect("notice"),
        RelayMessage::Notice(ref message) if message.starts_with("error:")
    ));

    let forged = {
        let mut record = note(&keys.payer, "real");
        record.sig = "00".repeat(64);
        record
    };
    let (accepted, message) = client.publish(&forged).await.expect("publish");
    assert!(!accepted);
    assert!(message.starts_with("invalid:"), "{message}");

    relay.stop().await;
}

#[tokio::test]
async fn test_unbounded_and_media_requests_are_blocked() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:5000")]).await;
    let relay = TestRelay::start(&keys, &upstream, false).await;
    let mut client = TestClient::connect(&relay.url).await.expect("connect");

    client.send_raw(r#"["REQ","everything",{}]"#).await.expect("send");
    assert_eq!(
        client.recv().await.expect("closed"),
        RelayMessage::Closed {
            subscription_id: "everything".to_string(),
            message: "blocked: can't handle empty filters".to_string(),
        }
    );

    let inline = note(&keys.payer, "data:image/png;base64,iVBORw0KGgo=");
    let (accepted, message) = client.publish(&inline).await.expect("publish");
    assert!(!accepted);
    assert_eq!(message, "blocked: event with base64 media");
    assert!(relay.store.is_empty());

    relay.stop().await;
}

#[tokio::test]
async fn test_relay_bot_answers_through_upstream() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:3000")]).await;
    let relay = TestRelay::start(&keys, &upstream, true).await;

    // One paid note stored locally leaves 2 of 3.
    let mut client = TestClient::connect(&relay.url).await.expect("connect");
    assert!(client.publish(&note(&keys.payer, "gm")).await.expect("publish").0);

    let query = mention(&keys.payer, &keys.operator, "balance please");
    upstream.seed([query.clone()]).await;

    let reply = upstream
        .wait_for(
            &Filter::new()
                .kinds([KIND_TEXT_NOTE])
                .tag('e', [query.id.clone()])
                .authors([keys.bot.public_key().to_string()]),
        )
        .await
        .expect("bot reply");
    assert_eq!(reply.content, "Your balance is 2 sats.");

    relay.stop().await;
}
