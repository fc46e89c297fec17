//! Command bot against live loopback upstream relays.

use super::harness::{gate, mention, ws_upstream, TestKeys, UpstreamRelay};
use ppe_relay::event::create_event_channel;
use ppe_relay::record::KIND_TEXT_NOTE;
use ppe_relay::store::MemoryStore;
use ppe_relay::{BotOutcome, CommandBot, Filter, RelayEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn reply_to(keys: &TestKeys, query_id: &str) -> Filter {
    Filter::new()
        .kinds([KIND_TEXT_NOTE])
        .tag('e', [query_id.to_string()])
        .authors([keys.bot.public_key().to_string()])
}

/// Scenario A end to end: 2 + 5 paid, nothing stored, the bot says 7.
#[tokio::test]
async fn test_bot_answers_balance_query_from_subscription() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    upstream
        .seed([keys.zap("msat:2000"), keys.zap("msat:5000")])
        .await;
    let query = mention(&keys.payer, &keys.operator, "what is my balance?");
    upstream.seed([query.clone()]).await;

    let gate = Arc::new(gate(&keys, &[&upstream], Arc::new(MemoryStore::new())));
    let (events, mut events_rx) = create_event_channel();
    let bot = Arc::new(
        CommandBot::new(gate, ws_upstream(&[&upstream]), keys.bot.clone(), events)
            .with_lookup_timeout(Duration::from_secs(2)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let bot = Arc::clone(&bot);
        tokio::spawn(async move { bot.run(shutdown_rx).await })
    };

    let reply = upstream
        .wait_for(&reply_to(&keys, &query.id))
        .await
        .expect("reply published");
    assert_eq!(reply.content, "Your balance is 7 sats.");
    assert_eq!(reply.tag_value("p"), Some(keys.payer.public_key()));
    reply.verify().expect("reply is signed by the bot");

    let published = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(RelayEvent::ReplyPublished { query_id, .. }) = events_rx.recv().await {
                return query_id;
            }
        }
    })
    .await
    .expect("reply event");
    assert_eq!(published, query.id);

    shutdown_tx.send(true).expect("signal shutdown");
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("bot stops on shutdown")
        .expect("bot task");
}

/// A relay that drops the live subscription is redialed and queries posted
/// after it comes back are still answered.
#[tokio::test]
async fn test_bot_resubscribes_after_relay_restart() {
    let keys = TestKeys::generate();
    let mut upstream = UpstreamRelay::start().await.expect("upstream");
    upstream.seed([keys.zap("msat:3000")]).await;

    let gate = Arc::new(gate(&keys, &[&upstream], Arc::new(MemoryStore::new())));
    let bot = Arc::new(CommandBot::new(
        gate,
        ws_upstream(&[&upstream]),
        keys.bot.clone(),
        create_event_channel().0,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let bot = Arc::clone(&bot);
        tokio::spawn(async move { bot.run(shutdown_rx).await })
    };

    let before = mention(&keys.payer, &keys.operator, "balance please");
    upstream.seed([before.clone()]).await;
    upstream
        .wait_for(&reply_to(&keys, &before.id))
        .await
        .expect("reply before restart");

    upstream.restart().await.expect("restart upstream");
    assert!(!runner.is_finished(), "bot outlives the dropped subscription");

    let after = mention(&keys.payer, &keys.operator, "balance again?");
    upstream.seed([after.clone()]).await;
    let reply = upstream
        .wait_for(&reply_to(&keys, &after.id))
        .await
        .expect("reply after restart");
    assert_eq!(reply.content, "Your balance is 3 sats.");

    shutdown_tx.send(true).expect("signal shutdown");
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("bot stops on shutdown")
        .expect("bot task");
}

/// The same query seen twice yields one reply.
#[tokio::test]
async fn test_bot_replies_at_most_once() {
    let keys = TestKeys::generate();
    let first_relay = UpstreamRelay::start().await.expect("upstream");
    let second_relay = UpstreamRelay::start().await.expect("upstream");
    first_relay.seed([keys.zap("msat:1000")]).await;

    let relays = [&first_relay, &second_relay];
    let gate = Arc::new(gate(&keys, &relays, Arc::new(MemoryStore::new())));
    let bot = CommandBot::new(
        gate,
        ws_upstream(&relays),
        keys.bot.clone(),
        create_event_channel().0,
    );

    let query = mention(&keys.payer, &keys.operator, "Balance?");
    let BotOutcome::Replied(reply) = bot.handle(&query).await.expect("handle") else {
        panic!("expected a reply");
    };
    assert_eq!(reply.content, "Your balance is 1 sats.");

    // Both relays took the reply.
    for relay in relays {
        assert_eq!(relay.stored(&reply_to(&keys, &query.id)).await.len(), 1);
    }

    // Observed again, e.g. from the second relay.
    assert_eq!(bot.handle(&query).await.expect("handle"), BotOutcome::AlreadyAnswered);
    for relay in relays {
        assert_eq!(relay.stored(&reply_to(&keys, &query.id)).await.len(), 1);
    }
}

/// A restarted bot finds its earlier reply upstream instead of answering again.
#[tokio::test]
async fn test_restarted_bot_respects_existing_reply() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    let query = mention(&keys.payer, &keys.operator, "balance");

    let make_bot = || {
        let gate = Arc::new(gate(&keys, &[&upstream], Arc::new(MemoryStore::new())));
        CommandBot::new(
            gate,
            ws_upstream(&[&upstream]),
            keys.bot.clone(),
            create_event_channel().0,
        )
    };

    let first = make_bot();
    assert!(matches!(first.handle(&query).await, Ok(BotOutcome::Replied(_))));
    drop(first);

    let second = make_bot();
    assert_eq!(second.handle(&query).await.expect("handle"), BotOutcome::AlreadyAnswered);
    assert_eq!(upstream.stored(&reply_to(&keys, &query.id)).await.len(), 1);
}

/// Chatter that merely contains the letters is left alone.
#[tokio::test]
async fn test_bot_ignores_non_commands() {
    let keys = TestKeys::generate();
    let upstream = UpstreamRelay::start().await.expect("upstream");
    let gate = Arc::new(gate(&keys, &[&upstream], Arc::new(MemoryStore::new())));
    let bot = CommandBot::new(
        gate,
        ws_upstream(&[&upstream]),
        keys.bot.clone(),
        create_event_channel().0,
    );

    let chatter = mention(&keys.payer, &keys.operator, "a balanced diet");
    assert_eq!(bot.handle(&chatter).await.expect("handle"), BotOutcome::Ignored);
    assert!(upstream.stored(&reply_to(&keys, &chatter.id)).await.is_empty());
}
