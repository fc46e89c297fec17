//! NIP-01 websocket client for upstream relays.

use super::{PublishReport, Subscription, Upstream};
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, RelayMessage};
use crate::record::{Filter, Record};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHANNEL_CAPACITY: usize = 256;

/// First delay before redialing a relay that dropped a live subscription.
const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
/// Longest delay between redials.
const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(0);

fn subscription_id() -> String {
    format!("ppe-{}", NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
}

/// Whether a reader stops at end-of-stored-records or keeps streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Stored,
    Live,
}

/// Delays between redials of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure; doubles on each further failure.
    pub base: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_RECONNECT_BASE,
            max: DEFAULT_RECONNECT_MAX,
        }
    }
}

struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
}

impl Backoff {
    const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.policy.max);
        self.current = next.min(self.policy.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.policy.base;
    }
}

/// Upstream access over one websocket per endpoint per call.
///
/// Connections are not pooled: every fetch, lookup and publish dials each
/// endpoint afresh and hangs up when done. Live subscriptions redial an
/// endpoint whenever it drops them.
#[derive(Debug, Clone)]
pub struct WsUpstream {
    endpoints: Vec<String>,
    connect_timeout: Duration,
    ack_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl WsUpstream {
    /// Create a client for the given endpoint URLs.
    #[must_use]
    pub fn new(endpoints: Vec<String>, connect_timeout: Duration, ack_timeout: Duration) -> Self {
        if endpoints.is_empty() {
            warn!("No upstream relays configured - no payments will ever be found");
        } else {
            info!("Upstream client configured with {} relays", endpoints.len());
        }
        Self {
            endpoints,
            connect_timeout,
            ack_timeout,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Override the redial delays of live subscriptions.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    fn spawn_readers(&self, filter: &Filter, mode: Mode, tx: &mpsc::Sender<Record>) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for url in &self.endpoints {
            let url = url.clone();
            let filter = filter.clone();
            let tx = tx.clone();
            let connect_timeout = self.connect_timeout;
            let reconnect = self.reconnect;
            tasks.spawn(async move {
                match mode {
                    Mode::Stored => {
                        let outcome = read_endpoint(&url, &filter, connect_timeout, tx).await;
                        if let Err(e) = outcome {
                            warn!("Upstream {url}: {e}");
                        }
                    }
                    Mode::Live => {
                        follow_endpoint(&url, &filter, connect_timeout, reconnect, tx).await;
                    }
                }
            });
        }
        tasks
    }
}

#[async_trait]
impl Upstream for WsUpstream {
    fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn fetch(&self, filter: &Filter, timeout: Duration) -> Vec<Record> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let tasks = self.spawn_readers(filter, Mode::Stored, &tx);
        drop(tx);

        let deadline = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(deadline);

        let mut records = Vec::new();
        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(record) => records.push(record),
                    None => break,
                },
                () = &mut deadline => {
                    warn!(
                        "Upstream fetch hit its {:?} deadline, continuing with {} records",
                        timeout,
                        records.len()
                    );
                    break;
                }
            }
        }

        // Aborts readers still waiting on slow endpoints.
        drop(tasks);
        records
    }

    async fn first_match(&self, filter: &Filter, timeout: Duration) -> Option<Record> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let tasks = self.spawn_readers(filter, Mode::Stored, &tx);
        drop(tx);

        let found = tokio::time::timeout(timeout, rx.recv())
            .await
            .unwrap_or_else(|_| {
                warn!("Upstream lookup hit its {timeout:?} deadline");
                None
            });
        drop(tasks);
        found
    }

    async fn subscribe(&self, filter: &Filter) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let tasks = self.spawn_readers(filter, Mode::Live, &tx);
        Subscription::new(rx, tasks)
    }

    async fn publish(&self, record: &Record) -> PublishReport {
        let attempts = self.endpoints.iter().map(|url| async move {
            let outcome = publish_one(url, record, self.connect_timeout, self.ack_timeout).await;
            (url.clone(), outcome)
        });

        let mut report = PublishReport::default();
        for (url, outcome) in futures::future::join_all(attempts).await {
            match outcome {
                Ok(()) => {
                    info!("Published {} to {url}", record.id);
                    report.accepted.push(url);
                }
                Err(e) => {
                    warn!("Publishing {} to {url} failed: {e}", record.id);
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        report
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<WsStream> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(Error::Network(format!("connect failed: {e}"))),
        Err(_) => Err(Error::Network("connect timed out".to_string())),
    }
}

async fn send_text(ws: &mut WsStream, text: String) -> Result<()> {
    ws.send(Message::Text(text))
        .await
        .map_err(|e| Error::Network(format!("send failed: {e}")))
}

/// Dial `url` and open a subscription for `filter`.
async fn open_subscription(
    url: &str,
    filter: &Filter,
    connect_timeout: Duration,
) -> Result<(WsStream, String)> {
    let mut ws = connect(url, connect_timeout).await?;
    let sub_id = subscription_id();
    let req = ClientMessage::Req {
        subscription_id: sub_id.clone(),
        filters: vec![filter.clone()],
    };
    send_text(&mut ws, req.to_json()?).await?;
    Ok((ws, sub_id))
}

/// Read stored records from `url` until its EOSE.
async fn read_endpoint(
    url: &str,
    filter: &Filter,
    connect_timeout: Duration,
    tx: mpsc::Sender<Record>,
) -> Result<()> {
    let (ws, sub_id) = open_subscription(url, filter, connect_timeout).await?;
    read_subscription(ws, sub_id, url, filter, Mode::Stored, &tx).await
}

/// Keep a live subscription on `url` open until the consumer goes away.
///
/// Ends when the receiver is dropped; the owning `JoinSet` aborts it
/// otherwise.
async fn follow_endpoint(
    url: &str,
    filter: &Filter,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<Record>,
) {
    let mut backoff = Backoff::new(policy);
    loop {
        let attempt_start = Instant::now();
        match open_subscription(url, filter, connect_timeout).await {
            Ok((ws, sub_id)) => {
                backoff.reset();
                match read_subscription(ws, sub_id, url, filter, Mode::Live, &tx).await {
                    Ok(()) => info!("Upstream {url} ended the live subscription"),
                    Err(e) => warn!("Upstream {url} dropped the live subscription: {e}"),
                }
            }
            Err(e) => warn!("Upstream {url}: {e}"),
        }

        if tx.is_closed() {
            break;
        }

        let delay = backoff.next_delay();
        let elapsed = attempt_start.elapsed();
        if delay > elapsed {
            tokio::time::sleep(delay - elapsed).await;
        }
        debug!("Upstream {url}: resubscribing");
    }
}

async fn read_subscription(
    mut ws: WsStream,
    sub_id: String,
    url: &str,
    filter: &Filter,
    mode: Mode,
    tx: &mpsc::Sender<Record>,
) -> Result<()> {
    while let Some(frame) = ws.next().await {
        let text = match frame.map_err(|e| Error::Network(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match RelayMessage::from_json(&text) {
            Ok(RelayMessage::Event {
                subscription_id,
                record,
            }) if subscription_id == sub_id => {
                if !filter.matches(&record) {
                    debug!("Upstream {url}: dropping {} outside the filter", record.id);
                    continue;
                }
                if let Err(e) = record.verify() {
                    debug!("Upstream {url}: dropping {e}");
                    continue;
                }
                if tx.send(*record).await.is_err() {
                    // Consumer is gone.
                    break;
                }
            }
            Ok(RelayMessage::Eose(id)) if id == sub_id => {
                if mode == Mode::Stored {
                    break;
                }
                debug!("Upstream {url}: stored records delivered, streaming live");
            }
            Ok(RelayMessage::Closed {
                subscription_id,
                message,
            }) if subscription_id == sub_id => {
                return Err(Error::Network(format!("subscription closed: {message}")));
            }
            Ok(RelayMessage::Notice(message)) => debug!("Upstream {url} notice: {message}"),
            Ok(_) => {}
            Err(e) => debug!("Upstream {url}: ignoring frame: {e}"),
        }
    }

    let close = ClientMessage::Close(sub_id).to_json()?;
    let _ = ws.send(Message::Text(close)).await;
    let _ = ws.close(None).await;
    Ok(())
}


async fn publish_one(
    url: &str,
    record: &Record,
    connect_timeout: Duration,
    ack_timeout: Duration,
) -> Result<()> {
    let mut ws = connect(url, connect_timeout).await?;
    send_text(&mut ws, ClientMessage::Event(Box::new(record.clone())).to_json()?).await?;

    let ack = tokio::time::timeout(ack_timeout, await_ack(&mut ws, &record.id)).await;
    let _ = ws.close(None).await;

    let (accepted, message) = ack.map_err(|_| Error::Network("no acknowledgement".to_string()))??;
    if accepted {
        Ok(())
    } else {
        Err(Error::Network(format!("rejected: {message}")))
    }
}

async fn await_ack(ws: &mut WsStream, id: &str) -> Result<(bool, String)> {
    while let Some(frame) = ws.next().await {
        let Message::Text(text) = frame.map_err(|e| Error::Network(e.to_string()))? else {
            continue;
        };
        if let Ok(RelayMessage::Ok {
            id: acked,
            accepted,
            message,
        }) = RelayMessage::from_json(&text)
        {
            if acked == id {
                return Ok((accepted, message));
            }
        }
    }
    Err(Error::Network(
        "connection closed before acknowledgement".to_string(),
    ))
}
