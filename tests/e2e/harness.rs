//! Test harness for ppe-relay end-to-end tests.
//!
//! Everything runs on loopback: upstream relays are plain `RelayServer`s with
//! no policies and an in-memory store, so zap receipts can be seeded into
//! them and bot replies read back out. Invoices use the `msat:<n>` test
//! encoding understood by [`MsatValuator`].

use futures::{SinkExt, StreamExt};
use ppe_relay::event::create_event_channel;
use ppe_relay::payment::{
    AggregatorConfig, InvoiceError, InvoiceValuator, BOLT11_TAG, DESCRIPTION_TAG,
};
use ppe_relay::protocol::{ClientMessage, RelayMessage};
use ppe_relay::record::KIND_ZAP_RECEIPT;
use ppe_relay::store::{EventStore, MemoryStore};
use ppe_relay::upstream::{ReconnectPolicy, WsUpstream};
use ppe_relay::{AdmissionGate, Error, Filter, Keys, Record, RelayServer, UnsignedRecord};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;

/// Default deadline for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Redial quickly so restarted test relays are picked up within a test.
const TEST_RECONNECT: ReconnectPolicy = ReconnectPolicy {
    base: Duration::from_millis(50),
    max: Duration::from_millis(500),
};

/// Error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Websocket error.
    #[error("websocket error: {0}")]
    Ws(String),

    /// Relay error.
    #[error("relay error: {0}")]
    Relay(#[from] Error),

    /// Nothing arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Values invoices of the form `msat:<n>`.
pub struct MsatValuator;

impl InvoiceValuator for MsatValuator {
    fn amount_msats(&self, invoice: &str) -> std::result::Result<u64, InvoiceError> {
        invoice
            .strip_prefix("msat:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| InvoiceError::Malformed(invoice.to_string()))
    }
}

/// The identities every scenario needs.
pub struct TestKeys {
    /// Receives zaps.
    pub operator: Keys,
    /// Signs balance replies.
    pub bot: Keys,
    /// Signs zap receipts (the payment processor).
    pub issuer: Keys,
    /// Pays and posts.
    pub payer: Keys,
}

impl TestKeys {
    /// Fresh random identities.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            operator: Keys::generate(),
            bot: Keys::generate(),
            issuer: Keys::generate(),
            payer: Keys::generate(),
        }
    }

    /// A receipt for a zap from the payer to the operator.
    pub fn zap(&self, invoice: &str) -> Record {
        zap_receipt(&self.issuer, &self.operator, self.payer.public_key(), invoice)
    }
}

/// A zap receipt signed by `issuer` for a payment from `payer` to `operator`.
pub fn zap_receipt(issuer: &Keys, operator: &Keys, payer: &str, invoice: &str) -> Record {
    let request = serde_json::json!({
        "pubkey": payer,
        "kind": 9734,
        "content": "",
        "tags": [["p", operator.public_key()]],
    });
    UnsignedRecord::new(KIND_ZAP_RECEIPT, "")
        .tag(["p", operator.public_key()])
        .tag([BOLT11_TAG, invoice])
        .tag([DESCRIPTION_TAG.to_string(), request.to_string()])
        .sign(issuer)
        .expect("sign zap receipt")
}

/// A text note by `author`.
pub fn note(author: &Keys, content: &str) -> Record {
    UnsignedRecord::new(1, content)
        .sign(author)
        .expect("sign note")
}

/// A text note by `author` mentioning `operator`.
pub fn mention(author: &Keys, operator: &Keys, content: &str) -> Record {
    UnsignedRecord::new(1, content)
        .tag(["p", operator.public_key()])
        .sign(author)
        .expect("sign mention")
}

/// A policy-free relay on loopback standing in for a public upstream relay.
pub struct UpstreamRelay {
    server: Arc<RelayServer>,
    store: Arc<MemoryStore>,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl UpstreamRelay {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let (events, _rx) = create_event_channel();
        let server = Arc::new(RelayServer::new(store.clone(), events));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&server).serve(listener, shutdown_rx));
        info!("Upstream test relay on {addr}");
        Ok(Self {
            server,
            store,
            addr,
            shutdown,
        })
    }

    /// Drop every connection and serve the same store again on the same
    /// address, as a public relay does after a restart.
    pub async fn restart(&mut self) -> Result<()> {
        let _ = self.shutdown.send(true);

        // The old listener is released once its accept loop sees shutdown.
        let rebind = async {
            loop {
                match TcpListener::bind(self.addr).await {
                    Ok(listener) => return listener,
                    Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                }
            }
        };
        let listener = tokio::time::timeout(TEST_TIMEOUT, rebind)
            .await
            .map_err(|_| HarnessError::Timeout(format!("rebinding {}", self.addr)))?;

        let (events, _rx) = create_event_channel();
        let server = Arc::new(RelayServer::new(self.store.clone(), events));
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&server).serve(listener, shutdown_rx));
        info!("Upstream test relay restarted on {}", self.addr);
        self.server = server;
        self.shutdown = shutdown;
        Ok(())
    }

    /// The relay's websocket URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Store records as if they had been published by their authors.
    pub async fn seed(&self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            let reply = self.server.handle_event(record).await;
            assert!(
                matches!(reply, RelayMessage::Ok { accepted: true, .. }),
                "seed refused: {reply:?}"
            );
        }
    }

    /// Records currently stored that match `filter`.
    pub async fn stored(&self, filter: &Filter) -> Vec<Record> {
        self.store.query(filter).await.expect("query upstream store")
    }

    /// Poll until a record matching `filter` is stored.
    pub async fn wait_for(&self, filter: &Filter) -> Result<Record> {
        let poll = async {
            loop {
                if let Some(record) = self.stored(filter).await.into_iter().next() {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(TEST_TIMEOUT, poll)
            .await
            .map_err(|_| HarnessError::Timeout(format!("{filter:?}")))
    }
}

impl Drop for UpstreamRelay {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A websocket upstream client over the given test relays.
#[must_use]
pub fn ws_upstream(relays: &[&UpstreamRelay]) -> Arc<WsUpstream> {
    Arc::new(
        WsUpstream::new(
            relays.iter().map(|relay| relay.url()).collect(),
            TEST_TIMEOUT,
            TEST_TIMEOUT,
        )
        .with_reconnect(TEST_RECONNECT),
    )
}

/// An admission gate paying `keys.operator`, reading payments from `relays`.
#[must_use]
pub fn gate(keys: &TestKeys, relays: &[&UpstreamRelay], store: Arc<dyn EventStore>) -> AdmissionGate {
    gate_with_upstream(keys, ws_upstream(relays), store)
}

/// An admission gate paying `keys.operator`, reading payments from `upstream`.
#[must_use]
pub fn gate_with_upstream(
    keys: &TestKeys,
    upstream: Arc<WsUpstream>,
    store: Arc<dyn EventStore>,
) -> AdmissionGate {
    let config = AggregatorConfig {
        query_timeout: TEST_TIMEOUT,
        ..AggregatorConfig::new(keys.operator.public_key())
    };
    AdmissionGate::new(config, upstream, store, Arc::new(MsatValuator))
}

/// A loopback URL nothing listens on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("ws://{addr}")
}

/// A NIP-01 client connection.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| HarnessError::Ws(e.to_string()))?;
        Ok(Self { ws })
    }

    /// Send one message.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.ws
            .send(Message::Text(message.to_json()?))
            .await
            .map_err(|e| HarnessError::Ws(e.to_string()))
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| HarnessError::Ws(e.to_string()))
    }

    /// Receive the next relay message.
    pub async fn recv(&mut self) -> Result<RelayMessage> {
        loop {
            let frame = tokio::time::timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .map_err(|_| HarnessError::Timeout("relay message".to_string()))?
                .ok_or_else(|| HarnessError::Ws("connection closed".to_string()))?
                .map_err(|e| HarnessError::Ws(e.to_string()))?;
            if let Message::Text(text) = frame {
                return Ok(RelayMessage::from_json(&text)?);
            }
        }
    }

    /// Publish `record` and return the `OK` acceptance flag and message.
    pub async fn publish(&mut self, record: &Record) -> Result<(bool, String)> {
        self.send(&ClientMessage::Event(Box::new(record.clone())))
            .await?;
        loop {
            if let RelayMessage::Ok {
                id,
                accepted,
                message,
            } = self.recv().await?
            {
                if id == record.id {
                    return Ok((accepted, message));
                }
            }
        }
    }
}
