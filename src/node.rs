//! Relay runner: wires the store, the upstream client, the admission gate,
//! the websocket server and the command bot together.

use crate::bot::{AnsweredCache, CommandBot};
use crate::config::{RelayConfig, Secrets};
use crate::error::{Error, Result};
use crate::event::{create_event_channel, RelayEvent, RelayEventsChannel, RelayEventsSender};
use crate::payment::{AdmissionGate, AggregatorConfig, Bolt11Valuator, InvoiceValuator, PayerLocks};
use crate::relay::{Base64MediaPolicy, KindPolicy, NoComplexFilters, NoEmptyFilters, RelayServer};
use crate::store::{EventStore, SqliteStore};
use crate::upstream::{Upstream, WsUpstream};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builder for constructing a relay.
pub struct RelayBuilder {
    config: RelayConfig,
    secrets: Secrets,
    upstream: Option<Arc<dyn Upstream>>,
    store: Option<Arc<dyn EventStore>>,
    valuator: Option<Arc<dyn InvoiceValuator>>,
}

impl RelayBuilder {
    /// Create a new relay builder with the given configuration and keys.
    #[must_use]
    pub fn new(config: RelayConfig, secrets: Secrets) -> Self {
        Self {
            config,
            secrets,
            upstream: None,
            store: None,
            valuator: None,
        }
    }

    /// Use `upstream` instead of websocket connections to the configured relays.
    #[must_use]
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Use `store` instead of the SQLite database under the root directory.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `valuator` instead of BOLT-11 decoding.
    #[must_use]
    pub fn with_valuator(mut self, valuator: Arc<dyn InvoiceValuator>) -> Self {
        self.valuator = Some(valuator);
        self
    }

    /// Build the relay and bind its listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, the database or the listener
    /// cannot be set up.
    pub async fn build(self) -> Result<RunningRelay> {
        let config = self.config;
        info!("Building ppe-relay with config: {config:?}");

        std::fs::create_dir_all(&config.root_dir)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let upstream: Arc<dyn Upstream> = match self.upstream {
            Some(upstream) => upstream,
            None => Arc::new(
                WsUpstream::new(
                    config.upstream.relays.clone(),
                    config.upstream.connect_timeout(),
                    config.upstream.ack_timeout(),
                )
                .with_reconnect(config.upstream.reconnect()),
            ),
        };
        let store: Arc<dyn EventStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open(&config.database_path())?),
        };
        let valuator: Arc<dyn InvoiceValuator> = match self.valuator {
            Some(valuator) => valuator,
            None => Arc::new(Bolt11Valuator),
        };

        let gate = Arc::new(AdmissionGate::new(
            AggregatorConfig {
                operator: self.secrets.operator.public_key().to_string(),
                query_timeout: config.upstream.query_timeout(),
                trusted_issuers: config.admission.trusted_zap_issuers.clone(),
            },
            Arc::clone(&upstream),
            Arc::clone(&store),
            valuator,
        ));

        let mut server = RelayServer::new(store, events_tx.clone())
            .with_max_limit(config.queries.max_limit);
        if config.admission.reject_base64_media {
            server = server.with_policy(Arc::new(Base64MediaPolicy));
        }
        server = server
            .with_policy(Arc::new(KindPolicy::new(config.admission.allowed_kinds.clone())))
            .with_policy(gate.clone());
        if config.queries.reject_empty_filters {
            server = server.with_filter_policy(Arc::new(NoEmptyFilters));
        }
        if config.queries.reject_complex_filters {
            server = server.with_filter_policy(Arc::new(NoComplexFilters));
        }
        if config.admission.serialize_per_payer {
            server = server.with_payer_locks(PayerLocks::with_capacity(
                config.admission.payer_lock_capacity,
            ));
        } else {
            warn!("Per-payer serialization disabled - concurrent submissions may overspend");
        }

        let bot = config.bot.enabled.then(|| {
            Arc::new(
                CommandBot::new(gate, upstream, self.secrets.bot.clone(), events_tx.clone())
                    .with_lookup_timeout(config.upstream.lookup_timeout())
                    .with_answered_cache(AnsweredCache::with_capacity(
                        config.bot.answered_cache_capacity,
                    )),
            )
        });

        let address = SocketAddr::new(config.bind, config.port);
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| Error::Startup(format!("cannot bind {address}: {e}")))?;
        let local_addr = listener.local_addr()?;

        Ok(RunningRelay {
            config,
            server: Arc::new(server),
            bot,
            listener: Some(listener),
            local_addr,
            shutdown_tx,
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// A relay with a bound listener.
pub struct RunningRelay {
    config: RelayConfig,
    server: Arc<RelayServer>,
    bot: Option<Arc<CommandBot>>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: RelayEventsSender,
    events_rx: Option<RelayEventsChannel>,
}

impl RunningRelay {
    /// Get the relay's root directory.
    #[must_use]
    pub fn root_dir(&self) -> &PathBuf {
        &self.config.root_dir
    }

    /// Address the websocket listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The relay's write and read paths.
    #[must_use]
    pub fn server(&self) -> &Arc<RelayServer> {
        &self.server
    }

    /// The command bot, if enabled.
    #[must_use]
    pub fn bot(&self) -> Option<&Arc<CommandBot>> {
        self.bot.as_ref()
    }

    /// Get a receiver for relay events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<RelayEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to relay events.
    #[must_use]
    pub fn subscribe_events(&self) -> RelayEventsChannel {
        self.events_tx.subscribe()
    }

    /// A handle that stops the relay when set to `true`.
    #[must_use]
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run the relay until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay has already been run.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::Startup("relay has already been run".to_string()))?;
        info!("Starting ppe-relay on ws://{}", self.local_addr);

        let server_task = tokio::spawn(
            Arc::clone(&self.server).serve(listener, self.shutdown_rx.clone()),
        );

        let bot_task = self.bot.as_ref().map(|bot| {
            let bot = Arc::clone(bot);
            let shutdown_rx = self.shutdown_rx.clone();
            tokio::spawn(async move { bot.run(shutdown_rx).await })
        });

        let _ = self.events_tx.send(RelayEvent::Started {
            address: self.local_addr.to_string(),
        });

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    self.shutdown();
                    break;
                }
            }
        }

        let _ = self.events_tx.send(RelayEvent::ShuttingDown);
        if let Err(e) = server_task.await {
            warn!("Relay server task failed: {e}");
        }
        if let Some(task) = bot_task {
            if let Err(e) = task.await {
                warn!("Command bot task failed: {e}");
            }
        }
        info!("Relay shutdown complete");
        Ok(())
    }

    /// Request the relay to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
