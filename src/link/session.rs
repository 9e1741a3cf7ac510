use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::LinkConfig;
use crate::error::{DecodeError, LinkError};
use crate::protocol::{decode_binary, decode_text, Inbound};
use crate::settings::{SettingsStore, ENDPOINT_KEY};
use crate::store::{LinkEvent, Notice, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub reconnect_interval: Duration,
    pub endpoint_change_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for LinkOptions {
    fn from(config: &LinkConfig) -> Self {
        Self {
            reconnect_interval: config.reconnect_interval(),
            endpoint_change_delay: config.endpoint_change_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Outcome of [`GcsLink::change_endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointChange {
    Unchanged,
    Cancelled,
    Switched,
}

pub(super) struct ReconnectTimer {
    pub(super) serial: u64,
    handle: JoinHandle<()>,
}

pub(super) struct Session {
    pub(super) state: LinkState,
    pub(super) endpoint: String,
    /// Bumped on every dial and every disconnect; callbacks from an older
    /// connection compare against it and bail out.
    pub(super) generation: u64,
    pub(super) outbound: Option<UnboundedSender<Message>>,
    connection: Option<JoinHandle<()>>,
    pub(super) reconnect: Option<ReconnectTimer>,
    timers_started: u64,
}

#[derive(Clone)]
pub struct GcsLink {
    pub(super) store: Store,
    settings: Arc<dyn SettingsStore>,
    options: LinkOptions,
    pub(super) session: Arc<Mutex<Session>>,
}

impl GcsLink {
    /// Uses the persisted endpoint when there is a usable one.
    pub fn new(
        store: Store,
        settings: Arc<dyn SettingsStore>,
        options: LinkOptions,
        default_endpoint: &str,
    ) -> Self {
        let endpoint = match settings.load(ENDPOINT_KEY) {
            Some(saved) => match validate_endpoint(&saved) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("Ignoring saved endpoint: {}", e);
                    default_endpoint.trim().to_string()
                }
            },
            None => default_endpoint.trim().to_string(),
        };
        info!("Backend endpoint: {}", endpoint);

        Self {
            store,
            settings,
            options,
            session: Arc::new(Mutex::new(Session {
                state: LinkState::Disconnected,
                endpoint,
                generation: 0,
                outbound: None,
                connection: None,
                reconnect: None,
                timers_started: 0,
            })),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(super) fn lock(&self) -> Result<MutexGuard<'_, Session>> {
        self.session.lock().map_err(|e| anyhow!("Lock error: {}", e))
    }

    pub fn state(&self) -> Result<LinkState> {
        Ok(self.lock()?.state)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), Ok(LinkState::Connected))
    }

    pub fn endpoint(&self) -> Result<String> {
        Ok(self.lock()?.endpoint.clone())
    }

    fn transition(&self, session: &mut Session, next: LinkState) {
        if session.state == next {
            return;
        }
        debug!("Link state {:?} -> {:?}", session.state, next);
        session.state = next;
        self.store.emit(LinkEvent::Connection(next));
    }

    /// Dials the current endpoint. Does nothing while a connection is open or
    /// being opened.
    pub fn connect(&self) -> Result<()> {
        let mut session = self.lock()?;
        self.dial(&mut session);
        Ok(())
    }

    /// One retry from timer `serial`. Returns false once that timer has been
    /// stopped or replaced, so a tick that raced a teardown never dials.
    pub(super) fn reconnect_tick(&self, serial: u64) -> Result<bool> {
        let mut session = self.lock()?;
        if session.reconnect.as_ref().map(|timer| timer.serial) != Some(serial) {
            debug!("Reconnect timer {} is no longer current", serial);
            return Ok(false);
        }
        self.dial(&mut session);
        Ok(true)
    }

    fn dial(&self, session: &mut Session) {
        if matches!(session.state, LinkState::Connected | LinkState::Connecting) {
            debug!("Connect ignored in state {:?}", session.state);
            return;
        }

        session.generation += 1;
        let generation = session.generation;
        let endpoint = session.endpoint.clone();
        info!("Connecting to {}", endpoint);
        self.transition(session, LinkState::Connecting);

        let link = self.clone();
        session.connection = Some(tokio::spawn(async move {
            link.run_connection(generation, endpoint).await;
        }));
    }

    async fn run_connection(self, generation: u64, endpoint: String) {
        let socket = match timeout(self.options.connect_timeout, connect_async(endpoint.as_str()))
            .await
        {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(e)) => {
                self.on_transport_down(generation, &format!("connect failed: {}", e));
                return;
            }
            Err(_) => {
                self.on_transport_down(generation, "connect timed out");
                return;
            }
        };

        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("Failed to send frame: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        if !self.on_open(generation, tx) {
            writer.abort();
            return;
        }

        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("closed by backend ({}: {})", frame.code, frame.reason),
                        None => "closed by backend".to_string(),
                    };
                }
                Some(Ok(message)) => {
                    if !self.on_frame(generation, message) {
                        return;
                    }
                }
                Some(Err(e)) => break format!("transport error: {}", e),
                None => break "stream ended".to_string(),
            }
        };
        self.on_transport_down(generation, &reason);
    }

    fn on_open(&self, generation: u64, outbound: UnboundedSender<Message>) -> bool {
        match self.open_session(generation, outbound) {
            Ok(opened) => opened,
            Err(e) => {
                error!("Failed to open session: {}", e);
                false
            }
        }
    }

    pub(super) fn open_session(
        &self,
        generation: u64,
        outbound: UnboundedSender<Message>,
    ) -> Result<bool> {
        {
            let mut session = self.lock()?;
            if session.generation != generation {
                debug!("Dropping stale connection (generation {})", generation);
                return Ok(false);
            }
            if let Some(timer) = session.reconnect.take() {
                debug!("Stopping reconnect timer {}", timer.serial);
                timer.handle.abort();
            }
            session.outbound = Some(outbound);
            info!("Connected to {}", session.endpoint);
            self.transition(&mut session, LinkState::Connected);
        }

        self.store.notify(Notice::success("Backend connected"));
        self.connect_vehicle();
        Ok(true)
    }

    /// Decodes and applies one frame. Returns false once the connection that
    /// produced it has been replaced.
    pub(super) fn on_frame(&self, generation: u64, message: Message) -> bool {
        let decoded = match decode_frame(message) {
            Err(DecodeError::Unsupported) => return true,
            other => other,
        };

        let session = match self.lock() {
            Ok(session) => session,
            Err(e) => {
                error!("Dropping frame: {}", e);
                return true;
            }
        };
        if session.generation != generation {
            return false;
        }
        match decoded {
            Ok(inbound) => {
                let kind = inbound.kind().to_string();
                if let Err(e) = self.store.dispatch(inbound) {
                    error!("Failed to apply {}: {}", kind, e);
                }
            }
            Err(e) => warn!("Dropping malformed frame: {}", e),
        }
        true
    }

    pub(super) fn on_transport_down(&self, generation: u64, reason: &str) {
        if let Err(e) = self.handle_transport_down(generation, reason) {
            error!("Failed to handle lost connection: {}", e);
        }
    }

    fn handle_transport_down(&self, generation: u64, reason: &str) -> Result<()> {
        let mut session = self.lock()?;
        if session.generation != generation {
            debug!("Ignoring close of stale connection: {}", reason);
            return Ok(());
        }

        let was_connected = session.state == LinkState::Connected;
        warn!("Link to {} down: {}", session.endpoint, reason);
        session.outbound = None;
        session.connection = None;
        self.store.set_vehicle_connected(false)?;

        if session.reconnect.is_none() {
            session.timers_started += 1;
            let serial = session.timers_started;
            info!(
                "Retrying {} every {:?}",
                session.endpoint, self.options.reconnect_interval
            );
            session.reconnect = Some(ReconnectTimer {
                serial,
                handle: self.spawn_reconnect_timer(serial),
            });
        }
        self.transition(&mut session, LinkState::ReconnectPending);
        drop(session);

        if was_connected {
            self.store.notify(Notice::warning("Backend connection lost"));
        }
        Ok(())
    }

    fn spawn_reconnect_timer(&self, serial: u64) -> JoinHandle<()> {
        let link = self.clone();
        let period = self.options.reconnect_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match link.reconnect_tick(serial) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => error!("Reconnect attempt failed: {}", e),
                }
            }
        })
    }

    /// Closes the connection and stops retrying.
    pub fn disconnect(&self) -> Result<()> {
        let mut session = self.lock()?;
        self.teardown(&mut session)
    }

    fn teardown(&self, session: &mut Session) -> Result<()> {
        session.generation += 1;
        if let Some(timer) = session.reconnect.take() {
            timer.handle.abort();
        }
        if let Some(connection) = session.connection.take() {
            connection.abort();
        }
        // Dropping the sender lets the writer flush and send a close frame.
        session.outbound = None;
        self.store.set_vehicle_connected(false)?;
        if session.state != LinkState::Disconnected {
            info!("Disconnected from {}", session.endpoint);
        }
        self.transition(session, LinkState::Disconnected);
        Ok(())
    }

    /// Points the link at a new backend, persists it and reconnects.
    ///
    /// When a connection is open, `confirm` is asked first with a prompt
    /// describing the switch.
    pub async fn change_endpoint<F>(&self, endpoint: &str, confirm: F) -> Result<EndpointChange>
    where
        F: FnOnce(&str) -> bool,
    {
        let endpoint = validate_endpoint(endpoint)?;
        let (current, connected) = {
            let session = self.lock()?;
            (session.endpoint.clone(), session.state == LinkState::Connected)
        };

        if endpoint == current {
            self.store.notify(Notice::info("Backend address unchanged"));
            return Ok(EndpointChange::Unchanged);
        }

        if connected {
            let prompt = format!(
                "Switching to {} drops the connection to {}. Continue?",
                endpoint, current
            );
            if !confirm(&prompt) {
                info!("Endpoint change to {} cancelled", endpoint);
                return Ok(EndpointChange::Cancelled);
            }
        }

        self.settings
            .save(ENDPOINT_KEY, &endpoint)
            .map_err(LinkError::Settings)?;
        {
            // Teardown and address swap share one critical section.
            let mut session = self.lock()?;
            self.teardown(&mut session)?;
            session.endpoint = endpoint.clone();
        }
        info!("Backend endpoint changed to {}", endpoint);
        self.store.emit(LinkEvent::EndpointChanged(endpoint.clone()));

        tokio::time::sleep(self.options.endpoint_change_delay).await;
        self.connect()?;
        self.store
            .notify(Notice::success(format!("Backend address set to {}", endpoint)));
        Ok(EndpointChange::Switched)
    }
}

fn decode_frame(message: Message) -> Result<Inbound, DecodeError> {
    match message {
        Message::Text(text) => decode_text(&text),
        Message::Binary(bytes) => decode_binary(bytes),
        // Control frames are answered by tungstenite itself.
        _ => Err(DecodeError::Unsupported),
    }
}

pub(super) fn validate_endpoint(endpoint: &str) -> Result<String, LinkError> {
    let endpoint = endpoint.trim();
    let invalid = |reason: String| LinkError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "ws" {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(endpoint.to_string())
}
