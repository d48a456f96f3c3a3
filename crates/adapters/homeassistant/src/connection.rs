//! Hub connection: handshake, request/response correlation, event intake,
//! watchdog and reconnection.
//!
//! A connection *epoch* starts with a successful handshake and ends when the
//! reader stops (read error, close frame, malformed frame) or the watchdog
//! declares the link stale. The supervisor then tears the epoch down and
//! establishes a new one with exponential backoff.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use automoli_app::ports::ServiceCaller;
use automoli_app::state_cache::StateCache;
use automoli_domain::error::AutomoliError;
use automoli_domain::event::{Event, EventType};
use automoli_domain::service::ServiceCall;
use automoli_domain::state::DeviceState;

use crate::config::ConnectionSettings;
use crate::correlator::Correlator;
use crate::error::HubError;
use crate::messages::{self, AuthMessage, Inbound, Request, ResultMsg};
use crate::subscriptions::Subscriptions;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Delay before the next reconnect attempt after `failures` failed ones.
///
/// `min(cap, 2^failures)` seconds.
#[must_use]
pub fn backoff_delay(failures: u32, cap: Duration) -> Duration {
    let secs = 2_u64.checked_pow(failures).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}

/// Write half of the connection plus the request id allocator.
struct Outbound {
    sink: Option<WsSink>,
    next_id: u64,
}

impl Outbound {
    fn writer(&mut self) -> Result<(u64, &mut WsSink), HubError> {
        let sink = self.sink.as_mut().ok_or(HubError::NotConnected)?;
        let id = self.next_id;
        self.next_id += 1;
        Ok((id, sink))
    }
}

#[derive(Default)]
struct Tasks {
    supervisor: Option<JoinHandle<()>>,
    reader: Option<AbortHandle>,
}

/// A supervised connection to a Home Assistant instance.
pub struct HomeAssistant {
    settings: ConnectionSettings,
    outbound: tokio::sync::Mutex<Outbound>,
    correlator: Correlator,
    subscriptions: Subscriptions,
    cache: Arc<StateCache>,
    events_tx: mpsc::Sender<Event>,
    last_frame: Mutex<Instant>,
    frames_received: AtomicU64,
    tasks: Mutex<Tasks>,
}

impl HomeAssistant {
    /// Connect, authenticate, load the state snapshot and start supervising
    /// the connection.
    ///
    /// Events of subscribed types are delivered on the returned receiver.
    ///
    /// # Errors
    ///
    /// Fails when the first connection epoch cannot be established. Later
    /// failures are retried in the background.
    pub async fn connect(
        settings: ConnectionSettings,
        cache: Arc<StateCache>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Event>), HubError> {
        let (events_tx, events_rx) = mpsc::channel(settings.event_buffer);
        let hub = Arc::new(Self {
            settings,
            outbound: tokio::sync::Mutex::new(Outbound {
                sink: None,
                next_id: 1,
            }),
            correlator: Correlator::new(),
            subscriptions: Subscriptions::new(),
            cache,
            events_tx,
            last_frame: Mutex::new(Instant::now()),
            frames_received: AtomicU64::new(0),
            tasks: Mutex::new(Tasks::default()),
        });

        let reader = hub.establish().await?;
        let supervisor = tokio::spawn(hub.clone().supervise(reader));
        hub.tasks().supervisor = Some(supervisor);
        Ok((hub, events_rx))
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of frames received over all epochs.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Event types that stay subscribed across reconnects.
    #[must_use]
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Subscribe to `event_type` now and after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns the hub's error when the subscription was rejected or the
    /// connection is down; the type is retried on the next reconnect.
    pub async fn subscribe(&self, event_type: EventType) -> Result<bool, HubError> {
        self.subscriptions
            .ensure(event_type, |event_type| self.send_subscribe(event_type))
            .await
    }

    async fn send_subscribe(&self, event_type: EventType) -> Result<(), HubError> {
        let result = self
            .call_and_await(&Request::SubscribeEvents { event_type })
            .await?;
        expect_success(result).map(|_| ())
    }

    /// Fetch the full state snapshot.
    ///
    /// Entries that cannot be decoded are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NoStatesReceived`] when no usable state came back.
    pub async fn get_states(&self) -> Result<Vec<DeviceState>, HubError> {
        let result = expect_success(self.call_and_await(&Request::GetStates).await?)?;
        let serde_json::Value::Array(raw) = result else {
            return Err(HubError::NoStatesReceived);
        };
        let states: Vec<DeviceState> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(state) => Some(state),
                Err(err) => {
                    tracing::warn!(%err, "skipping undecodable state");
                    None
                }
            })
            .collect();
        if states.is_empty() {
            return Err(HubError::NoStatesReceived);
        }
        Ok(states)
    }

    /// Send a request without waiting for its result.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotConnected`] between epochs, or the transport
    /// error when writing fails.
    pub async fn call(&self, request: &Request) -> Result<u64, HubError> {
        let mut outbound = self.outbound.lock().await;
        let (id, sink) = outbound.writer()?;
        let text = messages::encode(id, request).map_err(HubError::Encode)?;
        sink.send(Message::Text(text)).await?;
        Ok(id)
    }

    /// Send a request and wait for the matching `result` frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ConnectionClosed`] when the epoch ends before the
    /// result arrives.
    pub async fn call_and_await(&self, request: &Request) -> Result<ResultMsg, HubError> {
        let (id, pending) = {
            let mut outbound = self.outbound.lock().await;
            let (id, sink) = outbound.writer()?;
            let text = messages::encode(id, request).map_err(HubError::Encode)?;
            let pending = self.correlator.register(id);
            if let Err(err) = sink.send(Message::Text(text)).await {
                self.correlator.forget(id);
                return Err(err.into());
            }
            (id, pending)
        };
        pending.await.map_err(|_| {
            tracing::debug!(id, "pending call dropped by teardown");
            HubError::ConnectionClosed
        })
    }

    /// Stop supervising and close the connection.
    pub async fn shutdown(&self) {
        let (supervisor, reader) = {
            let mut tasks = self.tasks();
            (tasks.supervisor.take(), tasks.reader.take())
        };
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }
        if let Some(reader) = reader {
            reader.abort();
        }
        self.teardown().await;
        tracing::info!("hub connection shut down");
    }

    /// Handshake, spawn the reader, load the snapshot and resubscribe.
    ///
    /// Snapshot and resubscription together are bounded by the watchdog's
    /// maximum frame age.
    async fn establish(self: &Arc<Self>) -> Result<JoinHandle<HubError>, HubError> {
        let timeout = self.settings.connect_timeout;
        let (sink, source) = tokio::time::timeout(timeout, handshake(&self.settings))
            .await
            .map_err(|_| HubError::Timeout(timeout))??;

        {
            let mut outbound = self.outbound.lock().await;
            outbound.sink = Some(sink);
            outbound.next_id = 1;
        }
        self.touch();

        let reader = tokio::spawn(self.clone().read_frames(source));
        self.tasks().reader = Some(reader.abort_handle());

        let max_age = self.settings.watchdog_max_age;
        let synced = tokio::time::timeout(max_age, self.synchronize())
            .await
            .unwrap_or(Err(HubError::Timeout(max_age)));
        if let Err(err) = synced {
            reader.abort();
            self.teardown().await;
            return Err(err);
        }
        Ok(reader)
    }

    async fn synchronize(&self) -> Result<(), HubError> {
        let states = self.get_states().await?;
        let count = states.len();
        self.cache.replace_all(states);

        let resubscribed = self
            .subscriptions
            .resync(|event_type| self.send_subscribe(event_type))
            .await?;
        tracing::info!(states = count, resubscribed, "hub connection established");
        Ok(())
    }

    /// Reader task of one epoch; returns why the epoch ended.
    async fn read_frames(self: Arc<Self>, mut source: WsSource) -> HubError {
        loop {
            let message = match source.next().await {
                None => return HubError::ConnectionClosed,
                Some(Err(err)) => return err.into(),
                Some(Ok(message)) => message,
            };
            self.touch();

            match message {
                Message::Text(text) => match messages::decode(&text) {
                    Ok(frame) => self.dispatch(frame).await,
                    Err(err) => return HubError::Decode(err),
                },
                Message::Close(frame) => {
                    tracing::info!(?frame, "hub closed the connection");
                    return HubError::ConnectionClosed;
                }
                _ => {}
            }
        }
    }

    async fn dispatch(&self, frame: Inbound) {
        match frame {
            Inbound::Result(result) => {
                self.correlator.resolve(result);
            }
            Inbound::Event { id, event } => self.handle_event(id, event).await,
            other => tracing::trace!(kind = other.kind(), "ignoring frame"),
        }
    }

    async fn handle_event(&self, subscription: u64, payload: serde_json::Value) {
        let event: Event = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%err, subscription, "skipping malformed event");
                return;
            }
        };

        if event.event_type.is_state_changed()
            && let Some(new_state) = event.data.new_state.clone()
        {
            self.cache.apply_event(new_state);
        }

        if !self.subscriptions.is_desired(&event.event_type) {
            tracing::debug!(event_type = %event.event_type, "dropping event of unsubscribed type");
            return;
        }
        if self.events_tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    fn touch(&self) {
        *self.last_frame.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    fn last_frame_age(&self) -> Duration {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Watch one epoch, reconnect when it ends, forever.
    async fn supervise(self: Arc<Self>, mut reader: JoinHandle<HubError>) {
        loop {
            let reason = tokio::select! {
                joined = &mut reader => joined.unwrap_or_else(|err| {
                    tracing::error!(%err, "hub reader task failed");
                    HubError::ConnectionClosed
                }),
                stale = self.watchdog() => {
                    reader.abort();
                    stale
                }
            };
            tracing::warn!(error = %reason, "hub connection lost, reconnecting");
            self.teardown().await;
            reader = self.reconnect().await;
        }
    }

    /// Resolves once no frame arrived for longer than the allowed age.
    ///
    /// A quiet but healthy link is nudged with a `ping` so its `pong` keeps
    /// the age low.
    async fn watchdog(&self) -> HubError {
        let check_every = self.settings.watchdog_check_every;
        let mut ticker = tokio::time::interval_at(Instant::now() + check_every, check_every);
        loop {
            ticker.tick().await;
            let age = self.last_frame_age();
            if age > self.settings.watchdog_max_age {
                return HubError::Stale(age);
            }
            if age >= check_every / 2
                && let Err(err) = self.call(&Request::Ping).await
            {
                tracing::debug!(%err, "keepalive ping failed");
            }
        }
    }

    async fn reconnect(self: &Arc<Self>) -> JoinHandle<HubError> {
        let mut failures: u32 = 0;
        loop {
            match self.establish().await {
                Ok(reader) => {
                    tracing::info!(failures, "reconnected to hub");
                    return reader;
                }
                Err(err) => {
                    let delay = backoff_delay(failures, self.settings.backoff_cap);
                    failures = failures.saturating_add(1);
                    tracing::warn!(%err, failures, retry_in = ?delay, "hub connection failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// End the current epoch: close the socket, drop everything that only
    /// held for it.
    async fn teardown(&self) {
        let sink = {
            let mut outbound = self.outbound.lock().await;
            outbound.next_id = 1;
            outbound.sink.take()
        };
        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.settings.connect_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::debug!(%err, "closing websocket failed, dropping it"),
                Err(_) => tracing::debug!("closing websocket timed out, dropping it"),
            }
        }
        self.cache.clear();
        self.subscriptions.clear_active();
        let failed = self.correlator.fail_all();
        if failed > 0 {
            tracing::debug!(failed, "failed pending calls");
        }
    }
}

impl ServiceCaller for HomeAssistant {
    fn call_service(
        &self,
        call: ServiceCall,
    ) -> impl Future<Output = Result<(), AutomoliError>> + Send {
        async move {
            let target = call.target.clone();
            let service = call.service;
            let result = self.call_and_await(&Request::from(call)).await?;
            expect_success(result).map_err(|err| {
                tracing::warn!(%target, %service, %err, "service call rejected");
                err
            })?;
            Ok(())
        }
    }
}

fn expect_success(result: ResultMsg) -> Result<serde_json::Value, HubError> {
    if result.success {
        return Ok(result.result);
    }
    let (code, message) = result
        .error
        .map_or_else(|| ("unknown".to_string(), String::new()), |err| {
            (err.code_text(), err.message)
        });
    Err(HubError::CallFailed { code, message })
}

/// Dial and authenticate.
async fn handshake(settings: &ConnectionSettings) -> Result<(WsSink, WsSource), HubError> {
    let (stream, _response) = tokio_tungstenite::connect_async(settings.url.as_str()).await?;
    let (mut sink, mut source) = stream.split();

    match next_frame(&mut source).await? {
        Inbound::AuthRequired { .. } => {}
        other => {
            return Err(HubError::HandshakeProtocol {
                expected: "auth_required",
                got: other.kind().to_string(),
            });
        }
    }

    let auth = serde_json::to_string(&AuthMessage::new(&settings.token)).map_err(HubError::Encode)?;
    sink.send(Message::Text(auth)).await?;

    match next_frame(&mut source).await? {
        Inbound::AuthOk { ha_version } => {
            tracing::info!(
                url = %settings.url,
                version = ha_version.as_deref().unwrap_or("unknown"),
                "authenticated with hub"
            );
            Ok((sink, source))
        }
        Inbound::AuthInvalid { message } => Err(HubError::AuthenticationFailed(
            message.unwrap_or_else(|| "invalid access token".to_string()),
        )),
        other => Err(HubError::HandshakeProtocol {
            expected: "auth_ok",
            got: other.kind().to_string(),
        }),
    }
}

async fn next_frame(source: &mut WsSource) -> Result<Inbound, HubError> {
    loop {
        match source.next().await {
            None | Some(Ok(Message::Close(_))) => return Err(HubError::ConnectionClosed),
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(Message::Text(text))) => {
                return messages::decode(&text).map_err(HubError::Decode);
            }
            Some(Ok(_)) => {}
        }
    }
}
