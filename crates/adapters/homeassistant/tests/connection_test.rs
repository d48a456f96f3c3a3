//! Connection tests against a scripted fake hub.
//!
//! The fake hub speaks the websocket protocol on `127.0.0.1:0`, records
//! every request it receives and can be told to push events, drop the
//! connection or go silent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use automoli_adapter_homeassistant::{ConnectionSettings, HomeAssistant, HomeAssistantConfig, HubError};
use automoli_app::ports::ServiceCaller;
use automoli_app::state_cache::StateCache;
use automoli_domain::entity_id::EntityId;
use automoli_domain::error::AutomoliError;
use automoli_domain::event::EventType;
use automoli_domain::service::{Service, ServiceCall, ServiceData};

const TOKEN: &str = "let-me-in";

#[derive(Debug, Clone)]
enum Command {
    Event(Value),
    Drop,
    Silence,
}

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    /// New sessions authenticate and then ignore every request.
    mute: AtomicBool,
}

impl Recorded {
    fn count(&self, kind: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request["type"] == kind)
            .count()
    }

    fn last(&self, kind: &str) -> Option<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|request| request["type"] == kind)
            .cloned()
    }
}

struct FakeHub {
    url: String,
    recorded: Arc<Recorded>,
    commands: broadcast::Sender<Command>,
}

impl FakeHub {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let recorded = Arc::new(Recorded::default());
        let (commands, _) = broadcast::channel(16);

        let accept_recorded = recorded.clone();
        let accept_commands = commands.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(session(
                    stream,
                    accept_recorded.clone(),
                    accept_commands.subscribe(),
                ));
            }
        });

        Self {
            url,
            recorded,
            commands,
        }
    }

    fn settings(&self, token: &str) -> ConnectionSettings {
        HomeAssistantConfig {
            url: self.url.clone(),
            token: token.to_string(),
            connect_timeout_secs: 2,
            watchdog_max_age_secs: 2,
            watchdog_check_every_secs: 1,
            backoff_cap_secs: 1,
            event_buffer: 16,
        }
        .settings()
        .unwrap()
    }

    fn command(&self, command: Command) {
        let _ = self.commands.send(command);
    }

    fn connections(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    fn mute_new_sessions(&self) {
        self.recorded.mute.store(true, Ordering::SeqCst);
    }
}

type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

async fn send(sink: &mut ServerSink, frame: Value) {
    let _ = sink.send(Message::Text(frame.to_string())).await;
}

fn state(entity_id: &str, value: &str) -> Value {
    json!({
        "entity_id": entity_id,
        "state": value,
        "last_changed": "2024-01-08T18:01:02Z",
        "last_updated": "2024-01-08T18:01:02Z",
        "attributes": {"friendly_name": entity_id}
    })
}

fn state_changed(entity_id: &str, value: &str) -> Value {
    json!({
        "event_type": "state_changed",
        "origin": "LOCAL",
        "time_fired": "2024-01-08T18:01:02Z",
        "data": {"entity_id": entity_id, "new_state": state(entity_id, value)}
    })
}

fn reply(request: &Value, connection: usize) -> Value {
    let id = request["id"].clone();
    match request["type"].as_str() {
        Some("get_states") => {
            // the kitchen light is on from the second connection onwards
            let kitchen = if connection > 1 { "on" } else { "off" };
            json!({
                "id": id, "type": "result", "success": true,
                "result": [state("light.kitchen", kitchen), state("binary_sensor.hall", "off")]
            })
        }
        Some("call_service") if request["service"] == "toggle" => json!({
            "id": id, "type": "result", "success": false,
            "error": {"code": "not_supported", "message": "toggle refused"}
        }),
        Some("ping") => json!({"id": id, "type": "pong"}),
        _ => json!({"id": id, "type": "result", "success": true, "result": null}),
    }
}

async fn session(stream: TcpStream, recorded: Arc<Recorded>, mut commands: broadcast::Receiver<Command>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();

    send(&mut sink, json!({"type": "auth_required", "ha_version": "2024.1.0"})).await;
    let Some(Ok(Message::Text(auth))) = source.next().await else {
        return;
    };
    let auth: Value = serde_json::from_str(&auth).unwrap();
    if auth["access_token"] != TOKEN {
        send(&mut sink, json!({"type": "auth_invalid", "message": "Invalid access token"})).await;
        let _ = sink.close().await;
        return;
    }
    send(&mut sink, json!({"type": "auth_ok", "ha_version": "2024.1.0"})).await;
    let connection = recorded.connections.fetch_add(1, Ordering::SeqCst) + 1;

    let mut silent = recorded.mute.load(Ordering::SeqCst);
    loop {
        tokio::select! {
            frame = source.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    return;
                };
                if silent {
                    continue;
                }
                let request: Value = serde_json::from_str(&text).unwrap();
                recorded.requests.lock().unwrap().push(request.clone());
                send(&mut sink, reply(&request, connection)).await;
            }
            command = commands.recv() => match command {
                Ok(Command::Event(event)) => {
                    send(&mut sink, json!({"id": 1, "type": "event", "event": event})).await;
                }
                Ok(Command::Drop) | Err(_) => {
                    let _ = sink.close().await;
                    return;
                }
                Ok(Command::Silence) => silent = true,
            }
        }
    }
}

async fn eventually(what: &str, timeout: Duration, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn id(raw: &str) -> EntityId {
    EntityId::parse(raw).unwrap()
}

#[tokio::test]
async fn should_load_state_snapshot_when_connected() {
    let fake = FakeHub::start().await;
    let cache = Arc::new(StateCache::new());

    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), cache.clone()).await.unwrap();

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.value(&id("light.kitchen")).as_deref(), Some("off"));
    assert_eq!(fake.recorded.count("get_states"), 1);
    assert!(hub.frames_received() >= 3);
    hub.shutdown().await;
}

#[tokio::test]
async fn should_fail_with_authentication_error_when_token_is_rejected() {
    let fake = FakeHub::start().await;

    let result = HomeAssistant::connect(fake.settings("wrong"), Arc::new(StateCache::new())).await;

    let Err(HubError::AuthenticationFailed(message)) = result else {
        panic!("expected authentication failure");
    };
    assert_eq!(message, "Invalid access token");
}

#[tokio::test]
async fn should_fail_when_nothing_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let settings = HomeAssistantConfig {
        url: format!("http://{addr}"),
        token: TOKEN.to_string(),
        connect_timeout_secs: 1,
        ..HomeAssistantConfig::default()
    }
    .settings()
    .unwrap();

    let result = HomeAssistant::connect(settings, Arc::new(StateCache::new())).await;

    assert!(matches!(result, Err(HubError::Transport(_) | HubError::Timeout(_))));
}

#[tokio::test]
async fn should_resolve_service_call_when_hub_acknowledges() {
    let fake = FakeHub::start().await;
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new()))
        .await
        .unwrap();

    let mut data = ServiceData::new();
    data.insert("brightness_pct".to_string(), json!(42));
    hub.call_service(ServiceCall::new(Service::TurnOn, id("light.kitchen"), data))
        .await
        .unwrap();

    let request = fake.recorded.last("call_service").unwrap();
    assert_eq!(request["domain"], "light");
    assert_eq!(request["service"], "turn_on");
    assert_eq!(request["service_data"]["brightness_pct"], 42);
    assert_eq!(request["target"]["entity_id"], "light.kitchen");
    hub.shutdown().await;
}

#[tokio::test]
async fn should_return_hub_error_when_service_call_is_rejected() {
    let fake = FakeHub::start().await;
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new()))
        .await
        .unwrap();

    let result = hub
        .call_service(ServiceCall::new(Service::Toggle, id("light.kitchen"), ServiceData::new()))
        .await;

    assert!(matches!(result, Err(AutomoliError::Hub(_))));
    hub.shutdown().await;
}

#[tokio::test]
async fn should_forward_only_subscribed_events_when_they_arrive() {
    let fake = FakeHub::start().await;
    let cache = Arc::new(StateCache::new());
    let (hub, mut events) = HomeAssistant::connect(fake.settings(TOKEN), cache.clone()).await.unwrap();

    assert!(hub.subscribe(EventType::xiaomi_motion()).await.unwrap());
    assert!(!hub.subscribe(EventType::xiaomi_motion()).await.unwrap());
    assert_eq!(fake.recorded.count("subscribe_events"), 1);

    // state_changed is not subscribed: it patches the cache but is not forwarded
    fake.command(Command::Event(state_changed("binary_sensor.hall", "on")));
    fake.command(Command::Event(json!({
        "event_type": "xiaomi_aqara.motion",
        "time_fired": "2024-01-08T18:01:03Z",
        "data": {"entity_id": "binary_sensor.hall"}
    })));

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, EventType::xiaomi_motion());
    assert_eq!(event.entity_id(), Some(&id("binary_sensor.hall")));
    assert_eq!(cache.value(&id("binary_sensor.hall")).as_deref(), Some("on"));
    hub.shutdown().await;
}

#[tokio::test]
async fn should_resubscribe_and_reload_states_when_connection_drops() {
    let fake = FakeHub::start().await;
    let cache = Arc::new(StateCache::new());
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), cache.clone()).await.unwrap();
    hub.subscribe(EventType::state_changed()).await.unwrap();
    assert_eq!(cache.value(&id("light.kitchen")).as_deref(), Some("off"));

    fake.command(Command::Drop);

    eventually("second connection", Duration::from_secs(5), || {
        fake.connections() == 2 && fake.recorded.count("subscribe_events") == 2
    })
    .await;
    eventually("reloaded snapshot", Duration::from_secs(2), || {
        cache.value(&id("light.kitchen")).as_deref() == Some("on")
    })
    .await;
    eventually("resubscribed", Duration::from_secs(2), || {
        hub.subscriptions().active() == vec![EventType::state_changed()]
    })
    .await;
    assert_eq!(fake.recorded.count("get_states"), 2);
    hub.shutdown().await;
}

#[tokio::test]
async fn should_reconnect_when_hub_goes_silent() {
    let fake = FakeHub::start().await;
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new()))
        .await
        .unwrap();

    fake.command(Command::Silence);

    eventually("watchdog reconnect", Duration::from_secs(10), || fake.connections() == 2).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn should_keep_quiet_connection_alive_with_pings() {
    let fake = FakeHub::start().await;
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;

    assert_eq!(fake.connections(), 1);
    assert!(fake.recorded.count("ping") >= 1);
    hub.shutdown().await;
}

#[tokio::test]
async fn should_fail_connect_when_hub_goes_silent_after_auth() {
    let fake = FakeHub::start().await;
    fake.mute_new_sessions();

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new())),
    )
    .await
    .expect("connect must not hang");

    assert!(matches!(result, Err(HubError::Timeout(_))));
    assert_eq!(fake.connections(), 1);
}

#[tokio::test]
async fn should_keep_retrying_when_reconnected_hub_stays_silent() {
    let fake = FakeHub::start().await;
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), Arc::new(StateCache::new()))
        .await
        .unwrap();

    fake.mute_new_sessions();
    fake.command(Command::Drop);

    eventually("repeated reconnect attempts", Duration::from_secs(10), || {
        fake.connections() >= 3
    })
    .await;
    hub.shutdown().await;
}

#[tokio::test]
async fn should_fail_pending_call_with_connection_closed_when_connection_drops() {
    let fake = FakeHub::start().await;
    let cache = Arc::new(StateCache::new());
    let (hub, _events) = HomeAssistant::connect(fake.settings(TOKEN), cache.clone()).await.unwrap();
    hub.subscribe(EventType::state_changed()).await.unwrap();

    fake.command(Command::Silence);
    let pending = tokio::spawn({
        let hub = hub.clone();
        async move {
            hub.call_service(ServiceCall::new(Service::TurnOn, id("light.kitchen"), ServiceData::new()))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    // the next epoch never gets past its snapshot, so teardown state stays visible
    fake.mute_new_sessions();
    fake.command(Command::Drop);

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    let Err(AutomoliError::Hub(err)) = result else {
        panic!("expected hub error");
    };
    assert!(matches!(
        err.downcast_ref::<HubError>(),
        Some(HubError::ConnectionClosed)
    ));
    assert!(hub.subscriptions().active().is_empty());
    assert!(hub.subscriptions().is_desired(&EventType::state_changed()));
    assert!(cache.is_empty());
    hub.shutdown().await;
}
