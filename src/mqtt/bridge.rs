//! Bridge between an MQTT broker and the characteristics of one service.

use super::subscription::{Subscriber, SubscriptionTable};
use crate::characteristic::{CharacteristicFormat, Service};
use crate::config_parser::{
    MqttBrokerOptions, MqttPublishDescriptor, MqttSubscribeDescriptor, MqttSubscription,
    value_to_string,
};
use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use regex::Regex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_millis(1000);
const REQUEST_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A connection error occurred; the client retries unless it was ended.
    Errored,
}

/// Lifecycle notifications of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected,
    Error(String),
    Disconnected,
}

/// Pending characteristic write offered to an override hook.
///
/// Applying consumes the handle, so a message can update its characteristic
/// at most once. Dropping it without applying skips the update.
pub struct UpdateOverride {
    service: Arc<dyn Service>,
    characteristic: String,
    value: Value,
}

impl UpdateOverride {
    /// The value derived from the message.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn characteristic(&self) -> &str {
        &self.characteristic
    }

    /// Write `replacement`, or the derived value if `None`.
    pub fn apply(self, replacement: Option<Value>) {
        let value = replacement.unwrap_or(self.value);
        write_characteristic(self.service.as_ref(), &self.characteristic, value);
    }
}

pub type OverrideHook = Arc<dyn Fn(Value, UpdateOverride) + Send + Sync>;

fn write_characteristic(service: &dyn Service, name: &str, value: Value) {
    match service.get_characteristic(name) {
        Some(characteristic) => {
            debug!("[MQTT] updating characteristic {} to {}", name, value);
            characteristic.update_value(value);
        }
        None => warn!("[MQTT] characteristic {} vanished from service", name),
    }
}

/// Payload sent for `value`. Formatter failures fall back to the plain value.
pub(crate) fn outgoing_payload(descriptor: &MqttPublishDescriptor, value: &Value) -> String {
    let message = value_to_string(value);
    let Some(formatter) = &descriptor.payload_formatter else {
        return message;
    };

    match formatter.format(value) {
        Ok(formatted) => formatted,
        Err(e) => {
            warn!(
                "[MQTT] Error occurred while executing payload formatter for topic {} with value '{}': {}",
                descriptor.topic, message, e
            );
            message
        }
    }
}

/// Translate parsed broker options into client options.
pub(crate) fn build_mqtt_options(options: &MqttBrokerOptions) -> Result<MqttOptions> {
    // rumqttc refuses a persistent session without a client id
    let client_id = match options.client_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => format!("accessory_{}", &Uuid::new_v4().simple().to_string()[..8]),
    };

    let mut mqtt_options = MqttOptions::new(client_id, options.host.as_str(), options.port);

    match options.protocol.to_ascii_lowercase().as_str() {
        "mqtt" | "tcp" => {}
        "mqtts" | "ssl" | "tls" => {
            if options.reject_unauthorized == Some(false) {
                warn!("[MQTT] 'rejectUnauthorized: false' is not supported, certificates are verified");
            }
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }
        other => return Err(Error::UnsupportedProtocol(other.to_string())),
    }

    if let Some(keepalive) = options.keepalive_secs {
        mqtt_options.set_keep_alive(Duration::from_secs(keepalive));
    }
    if let Some(clean) = options.clean {
        mqtt_options.set_clean_session(clean);
    }
    if let Some(username) = &options.username {
        mqtt_options.set_credentials(username.as_str(), options.password.as_deref().unwrap_or(""));
    }
    if let Some(will) = &options.will {
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            will.topic.as_str(),
            will.payload.as_bytes().to_vec(),
            will.qos,
            will.retain,
        ));
    }

    Ok(mqtt_options)
}

enum PollError {
    Connection(ConnectionError),
    Timeout(Duration),
}

/// The event loop task currently owning the client.
struct Session {
    id: u64,
    token: CancellationToken,
}

/// Routes broker messages onto characteristics and publishes characteristic writes.
pub struct MqttBridge {
    service: Arc<dyn Service>,
    options: MqttBrokerOptions,
    subscriptions: Mutex<SubscriptionTable>,
    hooks: Mutex<HashMap<String, OverrideHook>>,
    client: Mutex<Option<AsyncClient>>,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    next_session: AtomicU64,
    events: broadcast::Sender<BridgeEvent>,
}

impl MqttBridge {
    /// Create the bridge and register the subscriptions from `options`.
    ///
    /// Fails if a subscription names a characteristic the service does not have.
    pub fn new(service: Arc<dyn Service>, options: MqttBrokerOptions) -> Result<Arc<Self>> {
        let (events, _) = broadcast::channel(16);
        let initial = options.subscriptions.clone();

        let bridge = Self {
            service,
            options,
            subscriptions: Mutex::new(SubscriptionTable::default()),
            hooks: Mutex::new(HashMap::new()),
            client: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
            next_session: AtomicU64::new(0),
            events,
        };
        for subscription in &initial {
            bridge.add_subscription(subscription)?;
        }

        Ok(Arc::new(bridge))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Receive lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Register a subscription. A topic seen for the first time is subscribed
    /// right away when the connection is live.
    pub fn add_subscription(&self, subscription: &MqttSubscription) -> Result<()> {
        let name = &subscription.characteristic;
        if !self.service.test_characteristic(name) {
            return Err(Error::IllegalCharacteristic(name.clone()));
        }
        let is_bool = self
            .service
            .get_characteristic(name)
            .is_some_and(|c| c.format() == CharacteristicFormat::Bool);
        let pattern = subscription
            .message_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()?;

        let subscriber = Subscriber {
            characteristic: name.clone(),
            qos: subscription.qos,
            pattern,
            group: subscription.pattern_group_to_extract,
            is_bool,
        };
        let new_topic = self.subscriptions.lock().insert(&subscription.topic, subscriber);

        if new_topic && self.state() == ConnectionState::Connected {
            self.subscribe_topic(&subscription.topic, subscription.qos);
        }
        Ok(())
    }

    /// Subscribe a single characteristic to a get topic.
    pub fn subscribe(&self, get_topic: &MqttSubscribeDescriptor, characteristic: &str) -> Result<()> {
        self.add_subscription(&MqttSubscription {
            topic: get_topic.topic.clone(),
            characteristic: characteristic.to_string(),
            qos: get_topic.qos,
            message_pattern: get_topic.message_pattern.clone(),
            pattern_group_to_extract: get_topic.pattern_group_to_extract,
        })
    }

    /// Intercept updates of `characteristic`. The hook decides whether and
    /// with which value the characteristic is written.
    pub fn set_override_hook(
        &self,
        characteristic: &str,
        hook: impl Fn(Value, UpdateOverride) + Send + Sync + 'static,
    ) {
        self.hooks
            .lock()
            .insert(characteristic.to_string(), Arc::new(hook));
    }

    pub fn remove_override_hook(&self, characteristic: &str) -> bool {
        self.hooks.lock().remove(characteristic).is_some()
    }

    fn subscribe_topic(&self, topic: &str, qos: QoS) {
        let Some(client) = self.client.lock().clone() else {
            return;
        };
        // never await here: this runs on the event loop task too
        match client.try_subscribe(topic, qos) {
            Ok(()) => info!("[MQTT] subscribing to topic '{}' with {:?}", topic, qos),
            Err(e) => error!(
                "[MQTT] error occurred while subscribing to topic {}: {}",
                topic, e
            ),
        }
    }

    /// Open the broker connection and run the event loop until [`end`](Self::end)
    /// is called or the broker refuses the credentials.
    pub fn connect(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mqtt_options = build_mqtt_options(&self.options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut session = self.session.lock();
            let previous = session.replace(Session {
                id,
                token: token.clone(),
            });
            if let Some(previous) = previous {
                previous.token.cancel();
            }
            *self.client.lock() = Some(client);
            self.set_state(ConnectionState::Connecting);
        }

        info!(
            "[MQTT] connecting to broker {}:{} ({} topics)...",
            self.options.host,
            self.options.port,
            self.subscriptions.lock().len()
        );

        let bridge = self.clone();
        Ok(tokio::spawn(async move {
            bridge.run(event_loop, id, token).await;
        }))
    }

    /// Close the connection. A graceful end sends DISCONNECT first.
    pub async fn end(&self, force: bool) {
        let Some(token) = self.session.lock().as_ref().map(|s| s.token.clone()) else {
            return;
        };
        if !force && self.state() == ConnectionState::Connected {
            let client = self.client.lock().clone();
            if let Some(client) = client
                && client.disconnect().await.is_ok()
            {
                return;
            }
        }
        token.cancel();
    }

    /// Publish `value` to the topic of `descriptor`.
    pub async fn publish(&self, descriptor: &MqttPublishDescriptor, value: &Value) -> Result<()> {
        let message = outgoing_payload(descriptor, value);
        if descriptor.dup == Some(true) {
            debug!("[MQTT] dup flag is set by the client itself, ignoring configured value");
        }

        let client = self.client.lock().clone().ok_or(Error::NotConnected)?;
        match client
            .publish(
                descriptor.topic.as_str(),
                descriptor.qos,
                descriptor.retain,
                message.clone().into_bytes(),
            )
            .await
        {
            Ok(()) => {
                debug!("[MQTT] successfully published to topic {}", descriptor.topic);
                Ok(())
            }
            Err(e) => {
                error!(
                    "[MQTT] error occurred while publishing to topic '{}', message '{}': {}",
                    descriptor.topic, message, e
                );
                Err(e.into())
            }
        }
    }

    /// Publish `value` to every descriptor. All topics are attempted; the
    /// first failure is returned.
    pub async fn multiple_publish(
        &self,
        descriptors: &[MqttPublishDescriptor],
        value: &Value,
    ) -> Result<()> {
        if descriptors.is_empty() {
            return Err(Error::EmptyPublishList);
        }

        let mut first_error = None;
        for descriptor in descriptors {
            if let Err(e) = self.publish(descriptor, value).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Deliver a message to every subscriber of `topic`, in registration order.
    pub fn route_message(&self, topic: &str, message: &str) {
        let Some(subscribers) = self
            .subscriptions
            .lock()
            .subscribers(topic)
            .map(<[Subscriber]>::to_vec)
        else {
            debug!("[MQTT] message on unknown topic {}", topic);
            return;
        };

        for subscriber in subscribers {
            let value = match subscriber.derive_value(message) {
                Ok(value) => value,
                Err(e) => {
                    error!(
                        "[MQTT] couldn't update {} from topic {}: {}",
                        subscriber.characteristic, topic, e
                    );
                    continue;
                }
            };

            let hook = self.hooks.lock().get(&subscriber.characteristic).cloned();
            match hook {
                Some(hook) => hook(
                    value.clone(),
                    UpdateOverride {
                        service: self.service.clone(),
                        characteristic: subscriber.characteristic.clone(),
                        value,
                    },
                ),
                None => write_characteristic(self.service.as_ref(), &subscriber.characteristic, value),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: BridgeEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn on_connected(&self, session_present: bool) {
        info!("[MQTT] Connected!");
        self.set_state(ConnectionState::Connected);

        if !session_present {
            let topics = self.subscriptions.lock().topics();
            for (topic, qos) in topics {
                self.subscribe_topic(&topic, qos);
            }
        }

        self.emit(BridgeEvent::Connected);
    }

    async fn poll(
        event_loop: &mut EventLoop,
        timeout: Option<Duration>,
    ) -> std::result::Result<Event, PollError> {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, event_loop.poll()).await {
                Ok(polled) => polled.map_err(PollError::Connection),
                Err(_) => Err(PollError::Timeout(limit)),
            },
            None => event_loop.poll().await.map_err(PollError::Connection),
        }
    }

    async fn run(self: Arc<Self>, mut event_loop: EventLoop, id: u64, token: CancellationToken) {
        let reconnect_period = self
            .options
            .reconnect_period_ms
            .map_or(DEFAULT_RECONNECT_PERIOD, Duration::from_millis);
        let connect_timeout = self
            .options
            .connect_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        loop {
            let timeout = match self.state() {
                ConnectionState::Connected => None,
                _ => connect_timeout,
            };
            let polled = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                polled = Self::poll(&mut event_loop, timeout) => polled,
            };
            // a newer session may own the client by now
            if token.is_cancelled() {
                break;
            }

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_connected(ack.session_present),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = String::from_utf8_lossy(&publish.payload);
                    debug!("[MQTT] received message on {}: {}", publish.topic, message);
                    self.route_message(&publish.topic, &message);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("[MQTT] subscription {} granted {:?}", ack.pkid, ack.return_codes);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("[MQTT] disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(PollError::Connection(ConnectionError::ConnectionRefused(
                    ConnectReturnCode::NotAuthorized,
                ))) => {
                    // retrying with the same credentials is pointless
                    error!("[MQTT] error occurred: Connection refused: Not authorized");
                    self.set_state(ConnectionState::Errored);
                    self.emit(BridgeEvent::Error(
                        "Connection refused: Not authorized".to_string(),
                    ));
                    break;
                }
                Err(e) => {
                    let message = match e {
                        PollError::Connection(e) => e.to_string(),
                        PollError::Timeout(limit) => {
                            format!("connection timed out after {}ms", limit.as_millis())
                        }
                    };
                    error!("[MQTT] error occurred: {}", message);
                    self.set_state(ConnectionState::Errored);
                    self.emit(BridgeEvent::Error(message));

                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_period) => {}
                    }
                    self.set_state(ConnectionState::Connecting);
                }
            }
        }

        {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(|s| s.id == id) {
                *session = None;
                self.client.lock().take();
                self.set_state(ConnectionState::Disconnected);
            }
        }
        info!("[MQTT] client disconnected!");
        self.emit(BridgeEvent::Disconnected);
    }
}
