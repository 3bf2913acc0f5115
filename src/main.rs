//! Demo switch accessory.
//!
//! Polls the switch state over HTTP, mirrors it from an MQTT topic and
//! optionally switches it once on startup.
//!
//! Usage:
//!   accessory-bridge --config lamp.json
//!   accessory-bridge --config lamp.json --set on
//!   accessory-bridge --config lamp.json --check

use accessory_bridge::characteristic::{
    Characteristic, CharacteristicFormat, MemoryCharacteristic, MemoryService,
};
use accessory_bridge::config::{AccessoryConfig, default_config_path, load_dotenv};
use accessory_bridge::config_parser::{
    MqttPublishDescriptor, UrlDescriptor, parse_mqtt_get_topic_property, parse_mqtt_options,
    parse_multiple_mqtt_set_topics_property, parse_multiple_url_property, parse_pattern,
    parse_url_property,
};
use accessory_bridge::http::{HttpExecutor, RequestOutcome};
use accessory_bridge::mqtt::{BridgeEvent, MqttBridge};
use accessory_bridge::{Cache, Error, PullCompletion, PullTimer, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const CHARACTERISTIC: &str = "On";

#[derive(Parser)]
#[command(name = "accessory-bridge")]
#[command(about = "Run a switch accessory backed by HTTP and MQTT")]
struct Cli {
    /// Accessory config file (JSON)
    #[arg(long, env = "ACCESSORY_CONFIG")]
    config: Option<PathBuf>,

    /// Switch the accessory once after startup
    #[arg(long, value_enum)]
    set: Option<SwitchState>,

    /// Validate the config and exit
    #[arg(long)]
    check: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum SwitchState {
    On,
    Off,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Message payloads that count as "on".
fn is_on_message(message: &str) -> bool {
    matches!(
        message.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on"
    )
}

struct SwitchAccessory {
    service: Arc<MemoryService>,
    executor: Arc<HttpExecutor>,
    cache: Arc<Mutex<Cache>>,
    pull_interval: Duration,
    get_url: Option<UrlDescriptor>,
    status_pattern: Option<Regex>,
    on_urls: Vec<UrlDescriptor>,
    off_urls: Vec<UrlDescriptor>,
    bridge: Option<Arc<MqttBridge>>,
    set_topics: Vec<MqttPublishDescriptor>,
}

impl SwitchAccessory {
    /// Validate the whole config. Nothing is started here.
    fn setup(config: &AccessoryConfig) -> Result<Self> {
        let service = Arc::new(MemoryService::new().with_characteristic(MemoryCharacteristic::new(
            CHARACTERISTIC,
            CharacteristicFormat::Bool,
            Value::Bool(false),
        )));

        let mut executor = HttpExecutor::new()?;
        if let Some(strategy) = &config.http_execution_strategy
            && !executor.set_execution_strategy(strategy)
        {
            warn!("Ignoring unknown httpExecutionStrategy '{}'", strategy);
        }

        let get_url = config.get_url.as_ref().map(parse_url_property).transpose()?;
        let status_pattern = config.status_pattern.as_ref().map(parse_pattern).transpose()?;
        let on_urls = match &config.on_url {
            Some(urls) => parse_multiple_url_property(urls)?,
            None => Vec::new(),
        };
        let off_urls = match &config.off_url {
            Some(urls) => parse_multiple_url_property(urls)?,
            None => Vec::new(),
        };

        let (bridge, set_topics) = match &config.mqtt {
            Some(mqtt) => {
                let bridge = MqttBridge::new(service.clone(), parse_mqtt_options(mqtt)?)?;
                if let Some(get_topic) = &config.mqtt_get_topic {
                    bridge.subscribe(&parse_mqtt_get_topic_property(get_topic)?, CHARACTERISTIC)?;
                }
                let set_topics = match &config.mqtt_set_topic {
                    Some(topics) => parse_multiple_mqtt_set_topics_property(topics)?,
                    None => Vec::new(),
                };
                (Some(bridge), set_topics)
            }
            None => (None, Vec::new()),
        };

        Ok(Self {
            service,
            executor: Arc::new(executor),
            cache: Arc::new(Mutex::new(Cache::from_config(&config.status_cache, 0))),
            pull_interval: Duration::from_millis(config.pull_interval.max(1)),
            get_url,
            status_pattern,
            on_urls,
            off_urls,
            bridge,
            set_topics,
        })
    }

    fn current_state(&self) -> bool {
        self.service
            .characteristic(CHARACTERISTIC)
            .is_some_and(|c| c.value() == Value::Bool(true))
    }

    /// Pull timer that queries the status URL, gated by the status cache.
    fn pull_timer(&self) -> Option<PullTimer<bool>> {
        let get_url = self.get_url.clone()?;
        let executor = self.executor.clone();
        let cache = self.cache.clone();
        let pattern = self.status_pattern.clone();
        let state = self.service.characteristic(CHARACTERISTIC)?;
        let target = state.clone();

        let pull = move |completion: PullCompletion<bool>| {
            if !cache.lock().should_query() {
                completion.complete(Ok(state.value() == Value::Bool(true)));
                return;
            }

            let executor = executor.clone();
            let cache = cache.clone();
            let get_url = get_url.clone();
            let pattern = pattern.clone();
            tokio::spawn(async move {
                let result = executor.http_request(&get_url).await.and_then(|response| {
                    if !response.is_success() {
                        return Err(Error::Pull(format!("status request answered {}", response.status)));
                    }
                    cache.lock().queried();
                    Ok(match &pattern {
                        Some(pattern) => pattern.is_match(&response.body),
                        None => is_on_message(&response.body),
                    })
                });
                completion.complete(result);
            });
        };

        let on_success = move |on: bool| {
            if target.value() != Value::Bool(on) {
                target.update_value(Value::Bool(on));
            }
        };

        Some(PullTimer::new(self.pull_interval, pull, on_success))
    }

    /// Send the switch commands. The characteristic follows only when at
    /// least one command went through, or when there is nothing to send.
    async fn switch(&self, on: bool, timer: Option<&PullTimer<bool>>) -> bool {
        let mut attempted = false;
        let mut delivered = false;

        let urls = if on { &self.on_urls } else { &self.off_urls };
        if !urls.is_empty() {
            attempted = true;
            match self.executor.multiple_http_requests(urls).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            RequestOutcome::Response(r) if r.is_success() => delivered = true,
                            RequestOutcome::Response(r) => {
                                warn!("Switch request answered with status {}", r.status)
                            }
                            RequestOutcome::Failed(e) => error!("Switch request failed: {}", e),
                        }
                    }
                }
                Err(e) => error!("Switch requests not sent: {}", e),
            }
        }

        if let Some(bridge) = &self.bridge
            && !self.set_topics.is_empty()
        {
            attempted = true;
            match bridge.multiple_publish(&self.set_topics, &Value::Bool(on)).await {
                Ok(()) => delivered = true,
                Err(e) => error!("Publishing switch state failed: {}", e),
            }
        }

        if attempted && !delivered {
            warn!("Switch to {} failed, keeping current state", if on { "on" } else { "off" });
            return false;
        }

        if let Some(characteristic) = self.service.characteristic(CHARACTERISTIC) {
            characteristic.update_value(Value::Bool(on));
        }
        // the device needs a moment before its status reflects the switch
        if let Some(timer) = timer {
            timer.reset_timer();
        }
        true
    }
}

async fn run(config: AccessoryConfig, cli: &Cli) -> Result<()> {
    let accessory = SwitchAccessory::setup(&config)?;
    if cli.check {
        info!("Configuration of '{}' is valid", config.name);
        return Ok(());
    }

    info!("Starting accessory '{}'", config.name);
    info!("  HTTP strategy: {}", accessory.executor.execution_strategy());
    info!("  Pull interval: {:?}", accessory.pull_interval);

    let mut mqtt_handle = None;
    if let Some(bridge) = &accessory.bridge {
        bridge.set_override_hook(CHARACTERISTIC, |value, update| {
            let on = match &value {
                Value::Bool(on) => *on,
                Value::String(message) => is_on_message(message),
                _ => false,
            };
            update.apply(Some(Value::Bool(on)));
        });

        let mut events = bridge.events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    BridgeEvent::Connected => info!("MQTT bridge connected"),
                    BridgeEvent::Error(e) => warn!("MQTT bridge error: {}", e),
                    BridgeEvent::Disconnected => break,
                }
            }
        });
        mqtt_handle = Some(bridge.connect()?);
    }

    let timer = accessory.pull_timer();
    if let Some(timer) = &timer {
        timer.start();
    }

    if let Some(state) = cli.set {
        accessory.switch(matches!(state, SwitchState::On), timer.as_ref()).await;
    }

    info!("Accessory is running (state: {})", if accessory.current_state() { "on" } else { "off" });
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    if let Some(timer) = &timer {
        timer.stop();
    }
    if let Some(bridge) = &accessory.bridge {
        bridge.end(false).await;
    }
    if let Some(handle) = mqtt_handle
        && tokio::time::timeout(Duration::from_secs(2), handle).await.is_err()
    {
        warn!("MQTT bridge did not shut down in time");
    }

    info!("Accessory stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = if path.exists() {
        match AccessoryConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        warn!("No config at {}, using defaults", path.display());
        AccessoryConfig::from_env()
    };

    if let Err(e) = run(config, &cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
