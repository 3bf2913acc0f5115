use super::request::{HttpResponse, Replacement, apply_replacements};
use crate::config_parser::UrlDescriptor;
use crate::error::{Error, Result};
use futures_util::future::join_all;
use log::{debug, warn};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use strum::{Display, EnumString};

/// How a list of requests is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ExecutionStrategy {
    /// All requests are dispatched at once.
    #[default]
    Parallel,
    /// Each request finishes before the next one starts.
    Series,
}

/// Result of one request task of a batch.
#[derive(Debug)]
pub enum RequestOutcome {
    Response(HttpResponse),
    Failed(Error),
}

impl RequestOutcome {
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            RequestOutcome::Response(response) => Some(response),
            RequestOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            RequestOutcome::Response(_) => None,
            RequestOutcome::Failed(e) => Some(e),
        }
    }
}

enum Task<'a> {
    Pause(Duration),
    Request(&'a UrlDescriptor),
}

/// Parse a `delay(<ms>)` pause step.
fn delay_step(url: &str) -> Option<Duration> {
    let digits = url.strip_prefix("delay(")?.strip_suffix(')')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(Duration::from_millis)
}

/// Sends HTTP requests described by [`UrlDescriptor`]s.
pub struct HttpExecutor {
    strict: Client,
    lenient: Client,
    strategy: ExecutionStrategy,
}

impl HttpExecutor {
    pub fn new() -> Result<Self> {
        let strict = Client::builder().build()?;
        let lenient = Client::builder().danger_accept_invalid_certs(true).build()?;

        Ok(Self {
            strict,
            lenient,
            strategy: ExecutionStrategy::default(),
        })
    }

    pub fn execution_strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    /// Switch the strategy by name (case-insensitive). Unknown names are
    /// rejected and leave the current strategy in place.
    pub fn set_execution_strategy(&mut self, name: &str) -> bool {
        match name.parse::<ExecutionStrategy>() {
            Ok(strategy) => {
                self.strategy = strategy;
                true
            }
            Err(_) => {
                warn!("[HTTP] Unknown execution strategy '{}', keeping {}", name, self.strategy);
                false
            }
        }
    }

    pub async fn http_request(&self, descriptor: &UrlDescriptor) -> Result<HttpResponse> {
        self.http_request_with(descriptor, &[]).await
    }

    /// Send one request after substituting placeholders in url and body.
    pub async fn http_request_with(
        &self,
        descriptor: &UrlDescriptor,
        replacements: &[Replacement],
    ) -> Result<HttpResponse> {
        let url = apply_replacements(&descriptor.url, replacements);
        let body = apply_replacements(&descriptor.body, replacements);
        let method = Method::from_bytes(descriptor.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidMethod(descriptor.method.clone()))?;
        let client = if descriptor.strict_ssl {
            &self.strict
        } else {
            &self.lenient
        };

        let credentials = match (&descriptor.auth.username, &descriptor.auth.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        };

        let send = |with_auth: bool| {
            let mut request = client
                .request(method.clone(), &url)
                .timeout(Duration::from_millis(descriptor.request_timeout_ms));
            for (name, value) in &descriptor.headers {
                request = request.header(name, value);
            }
            if !body.is_empty() {
                request = request.body(body.clone());
            }
            if let (true, Some((username, password))) = (with_auth, credentials) {
                request = request.basic_auth(username, Some(password));
            }
            request.send()
        };

        debug!("[HTTP] {} {}", method, url);
        let challenge_first = credentials.is_some() && !descriptor.auth.send_immediately;
        let mut response = send(!challenge_first).await?;
        if challenge_first && response.status() == StatusCode::UNAUTHORIZED {
            debug!("[HTTP] {} answered with 401, retrying with credentials", url);
            response = send(true).await?;
        }

        HttpResponse::read(response).await
    }

    /// Run every descriptor `repeat` times under the current strategy.
    ///
    /// Returns one outcome per request in task order. `delay(<ms>)` steps
    /// produce no outcome.
    pub async fn multiple_http_requests(
        &self,
        descriptors: &[UrlDescriptor],
    ) -> Result<Vec<RequestOutcome>> {
        if descriptors.is_empty() {
            return Err(Error::EmptyRequestList);
        }

        let tasks: Vec<Task<'_>> = descriptors
            .iter()
            .flat_map(|descriptor| {
                let task = move || match delay_step(&descriptor.url) {
                    Some(pause) => Task::Pause(pause),
                    None => Task::Request(descriptor),
                };
                (0..descriptor.repeat.max(1)).map(move |_| task())
            })
            .collect();

        let outcomes = match self.strategy {
            ExecutionStrategy::Series => {
                let mut outcomes = Vec::with_capacity(tasks.len());
                for task in &tasks {
                    outcomes.push(self.run_task(task).await);
                }
                outcomes
            }
            ExecutionStrategy::Parallel => join_all(tasks.iter().map(|task| self.run_task(task))).await,
        };

        Ok(outcomes.into_iter().flatten().collect())
    }

    async fn run_task(&self, task: &Task<'_>) -> Option<RequestOutcome> {
        match task {
            Task::Pause(pause) => {
                if self.strategy != ExecutionStrategy::Series {
                    warn!(
                        "[HTTP] There was a 'delay' method specified but execution is unaffected because of unsuitable execution strategy!"
                    );
                    return None;
                }
                tokio::time::sleep(*pause).await;
                None
            }
            Task::Request(descriptor) => {
                if descriptor.delay_before_execution_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(descriptor.delay_before_execution_ms))
                        .await;
                }
                Some(match self.http_request(descriptor).await {
                    Ok(response) => RequestOutcome::Response(response),
                    Err(e) => {
                        debug!("[HTTP] Request to {} failed: {}", descriptor.url, e);
                        RequestOutcome::Failed(e)
                    }
                })
            }
        }
    }
}
