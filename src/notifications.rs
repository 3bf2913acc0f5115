//! Registration with the host's notification server.
//!
//! Hosts may run a notification server that pushes characteristic values
//! into accessories by id. Accessories with a configured notification id
//! register a handler once the host finished launching.

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Body of a notification pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub characteristic: String,
    pub value: Value,
}

pub type NotificationHandler = Arc<dyn Fn(NotificationRequest) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("notification id '{0}' is already taken")]
    IdTaken(String),
}

/// Notification server of the host.
pub trait NotificationServer: Send + Sync {
    fn register(
        &self,
        id: &str,
        handler: NotificationHandler,
        password: Option<&str>,
    ) -> Result<(), RegistrationError>;
}

/// Lifecycle hooks of the host.
pub trait HostApi: Send + Sync {
    /// Run `callback` once the host finished launching.
    fn on_did_finish_launching(&self, callback: Box<dyn FnOnce() + Send>);

    /// The notification server, if the host runs one.
    fn notification_server(&self) -> Option<Arc<dyn NotificationServer>>;
}

/// Register `handler` under `id` after launch. Does nothing without an id.
///
/// A taken id is logged, not returned: the accessory keeps working without
/// notifications.
pub fn enqueue_notification_registration_if_defined(
    api: Arc<dyn HostApi>,
    id: Option<&str>,
    password: Option<&str>,
    handler: NotificationHandler,
) {
    let Some(id) = id.filter(|id| !id.is_empty()).map(str::to_string) else {
        return;
    };
    let password = password.map(str::to_string);

    let host = api.clone();
    api.on_did_finish_launching(Box::new(move || {
        let Some(server) = host.notification_server() else {
            return;
        };
        match server.register(&id, handler, password.as_deref()) {
            Ok(()) => info!("Detected running notification server. Registered successfully!"),
            Err(RegistrationError::IdTaken(_)) => info!(
                "Could not register notification handler. ID '{}' is already taken!",
                id
            ),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Server {
        handlers: Mutex<HashMap<String, (NotificationHandler, Option<String>)>>,
    }

    impl NotificationServer for Server {
        fn register(
            &self,
            id: &str,
            handler: NotificationHandler,
            password: Option<&str>,
        ) -> Result<(), RegistrationError> {
            let mut handlers = self.handlers.lock();
            if handlers.contains_key(id) {
                return Err(RegistrationError::IdTaken(id.to_string()));
            }
            handlers.insert(id.to_string(), (handler, password.map(str::to_string)));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Host {
        server: Option<Arc<Server>>,
        pending: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    }

    impl Host {
        fn launch(&self) {
            let callbacks: Vec<_> = self.pending.lock().drain(..).collect();
            for callback in callbacks {
                callback();
            }
        }
    }

    impl HostApi for Host {
        fn on_did_finish_launching(&self, callback: Box<dyn FnOnce() + Send>) {
            self.pending.lock().push(callback);
        }

        fn notification_server(&self) -> Option<Arc<dyn NotificationServer>> {
            self.server.clone().map(|s| s as Arc<dyn NotificationServer>)
        }
    }

    fn noop_handler() -> NotificationHandler {
        Arc::new(|_| {})
    }

    #[test]
    fn test_registers_after_launch() {
        let server = Arc::new(Server::default());
        let host = Arc::new(Host {
            server: Some(server.clone()),
            ..Default::default()
        });

        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        enqueue_notification_registration_if_defined(
            host.clone(),
            Some("lamp"),
            Some("secret"),
            Arc::new(move |request| *received_clone.lock() = Some(request)),
        );
        assert!(server.handlers.lock().is_empty());

        host.launch();
        let (handler, password) = server.handlers.lock().get("lamp").cloned().unwrap();
        assert_eq!(password.as_deref(), Some("secret"));

        handler(NotificationRequest {
            service: None,
            characteristic: "On".into(),
            value: json!(true),
        });
        assert_eq!(received.lock().as_ref().unwrap().characteristic, "On");
    }

    #[test]
    fn test_skipped_without_id() {
        let host = Arc::new(Host::default());
        enqueue_notification_registration_if_defined(host.clone(), None, None, noop_handler());
        enqueue_notification_registration_if_defined(host.clone(), Some(""), None, noop_handler());
        assert!(host.pending.lock().is_empty());
    }

    #[test]
    fn test_duplicate_id_is_tolerated() {
        let server = Arc::new(Server::default());
        let host = Arc::new(Host {
            server: Some(server.clone()),
            ..Default::default()
        });

        enqueue_notification_registration_if_defined(host.clone(), Some("lamp"), None, noop_handler());
        enqueue_notification_registration_if_defined(host.clone(), Some("lamp"), None, noop_handler());
        host.launch();
        assert_eq!(server.handlers.lock().len(), 1);
    }

    #[test]
    fn test_without_server_nothing_happens() {
        let host = Arc::new(Host::default());
        enqueue_notification_registration_if_defined(host.clone(), Some("lamp"), None, noop_handler());
        host.launch();
        assert!(host.pending.lock().is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let request: NotificationRequest =
            serde_json::from_str(r#"{"characteristic": "On", "value": false}"#).unwrap();
        assert_eq!(request.service, None);
        assert_eq!(request.value, json!(false));
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"characteristic":"On","value":false}"#
        );
    }
}
