// src/core/callback/mod.rs
//! Fire-and-forget HTTP callbacks on activation change. Jobs are queued
//! after the transition commits; delivery failure is logged and never
//! affects the transition that produced it.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::model::{Activation, CallbackUrl};
use crate::storage::Repositories;
use crate::utils::config::CallbackConfig;
use crate::utils::error::{Result, ServiceError};

struct CallbackJob {
    url: String,
    payload: Value,
}

pub struct CallbackNotifier {
    repositories: Arc<Repositories>,
    tx: mpsc::UnboundedSender<CallbackJob>,
}

impl CallbackNotifier {
    pub fn new(config: &CallbackConfig, repositories: Arc<Repositories>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connection_timeout_ms))
            .timeout(Duration::from_millis(config.connection_timeout_ms * 2));

        if let Some(proxy) = &config.proxy {
            let mut proxy = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))
                .map_err(|e| ServiceError::Unknown(format!("Invalid proxy: {}", e)))?;
            if let (Some(username), Some(password)) = (
                config.proxy.as_ref().and_then(|p| p.username.as_deref()),
                config.proxy.as_ref().and_then(|p| p.password.as_deref()),
            ) {
                proxy = proxy.basic_auth(username, password);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ServiceError::Unknown(format!("HTTP client: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver_jobs(client, rx));

        Ok(Self { repositories, tx })
    }

    /// Enqueues one POST per callback URL registered for the activation's
    /// application. Call after the state transition is persisted.
    pub fn notify_activation_change(&self, activation: &Activation) {
        let callbacks = match self
            .repositories
            .list_callback_urls(&activation.application_id)
        {
            Ok(callbacks) => callbacks,
            Err(e) => {
                warn!("Failed to load callback URLs: {}", e);
                return;
            }
        };

        for callback in callbacks {
            let payload = build_payload(&callback, activation);
            if self
                .tx
                .send(CallbackJob {
                    url: callback.url,
                    payload,
                })
                .is_err()
            {
                warn!("Callback worker is gone, dropping notification");
                return;
            }
        }
    }
}

async fn deliver_jobs(client: reqwest::Client, mut rx: mpsc::UnboundedReceiver<CallbackJob>) {
    while let Some(job) = rx.recv().await {
        match client.post(&job.url).json(&job.payload).send().await {
            Ok(response) => {
                debug!("Callback to {} returned {}", job.url, response.status());
            }
            Err(e) => {
                warn!("Callback to {} failed: {}", job.url, e);
            }
        }
    }
}

/// Assembles the callback body from the attribute selection on the
/// callback URL. The activation ID is always present.
fn build_payload(callback: &CallbackUrl, activation: &Activation) -> Value {
    let mut payload = json!({
        "activationId": activation.activation_id,
    });
    let body = payload.as_object_mut().expect("payload is an object");

    for attribute in &callback.attributes {
        match attribute.as_str() {
            "userId" => {
                body.insert("userId".into(), json!(activation.user_id));
            }
            "applicationId" => {
                body.insert("applicationId".into(), json!(activation.application_id));
            }
            "activationName" => {
                body.insert("activationName".into(), json!(activation.activation_name));
            }
            "activationStatus" => {
                body.insert("activationStatus".into(), json!(activation.status.as_str()));
            }
            "blockedReason" => {
                body.insert("blockedReason".into(), json!(activation.blocked_reason));
            }
            _ => {}
        }
    }

    payload
}
