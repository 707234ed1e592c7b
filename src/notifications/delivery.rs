//! `DeliveryPort`: push delivery to every registered subscription of a
//! user (spec.md §4.5 `SendToUser`).

use crate::error::Result;
use crate::UserId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// `{ type, title, body, channel_id?, guild_id?, message_id? }`
/// (spec.md §3 `PushPayload`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub body: String,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub message_id: Option<String>,
}

pub trait DeliveryPort: Send + Sync + 'static {
    fn send_to_user(&self, user_id: &UserId, payload: &PushPayload) -> impl Future<Output = Result<()>> + Send;
}

pub trait DeliveryPortDyn: Send + Sync + 'static {
    fn send_to_user<'a>(&'a self, user_id: &'a UserId, payload: &'a PushPayload) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

impl<T: DeliveryPort> DeliveryPortDyn for T {
    fn send_to_user<'a>(&'a self, user_id: &'a UserId, payload: &'a PushPayload) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(DeliveryPort::send_to_user(self, user_id, payload))
    }
}

/// Default adapter: logs the push instead of delivering it. Ships a
/// working default behind the seam rather than leaving it unfilled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeliveryPort;

impl DeliveryPort for LoggingDeliveryPort {
    async fn send_to_user(&self, user_id: &UserId, payload: &PushPayload) -> Result<()> {
        tracing::info!(%user_id, title = %payload.title, body = %payload.body, "push delivery (logging adapter)");
        Ok(())
    }
}
