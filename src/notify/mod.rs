//! Notification routing.
//!
//! A chain-of-responsibility dispatcher: each inbound push payload is handed
//! to exactly one handler. Handlers declare their capabilities explicitly:
//! `can_handle` names the type tags they accept and `is_fallback` marks the
//! catch-all, which the router always tries last regardless of registration
//! order. Naming conventions play no part in selection.

pub mod handlers;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Generic string-keyed payload as delivered by the push collaborator.
pub type NotificationPayload = HashMap<String, String>;

/// One user-facing action attached to an actionable notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

/// Presentable notification descriptor handed to the platform layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub type_tag: String,
    pub title: String,
    pub body: String,
    /// Deep-link target when one was recoverable from the payload.
    pub content_id: Option<String>,
    pub actions: Vec<NotificationAction>,
}

/// Categorized view of a payload, extracted by the accepting handler.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    PostEngagement {
        kind: String,
        content_id: Option<String>,
    },
    LocationShareRequest {
        peer_name: String,
        share_request_id: Option<String>,
        actionable: bool,
    },
    LocationShared {
        peer_name: String,
        latitude: f64,
        longitude: f64,
        display_until: String,
        share_id: String,
    },
    LocationShareRejected {
        peer_name: String,
    },
    General {
        title: Option<String>,
        body: Option<String>,
    },
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Declared fallback capability. The router evaluates fallback handlers
    /// last; there is no name-based ordering.
    fn is_fallback(&self) -> bool {
        false
    }

    fn can_handle(&self, type_tag: &str) -> bool;

    async fn handle(
        &self,
        payload: &NotificationPayload,
        hint: Option<&str>,
    ) -> Option<Notification>;
}

#[derive(Default)]
pub struct NotificationRouter {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch a payload to exactly one handler.
    ///
    /// Non-fallback handlers are tried in registration order; the fallback is
    /// always tried last. No accepting handler is non-fatal: the miss is
    /// logged and no notification is produced.
    pub async fn route(
        &self,
        payload: &NotificationPayload,
        hint: Option<&str>,
    ) -> Option<Notification> {
        let type_tag = payload.get("type").map(String::as_str).unwrap_or("");

        let selected = self
            .handlers
            .iter()
            .filter(|handler| !handler.is_fallback())
            .find(|handler| handler.can_handle(type_tag))
            .or_else(|| {
                self.handlers
                    .iter()
                    .find(|handler| handler.is_fallback() && handler.can_handle(type_tag))
            });

        match selected {
            Some(handler) => handler.handle(payload, hint).await,
            None => {
                tracing::warn!(type_tag, "no notification handler accepted event");
                None
            }
        }
    }
}
