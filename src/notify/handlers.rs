//! The per-category notification handlers.
//!
//! Side effects stay confined: every handler only produces a notification
//! descriptor, except the location-share handler which additionally
//! republishes "shared" payloads into the registry. No handler touches
//! session or subscription state.

use super::{
    Notification, NotificationAction, NotificationEvent, NotificationHandler, NotificationPayload,
};
use crate::registry::SharedLocationRegistry;
use async_trait::async_trait;

/// Payload override for the notification title, with the router's hint as a
/// last resort.
fn title_for(payload: &NotificationPayload, hint: Option<&str>, default: &str) -> String {
    payload
        .get("title")
        .map(String::as_str)
        .or(hint)
        .unwrap_or(default)
        .to_string()
}

fn body_for(payload: &NotificationPayload, default: &str) -> String {
    payload
        .get("body")
        .map(String::as_str)
        .unwrap_or(default)
        .to_string()
}

fn peer_name(payload: &NotificationPayload) -> String {
    payload
        .get("userName")
        .or_else(|| payload.get("fromUserName"))
        .cloned()
        .unwrap_or_else(|| "someone".to_string())
}

/// Content identifier, either direct or nested inside the JSON-encoded
/// `data` sub-field.
fn content_id(payload: &NotificationPayload) -> Option<String> {
    if let Some(direct) = payload.get("contentId") {
        return Some(direct.clone());
    }
    payload
        .get("data")
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|data| {
            data.get("contentId")
                .and_then(|value| value.as_str().map(String::from))
        })
}

/// Handles `post_like`, `post_comment` and `normal` engagement pushes.
pub struct PostEngagementHandler;

impl PostEngagementHandler {
    fn extract(payload: &NotificationPayload) -> NotificationEvent {
        NotificationEvent::PostEngagement {
            kind: payload.get("type").cloned().unwrap_or_default(),
            content_id: content_id(payload),
        }
    }
}

#[async_trait]
impl NotificationHandler for PostEngagementHandler {
    fn can_handle(&self, type_tag: &str) -> bool {
        matches!(type_tag, "post_like" | "post_comment" | "normal")
    }

    async fn handle(
        &self,
        payload: &NotificationPayload,
        hint: Option<&str>,
    ) -> Option<Notification> {
        match Self::extract(payload) {
            NotificationEvent::PostEngagement { kind, content_id } => {
                if content_id.is_none() {
                    // Still worth a generic notification, just without a deep link.
                    tracing::debug!(kind = %kind, "no content id recoverable from payload");
                }

                let (default_title, default_body) = match kind.as_str() {
                    "post_like" => ("New like", "Someone liked your post"),
                    "post_comment" => ("New comment", "Someone commented on your post"),
                    _ => ("New activity", "There is new activity on your post"),
                };

                Some(Notification {
                    type_tag: kind,
                    title: title_for(payload, hint, default_title),
                    body: body_for(payload, default_body),
                    content_id,
                    actions: Vec::new(),
                })
            }
            _ => None,
        }
    }
}

/// Handles the three location-sharing categories and republishes "shared"
/// payloads into the registry.
pub struct LocationShareHandler {
    registry: SharedLocationRegistry,
}

impl LocationShareHandler {
    pub fn new(registry: SharedLocationRegistry) -> Self {
        Self { registry }
    }

    fn extract(&self, type_tag: &str, payload: &NotificationPayload) -> NotificationEvent {
        match type_tag {
            "location_share_request" => NotificationEvent::LocationShareRequest {
                peer_name: peer_name(payload),
                share_request_id: payload.get("shareRequestId").cloned(),
                actionable: payload
                    .get("action_buttons")
                    .is_some_and(|value| value == "true"),
            },
            "location_share_rejected" => NotificationEvent::LocationShareRejected {
                peer_name: peer_name(payload),
            },
            _ => {
                let latitude = payload
                    .get("latitude")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(f64::NAN);
                let longitude = payload
                    .get("longitude")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(f64::NAN);
                NotificationEvent::LocationShared {
                    peer_name: peer_name(payload),
                    latitude,
                    longitude,
                    display_until: payload.get("displayUntil").cloned().unwrap_or_default(),
                    share_id: payload.get("shareId").cloned().unwrap_or_default(),
                }
            }
        }
    }
}

#[async_trait]
impl NotificationHandler for LocationShareHandler {
    fn can_handle(&self, type_tag: &str) -> bool {
        matches!(
            type_tag,
            "location_share_request" | "location_share" | "location_share_rejected"
        )
    }

    async fn handle(
        &self,
        payload: &NotificationPayload,
        hint: Option<&str>,
    ) -> Option<Notification> {
        let type_tag = payload.get("type").cloned().unwrap_or_default();

        match self.extract(&type_tag, payload) {
            NotificationEvent::LocationShareRequest {
                peer_name,
                share_request_id,
                actionable,
            } => {
                let actions = if actionable {
                    vec![
                        NotificationAction {
                            id: "accept_share".to_string(),
                            label: "Accept".to_string(),
                        },
                        NotificationAction {
                            id: "reject_share".to_string(),
                            label: "Reject".to_string(),
                        },
                    ]
                } else {
                    Vec::new()
                };
                Some(Notification {
                    type_tag,
                    title: title_for(payload, hint, "Location share request"),
                    body: body_for(
                        payload,
                        &format!("{} wants to share their location with you", peer_name),
                    ),
                    content_id: share_request_id,
                    actions,
                })
            }
            NotificationEvent::LocationShared {
                peer_name,
                latitude,
                longitude,
                display_until,
                share_id,
            } => {
                if share_id.is_empty() || latitude.is_nan() || longitude.is_nan() {
                    tracing::warn!("location_share payload missing coordinates or share id");
                } else if let Err(e) = self
                    .registry
                    .upsert(&peer_name, latitude, longitude, &display_until, &share_id)
                    .await
                {
                    tracing::warn!(error = %e, share_id = %share_id, "failed to register shared location");
                }
                Some(Notification {
                    type_tag,
                    title: title_for(payload, hint, "Location shared"),
                    body: body_for(payload, &format!("{} shared their location", peer_name)),
                    content_id: Some(share_id).filter(|id| !id.is_empty()),
                    actions: Vec::new(),
                })
            }
            NotificationEvent::LocationShareRejected { peer_name } => Some(Notification {
                type_tag,
                title: title_for(payload, hint, "Location share declined"),
                body: body_for(
                    payload,
                    &format!("{} declined your location share request", peer_name),
                ),
                content_id: None,
                actions: Vec::new(),
            }),
            _ => None,
        }
    }
}

/// Catch-all fallback: best-effort notification from whatever is present.
pub struct GeneralHandler;

#[async_trait]
impl NotificationHandler for GeneralHandler {
    fn is_fallback(&self) -> bool {
        true
    }

    fn can_handle(&self, _type_tag: &str) -> bool {
        true
    }

    async fn handle(
        &self,
        payload: &NotificationPayload,
        hint: Option<&str>,
    ) -> Option<Notification> {
        Some(Notification {
            type_tag: payload.get("type").cloned().unwrap_or_default(),
            title: title_for(payload, hint, "New notification"),
            body: body_for(payload, ""),
            content_id: content_id(payload),
            actions: Vec::new(),
        })
    }
}
