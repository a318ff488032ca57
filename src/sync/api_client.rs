//! HttpContactApiClient: maps the four identity calls onto JSON requests.
//!
//! The HTTP stack itself (base URL, credentials, TLS, timeouts) is supplied by
//! the host through [`HttpSender`]. This module owns request bodies, response
//! parsing and status classification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::mutation::{AttributeMutation, TagGroupsMutation};
use crate::types::ContactIdentity;

use super::types::{ApiResult, ContactApi, ContactApiError};

pub const RESOLVE_PATH: &str = "api/contacts/resolve/";
pub const IDENTIFY_PATH: &str = "api/contacts/identify/";
pub const RESET_PATH: &str = "api/contacts/reset/";
pub const UPDATE_PATH_PREFIX: &str = "api/contacts/";

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: &'static str,
    /// Path relative to the device API base URL.
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<String>,
}

/// Executes one request. `Err` means no HTTP status was received
/// (connection failure, timeout).
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

#[derive(Debug, Deserialize)]
struct IdentityBody {
    contact_id: String,
    #[serde(default)]
    is_anonymous: bool,
}

pub struct HttpContactApiClient {
    sender: Arc<dyn HttpSender>,
    device_type: String,
}

impl HttpContactApiClient {
    pub fn new(sender: Arc<dyn HttpSender>, device_type: impl Into<String>) -> Self {
        Self {
            sender,
            device_type: device_type.into(),
        }
    }

    async fn post(&self, path: String, body: Value) -> ApiResult<HttpResponse> {
        let response = self
            .sender
            .send(HttpRequest {
                method: "POST",
                path,
                body,
            })
            .await
            .map_err(ContactApiError::Transport)?;

        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            let message = response.body.clone().unwrap_or_default();
            Err(ContactApiError::from_status(response.status, message))
        }
    }

    fn parse_identity(response: &HttpResponse) -> ApiResult<IdentityBody> {
        let raw = response.body.as_deref().unwrap_or_default();
        serde_json::from_str(raw).map_err(|e| {
            ContactApiError::Transport(format!("malformed contact response: {e}"))
        })
    }
}

#[async_trait]
impl ContactApi for HttpContactApiClient {
    async fn resolve(&self, channel_id: &str) -> ApiResult<ContactIdentity> {
        let body = json!({
            "channel_id": channel_id,
            "device_type": self.device_type,
        });
        let response = self.post(RESOLVE_PATH.to_string(), body).await?;
        let parsed = Self::parse_identity(&response)?;
        Ok(ContactIdentity {
            contact_id: parsed.contact_id,
            is_anonymous: parsed.is_anonymous,
            named_user_id: None,
        })
    }

    async fn identify(
        &self,
        named_user_id: &str,
        channel_id: &str,
        contact_id: Option<&str>,
    ) -> ApiResult<ContactIdentity> {
        let mut body = json!({
            "named_user_id": named_user_id,
            "channel_id": channel_id,
            "device_type": self.device_type,
        });
        if let (Some(contact_id), Some(map)) = (contact_id, body.as_object_mut()) {
            map.insert("contact_id".to_string(), json!(contact_id));
        }
        let response = self.post(IDENTIFY_PATH.to_string(), body).await?;
        let parsed = Self::parse_identity(&response)?;
        Ok(ContactIdentity::named(parsed.contact_id, named_user_id))
    }

    async fn reset(&self, channel_id: &str) -> ApiResult<ContactIdentity> {
        let body = json!({
            "channel_id": channel_id,
            "device_type": self.device_type,
        });
        let response = self.post(RESET_PATH.to_string(), body).await?;
        let parsed = Self::parse_identity(&response)?;
        Ok(ContactIdentity::anonymous(parsed.contact_id))
    }

    async fn update(
        &self,
        contact_id: &str,
        tag_group_mutations: &[TagGroupsMutation],
        attribute_mutations: &[AttributeMutation],
    ) -> ApiResult<()> {
        let mut body = Map::new();
        let tags = merged_tags(tag_group_mutations);
        if !tags.is_empty() {
            body.insert("tags".to_string(), Value::Object(tags));
        }
        if !attribute_mutations.is_empty() {
            let attributes = AttributeMutation::collapse(attribute_mutations);
            let attributes = serde_json::to_value(&attributes).map_err(|e| {
                ContactApiError::Transport(format!("unserializable attributes: {e}"))
            })?;
            body.insert("attributes".to_string(), attributes);
        }
        self.post(
            format!("{UPDATE_PATH_PREFIX}{contact_id}"),
            Value::Object(body),
        )
        .await?;
        Ok(())
    }
}

/// Collapse tag group mutations into one `{"set":…,"add":…,"remove":…}`
/// object. Collapsing yields at most one `set` mutation and one `add`/`remove`
/// mutation, so their keys never collide.
fn merged_tags(mutations: &[TagGroupsMutation]) -> Map<String, Value> {
    let mut merged = Map::new();
    for mutation in TagGroupsMutation::collapse(mutations) {
        if let Ok(Value::Object(fields)) = serde_json::to_value(&mutation) {
            merged.extend(fields);
        }
    }
    merged
}
