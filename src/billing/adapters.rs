use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::models::{ListFilter, RemoteObject, SemanticType};
use crate::config;

/// Error code the provider returns when a subscription has nothing upcoming.
pub const UPCOMING_NONE_CODE: &str = "invoice_upcoming_none";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("malformed provider payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn api(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn not_found(kind: SemanticType, id: &str) -> Self {
        Self::api(
            404,
            Some("resource_missing"),
            format!("No such {kind}: '{id}'"),
        )
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    fn from_body(status: StatusCode, body: &Value) -> Self {
        let error = &body["error"];
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        Self::api(status.as_u16(), error["code"].as_str(), message)
    }
}

/// One page of a provider list call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPage {
    pub data: Vec<RemoteObject>,
    #[serde(default)]
    pub has_more: bool,
}

/// key: billing-adapter -> provider integration
///
/// Every call carries the caller's API key; adapters hold no credentials.
#[async_trait]
pub trait BillingProviderAdapter: Send + Sync {
    async fn retrieve(
        &self,
        api_key: &str,
        kind: SemanticType,
        id: &str,
    ) -> Result<RemoteObject, ProviderError>;

    /// Fetches the page following `starting_after`, or the first page.
    async fn list_page(
        &self,
        api_key: &str,
        kind: SemanticType,
        filter: &ListFilter,
        starting_after: Option<&str>,
    ) -> Result<ListPage, ProviderError>;

    /// `Ok(None)` when the subscription has no upcoming invoice.
    async fn upcoming_invoice(
        &self,
        api_key: &str,
        subscription_id: &str,
    ) -> Result<Option<RemoteObject>, ProviderError>;
}

/// key: billing-adapter-stripe -> REST client
pub struct StripeAdapter {
    client: Client,
    base_url: Url,
    page_size: u32,
}

impl StripeAdapter {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration, page_size: u32) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref()).context("invalid billing provider URL")?;
        if base_url.cannot_be_a_base() {
            bail!("billing provider URL {base_url} cannot carry a path");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build billing provider client")?;
        Ok(Self {
            client,
            base_url,
            page_size: page_size.clamp(1, 100),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(
            config::BILLING_API_BASE_URL.as_str(),
            Duration::from_secs(*config::BILLING_API_TIMEOUT_SECS),
            *config::BILLING_LIST_PAGE_SIZE,
        )
    }

    /// Each segment is percent-encoded, so ids never add path components.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    async fn get(
        &self,
        api_key: &str,
        segments: &[&str],
        query: &[(String, String)],
    ) -> Result<Value, ProviderError> {
        let url = self.endpoint(segments);
        debug!(%url, "billing provider request");
        let response = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }
        let body = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        Err(ProviderError::from_body(status, &body))
    }
}

#[async_trait]
impl BillingProviderAdapter for StripeAdapter {
    async fn retrieve(
        &self,
        api_key: &str,
        kind: SemanticType,
        id: &str,
    ) -> Result<RemoteObject, ProviderError> {
        // Dot segments would be dropped from the path and hit the list endpoint.
        if matches!(id, "" | "." | "..") {
            return Err(ProviderError::not_found(kind, id));
        }
        let body = self.get(api_key, &[kind.resource_path(), id], &[]).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn list_page(
        &self,
        api_key: &str,
        kind: SemanticType,
        filter: &ListFilter,
        starting_after: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        let mut query: Vec<(String, String)> = filter
            .iter()
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        query.push(("limit".to_string(), self.page_size.to_string()));
        if let Some(cursor) = starting_after {
            query.push(("starting_after".to_string(), cursor.to_string()));
        }
        let body = self.get(api_key, &[kind.resource_path()], &query).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn upcoming_invoice(
        &self,
        api_key: &str,
        subscription_id: &str,
    ) -> Result<Option<RemoteObject>, ProviderError> {
        let query = [("subscription".to_string(), subscription_id.to_string())];
        match self.get(api_key, &["invoices", "upcoming"], &query).await {
            Ok(body) => Ok(Some(serde_json::from_value(body)?)),
            Err(err) if err.code() == Some(UPCOMING_NONE_CODE) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
