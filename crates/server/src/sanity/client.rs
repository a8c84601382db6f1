//! HTTP implementation of [`ContentStore`] against the Sanity API.
//!
//! Uses the query endpoint for GROQ reads and the mutate endpoint for
//! writes. Conditional writes use `ifRevisionID`; the store answers a
//! failed revision guard with HTTP 409, which maps to
//! [`ContentError::Conflict`].

use async_trait::async_trait;
use ecometal_core::{OrderId, Revision, VariantId};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::config::SanityConfig;

use super::types::{
    NewOrder, OrderPatch, OrderSettlementView, OrderStatusView, Transaction, VariantSnapshot,
};
use super::{ContentError, ContentStore};

/// GROQ query for reservation-time variant snapshots.
const VARIANT_SNAPSHOTS_QUERY: &str = r#"*[_type == "variant" && _id in $ids]{
  _id, _rev, stock, price, currency, stripePriceId, format,
  "title": product->name
}"#;

/// GROQ query joining an order with the live stock of its variants.
const ORDER_FOR_SETTLEMENT_QUERY: &str = r#"*[_type == "order" && _id == $id][0]{
  _id, _rev, status,
  items[]{ quantity, variant->{ _id, _rev, stock } }
}"#;

/// GROQ query for just an order's revision and status.
const ORDER_STATUS_QUERY: &str = r#"*[_type == "order" && _id == $id][0]{ _rev, status }"#;

/// Client for the Sanity HTTP API.
#[derive(Clone)]
pub struct SanityClient {
    client: reqwest::Client,
    query_url: String,
    mutate_url: String,
}

#[derive(Debug, serde::Deserialize)]
struct QueryResponse<T> {
    result: T,
}

#[derive(Debug, serde::Deserialize)]
struct MutateResponse {
    #[serde(default)]
    results: Vec<MutateResult>,
}

#[derive(Debug, serde::Deserialize)]
struct MutateResult {
    id: String,
}

impl SanityClient {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API token is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &SanityConfig) -> Result<Self, ContentError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.token.expose_secret());
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&auth_value)
                .map_err(|e| ContentError::Parse(format!("invalid API token: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        // The plain api host, never apicdn: reservation and settlement need
        // live reads, not cached ones.
        let base = format!(
            "https://{}.api.sanity.io/v{}/data",
            config.project_id, config.api_version
        );

        Ok(Self {
            client,
            query_url: format!("{base}/query/{}", config.dataset),
            mutate_url: format!("{base}/mutate/{}?visibility=sync&returnIds=true", config.dataset),
        })
    }

    /// Run a GROQ query and deserialize the `result` field.
    async fn query<T: DeserializeOwned>(
        &self,
        groq: &str,
        params: Value,
    ) -> Result<T, ContentError> {
        let body = json!({ "query": groq, "params": params });
        let response = self.client.post(&self.query_url).json(&body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ContentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: QueryResponse<T> = response
            .json()
            .await
            .map_err(|e| ContentError::Parse(e.to_string()))?;
        Ok(parsed.result)
    }

    /// Post a list of mutations and return the affected document ids.
    async fn mutate(&self, mutations: Vec<Value>) -> Result<Vec<String>, ContentError> {
        let body = json!({ "mutations": mutations });
        let response = self.client.post(&self.mutate_url).json(&body).send().await?;
        let status = response.status();

        if status == StatusCode::CONFLICT {
            debug!("mutation rejected: revision guard failed");
            return Err(ContentError::Conflict);
        }
        if status == StatusCode::NOT_FOUND {
            let message = response.text().await.unwrap_or_default();
            return Err(ContentError::NotFound(message));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ContentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MutateResponse = response
            .json()
            .await
            .map_err(|e| ContentError::Parse(e.to_string()))?;
        Ok(parsed.results.into_iter().map(|r| r.id).collect())
    }
}

#[async_trait]
impl ContentStore for SanityClient {
    #[instrument(skip(self), fields(count = ids.len()))]
    async fn variant_snapshots(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantSnapshot>, ContentError> {
        let id_strings: Vec<&str> = ids.iter().map(VariantId::as_str).collect();
        self.query(VARIANT_SNAPSHOTS_QUERY, json!({ "ids": id_strings }))
            .await
    }

    #[instrument(skip_all)]
    async fn create_order(&self, order: &NewOrder) -> Result<OrderId, ContentError> {
        let mutation = json!({ "create": order.to_document() });
        let ids = self.mutate(vec![mutation]).await?;
        ids.into_iter()
            .next()
            .map(OrderId::new)
            .ok_or_else(|| ContentError::Parse("create returned no document id".to_string()))
    }

    #[instrument(skip(self))]
    async fn order_for_settlement(
        &self,
        id: &OrderId,
    ) -> Result<Option<OrderSettlementView>, ContentError> {
        self.query(ORDER_FOR_SETTLEMENT_QUERY, json!({ "id": id.as_str() }))
            .await
    }

    #[instrument(skip(self))]
    async fn order_status(&self, id: &OrderId) -> Result<Option<OrderStatusView>, ContentError> {
        self.query(ORDER_STATUS_QUERY, json!({ "id": id.as_str() }))
            .await
    }

    #[instrument(skip(self, patch))]
    async fn patch_order(
        &self,
        id: &OrderId,
        expected: Option<&Revision>,
        patch: OrderPatch,
    ) -> Result<(), ContentError> {
        let mut patch_body = json!({
            "id": id.as_str(),
            "set": patch.to_set_fields(),
        });
        if let (Some(rev), Some(obj)) = (expected, patch_body.as_object_mut()) {
            obj.insert("ifRevisionID".into(), json!(rev.as_str()));
        }

        self.mutate(vec![json!({ "patch": patch_body })]).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(patches = tx.patches.len()))]
    async fn commit(&self, tx: Transaction) -> Result<(), ContentError> {
        let mutations: Vec<Value> = tx
            .patches
            .iter()
            .map(|p| {
                let mut patch = json!({
                    "id": p.document_id,
                    "ifRevisionID": p.expected_revision.as_str(),
                });
                if let Some(obj) = patch.as_object_mut() {
                    if !p.set.is_empty() {
                        obj.insert("set".into(), Value::Object(p.set.clone()));
                    }
                    if !p.dec.is_empty() {
                        obj.insert("dec".into(), Value::Object(p.dec.clone()));
                    }
                }
                json!({ "patch": patch })
            })
            .collect();

        self.mutate(mutations).await?;
        Ok(())
    }
}
