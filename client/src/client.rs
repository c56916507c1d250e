//! Farmers market API client implementation

use crate::error::MarketClientError;
use market_core::{AvailabilityError, AvailabilitySource, Grant};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Public farmers market purchase endpoint.
pub const DEFAULT_API_URL: &str = "https://recruitment.alegra.com/api/farmers-market/buy";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyResponse {
    #[serde(default)]
    quantity_sold: Option<u64>,
}

/// Farmers market API client
///
/// Each [`buy`](Self::buy) is one purchase attempt: the market sells whatever
/// it has of the ingredient right now, possibly nothing.
#[derive(Clone, Debug)]
pub struct MarketClient {
    client: Client,
    api_url: String,
}

impl MarketClient {
    /// Create a client for `api_url` with the default timeout
    ///
    /// # Errors
    ///
    /// Returns `MarketClientError::Build` if the HTTP client cannot be created
    pub fn new(api_url: impl Into<String>) -> Result<Self, MarketClientError> {
        Self::with_timeout(api_url, DEFAULT_TIMEOUT)
    }

    /// Create a client for `api_url` whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns `MarketClientError::Build` if the HTTP client cannot be created
    pub fn with_timeout(
        api_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MarketClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    /// The endpoint this client calls
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Try to buy `ingredient`, returning the quantity sold
    ///
    /// A missing or null `quantitySold` counts as nothing sold.
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, non-success statuses, or bodies
    /// that are not a JSON object with a non-negative integer `quantitySold`
    pub async fn buy(&self, ingredient: &str) -> Result<u64, MarketClientError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("ingredient", ingredient)])
            .send()
            .await
            .map_err(|e| MarketClientError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<BuyResponse>()
            .await
            .map_err(|e| MarketClientError::ResponseParseFailed(e.to_string()))?;
        let sold = body.quantity_sold.unwrap_or(0);

        tracing::trace!(ingredient, sold, "Market answered");
        Ok(sold)
    }
}

impl AvailabilitySource for MarketClient {
    fn acquire(
        &self,
        ingredient: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Grant, AvailabilityError>> + Send + '_>> {
        let ingredient = ingredient.to_string();
        Box::pin(async move { self.buy(&ingredient).await.map_err(AvailabilityError::from) })
    }
}
