//! Coinbase Exchange REST integration.
//!
//! Base URL: https://api.exchange.coinbase.com (override via `exchange.api_url`)
//! Auth: `CB-ACCESS-*` headers; the signature is a base64 HMAC-SHA256 of
//! `timestamp + method + request_path + body`, keyed by the
//! base64-decoded API secret. Time, order book and products are public.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{header::CONTENT_TYPE, Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::{Exchange, ExchangeError};
use crate::types::{Account, BookLevel, LimitBuy, OrderAck, OrderBook, OrderStatus, Product};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const API_URL: &str = "https://api.exchange.coinbase.com";

type HmacSha256 = Hmac<Sha256>;

/// API credentials for private endpoints.
pub struct Credentials {
    pub api_key: String,
    pub api_secret: SecretString,
    pub passphrase: SecretString,
}

// ---------------------------------------------------------------------------
// API response types (Coinbase JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CbTime {
    epoch: f64,
}

/// Level-2 book: each level is `[price, size, num_orders]`.
#[derive(Debug, Deserialize)]
struct CbBook {
    #[serde(default)]
    bids: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    asks: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct CbProduct {
    id: String,
    #[serde(default)]
    base_min_size: Option<String>,
    #[serde(default)]
    base_max_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CbAccount {
    id: String,
    currency: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct CbOrder {
    id: String,
    product_id: String,
    status: OrderStatus,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    filled_size: Option<String>,
    #[serde(default)]
    reject_reason: Option<String>,
}

impl CbOrder {
    fn into_ack(self) -> Result<OrderAck, ExchangeError> {
        Ok(OrderAck {
            price: parse_optional(self.price.as_deref(), "price")?,
            size: parse_optional(self.size.as_deref(), "size")?,
            filled_size: parse_optional(self.filled_size.as_deref(), "filled_size")?,
            id: self.id,
            market: self.product_id,
            status: self.status,
            reject_reason: self.reject_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Coinbase Exchange client.
pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    /// Optional, only needed for accounts and orders.
    credentials: Option<Credentials>,
    /// Venue time minus local time, refreshed on every `/time` read.
    /// Signatures are stamped in venue time.
    clock_offset_ms: AtomicI64,
}

impl CoinbaseClient {
    pub fn new(base_url: Option<String>, credentials: Option<Credentials>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("dca_bot/0.1.0")
            .build()
            .context("Failed to build HTTP client for Coinbase")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| API_URL.to_string()),
            credentials,
            clock_offset_ms: AtomicI64::new(0),
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn public_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Coinbase public request");
        let resp = self.http.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn private_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<T, ExchangeError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials("private endpoints"))?;

        let body = body.unwrap_or_default();
        let timestamp = self.request_timestamp(chrono::Utc::now().timestamp_millis());
        let signature = sign(creds, &timestamp, method.as_str(), path, &body)?;

        debug!(method = %method, path, "Coinbase private request");

        let mut req = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .header("CB-ACCESS-KEY", &creds.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header("CB-ACCESS-PASSPHRASE", creds.passphrase.expose_secret())
            .header(CONTENT_TYPE, "application/json");
        if !body.is_empty() {
            req = req.body(body);
        }

        let resp = req.send().await?;
        Self::decode(resp).await
    }

    /// `CB-ACCESS-TIMESTAMP` value (seconds) for a local instant.
    fn request_timestamp(&self, local_ms: i64) -> String {
        let venue_ms = local_ms.saturating_add(self.clock_offset_ms.load(Ordering::Relaxed));
        venue_ms.div_euclid(1000).to_string()
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ExchangeError> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(|e| ExchangeError::Decode(e.to_string()));
        }

        let body = resp.text().await.unwrap_or_default();
        let message = error_message(&body);
        Err(match status {
            StatusCode::NOT_FOUND => ExchangeError::NotFound(message),
            StatusCode::BAD_REQUEST => ExchangeError::Rejected(message),
            _ => ExchangeError::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

/// Compute the `CB-ACCESS-SIGN` header value.
fn sign(
    creds: &Credentials,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let key = BASE64
        .decode(creds.api_secret.expose_secret())
        .map_err(|e| ExchangeError::Request(format!("API secret is not valid base64: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExchangeError::Request(format!("Invalid HMAC key: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Coinbase error bodies look like `{"message": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw).map_err(|e| ExchangeError::Decode(format!("{field} = {raw:?}: {e}")))
}

fn parse_optional(raw: Option<&str>, field: &str) -> Result<Decimal, ExchangeError> {
    raw.map_or(Ok(Decimal::ZERO), |s| parse_decimal(s, field))
}

fn parse_level(raw: &[serde_json::Value]) -> Result<BookLevel, ExchangeError> {
    let field = |idx: usize, name: &str| -> Result<Decimal, ExchangeError> {
        match raw.get(idx) {
            Some(serde_json::Value::String(s)) => parse_decimal(s, name),
            Some(serde_json::Value::Number(n)) => parse_decimal(&n.to_string(), name),
            other => Err(ExchangeError::Decode(format!("book level {name}: {other:?}"))),
        }
    };
    Ok(BookLevel {
        price: field(0, "price")?,
        size: field(1, "size")?,
    })
}

// ---------------------------------------------------------------------------
// Exchange impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Exchange for CoinbaseClient {
    async fn server_time_ms(&self) -> Result<i64, ExchangeError> {
        let time: CbTime = self.public_get("/time").await?;
        let venue_ms = (time.epoch * 1000.0) as i64;
        self.clock_offset_ms.store(
            venue_ms.saturating_sub(chrono::Utc::now().timestamp_millis()),
            Ordering::Relaxed,
        );
        Ok(venue_ms)
    }

    async fn order_book(&self, market: &str) -> Result<OrderBook, ExchangeError> {
        let path = format!("/products/{}/book?level=2", urlencoding::encode(market));
        let book: CbBook = self.public_get(&path).await?;
        Ok(OrderBook {
            bids: book.bids.iter().map(|l| parse_level(l)).collect::<Result<_, _>>()?,
            asks: book.asks.iter().map(|l| parse_level(l)).collect::<Result<_, _>>()?,
        })
    }

    async fn products(&self) -> Result<Vec<Product>, ExchangeError> {
        let raw: Vec<CbProduct> = self.public_get("/products").await?;
        raw.into_iter()
            .map(|p| {
                Ok(Product {
                    base_min_size: parse_optional(p.base_min_size.as_deref(), "base_min_size")?,
                    base_max_size: p
                        .base_max_size
                        .as_deref()
                        .map(|s| parse_decimal(s, "base_max_size"))
                        .transpose()?,
                    id: p.id,
                })
            })
            .collect()
    }

    async fn accounts(&self) -> Result<Vec<Account>, ExchangeError> {
        let raw: Vec<CbAccount> = self.private_request(Method::GET, "/accounts", None).await?;
        raw.into_iter()
            .map(|a| {
                Ok(Account {
                    balance: parse_decimal(&a.balance, "balance")?,
                    id: a.id,
                    currency: a.currency,
                })
            })
            .collect()
    }

    async fn account_balance(&self, account_id: &str) -> Result<Decimal, ExchangeError> {
        let path = format!("/accounts/{}", urlencoding::encode(account_id));
        let account: CbAccount = self.private_request(Method::GET, &path, None).await?;
        parse_decimal(&account.balance, "balance")
    }

    async fn place_limit_buy(&self, order: &LimitBuy) -> Result<OrderAck, ExchangeError> {
        let body = serde_json::json!({
            "side": "buy",
            "type": "limit",
            "product_id": order.market,
            "price": order.price.to_string(),
            "size": order.size.to_string(),
            "post_only": order.post_only,
            "time_in_force": "GTT",
            "cancel_after": order.cancel_after.as_str(),
            "client_oid": order.client_oid,
        });
        let placed: CbOrder = self
            .private_request(Method::POST, "/orders", Some(body.to_string()))
            .await?;
        placed.into_ack()
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderAck, ExchangeError> {
        let path = format!("/orders/{}", urlencoding::encode(order_id));
        let order: CbOrder = self.private_request(Method::GET, &path, None).await?;
        order.into_ack()
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/orders/{}", urlencoding::encode(order_id));
        let _: serde_json::Value = self.private_request(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
