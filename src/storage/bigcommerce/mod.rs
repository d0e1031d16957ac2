use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::Config;
use crate::storage::{Storage, StorageFactory, StorageTrait};
use crate::types::error::{ApiError, BcrmError};
use crate::types::{CustomerId, CustomerPage, DeletionStatistics, join_ids};

const DEFAULT_API_HOST: &str = "https://api.bigcommerce.com";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const RATE_LIMIT_RESET_HEADER: &str = "X-Rate-Limit-Time-Reset-Ms";
const DEFAULT_RATE_LIMIT_RESET: Duration = Duration::from_secs(1);

/// Factory for creating BigCommerce storage instances.
pub struct BigCommerceStorageFactory;

#[async_trait]
impl StorageFactory for BigCommerceStorageFactory {
    async fn create(
        config: Config,
        stats_sender: Sender<DeletionStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Result<Storage> {
        let base_url = base_url(
            &config.target.store_hash,
            config.target.api_base_url.as_deref(),
        );

        let mut token = HeaderValue::from_str(&config.target.credential.access_token)
            .map_err(|_| {
                anyhow!(BcrmError::InvalidConfig(
                    "access token contains characters that are not valid in an HTTP header."
                        .to_string()
                ))
            })?;
        token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTH_TOKEN_HEADER, token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.client_config.request_timeout_milliseconds {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        if let Some(timeout) = config.client_config.connect_timeout_milliseconds {
            builder = builder.connect_timeout(Duration::from_millis(timeout));
        }
        let http = builder.build().map_err(|e| {
            anyhow!(BcrmError::InvalidConfig(format!(
                "failed to build HTTP client: {e}"
            )))
        })?;

        debug!(base_url = base_url, "BigCommerce storage created.");

        Ok(Box::new(BigCommerceStorage {
            base_url,
            http,
            error_body_max_chars: config.client_config.error_body_max_chars,
            stats_sender,
            has_warning,
        }))
    }
}

/// Customers endpoint of the BigCommerce v3 management API.
#[derive(Clone)]
struct BigCommerceStorage {
    base_url: String,
    http: reqwest::Client,
    error_body_max_chars: usize,
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
struct ListCustomersResponse {
    #[serde(default)]
    data: Vec<CustomerEntry>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
struct CustomerEntry {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total: Option<u64>,
    current_page: Option<u64>,
    total_pages: Option<u64>,
}

#[async_trait]
impl StorageTrait for BigCommerceStorage {
    async fn list_customers(&self, page: u32, limit: u16) -> Result<CustomerPage, ApiError> {
        let url = format!("{}/customers", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("page", page.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport_error)?;
        trace!(page = page, status = status.as_u16(), "list customers response.");

        if !status.is_success() {
            return Err(classify_error_response(
                status,
                &headers,
                &body,
                self.error_body_max_chars,
            ));
        }

        parse_customer_page(&body).map_err(|e| ApiError::ServerError {
            status: status.as_u16(),
            message: format!("unexpected listing body for page {page}: {e}"),
        })
    }

    async fn delete_customers(&self, ids: &[CustomerId]) -> Result<(), ApiError> {
        // `id:in` must reach the API unencoded.
        let url = format!("{}/customers?id:in={}", self.base_url, join_ids(ids));
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if is_delete_success(status) {
            if status == StatusCode::NOT_FOUND {
                debug!(customer_ids = join_ids(ids), "customers already absent.");
            }
            return Ok(());
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error_response(
            status,
            &headers,
            &body,
            self.error_body_max_chars,
        ))
    }

    fn get_stats_sender(&self) -> Sender<DeletionStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: DeletionStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}

fn base_url(store_hash: &str, api_base_url: Option<&str>) -> String {
    match api_base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => format!("{DEFAULT_API_HOST}/stores/{store_hash}/v3"),
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    ApiError::TransientNetwork(e.to_string())
}

fn is_delete_success(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::NOT_FOUND
}

fn parse_customer_page(body: &str) -> Result<CustomerPage, serde_json::Error> {
    let response: ListCustomersResponse = serde_json::from_str(body)?;
    let pagination = response.meta.and_then(|meta| meta.pagination);

    let (has_more, total) = match pagination {
        Some(pagination) => {
            let has_more = match (pagination.current_page, pagination.total_pages) {
                (Some(current), Some(total_pages)) => Some(current < total_pages),
                _ => None,
            };
            (has_more, pagination.total)
        }
        None => (None, None),
    };

    Ok(CustomerPage {
        ids: response.data.into_iter().map(|c| CustomerId(c.id)).collect(),
        has_more,
        total,
    })
}

fn classify_error_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    body_max_chars: usize,
) -> ApiError {
    let code = status.as_u16();
    let message = truncate_body(body, body_max_chars);
    if message.len() < body.trim().len() {
        debug!(status = code, body = body, "full error response body.");
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ApiError::RateLimited(rate_limit_reset(headers));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ApiError::Authentication {
            status: code,
            message,
        };
    }
    if status.is_server_error() {
        return ApiError::ServerError {
            status: code,
            message,
        };
    }
    ApiError::ClientRejection {
        status: code,
        message,
    }
}

fn rate_limit_reset(headers: &HeaderMap) -> Duration {
    if let Some(millis) = header_as_u64(headers, RATE_LIMIT_RESET_HEADER) {
        return Duration::from_millis(millis);
    }
    if let Some(seconds) = header_as_u64(headers, RETRY_AFTER.as_str()) {
        return Duration::from_secs(seconds);
    }
    DEFAULT_RATE_LIMIT_RESET
}

fn header_as_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn truncate_body(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    if max_chars == 0 || body.chars().count() <= max_chars {
        return body.to_string();
    }
    let truncated: String = body.chars().take(max_chars).collect();
    format!("{truncated}...")
}
