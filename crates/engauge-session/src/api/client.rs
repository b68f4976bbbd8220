//! Authenticated client for the Engauge dashboard API.
//!
//! Every request goes through [`ApiClient`], which reads the credential from
//! the [`Session`], attaches it as a bearer token and classifies the response.
//! Without a credential nothing is sent.

use std::fmt::Display;
use std::time::Duration;

use reqwest::{header, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::auth::Session;
use crate::models::{Resource, Settings};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Path prefix of all dashboard resources
const DASHBOARD_PATH: &str = "/dashboard";

/// Response header carrying the collection size for paginated lists.
pub const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Page size used when the caller does not pick one.
const DEFAULT_PER_PAGE: u32 = 10;

// ============================================================================
// Request / response types
// ============================================================================

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Records skipped before this page. Page 0 is treated as page 1.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListParams {
    pub pagination: Pagination,
}

impl ListParams {
    pub fn page(page: u32, per_page: u32) -> Self {
        Self {
            pagination: Pagination::new(page, per_page),
        }
    }
}

/// One page of a collection plus the collection's total size.
#[derive(Debug, Clone, PartialEq)]
pub struct ListResult<T> {
    pub data: Vec<T>,
    pub total: u64,
}

#[derive(Serialize)]
struct IdFilter<'a, I> {
    id: &'a [I],
}

// ============================================================================
// Client
// ============================================================================

/// Clone is cheap - it shares the session and its connection pool.
#[derive(Clone, Debug)]
pub struct ApiClient {
    session: Session,
}

impl ApiClient {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn collection_url(&self, resource: &str) -> String {
        self.session.url(&format!("{}/{}", DASHBOARD_PATH, resource))
    }

    /// Singleton resources ignore the id and use the collection path.
    fn record_url(&self, resource: &str, id: &dyn Display) -> String {
        if Resource::is_singleton_name(resource) {
            self.collection_url(resource)
        } else {
            self.session
                .url(&format!("{}/{}/{}", DASHBOARD_PATH, resource, id))
        }
    }

    fn ids_filter<I: Serialize>(ids: &[I]) -> Result<String, ApiError> {
        serde_json::to_string(&IdFilter { id: ids })
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode id filter: {}", e)))
    }

    /// Start an authenticated request. Fails without sending anything when
    /// the session holds no credential.
    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, ApiError> {
        let token = self
            .session
            .credential()
            .ok_or(ApiError::NotAuthenticated)?;

        debug!(method = %method, url = url, "Dashboard request");
        Ok(self
            .session
            .http()
            .request(method, url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// Decode a JSON body. An empty body decodes as `null`.
    async fn json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    fn total_count(response: &Response) -> Result<u64, ApiError> {
        let value = response
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .ok_or_else(|| {
                ApiError::InvalidResponse(format!("Missing {} header", TOTAL_COUNT_HEADER))
            })?;
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| {
                ApiError::InvalidResponse(format!("Invalid {} header: {:?}", TOTAL_COUNT_HEADER, value))
            })
    }

    async fn execute<T: DeserializeOwned>(
        builder: RequestBuilder,
        url: &str,
    ) -> Result<T, ApiError> {
        let response = Self::send(builder).await?;
        Self::json(response, url).await
    }

    async fn execute_list<T: DeserializeOwned>(
        builder: RequestBuilder,
        url: &str,
    ) -> Result<ListResult<T>, ApiError> {
        let response = Self::send(builder).await?;
        let total = Self::total_count(&response)?;
        let data = Self::json(response, url).await?;
        Ok(ListResult { data, total })
    }

    // ===== Data Provider Methods =====

    /// Fetch one page of a collection.
    pub async fn get_list<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &ListParams,
    ) -> Result<ListResult<T>, ApiError> {
        let url = self.collection_url(resource);
        let pagination = params.pagination;
        let builder = self
            .request(Method::GET, &url)?
            .query(&[("offset", pagination.offset()), ("limit", pagination.limit())]);
        Self::execute_list(builder, &url).await
    }

    pub async fn get_one<T: DeserializeOwned>(
        &self,
        resource: &str,
        id: impl Display,
    ) -> Result<T, ApiError> {
        let url = self.record_url(resource, &id);
        Self::execute(self.request(Method::GET, &url)?, &url).await
    }

    /// Fetch the records with the given ids.
    pub async fn get_many<T: DeserializeOwned, I: Serialize>(
        &self,
        resource: &str,
        ids: &[I],
    ) -> Result<Vec<T>, ApiError> {
        let url = self.collection_url(resource);
        let builder = self
            .request(Method::GET, &url)?
            .query(&[("filter", Self::ids_filter(ids)?)]);
        Self::execute(builder, &url).await
    }

    /// Fetch a whole referenced collection with its total.
    pub async fn get_many_reference<T: DeserializeOwned>(
        &self,
        resource: &str,
    ) -> Result<ListResult<T>, ApiError> {
        let url = self.collection_url(resource);
        Self::execute_list(self.request(Method::GET, &url)?, &url).await
    }

    pub async fn create<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        resource: &str,
        data: &B,
    ) -> Result<T, ApiError> {
        let url = self.collection_url(resource);
        Self::execute(self.request(Method::POST, &url)?.json(data), &url).await
    }

    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        resource: &str,
        id: impl Display,
        data: &B,
    ) -> Result<T, ApiError> {
        let url = self.record_url(resource, &id);
        Self::execute(self.request(Method::PUT, &url)?.json(data), &url).await
    }

    pub async fn update_many<T: DeserializeOwned, I: Serialize, B: Serialize + ?Sized>(
        &self,
        resource: &str,
        ids: &[I],
        data: &B,
    ) -> Result<T, ApiError> {
        let url = self.collection_url(resource);
        let builder = self
            .request(Method::PUT, &url)?
            .query(&[("filter", Self::ids_filter(ids)?)])
            .json(data);
        Self::execute(builder, &url).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        resource: &str,
        id: impl Display,
    ) -> Result<T, ApiError> {
        let url = self.record_url(resource, &id);
        Self::execute(self.request(Method::DELETE, &url)?, &url).await
    }

    pub async fn delete_many<T: DeserializeOwned, I: Serialize>(
        &self,
        resource: &str,
        ids: &[I],
    ) -> Result<T, ApiError> {
        let url = self.collection_url(resource);
        let builder = self
            .request(Method::DELETE, &url)?
            .query(&[("filter", Self::ids_filter(ids)?)]);
        Self::execute(builder, &url).await
    }

    // ===== Settings =====

    pub async fn get_settings(&self) -> Result<Settings, ApiError> {
        let url = self.collection_url(Resource::Settings.as_str());
        Self::execute(self.request(Method::GET, &url)?, &url).await
    }

    pub async fn update_settings(&self, settings: &Settings) -> Result<Settings, ApiError> {
        let url = self.collection_url(Resource::Settings.as_str());
        Self::execute(self.request(Method::PUT, &url)?.json(settings), &url).await
    }
}
