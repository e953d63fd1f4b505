// Cursor-based scanning over paginated collections.
//
// Pages are requested as `{path}?limit=<1..=50>&cursor=<token>`, and each
// response carries the entities, the collection total and the next cursor.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::client::ApiClient;
use crate::error::Error;

/// Largest page the API serves.
pub const MAX_SCAN_LIMIT: u32 = 50;

// ── Cursor ───────────────────────────────────────────────────────────

/// Opaque continuation token. A missing token marks the end of a scan
/// (or, passed to a scan, its start).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(Option<String>);

impl Cursor {
    pub const END: Self = Self(None);

    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_end(&self) -> bool {
        self.0.is_none()
    }
}

// ── ScanResult ───────────────────────────────────────────────────────

/// One page of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult<T> {
    pub entities: Vec<T>,
    /// Size of the whole collection.
    pub total: u64,
    /// Where the next page starts.
    pub cursor: Cursor,
}

/// Response body of a paginated endpoint.
pub trait ScanPage: DeserializeOwned {
    type Entity;

    fn into_scan(self) -> ScanResult<Self::Entity>;
}

// ── Scanning ─────────────────────────────────────────────────────────

impl ApiClient {
    /// Fetch one page of `path`.
    ///
    /// `limit` must be in `1..=50`; anything else fails before a request is made.
    pub async fn scan<P: ScanPage>(
        &self,
        path: &str,
        limit: u32,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<ScanResult<P::Entity>, Error> {
        let uri = scan_uri(path, limit, cursor)?;
        let page: P = self.request_json(Method::GET, &uri, cancel).await?;
        Ok(page.into_scan())
    }

    /// Collect every entity of `path`, [`MAX_SCAN_LIMIT`] per page.
    pub async fn list_all<P: ScanPage>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<P::Entity>, Error> {
        self.list_all_with_limit::<P>(path, MAX_SCAN_LIMIT, cancel)
            .await
    }

    /// Collect every entity of `path`, `limit` per page, in page order.
    pub async fn list_all_with_limit<P: ScanPage>(
        &self,
        path: &str,
        limit: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<P::Entity>, Error> {
        let mut entities = Vec::new();
        let mut cursor = Cursor::END;

        loop {
            let page = self.scan::<P>(path, limit, &cursor, cancel).await?;
            entities.extend(page.entities);
            if page.cursor.is_end() {
                break;
            }
            cursor = page.cursor;
        }

        tracing::debug!(path, count = entities.len(), "listed collection");
        Ok(entities)
    }
}

fn scan_uri(path: &str, limit: u32, cursor: &Cursor) -> Result<String, Error> {
    if !(1..=MAX_SCAN_LIMIT).contains(&limit) {
        return Err(Error::LimitOutOfRange { limit });
    }

    let separator = if path.contains('?') { '&' } else { '?' };
    let mut uri = format!("{path}{separator}limit={limit}");
    if let Some(token) = cursor.token() {
        uri.push_str("&cursor=");
        uri.extend(form_urlencoded::byte_serialize(token.as_bytes()));
    }
    Ok(uri)
}
