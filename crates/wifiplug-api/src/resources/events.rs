// Stored event lookup.

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::EventRecord;

impl ApiClient {
    /// `GET event/{uuid}`
    pub async fn get_event(&self, event: Uuid, cancel: &CancellationToken) -> Result<EventRecord, Error> {
        self.request_json(Method::GET, &format!("event/{event}"), cancel)
            .await
    }
}
