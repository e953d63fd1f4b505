// Group endpoints

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{Control, Group, GroupResults};
use crate::pagination::{Cursor, ScanResult};

impl ApiClient {
    /// One page of groups.
    ///
    /// `GET group?limit=&cursor=`
    pub async fn scan_groups(
        &self,
        limit: u32,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<ScanResult<Group>, Error> {
        self.scan::<GroupResults>("group", limit, cursor, cancel)
            .await
    }

    pub async fn list_groups(&self, cancel: &CancellationToken) -> Result<Vec<Group>, Error> {
        self.list_all::<GroupResults>("group", cancel).await
    }

    /// `GET group/{uuid}`
    pub async fn get_group(&self, group: Uuid, cancel: &CancellationToken) -> Result<Group, Error> {
        self.request_json(Method::GET, &format!("group/{group}"), cancel)
            .await
    }

    /// `DELETE group/{uuid}`
    pub async fn delete_group(&self, group: Uuid, cancel: &CancellationToken) -> Result<(), Error> {
        debug!(%group, "deleting group");
        self.request_unit(Method::DELETE, &format!("group/{group}"), cancel)
            .await
    }

    /// Switch every item in a group on or off.
    ///
    /// `POST group/{uuid}/control`
    pub async fn control_group(
        &self,
        group: Uuid,
        state: bool,
        cancel: &CancellationToken,
    ) -> Result<Control, Error> {
        debug!(%group, state, "controlling group");
        self.request_json_with(
            Method::POST,
            &format!("group/{group}/control"),
            &Control { state },
            cancel,
        )
        .await
    }

    /// `POST group/{uuid}/toggle`
    pub async fn toggle_group(
        &self,
        group: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Control, Error> {
        debug!(%group, "toggling group");
        self.request_json(Method::POST, &format!("group/{group}/toggle"), cancel)
            .await
    }
}
