// Device endpoints
//
// Listing, lookup, edit and removal of devices plus on/off control of
// individual device services.

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{Control, Device, DeviceEdit, DeviceResults, EventRecord, EventResults};
use crate::pagination::{Cursor, ScanResult};

impl ApiClient {
    /// One page of devices.
    ///
    /// `GET device?limit=&cursor=`
    pub async fn scan_devices(
        &self,
        limit: u32,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<ScanResult<Device>, Error> {
        self.scan::<DeviceResults>("device", limit, cursor, cancel)
            .await
    }

    /// Every device on the account.
    pub async fn list_devices(&self, cancel: &CancellationToken) -> Result<Vec<Device>, Error> {
        self.list_all::<DeviceResults>("device", cancel).await
    }

    /// `GET device/{uuid}`
    pub async fn get_device(
        &self,
        device: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Device, Error> {
        self.request_json(Method::GET, &format!("device/{device}"), cancel)
            .await
    }

    /// `POST device/{uuid}`
    pub async fn edit_device(
        &self,
        device: Uuid,
        edit: &DeviceEdit,
        cancel: &CancellationToken,
    ) -> Result<Device, Error> {
        debug!(%device, "editing device");
        self.request_json_with(Method::POST, &format!("device/{device}"), edit, cancel)
            .await
    }

    /// `DELETE device/{uuid}`
    pub async fn delete_device(&self, device: Uuid, cancel: &CancellationToken) -> Result<(), Error> {
        debug!(%device, "deleting device");
        self.request_unit(Method::DELETE, &format!("device/{device}"), cancel)
            .await
    }

    /// Switch a device service on or off.
    ///
    /// `POST device/{uuid}/service/{uuid}/control` with `{"state": ..}`
    pub async fn control_device_service(
        &self,
        device: Uuid,
        service: Uuid,
        state: bool,
        cancel: &CancellationToken,
    ) -> Result<Control, Error> {
        debug!(%device, %service, state, "controlling device service");
        self.request_json_with(
            Method::POST,
            &format!("device/{device}/service/{service}/control"),
            &Control { state },
            cancel,
        )
        .await
    }

    /// Flip a device service and return its new state.
    ///
    /// `POST device/{uuid}/service/{uuid}/toggle`
    pub async fn toggle_device_service(
        &self,
        device: Uuid,
        service: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Control, Error> {
        debug!(%device, %service, "toggling device service");
        self.request_json(
            Method::POST,
            &format!("device/{device}/service/{service}/toggle"),
            cancel,
        )
        .await
    }

    /// One page of a device's stored events.
    ///
    /// `GET device/{uuid}/event?limit=&cursor=`
    pub async fn scan_device_events(
        &self,
        device: Uuid,
        limit: u32,
        cursor: &Cursor,
        cancel: &CancellationToken,
    ) -> Result<ScanResult<EventRecord>, Error> {
        self.scan::<EventResults>(&format!("device/{device}/event"), limit, cursor, cancel)
            .await
    }
}
