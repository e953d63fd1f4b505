// Session and user endpoints for the authenticated principal.

use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::{Session, User};

impl ApiClient {
    /// The session behind the current credentials.
    ///
    /// `GET session`
    pub async fn current_session(&self, cancel: &CancellationToken) -> Result<Session, Error> {
        self.request_json(Method::GET, "session", cancel).await
    }

    /// `GET user`
    pub async fn current_user(&self, cancel: &CancellationToken) -> Result<User, Error> {
        self.request_json(Method::GET, "user", cancel).await
    }
}
