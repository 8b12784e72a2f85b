//! URL layout of the sharing REST API and the authenticated handle the
//! workflow components share.

use crate::session::Session;
use crate::transport::{HttpBackend, Transport};

pub const DEFAULT_BASE_URL: &str = "https://www.arcgis.com/sharing/rest";

/// Builds endpoint URLs under a base such as `https://www.arcgis.com/sharing/rest`.
///
/// An empty folder id addresses the owner's root folder, in which case the
/// folder segment is left out of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn generate_token(&self) -> String {
        format!("{}/generateToken", self.base_url)
    }

    pub fn search(&self) -> String {
        format!("{}/search", self.base_url)
    }

    pub fn user_content(&self, user: &str) -> String {
        format!("{}/content/users/{user}", self.base_url)
    }

    fn folder_item(&self, user: &str, folder_id: &str, item_id: &str, action: &str) -> String {
        if folder_id.is_empty() {
            format!("{}/items/{item_id}/{action}", self.user_content(user))
        } else {
            format!(
                "{}/{folder_id}/items/{item_id}/{action}",
                self.user_content(user)
            )
        }
    }

    pub fn item_update(&self, user: &str, folder_id: &str, item_id: &str) -> String {
        self.folder_item(user, folder_id, item_id, "update")
    }

    pub fn item_share(&self, user: &str, folder_id: &str, item_id: &str) -> String {
        self.folder_item(user, folder_id, item_id, "share")
    }

    pub fn add_part(&self, user: &str, item_id: &str) -> String {
        format!("{}/items/{item_id}/addPart", self.user_content(user))
    }

    pub fn commit(&self, user: &str, item_id: &str) -> String {
        format!("{}/items/{item_id}/commit", self.user_content(user))
    }

    pub fn item_status(&self, user: &str, item_id: &str) -> String {
        format!("{}/items/{item_id}/status", self.user_content(user))
    }

    pub fn publish(&self, user: &str) -> String {
        format!("{}/publish", self.user_content(user))
    }
}

/// Transport, endpoints and session for one signed-in user.
pub struct Portal<B> {
    transport: Transport<B>,
    endpoints: Endpoints,
    username: String,
    session: Session,
}

impl<B: HttpBackend> Portal<B> {
    pub fn new(
        transport: Transport<B>,
        endpoints: Endpoints,
        username: impl Into<String>,
        session: Session,
    ) -> Self {
        Self {
            transport,
            endpoints,
            username: username.into(),
            session,
        }
    }

    pub fn transport(&self) -> &Transport<B> {
        &self.transport
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> &str {
        self.session.token()
    }
}
