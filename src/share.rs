//! Audience settings for the published item.

use crate::error::{OverwriteError, OverwriteResult};
use crate::portal::Portal;
use crate::transport::{ApiRequest, ApiResponse, HttpBackend};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingPolicy {
    pub everyone: bool,
    pub org: bool,
    /// Group ids.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl SharingPolicy {
    /// Comma-separated group ids; `""` for none, never omitted.
    pub fn groups_param(&self) -> String {
        self.groups.join(",")
    }
}

#[derive(Deserialize)]
struct ShareResponse {
    #[serde(rename = "itemId")]
    item_id: Option<String>,
    #[serde(rename = "notSharedWith", default)]
    not_shared_with: Vec<String>,
}

pub async fn share<B: HttpBackend>(
    portal: &Portal<B>,
    item_id: &str,
    folder_id: &str,
    policy: &SharingPolicy,
) -> OverwriteResult<()> {
    let request = ApiRequest::form(portal.endpoints().item_share(
        portal.username(),
        folder_id,
        item_id,
    ))
    .param("f", "json")
    .param("everyone", policy.everyone)
    .param("org", policy.org)
    .param("groups", policy.groups_param())
    .param("token", portal.token());

    let payload = match portal.transport().request(&request, 0).await? {
        ApiResponse::Success(payload) => payload,
        ApiResponse::LogicalError { message, payload, .. } => {
            error!(item_id, payload = %payload, "[SHARE] Sharing rejected");
            return Err(OverwriteError::Share { message, payload });
        }
    };

    let parsed: ShareResponse =
        serde_json::from_value(payload.clone()).map_err(|e| OverwriteError::Share {
            message: format!("malformed share response: {e}"),
            payload: payload.clone(),
        })?;
    if !parsed.not_shared_with.is_empty() {
        warn!(
            item_id,
            groups = ?parsed.not_shared_with,
            "[SHARE] Some groups were not shared with"
        );
    }

    info!(
        item_id = parsed.item_id.as_deref().unwrap_or(item_id),
        everyone = policy.everyone,
        org = policy.org,
        groups = policy.groups.len(),
        "[SHARE] Item shared"
    );
    Ok(())
}
