//! Name → id resolution for items and folders.
//!
//! The search endpoint matches loosely, so every candidate is re-checked for
//! an exact title before it is accepted. Anything other than exactly one
//! exact match is a configuration problem and is never retried.

use crate::error::{OverwriteError, OverwriteResult};
use crate::portal::Portal;
use crate::transport::{ApiRequest, HttpBackend};
use serde::Deserialize;
use std::fmt;
use tracing::{error, info};

/// Folder setting that means "the owner's root folder".
pub const ROOT_FOLDER_SENTINEL: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    FeatureService,
    /// The raw zipped shapefile archive the service is published from.
    Shapefile,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::FeatureService => "Feature Service",
            ItemType::Shapefile => "Shapefile",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    results: Vec<RemoteItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Folder {
    pub id: String,
    pub title: String,
}

#[derive(Deserialize)]
struct UserContentResponse {
    #[serde(default)]
    folders: Vec<Folder>,
}

/// The server-side search expression for one title/owner/type triple.
pub fn search_query(title: &str, owner: &str, item_type: ItemType) -> String {
    format!(
        "title:\"{}\" AND owner:\"{}\" AND type:\"{}\"",
        escape_quotes(title),
        escape_quotes(owner),
        item_type.as_str()
    )
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Keep only exact title (and, when echoed, type) matches; require one.
pub fn select_exact(
    candidates: Vec<RemoteItem>,
    title: &str,
    item_type: ItemType,
) -> Result<RemoteItem, String> {
    let total = candidates.len();
    let mut exact: Vec<RemoteItem> = candidates
        .into_iter()
        .filter(|c| c.title == title)
        .filter(|c| c.item_type.as_deref().map_or(true, |t| t == item_type.as_str()))
        .collect();

    match exact.len() {
        1 => Ok(exact.remove(0)),
        0 if total == 0 => Err("search returned no results".to_string()),
        0 => Err(format!("none of {total} search results has this exact title")),
        n => Err(format!(
            "{n} items share this exact title: {}",
            exact
                .iter()
                .map(|c| c.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

pub fn is_root_folder(folder: Option<&str>) -> bool {
    match folder {
        None => true,
        Some(name) => {
            let name = name.trim();
            name.is_empty() || name == ROOT_FOLDER_SENTINEL
        }
    }
}

pub async fn find_item<B: HttpBackend>(
    portal: &Portal<B>,
    title: &str,
    owner: &str,
    item_type: ItemType,
    max_retries: u32,
) -> OverwriteResult<RemoteItem> {
    let request = ApiRequest::form(portal.endpoints().search())
        .param("f", "json")
        .param("token", portal.token())
        .param("q", search_query(title, owner, item_type));

    let payload = portal.transport().call(&request, max_retries).await?;
    let response: SearchResponse = serde_json::from_value(payload)?;
    info!(
        title,
        %item_type,
        total = response.total,
        returned = response.results.len(),
        "[LOCATE] Search returned"
    );

    match select_exact(response.results, title, item_type) {
        Ok(item) => {
            info!(title, %item_type, id = %item.id, "[LOCATE] Found item");
            Ok(item)
        }
        Err(reason) => {
            error!(title, %item_type, reason = %reason, "[LOCATE] Item not found");
            Err(OverwriteError::NotFound {
                what: match item_type {
                    ItemType::FeatureService => "feature service",
                    ItemType::Shapefile => "shapefile item",
                },
                name: title.to_string(),
                reason,
            })
        }
    }
}

/// Folder id for `folder`, or `""` when it names the root folder.
pub async fn find_folder<B: HttpBackend>(
    portal: &Portal<B>,
    owner: &str,
    folder: Option<&str>,
    max_retries: u32,
) -> OverwriteResult<String> {
    let Some(title) = folder.filter(|f| !is_root_folder(Some(*f))) else {
        info!("[LOCATE] Using root folder");
        return Ok(String::new());
    };

    let request = ApiRequest::form(portal.endpoints().user_content(owner))
        .param("f", "json")
        .param("num", 1)
        .param("token", portal.token());

    let payload = portal.transport().call(&request, max_retries).await?;
    let response: UserContentResponse = serde_json::from_value(payload)?;

    match response.folders.into_iter().find(|f| f.title == title) {
        Some(found) => {
            info!(folder = title, id = %found.id, "[LOCATE] Found folder");
            Ok(found.id)
        }
        None => {
            error!(folder = title, "[LOCATE] Folder not found");
            Err(OverwriteError::NotFound {
                what: "folder",
                name: title.to_string(),
                reason: format!(
                    "no such folder for user {owner}; use \"{ROOT_FOLDER_SENTINEL}\" for the root folder"
                ),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::Endpoints;
    use crate::testing::{self, ScriptedBackend};
    use crate::transport::Transport;
    use serde_json::json;

    fn portal(backend: ScriptedBackend) -> Portal<ScriptedBackend> {
        Portal::new(
            Transport::new(backend),
            Endpoints::new("https://portal.test/sharing/rest"),
            "jdoe",
            testing::session("tok"),
        )
    }

    fn item(id: &str, title: &str, kind: &str) -> serde_json::Value {
        json!({"id": id, "title": title, "type": kind, "owner": "jdoe"})
    }

    #[test]
    fn query_combines_exact_filters() {
        assert_eq!(
            search_query("ParksLayer", "jdoe", ItemType::FeatureService),
            r#"title:"ParksLayer" AND owner:"jdoe" AND type:"Feature Service""#
        );
    }

    #[test]
    fn root_folder_sentinels() {
        assert!(is_root_folder(None));
        assert!(is_root_folder(Some("")));
        assert!(is_root_folder(Some("None")));
        assert!(!is_root_folder(Some("Parks")));
    }

    #[tokio::test]
    async fn exact_title_wins_over_superset_results() {
        let portal = portal(ScriptedBackend::new().on(
            "/search",
            vec![json!({
                "total": 3,
                "results": [
                    item("a1", "ParksLayer_old", "Feature Service"),
                    item("a2", "ParksLayer", "Feature Service"),
                    item("a3", "parkslayer", "Feature Service"),
                ]
            })],
        ));

        let found = find_item(&portal, "ParksLayer", "jdoe", ItemType::FeatureService, 0)
            .await
            .unwrap();
        assert_eq!(found.id, "a2");

        let req = &portal.transport().backend().requests_to("/search")[0];
        assert_eq!(req.param_value("token"), Some("tok"));
        assert!(req.param_value("q").unwrap().contains(r#"type:"Feature Service""#));
    }

    #[tokio::test]
    async fn zero_results_is_not_found() {
        let portal = portal(
            ScriptedBackend::new().on("/search", vec![json!({"total": 0, "results": []})]),
        );
        let err = find_item(&portal, "ParksLayer", "jdoe", ItemType::Shapefile, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OverwriteError::NotFound { what: "shapefile item", .. }));
        assert_eq!(portal.transport().backend().count("/search"), 1);
    }

    #[tokio::test]
    async fn ambiguous_titles_are_not_guessed() {
        let portal = portal(ScriptedBackend::new().on(
            "/search",
            vec![json!({
                "total": 2,
                "results": [
                    item("s1", "ParksLayer", "Shapefile"),
                    item("s2", "ParksLayer", "Shapefile")
                ]
            })],
        ));
        let err = find_item(&portal, "ParksLayer", "jdoe", ItemType::Shapefile, 0)
            .await
            .unwrap_err();
        match err {
            OverwriteError::NotFound { reason, .. } => {
                assert!(reason.contains("s1") && reason.contains("s2"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn select_exact_ignores_other_types() {
        let candidates = vec![
            RemoteItem {
                id: "fs".into(),
                title: "ParksLayer".into(),
                item_type: Some("Feature Service".into()),
            },
            RemoteItem {
                id: "shp".into(),
                title: "ParksLayer".into(),
                item_type: Some("Shapefile".into()),
            },
        ];
        assert_eq!(
            select_exact(candidates, "ParksLayer", ItemType::Shapefile)
                .unwrap()
                .id,
            "shp"
        );
    }

    #[tokio::test]
    async fn folder_lookup_and_root_bypass() {
        let portal = portal(ScriptedBackend::new().on(
            "/content/users/jdoe",
            vec![json!({"folders": [
                {"id": "f1", "title": "Archive"},
                {"id": "f2", "title": "Parks"}
            ]})],
        ));

        assert_eq!(find_folder(&portal, "jdoe", Some("None"), 0).await.unwrap(), "");
        assert_eq!(find_folder(&portal, "jdoe", None, 0).await.unwrap(), "");
        assert_eq!(portal.transport().backend().count("/content/users/jdoe"), 0);

        assert_eq!(
            find_folder(&portal, "jdoe", Some("Parks"), 0).await.unwrap(),
            "f2"
        );

        let err = find_folder(&portal, "jdoe", Some("Missing"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, OverwriteError::NotFound { what: "folder", .. }));
    }
}
