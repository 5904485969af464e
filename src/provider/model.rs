use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::Release;

/// Release entry as returned by the GitHub and Gitea (Codeberg) release APIs.
/// Both share the field names used here.
#[derive(Deserialize, Debug, Clone)]
pub struct ApiRelease {
    pub id: i64,
    pub html_url: String,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

impl From<ApiRelease> for Release {
    fn from(raw: ApiRelease) -> Self {
        Release {
            id: raw.id,
            html_url: raw.html_url,
            tag_name: raw.tag_name,
            name: raw.name.filter(|n| !n.trim().is_empty()),
            body: raw.body.unwrap_or_default(),
            created_at: raw.created_at,
            published_at: raw.published_at,
            prerelease: raw.prerelease,
            draft: raw.draft,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_payload_maps_to_release() {
        let raw: Vec<ApiRelease> = serde_json::from_str(
            r#"[{
                "id": 42,
                "html_url": "https://github.com/o/r/releases/tag/v2.0.0",
                "tag_name": "v2.0.0",
                "name": "",
                "body": null,
                "created_at": "2024-05-01T10:00:00Z",
                "published_at": "2024-05-02T10:00:00Z",
                "prerelease": false,
                "draft": false,
                "author": {"login": "someone"}
            }]"#,
        )
        .unwrap();
        let release: Release = raw.into_iter().next().unwrap().into();
        assert_eq!(release.tag_name, "v2.0.0");
        assert_eq!(release.name, None);
        assert_eq!(release.body, "");
        assert_eq!(release.display_name(), "v2.0.0");
    }

    #[test]
    fn draft_without_published_at() {
        let raw: ApiRelease = serde_json::from_str(
            r#"{
                "id": 7,
                "html_url": "https://codeberg.org/o/r/releases/tag/v0.1",
                "tag_name": "v0.1",
                "name": "Preview",
                "body": "notes",
                "created_at": "2024-05-01T10:00:00Z",
                "published_at": null,
                "prerelease": true,
                "draft": true
            }"#,
        )
        .unwrap();
        let release: Release = raw.into();
        assert!(release.draft);
        assert_eq!(release.released_at(), release.created_at);
    }
}
