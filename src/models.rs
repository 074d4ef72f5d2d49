//! Typed records for the indexing service's JSON responses.
//!
//! The service is loosely typed on the wire; every response the pipeline
//! relies on is parsed into an explicit struct so a missing field fails at
//! parse time instead of surfacing as a lookup error deep in a loop.

use serde::{Deserialize, Serialize};

/// One page of the indexed-video listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListPage {
    #[serde(default)]
    pub results: Vec<VideoSummary>,
    pub next_page: Option<PageCursor>,
}

impl VideoListPage {
    /// True while the service declares further pages beyond this one.
    pub fn has_more(&self) -> bool {
        matches!(&self.next_page, Some(cursor) if !cursor.done)
    }
}

/// Opaque pagination state returned alongside each page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Full index document for one video. Only the face insights are modeled;
/// the service returns far more, which serde drops on the floor.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoIndex {
    #[serde(default)]
    pub videos: Vec<IndexedVideo>,
}

impl VideoIndex {
    /// The face insights of the primary video, when the index carries them.
    pub fn faces(&self) -> Option<&[Face]> {
        self.videos.first()?.insights.as_ref()?.faces.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexedVideo {
    #[serde(default)]
    pub insights: Option<VideoInsights>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInsights {
    #[serde(default)]
    pub faces: Option<Vec<Face>>,
}

/// A single detected face. Unresolved identities carry a name containing
/// `"Unknown"`; resolved ones carry a `knownPersonId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    pub name: String,
    pub thumbnail_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_person_id: Option<String>,
}

/// Descriptor returned by the upload endpoint for the created video.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVideo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// The asynchronously generated semantic summary for a video.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sections: Vec<PromptSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSection {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_list_page() {
        let json = r#"{
            "results": [
                { "id": "v1", "name": "clip one", "state": "Processed" },
                { "id": "v2" }
            ],
            "nextPage": { "pageSize": 25, "skip": 25, "done": false }
        }"#;
        let page: VideoListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].id, "v1");
        assert!(page.has_more());
    }

    #[test]
    fn done_cursor_or_missing_cursor_means_no_more_pages() {
        let done: VideoListPage =
            serde_json::from_str(r#"{ "results": [], "nextPage": { "done": true } }"#).unwrap();
        assert!(!done.has_more());

        let missing: VideoListPage = serde_json::from_str(r#"{ "results": [] }"#).unwrap();
        assert!(!missing.has_more());
    }

    #[test]
    fn extracts_nested_faces_from_index() {
        let json = r#"{
            "videos": [
                {
                    "insights": {
                        "faces": [
                            { "name": "Unknown #1", "thumbnailId": "t1" },
                            { "name": "Jane", "thumbnailId": "t2", "knownPersonId": "p1" }
                        ]
                    }
                }
            ]
        }"#;
        let index: VideoIndex = serde_json::from_str(json).unwrap();
        let faces = index.faces().unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].known_person_id.as_deref(), Some("p1"));
    }

    #[test]
    fn index_without_face_insights_yields_none() {
        let no_insights: VideoIndex = serde_json::from_str(r#"{ "videos": [{}] }"#).unwrap();
        assert!(no_insights.faces().is_none());

        let no_videos: VideoIndex = serde_json::from_str(r#"{}"#).unwrap();
        assert!(no_videos.faces().is_none());
    }

    #[test]
    fn face_without_thumbnail_id_is_a_parse_error() {
        let result: Result<Face, _> = serde_json::from_str(r#"{ "name": "Unknown #1" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn parses_prompt_content_sections() {
        let json = r#"{
            "name": "clip one",
            "sections": [
                { "start": "0:00:00", "end": "0:00:30", "content": "A red car drives by." }
            ]
        }"#;
        let content: PromptContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.sections.len(), 1);
        assert_eq!(content.sections[0].content, "A red car drives by.");
    }
}
