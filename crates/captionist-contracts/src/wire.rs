//! Request and response bodies of the caption service.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `POST /describe` response. `image_hash` is only sent back for duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub description: String,
    #[serde(default)]
    pub image_hash: Option<String>,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionRequest {
    pub description: String,
    pub image_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// `POST /caption` response. A present `error` marks the call as failed even
/// when the transport succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionResponse {
    #[serde(default)]
    pub caption: IndexMap<String, String>,
    #[serde(default)]
    pub think: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Persisted snapshot of a completed submission, as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(rename = "timestamp", alias = "created_at", default)]
    pub created_at: String,
    #[serde(rename = "image_name", default)]
    pub source_file_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "caption", default)]
    pub primary_caption: String,
    #[serde(rename = "think", default)]
    pub reasoning: Option<String>,
    #[serde(rename = "image_hash", default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryListResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{CaptionRequest, CaptionResponse, DescribeResponse, HistoryListResponse};

    #[test]
    fn describe_response_tolerates_missing_hash() -> anyhow::Result<()> {
        let parsed: DescribeResponse =
            serde_json::from_value(json!({"description": "{}", "is_duplicate": false}))?;
        assert_eq!(parsed.image_hash, None);
        assert!(!parsed.is_duplicate);
        Ok(())
    }

    #[test]
    fn caption_request_omits_unset_options() -> anyhow::Result<()> {
        let request = CaptionRequest {
            description: "d".to_string(),
            image_name: "x.png".to_string(),
            image_hash: None,
            tone: Some("instagram".to_string()),
            model_id: None,
        };
        assert_eq!(
            serde_json::to_value(&request)?,
            json!({"description": "d", "image_name": "x.png", "tone": "instagram"})
        );
        Ok(())
    }

    #[test]
    fn caption_response_keeps_backend_key_order() -> anyhow::Result<()> {
        let parsed: CaptionResponse = serde_json::from_str(
            r#"{"caption": {"story": "s", "short": "c", "quote": "q"}, "think": "why"}"#,
        )?;
        assert_eq!(
            parsed.caption.keys().cloned().collect::<Vec<_>>(),
            vec!["story", "short", "quote"]
        );
        assert_eq!(parsed.think.as_deref(), Some("why"));
        assert_eq!(parsed.error, None);
        Ok(())
    }

    #[test]
    fn history_entries_map_backend_field_names() -> anyhow::Result<()> {
        let parsed: HistoryListResponse = serde_json::from_value(json!({
            "history": [{
                "id": "e1",
                "timestamp": "2026-10-01T10:00:00",
                "image_name": "beach.jpg",
                "description": "D1",
                "caption": "c1",
                "think": null,
                "image_hash": "abc"
            }]
        }))?;
        let entry = &parsed.history[0];
        assert_eq!(entry.created_at, "2026-10-01T10:00:00");
        assert_eq!(entry.source_file_name, "beach.jpg");
        assert_eq!(entry.primary_caption, "c1");
        assert_eq!(entry.reasoning, None);
        assert_eq!(entry.fingerprint.as_deref(), Some("abc"));
        Ok(())
    }
}
