use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use captionist_contracts::submissions::ValidatedImage;
use captionist_contracts::wire::{
    CaptionRequest, CaptionResponse, DescribeResponse, HistoryEntry, HistoryListResponse,
};
use captionist_contracts::{CaptionError, CaptionResult};

use crate::backend::{CaptionBackend, CaptionOutcome, CaptionParams, DescribeOutcome};

const ERROR_DETAIL_MAX_CHARS: usize = 240;
const MALFORMED_RESPONSE: &str = "malformed response from caption service";

/// Caption service reached over HTTP at `{api_base}/describe`,
/// `{api_base}/caption` and `{api_base}/history`.
pub struct HttpBackend {
    api_base: Url,
    http: HttpClient,
}

impl HttpBackend {
    pub fn new(api_base: &str, timeout: Duration) -> CaptionResult<Self> {
        let trimmed = api_base.trim().trim_end_matches('/');
        let api_base = Url::parse(trimmed).map_err(|err| {
            CaptionError::validation(format!("invalid caption service URL '{trimmed}': {err}"))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(CaptionError::validation(format!(
                "invalid caption service URL '{trimmed}'"
            )));
        }
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CaptionError::transport(format!("HTTP client setup failed: {err}")))?;
        Ok(Self { api_base, http })
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send(&self, operation: &str, request: RequestBuilder) -> CaptionResult<HttpResponse> {
        request.send().map_err(|err| transport_error(operation, &err))
    }
}

impl CaptionBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn describe(&self, image: &ValidatedImage) -> CaptionResult<DescribeOutcome> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.name().to_string())
            .mime_str(image.media_type().mime())
            .map_err(|err| CaptionError::validation(format!("invalid upload type: {err}")))?;
        let form = Form::new().part("file", part);
        let response = self.send(
            "describe",
            self.http.post(self.endpoint(&["describe"])).multipart(form),
        )?;
        let parsed: DescribeResponse = read_json("describe", response)?;
        DescribeOutcome::from_wire(parsed)
    }

    fn caption(&self, params: &CaptionParams) -> CaptionResult<CaptionOutcome> {
        let body = CaptionRequest {
            description: params.description.raw().to_string(),
            image_name: params.image_name.clone(),
            image_hash: params
                .fingerprint
                .as_ref()
                .map(|fingerprint| fingerprint.as_str().to_string()),
            tone: params.tone.map(|tone| tone.key().to_string()),
            model_id: params.model_id.clone(),
        };
        let response = self.send(
            "caption",
            self.http.post(self.endpoint(&["caption"])).json(&body),
        )?;
        let parsed: CaptionResponse = read_json("caption", response)?;
        CaptionOutcome::from_wire(parsed)
    }

    fn list_history(&self) -> CaptionResult<Vec<HistoryEntry>> {
        let response = self.send("history", self.http.get(self.endpoint(&["history"])))?;
        let parsed: HistoryListResponse = read_json("history", response)?;
        Ok(parsed.history)
    }

    fn get_history(&self, id: &str) -> CaptionResult<HistoryEntry> {
        let response = self.send(
            "history entry",
            self.http.get(self.endpoint(&["history", id])),
        )?;
        read_json("history entry", response)
    }

    fn delete_history(&self, id: &str) -> CaptionResult<()> {
        let response = self.send(
            "history delete",
            self.http.delete(self.endpoint(&["history", id])),
        )?;
        expect_success("history delete", response)
    }

    fn clear_history(&self) -> CaptionResult<()> {
        let response = self.send(
            "history clear",
            self.http.delete(self.endpoint(&["history"])),
        )?;
        expect_success("history clear", response)
    }
}

fn transport_error(operation: &str, err: &reqwest::Error) -> CaptionError {
    let cause = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "could not connect"
    } else {
        "failed"
    };
    CaptionError::transport(format!("{operation} request {cause}: {err}"))
}

fn read_body(operation: &str, response: HttpResponse) -> CaptionResult<(StatusCode, String)> {
    let status = response.status();
    let body = response.text().map_err(|err| {
        CaptionError::transport(format!("{operation} response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok((status, body))
}

fn read_json<T: DeserializeOwned>(operation: &str, response: HttpResponse) -> CaptionResult<T> {
    let (status, body) = read_body(operation, response)?;
    serde_json::from_str(&body).map_err(|err| {
        tracing::warn!(operation, error = %err, "caption service returned invalid JSON");
        CaptionError::backend(status.as_u16(), MALFORMED_RESPONSE)
    })
}

fn expect_success(operation: &str, response: HttpResponse) -> CaptionResult<()> {
    read_body(operation, response).map(|_| ())
}

fn status_error(status: StatusCode, body: &str) -> CaptionError {
    let message = error_detail(body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    CaptionError::backend(status.as_u16(), truncate_text(&message, ERROR_DETAIL_MAX_CHARS))
}

/// Pulls a human-readable message out of an error body. Handles the
/// `{"detail": ...}`, `{"error": ...}` and `{"message": ...}` shapes.
fn error_detail(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let object = parsed.as_object()?;
    for key in ["detail", "error", "message"] {
        match object.get(key) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(text.trim().to_string());
            }
            Some(Value::Array(items)) if !items.is_empty() => {
                let joined = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("; ");
                if !joined.is_empty() {
                    return Some(joined);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
