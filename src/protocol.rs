use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const STREAM_URL_PATH: &str = "/outputs/0/outputs/0/artifacts/stream_url";
const FINAL_TEXT_PATH: &str = "/outputs/0/outputs/0/outputs/message/message/text";

/// Input and output kinds understood by the run endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    #[default]
    Chat,
    Text,
    Any,
    Debug,
}

impl IoType {
    pub fn as_str(self) -> &'static str {
        match self {
            IoType::Chat => "chat",
            IoType::Text => "text",
            IoType::Any => "any",
            IoType::Debug => "debug",
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IoType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "chat" => Ok(IoType::Chat),
            "text" => Ok(IoType::Text),
            "any" => Ok(IoType::Any),
            "debug" => Ok(IoType::Debug),
            other => Err(format!(
                "unknown io type '{}', expected one of chat, text, any, debug",
                other
            )),
        }
    }
}

/// Per-component parameter overrides, keyed by component id.
///
/// Values are passed through to the server untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tweaks(BTreeMap<String, Map<String, Value>>);

impl Tweaks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn with(
        mut self,
        component: impl Into<String>,
        param: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.0
            .entry(component.into())
            .or_default()
            .insert(param.into(), value.into());
        self
    }

    pub fn component(&self, id: &str) -> Option<&Map<String, Value>> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub input_value: String,
    pub input_type: IoType,
    pub output_type: IoType,
    pub tweaks: Tweaks,
    #[serde(skip)]
    pub stream: bool,
}

impl RunRequest {
    pub fn new(input_value: impl Into<String>) -> Self {
        Self {
            input_value: input_value.into(),
            input_type: IoType::Chat,
            output_type: IoType::Chat,
            tweaks: Tweaks::new(),
            stream: false,
        }
    }

    pub fn input_type(mut self, input_type: IoType) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn output_type(mut self, output_type: IoType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn tweaks(mut self, tweaks: Tweaks) -> Self {
        self.tweaks = tweaks;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Body returned by the run endpoint, kept exactly as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunResponse(Value);

impl RunResponse {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn session_id(&self) -> Option<&str> {
        self.0.get("session_id").and_then(Value::as_str)
    }

    /// Stream endpoint announced by the first output of the first component.
    ///
    /// Missing segments and empty strings mean the run has no stream.
    pub fn stream_url(&self) -> Result<Option<&str>> {
        match self.0.pointer(STREAM_URL_PATH) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(url)) if url.is_empty() => Ok(None),
            Some(Value::String(url)) => Ok(Some(url)),
            Some(_) => Err(ClientError::SchemaMismatch {
                path: "outputs[0].outputs[0].artifacts.stream_url",
                expected: "string",
            }),
        }
    }

    /// Text of the chat message produced by a non-streaming run.
    pub fn final_text(&self) -> Result<&str> {
        self.0
            .pointer(FINAL_TEXT_PATH)
            .and_then(Value::as_str)
            .ok_or(ClientError::SchemaMismatch {
                path: "outputs[0].outputs[0].outputs.message.message.text",
                expected: "string",
            })
    }
}

/// One `data:` payload received on a run's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEvent(Value);

impl StreamEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn data(&self) -> &Value {
        &self.0
    }

    pub fn into_data(self) -> Value {
        self.0
    }

    /// Incremental text, either at the top level or nested under `data`.
    pub fn chunk(&self) -> Option<&str> {
        self.0
            .get("chunk")
            .or_else(|| self.0.pointer("/data/chunk"))
            .and_then(Value::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.get("event").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_request_serializes_documented_body() {
        let request = RunRequest::new("hello")
            .output_type(IoType::Text)
            .tweaks(Tweaks::new().with("ChatInput-1", "sender", "User"))
            .stream(true);

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "input_value": "hello",
                "input_type": "chat",
                "output_type": "text",
                "tweaks": {"ChatInput-1": {"sender": "User"}}
            })
        );
    }

    #[test]
    fn io_type_parses_case_insensitively() {
        assert_eq!("Chat".parse::<IoType>().unwrap(), IoType::Chat);
        assert_eq!("debug".parse::<IoType>().unwrap(), IoType::Debug);
        assert!("voice".parse::<IoType>().is_err());
    }

    #[test]
    fn tweaks_reject_non_object_components() {
        assert!(Tweaks::from_json(r#"{"note-1": {}}"#).is_ok());
        assert!(Tweaks::from_json(r#"{"note-1": 3}"#).is_err());
        assert!(Tweaks::from_json("not json").is_err());
    }

    #[test]
    fn stream_url_reads_nested_artifact() {
        let response = RunResponse::new(json!({
            "outputs": [{"outputs": [{"artifacts": {"stream_url": "/api/v1/stream/abc"}}]}]
        }));
        assert_eq!(response.stream_url().unwrap(), Some("/api/v1/stream/abc"));
    }

    #[test]
    fn stream_url_absent_or_empty_is_none() {
        let empty = RunResponse::new(json!({
            "outputs": [{"outputs": [{"artifacts": {"stream_url": ""}}]}]
        }));
        assert_eq!(empty.stream_url().unwrap(), None);

        let no_outputs = RunResponse::new(json!({"outputs": []}));
        assert_eq!(no_outputs.stream_url().unwrap(), None);

        let scalar = RunResponse::new(json!("ok"));
        assert_eq!(scalar.stream_url().unwrap(), None);
    }

    #[test]
    fn stream_url_of_wrong_type_is_schema_mismatch() {
        let response = RunResponse::new(json!({
            "outputs": [{"outputs": [{"artifacts": {"stream_url": 42}}]}]
        }));
        assert!(matches!(
            response.stream_url(),
            Err(ClientError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn final_text_follows_message_path() {
        let response = RunResponse::new(json!({
            "session_id": "s-1",
            "outputs": [{"outputs": [{"outputs": {"message": {"message": {"text": "Bamboo"}}}}]}]
        }));
        assert_eq!(response.final_text().unwrap(), "Bamboo");
        assert_eq!(response.session_id(), Some("s-1"));

        let missing = RunResponse::new(json!({"outputs": [{"outputs": []}]}));
        assert!(matches!(
            missing.final_text(),
            Err(ClientError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn stream_event_chunk_falls_back_to_nested_data() {
        let flat = StreamEvent::new(json!({"chunk": "hi"}));
        assert_eq!(flat.chunk(), Some("hi"));

        let nested = StreamEvent::new(json!({"event": "token", "data": {"chunk": "yo"}}));
        assert_eq!(nested.chunk(), Some("yo"));
        assert_eq!(nested.event_type(), Some("token"));

        assert_eq!(StreamEvent::new(json!({"other": 1})).chunk(), None);
    }
}
