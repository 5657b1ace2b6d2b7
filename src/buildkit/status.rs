//! Build progress events
//!
//! Mirrors BuildKit's `SolveStatus` as printed by `buildctl --progress rawjson`:
//! one JSON object per line, byte payloads base64 encoded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStatus {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vertexes: Vec<Vertex>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub statuses: Vec<VertexStatus>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logs: Vec<VertexLog>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub warnings: Vec<VertexWarning>,
}

impl SolveStatus {
    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty()
            && self.statuses.is_empty()
            && self.logs.is_empty()
            && self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vertex {
    #[serde(default)]
    pub digest: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub vertex: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub current: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexLog {
    #[serde(default)]
    pub vertex: String,
    #[serde(default)]
    pub stream: i64,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "ts", alias = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexWarning {
    #[serde(default)]
    pub vertex: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default, with = "base64_bytes")]
    pub short: Vec<u8>,
    #[serde(default)]
    pub url: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => BASE64
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rawjson_line() {
        let line = r#"{
            "vertexes": [{
                "digest": "sha256:aaa",
                "name": "[1/3] FROM docker.io/library/python:3.12-slim",
                "started": "2024-06-01T10:00:00.000000001Z",
                "completed": "2024-06-01T10:00:01.5Z",
                "cached": true
            }],
            "statuses": null,
            "logs": [{
                "vertex": "sha256:aaa",
                "stream": 1,
                "data": "aGVsbG8K",
                "ts": "2024-06-01T10:00:00.2Z"
            }],
            "warnings": [{"vertex": "sha256:aaa", "level": 1, "short": "d2F0Y2ggb3V0"}]
        }"#;

        let status: SolveStatus = serde_json::from_str(line).unwrap();
        assert_eq!(status.vertexes.len(), 1);
        assert!(status.vertexes[0].cached);
        assert!(status.vertexes[0].started.is_some());
        assert!(status.statuses.is_empty());
        assert_eq!(status.logs[0].data, b"hello\n");
        assert_eq!(status.warnings[0].short, b"watch out");
        assert!(!status.is_empty());
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let status: SolveStatus = serde_json::from_str("{}").unwrap();
        assert!(status.is_empty());
    }
}
