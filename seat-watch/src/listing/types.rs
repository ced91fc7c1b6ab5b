//! Listing query response DTOs.
//!
//! These types map directly to the JSON returned by the left-ticket query
//! endpoints. The service is inconsistent about field presence, so almost
//! everything defaults when missing.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// Response from a left-ticket query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingResponse {
    /// Whether the service considers the query successful.
    #[serde(default)]
    pub status: bool,

    /// HTTP-like status code echoed in the body.
    pub httpstatus: Option<u16>,

    /// Human-readable messages; sent either as a string or a list.
    #[serde(default, deserialize_with = "string_or_list")]
    pub messages: Vec<String>,

    /// Payload, absent on most errors.
    pub data: Option<ListingData>,
}

/// Payload of a listing response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingData {
    /// One `|`-delimited record per train.
    #[serde(default)]
    pub result: Vec<String>,

    /// Station code → station name for every code used in `result`.
    #[serde(default)]
    pub map: HashMap<String, String>,

    /// Service-side flag, "1" when the result is complete.
    pub flag: Option<String>,

    /// Messages attached to the payload rather than the envelope.
    #[serde(default, deserialize_with = "string_or_list")]
    pub msg: Vec<String>,
}

impl ListingResponse {
    /// All messages from the envelope and the payload.
    pub fn all_messages(&self) -> Vec<String> {
        let mut messages = self.messages.clone();
        if let Some(data) = &self.data {
            messages.extend(data.msg.iter().cloned());
        }
        messages
    }

    /// Raw records, empty when the payload is missing.
    pub fn records(&self) -> &[String] {
        self.data.as_ref().map(|d| d.result.as_slice()).unwrap_or(&[])
    }
}

/// Accept `"text"`, `["a", "b"]` or `null`.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_success_response() {
        let json = r#"{
            "httpstatus": 200,
            "status": true,
            "messages": [],
            "data": {
                "flag": "1",
                "map": {"BJP": "北京", "SHH": "上海"},
                "result": ["a|b|c", "d|e|f"]
            }
        }"#;

        let response: ListingResponse = serde_json::from_str(json).unwrap();
        assert!(response.status);
        assert_eq!(response.httpstatus, Some(200));
        assert_eq!(response.records().len(), 2);
        let data = response.data.unwrap();
        assert_eq!(data.map.get("BJP").map(String::as_str), Some("北京"));
        assert_eq!(data.flag.as_deref(), Some("1"));
    }

    #[test]
    fn messages_as_string() {
        let json = r#"{"status": false, "messages": "系统繁忙"}"#;
        let response: ListingResponse = serde_json::from_str(json).unwrap();
        assert!(!response.status);
        assert_eq!(response.messages, vec!["系统繁忙"]);
        assert!(response.records().is_empty());
    }

    #[test]
    fn empty_and_null_messages() {
        let response: ListingResponse =
            serde_json::from_str(r#"{"status": true, "messages": ""}"#).unwrap();
        assert!(response.messages.is_empty());

        let response: ListingResponse =
            serde_json::from_str(r#"{"status": true, "messages": null}"#).unwrap();
        assert!(response.messages.is_empty());
    }

    #[test]
    fn all_messages_merges_payload() {
        let json = r#"{
            "status": false,
            "messages": ["网络繁忙"],
            "data": {"msg": "操作失败"}
        }"#;
        let response: ListingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.all_messages(), vec!["网络繁忙", "操作失败"]);
    }

    #[test]
    fn minimal_body() {
        let response: ListingResponse = serde_json::from_str("{}").unwrap();
        assert!(!response.status);
        assert!(response.data.is_none());
    }
}
