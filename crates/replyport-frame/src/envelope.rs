use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The JSON shape that crosses every transport boundary.
///
/// ```text
/// { name: string, args: any[], messageId?: string, result?: any,
///   error?: boolean, errorMessage?: string }
/// ```
///
/// `result: null` is a present result and is kept distinct from an absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(
        rename = "messageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// True when the envelope carries a response body.
    pub fn has_outcome(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// True when `error: true` is set.
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_result_is_present() {
        let envelope: Envelope =
            serde_json::from_value(json!({"name": "x", "messageId": "1", "result": null}))
                .unwrap();
        assert_eq!(envelope.result, Some(Value::Null));
        assert!(envelope.has_outcome());

        let back = serde_json::to_value(&envelope).unwrap();
        assert_eq!(back["result"], Value::Null);
        assert!(back.as_object().unwrap().contains_key("result"));
    }

    #[test]
    fn absent_fields_are_omitted_on_the_wire() {
        let envelope = Envelope {
            name: "tabs:reload".to_string(),
            args: vec![json!({"tabId": 7})],
            message_id: None,
            result: None,
            error: None,
            error_message: None,
        };
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire, json!({"name": "tabs:reload", "args": [{"tabId": 7}]}));
    }

    #[test]
    fn wire_field_names_match_contract() {
        let envelope = Envelope {
            name: "element:click".to_string(),
            args: Vec::new(),
            message_id: Some("promise::abc".to_string()),
            result: None,
            error: Some(true),
            error_message: Some("boom".to_string()),
        };
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["messageId"], "promise::abc");
        assert_eq!(wire["error"], true);
        assert_eq!(wire["errorMessage"], "boom");
        assert!(envelope.is_error());
    }

    #[test]
    fn missing_args_default_to_empty() {
        let envelope: Envelope = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert!(envelope.args.is_empty());
        assert!(!envelope.has_outcome());
    }
}
