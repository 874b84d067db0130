//! The JSON document delivered downstream for every processed operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeliveryError;

/// Normalized output for one record mutation.
///
/// Field names are the wire contract consumers rely on. `cid` and `record`
/// are only present for creates and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: i64,
    pub rev: String,
    pub time: String,
    pub collection: String,
    pub rkey: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
}

impl Envelope {
    pub fn to_json(&self) -> Result<String, DeliveryError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_envelope_omits_cid_and_record() {
        let env = Envelope {
            seq: 9,
            rev: "3kabc".into(),
            time: "2024-01-01T00:00:00Z".into(),
            collection: "app.example.post".into(),
            rkey: "xyz".into(),
            action: "delete".into(),
            cid: None,
            record: None,
        };
        let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({
                "seq": 9, "rev": "3kabc", "time": "2024-01-01T00:00:00Z",
                "collection": "app.example.post", "rkey": "xyz", "action": "delete"
            })
        );
    }

    #[test]
    fn create_envelope_carries_cid_and_record() {
        let env = Envelope {
            seq: 1,
            rev: "r".into(),
            time: "t".into(),
            collection: "app.example.post".into(),
            rkey: "abc123".into(),
            action: "create".into(),
            cid: Some("bafyreiexample".into()),
            record: Some(json!({"text": "hi"})),
        };
        let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(v["cid"], "bafyreiexample");
        assert_eq!(v["record"], json!({"text": "hi"}));
    }
}
