use serde::{Deserialize, Serialize};

use crate::crypto::PublicKeys;

/// A request as it sits in the queue log
///
/// `keys` are the requester's ephemeral public keys. `ctrl`, `payload` and
/// `response` are signed envelopes: the first two from the requester to the
/// queue owner, the last from the owner back to the ephemeral keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub keys: PublicKeys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctrl: Option<String>,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Control block carried next to the payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberProof>,
    #[serde(default)]
    pub canceled: bool,
}

/// A requester's claim to be a member
///
/// `proof` is the member's signature over the request's ephemeral signing
/// key, so a claim cannot be replayed on another request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProof {
    pub keys: PublicKeys,
    pub proof: String,
}

/// Decrypted response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Ok(serde_json::Value),
    Err(String),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn test_record_wire_shape() {
        let ephemeral = Identity::generate().unwrap();
        let record = RequestRecord {
            keys: *ephemeral.public_keys(),
            ctrl: None,
            payload: "@SEA{}".into(),
            response: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["keys"].get("signPub").is_some());
        assert!(json["keys"].get("dhPub").is_some());
        assert!(json.get("ctrl").is_none());
        assert!(json.get("response").is_none());
    }

    #[test]
    fn test_response_body_shape() {
        let ok = serde_json::to_value(ResponseBody::Ok(serde_json::json!(3))).unwrap();
        assert_eq!(ok, serde_json::json!({ "ok": 3 }));
        let err = serde_json::to_value(ResponseBody::Err("nope".into())).unwrap();
        assert_eq!(err, serde_json::json!({ "err": "nope" }));
    }
}
