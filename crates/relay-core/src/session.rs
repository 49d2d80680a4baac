use serde::{Deserialize, Serialize};

use crate::ids::SessionToken;
use crate::payload::EventPayload;

/// Session view attached to every transmitted event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionToken,
    pub session_count: u64,
    /// A session token already existed when the event fired.
    pub engaged: bool,
}

/// Wire form: `seg`, `sct`, `_s`, `sid`.
#[derive(Serialize)]
struct SessionFields<'a> {
    seg: u8,
    sct: u64,
    #[serde(rename = "_s")]
    hits: u64,
    sid: &'a str,
}

impl SessionState {
    pub fn to_payload(&self) -> EventPayload {
        let fields = SessionFields {
            seg: u8::from(self.engaged),
            sct: self.session_count,
            hits: self.session_count,
            sid: self.session_id.as_str(),
        };
        EventPayload::from_serializable(&fields).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_fields() {
        let state = SessionState {
            session_id: SessionToken::from_raw("123456789"),
            session_count: 4,
            engaged: true,
        };
        let p = state.to_payload();
        assert_eq!(p.get("seg"), Some(&json!(1)));
        assert_eq!(p.get("sct"), Some(&json!(4)));
        assert_eq!(p.get("_s"), Some(&json!(4)));
        assert_eq!(p.get("sid"), Some(&json!("123456789")));
    }

    #[test]
    fn fresh_session_is_not_engaged() {
        let state = SessionState {
            session_id: SessionToken::mint(),
            session_count: 1,
            engaged: false,
        };
        assert_eq!(state.to_payload().get("seg"), Some(&json!(0)));
    }
}
