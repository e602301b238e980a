//! Persisted session record shape.
//!
//! A session is stored as one document per session id:
//!
//! ```json
//! { "sid": "abc", "data": { "cookie": { "_expires": "2026-01-01T00:00:00.000Z" }, "user": "alice" } }
//! ```
//!
//! The payload under `data` belongs to the application and is returned
//! verbatim. The only field the store reads from it is the cookie
//! expiration at [`EXPIRES_PATH`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::filter::{Bound, FieldPath, Filter};

/// Opaque application session payload.
pub type SessionData = Map<String, Value>;

/// Field holding the session id.
pub const SID_FIELD: &str = "sid";

/// Field holding the application payload.
pub const DATA_FIELD: &str = "data";

/// Dotted path of the embedded cookie expiration instant.
pub const EXPIRES_PATH: &str = "data.cookie._expires";

/// One stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: String,
    pub data: SessionData,
}

impl SessionRecord {
    pub fn new(sid: impl Into<String>, data: SessionData) -> Self {
        Self {
            sid: sid.into(),
            data,
        }
    }

    /// Build the stored document for `sid` without taking ownership of the payload.
    pub fn document(sid: &str, data: &SessionData) -> Value {
        json!({ SID_FIELD: sid, DATA_FIELD: data })
    }

    /// Map a stored document back to a record. Extra backend fields are ignored.
    pub fn from_document(doc: Value) -> Result<Self> {
        serde_json::from_value(doc).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        expires_at(&self.data)
    }

    /// Records without a readable expiration never expire. Compared in whole
    /// milliseconds, like the stored query.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .is_some_and(|expires| expires.timestamp_millis() < now.timestamp_millis())
    }
}

/// Read `cookie._expires` out of a session payload.
pub fn expires_at(data: &SessionData) -> Option<DateTime<Utc>> {
    data.get("cookie")
        .and_then(|cookie| cookie.get("_expires"))
        .and_then(parse_instant)
}

/// Interpret a JSON value as an instant: epoch milliseconds or an RFC 3339 string.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp. Anything else is not an instant.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn expires_path() -> FieldPath {
    FieldPath::parse(EXPIRES_PATH)
}

/// Filter addressing the record for one session id.
pub fn by_sid(sid: &str) -> Filter {
    Filter::Eq(FieldPath::new([SID_FIELD]), Value::String(sid.to_string()))
}

/// Filter matching every record whose cookie expired strictly before `now`.
pub fn expired_before(now: DateTime<Utc>) -> Filter {
    Filter::Lt(expires_path(), Bound::Instant(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn payload(expires: Value) -> SessionData {
        match json!({ "cookie": { "_expires": expires, "path": "/" }, "user": "alice" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_document_shape() {
        let data = payload(json!(1000));
        let doc = SessionRecord::document("abc", &data);
        assert_eq!(doc["sid"], "abc");
        assert_eq!(doc["data"]["user"], "alice");
        assert_eq!(doc["data"]["cookie"]["_expires"], 1000);
    }

    #[test]
    fn test_from_document_ignores_extra_fields() {
        let doc = json!({ "_id": 7, "sid": "abc", "data": { "n": 1 } });
        let record = SessionRecord::from_document(doc).unwrap();
        assert_eq!(record.sid, "abc");
        assert_eq!(record.data["n"], 1);
    }

    #[test]
    fn test_from_document_rejects_wrong_shape() {
        let err = SessionRecord::from_document(json!({ "sid": 5 })).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_expires_at_from_millis() {
        let record = SessionRecord::new("a", payload(json!(1_700_000_000_123i64)));
        let expires = record.expires_at().unwrap();
        assert_eq!(expires.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_expires_at_from_iso_string() {
        let record = SessionRecord::new("a", payload(json!("2026-01-01T00:00:00.000Z")));
        let expires = record.expires_at().unwrap();
        assert_eq!(expires.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_missing_or_garbage_expiry_never_expires() {
        let now = Utc::now();
        let no_cookie = SessionRecord::new("a", SessionData::new());
        assert!(no_cookie.expires_at().is_none());
        assert!(!no_cookie.is_expired_at(now));

        let garbage = SessionRecord::new("b", payload(json!("next tuesday")));
        assert!(garbage.expires_at().is_none());
        assert!(!garbage.is_expired_at(now));
    }

    #[test]
    fn test_parse_timestamp_requires_rfc3339() {
        assert!(parse_timestamp("2020-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp("2020-01-01T00:00:00.250+02:00").is_some());
        for loose in ["2020-01-01", "5", "2020-01-01 00:00:00", "2020-02-30T00:00:00Z"] {
            assert!(parse_timestamp(loose).is_none(), "{loose}");
        }
    }

    #[test]
    fn test_is_expired_is_strict() {
        let now = Utc::now();
        let past = SessionRecord::new("a", payload(json!((now - Duration::seconds(1)).timestamp_millis())));
        let future = SessionRecord::new("b", payload(json!((now + Duration::seconds(60)).timestamp_millis())));
        assert!(past.is_expired_at(now));
        assert!(!future.is_expired_at(now));
    }

    #[test]
    fn test_filters() {
        assert_eq!(by_sid("abc"), Filter::eq("sid", "abc"));
        let now = Utc::now();
        match expired_before(now) {
            Filter::Lt(path, Bound::Instant(at)) => {
                assert_eq!(path.to_json_path(), "$.data.cookie._expires");
                assert_eq!(at, now);
            }
            other => panic!("unexpected filter: {:?}", other),
        }
    }
}
