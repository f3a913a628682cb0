use std::fmt::{Display, Formatter};

use leadgate_core::{ClassifiedError, UtcDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request identifier (UUID v4) correlating output with log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// JSON document printed for every command.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub request_id: RequestId,
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    pub ok: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl Envelope {
    pub fn new(
        request_id: RequestId,
        command: &'static str,
        data: Value,
        error: Option<ClassifiedError>,
    ) -> Self {
        Self {
            request_id,
            command,
            generated_at: UtcDateTime::now(),
            ok: error.is_none(),
            data,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use leadgate_core::classify;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_id_is_hyphenated_uuid() {
        let id = RequestId::new_v4().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn envelope_reports_error_only_on_failure() {
        let ok = serde_json::to_value(Envelope::new(
            RequestId::new_v4(),
            "status",
            json!({}),
            None,
        ))
        .expect("serializable");
        assert_eq!(ok["ok"], true);
        assert!(ok.get("error").is_none());

        let failed = serde_json::to_value(Envelope::new(
            RequestId::new_v4(),
            "fetch",
            Value::Null,
            Some(classify(401, "incorrect")),
        ))
        .expect("serializable");
        assert_eq!(failed["ok"], false);
        assert_eq!(failed["error"]["kind"], "INVALID_CREDENTIAL");
    }
}
