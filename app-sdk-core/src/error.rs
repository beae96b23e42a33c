use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Possible errors from client-less SDK operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A local validation failed before any request was made
    #[error("validation failed: {0}")]
    Validation(String),

    /// Common error case when parsing wire bytes into own structs
    #[error("error deserializing value: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML variant of the above, only reachable through the YAML codec
    #[error("error deserializing YAML value: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Http based error
    #[error("http error: {0}")]
    Http(#[from] http::Error),

    /// An object did not satisfy the wire contract for its kind
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// A kind is missing the codec required for the requested encoding
    #[error("no codec registered for encoding {0}")]
    MissingCodec(&'static str),
}

/// A Kubernetes status object, as returned by the API server on failures
/// (and inside watch `Error` events).
///
/// Equivalent to `Status` in apimachinery, with the fields this SDK consumes.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Status {
    /// Suggested HTTP return code (0 if unset)
    #[serde(default, skip_serializing_if = "is_u16_zero")]
    pub code: u16,

    /// Status of the operation: `Success` or `Failure`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,

    /// A human-readable description of the status of this operation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// A machine-readable description of why this operation is in the
    /// `Failure` status. Clarifies the HTTP status code but does not override it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

fn is_u16_zero(v: &u16) -> bool {
    *v == 0
}

impl Status {
    /// Construct a failure Status with a message and a machine-readable reason
    pub fn failure(message: &str, reason: &str) -> Self {
        Self {
            status: "Failure".into(),
            message: message.into(),
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Attach a suggested HTTP code to the status
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn status_deserialize() {
        let resp = r#"{"kind":"Status","apiVersion":"v1","metadata":{},"status":"Failure","message":"dashboards.grafana.com \"x\" not found","reason":"NotFound","code":404}"#;
        let s: Status = serde_json::from_str(resp).unwrap();
        assert_eq!(s.code, 404);
        assert_eq!(s.reason, "NotFound");
    }

    #[test]
    fn status_skips_zero_code() {
        let s = Status::failure("nope", "Invalid");
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("code").is_none());
        assert_eq!(v["reason"], "Invalid");
    }
}
