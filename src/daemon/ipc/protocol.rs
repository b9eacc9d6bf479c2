use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::daemon::error::RecorderError;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    StartTracking,
    StopTracking,
    GetSessions,
    Status,
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Restores the typed error on the client side. Any other code, `persistence_error` from a
    /// failed flush included, is kept as [RecorderError::Remote] so it can't be mistaken for a
    /// broken connection.
    pub fn into_error(self) -> RecorderError {
        match self.code.as_str() {
            "already_tracking" => RecorderError::AlreadyTracking,
            "not_tracking" => RecorderError::NotTracking,
            _ => RecorderError::Remote {
                code: self.code,
                message: self.message,
            },
        }
    }
}

impl From<&RecorderError> for ErrorInfo {
    fn from(error: &RecorderError) -> Self {
        ErrorInfo::new(error.code(), error.to_string())
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(id, ErrorInfo::new(code, message))
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parses one request line.
pub fn parse_request(line: &str) -> Result<Request, ErrorInfo> {
    if line.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_request", "request body was empty"));
    }
    serde_json::from_str(line)
        .map_err(|err| ErrorInfo::new("invalid_request", format!("request was not valid: {err}")))
}

#[cfg(test)]
mod tests {
    use crate::daemon::error::RecorderError;

    use super::{ErrorInfo, Method, PROTOCOL_VERSION, parse_request};

    #[test]
    fn test_parse_request() {
        let request =
            parse_request(r#"{"protocol_version":1,"method":"get_sessions","id":"7"}"#).unwrap();
        assert_eq!(request.protocol_version, PROTOCOL_VERSION);
        assert_eq!(request.method, Method::GetSessions);
        assert_eq!(request.id.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_request_rejects_garbage() {
        for line in ["", "   ", "{", r#"{"protocol_version":1,"method":"reboot"}"#] {
            let error = parse_request(line).unwrap_err();
            assert_eq!(error.code, "invalid_request");
        }
    }

    #[test]
    fn test_error_codes_round_trip() {
        let info = ErrorInfo::from(&RecorderError::AlreadyTracking);
        assert_eq!(info.code, "already_tracking");
        assert!(matches!(info.into_error(), RecorderError::AlreadyTracking));

        let info = ErrorInfo::from(&RecorderError::NotTracking);
        assert!(matches!(info.into_error(), RecorderError::NotTracking));

        let info = ErrorInfo::from(&RecorderError::persistence(
            "sessions.json",
            std::io::Error::other("disk full"),
        ));
        let error = info.into_error();
        assert!(matches!(
            &error,
            RecorderError::Remote { code, .. } if code == "persistence_error"
        ));
        assert_eq!(error.code(), "persistence_error");

        let info = ErrorInfo::from(&RecorderError::malformed("task-app", "bad"));
        assert!(matches!(
            info.into_error(),
            RecorderError::Remote { code, .. } if code == "malformed_record"
        ));
    }
}
