//! Mapping of wire errors back to core errors.

use docsync_core::{CoreError, Path, Value};
use docsync_protocol::{ErrorCode, ErrorPayload, RequestEvent};

/// Converts an error response to the [`CoreError`] a local backend would
/// have returned for the same request.
pub fn remote_error(event: RequestEvent, path: &Path, error: ErrorPayload) -> CoreError {
    match error.code {
        Some(ErrorCode::Forbidden) => CoreError::forbidden(event.access_mode(), path.encode()),
        Some(ErrorCode::UnknownEvent) => CoreError::UnknownEvent(event.as_str().to_string()),
        Some(ErrorCode::InvalidRequest) => CoreError::InvalidPayload(error.message().to_string()),
        Some(ErrorCode::Internal) | None => CoreError::Remote(error.message().to_string()),
    }
}

pub(crate) fn unexpected_result(event: RequestEvent, expected: &str, got: &Option<Value>) -> CoreError {
    let got = match got {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "a boolean",
        Some(Value::Number(_)) => "a number",
        Some(Value::String(_)) => "a string",
        Some(Value::Array(_)) => "an array",
        Some(Value::Object(_)) => "an object",
    };
    CoreError::InvalidPayload(format!("{event} returned {got}, expected {expected}"))
}
