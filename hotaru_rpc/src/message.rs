//! Logical message shapes layered on top of the wire [`crate::frame::Frame`].
//!
//! `InvokeRequest`/`InvokeResult`/`Credentials` are protocol-internal:
//! they always travel JSON-encoded regardless of the connection's
//! configured [`crate::serializer::Serializer`], the same way a
//! `byte[]` payload bypasses it (§4.1). The application-facing
//! `Serializer` only ever sees application `Object` payloads.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codepage::CodePage;
use crate::error::{NetworkError, Result};
use crate::frame::{Frame, TypeCode};

/// A decoded application-level value paired with its correlation ids.
/// Both ids zero means a plain application message; otherwise the
/// message participates in the RMI subsystem (§3).
#[derive(Debug, Clone)]
pub struct TrackMessage<V> {
    pub message_id: i32,
    pub in_response_to_id: i32,
    pub value: V,
}

impl<V> TrackMessage<V> {
    pub fn application(value: V) -> Self {
        Self { message_id: 0, in_response_to_id: 0, value }
    }

    pub fn is_application_message(&self) -> bool {
        self.message_id == 0 && self.in_response_to_id == 0
    }

    pub fn is_incoming_request(&self) -> bool {
        self.message_id != 0 && self.in_response_to_id == 0
    }

    pub fn is_response(&self) -> bool {
        self.in_response_to_id != 0
    }
}

/// A request to invoke a method on a remote controller (§3).
///
/// `controller` is the opaque identifier string from §6.3
/// ("<type full name>, <module name>"); `parameter_types` are the
/// parameter type full-names, positional, used for overload matching
/// in place of reflection (§4.2.2, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub controller: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    pub parameters: Vec<serde_json::Value>,
}

/// The outcome of a remote invocation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    pub exception_code: ExceptionCode,
    pub exception_message: Option<String>,
    pub full_exception: Option<String>,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl InvokeResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            exception_code: ExceptionCode::Success,
            exception_message: None,
            full_exception: None,
            result,
        }
    }

    pub fn failure(code: ExceptionCode, message: impl Into<String>, full: impl Into<String>) -> Self {
        Self {
            exception_code: code,
            exception_message: Some(message.into()),
            full_exception: Some(full.into()),
            result: serde_json::Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.exception_code, ExceptionCode::Success)
    }
}

/// `ExceptionCode == Success` (0) means the call succeeded; every other
/// variant encodes one of §7's `ControllerInvocation` substates, plus the
/// non-fatal framing errors that can be correlated back to an RMI
/// exchange (§4.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionCode {
    Success = 0,
    OperationCancelled = 1,
    DataReceivingError = 2,
    ControllerNotFound = 3,
    MethodNotFound = 4,
    MethodInvokeException = 5,
}

/// The credential exchange payload (§6.2). Any field may be empty for
/// anonymous access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
    pub token: String,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_name.is_empty() && self.password.is_empty() && self.token.is_empty()
    }

    /// Anonymous credentials encode as an `Empty` frame (§6.2 step 1
    /// allows "Empty/DBNull for anonymous"); anything else is a JSON
    /// `Object` frame naming [`CREDENTIALS_TYPE_NAME`].
    pub fn into_frame(&self, encoding: CodePage) -> Result<Frame> {
        if self.is_anonymous() {
            Ok(Frame::empty(0, 0))
        } else {
            encode_json_frame(0, 0, CREDENTIALS_TYPE_NAME, self, encoding)
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.type_code {
            TypeCode::Empty | TypeCode::DBNull => Ok(Credentials::anonymous()),
            TypeCode::Object => decode_json_frame(frame, CREDENTIALS_TYPE_NAME),
            other => Err(NetworkError::ProtocolViolation(format!(
                "credentials frame must be Empty/DBNull/Object, got {other:?}"
            ))),
        }
    }
}

/// Reserved wire `TypeName`s for the three protocol-internal message
/// shapes (§3, §6.2); never exposed to the configured [`crate::serializer::Serializer`].
pub const INVOKE_REQUEST_TYPE_NAME: &str = "hotaru_rpc::InvokeRequest";
pub const INVOKE_RESULT_TYPE_NAME: &str = "hotaru_rpc::InvokeResult";
pub const CREDENTIALS_TYPE_NAME: &str = "hotaru_rpc::Credentials";

fn encode_json_frame<T: Serialize>(
    message_id: i32,
    in_response_to_id: i32,
    type_name: &str,
    value: &T,
    encoding: CodePage,
) -> Result<Frame> {
    let bytes = serde_json::to_vec(value).map_err(|err| NetworkError::SerializationError {
        type_name: type_name.to_string(),
        message_id,
        in_response_to_id,
        cause: err.to_string(),
    })?;
    Ok(Frame::object(message_id, in_response_to_id, encoding, type_name.to_string(), Bytes::from(bytes)))
}

fn decode_json_frame<T: DeserializeOwned>(frame: &Frame, type_name: &str) -> Result<T> {
    let content = frame.content.as_deref().unwrap_or(&[]);
    serde_json::from_slice(content).map_err(|err| NetworkError::SerializationError {
        type_name: type_name.to_string(),
        message_id: frame.message_id,
        in_response_to_id: frame.in_response_to_id,
        cause: err.to_string(),
    })
}

impl InvokeRequest {
    /// `InResponseToId` is always 0 for a request (§4.2.2 step 3).
    pub fn into_frame(&self, message_id: i32, encoding: CodePage) -> Result<Frame> {
        encode_json_frame(message_id, 0, INVOKE_REQUEST_TYPE_NAME, self, encoding)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        decode_json_frame(frame, INVOKE_REQUEST_TYPE_NAME)
    }
}

impl InvokeResult {
    /// `MessageId` is always 0 for a response; `in_response_to_id` names
    /// the request this replies to.
    pub fn into_frame(&self, in_response_to_id: i32, encoding: CodePage) -> Result<Frame> {
        encode_json_frame(0, in_response_to_id, INVOKE_RESULT_TYPE_NAME, self, encoding)
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        decode_json_frame(frame, INVOKE_RESULT_TYPE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_credentials_round_trip_through_an_empty_frame() {
        let frame = Credentials::anonymous().into_frame(CodePage::UTF8).unwrap();
        assert_eq!(frame.type_code, TypeCode::Empty);
        let decoded = Credentials::from_frame(&frame).unwrap();
        assert!(decoded.is_anonymous());
    }

    #[test]
    fn named_credentials_round_trip_through_an_object_frame() {
        let creds = Credentials { user_name: "alice".into(), password: "hunter2".into(), token: String::new() };
        let frame = creds.into_frame(CodePage::UTF8).unwrap();
        assert_eq!(frame.type_code, TypeCode::Object);
        let decoded = Credentials::from_frame(&frame).unwrap();
        assert_eq!(decoded.user_name, "alice");
        assert_eq!(decoded.password, "hunter2");
    }

    #[test]
    fn invoke_request_round_trips_with_its_message_id() {
        let request = InvokeRequest {
            controller: "demo::IAdd, demo".into(),
            method: "Add".into(),
            parameter_types: vec!["i32".into(), "i32".into()],
            parameters: vec![serde_json::json!(2), serde_json::json!(3)],
        };
        let frame = request.into_frame(7, CodePage::UTF8).unwrap();
        assert_eq!(frame.message_id, 7);
        assert_eq!(frame.in_response_to_id, 0);
        let decoded = InvokeRequest::from_frame(&frame).unwrap();
        assert_eq!(decoded.method, "Add");
        assert_eq!(decoded.parameters, request.parameters);
    }

    #[test]
    fn invoke_result_round_trips_with_its_correlation_id() {
        let result = InvokeResult::success(serde_json::json!(5));
        let frame = result.into_frame(7, CodePage::UTF8).unwrap();
        assert_eq!(frame.message_id, 0);
        assert_eq!(frame.in_response_to_id, 7);
        let decoded = InvokeResult::from_frame(&frame).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.result, serde_json::json!(5));
    }
}
