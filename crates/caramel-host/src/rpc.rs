use serde::de::DeserializeOwned;

use caramel_core::protocol::{RpcRequest, RpcResponse};
use caramel_core::CaramelError;

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const NOT_INITIALIZED: &str = "NOT_INITIALIZED";

pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> RpcResponse {
    RpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
}

pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> RpcResponse {
    RpcResponse::error(id, INVALID_PARAMS, msg)
}

pub fn parse_error(detail: impl Into<String>) -> RpcResponse {
    RpcResponse::error(None, PARSE_ERROR, detail)
}

/// Parse a raw text frame into a request.
pub fn parse_request(raw: &str) -> Result<RpcRequest, CaramelError> {
    let request: RpcRequest = serde_json::from_str(raw)
        .map_err(|e| CaramelError::protocol(PARSE_ERROR, e.to_string()))?;
    if request.method.is_empty() {
        return Err(CaramelError::protocol(INVALID_REQUEST, "empty method"));
    }
    Ok(request)
}

/// Deserialize params; absent or null params yield the type's default.
pub fn parse_params<T>(params: Option<&serde_json::Value>) -> Result<T, String>
where
    T: DeserializeOwned + Default,
{
    match params {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| e.to_string()),
    }
}

/// Serialize a handler result into a success envelope.
pub fn respond<T: serde::Serialize>(id: Option<serde_json::Value>, result: &T) -> RpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}
