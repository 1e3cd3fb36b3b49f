//! Unary RPC methods served on `/rpc`.

use tracing::{debug, info};

use caramel_core::protocol::{
    PingReply, PingRequest, RpcRequest, RpcResponse, StatusResponse, METHOD_PING,
    METHOD_PING_DRIVER_SERVICE, STATUS_HEALTHY,
};
use caramel_telemetry::names;

use crate::driver::DriverState;
use crate::rpc;

/// Route one request to its method.
pub fn dispatch(state: &DriverState, request: RpcRequest) -> RpcResponse {
    state
        .metrics()
        .counter_inc(names::RPC_CALLS, &[("method", request.method.as_str())], 1);
    debug!(method = %request.method, "rpc call");

    match request.method.as_str() {
        METHOD_PING => ping(state, request),
        METHOD_PING_DRIVER_SERVICE => ping_driver_service(state, request),
        other => rpc::method_not_found(request.id, other),
    }
}

fn ping(state: &DriverState, request: RpcRequest) -> RpcResponse {
    let params: PingRequest = match rpc::parse_params(request.params.as_ref()) {
        Ok(p) => p,
        Err(e) => return rpc::invalid_params(request.id, e),
    };
    state.record_contact();
    info!(device = %params.name, "client said hello");
    let reply = PingReply {
        message: format!("Saying hello to {}!", params.name),
    };
    rpc::respond(request.id, &reply)
}

fn ping_driver_service(state: &DriverState, request: RpcRequest) -> RpcResponse {
    state.record_contact();
    let status = if state.is_initialized() {
        STATUS_HEALTHY
    } else {
        0
    };
    rpc::respond(request.id, &StatusResponse { status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::AllJoints;
    use caramel_core::SessionStatus;
    use caramel_settings::HostSettings;
    use caramel_telemetry::MetricsRecorder;
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> DriverState {
        DriverState::new(
            &HostSettings::default(),
            Arc::new(AllJoints),
            Arc::new(MetricsRecorder::new()),
            None,
        )
    }

    #[tokio::test]
    async fn ping_greets_by_name() {
        let state = state();
        let resp = dispatch(
            &state,
            RpcRequest::new(1, METHOD_PING, json!({"name": "iPhone"})),
        );
        assert!(resp.success);
        assert_eq!(resp.result.unwrap()["message"], "Saying hello to iPhone!");
        assert_eq!(state.monitor().status(), SessionStatus::Success);
    }

    #[tokio::test]
    async fn ping_without_params_uses_empty_name() {
        let state = state();
        let resp = dispatch(&state, RpcRequest::new(2, METHOD_PING, json!(null)));
        assert_eq!(resp.result.unwrap()["message"], "Saying hello to !");
    }

    #[tokio::test]
    async fn ping_with_bad_params_is_rejected() {
        let state = state();
        let resp = dispatch(&state, RpcRequest::new(3, METHOD_PING, json!({"name": 7})));
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().code, rpc::INVALID_PARAMS);
        assert_eq!(state.monitor().status(), SessionStatus::NotStarted);
    }

    #[tokio::test]
    async fn driver_service_reports_initialization() {
        let state = state();
        let resp = dispatch(
            &state,
            RpcRequest::new(4, METHOD_PING_DRIVER_SERVICE, json!({})),
        );
        assert_eq!(resp.result.unwrap()["status"], 0);
        assert_eq!(
            state
                .metrics()
                .counter_get(names::RPC_CALLS, &[("method", METHOD_PING_DRIVER_SERVICE)]),
            1
        );
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let state = state();
        let resp = dispatch(&state, RpcRequest::new(5, "Teleport", json!({})));
        assert_eq!(resp.error.unwrap().code, rpc::METHOD_NOT_FOUND);
        assert_eq!(resp.id, Some(json!(5)));
    }
}
