//! Wire contract between the capture client and the host.
//!
//! Every call runs over a WebSocket carrying JSON text frames:
//!
//! - `/rpc`: request/response envelopes for `Ping` and `PingDriverService`.
//! - `/joints`: `PublishJointData`, joints up, requested-joint lists down.
//! - `/poses`: `SendPoses`, one role-keyed pose per joint, then `complete`.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::joints::JointRole;
use crate::pose::{JointFrame, Quaternion, Vector3};

pub const RPC_PATH: &str = "/rpc";
pub const JOINTS_PATH: &str = "/joints";
pub const POSES_PATH: &str = "/poses";
pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

pub const METHOD_PING: &str = "Ping";
pub const METHOD_PING_DRIVER_SERVICE: &str = "PingDriverService";

/// `StatusResponse.status` value reported by a healthy host.
pub const STATUS_HEALTHY: i32 = 1;

// ── Payloads ──

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingReply {
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// One joint sample keyed by device joint name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataJoint {
    pub name: String,
    #[serde(rename = "isTracked", default)]
    pub is_tracked: bool,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub orientation: Quaternion,
}

impl From<&JointFrame> for DataJoint {
    fn from(frame: &JointFrame) -> Self {
        Self {
            name: frame.name.clone(),
            is_tracked: frame.is_tracked,
            position: frame.position,
            orientation: frame.orientation,
        }
    }
}

impl From<DataJoint> for JointFrame {
    fn from(joint: DataJoint) -> Self {
        Self {
            name: joint.name,
            is_tracked: joint.is_tracked,
            position: joint.position,
            orientation: joint.orientation,
        }
    }
}

/// One joint sample keyed by role, with Euler rotation in radians.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JointPose {
    pub role: JointRole,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub rotation: Vector3,
}

impl JointPose {
    /// Build a pose from a capture-space transform. The device's skeleton is
    /// mirrored relative to the host, so X position and the Y/Z Euler angles
    /// flip sign.
    pub fn from_capture(role: JointRole, position: Vector3, euler: Vector3) -> Self {
        Self {
            role,
            position: Vector3::new(-position.x, position.y, position.z),
            rotation: Vector3::new(euler.x, -euler.y, -euler.z),
        }
    }

    pub fn orientation(&self) -> Quaternion {
        Quaternion::from_yaw_pitch_roll(self.rotation.y, self.rotation.x, self.rotation.z)
    }
}

/// Device joint names the host currently wants streamed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JointsResponse {
    pub names: Vec<String>,
}

// ── Stream envelopes ──

/// Client → host frames on `/joints` and `/poses`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientStreamMessage {
    Joint(DataJoint),
    Pose(JointPose),
    /// End of a call. On `/joints` the host answers `Completed` and closes;
    /// on `/poses` it applies the batch, answers `Completed` and keeps reading.
    Complete,
}

/// Host → client frames on `/joints` and `/poses`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostStreamMessage {
    Joints(JointsResponse),
    Completed,
}

// ── RPC envelopes ──

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: &str, params: serde_json::Value) -> Self {
        Self {
            id: Some(serde_json::Value::from(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<serde_json::Value>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

pub fn decode<'a, T: Deserialize<'a>>(raw: &'a str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}
