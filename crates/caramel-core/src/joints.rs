//! Canonical joint roles and their mapping to the capture device's skeleton
//! joint names.
//!
//! The device has no distinct wrist joint, so each wrist role aliases the
//! matching hand joint name. Going from a name back to roles therefore fans a
//! hand sample out to both the hand and the wrist; every other name maps to
//! exactly one role.

use serde::{Deserialize, Serialize};

use crate::errors::{CaramelError, Result};

/// Canonical joint roles on the host side.
///
/// Declaration order is the integer wire code (`Head` = 0 ... `FootTipRight` = 24,
/// `Manual` = 25).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum JointRole {
    Head,
    Neck,
    SpineShoulder,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    HandTipLeft,
    ThumbLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HandTipRight,
    ThumbRight,
    SpineMiddle,
    SpineWaist,
    HipLeft,
    KneeLeft,
    FootLeft,
    FootTipLeft,
    HipRight,
    KneeRight,
    FootRight,
    FootTipRight,
    /// Left for the user to assign by hand; never produced by the mapper.
    Manual,
}

impl JointRole {
    /// Every automatically mapped role, in wire order.
    pub const ALL: [JointRole; 25] = [
        Self::Head,
        Self::Neck,
        Self::SpineShoulder,
        Self::ShoulderLeft,
        Self::ElbowLeft,
        Self::WristLeft,
        Self::HandLeft,
        Self::HandTipLeft,
        Self::ThumbLeft,
        Self::ShoulderRight,
        Self::ElbowRight,
        Self::WristRight,
        Self::HandRight,
        Self::HandTipRight,
        Self::ThumbRight,
        Self::SpineMiddle,
        Self::SpineWaist,
        Self::HipLeft,
        Self::KneeLeft,
        Self::FootLeft,
        Self::FootTipLeft,
        Self::HipRight,
        Self::KneeRight,
        Self::FootRight,
        Self::FootTipRight,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        if code == Self::Manual as i32 {
            return Some(Self::Manual);
        }
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// Index into a role-ordered table. `Manual` has none.
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Manual => None,
            role => Some(role as usize),
        }
    }

    /// Host-facing name, e.g. `JointHandLeft`.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Head => "JointHead",
            Self::Neck => "JointNeck",
            Self::SpineShoulder => "JointSpineShoulder",
            Self::ShoulderLeft => "JointShoulderLeft",
            Self::ElbowLeft => "JointElbowLeft",
            Self::WristLeft => "JointWristLeft",
            Self::HandLeft => "JointHandLeft",
            Self::HandTipLeft => "JointHandTipLeft",
            Self::ThumbLeft => "JointThumbLeft",
            Self::ShoulderRight => "JointShoulderRight",
            Self::ElbowRight => "JointElbowRight",
            Self::WristRight => "JointWristRight",
            Self::HandRight => "JointHandRight",
            Self::HandTipRight => "JointHandTipRight",
            Self::ThumbRight => "JointThumbRight",
            Self::SpineMiddle => "JointSpineMiddle",
            Self::SpineWaist => "JointSpineWaist",
            Self::HipLeft => "JointHipLeft",
            Self::KneeLeft => "JointKneeLeft",
            Self::FootLeft => "JointFootLeft",
            Self::FootTipLeft => "JointFootTipLeft",
            Self::HipRight => "JointHipRight",
            Self::KneeRight => "JointKneeRight",
            Self::FootRight => "JointFootRight",
            Self::FootTipRight => "JointFootTipRight",
            Self::Manual => "JointManual",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.display_name() == name)
    }
}

impl From<JointRole> for i32 {
    fn from(role: JointRole) -> Self {
        role.code()
    }
}

impl TryFrom<i32> for JointRole {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("invalid joint role code: {code}"))
    }
}

impl std::fmt::Display for JointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

pub const HEAD_JOINT: &str = "head_joint";
const LEFT_HAND_JOINT: &str = "left_hand_joint";
const RIGHT_HAND_JOINT: &str = "right_hand_joint";

/// Device joint name for a role. `None` only for [`JointRole::Manual`].
pub fn name_for_role(role: JointRole) -> Option<&'static str> {
    let name = match role {
        JointRole::Head => HEAD_JOINT,
        JointRole::Neck => "neck_1_joint",
        JointRole::SpineShoulder => "spine_7_joint",
        JointRole::ShoulderLeft => "left_shoulder_1_joint",
        JointRole::ElbowLeft => "left_forearm_joint",
        JointRole::WristLeft | JointRole::HandLeft => LEFT_HAND_JOINT,
        JointRole::HandTipLeft => "left_handMid_3_joint",
        JointRole::ThumbLeft => "left_handThumb_2_joint",
        JointRole::ShoulderRight => "right_shoulder_1_joint",
        JointRole::ElbowRight => "right_forearm_joint",
        JointRole::WristRight | JointRole::HandRight => RIGHT_HAND_JOINT,
        JointRole::HandTipRight => "right_handMid_3_joint",
        JointRole::ThumbRight => "right_handThumb_2_joint",
        JointRole::SpineMiddle => "spine_4_joint",
        JointRole::SpineWaist => "hips_joint",
        JointRole::HipLeft => "left_upLeg_joint",
        JointRole::KneeLeft => "left_leg_joint",
        JointRole::FootLeft => "left_foot_joint",
        JointRole::FootTipLeft => "left_toes_joint",
        JointRole::HipRight => "right_upLeg_joint",
        JointRole::KneeRight => "right_leg_joint",
        JointRole::FootRight => "right_foot_joint",
        JointRole::FootTipRight => "right_toes_joint",
        JointRole::Manual => return None,
    };
    Some(name)
}

/// Primary role for a device joint name. Hand names resolve to the hand role.
pub fn role_for_name(name: &str) -> Result<JointRole> {
    roles_for_name(name).map(|roles| roles[0])
}

/// Every role a frame with this name must be delivered to.
///
/// Hand names yield the hand role followed by its derived wrist; all other
/// names yield a single role.
pub fn roles_for_name(name: &str) -> Result<&'static [JointRole]> {
    let roles: &'static [JointRole] = match name {
        HEAD_JOINT => &[JointRole::Head],
        "neck_1_joint" => &[JointRole::Neck],
        "spine_7_joint" => &[JointRole::SpineShoulder],
        "left_shoulder_1_joint" => &[JointRole::ShoulderLeft],
        "left_forearm_joint" => &[JointRole::ElbowLeft],
        LEFT_HAND_JOINT => &[JointRole::HandLeft, JointRole::WristLeft],
        "left_handMid_3_joint" => &[JointRole::HandTipLeft],
        "left_handThumb_2_joint" => &[JointRole::ThumbLeft],
        "right_shoulder_1_joint" => &[JointRole::ShoulderRight],
        "right_forearm_joint" => &[JointRole::ElbowRight],
        RIGHT_HAND_JOINT => &[JointRole::HandRight, JointRole::WristRight],
        "right_handMid_3_joint" => &[JointRole::HandTipRight],
        "right_handThumb_2_joint" => &[JointRole::ThumbRight],
        "spine_4_joint" => &[JointRole::SpineMiddle],
        "hips_joint" => &[JointRole::SpineWaist],
        "left_upLeg_joint" => &[JointRole::HipLeft],
        "left_leg_joint" => &[JointRole::KneeLeft],
        "left_foot_joint" => &[JointRole::FootLeft],
        "left_toes_joint" => &[JointRole::FootTipLeft],
        "right_upLeg_joint" => &[JointRole::HipRight],
        "right_leg_joint" => &[JointRole::KneeRight],
        "right_foot_joint" => &[JointRole::FootRight],
        "right_toes_joint" => &[JointRole::FootTipRight],
        other => return Err(CaramelError::UnknownJoint(other.to_string())),
    };
    Ok(roles)
}

/// Device names for a set of roles, in role order, without duplicates.
///
/// `Manual` entries are skipped.
pub fn names_for_roles(roles: &[JointRole]) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = Vec::with_capacity(roles.len());
    for role in JointRole::ALL {
        if !roles.contains(&role) {
            continue;
        }
        if let Some(name) = name_for_role(role) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// The hand role a wrist mirrors, if any.
pub fn wrist_source(role: JointRole) -> Option<JointRole> {
    match role {
        JointRole::WristLeft => Some(JointRole::HandLeft),
        JointRole::WristRight => Some(JointRole::HandRight),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_wrist(role: JointRole) -> bool {
        matches!(role, JointRole::WristLeft | JointRole::WristRight)
    }

    #[test]
    fn round_trip_for_every_non_wrist_role() {
        for role in JointRole::ALL {
            let name = name_for_role(role).unwrap();
            let back = role_for_name(name).unwrap();
            if is_wrist(role) {
                assert_eq!(Some(back), wrist_source(role), "{role} aliases its hand");
            } else {
                assert_eq!(back, role, "{name}");
            }
        }
    }

    #[test]
    fn manual_has_no_device_name() {
        assert_eq!(name_for_role(JointRole::Manual), None);
    }

    #[test]
    fn every_name_resolves_to_its_role_set() {
        for role in JointRole::ALL {
            let roles = roles_for_name(name_for_role(role).unwrap()).unwrap();
            assert!(roles.contains(&role));
        }
    }

    #[test]
    fn hand_names_fan_out_to_wrist_once() {
        assert_eq!(
            roles_for_name("left_hand_joint").unwrap(),
            &[JointRole::HandLeft, JointRole::WristLeft]
        );
        assert_eq!(
            roles_for_name("right_hand_joint").unwrap(),
            &[JointRole::HandRight, JointRole::WristRight]
        );
        assert_eq!(roles_for_name("head_joint").unwrap().len(), 1);
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = role_for_name("tail_joint").unwrap_err();
        assert!(matches!(err, CaramelError::UnknownJoint(ref n) if n == "tail_joint"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(role_for_name("Head_Joint").is_err());
    }

    #[test]
    fn wire_codes_follow_declaration_order() {
        assert_eq!(JointRole::Head.code(), 0);
        assert_eq!(JointRole::WristLeft.code(), 5);
        assert_eq!(JointRole::FootTipRight.code(), 24);
        assert_eq!(JointRole::Manual.code(), 25);
        for (idx, role) in JointRole::ALL.into_iter().enumerate() {
            assert_eq!(JointRole::from_code(idx as i32), Some(role));
            assert_eq!(role.index(), Some(idx));
        }
        assert_eq!(JointRole::from_code(25), Some(JointRole::Manual));
        assert_eq!(JointRole::from_code(26), None);
        assert_eq!(JointRole::from_code(-1), None);
    }

    #[test]
    fn role_serializes_as_integer() {
        let json = serde_json::to_string(&JointRole::SpineWaist).unwrap();
        assert_eq!(json, "16");
        let back: JointRole = serde_json::from_str("12").unwrap();
        assert_eq!(back, JointRole::HandRight);
        assert!(serde_json::from_str::<JointRole>("99").is_err());
    }

    #[test]
    fn display_names_round_trip() {
        for role in JointRole::ALL {
            assert_eq!(JointRole::from_display_name(role.display_name()), Some(role));
        }
        assert_eq!(JointRole::from_display_name("JointTail"), None);
    }

    #[test]
    fn names_for_roles_dedupes_wrist_alias_and_keeps_order() {
        let names = names_for_roles(&[
            JointRole::SpineWaist,
            JointRole::WristLeft,
            JointRole::Head,
            JointRole::HandLeft,
            JointRole::Manual,
        ]);
        assert_eq!(names, vec!["head_joint", "left_hand_joint", "hips_joint"]);
    }
}
