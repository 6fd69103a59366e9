use crate::error::CalibrationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload-free tag of a [`CalibrationState`], used for timing keys and events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    Initializing,
    AxisMapping,
    LookingForChessboard,
    ChessboardFound,
    LookingForArucoMarkers,
    AllArucoFound,
    ComputeOffsets,
    AlignRobot,
    IterateAlignment,
    Done,
    Error,
}

impl StateKind {
    pub const ALL: [StateKind; 11] = [
        StateKind::Initializing,
        StateKind::AxisMapping,
        StateKind::LookingForChessboard,
        StateKind::ChessboardFound,
        StateKind::LookingForArucoMarkers,
        StateKind::AllArucoFound,
        StateKind::ComputeOffsets,
        StateKind::AlignRobot,
        StateKind::IterateAlignment,
        StateKind::Done,
        StateKind::Error,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StateKind::Initializing => "INITIALIZING",
            StateKind::AxisMapping => "AXIS_MAPPING",
            StateKind::LookingForChessboard => "LOOKING_FOR_CHESSBOARD",
            StateKind::ChessboardFound => "CHESSBOARD_FOUND",
            StateKind::LookingForArucoMarkers => "LOOKING_FOR_ARUCO_MARKERS",
            StateKind::AllArucoFound => "ALL_ARUCO_FOUND",
            StateKind::ComputeOffsets => "COMPUTE_OFFSETS",
            StateKind::AlignRobot => "ALIGN_ROBOT",
            StateKind::IterateAlignment => "ITERATE_ALIGNMENT",
            StateKind::Done => "DONE",
            StateKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of the calibration machine. `Error` carries the failure.
#[derive(Debug)]
pub enum CalibrationState {
    Initializing,
    AxisMapping,
    LookingForChessboard,
    ChessboardFound,
    LookingForArucoMarkers,
    AllArucoFound,
    ComputeOffsets,
    AlignRobot,
    IterateAlignment,
    /// Marker finished; the machine advances or completes from here.
    Done,
    Error(CalibrationError),
}

impl CalibrationState {
    pub fn kind(&self) -> StateKind {
        match self {
            CalibrationState::Initializing => StateKind::Initializing,
            CalibrationState::AxisMapping => StateKind::AxisMapping,
            CalibrationState::LookingForChessboard => StateKind::LookingForChessboard,
            CalibrationState::ChessboardFound => StateKind::ChessboardFound,
            CalibrationState::LookingForArucoMarkers => StateKind::LookingForArucoMarkers,
            CalibrationState::AllArucoFound => StateKind::AllArucoFound,
            CalibrationState::ComputeOffsets => StateKind::ComputeOffsets,
            CalibrationState::AlignRobot => StateKind::AlignRobot,
            CalibrationState::IterateAlignment => StateKind::IterateAlignment,
            CalibrationState::Done => StateKind::Done,
            CalibrationState::Error(_) => StateKind::Error,
        }
    }

    pub fn error(&self) -> Option<&CalibrationError> {
        match self {
            CalibrationState::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_serde_agree() {
        for kind in StateKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn error_state_exposes_payload() {
        let s = CalibrationState::Error(CalibrationError::InvalidConfig("no markers".into()));
        assert_eq!(s.kind(), StateKind::Error);
        assert!(s.error().is_some());
        assert!(CalibrationState::Done.error().is_none());
    }
}
