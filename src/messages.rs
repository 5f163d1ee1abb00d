use std::fmt;
use std::time::Instant;

use serde_derive::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// A button is identified by its beacon UUID together with the iBeacon major,
/// so buttons of different accepted kinds may share a major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ButtonId {
    /// Beacon UUID, checked against the accepted set.
    pub kind: Uuid,
    pub major: u16,
}

impl ButtonId {
    pub fn new(kind: Uuid, major: u16) -> Self {
        ButtonId { kind, major }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.major)
    }
}

/// Last reported button position. `Unknown` never compares equal to a real
/// reading, so the first sighting of a button always registers as a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonState {
    Unknown,
    Released,
    Pressed,
}

impl From<bool> for ButtonState {
    fn from(pressed: bool) -> Self {
        if pressed {
            ButtonState::Pressed
        } else {
            ButtonState::Released
        }
    }
}

/// One observation of a button beacon.
#[derive(Clone, Debug)]
pub struct Sighting {
    pub id: ButtonId,
    pub pressed: bool,
    pub rssi: i16,
    pub seen_at: Instant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SightingError {
    #[error("malformed sighting: {0}")]
    MalformedInput(String),
}

#[derive(Deserialize)]
struct RawSighting {
    uuid: String,
    id: u16,
    state: u8,
    rssi: i16,
}

impl Sighting {
    /// Parse a sighting published by an external adaptor, stamping it with
    /// the receipt time.
    pub fn from_json(payload: &[u8], seen_at: Instant) -> Result<Self, SightingError> {
        let raw: RawSighting = serde_json::from_slice(payload)
            .map_err(|e| SightingError::MalformedInput(e.to_string()))?;

        let kind = Uuid::parse_str(&raw.uuid)
            .map_err(|e| SightingError::MalformedInput(format!("uuid {:?}: {}", raw.uuid, e)))?;

        let pressed = match raw.state {
            0 => false,
            1 => true,
            other => {
                return Err(SightingError::MalformedInput(format!(
                    "state must be 0 or 1, got {other}"
                )));
            }
        };

        Ok(Sighting {
            id: ButtonId::new(kind, raw.id),
            pressed,
            rssi: raw.rssi,
            seen_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    StateChange {
        id: ButtonId,
        pressed: bool,
        rssi: i16,
    },
    Disconnected {
        id: ButtonId,
        last_rssi: i16,
    },
    Heartbeat,
}

#[derive(Clone, Debug)]
pub enum ControlAnnouncement {
    ReloadConfig,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Stopped,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

    fn parse(payload: &str) -> Result<Sighting, SightingError> {
        Sighting::from_json(payload.as_bytes(), Instant::now())
    }

    #[test]
    fn test_parse_sighting() {
        let sighting = parse(&format!(
            r#"{{"uuid": "{UUID}", "id": 7, "state": 1, "rssi": -61}}"#
        ))
        .unwrap();
        assert_eq!(sighting.id, ButtonId::new(Uuid::parse_str(UUID).unwrap(), 7));
        assert!(sighting.pressed);
        assert_eq!(sighting.rssi, -61);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let result = parse(&format!(r#"{{"uuid": "{UUID}", "id": 7, "state": 1}}"#));
        assert!(matches!(result, Err(SightingError::MalformedInput(_))));
    }

    #[test]
    fn test_non_numeric_rssi_is_malformed() {
        let result = parse(&format!(
            r#"{{"uuid": "{UUID}", "id": 7, "state": 0, "rssi": "loud"}}"#
        ));
        assert!(matches!(result, Err(SightingError::MalformedInput(_))));
    }

    #[test]
    fn test_id_out_of_major_range_is_malformed() {
        let result = parse(&format!(
            r#"{{"uuid": "{UUID}", "id": 70000, "state": 0, "rssi": -40}}"#
        ));
        assert!(matches!(result, Err(SightingError::MalformedInput(_))));
    }

    #[test]
    fn test_state_must_be_a_bit() {
        let result = parse(&format!(
            r#"{{"uuid": "{UUID}", "id": 7, "state": 2, "rssi": -40}}"#
        ));
        assert!(matches!(result, Err(SightingError::MalformedInput(_))));
    }

    #[test]
    fn test_bad_uuid_is_malformed() {
        let result = parse(r#"{"uuid": "not-a-uuid", "id": 7, "state": 0, "rssi": -40}"#);
        assert!(matches!(result, Err(SightingError::MalformedInput(_))));
    }

    #[test]
    fn test_unknown_state_never_matches_a_reading() {
        assert_ne!(ButtonState::Unknown, ButtonState::from(true));
        assert_ne!(ButtonState::Unknown, ButtonState::from(false));
    }
}
