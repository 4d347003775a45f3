//! Shared vocabulary: scheduling units, request sources, broadcast sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Device ID sentinel used by requesters to address all devices of a service.
pub const BROADCAST_DEVICE_ID: &str = "@all";

/// Reserved device/tenant UUID that `@all` maps to in storage and on the wire.
pub const BROADCAST_DEVICE_UUID: Uuid = Uuid::from_u128(0x0a110a11_bca5_bca5_0a11_87dcb71a7f4d);

/// Resolve a requester-supplied device identifier to its stored UUID form.
///
/// The broadcast sentinel maps to the reserved broadcast UUID; anything else
/// must parse as a UUID.
pub fn resolve_device_id(device_id: &str) -> Result<Uuid, CoreError> {
    if device_id == BROADCAST_DEVICE_ID {
        return Ok(BROADCAST_DEVICE_UUID);
    }
    Uuid::parse_str(device_id).map_err(|_| CoreError::InvalidDeviceId(device_id.to_string()))
}

/// Where a scheduling request entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    /// Received on the scheduler input queue.
    Event,
    /// Received at the REST endpoint.
    Rest,
}

impl FromStr for RequestSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "rest" => Ok(Self::Rest),
            other => Err(CoreError::InvalidRequestSource(other.to_string())),
        }
    }
}

impl fmt::Display for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Rest => write!(f, "rest"),
        }
    }
}

/// The frequency class of a task schedule.
///
/// IMPORTANT - DO NOT REORDER. The ordinal is stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum SchedulingUnit {
    Once = 1,
    Milliseconds = 2,
    Seconds = 3,
    Minutes = 4,
    Hours = 5,
    Days = 6,
    Weeks = 7,
    Months = 8,
    Duration = 9,
    Crontab = 10,
}

impl SchedulingUnit {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            1 => Some(Self::Once),
            2 => Some(Self::Milliseconds),
            3 => Some(Self::Seconds),
            4 => Some(Self::Minutes),
            5 => Some(Self::Hours),
            6 => Some(Self::Days),
            7 => Some(Self::Weeks),
            8 => Some(Self::Months),
            9 => Some(Self::Duration),
            10 => Some(Self::Crontab),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl fmt::Display for SchedulingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Once => "once",
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
            Self::Duration => "duration",
            Self::Crontab => "crontab",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_sentinel_resolves_to_reserved_uuid() {
        assert_eq!(resolve_device_id("@all").unwrap(), BROADCAST_DEVICE_UUID);
    }

    #[test]
    fn regular_device_id_must_be_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(resolve_device_id(&id.to_string()).unwrap(), id);
        assert!(resolve_device_id("not-a-uuid").is_err());
    }

    #[test]
    fn scheduling_unit_ordinals_are_stable() {
        assert_eq!(SchedulingUnit::Once.as_i16(), 1);
        assert_eq!(SchedulingUnit::Crontab.as_i16(), 10);
        assert_eq!(SchedulingUnit::from_i16(7), Some(SchedulingUnit::Weeks));
        assert_eq!(SchedulingUnit::from_i16(0), None);
    }

    #[test]
    fn request_source_parses_known_tags_only() {
        assert_eq!("rest".parse::<RequestSource>().unwrap(), RequestSource::Rest);
        assert_eq!("event".parse::<RequestSource>().unwrap(), RequestSource::Event);
        assert!("webhook".parse::<RequestSource>().is_err());
    }
}
