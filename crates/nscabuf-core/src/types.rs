use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Service State ────────────────────────────────────────────────

/// Check result reported by a plugin. Wire codes follow the plugin exit
/// code convention: 0=OK, 1=WARNING, 2=CRITICAL, 3=UNKNOWN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ServiceState {
    pub const ALL: [Self; 4] = [Self::Ok, Self::Warning, Self::Critical, Self::Unknown];

    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// WARNING and CRITICAL are the states the master raises alarms for.
    pub fn is_alarm(self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by `TryFrom<u16>` for codes outside 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStateCode(pub u16);

impl fmt::Display for InvalidStateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state code: {}", self.0)
    }
}

impl std::error::Error for InvalidStateCode {}

impl TryFrom<u16> for ServiceState {
    type Error = InvalidStateCode;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Warning),
            2 => Ok(Self::Critical),
            3 => Ok(Self::Unknown),
            other => Err(InvalidStateCode(other)),
        }
    }
}

impl FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OK" | "0" => Ok(Self::Ok),
            "WARNING" | "WARN" | "1" => Ok(Self::Warning),
            "CRITICAL" | "CRIT" | "2" => Ok(Self::Critical),
            "UNKNOWN" | "3" => Ok(Self::Unknown),
            _ => Err(format!("unknown service state: {s}")),
        }
    }
}

// ─── Message ──────────────────────────────────────────────────────

/// One decoded passive check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// When the check was raised (unix seconds, as sent by the client).
    pub timestamp: u32,
    pub state: ServiceState,
    pub host: String,
    /// Registry key. One record per distinct service name.
    pub service: String,
    /// Plugin output.
    pub description: String,
}

impl Message {
    pub fn new(
        timestamp: u32,
        state: ServiceState,
        host: impl Into<String>,
        service: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            state,
            host: host.into(),
            service: service.into(),
            description: description.into(),
        }
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

// ─── Gateway Event ────────────────────────────────────────────────

/// Input to the gateway decision loop. Exactly one payload per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A freshly decoded message from a client connection.
    NewMessage(Message),
    /// The init-buffer window for this service has elapsed.
    InitBufferExpiry(String),
    /// The service has been silent for a full cache TTL.
    StateExpiry(String),
}

impl GatewayEvent {
    pub fn service(&self) -> &str {
        match self {
            Self::NewMessage(m) => &m.service,
            Self::InitBufferExpiry(service) | Self::StateExpiry(service) => service,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::InitBufferExpiry(_) => "init_buffer_expiry",
            Self::StateExpiry(_) => "state_expiry",
        }
    }
}
