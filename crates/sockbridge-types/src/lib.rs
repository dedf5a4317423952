use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Three-component vector (`geometry_msgs/Vector3`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Velocity command split into linear and angular parts (`geometry_msgs/Twist`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// Position in free space (`geometry_msgs/Point`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Orientation in free space (`geometry_msgs/Quaternion`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// Planar pose (`geometry_msgs/Pose2D`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// A single typed message built by a schema decoder and handed to the bus.
///
/// There is one variant per schema known to the bridge.  Every field is a
/// `f64`; fields missing from the client payload are `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    Twist(Twist),
    Vector3(Vector3),
    Point(Point),
    Quaternion(Quaternion),
    Pose2D(Pose2D),
    /// `std_msgs/Float64`
    Float64(f64),
}

/// Unified event wrapper for the pub/sub bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "sockbridge::/cmd_vel"
    pub source: String,
    /// Channel the message was published on.
    pub channel: String,
    /// Schema the channel was registered with.
    pub schema: String,
    pub payload: Message,
}

/// Status code carried as the first field of every response frame.
///
/// The numeric values are part of the wire protocol and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    PublisherAlreadyExists = 1,
    BadData = 2,
    PublisherIsNotExists = 3,
    Exception = 4,
}

impl ErrorCode {
    /// The wire value of this code.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Map a wire value back to a code.  Returns `None` for values outside
    /// the fixed enumeration.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::Ok),
            1 => Some(ErrorCode::PublisherAlreadyExists),
            2 => Some(ErrorCode::BadData),
            3 => Some(ErrorCode::PublisherIsNotExists),
            4 => Some(ErrorCode::Exception),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Outcome of one request: a status code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ErrorCode,
    pub message: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            code: ErrorCode::Ok,
            message: "ok".to_string(),
        }
    }

    /// Parse a `"<code>;<message>"` response line.
    ///
    /// Returns `None` when the code field is missing, not a number, or not a
    /// known [`ErrorCode`].
    pub fn parse(line: &str) -> Option<Self> {
        let (code, message) = line.split_once(';')?;
        let code = ErrorCode::from_wire(code.trim().parse().ok()?)?;
        Some(Self {
            code,
            message: message.to_string(),
        })
    }
}

impl From<&BridgeError> for Reply {
    fn from(err: &BridgeError) -> Self {
        let code = err.code();
        let message = match code {
            ErrorCode::Exception => format!("Process data error: {err}"),
            _ => err.to_string(),
        };
        Self { code, message }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};{}", self.code, self.message)
    }
}

/// Global error type spanning malformed frames, registry conflicts, payload
/// decoding and transport failures.
///
/// The `Display` text of the protocol-level variants is exactly what goes on
/// the wire after the status code.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Separated data len less than {0}")]
    TooFewFields(usize),

    #[error("Unknown key: {0}")]
    UnknownOpcode(String),

    #[error("Publisher {0} already exists")]
    PublisherAlreadyExists(String),

    #[error("Publisher {0} does not exist")]
    PublisherNotFound(String),

    #[error("Unknown schema name: {0}")]
    UnknownSchema(String),

    #[error("Cannot parse data: {payload} for type \"{schema}\"")]
    UndecodablePayload { schema: String, payload: String },

    #[error("bus registration failed for {channel}: {details}")]
    Bus { channel: String, details: String },

    /// A fault that escaped the dispatch path (e.g. a panic in a decoder).
    #[error("{0}")]
    Fault(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The wire [`ErrorCode`] reported for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::TooFewFields(_)
            | BridgeError::UnknownOpcode(_)
            | BridgeError::UnknownSchema(_)
            | BridgeError::UndecodablePayload { .. } => ErrorCode::BadData,
            BridgeError::PublisherAlreadyExists(_) => ErrorCode::PublisherAlreadyExists,
            BridgeError::PublisherNotFound(_) => ErrorCode::PublisherIsNotExists,
            BridgeError::Bus { .. }
            | BridgeError::Fault(_)
            | BridgeError::Io(_)
            | BridgeError::Config(_) => ErrorCode::Exception,
        }
    }
}
