//! [`SchemaRegistry`] – schema name to message decoder table.
//!
//! Every schema is a [`SchemaDef`]: a name, an ordered list of numeric field
//! names, and a builder that assembles a [`Message`] from the field values.
//! Decoding a payload reads each declared field from a flat JSON object,
//! casts it to `f64`, and substitutes `0.0` for fields that are absent.
//! Keys the schema does not declare are ignored.
//!
//! The table is populated once at startup.  Supporting a new message type
//! means adding a [`SchemaDef`] constant and registering it.
//!
//! # Built-in schemas
//!
//! | Schema | Fields |
//! |---|---|
//! | `geometry_msgs/Twist` | `linear_x linear_y linear_z angular_x angular_y angular_z` |
//! | `geometry_msgs/Vector3` | `x y z` |
//! | `geometry_msgs/Point` | `x y z` |
//! | `geometry_msgs/Quaternion` | `x y z w` |
//! | `geometry_msgs/Pose2D` | `x y theta` |
//! | `std_msgs/Float64` | `data` |

use std::collections::HashMap;

use serde_json::{Map, Value};
use sockbridge_types::{Message, Point, Pose2D, Quaternion, Twist, Vector3};
use thiserror::Error;

/// Why a payload could not be turned into a [`Message`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown schema {0}")]
    UnknownSchema(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("field {0} cannot be converted to a number")]
    InvalidField(&'static str),
}

/// Static description of one message schema.
#[derive(Clone, Copy)]
pub struct SchemaDef {
    /// Schema name as sent by clients, e.g. `geometry_msgs/Twist`.
    pub name: &'static str,
    /// Recognised JSON keys, in the order `build` expects them.
    pub fields: &'static [&'static str],
    /// Assemble a message from one value per entry of `fields`.
    pub build: fn(&[f64]) -> Message,
}

impl std::fmt::Debug for SchemaDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl SchemaDef {
    /// Decode `json` into a [`Message`] of this schema.
    pub fn decode(&self, json: &str) -> Result<Message, DecodeError> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(object) = value else {
            return Err(DecodeError::NotAnObject);
        };
        self.decode_object(&object)
    }

    /// Decode an already-parsed JSON object.
    pub fn decode_object(&self, object: &Map<String, Value>) -> Result<Message, DecodeError> {
        let values = self
            .fields
            .iter()
            .map(|&field| match object.get(field) {
                None => Ok(0.0),
                Some(value) => cast_f64(value).ok_or(DecodeError::InvalidField(field)),
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Ok((self.build)(&values))
    }
}

/// Lenient float conversion: numbers as-is, booleans as `1.0`/`0.0`, and
/// numeric strings parsed.  Anything else is rejected.
fn cast_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in schemas
// ─────────────────────────────────────────────────────────────────────────────

pub const TWIST: SchemaDef = SchemaDef {
    name: "geometry_msgs/Twist",
    fields: &["linear_x", "linear_y", "linear_z", "angular_x", "angular_y", "angular_z"],
    build: build_twist,
};

pub const VECTOR3: SchemaDef = SchemaDef {
    name: "geometry_msgs/Vector3",
    fields: &["x", "y", "z"],
    build: build_vector3,
};

pub const POINT: SchemaDef = SchemaDef {
    name: "geometry_msgs/Point",
    fields: &["x", "y", "z"],
    build: build_point,
};

pub const QUATERNION: SchemaDef = SchemaDef {
    name: "geometry_msgs/Quaternion",
    fields: &["x", "y", "z", "w"],
    build: build_quaternion,
};

pub const POSE2D: SchemaDef = SchemaDef {
    name: "geometry_msgs/Pose2D",
    fields: &["x", "y", "theta"],
    build: build_pose2d,
};

pub const FLOAT64: SchemaDef = SchemaDef {
    name: "std_msgs/Float64",
    fields: &["data"],
    build: build_float64,
};

fn build_twist(v: &[f64]) -> Message {
    Message::Twist(Twist {
        linear: Vector3 { x: v[0], y: v[1], z: v[2] },
        angular: Vector3 { x: v[3], y: v[4], z: v[5] },
    })
}

fn build_vector3(v: &[f64]) -> Message {
    Message::Vector3(Vector3 { x: v[0], y: v[1], z: v[2] })
}

fn build_point(v: &[f64]) -> Message {
    Message::Point(Point { x: v[0], y: v[1], z: v[2] })
}

fn build_quaternion(v: &[f64]) -> Message {
    Message::Quaternion(Quaternion {
        x: v[0],
        y: v[1],
        z: v[2],
        w: v[3],
    })
}

fn build_pose2d(v: &[f64]) -> Message {
    Message::Pose2D(Pose2D {
        x: v[0],
        y: v[1],
        theta: v[2],
    })
}

fn build_float64(v: &[f64]) -> Message {
    Message::Float64(v[0])
}

/// Every schema registered by [`SchemaRegistry::with_builtin`].
pub const BUILTIN_SCHEMAS: &[SchemaDef] = &[TWIST, VECTOR3, POINT, QUATERNION, POSE2D, FLOAT64];

// ─────────────────────────────────────────────────────────────────────────────
// SchemaRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Lookup table from schema name to [`SchemaDef`].
///
/// Build it once at startup and share it read-only (e.g. behind an `Arc`).
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, SchemaDef>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every entry of [`BUILTIN_SCHEMAS`].
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for def in BUILTIN_SCHEMAS {
            registry.register(*def);
        }
        registry
    }

    /// Register a schema.  Any previously registered schema with the same
    /// name is replaced.
    pub fn register(&mut self, def: SchemaDef) {
        self.schemas.insert(def.name, def);
    }

    /// Resolve `name` to its decoder.
    pub fn lookup(&self, name: &str) -> Option<&SchemaDef> {
        self.schemas.get(name)
    }

    /// Decode `json` as a message of schema `name`.
    ///
    /// Unknown schemas and malformed payloads are reported as a
    /// [`DecodeError`]; this never panics on client input.
    pub fn decode(&self, name: &str, json: &str) -> Result<Message, DecodeError> {
        self.lookup(name)
            .ok_or_else(|| DecodeError::UnknownSchema(name.to_string()))?
            .decode(json)
    }

    /// Registered schema names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.schemas.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
