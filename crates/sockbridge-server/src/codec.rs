//! Text protocol spoken over each client connection.
//!
//! Requests and responses are single lines of UTF-8 text, each terminated
//! by `\n`:
//!
//! ```text
//! 0;<channel_name>;<schema_name>                  create a channel
//! 1;<channel_name>;<schema_name>;<json_payload>   publish on a channel
//! <error_code>;<message>                          response
//! ```
//!
//! [`decode_frame`] turns one request line into a [`Command`];
//! [`ProtocolCodec`] does the line framing on the socket.

use bytes::BytesMut;
use sockbridge_types::{BridgeError, Reply};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default upper bound on the length of a single request line.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Opcode of [`Command::CreateChannel`].
pub const OP_CREATE_CHANNEL: &str = "0";
/// Opcode of [`Command::Publish`].
pub const OP_PUBLISH: &str = "1";

const FIELD_SEPARATOR: char = ';';

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateChannel {
        name: String,
        schema: String,
    },
    Publish {
        name: String,
        schema: String,
        payload: String,
    },
}

impl Command {
    /// Name of the channel the command targets.
    pub fn channel(&self) -> &str {
        match self {
            Command::CreateChannel { name, .. } | Command::Publish { name, .. } => name,
        }
    }
}

/// Parse one request line.
///
/// Fields beyond the ones an opcode needs are ignored.
///
/// # Errors
///
/// * [`BridgeError::TooFewFields`]`(3)` when the line has fewer than three
///   fields, whatever the opcode.
/// * [`BridgeError::TooFewFields`]`(4)` for a publish without a payload.
/// * [`BridgeError::UnknownOpcode`] for any opcode other than `0` or `1`.
pub fn decode_frame(frame: &str) -> Result<Command, BridgeError> {
    let fields: Vec<&str> = frame.split(FIELD_SEPARATOR).collect();
    if fields.len() < 3 {
        return Err(BridgeError::TooFewFields(3));
    }

    match fields[0] {
        OP_CREATE_CHANNEL => Ok(Command::CreateChannel {
            name: fields[1].to_string(),
            schema: fields[2].to_string(),
        }),
        OP_PUBLISH => {
            if fields.len() < 4 {
                return Err(BridgeError::TooFewFields(4));
            }
            Ok(Command::Publish {
                name: fields[1].to_string(),
                schema: fields[2].to_string(),
                payload: fields[3].to_string(),
            })
        }
        other => Err(BridgeError::UnknownOpcode(other.to_string())),
    }
}

/// Render a command as a request line (without the line terminator).
pub fn encode_command(command: &Command) -> String {
    match command {
        Command::CreateChannel { name, schema } => {
            format!("{OP_CREATE_CHANNEL};{name};{schema}")
        }
        Command::Publish {
            name,
            schema,
            payload,
        } => format!("{OP_PUBLISH};{name};{schema};{payload}"),
    }
}

/// Render a reply as `"<code>;<message>"` (without the line terminator).
///
/// Line breaks inside the message are flattened to spaces so a reply always
/// occupies exactly one line on the wire.
pub fn encode_reply(reply: &Reply) -> String {
    reply.to_string().replace(['\r', '\n'], " ")
}

/// Line codec for the socket: decodes request lines, encodes [`Reply`]s.
///
/// Wraps [`LinesCodec`], so `\r\n` endings are accepted and a line longer
/// than the configured maximum is an error.
#[derive(Debug, Clone)]
pub struct ProtocolCodec {
    lines: LinesCodec,
    max_frame_len: usize,
}

impl ProtocolCodec {
    /// Create a codec that accepts lines up to [`DEFAULT_MAX_FRAME_LEN`].
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_len),
            max_frame_len,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    fn map_err(&self, err: LinesCodecError) -> BridgeError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame exceeds {} bytes", self.max_frame_len),
            )),
            LinesCodecError::Io(e) => BridgeError::Io(e),
        }
    }
}

impl Default for ProtocolCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ProtocolCodec {
    type Item = String;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, BridgeError> {
        self.lines.decode(src).map_err(|e| self.map_err(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, BridgeError> {
        self.lines.decode_eof(src).map_err(|e| self.map_err(e))
    }
}

impl Encoder<Reply> for ProtocolCodec {
    type Error = BridgeError;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> Result<(), BridgeError> {
        self.lines
            .encode(encode_reply(&reply), dst)
            .map_err(|e| self.map_err(e))
    }
}
