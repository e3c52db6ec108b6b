//! Control-channel messages.
//!
//! Every payload on channel 0 starts with an opcode byte. Multi-byte
//! integers are little-endian. Decoding validates the body length per
//! opcode before anything is dispatched; a malformed message is an error
//! for that message only.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

pub mod opcode {
    pub const OPEN: u8 = 1;
    pub const CLOSE: u8 = 2;
    pub const SET: u8 = 3;
    pub const WALL: u8 = 4;
    pub const RESPAWN: u8 = 5;
    pub const AVATAR: u8 = 6;
    pub const LISTEN: u8 = 7;
    pub const MOUSE: u8 = 8;

    pub fn name(op: u8) -> &'static str {
        match op {
            OPEN => "OPEN",
            CLOSE => "CLOSE",
            SET => "SET",
            WALL => "WALL",
            RESPAWN => "RESPAWN",
            AVATAR => "AVATAR",
            LISTEN => "LISTEN",
            MOUSE => "MOUSE",
            _ => "UNKNOWN",
        }
    }
}

/// Why a control message was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("{} body must be {expected} bytes, got {got}", opcode::name(*.opcode))]
    BadLength {
        opcode: u8,
        expected: &'static str,
        got: usize,
    },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("metadata kind {kind} value must be {expected} bytes, got {got}")]
    BadMetadata {
        kind: u16,
        expected: &'static str,
        got: usize,
    },
}

/// SET metadata kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Transiency,
    Title,
    WindowType,
    Icon,
    Other(u16),
}

impl MetadataKind {
    pub fn code(self) -> u16 {
        match self {
            MetadataKind::Transiency => 1,
            MetadataKind::Title => 2,
            MetadataKind::WindowType => 3,
            MetadataKind::Icon => 4,
            MetadataKind::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MetadataKind::Transiency,
            2 => MetadataKind::Title,
            3 => MetadataKind::WindowType,
            4 => MetadataKind::Icon,
            other => MetadataKind::Other(other),
        }
    }
}

/// EWMH window types, carried as a single letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Toolbar,
    Combo,
    Dialog,
    Menu,
    Notification,
    PopupMenu,
    DropdownMenu,
    Splash,
    Tooltip,
    Utility,
    Normal,
    /// A letter this side does not know.
    Unknown(u8),
}

impl WindowType {
    pub fn letter(self) -> u8 {
        match self {
            WindowType::Toolbar => b'B',
            WindowType::Combo => b'C',
            WindowType::Dialog => b'D',
            WindowType::Menu => b'M',
            WindowType::Notification => b'N',
            WindowType::PopupMenu => b'P',
            WindowType::DropdownMenu => b'R',
            WindowType::Splash => b'S',
            WindowType::Tooltip => b'T',
            WindowType::Utility => b'U',
            WindowType::Normal => b'X',
            WindowType::Unknown(letter) => letter,
        }
    }

    pub fn from_letter(letter: u8) -> Self {
        match letter {
            b'B' => WindowType::Toolbar,
            b'C' => WindowType::Combo,
            b'D' => WindowType::Dialog,
            b'M' => WindowType::Menu,
            b'N' => WindowType::Notification,
            b'P' => WindowType::PopupMenu,
            b'R' => WindowType::DropdownMenu,
            b'S' => WindowType::Splash,
            b'T' => WindowType::Tooltip,
            b'U' => WindowType::Utility,
            b'X' => WindowType::Normal,
            other => WindowType::Unknown(other),
        }
    }

    /// Map an `_NET_WM_WINDOW_TYPE_*` atom name (with or without prefix).
    pub fn from_ewmh(name: &str) -> Option<Self> {
        let short = name.strip_prefix("_NET_WM_WINDOW_TYPE_").unwrap_or(name);
        let kind = match short.to_ascii_uppercase().as_str() {
            "TOOLBAR" => WindowType::Toolbar,
            "COMBO" => WindowType::Combo,
            "DIALOG" => WindowType::Dialog,
            "MENU" => WindowType::Menu,
            "NOTIFICATION" => WindowType::Notification,
            "POPUP_MENU" => WindowType::PopupMenu,
            "DROPDOWN_MENU" => WindowType::DropdownMenu,
            "SPLASH" => WindowType::Splash,
            "TOOLTIP" => WindowType::Tooltip,
            "UTILITY" => WindowType::Utility,
            "NORMAL" => WindowType::Normal,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::str::FromStr for WindowType {
    type Err = String;

    /// Accepts an EWMH name (`dialog`, `_NET_WM_WINDOW_TYPE_DIALOG`) or the
    /// wire letter (`D`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(kind) = Self::from_ewmh(s) {
            return Ok(kind);
        }
        match s.as_bytes() {
            [letter] if letter.is_ascii_uppercase() => Ok(Self::from_letter(*letter)),
            _ => Err(format!("unknown window type '{s}'")),
        }
    }
}

/// One piece of window metadata carried by SET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    /// Channel id of the window this one is transient for; 0 clears it.
    Transiency(u16),
    Title(String),
    WindowType(WindowType),
    /// Encoded image bytes, passed through untouched.
    Icon(Bytes),
    Other { kind: u16, value: Bytes },
}

impl Metadata {
    pub fn kind(&self) -> MetadataKind {
        match self {
            Metadata::Transiency(_) => MetadataKind::Transiency,
            Metadata::Title(_) => MetadataKind::Title,
            Metadata::WindowType(_) => MetadataKind::WindowType,
            Metadata::Icon(_) => MetadataKind::Icon,
            Metadata::Other { kind, .. } => MetadataKind::Other(*kind),
        }
    }

    pub fn decode(kind: u16, value: Bytes) -> Result<Self, ControlError> {
        match MetadataKind::from_code(kind) {
            MetadataKind::Transiency => match value.as_ref() {
                [lo, hi] => Ok(Metadata::Transiency(u16::from_le_bytes([*lo, *hi]))),
                _ => Err(ControlError::BadMetadata {
                    kind,
                    expected: "2",
                    got: value.len(),
                }),
            },
            MetadataKind::Title => {
                let text = std::str::from_utf8(&value)
                    .map_err(|_| ControlError::InvalidUtf8("title"))?;
                Ok(Metadata::Title(strip_nul(text).to_string()))
            }
            MetadataKind::WindowType => match value.as_ref() {
                [letter] => Ok(Metadata::WindowType(WindowType::from_letter(*letter))),
                _ => Err(ControlError::BadMetadata {
                    kind,
                    expected: "1",
                    got: value.len(),
                }),
            },
            MetadataKind::Icon => Ok(Metadata::Icon(value)),
            MetadataKind::Other(kind) => Ok(Metadata::Other { kind, value }),
        }
    }

    fn put_value(&self, dst: &mut BytesMut) {
        match self {
            Metadata::Transiency(parent) => dst.put_u16_le(*parent),
            Metadata::Title(title) => dst.put_slice(title.as_bytes()),
            Metadata::WindowType(kind) => dst.put_u8(kind.letter()),
            Metadata::Icon(image) => dst.put_slice(image),
            Metadata::Other { value, .. } => dst.put_slice(value),
        }
    }
}

/// A decoded control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Open { channel: u16 },
    Close { channel: u16 },
    Set { channel: u16, metadata: Metadata },
    Wall { code: u16, text: String },
    Respawn { token: u32 },
    Avatar { image: Bytes },
    Listen { video: u16, audio: u16 },
    /// `None` hides the remote pointer.
    Mouse { position: Option<(u16, u16)> },
}

impl ControlMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ControlMessage::Open { .. } => opcode::OPEN,
            ControlMessage::Close { .. } => opcode::CLOSE,
            ControlMessage::Set { .. } => opcode::SET,
            ControlMessage::Wall { .. } => opcode::WALL,
            ControlMessage::Respawn { .. } => opcode::RESPAWN,
            ControlMessage::Avatar { .. } => opcode::AVATAR,
            ControlMessage::Listen { .. } => opcode::LISTEN,
            ControlMessage::Mouse { .. } => opcode::MOUSE,
        }
    }

    /// Decode a channel-0 payload. An empty payload is valid and yields `None`.
    pub fn decode(payload: &Bytes) -> Result<Option<Self>, ControlError> {
        let Some((&op, _)) = payload.split_first() else {
            return Ok(None);
        };
        let body = payload.slice(1..);

        let message = match op {
            opcode::OPEN => ControlMessage::Open {
                channel: exact_u16(op, &body)?,
            },
            opcode::CLOSE => ControlMessage::Close {
                channel: exact_u16(op, &body)?,
            },
            opcode::SET => {
                if body.len() < 4 {
                    return Err(bad_length(op, "at least 4", body.len()));
                }
                let kind = u16::from_le_bytes([body[0], body[1]]);
                let channel = u16::from_le_bytes([body[2], body[3]]);
                ControlMessage::Set {
                    channel,
                    metadata: Metadata::decode(kind, body.slice(4..))?,
                }
            }
            opcode::WALL => {
                if body.len() < 2 {
                    return Err(bad_length(op, "at least 2", body.len()));
                }
                let code = u16::from_le_bytes([body[0], body[1]]);
                let text = std::str::from_utf8(&body[2..])
                    .map_err(|_| ControlError::InvalidUtf8("wall text"))?;
                ControlMessage::Wall {
                    code,
                    text: strip_nul(text).to_string(),
                }
            }
            opcode::RESPAWN => match body.as_ref() {
                [a, b, c, d] => ControlMessage::Respawn {
                    token: u32::from_le_bytes([*a, *b, *c, *d]),
                },
                _ => return Err(bad_length(op, "4", body.len())),
            },
            opcode::AVATAR => ControlMessage::Avatar { image: body },
            opcode::LISTEN => match body.as_ref() {
                [v0, v1, a0, a1] => ControlMessage::Listen {
                    video: u16::from_le_bytes([*v0, *v1]),
                    audio: u16::from_le_bytes([*a0, *a1]),
                },
                _ => return Err(bad_length(op, "4", body.len())),
            },
            opcode::MOUSE => ControlMessage::Mouse {
                position: match body.as_ref() {
                    [x0, x1, y0, y1] => Some((
                        u16::from_le_bytes([*x0, *x1]),
                        u16::from_le_bytes([*y0, *y1]),
                    )),
                    _ => None,
                },
            },
            other => return Err(ControlError::UnknownOpcode(other)),
        };
        Ok(Some(message))
    }

    /// Encode as a channel-0 payload.
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(8);
        dst.put_u8(self.opcode());
        match self {
            ControlMessage::Open { channel } | ControlMessage::Close { channel } => {
                dst.put_u16_le(*channel);
            }
            ControlMessage::Set { channel, metadata } => {
                dst.put_u16_le(metadata.kind().code());
                dst.put_u16_le(*channel);
                metadata.put_value(&mut dst);
            }
            ControlMessage::Wall { code, text } => {
                dst.put_u16_le(*code);
                dst.put_slice(text.as_bytes());
            }
            ControlMessage::Respawn { token } => dst.put_u32_le(*token),
            ControlMessage::Avatar { image } => dst.put_slice(image),
            ControlMessage::Listen { video, audio } => {
                dst.put_u16_le(*video);
                dst.put_u16_le(*audio);
            }
            ControlMessage::Mouse { position } => {
                if let Some((x, y)) = position {
                    dst.put_u16_le(*x);
                    dst.put_u16_le(*y);
                }
            }
        }
        dst.freeze()
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Open { channel } => write!(f, "OPEN({channel})"),
            ControlMessage::Close { channel } => write!(f, "CLOSE({channel})"),
            ControlMessage::Set { channel, metadata } => {
                write!(f, "SET({channel}, {:?})", metadata.kind())
            }
            ControlMessage::Wall { code, .. } => write!(f, "WALL({code})"),
            ControlMessage::Respawn { token } => write!(f, "RESPAWN({token})"),
            ControlMessage::Avatar { image } => write!(f, "AVATAR({} bytes)", image.len()),
            ControlMessage::Listen { video, audio } => write!(f, "LISTEN({video}, {audio})"),
            ControlMessage::Mouse { position: Some((x, y)) } => write!(f, "MOUSE({x}, {y})"),
            ControlMessage::Mouse { position: None } => f.write_str("MOUSE(hidden)"),
        }
    }
}

fn exact_u16(op: u8, body: &[u8]) -> Result<u16, ControlError> {
    match body {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(bad_length(op, "2", body.len())),
    }
}

fn bad_length(opcode: u8, expected: &'static str, got: usize) -> ControlError {
    ControlError::BadLength {
        opcode,
        expected,
        got,
    }
}

fn strip_nul(text: &str) -> &str {
    text.strip_suffix('\0').unwrap_or(text)
}
