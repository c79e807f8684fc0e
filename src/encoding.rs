//! Text/bytes boundary for session output.
//!
//! The canonical in-memory text is `String`. Raw bytes written by executed
//! code are turned into text exactly once, by [`Utf8StreamDecoder`]; text that
//! is already a `String` is never decoded again. Narrow charsets are only
//! reached on request ([`encode`] / [`decode`]) and degrade to a replacement
//! instead of failing.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Substituted for bytes that are not valid in the source encoding.
pub const REPLACEMENT_CHAR: char = char::REPLACEMENT_CHARACTER;

/// Substituted for code points a narrow charset cannot represent.
pub const NARROW_REPLACEMENT: u8 = b'?';

/// Character sets understood by the `encode` / `decode` builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin-1",
            Self::Ascii => "ascii",
        }
    }

    /// Highest code point the charset encodes as a single byte, if narrow.
    const fn narrow_limit(self) -> Option<u32> {
        match self {
            Self::Utf8 => None,
            Self::Latin1 => Some(0xFF),
            Self::Ascii => Some(0x7F),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when a charset name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown encoding: {0}")]
pub struct UnknownCharset(pub String);

impl FromStr for Charset {
    type Err = UnknownCharset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Ok(Self::Latin1),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            _ => Err(UnknownCharset(s.to_string())),
        }
    }
}

/// Encode text, replacing code points the charset cannot hold with `?`.
pub fn encode(text: &str, charset: Charset) -> Vec<u8> {
    let Some(limit) = charset.narrow_limit() else {
        return text.as_bytes().to_vec();
    };
    text.chars()
        .map(|c| {
            let cp = u32::from(c);
            if cp <= limit {
                // cp <= 0xFF here, so the narrowing is lossless
                u8::try_from(cp).unwrap_or(NARROW_REPLACEMENT)
            } else {
                NARROW_REPLACEMENT
            }
        })
        .collect()
}

/// Decode bytes, substituting U+FFFD for anything invalid in the charset.
pub fn decode(bytes: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        Charset::Ascii => bytes
            .iter()
            .map(|&b| if b.is_ascii() { char::from(b) } else { REPLACEMENT_CHAR })
            .collect(),
    }
}

/// Incremental UTF-8 decoder for raw output streams.
///
/// A multi-byte sequence split across chunks is held back until the rest
/// arrives; bytes that can never start or continue a valid sequence become
/// U+FFFD immediately.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a partial sequence is waiting for more bytes.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Feed a chunk of bytes and return whatever text is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(REPLACEMENT_CHAR);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let keep = rest.len();
        let start = self.pending.len() - keep;
        self.pending.drain(..start);
        out
    }

    /// Flush a dangling partial sequence as U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
