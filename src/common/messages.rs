//! # Message Protocol
//!
//! Defines the text protocol spoken between relay clients and the server:
//! - Inbound [`Command`]s parsed from client messages
//! - Outbound [`Event`]s serialized for delivery to recipients
//!
//! ## Wire Format
//!
//! ```text
//! in   REGISTER:<id>|<lang>
//! in   LANG:<id>|<lang>
//! in   VOICE:<id>|<lang>|<text>
//! in   <id>|<text>
//! out  TRANSLATE:<id>|<fromLang>|<toLang>|<text>
//! out  DIRECT:<id>|<fromLang>|<text>
//! out  LANG_UPDATE:<id>|<lang>
//! ```
//!
//! Transcript text is always the last field, so it may itself contain `|`.

use std::fmt;

use super::error::ProtocolError;

const REGISTER_PREFIX: &str = "REGISTER:";
const LANG_PREFIX: &str = "LANG:";
const VOICE_PREFIX: &str = "VOICE:";

const TRANSLATE_PREFIX: &str = "TRANSLATE:";
const DIRECT_PREFIX: &str = "DIRECT:";
const LANG_UPDATE_PREFIX: &str = "LANG_UPDATE:";

// ============================================================================
// INBOUND COMMANDS
// ============================================================================

/// A message received from a client, parsed into its typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// **Register**
    ///
    /// Binds `identity` and `language` to the issuing connection.
    Register { identity: String, language: String },

    /// **Language Update**
    ///
    /// Changes the language of `identity`. Only honoured when `identity` is the
    /// one already bound to the issuing connection.
    LangUpdate { identity: String, language: String },

    /// **Voice Transcript**
    ///
    /// Transcript text with the sender's language at the time of speaking.
    Voice {
        sender_identity: String,
        sender_language: String,
        text: String,
    },

    /// **Legacy Transcript**
    ///
    /// Transcript without a language; the sender's stored language is used.
    LegacyVoice { sender_identity: String, text: String },

    /// Anything that could not be parsed. Dropped by the router.
    Malformed(ProtocolError),
}

impl Command {
    /// Decode raw message bytes into a command.
    ///
    /// Never fails: bytes that are not valid UTF-8 or do not match the grammar
    /// become [`Command::Malformed`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text).unwrap_or_else(Command::Malformed),
            Err(_) => Command::Malformed(ProtocolError::InvalidUtf8),
        }
    }

    /// Parse one message of text.
    ///
    /// # Returns
    /// - `Ok(Command)`: the message matched one of the four message kinds
    /// - `Err(ProtocolError)`: the reason it did not
    ///
    /// # Example
    /// ```ignore
    /// let cmd = Command::parse("VOICE:p1|English|a | b")?;
    /// assert_eq!(cmd, Command::Voice {
    ///     sender_identity: "p1".into(),
    ///     sender_language: "English".into(),
    ///     text: "a | b".into(),
    /// });
    /// ```
    pub fn parse(message: &str) -> Result<Self, ProtocolError> {
        // Only the terminator goes; trailing whitespace belongs to the text
        let message = message.trim_start().trim_end_matches(['\r', '\n']);
        if message.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        if let Some(rest) = message.strip_prefix(REGISTER_PREFIX) {
            let (identity, language) = identity_and_language("REGISTER", rest)?;
            return Ok(Command::Register { identity, language });
        }

        if let Some(rest) = message.strip_prefix(LANG_PREFIX) {
            let (identity, language) = identity_and_language("LANG", rest)?;
            return Ok(Command::LangUpdate { identity, language });
        }

        if let Some(rest) = message.strip_prefix(VOICE_PREFIX) {
            // At most three fields: the transcript keeps any further `|`
            let mut fields = rest.splitn(3, '|');
            let identity = non_empty_identity("VOICE", fields.next())?;
            let language = fields
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .ok_or(ProtocolError::MissingField {
                    kind: "VOICE",
                    field: "language",
                })?;
            let text = fields.next().ok_or(ProtocolError::MissingField {
                kind: "VOICE",
                field: "text",
            })?;
            return Ok(Command::Voice {
                sender_identity: identity,
                sender_language: language.to_string(),
                text: text.to_string(),
            });
        }

        match message.split_once('|') {
            Some((identity, text)) => Ok(Command::LegacyVoice {
                sender_identity: non_empty_identity("legacy", Some(identity))?,
                text: text.to_string(),
            }),
            None => Err(ProtocolError::Unrecognized),
        }
    }

    /// Serialize the command back to its wire form (without terminator).
    ///
    /// Returns `None` for [`Command::Malformed`], which has no wire form.
    pub fn encode(&self) -> Option<String> {
        match self {
            Command::Register { identity, language } => {
                Some(format!("{}{}|{}", REGISTER_PREFIX, identity, language))
            }
            Command::LangUpdate { identity, language } => {
                Some(format!("{}{}|{}", LANG_PREFIX, identity, language))
            }
            Command::Voice {
                sender_identity,
                sender_language,
                text,
            } => Some(format!(
                "{}{}|{}|{}",
                VOICE_PREFIX, sender_identity, sender_language, text
            )),
            Command::LegacyVoice {
                sender_identity,
                text,
            } => Some(format!("{}|{}", sender_identity, text)),
            Command::Malformed(_) => None,
        }
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Register { .. } => "REGISTER",
            Command::LangUpdate { .. } => "LANG",
            Command::Voice { .. } => "VOICE",
            Command::LegacyVoice { .. } => "LEGACY",
            Command::Malformed(_) => "MALFORMED",
        }
    }
}

fn identity_and_language(
    kind: &'static str,
    rest: &str,
) -> Result<(String, String), ProtocolError> {
    let (identity, language) = rest.split_once('|').ok_or(ProtocolError::MissingField {
        kind,
        field: "language",
    })?;
    let identity = non_empty_identity(kind, Some(identity))?;
    let language = language.trim();
    if language.is_empty() {
        return Err(ProtocolError::MissingField {
            kind,
            field: "language",
        });
    }
    Ok((identity, language.to_string()))
}

fn non_empty_identity(kind: &'static str, field: Option<&str>) -> Result<String, ProtocolError> {
    let identity = field.map(str::trim).unwrap_or_default();
    if identity.is_empty() {
        return Err(ProtocolError::EmptyIdentity { kind });
    }
    Ok(identity.to_string())
}

// ============================================================================
// OUTBOUND EVENTS
// ============================================================================

/// A message produced by the router for delivery to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transcript the recipient cannot consume as-is.
    ///
    /// `to_language` is `None` when the recipient has not told us its
    /// language; it is sent as an empty field.
    Translate {
        from_identity: String,
        from_language: String,
        to_language: Option<String>,
        text: String,
    },

    /// Transcript already in a language the recipient speaks.
    Direct {
        from_identity: String,
        from_language: String,
        text: String,
    },

    /// A participant's current language.
    LangBroadcast { identity: String, language: String },
}

impl Event {
    /// Serialize the event for the wire: its line form plus a `\n` terminator.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut line = self.to_string();
        line.push('\n');
        line.into_bytes()
    }

    /// Parse an event from one line of server output.
    ///
    /// This is the receiving side of [`Event::to_bytes`]; the trailing
    /// terminator is ignored.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        if let Some(rest) = line.strip_prefix(TRANSLATE_PREFIX) {
            let mut fields = rest.splitn(4, '|');
            let from_identity = non_empty_identity("TRANSLATE", fields.next())?;
            let from_language = required("TRANSLATE", "fromLanguage", fields.next())?;
            let to_language = required("TRANSLATE", "toLanguage", fields.next())?;
            let text = required("TRANSLATE", "text", fields.next())?;
            return Ok(Event::Translate {
                from_identity,
                from_language,
                to_language: Some(to_language).filter(|l| !l.is_empty()),
                text,
            });
        }

        if let Some(rest) = line.strip_prefix(DIRECT_PREFIX) {
            let mut fields = rest.splitn(3, '|');
            let from_identity = non_empty_identity("DIRECT", fields.next())?;
            let from_language = required("DIRECT", "fromLanguage", fields.next())?;
            let text = required("DIRECT", "text", fields.next())?;
            return Ok(Event::Direct {
                from_identity,
                from_language,
                text,
            });
        }

        if let Some(rest) = line.strip_prefix(LANG_UPDATE_PREFIX) {
            let mut fields = rest.splitn(2, '|');
            let identity = non_empty_identity("LANG_UPDATE", fields.next())?;
            let language = required("LANG_UPDATE", "language", fields.next())?;
            return Ok(Event::LangBroadcast { identity, language });
        }

        Err(ProtocolError::Unrecognized)
    }
}

fn required(
    kind: &'static str,
    field: &'static str,
    value: Option<&str>,
) -> Result<String, ProtocolError> {
    value
        .map(str::to_string)
        .ok_or(ProtocolError::MissingField { kind, field })
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Translate {
                from_identity,
                from_language,
                to_language,
                text,
            } => write!(
                f,
                "{}{}|{}|{}|{}",
                TRANSLATE_PREFIX,
                from_identity,
                from_language,
                to_language.as_deref().unwrap_or(""),
                text
            ),
            Event::Direct {
                from_identity,
                from_language,
                text,
            } => write!(
                f,
                "{}{}|{}|{}",
                DIRECT_PREFIX, from_identity, from_language, text
            ),
            Event::LangBroadcast { identity, language } => {
                write!(f, "{}{}|{}", LANG_UPDATE_PREFIX, identity, language)
            }
        }
    }
}
