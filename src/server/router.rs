//! # Routing Engine
//!
//! Decides, for every inbound command, which connections receive which event.
//!
//! ## Language Matching
//!
//! Languages are compared on their *base token*: the part before the first
//! space, lowercased. `"English (US)"` and `"english"` match; a missing
//! language never matches anything, so the recipient gets a `TRANSLATE`.
//!
//! ## Message Flow
//!
//! ```text
//! REGISTER  -> bind identity, LANG_UPDATE to everyone else,
//!              catch-up LANG_UPDATEs back to the new client
//! LANG      -> (bound identity only) update, LANG_UPDATE to everyone else
//! VOICE     -> store sender language, DIRECT/TRANSLATE to everyone else
//! <id>|text -> (bound identity with known language only) same as VOICE
//! ```
//!
//! A failed write to a recipient purges that recipient and delivery to the
//! remaining recipients carries on.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::common::connection::{Connection, ConnectionId};
use crate::common::error::{ProtocolError, Rejection};
use crate::common::messages::{Command, Event};
use crate::server::registry::{ClientRecord, ClientRegistry};

/// What happened to one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Command applied; `delivered` events were written and the listed
    /// recipients were purged after their write failed.
    Routed {
        delivered: usize,
        purged: Vec<ConnectionId>,
    },
    /// Command was well formed but not allowed for this connection.
    Rejected(Rejection),
    /// Message could not be parsed.
    Dropped(ProtocolError),
}

/// Base language token: text before the first space, lowercased.
pub fn base_language(language: &str) -> String {
    language
        .trim()
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Whether a listener speaking `b` can consume a transcript in `a` as-is.
pub fn languages_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => base_language(a) == base_language(b),
        _ => false,
    }
}

/// Event a recipient with `recipient_language` gets for one transcript.
pub fn transcript_event(
    sender_identity: &str,
    sender_language: &str,
    recipient_language: Option<&str>,
    text: &str,
) -> Event {
    if languages_match(Some(sender_language), recipient_language) {
        Event::Direct {
            from_identity: sender_identity.to_string(),
            from_language: sender_language.to_string(),
            text: text.to_string(),
        }
    } else {
        Event::Translate {
            from_identity: sender_identity.to_string(),
            from_language: sender_language.to_string(),
            to_language: recipient_language.map(str::to_string),
            text: text.to_string(),
        }
    }
}

/// Language-aware router over a shared [`ClientRegistry`].
#[derive(Clone)]
pub struct Router {
    registry: Arc<ClientRegistry>,
}

impl Router {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Apply one command issued by connection `sender` and deliver the
    /// resulting events.
    ///
    /// # Example
    /// ```ignore
    /// let outcome = router
    ///     .dispatch(conn_id, Command::parse("VOICE:p1|English|hello")?)
    ///     .await;
    /// ```
    pub async fn dispatch(&self, sender: ConnectionId, command: Command) -> Dispatch {
        match command {
            Command::Register { identity, language } => {
                self.register(sender, &identity, &language).await
            }
            Command::LangUpdate { identity, language } => {
                self.lang_update(sender, &identity, &language).await
            }
            Command::Voice {
                sender_identity,
                sender_language,
                text,
            } => {
                // The message is authoritative for the sender's current language
                if !self
                    .registry
                    .update_language(sender, &sender_language)
                    .await
                {
                    return Dispatch::Rejected(Rejection::UnknownConnection(sender));
                }
                self.fan_out_transcript(sender, &sender_identity, &sender_language, &text)
                    .await
            }
            Command::LegacyVoice {
                sender_identity,
                text,
            } => self.legacy_voice(sender, &sender_identity, &text).await,
            Command::Malformed(reason) => Dispatch::Dropped(reason),
        }
    }

    async fn register(&self, sender: ConnectionId, identity: &str, language: &str) -> Dispatch {
        if let Err(rejection) = self.registry.bind_identity(sender, identity, language).await {
            return Dispatch::Rejected(rejection);
        }
        info!("📝 Registered '{}' speaking {}", identity, language);

        let snapshot = self.registry.snapshot().await;
        let announcement = Event::LangBroadcast {
            identity: identity.to_string(),
            language: language.to_string(),
        };

        let mut deliveries: Vec<(Arc<Connection>, Event)> = others(&snapshot, sender)
            .map(|r| (r.connection.clone(), announcement.clone()))
            .collect();

        // Catch-up: tell the newcomer about everyone already known
        if let Some(me) = snapshot.iter().find(|r| r.id() == sender) {
            let mut known: Vec<(&str, &str)> = others(&snapshot, sender)
                .filter_map(|r| Some((r.identity.as_deref()?, r.language.as_deref()?)))
                .collect();
            known.sort_unstable();

            deliveries.extend(known.into_iter().map(|(identity, language)| {
                (
                    me.connection.clone(),
                    Event::LangBroadcast {
                        identity: identity.to_string(),
                        language: language.to_string(),
                    },
                )
            }));
        }

        self.deliver(deliveries).await
    }

    async fn lang_update(&self, sender: ConnectionId, identity: &str, language: &str) -> Dispatch {
        let record = match self.registry.get(sender).await {
            Some(record) => record,
            None => return Dispatch::Rejected(Rejection::UnknownConnection(sender)),
        };
        if record.identity.as_deref() != Some(identity) {
            return Dispatch::Rejected(Rejection::IdentityMismatch {
                bound: record.identity,
                claimed: identity.to_string(),
            });
        }

        if !self.registry.update_language(sender, language).await {
            return Dispatch::Rejected(Rejection::UnknownConnection(sender));
        }
        info!("🗣️  '{}' now speaks {}", identity, language);

        let announcement = Event::LangBroadcast {
            identity: identity.to_string(),
            language: language.to_string(),
        };
        let snapshot = self.registry.snapshot().await;
        let deliveries = others(&snapshot, sender)
            .map(|r| (r.connection.clone(), announcement.clone()))
            .collect();

        self.deliver(deliveries).await
    }

    async fn legacy_voice(&self, sender: ConnectionId, identity: &str, text: &str) -> Dispatch {
        let record = match self.registry.get(sender).await {
            Some(record) => record,
            None => return Dispatch::Rejected(Rejection::UnknownConnection(sender)),
        };
        if record.identity.as_deref() != Some(identity) {
            return Dispatch::Rejected(Rejection::IdentityMismatch {
                bound: record.identity,
                claimed: identity.to_string(),
            });
        }
        let language = match record.language {
            Some(language) => language,
            None => {
                return Dispatch::Rejected(Rejection::UnknownLanguage {
                    identity: identity.to_string(),
                })
            }
        };

        self.fan_out_transcript(sender, identity, &language, text)
            .await
    }

    async fn fan_out_transcript(
        &self,
        sender: ConnectionId,
        identity: &str,
        language: &str,
        text: &str,
    ) -> Dispatch {
        let snapshot = self.registry.snapshot().await;
        let deliveries: Vec<(Arc<Connection>, Event)> = others(&snapshot, sender)
            .map(|r| {
                let event = transcript_event(identity, language, r.language.as_deref(), text);
                (r.connection.clone(), event)
            })
            .collect();

        debug!(
            "🎙️  '{}' ({}) -> {} recipient(s)",
            identity,
            language,
            deliveries.len()
        );
        self.deliver(deliveries).await
    }

    /// Write every event in order. A recipient whose write fails is purged and
    /// skipped for the rest of this fan-out.
    async fn deliver(&self, deliveries: Vec<(Arc<Connection>, Event)>) -> Dispatch {
        let mut delivered = 0;
        let mut purged: Vec<ConnectionId> = Vec::new();

        for (connection, event) in deliveries {
            if purged.contains(&connection.id()) {
                continue;
            }
            match connection.send_event(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("💀 Dropping recipient {}: {}", connection.addr(), e);
                    self.purge(&connection).await;
                    purged.push(connection.id());
                }
            }
        }

        Dispatch::Routed { delivered, purged }
    }

    /// Remove a dead recipient from the registry and close it.
    pub async fn purge(&self, connection: &Connection) {
        self.registry.remove(connection.id()).await;
        connection.close().await;
    }
}

/// Every live record in `snapshot` other than `sender`.
fn others(
    snapshot: &[ClientRecord],
    sender: ConnectionId,
) -> impl Iterator<Item = &ClientRecord> {
    snapshot
        .iter()
        .filter(move |r| r.id() != sender && r.is_alive())
}
