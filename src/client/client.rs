//! # Relay Client
//!
//! Minimal client for the relay's text protocol. It is used by the `client`
//! binary for manual testing and by the integration tests.
//!
//! The client is split in two halves so one task can send while another
//! waits for events:
//!
//! ```rust,ignore
//! let client = RelayClient::connect("127.0.0.1:5500").await?;
//! let (mut events, mut commands) = client.into_split();
//! commands.register("p1", "English").await?;
//! while let Some(event) = events.next_event().await? {
//!     println!("{}", event);
//! }
//! ```

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::debug;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::common::messages::{Command, Event};

/// Receiving half: events pushed by the relay.
pub struct EventReceiver {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl EventReceiver {
    /// Wait for the next event.
    ///
    /// # Returns
    /// - `Ok(Some(Event))`: one event line was received
    /// - `Ok(None)`: the relay closed the connection
    /// - `Err`: I/O error or a line that is not a known event
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            let line = match self.lines.next_line().await? {
                Some(line) => line,
                None => return Ok(None),
            };
            if line.trim().is_empty() {
                continue;
            }
            let event = Event::parse(&line).map_err(|e| anyhow!("bad event `{}`: {}", line, e))?;
            return Ok(Some(event));
        }
    }

    /// Like [`EventReceiver::next_event`], but gives up after `limit`.
    pub async fn next_event_timeout(&mut self, limit: Duration) -> Result<Option<Event>> {
        match tokio::time::timeout(limit, self.next_event()).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("no event within {:?}", limit)),
        }
    }
}

/// Sending half: commands to the relay.
pub struct CommandSender {
    writer: OwnedWriteHalf,
}

impl CommandSender {
    /// Send one raw message line; a `\n` terminator is added.
    pub async fn send_raw(&mut self, message: &str) -> Result<()> {
        debug!("➡️  {}", message);
        let line = format!("{}\n", message);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let line = command
            .encode()
            .ok_or_else(|| anyhow!("malformed commands cannot be sent"))?;
        self.send_raw(&line).await
    }

    pub async fn register(&mut self, identity: &str, language: &str) -> Result<()> {
        self.send(&Command::Register {
            identity: identity.to_string(),
            language: language.to_string(),
        })
        .await
    }

    pub async fn set_language(&mut self, identity: &str, language: &str) -> Result<()> {
        self.send(&Command::LangUpdate {
            identity: identity.to_string(),
            language: language.to_string(),
        })
        .await
    }

    pub async fn voice(&mut self, identity: &str, language: &str, text: &str) -> Result<()> {
        self.send(&Command::Voice {
            sender_identity: identity.to_string(),
            sender_language: language.to_string(),
            text: text.to_string(),
        })
        .await
    }

    /// Close the write side; the relay sees a clean disconnect.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A connected relay client.
pub struct RelayClient {
    pub events: EventReceiver,
    pub commands: CommandSender,
}

impl RelayClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            events: EventReceiver {
                lines: BufReader::new(reader).lines(),
            },
            commands: CommandSender { writer },
        })
    }

    pub fn into_split(self) -> (EventReceiver, CommandSender) {
        (self.events, self.commands)
    }
}
