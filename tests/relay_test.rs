use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use voice_relay::client::{CommandSender, EventReceiver};
use voice_relay::common::framing::FramingMode;
use voice_relay::server::ClientRegistry;
use voice_relay::{Event, RelayClient, RelayConfig, RelayServer};

const WAIT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestRelay {
    async fn start(framing: FramingMode) -> Self {
        let mut config = RelayConfig::default();
        config.relay.framing = framing;
        Self::start_with(config).await
    }

    async fn start_with(mut config: RelayConfig) -> Self {
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;

        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            registry,
            shutdown: Some(tx),
            task,
        }
    }

    async fn connect(&self) -> (EventReceiver, CommandSender) {
        let expected = self.registry.len().await + 1;
        let client = RelayClient::connect(&self.addr.to_string()).await.unwrap();
        self.wait_for_clients(expected).await;
        client.into_split()
    }

    async fn wait_for_clients(&self, count: usize) {
        let registry = self.registry.clone();
        wait_until(move || {
            let registry = registry.clone();
            async move { registry.len().await == count }
        })
        .await;
    }

    async fn wait_for_identity(&self, identity: &str) {
        let registry = self.registry.clone();
        let identity = identity.to_string();
        wait_until(move || {
            let registry = registry.clone();
            let identity = identity.clone();
            async move { registry.lookup_by_identity(&identity).await.is_some() }
        })
        .await;
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next(events: &mut EventReceiver) -> Event {
    events.next_event_timeout(WAIT).await.unwrap().unwrap()
}

fn lang(identity: &str, language: &str) -> Event {
    Event::LangBroadcast {
        identity: identity.to_string(),
        language: language.to_string(),
    }
}

#[tokio::test]
async fn test_voice_is_tagged_for_translation() {
    let relay = TestRelay::start(FramingMode::Line).await;
    let (_p1_events, mut p1) = relay.connect().await;
    let (mut p2_events, mut p2) = relay.connect().await;

    p1.send_raw("REGISTER:p1|English").await.unwrap();
    relay.wait_for_identity("p1").await;
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));

    p2.send_raw("REGISTER:p2|French").await.unwrap();
    // Catch-up snapshot for the newcomer
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));
    relay.wait_for_identity("p2").await;

    p1.send_raw("VOICE:p1|English|hello").await.unwrap();
    assert_eq!(
        next(&mut p2_events).await,
        Event::Translate {
            from_identity: "p1".to_string(),
            from_language: "English".to_string(),
            to_language: Some("French".to_string()),
            text: "hello".to_string(),
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_registration_announces_and_catches_up() {
    let relay = TestRelay::start(FramingMode::Line).await;
    let (mut a_events, mut a) = relay.connect().await;
    let (mut b_events, mut b) = relay.connect().await;

    a.register("alice", "English (US)").await.unwrap();
    relay.wait_for_identity("alice").await;
    assert_eq!(next(&mut b_events).await, lang("alice", "English (US)"));

    b.register("bob", "German").await.unwrap();
    relay.wait_for_identity("bob").await;
    assert_eq!(next(&mut a_events).await, lang("bob", "German"));
    assert_eq!(next(&mut b_events).await, lang("alice", "English (US)"));

    let (mut c_events, mut c) = relay.connect().await;
    c.register("carol", "english").await.unwrap();

    assert_eq!(next(&mut a_events).await, lang("carol", "english"));
    assert_eq!(next(&mut b_events).await, lang("carol", "english"));
    assert_eq!(next(&mut c_events).await, lang("alice", "English (US)"));
    assert_eq!(next(&mut c_events).await, lang("bob", "German"));

    // Same base language is delivered directly, the other is tagged
    c.voice("carol", "english", "hi | all").await.unwrap();
    assert_eq!(
        next(&mut a_events).await,
        Event::Direct {
            from_identity: "carol".to_string(),
            from_language: "english".to_string(),
            text: "hi | all".to_string(),
        }
    );
    assert_eq!(
        next(&mut b_events).await,
        Event::Translate {
            from_identity: "carol".to_string(),
            from_language: "english".to_string(),
            to_language: Some("German".to_string()),
            text: "hi | all".to_string(),
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_lang_for_another_identity_is_ignored() {
    let relay = TestRelay::start(FramingMode::Line).await;
    let (_p1_events, mut p1) = relay.connect().await;
    let (mut p2_events, mut p2) = relay.connect().await;

    p1.register("p1", "English").await.unwrap();
    relay.wait_for_identity("p1").await;
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));
    p2.register("p2", "French").await.unwrap();
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));
    relay.wait_for_identity("p2").await;

    p1.send_raw("LANG:p2|Spanish").await.unwrap();
    // A legitimate update right behind it proves the first one was skipped
    p1.set_language("p1", "Italian").await.unwrap();
    assert_eq!(next(&mut p2_events).await, lang("p1", "Italian"));

    relay.stop().await;
}

#[tokio::test]
async fn test_disconnect_purges_client() {
    let relay = TestRelay::start(FramingMode::Line).await;
    let (_p1_events, mut p1) = relay.connect().await;
    let (mut p2_events, p2) = relay.connect().await;

    p1.register("p1", "English").await.unwrap();
    relay.wait_for_identity("p1").await;
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));

    p2.close().await.unwrap();
    drop(p2_events);
    relay.wait_for_clients(1).await;

    p1.voice("p1", "English", "anyone?").await.unwrap();
    p1.voice("p1", "English", "still here").await.unwrap();
    relay.wait_for_clients(1).await;
    assert!(relay.registry.lookup_by_identity("p1").await.is_some());

    relay.stop().await;
}

#[tokio::test]
async fn test_chunk_framing_reads_one_message_per_write() {
    let relay = TestRelay::start(FramingMode::Chunk).await;
    let (_p1_events, mut p1) = relay.connect().await;
    let (mut p2_events, _p2) = relay.connect().await;

    p1.register("p1", "English").await.unwrap();
    assert_eq!(next(&mut p2_events).await, lang("p1", "English"));

    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let relay = TestRelay::start(FramingMode::Line).await;
    let (mut events, _commands) = relay.connect().await;
    let registry = relay.registry.clone();

    relay.stop().await;

    assert!(registry.is_empty().await);
    let closed = events.next_event_timeout(WAIT).await.unwrap();
    assert_eq!(closed, None);
}

#[tokio::test]
async fn test_default_config_accepts_unterminated_messages() {
    let relay = TestRelay::start_with(RelayConfig::default()).await;

    let mut p1 = TcpStream::connect(relay.addr).await.unwrap();
    relay.wait_for_clients(1).await;
    let p2 = TcpStream::connect(relay.addr).await.unwrap();
    relay.wait_for_clients(2).await;
    let mut p2_lines = BufReader::new(p2).lines();

    p1.write_all(b"REGISTER:p1|English").await.unwrap();
    relay.wait_for_identity("p1").await;
    let line = timeout(WAIT, p2_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("LANG_UPDATE:p1|English"));

    p1.write_all(b"VOICE:p1|English|hello").await.unwrap();
    let line = timeout(WAIT, p2_lines.next_line()).await.unwrap().unwrap();
    assert_eq!(line.as_deref(), Some("TRANSLATE:p1|English||hello"));

    relay.stop().await;
}

#[tokio::test]
async fn test_connection_limit_drops_extra_clients() {
    let mut config = RelayConfig::default();
    config.server.max_connections = 1;
    let relay = TestRelay::start_with(config).await;
    let (_first_events, mut first) = relay.connect().await;

    let mut second = TcpStream::connect(relay.addr).await.unwrap();
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, second.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
    assert_eq!(relay.registry.len().await, 1);

    first.register("p1", "English").await.unwrap();
    relay.wait_for_identity("p1").await;
    assert_eq!(relay.registry.len().await, 1);

    relay.stop().await;
}
