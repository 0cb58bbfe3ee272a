//! HTTP relay tests: a real axum listener in front of a supervisor whose
//! IRC server is an in-memory duplex pipe driven by the test.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taxobot::relay::{self, RelayState, TURTLE};
use taxobot_sdk::client::{ClientHandle, ConnectConfig, Connector, Supervisor, Transport};
use taxobot_sdk::irc::Message;
use taxobot_sdk::transcript::Transcript;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Hands out one pre-built transport, then refuses.
struct OneConnection(Option<Transport>);

impl Connector for OneConnection {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<Transport>> + Send + '_>> {
        let transport = self.0.take();
        Box::pin(async move { transport.context("connection refused") })
    }
}

struct NullTranscript;

impl Transcript for NullTranscript {
    fn record(&mut self, _line: &Message) -> Result<()> {
        Ok(())
    }
}

struct FakeServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    async fn expect(&mut self, expected: &str) {
        let mut line = String::new();
        timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timeout waiting for a line from the bot")
            .unwrap();
        assert_eq!(line.trim_end(), expected);
    }

    async fn send(&mut self, raw: &str) {
        self.writer
            .write_all(format!("{raw}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn register(&mut self) {
        self.expect("NICK taxbot").await;
        self.expect("USER sioc * * :Taxonomy bot").await;
        self.send(":irc.example 001 taxbot :Welcome taxbot!sioc@host.example")
            .await;
        self.expect("PING keepalive-1").await;
        self.expect("CAPAB IDENTIFY-MSG").await;
    }

    async fn nickserv(&mut self, text: &str) {
        self.send(&format!(":NickServ!NickServ@services. NOTICE taxbot :{text}"))
            .await;
    }
}

/// Start a supervisor and an HTTP relay. With `server` false, the only
/// connection attempt is refused and the supervisor stops.
async fn start(server: bool, query_timeout: Duration) -> (String, ClientHandle, Option<FakeServer>) {
    let (transport, fake) = if server {
        let (client, server) = tokio::io::duplex(16384);
        let (reader, writer) = tokio::io::split(client);
        let (server_reader, server_writer) = tokio::io::split(server);
        (
            Some(Transport {
                reader: Box::new(BufReader::new(reader)),
                writer: Box::new(writer),
            }),
            Some(FakeServer {
                reader: BufReader::new(server_reader),
                writer: server_writer,
            }),
        )
    } else {
        (None, None)
    };

    let (supervisor, handle, _events) = Supervisor::new(
        ConnectConfig::default(),
        Box::new(OneConnection(transport)),
        Box::new(NullTranscript),
    );
    tokio::spawn(supervisor.run());

    let state = Arc::new(RelayState {
        handle: handle.clone(),
        network: "freenode".to_string(),
        query_timeout,
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, relay::router(state)).await.unwrap();
    });
    (base, handle, fake)
}

#[tokio::test]
async fn lookup_renders_holds_account() {
    let (base, _handle, server) = start(true, TIMEOUT).await;
    let mut server = server.unwrap();
    server.register().await;

    let request = tokio::spawn(reqwest::get(format!("{base}/alice")));
    server.expect("PRIVMSG NickServ :taxonomy alice").await;
    server.nickserv("Taxonomy for \x02alice\x02:").await;
    server.nickserv("+alice homepage :http://example.org/").await;
    server
        .nickserv("+alice webid :http://example.org/alice#me")
        .await;
    server.nickserv("End of \x02alice\x02's taxonomy.").await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], TURTLE);
    assert_eq!(
        response.text().await.unwrap(),
        "<http://example.org/alice#me> <http://xmlns.com/foaf/0.1/holdsAccount> \
         <irc://freenode/alice,isnick> .\n"
    );
}

#[tokio::test]
async fn unregistered_nick_gives_empty_document() {
    let (base, _handle, server) = start(true, TIMEOUT).await;
    let mut server = server.unwrap();
    server.register().await;

    // Percent-encoded path segments are decoded before the lookup.
    let request = tokio::spawn(reqwest::get(format!("{base}/b%6Fb")));
    server.expect("PRIVMSG NickServ :taxonomy bob").await;
    server.nickserv("\x02bob\x02 is not registered.").await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], TURTLE);
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn line_breaking_nick_is_a_bad_request() {
    let (base, _handle, server) = start(true, TIMEOUT).await;
    let mut server = server.unwrap();
    server.register().await;

    let response = reqwest::get(format!("{base}/x%0D%0AQUIT%20:pwned"))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let response = reqwest::get(format!("{base}/alice%20bob")).await.unwrap();
    assert_eq!(response.status(), 400);

    // Nothing reached the wire: the next line is the next real lookup.
    let request = tokio::spawn(reqwest::get(format!("{base}/bob")));
    server.expect("PRIVMSG NickServ :taxonomy bob").await;
    server.nickserv("\x02bob\x02 is not registered.").await;
    assert_eq!(request.await.unwrap().unwrap().status(), 200);
}

#[tokio::test]
async fn nick_is_the_first_path_segment() {
    let (base, _handle, server) = start(true, TIMEOUT).await;
    let mut server = server.unwrap();
    server.register().await;

    let request = tokio::spawn(reqwest::get(format!("{base}/alice/foaf.ttl")));
    server.expect("PRIVMSG NickServ :taxonomy alice").await;
    server.nickserv("Taxonomy for \x02alice\x02:").await;
    server
        .nickserv("+alice webid :http://example.org/alice#me")
        .await;
    server.nickserv("End of \x02alice\x02's taxonomy.").await;

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .text()
        .await
        .unwrap()
        .contains("<irc://freenode/alice,isnick>"));
}

#[tokio::test]
async fn silent_nickserv_times_out() {
    let (base, _handle, server) = start(true, Duration::from_millis(200)).await;
    let mut server = server.unwrap();
    server.register().await;

    let request = tokio::spawn(reqwest::get(format!("{base}/carol")));
    server.expect("PRIVMSG NickServ :taxonomy carol").await;

    let response = timeout(TIMEOUT, request).await.unwrap().unwrap().unwrap();
    assert_eq!(response.status(), 504);
}

#[tokio::test]
async fn no_session_gives_service_unavailable() {
    let (base, handle, _) = start(false, TIMEOUT).await;
    // Wait for the refused first attempt to stop the supervisor.
    timeout(TIMEOUT, async {
        while handle.status().await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let response = reqwest::get(format!("{base}/alice")).await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "");

    let response = reqwest::get(format!("{base}/_status")).await.unwrap();
    assert_eq!(response.status(), 503);

    let response = reqwest::get(format!("{base}/a%0Ab")).await.unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn status_reports_session() {
    let (base, _handle, server) = start(true, TIMEOUT).await;
    let mut server = server.unwrap();
    server.register().await;
    server
        .send(":taxbot!sioc@host.example JOIN #sioc")
        .await;
    server.send("PING :sync").await;
    server.expect("PONG sync").await;

    let response = reqwest::get(format!("{base}/_status")).await.unwrap();
    assert_eq!(response.status(), 200);
    let status: serde_json::Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["registered"], true);
    assert_eq!(status["nick"], "taxbot");
    assert_eq!(status["server"], "irc.example");
    assert_eq!(status["channels"], serde_json::json!(["#sioc"]));
    assert_eq!(status["backlog"], 0);
    assert_eq!(status["pending_lookups"], 0);
}
