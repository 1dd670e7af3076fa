//! Per-client IRC line connection.
//!
//! The receive task answers protocol housekeeping on its own (PING, QUIT,
//! NICK, PASS, CAP) and forwards every other command to the application
//! through a bounded channel. Writes go straight to the socket, serialized
//! by a mutex.

use crate::{
    caps::Capabilities,
    message::{self, Message},
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use wairc_core::{error::WaircError, Signal};

/// Depth of the inbound application-message queue.
const QUEUE_SIZE: usize = 10;

/// Longest accepted line: the IRCv3 tag section plus a 512-byte message.
const MAX_LINE_BYTES: usize = 8191 + 512;

const SERVER_TIME: &str = "server-time";

/// Identity used for status lines sent to the client.
pub const STATUS_NICK: &str = "status";

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

pub struct IrcConnection {
    server_name: String,
    caps: Capabilities,
    writer: Mutex<Writer>,
    nick: RwLock<String>,
    password: RwLock<Option<String>>,
    nick_set: Signal,
    password_set: Signal,
    stop: Signal,
}

impl IrcConnection {
    /// Wrap the two halves of a client socket and start receiving.
    ///
    /// `stop` is the connection's cancellation scope: it fires on decode
    /// failure, EOF, `QUIT` or [`IrcConnection::close`], and firing it from
    /// outside ends the receive task.
    pub fn start<R, W>(
        reader: R,
        writer: W,
        stop: Signal,
        server_name: &str,
    ) -> (Arc<Self>, mpsc::Receiver<Message>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Arc::new(Self {
            server_name: server_name.to_string(),
            caps: Capabilities::new(),
            writer: Mutex::new(Box::new(writer)),
            nick: RwLock::new(String::new()),
            password: RwLock::new(None),
            nick_set: Signal::new(),
            password_set: Signal::new(),
            stop,
        });

        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let receiver = conn.clone();
        tokio::spawn(async move {
            if let Err(e) = receiver.receive_loop(BufReader::new(reader), tx).await {
                debug!("irc receive loop ended: {e}");
            }
            receiver.stop.fire();
        });

        (conn, rx)
    }

    async fn receive_loop<R>(
        &self,
        mut reader: BufReader<R>,
        tx: mpsc::Sender<Message>,
    ) -> Result<(), WaircError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = Vec::new();
        // Set while skipping the rest of an overlong line.
        let mut discarding = false;
        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
            let read = tokio::select! {
                _ = self.stop.fired() => return Ok(()),
                read = limited.read_until(b'\n', &mut buf) => read?,
            };
            if read == 0 {
                return Err(WaircError::Irc("connection closed by client".into()));
            }
            if buf.last() != Some(&b'\n') {
                if !discarding {
                    warn!("dropping irc line longer than {MAX_LINE_BYTES} bytes");
                }
                discarding = true;
                continue;
            }
            if discarding {
                discarding = false;
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let Some(msg) = Message::parse(&line) else {
                debug!("ignoring unparsable irc line");
                continue;
            };

            match msg.command.as_str() {
                "PING" => {
                    let pong = format!(
                        ":{0} PONG {0} :{1}",
                        self.server_name,
                        msg.param(0)
                    );
                    self.write_now(&pong).await?;
                }
                "QUIT" => {
                    info!("received QUIT from {}", self.nick());
                    return Ok(());
                }
                "NICK" => {
                    if !msg.param(0).is_empty() {
                        self.set_nick(msg.param(0));
                    }
                }
                "PASS" => {
                    self.set_password(msg.param(0));
                }
                "CAP" => self.handle_cap(&msg).await?,
                _ => {
                    tokio::select! {
                        _ = self.stop.fired() => return Ok(()),
                        sent = tx.send(msg) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_cap(&self, msg: &Message) -> Result<(), WaircError> {
        self.caps.start_negotiation();
        let server = &self.server_name;
        match msg.param(0).to_ascii_uppercase().as_str() {
            "LS" => {
                let line = format!(
                    ":{server} CAP * LS :{SERVER_TIME} {}",
                    self.replay_capability()
                );
                self.write_now(&line).await
            }
            "LIST" => {
                let line = format!(":{server} CAP * LIST :{}", self.caps.list().join(" "));
                self.write_now(&line).await
            }
            "REQ" => {
                let requested = msg.params.last().map(String::as_str).unwrap_or("").trim();
                let supported = [SERVER_TIME.to_string(), self.replay_capability()];
                let known = |cap: &str| supported.iter().any(|s| s.eq_ignore_ascii_case(cap));

                // All or nothing: one unknown cap rejects the whole request.
                if requested.is_empty() || !requested.split_whitespace().all(known) {
                    debug!("rejecting CAP REQ {requested}");
                    return self
                        .write_now(&format!(":{server} CAP * NAK :{requested}"))
                        .await;
                }
                for cap in requested.split_whitespace() {
                    self.caps.add(cap);
                }
                self.write_now(&format!(":{server} CAP * ACK :{requested}"))
                    .await
            }
            "END" => {
                self.caps.finish_negotiation();
                Ok(())
            }
            other => {
                warn!("unknown CAP subcommand {other}");
                Ok(())
            }
        }
    }

    /// The vendor capability that asks for history replay on connect.
    pub fn replay_capability(&self) -> String {
        format!("{}/replay", self.server_name)
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    /// Send `line`, tagged with `time` once `server-time` was negotiated.
    pub async fn write(&self, time: DateTime<Utc>, line: &str) -> Result<(), WaircError> {
        let mut out = if self.caps.has(SERVER_TIME) {
            format!("@time={} {line}", message::server_time(time))
        } else {
            line.to_string()
        };
        out.push_str("\r\n");

        let mut writer = self.writer.lock().await;
        writer
            .write_all(out.as_bytes())
            .await
            .map_err(|e| WaircError::Irc(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| WaircError::Irc(format!("flush failed: {e}")))
    }

    pub async fn write_now(&self, line: &str) -> Result<(), WaircError> {
        self.write(Utc::now(), line).await
    }

    /// Send lines in order, stopping at the first failure.
    pub async fn write_list_now<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), WaircError> {
        for line in lines {
            self.write_now(line.as_ref()).await?;
        }
        Ok(())
    }

    /// Private message from the `status` pseudo-user to the client.
    pub async fn status(&self, body: &str) -> Result<(), WaircError> {
        let nick = self.nick();
        let now = Utc::now();
        message::log_chat_line(now, STATUS_NICK, &nick, body);
        self.write(now, &message::privmsg(STATUS_NICK, &nick, body))
            .await
    }

    pub fn nick(&self) -> String {
        self.nick.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn password(&self) -> Option<String> {
        self.password
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Fires once, on the first `NICK`.
    pub fn nick_set(&self) -> &Signal {
        &self.nick_set
    }

    /// Fires once, on the first `PASS`.
    pub fn password_set(&self) -> &Signal {
        &self.password_set
    }

    /// Fires when the connection is stopping.
    pub fn stopping(&self) -> &Signal {
        &self.stop
    }

    fn set_nick(&self, nick: &str) {
        *self.nick.write().unwrap_or_else(|e| e.into_inner()) = nick.to_string();
        self.nick_set.fire();
    }

    fn set_password(&self, password: &str) {
        *self.password.write().unwrap_or_else(|e| e.into_inner()) = Some(password.to_string());
        self.password_set.fire();
    }

    /// Stop the connection and shut the socket's write half.
    pub async fn close(&self) {
        self.stop.fire();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("irc socket shutdown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct Client {
        lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> String {
            tokio::time::timeout(Duration::from_secs(1), self.lines.next_line())
                .await
                .expect("timed out waiting for a line")
                .unwrap()
                .expect("stream closed")
        }
    }

    fn setup() -> (Arc<IrcConnection>, mpsc::Receiver<Message>, Client) {
        let (server, client) = duplex(4096);
        let (sr, sw) = split(server);
        let (cr, cw) = split(client);
        let (conn, rx) = IrcConnection::start(sr, sw, Signal::new(), "wairc");
        let client = Client {
            lines: BufReader::new(cr).lines(),
            writer: cw,
        };
        (conn, rx, client)
    }

    #[tokio::test]
    async fn test_ping_answered_not_forwarded() {
        let (_conn, mut rx, mut client) = setup();
        client.send("PING :abc").await;
        assert_eq!(client.recv().await, ":wairc PONG wairc :abc");
        client.send("PRIVMSG #x :hi").await;
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.command, "PRIVMSG", "PING must not reach the application");
    }

    #[tokio::test]
    async fn test_nick_and_pass_signals() {
        let (conn, _rx, mut client) = setup();
        client.send("PASS secret").await;
        client.send("NICK alice").await;
        tokio::time::timeout(Duration::from_secs(1), conn.nick_set().fired())
            .await
            .unwrap();
        assert!(conn.password_set().is_fired());
        assert_eq!(conn.nick(), "alice");
        assert_eq!(conn.password().as_deref(), Some("secret"));

        client.send("NICK bob").await;
        client.send("PING x").await;
        client.recv().await;
        assert_eq!(conn.nick(), "bob", "later NICKs update the stored value");
    }

    #[tokio::test]
    async fn test_cap_flow_and_server_time() {
        let (conn, _rx, mut client) = setup();
        client.send("CAP LS 302").await;
        assert_eq!(client.recv().await, ":wairc CAP * LS :server-time wairc/replay");
        client.send("CAP REQ :server-time wairc/replay").await;
        assert_eq!(client.recv().await, ":wairc CAP * ACK :server-time wairc/replay");
        client.send("CAP LIST").await;
        assert_eq!(client.recv().await, ":wairc CAP * LIST :server-time wairc/replay");
        client.send("CAP END").await;
        client.send("NICK alice").await;
        conn.nick_set().fired().await;

        assert_eq!(
            conn.caps().wait_negotiation(&Signal::new()).await,
            crate::Negotiation::Finished
        );
        let time = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        conn.write(time, ":wairc NOTICE alice :x").await.unwrap();
        assert_eq!(
            client.recv().await,
            "@time=2023-11-14T22:13:20.000Z :wairc NOTICE alice :x"
        );
    }

    #[tokio::test]
    async fn test_cap_req_rejects_unsupported() {
        let (conn, _rx, mut client) = setup();
        client.send("CAP REQ :server-time sasl").await;
        assert_eq!(client.recv().await, ":wairc CAP * NAK :server-time sasl");
        assert!(!conn.caps().has("server-time"), "a NAK grants nothing");

        client.send("CAP REQ :server-time").await;
        assert_eq!(client.recv().await, ":wairc CAP * ACK :server-time");
        client.send("CAP REQ :wairc/replay").await;
        assert_eq!(client.recv().await, ":wairc CAP * ACK :wairc/replay");
        client.send("CAP LIST").await;
        assert_eq!(client.recv().await, ":wairc CAP * LIST :server-time wairc/replay");
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped() {
        let (conn, mut rx, client) = setup();
        let Client { mut lines, mut writer } = client;

        let sender = tokio::spawn(async move {
            let huge = format!("PRIVMSG #x :{}\r\n", "a".repeat(3 * MAX_LINE_BYTES));
            writer.write_all(huge.as_bytes()).await.unwrap();
            writer.write_all(b"PRIVMSG #x :after\r\n").await.unwrap();
            writer
        });

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("connection must keep reading")
            .unwrap();
        assert_eq!(msg.param(1), "after");
        assert!(!conn.stopping().is_fired());

        let mut writer = sender.await.unwrap();
        writer.write_all(b"PING :still\r\n").await.unwrap();
        let pong = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pong.as_deref(), Some(":wairc PONG wairc :still"));
    }

    #[tokio::test]
    async fn test_status_without_server_time() {
        let (conn, _rx, mut client) = setup();
        client.send("NICK alice").await;
        conn.nick_set().fired().await;
        conn.status("hello").await.unwrap();
        assert_eq!(client.recv().await, ":status PRIVMSG alice :hello");
    }

    #[tokio::test]
    async fn test_quit_stops_connection() {
        let (conn, mut rx, mut client) = setup();
        client.send("QUIT :bye").await;
        tokio::time::timeout(Duration::from_secs(1), conn.stopping().fired())
            .await
            .expect("QUIT must stop the connection");
        assert!(rx.recv().await.is_none(), "inbound queue closes on stop");
    }

    #[tokio::test]
    async fn test_eof_stops_connection() {
        let (conn, _rx, client) = setup();
        drop(client);
        tokio::time::timeout(Duration::from_secs(1), conn.stopping().fired())
            .await
            .expect("EOF must stop the connection");
    }

    #[tokio::test]
    async fn test_write_list_in_order() {
        let (conn, _rx, mut client) = setup();
        conn.write_list_now(&["A", "B", "C"]).await.unwrap();
        assert_eq!(client.recv().await, "A");
        assert_eq!(client.recv().await, "B");
        assert_eq!(client.recv().await, "C");
    }
}
