//! Session orchestrator: one per IRC client socket.
//!
//! A session waits for the client's nickname, checks the stored password,
//! greets the client, sets up the WhatsApp bridge and then runs three loops
//! under one stop signal: IRC command dispatch, login-state polling, and
//! in-order message delivery (preceded by a one-time history replay).

mod commands;
mod pipeline;
mod queue;
mod replay;
mod setup;


use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wairc_core::{
    config::Config,
    error::WaircError,
    listen::{listen_for_messages, listen_logged_in},
    traits::{Connector, FileHost, SessionRecord, SessionStore, WhatsApp},
    whatsapp::Me,
    Signal,
};
use wairc_irc::{message as irc, IrcConnection, Message};

use crate::{chats::ChatRegistry, ledger::Ledger};
use pipeline::{store_media, Delivery};
use queue::{prefetch_queue, Prefetched};

/// Shared dependencies handed to every session.
pub struct Services {
    pub connector: Arc<dyn Connector>,
    pub files: Arc<dyn FileHost>,
    pub store: Arc<dyn SessionStore>,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

/// Serve one IRC client until it disconnects or the session fails.
pub async fn serve<R, W>(reader: R, writer: W, services: Arc<Services>) -> anyhow::Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let stop = Signal::new();
    let (irc, inbound) =
        IrcConnection::start(reader, writer, stop.clone(), &services.config.irc.server_name);

    let result = run(&irc, inbound, &services, &stop).await;
    irc.close().await;
    result
}

async fn run(
    irc: &Arc<IrcConnection>,
    inbound: mpsc::Receiver<Message>,
    services: &Arc<Services>,
    stop: &Signal,
) -> anyhow::Result<()> {
    tokio::select! {
        _ = stop.fired() => {
            debug!("client left before sending a nickname");
            return Ok(());
        }
        _ = irc.nick_set().fired() => {}
    }
    let nick = irc.nick();
    info!("client registered as {nick}");

    let record = services.store.get_item(&nick).await?;
    let stored_password = record
        .as_ref()
        .and_then(|r| r.password.clone())
        .filter(|p| !p.is_empty());

    if let Some(expected) = stored_password.as_deref() {
        let grace = Duration::from_secs(services.config.irc.password_grace_secs);
        if !check_password(irc, expected, grace, stop).await {
            warn!("password check failed for {nick}");
            irc.write_now(&format!(
                ":{} {} {nick} :Password incorrect",
                irc.server_name(),
                irc::ERR_PASSWDMISMATCH
            ))
            .await?;
            return Ok(());
        }
    }

    welcome(irc, services).await?;

    // A client that sends PASS without a stored password claims the nickname.
    let password = stored_password.or_else(|| irc.password().filter(|p| !p.is_empty()));

    let Some(session) =
        setup_with_retry(irc, services, &nick, record.as_ref(), password, stop).await?
    else {
        return Ok(());
    };

    session.run(inbound).await
}

/// Wait up to `grace` for `PASS` and compare it with the stored password.
async fn check_password(
    irc: &IrcConnection,
    expected: &str,
    grace: Duration,
    stop: &Signal,
) -> bool {
    let supplied = tokio::time::timeout(grace, async {
        tokio::select! {
            _ = irc.password_set().fired() => true,
            _ = stop.fired() => false,
        }
    })
    .await
    .unwrap_or(false);

    supplied && irc.password().as_deref() == Some(expected)
}

async fn welcome(irc: &IrcConnection, services: &Services) -> Result<(), WaircError> {
    let server = irc.server_name();
    let nick = irc.nick();
    let version = env!("CARGO_PKG_VERSION");
    let started = services.started_at.format("%Y-%m-%d %H:%M:%S UTC");

    irc.write_list_now(&[
        format!(":{server} {} {nick} :Welcome to wairc, {nick}.", irc::RPL_WELCOME),
        format!(":{server} {} {nick} :Your host is {server}.", irc::RPL_YOURHOST),
        format!(":{server} {} {nick} :This server was created {started}.", irc::RPL_CREATED),
        format!(":{server} {} {nick} {server} {version} o o", irc::RPL_MYINFO),
        format!(
            ":{server} {} {nick} PREFIX=(oh)@% CHANTYPES=# :are supported by this server",
            irc::RPL_ISUPPORT
        ),
        format!(":{server} {} {nick} :- {server} is running wairc {version}", irc::RPL_MOTDSTART),
        format!(":{server} {} {nick} :- Enjoy the ride.", irc::RPL_MOTD),
        format!(":{server} {} {nick} :End of /MOTD command.", irc::RPL_ENDOFMOTD),
    ])
    .await
}

/// Run bridge setup up to the configured number of attempts.
///
/// Returns `None` when the client left or every attempt failed; in the
/// latter case the client has been told why.
async fn setup_with_retry(
    irc: &Arc<IrcConnection>,
    services: &Arc<Services>,
    nick: &str,
    record: Option<&SessionRecord>,
    password: Option<String>,
    stop: &Signal,
) -> Result<Option<Session>, WaircError> {
    let attempts = services.config.bridge.setup_attempts.max(1);
    let delay = Duration::from_millis(services.config.bridge.setup_retry_delay_ms);

    for attempt in 1..=attempts {
        if stop.is_fired() {
            return Ok(None);
        }
        match setup::setup(irc, services, nick, record, password.clone(), stop).await {
            Ok(session) => return Ok(Some(session)),
            Err(e) if attempt == attempts => {
                warn!("bridge setup for {nick} failed for good: {e}");
                irc.status(&format!("giving up trying to setup whapp bridge: {e}"))
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                warn!("bridge setup attempt {attempt}/{attempts} for {nick} failed: {e}");
                tokio::select! {
                    _ = stop.fired() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    Ok(None)
}

/// A set-up session: a logged-in bridge plus the per-connection state.
pub(super) struct Session {
    pub(super) irc: Arc<IrcConnection>,
    pub(super) whatsapp: Arc<dyn WhatsApp>,
    pub(super) services: Arc<Services>,
    pub(super) chats: ChatRegistry,
    pub(super) ledger: Ledger,
    pub(super) me: Me,
    /// Nickname the session is stored under.
    pub(super) key: String,
    pub(super) password: Option<String>,
    pub(super) local_storage: RwLock<HashMap<String, String>>,
    pub(super) stop: Signal,
}

impl Session {
    pub(super) fn new(
        irc: Arc<IrcConnection>,
        whatsapp: Arc<dyn WhatsApp>,
        services: Arc<Services>,
        key: &str,
        me: Me,
        password: Option<String>,
        stop: Signal,
    ) -> Self {
        let chats = ChatRegistry::new(services.config.replay.seen_ids_capacity);
        Self {
            irc,
            whatsapp,
            services,
            chats,
            ledger: Ledger::default(),
            me,
            key: key.to_string(),
            password,
            local_storage: RwLock::new(HashMap::new()),
            stop,
        }
    }

    /// Snapshot of everything persisted for this nickname.
    pub(super) fn record(&self) -> SessionRecord {
        SessionRecord {
            local_storage: self
                .local_storage
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            last_received_receipts: self.ledger.snapshot(),
            chats: self.chats.identities(),
            password: self.password.clone(),
        }
    }

    /// Persist the current state in the background. Saves may land in any
    /// order; the store keeps the last one.
    pub(super) fn save_session(&self) {
        let store = self.services.store.clone();
        let key = self.key.clone();
        let record = self.record();
        tokio::spawn(async move {
            if let Err(e) = store.save_item(&key, &record).await {
                warn!("failed to save session for {key}: {e}");
            }
        });
    }

    /// Steady state. Returns once any loop ends; the others follow through
    /// the shared stop signal.
    async fn run(self, inbound: mpsc::Receiver<Message>) -> anyhow::Result<()> {
        info!("session for {} is up", self.key);

        let (commands, login, messages) = tokio::join!(
            async {
                let result = self.command_loop(inbound).await;
                self.stop.fire();
                result
            },
            async {
                let result = self.login_loop().await;
                self.stop.fire();
                result
            },
            async {
                let result = self.message_loop().await;
                self.stop.fire();
                result
            },
        );

        self.teardown().await;
        commands.and(login).and(messages)?;
        Ok(())
    }

    async fn command_loop(&self, mut inbound: mpsc::Receiver<Message>) -> Result<(), WaircError> {
        loop {
            let msg = tokio::select! {
                _ = self.stop.fired() => return Ok(()),
                msg = inbound.recv() => msg,
            };
            let Some(msg) = msg else { return Ok(()) };
            self.handle_command(&msg).await?;
        }
    }

    async fn login_loop(&self) -> Result<(), WaircError> {
        let interval = Duration::from_millis(self.services.config.bridge.login_poll_ms);
        let (mut states, mut errors) =
            listen_logged_in(self.whatsapp.clone(), interval, self.stop.clone());

        loop {
            tokio::select! {
                biased;
                _ = self.stop.fired() => return Ok(()),
                Some(e) = errors.recv() => {
                    warn!("login poll for {} failed: {e}", self.key);
                    return Err(e);
                }
                state = states.recv() => match state {
                    Some(true) => {}
                    Some(false) => {
                        info!("{} logged out of WhatsApp", self.key);
                        self.irc.status("logged out of WhatsApp, closing connection").await?;
                        return Ok(());
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn message_loop(&self) -> Result<(), WaircError> {
        self.replay().await?;
        if self.stop.is_fired() {
            return Ok(());
        }
        self.irc.status("ready for new messages").await?;

        let interval = Duration::from_millis(self.services.config.bridge.message_poll_ms);
        let (messages, mut errors) =
            listen_for_messages(self.whatsapp.clone(), interval, self.stop.clone());

        let whatsapp = self.whatsapp.clone();
        let files = self.services.files.clone();
        let mut slots = prefetch_queue(
            messages,
            self.services.config.replay.prefetch_capacity,
            self.stop.clone(),
            move |msg| {
                let whatsapp = whatsapp.clone();
                let files = files.clone();
                async move {
                    let result = store_media(whatsapp.as_ref(), files.as_ref(), &msg).await;
                    Prefetched { item: msg, result }
                }
            },
        );

        loop {
            let slot = tokio::select! {
                biased;
                _ = self.stop.fired() => return Ok(()),
                Some(e) = errors.recv() => {
                    warn!("message poll for {} failed: {e}", self.key);
                    return Err(e);
                }
                slot = slots.recv() => slot,
            };
            let Some(slot) = slot else { return Ok(()) };

            let done = tokio::select! {
                _ = self.stop.fired() => return Ok(()),
                done = slot => done,
            };
            let Ok(Prefetched { item, result }) = done else {
                continue;
            };
            if let Err(e) = result {
                warn!("skipping message {}: media unavailable: {e}", item.id);
                continue;
            }
            self.handle_message(&item, Delivery::Normal).await?;
        }
    }

    async fn teardown(&self) {
        self.stop.fire();
        if let Err(e) = self.whatsapp.shutdown().await {
            warn!("failed to release bridge for {}: {e}", self.key);
        }
        info!("session for {} closed", self.key);
    }
}
