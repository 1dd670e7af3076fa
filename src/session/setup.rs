//! Bridge setup: login (with QR code when needed), identity, chat list.

use super::{Services, Session};
use crate::chats::{Chat, Participant};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use wairc_core::{
    error::WaircError,
    traits::{SessionRecord, WhatsApp},
    whatsapp::{ChatRecord, LoginState},
    Signal,
};
use wairc_irc::IrcConnection;

/// One setup attempt. The bridge session is released again on failure.
pub(super) async fn setup(
    irc: &Arc<IrcConnection>,
    services: &Arc<Services>,
    nick: &str,
    record: Option<&SessionRecord>,
    password: Option<String>,
    stop: &Signal,
) -> Result<Session, WaircError> {
    let whatsapp = services.connector.connect().await?;

    let result = tokio::select! {
        _ = stop.fired() => Err(WaircError::Irc("client disconnected during setup".into())),
        result = login(irc, whatsapp.clone(), services, nick, record, password, stop) => result,
    };

    if result.is_err() {
        if let Err(e) = whatsapp.shutdown().await {
            warn!("failed to release bridge after setup failure: {e}");
        }
    }
    result
}

async fn login(
    irc: &Arc<IrcConnection>,
    whatsapp: Arc<dyn WhatsApp>,
    services: &Arc<Services>,
    nick: &str,
    record: Option<&SessionRecord>,
    password: Option<String>,
    stop: &Signal,
) -> Result<Session, WaircError> {
    if let Some(record) = record {
        irc.status("logging in using stored session").await?;
        whatsapp.navigate().await?;
        if let Err(e) = whatsapp.set_local_storage(&record.local_storage).await {
            warn!("failed to restore local storage for {nick}: {e}");
        }
    }

    let state = whatsapp.open().await?;
    let qr_file = if state == LoginState::LoggedOut {
        let code = whatsapp
            .login_code()
            .await
            .map_err(|e| WaircError::Bridge(format!("retrieving login code failed: {e}")))?;
        let png = wairc_bridge::generate_qr_image(&code)?;

        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let file = services
            .files
            .add_blob(&format!("qr-{nanos}"), "png", &png)
            .await?;
        irc.status(&format!("Scan this QR code: {}", file.url))
            .await?;
        Some(file)
    } else {
        None
    };

    let waited = whatsapp.wait_login().await;
    if let Some(file) = qr_file {
        if let Err(e) = services.files.remove_file(&file).await {
            warn!("failed to remove login QR code: {e}");
        }
    }
    waited?;
    irc.status("logged in").await?;
    info!("{nick} logged in to WhatsApp");

    let me = whatsapp.me().await?;
    let session = Session::new(
        irc.clone(),
        whatsapp.clone(),
        services.clone(),
        nick,
        me,
        password,
        stop.clone(),
    );
    if let Some(record) = record {
        session.ledger.swap(record.last_received_receipts.clone());
        session.chats.restore(record.chats.clone());
    }

    match whatsapp.local_storage().await {
        Ok(items) => {
            *session
                .local_storage
                .write()
                .unwrap_or_else(|e| e.into_inner()) = items;
            services.store.save_item(nick, &session.record()).await?;
        }
        Err(e) => warn!("failed to read local storage for {nick}: {e}"),
    }

    let records = whatsapp.all_chats().await?;
    for chat in convert_all(&session, records).await? {
        session.chats.add(chat);
    }
    session.save_session();
    Ok(session)
}

/// Convert every chat concurrently, keeping the original order. Chats that
/// fail to convert are reported and skipped.
async fn convert_all(
    session: &Session,
    records: Vec<ChatRecord>,
) -> Result<Vec<Chat>, WaircError> {
    let mut slots: Vec<Option<Chat>> = vec![None; records.len()];
    let mut tasks = JoinSet::new();

    for (i, record) in records.into_iter().enumerate() {
        let whatsapp = session.whatsapp.clone();
        let self_id = session.me.self_id.clone();
        tasks.spawn(async move {
            let id = record.id.clone();
            let result = convert_chat(whatsapp.as_ref(), record, &self_id).await;
            (i, id, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, id, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!("chat conversion task failed: {e}");
                continue;
            }
        };
        match result {
            Ok(chat) => slots[i] = Some(chat),
            Err(e) => {
                let line = format!("error while converting chat with ID {id}, skipping");
                warn!("{line}: {e}");
                session.irc.status(&line).await?;
            }
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Build the session view of a chat, fetching group members.
pub(super) async fn convert_chat(
    whatsapp: &dyn WhatsApp,
    record: ChatRecord,
    self_id: &str,
) -> Result<Chat, WaircError> {
    let participants = if record.is_group {
        whatsapp
            .participants(&record.id)
            .await?
            .into_iter()
            .map(|p| Participant::from_record(p, self_id))
            .collect()
    } else {
        Vec::new()
    };
    Ok(Chat::new(record, participants))
}
