//! Message pipeline: WhatsApp message records in, IRC lines out.

use super::{setup::convert_chat, Session};
use crate::chats::{ChatItem, Participant};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use wairc_core::{
    config::MapProvider,
    error::WaircError,
    traits::{FileHost, WhatsApp},
    whatsapp::{ChatRecord, Me, MessageRecord, ParticipantRecord},
};
use wairc_irc::{message as irc, IrcConnection};
use wairc_memory::media_extension;

/// Nick of the pseudo-user that sends collapsed history lines.
const REPLAY_NICK: &str = "replay";

/// Shown in place of media that is not (yet) hosted.
pub(super) const FILE_PLACEHOLDER: &str = "--file--";

/// How a message reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Delivery {
    /// Every line individually, from the real sender, at the original time.
    Normal,
    /// One `(time) from->to: line` private message from `replay` per line.
    Alternative,
}

/// A formatted message on its way to the client.
struct Outgoing<'a> {
    from: &'a str,
    to: &'a str,
    body: String,
    is_quote: bool,
    time: DateTime<Utc>,
}

impl Delivery {
    async fn send(self, irc: &IrcConnection, out: &Outgoing<'_>) -> Result<(), WaircError> {
        match self {
            Self::Normal => {
                if out.is_quote {
                    let line = quote_preview(&out.body);
                    return irc
                        .write(out.time, &irc::privmsg(out.from, out.to, &line))
                        .await;
                }
                for line in out.body.split('\n') {
                    irc::log_chat_line(out.time, out.from, out.to, line);
                    irc.write(out.time, &irc::privmsg(out.from, out.to, line))
                        .await?;
                }
                Ok(())
            }
            Self::Alternative => {
                if out.is_quote {
                    return Ok(());
                }
                let nick = irc.nick();
                let stamp = out.time.format("%Y-%m-%d %H:%M:%S");
                for line in out.body.split('\n') {
                    irc::log_chat_line(out.time, out.from, out.to, line);
                    let collapsed = format!("({stamp}) {}->{}: {line}", out.from, out.to);
                    irc.write_now(&irc::privmsg(REPLAY_NICK, &nick, &collapsed))
                        .await?;
                }
                Ok(())
            }
        }
    }
}

/// `> first line [and N more lines]`
pub(super) fn quote_preview(body: &str) -> String {
    let mut lines = body.split('\n');
    let first = lines.next().unwrap_or_default();
    let rest = lines.count();
    match rest {
        0 => format!("> {first}"),
        1 => format!("> {first} [and 1 more line]"),
        n => format!("> {first} [and {n} more lines]"),
    }
}

/// Make sure the media of `msg` is hosted. No-op for messages without media
/// or whose file is already known.
pub(super) async fn store_media(
    whatsapp: &dyn WhatsApp,
    files: &dyn FileHost,
    msg: &MessageRecord,
) -> Result<(), WaircError> {
    if !msg.is_media || msg.file_hash.is_empty() || files.file_by_hash(&msg.file_hash).is_some() {
        return Ok(());
    }

    let bytes = whatsapp.download_media(msg).await?;
    let ext = media_extension(&msg.mime_type, &msg.filename);
    let file = files.add_blob(&msg.file_hash, &ext, &bytes).await?;
    debug!("hosted media of {} at {}", msg.id, file.url);
    Ok(())
}

/// Text shown for a message: a map link, the hosted media URL (or the
/// placeholder) plus caption, or the body. Mentions are resolved.
pub(super) fn format_body(
    msg: &MessageRecord,
    participants: &[Participant],
    me: &Me,
    files: &dyn FileHost,
    maps: MapProvider,
) -> String {
    if let Some(location) = msg.location {
        return maps.url(location.latitude, location.longitude);
    }

    if msg.is_media {
        let mut out = match files.file_by_hash(&msg.file_hash) {
            Some(file) if !msg.file_hash.is_empty() => file.url,
            _ => FILE_PLACEHOLDER.to_string(),
        };
        if !msg.caption.is_empty() {
            out.push(' ');
            out.push_str(&resolve_mentions(&msg.caption, participants, me));
        }
        return out;
    }

    resolve_mentions(&msg.body, participants, me)
}

/// Replace `@<number>` with `@<nick>` of the matching participant. The own
/// number becomes the own push name; unknown numbers stay as they are.
pub(super) fn resolve_mentions(text: &str, participants: &[Participant], me: &Me) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find('@') {
        out.push_str(&rest[..at]);
        out.push('@');
        let after = &rest[at + 1..];
        let len = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        if len == 0 {
            rest = after;
            continue;
        }

        let number = &after[..len];
        let user = format!("{number}@");
        let name = if me.self_id.starts_with(&user) && !me.push_name.is_empty() {
            Some(me.push_name.clone())
        } else {
            participants
                .iter()
                .find(|p| p.id.starts_with(&user))
                .map(Participant::safe_name)
        };
        out.push_str(name.as_deref().unwrap_or(number));
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

impl Session {
    /// Run one message through the pipeline. Only IRC write failures are
    /// returned; anything wrong with the message itself is logged.
    pub(super) async fn handle_message(
        &self,
        msg: &MessageRecord,
        delivery: Delivery,
    ) -> Result<(), WaircError> {
        if msg.kind == "e2e_notification" {
            return Ok(());
        }

        let Some(item) = self.resolve_chat(&msg.chat).await else {
            return Ok(());
        };
        let Some(chat) = item.chat.clone() else {
            return Ok(());
        };

        if delivery == Delivery::Normal && chat.is_group && !item.joined {
            self.join_chat(&item).await?;
        }

        if !self.chats.mark_seen(&chat.id, &msg.id) {
            return Ok(());
        }
        if self.ledger.advance(&chat.id, msg.timestamp) {
            self.save_session();
        }

        if msg.is_notification {
            return match delivery {
                Delivery::Normal => self.handle_notification(&item, msg).await,
                Delivery::Alternative => Ok(()),
            };
        }

        if msg.is_sent_by_me_from_web {
            return Ok(());
        }

        let nick = self.irc.nick();
        let from = if msg.is_sent_by_me {
            nick.clone()
        } else if !chat.is_group {
            item.identifier.clone()
        } else {
            sender_name(msg, &chat.participants)
        };
        let to = if chat.is_group || msg.is_sent_by_me {
            item.identifier.as_str()
        } else {
            nick.as_str()
        };

        let files = self.services.files.as_ref();
        let maps = self.services.config.maps.provider;

        if let Some(quoted) = msg.quoted.as_deref() {
            let quote = Outgoing {
                from: &from,
                to,
                body: format_body(quoted, &chat.participants, &self.me, files, maps),
                is_quote: true,
                time: msg.time(),
            };
            delivery.send(&self.irc, &quote).await?;
        }

        let out = Outgoing {
            from: &from,
            to,
            body: format_body(msg, &chat.participants, &self.me, files, maps),
            is_quote: false,
            time: msg.time(),
        };
        delivery.send(&self.irc, &out).await
    }

    /// Registry entry for a chat, converting and registering it on first
    /// sight. `None` if the chat could not be converted.
    pub(super) async fn resolve_chat(&self, record: &ChatRecord) -> Option<ChatItem> {
        if let Some(item) = self.chats.by_id(&record.id, false) {
            return Some(item);
        }

        match convert_chat(self.whatsapp.as_ref(), record.clone(), &self.me.self_id).await {
            Ok(chat) => {
                let (item, is_new) = self.chats.add(chat);
                if is_new {
                    debug!("discovered chat {} as {}", item.id, item.identifier);
                    self.save_session();
                }
                Some(item)
            }
            Err(e) => {
                warn!("failed to convert chat {}: {e}", record.id);
                None
            }
        }
    }

    /// JOIN, topic, NAMES for a group chat not joined yet. Concurrent
    /// callers race on the registry flag; only the winner writes the burst.
    pub(super) async fn join_chat(&self, item: &ChatItem) -> Result<(), WaircError> {
        let Some(chat) = item.chat.as_ref().filter(|c| c.is_group) else {
            return Ok(());
        };
        if !self.chats.try_mark_joined(&chat.id) {
            return Ok(());
        }

        let server = self.irc.server_name();
        let nick = self.irc.nick();
        let ident = &item.identifier;

        let mut lines = vec![
            format!(":{nick} JOIN {ident}"),
            format!(":{server} {} {nick} {ident} :{}", irc::RPL_TOPIC, chat.topic()),
        ];
        if chat.self_participant().is_some_and(Participant::is_any_admin) {
            lines.push(format!(":{server} MODE {ident} +o {nick}"));
        }
        let names: Vec<String> = chat
            .participants
            .iter()
            .filter(|p| !p.is_self)
            .map(|p| format!("{}{}", p.prefix(), p.safe_name()))
            .collect();
        lines.push(format!(
            ":{server} {} {nick} @ {ident} :{}",
            irc::RPL_NAMREPLY,
            names.join(" ")
        ));
        lines.push(format!(
            ":{server} {} {nick} {ident} :End of /NAMES list.",
            irc::RPL_ENDOFNAMES
        ));

        self.irc.write_list_now(&lines).await
    }

    /// Membership changes and call logs, as IRC events.
    async fn handle_notification(
        &self,
        item: &ChatItem,
        msg: &MessageRecord,
    ) -> Result<(), WaircError> {
        if msg.kind != "gp2" && msg.kind != "call_log" {
            warn!("ignoring notification of unknown type {}", msg.kind);
            return Ok(());
        }
        let Some(chat) = item.chat.as_ref() else {
            return Ok(());
        };

        let nick = self.irc.nick();
        let ident = &item.identifier;
        let time = msg.time();

        let name_of = |id: &str| -> String {
            if id == self.me.self_id {
                return nick.clone();
            }
            if let Some(p) = chat.participant_by_id(id) {
                return p.safe_name();
            }
            match self.chats.by_id(id, false) {
                Some(direct) if direct.chat.as_ref().is_some_and(|c| !c.is_group) => {
                    direct.identifier
                }
                _ => id.split('@').next().unwrap_or(id).to_string(),
            }
        };
        let author = name_of(msg.author_id());

        for recipient_id in &msg.recipients {
            let is_self = *recipient_id == self.me.self_id;
            let recipient = name_of(recipient_id);

            let line = match msg.subtype.as_str() {
                "create" => None,
                // The auto-join already announced the chat.
                "add" | "invite" if is_self => None,
                "add" | "invite" => Some(format!(":{recipient} JOIN {ident}")),
                "leave" => Some(format!(":{recipient} PART {ident}")),
                "remove" => Some(format!(":{author} KICK {ident} {recipient}")),
                "miss" => {
                    irc::log_chat_line(time, &author, ident, "-- missed call --");
                    Some(irc::privmsg(&author, ident, "-- missed call --"))
                }
                other => {
                    warn!("ignoring notification of unknown subtype {other}");
                    None
                }
            };
            if let Some(line) = line {
                self.irc.write(time, &line).await?;
            }

            if is_self && matches!(msg.subtype.as_str(), "leave" | "remove") {
                self.chats.set_joined(&chat.id, false);
            }
        }
        Ok(())
    }
}

/// IRC nick of a group message's author.
fn sender_name(msg: &MessageRecord, participants: &[Participant]) -> String {
    if let Some(p) = participants.iter().find(|p| p.id == msg.author_id()) {
        return p.safe_name();
    }
    let contact = msg.sender.clone().unwrap_or_default();
    let record = ParticipantRecord {
        id: msg.author_id().to_string(),
        contact,
        ..Default::default()
    };
    Participant::from_record(record, "").safe_name()
}
