//! IRC commands from the client, mapped onto WhatsApp operations.
//!
//! Every handler is independent. Problems are reported to the client as a
//! status line or an error numeric; only socket failures are returned.

use super::Session;
use crate::chats::base_identifier;
use chrono::Utc;
use tracing::{debug, warn};
use wairc_core::error::WaircError;
use wairc_irc::{
    connection::STATUS_NICK,
    message::{self as irc, Message},
};

impl Session {
    pub(super) async fn handle_command(&self, msg: &Message) -> Result<(), WaircError> {
        match msg.command.as_str() {
            "PRIVMSG" => self.cmd_privmsg(msg).await,
            "JOIN" => self.cmd_join(msg).await,
            "PART" => self.cmd_part(msg).await,
            "MODE" => self.cmd_mode(msg).await,
            "LIST" => self.cmd_list().await,
            "WHO" => self.cmd_who(msg).await,
            "WHOIS" => self.cmd_whois(msg).await,
            "KICK" => self.cmd_kick(msg).await,
            "INVITE" => self.cmd_invite(msg).await,
            other => {
                debug!("ignoring irc command {other}");
                Ok(())
            }
        }
    }

    /// `:server <numeric> <nick> <rest>`
    async fn numeric(&self, numeric: &str, rest: &str) -> Result<(), WaircError> {
        let line = format!(
            ":{} {numeric} {} {rest}",
            self.irc.server_name(),
            self.irc.nick()
        );
        self.irc.write_now(&line).await
    }

    async fn cmd_privmsg(&self, msg: &Message) -> Result<(), WaircError> {
        let to = msg.param(0);
        let text = msg.param(1);
        let body = match irc::ctcp_action(text) {
            Some(action) => format!("_{action}_"),
            None => text.to_string(),
        };

        irc::log_chat_line(Utc::now(), &self.irc.nick(), to, &body);
        if to.eq_ignore_ascii_case(STATUS_NICK) {
            return Ok(());
        }

        let Some(item) = self.chats.by_identifier(to, true) else {
            return self.irc.status("unknown chat").await;
        };
        if let Err(e) = self.whatsapp.send_message(&item.id, &body).await {
            let line = format!("err while sending: {e}");
            warn!("{line}");
            return self.irc.status(&line).await;
        }
        Ok(())
    }

    async fn cmd_join(&self, msg: &Message) -> Result<(), WaircError> {
        for ident in msg.param(0).split(',').filter(|i| !i.is_empty()) {
            let item = self
                .chats
                .by_identifier(ident, true)
                .filter(|item| item.chat.as_ref().is_some_and(|c| c.is_group));
            let Some(item) = item else {
                return self.irc.status(&format!("chat not found: {ident}")).await;
            };
            self.join_chat(&item).await?;
        }
        Ok(())
    }

    async fn cmd_part(&self, msg: &Message) -> Result<(), WaircError> {
        let nick = self.irc.nick();
        for ident in msg.param(0).split(',').filter(|i| !i.is_empty()) {
            let Some(item) = self.chats.by_identifier(ident, false) else {
                return self.irc.status("unknown chat").await;
            };
            self.chats.set_joined(&item.id, false);
            self.irc
                .write_now(&format!(":{nick} PART {}", item.identifier))
                .await?;
        }
        Ok(())
    }

    async fn cmd_mode(&self, msg: &Message) -> Result<(), WaircError> {
        if msg.params.len() != 3 {
            return Ok(());
        }
        let (ident, mode, target) = (msg.param(0), msg.param(1), msg.param(2));
        let admin = match mode {
            "+o" => true,
            "-o" => false,
            _ => return Ok(()),
        };

        let Some(chat) = self.chats.by_identifier(ident, false).and_then(|i| i.chat) else {
            return self.irc.status("chat not found").await;
        };
        let Some(participant) = chat.participant_by_nick(target) else {
            return Ok(());
        };

        if let Err(e) = self
            .whatsapp
            .set_admin(&chat.id, &participant.id, admin)
            .await
        {
            let line = format!("error while changing mode of {target}: {e}");
            warn!("{line}");
            return self.irc.status(&line).await;
        }

        let line = format!(":{} MODE {ident} {mode} {target}", self.irc.nick());
        self.irc.write_now(&line).await
    }

    async fn cmd_list(&self) -> Result<(), WaircError> {
        for item in self.chats.list(false) {
            let Some(chat) = item.chat.as_ref() else {
                continue;
            };
            let members = if chat.is_group {
                chat.participants.len()
            } else {
                2
            };
            self.numeric(
                irc::RPL_LIST,
                &format!("{} {members} :{}", item.identifier, chat.name),
            )
            .await?;
        }
        self.numeric(irc::RPL_LISTEND, ":End of LIST").await
    }

    /// One `352` per member with `H`ere or `G`one from a live presence
    /// lookup; a failed lookup counts as here.
    async fn cmd_who(&self, msg: &Message) -> Result<(), WaircError> {
        let ident = msg.param(0);
        let server = self.irc.server_name();

        if let Some(chat) = self.chats.by_identifier(ident, false).and_then(|i| i.chat) {
            if chat.is_group {
                for p in chat.participants.iter().filter(|p| !p.is_self) {
                    let here = match self.whatsapp.presence(&p.id).await {
                        Ok(presence) => presence.is_online,
                        Err(e) => {
                            debug!("presence of {} unavailable: {e}", p.id);
                            true
                        }
                    };
                    let name = p.safe_name();
                    let flag = if here { "H" } else { "G" };
                    self.numeric(
                        irc::RPL_WHOREPLY,
                        &format!(
                            "{ident} {name} {server} {server} {name} {flag} :0 {}",
                            p.full_name()
                        ),
                    )
                    .await?;
                }
            }
        }
        self.numeric(irc::RPL_ENDOFWHO, &format!("{ident} :End of /WHO list."))
            .await
    }

    async fn cmd_whois(&self, msg: &Message) -> Result<(), WaircError> {
        let target = msg.param(0);
        let item = self.chats.by_identifier(target, false);
        let Some((item, chat)) = item
            .and_then(|i| i.chat.clone().map(|c| (i, c)))
            .filter(|(_, c)| !c.is_group)
        else {
            return self
                .numeric(irc::ERR_NOSUCHNICK, &format!("{target} :No such nick/channel"))
                .await;
        };

        let ident = &item.identifier;
        let server = self.irc.server_name();
        self.numeric(
            irc::RPL_WHOISUSER,
            &format!("{ident} ~{ident} {server} * :{}", chat.name),
        )
        .await?;

        match self.whatsapp.common_groups(&chat.id).await {
            Ok(groups) if !groups.is_empty() => {
                let names: Vec<String> = groups
                    .iter()
                    .map(|g| match self.chats.by_id(&g.id, true) {
                        Some(known) => known.identifier,
                        None => base_identifier(&g.name, true),
                    })
                    .collect();
                self.numeric(
                    irc::RPL_WHOISCHANNELS,
                    &format!("{ident} :{}", names.join(" ")),
                )
                .await?;
            }
            Ok(_) => {}
            Err(e) => debug!("common groups with {ident} unavailable: {e}"),
        }

        self.numeric(irc::RPL_ENDOFWHOIS, &format!("{ident} :End of /WHOIS list."))
            .await
    }

    async fn cmd_kick(&self, msg: &Message) -> Result<(), WaircError> {
        let (ident, target) = (msg.param(0), msg.param(1));

        let chat = self
            .chats
            .by_identifier(ident, false)
            .and_then(|i| i.chat)
            .filter(|c| c.is_group);
        let Some(chat) = chat else {
            return self
                .numeric(irc::ERR_NOSUCHCHANNEL, &format!("{ident} :No such channel"))
                .await;
        };
        let Some(participant) = chat.participant_by_nick(target) else {
            return self
                .numeric(
                    irc::ERR_USERNOTINCHANNEL,
                    &format!("{target} {ident} :They aren't on that channel"),
                )
                .await;
        };

        if let Err(e) = self
            .whatsapp
            .remove_participant(&chat.id, &participant.id)
            .await
        {
            let line = format!("error while kicking {target}: {e}");
            warn!("{line}");
            return self.irc.status(&line).await;
        }
        Ok(())
    }

    async fn cmd_invite(&self, msg: &Message) -> Result<(), WaircError> {
        let (target, ident) = (msg.param(0), msg.param(1));

        let chat = self
            .chats
            .by_identifier(ident, false)
            .and_then(|i| i.chat)
            .filter(|c| c.is_group);
        let Some(chat) = chat else {
            return self
                .numeric(
                    irc::ERR_NOTONCHANNEL,
                    &format!("{ident} :You're not on that channel"),
                )
                .await;
        };
        let person = self
            .chats
            .by_identifier(target, false)
            .and_then(|i| i.chat)
            .filter(|c| !c.is_group);
        let Some(person) = person else {
            return self
                .numeric(irc::ERR_NOSUCHNICK, &format!("{target} :No such nick/channel"))
                .await;
        };

        if let Err(e) = self.whatsapp.add_participant(&chat.id, &person.id).await {
            let line = format!("error while adding {target}: {e}");
            warn!("{line}");
            return self.irc.status(&line).await;
        }
        Ok(())
    }
}

