//! History replay on connect.

use super::{
    pipeline::{store_media, Delivery},
    Session,
};
use tracing::{debug, info, warn};
use wairc_core::{config::ReplayMode, error::WaircError};
use wairc_irc::Negotiation;

impl Session {
    /// Replay what happened since the last session, once, before live
    /// delivery starts.
    ///
    /// Without the replay capability (or on the very first session) the
    /// ledger is only fast-forwarded to each chat's latest timestamp.
    /// Otherwise only messages newer than the ledger value are sent; the
    /// ledger value itself was delivered in an earlier session.
    pub(super) async fn replay(&self) -> Result<(), WaircError> {
        if self.irc.caps().wait_negotiation(&self.stop).await == Negotiation::Cancelled {
            return Ok(());
        }

        let mode = self.services.config.replay.mode;
        let wants_replay =
            self.irc.caps().has(&self.irc.replay_capability()) || mode == ReplayMode::Alternative;
        let first_session = self.ledger.is_empty();
        let delivery = match mode {
            ReplayMode::Normal => Delivery::Normal,
            ReplayMode::Alternative => Delivery::Alternative,
        };

        if !wants_replay || first_session {
            debug!("fast-forwarding ledger without replay");
            let mut changed = false;
            for item in self.chats.list(false) {
                if let Some(chat) = item.chat.as_ref() {
                    changed |= self.ledger.advance(&chat.id, chat.timestamp);
                }
            }
            if changed {
                self.save_session();
            }
            return Ok(());
        }

        let mut replayed = 0usize;
        for item in self.chats.list(false) {
            if self.stop.is_fired() {
                return Ok(());
            }
            let since = self.ledger.get(&item.id);
            let latest = item.chat.as_ref().map_or(i64::MAX, |c| c.timestamp);
            if since.is_some_and(|since| latest <= since) {
                continue;
            }

            let messages = match self
                .whatsapp
                .messages_since(&item.id, since.unwrap_or(0))
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("failed to fetch history of {}: {e}", item.identifier);
                    continue;
                }
            };

            for msg in messages
                .iter()
                .filter(|m| since.map_or(true, |since| m.timestamp > since))
            {
                if let Err(e) =
                    store_media(self.whatsapp.as_ref(), self.services.files.as_ref(), msg).await
                {
                    warn!("skipping replayed message {}: media unavailable: {e}", msg.id);
                    continue;
                }
                self.handle_message(msg, delivery).await?;
                replayed += 1;
            }
        }

        info!("replayed {replayed} messages for {}", self.key);
        Ok(())
    }
}
