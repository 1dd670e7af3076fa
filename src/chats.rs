//! Chat registry: maps WhatsApp chat IDs onto unique IRC identifiers.
//!
//! Identifiers are derived from display names, so two chats can sanitize to
//! the same string. The registry keeps them apart with a `_N` suffix that
//! stays assigned to the chat for the whole session.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use wairc_core::{
    sanitize::{is_phone_number, safe_string, strip_unsafe},
    traits::ChatIdentity,
    whatsapp::{ChatRecord, ParticipantRecord},
};

/// A member of a group chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: String,
    pub short_name: String,
    pub push_name: String,
    pub formatted_name: String,
    pub is_admin: bool,
    pub is_super_admin: bool,
    pub is_self: bool,
}

impl Participant {
    pub fn from_record(record: ParticipantRecord, self_id: &str) -> Self {
        let is_self = record.contact.is_me || (!self_id.is_empty() && record.id == self_id);
        Self {
            is_self,
            id: record.id,
            short_name: record.contact.short_name,
            push_name: record.contact.push_name,
            formatted_name: record.contact.formatted_name,
            is_admin: record.is_admin,
            is_super_admin: record.is_super_admin,
        }
    }

    pub fn full_name(&self) -> &str {
        [&self.formatted_name, &self.push_name, &self.short_name]
            .into_iter()
            .find(|n| !n.is_empty())
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    /// IRC nick for this participant. A bare phone number gives way to the
    /// push name when that one survives sanitizing.
    pub fn safe_name(&self) -> String {
        let full = self.full_name();
        if is_phone_number(full) {
            let push = strip_unsafe(&self.push_name);
            if !push.is_empty() {
                return push;
            }
        }
        safe_string(full)
    }

    /// NAMES prefix for the admin tier.
    pub fn prefix(&self) -> &'static str {
        if self.is_super_admin {
            "@"
        } else if self.is_admin {
            "%"
        } else {
            ""
        }
    }

    pub fn is_any_admin(&self) -> bool {
        self.is_admin || self.is_super_admin
    }
}

/// Session view of a WhatsApp chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    pub description: Option<String>,
    /// Timestamp of the latest message, as reported at conversion time.
    pub timestamp: i64,
    pub participants: Vec<Participant>,
}

impl Chat {
    pub fn new(record: ChatRecord, participants: Vec<Participant>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            is_group: record.is_group,
            description: record.description,
            timestamp: record.timestamp,
            participants,
        }
    }

    /// Candidate identifier before collision handling: `#Name` for groups,
    /// the bare name (without a leading `+`) for direct chats.
    pub fn identifier(&self) -> String {
        base_identifier(&self.name, self.is_group)
    }

    /// Case-insensitive lookup by IRC nick.
    pub fn participant_by_nick(&self, nick: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.safe_name().eq_ignore_ascii_case(nick))
    }

    pub fn participant_by_id(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn self_participant(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_self)
    }

    /// Topic line: the name, plus the description flattened to one line.
    pub fn topic(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => {
                format!("{}: {}", self.name, desc.replace(['\r', '\n'], " "))
            }
            _ => self.name.clone(),
        }
    }
}

/// Identifier a chat with this name would get if nothing collided.
pub fn base_identifier(name: &str, is_group: bool) -> String {
    let safe = safe_string(name);
    if is_group {
        format!("#{safe}")
    } else {
        match safe.strip_prefix('+') {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => safe,
        }
    }
}

/// Lower-cased identifier with any `_N` collision suffix removed.
fn collision_base(identifier: &str) -> String {
    let lower = identifier.to_ascii_lowercase();
    match lower.rsplit_once('_') {
        Some((base, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            base.to_string()
        }
        _ => lower,
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct ChatItem {
    pub identifier: String,
    pub id: String,
    /// `None` while the entry is only known from a stored session.
    pub chat: Option<Arc<Chat>>,
    pub joined: bool,
}

#[derive(Debug)]
struct Entry {
    identifier: String,
    base: String,
    id: String,
    is_group: bool,
    chat: Option<Arc<Chat>>,
    joined: bool,
    seen: VecDeque<String>,
}

impl Entry {
    fn item(&self) -> ChatItem {
        ChatItem {
            identifier: self.identifier.clone(),
            id: self.id.clone(),
            chat: self.chat.clone(),
            joined: self.joined,
        }
    }

    fn visible(&self, allow_unresolved: bool) -> bool {
        allow_unresolved || self.chat.is_some()
    }
}

#[derive(Debug)]
pub struct ChatRegistry {
    entries: RwLock<Vec<Entry>>,
    seen_capacity: usize,
}

impl ChatRegistry {
    pub fn new(seen_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            seen_capacity: seen_capacity.max(1),
        }
    }

    /// Restore the identifier mapping of a stored session. Restored entries
    /// stay unresolved until the live chat is added.
    pub fn restore(&self, identities: Vec<ChatIdentity>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for identity in identities {
            if entries.iter().any(|e| e.id == identity.id) {
                continue;
            }
            if entries
                .iter()
                .any(|e| e.identifier.eq_ignore_ascii_case(&identity.identifier))
            {
                tracing::warn!(
                    "stored identifier {} is taken, dropping mapping for {}",
                    identity.identifier,
                    identity.id
                );
                continue;
            }
            entries.push(Entry {
                base: collision_base(&identity.identifier),
                identifier: identity.identifier,
                id: identity.id,
                is_group: identity.is_group,
                chat: None,
                joined: false,
                seen: VecDeque::new(),
            });
        }
    }

    /// Register `chat`. Returns the entry and whether it is new.
    ///
    /// A chat whose ID is already known keeps its identifier and only has
    /// its data replaced.
    pub fn add(&self, chat: Chat) -> (ChatItem, bool) {
        let candidate = chat.identifier();
        let base = collision_base(&candidate);
        let chat = Arc::new(chat);

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = entries.iter_mut().find(|e| e.id == chat.id) {
            entry.is_group = chat.is_group;
            entry.chat = Some(chat);
            return (entry.item(), false);
        }

        let collisions = entries.iter().filter(|e| e.base == base).count();
        let taken = |ident: &str| {
            entries
                .iter()
                .any(|e| e.identifier.eq_ignore_ascii_case(ident))
        };
        let mut identifier = candidate.clone();
        if collisions > 0 || taken(&identifier) {
            let mut n = collisions.max(1);
            loop {
                n += 1;
                identifier = format!("{candidate}_{n}");
                if !taken(&identifier) {
                    break;
                }
            }
        }

        let entry = Entry {
            identifier,
            base,
            id: chat.id.clone(),
            is_group: chat.is_group,
            chat: Some(chat),
            joined: false,
            seen: VecDeque::new(),
        };
        let item = entry.item();
        entries.push(entry);
        (item, true)
    }

    pub fn by_id(&self, id: &str, allow_unresolved: bool) -> Option<ChatItem> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.id == id && e.visible(allow_unresolved))
            .map(Entry::item)
    }

    /// Case-insensitive identifier lookup.
    pub fn by_identifier(&self, identifier: &str, allow_unresolved: bool) -> Option<ChatItem> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|e| e.identifier.eq_ignore_ascii_case(identifier) && e.visible(allow_unresolved))
            .map(Entry::item)
    }

    pub fn list(&self, include_unresolved: bool) -> Vec<ChatItem> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.visible(include_unresolved))
            .map(Entry::item)
            .collect()
    }

    /// Record a message ID for dedup. Returns `false` if it was already seen.
    pub fn mark_seen(&self, chat_id: &str, message_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = entries.iter_mut().find(|e| e.id == chat_id) else {
            return true;
        };
        if entry.seen.iter().any(|id| id == message_id) {
            return false;
        }
        if entry.seen.len() >= self.seen_capacity {
            entry.seen.pop_front();
        }
        entry.seen.push_back(message_id.to_string());
        true
    }

    /// Flip a resolved group chat to joined. Returns `true` only for the
    /// caller that made the change, so the JOIN burst goes out once.
    pub fn try_mark_joined(&self, chat_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|e| e.id == chat_id) {
            Some(entry) if entry.is_group && entry.chat.is_some() && !entry.joined => {
                entry.joined = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_joined(&self, chat_id: &str, joined: bool) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.iter_mut().find(|e| e.id == chat_id) {
            entry.joined = joined;
        }
    }

    /// Identifier mapping for persistence.
    pub fn identities(&self) -> Vec<ChatIdentity> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|e| ChatIdentity {
                identifier: e.identifier.clone(),
                id: e.id.clone(),
                is_group: e.is_group,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wairc_core::whatsapp::Contact;

    fn group(id: &str, name: &str) -> Chat {
        Chat::new(
            ChatRecord {
                id: id.into(),
                name: name.into(),
                is_group: true,
                ..Default::default()
            },
            Vec::new(),
        )
    }

    fn direct(id: &str, name: &str) -> Chat {
        Chat::new(
            ChatRecord {
                id: id.into(),
                name: name.into(),
                ..Default::default()
            },
            Vec::new(),
        )
    }

    fn participant(formatted: &str, push: &str) -> Participant {
        Participant::from_record(
            ParticipantRecord {
                id: "1@c.us".into(),
                contact: Contact {
                    id: "1@c.us".into(),
                    formatted_name: formatted.into(),
                    push_name: push.into(),
                    ..Default::default()
                },
                ..Default::default()
            },
            "me@c.us",
        )
    }

    #[test]
    fn test_collision_suffixes_compose() {
        let reg = ChatRegistry::new(10);
        let (a, new_a) = reg.add(group("1@g.us", "Family"));
        let (b, _) = reg.add(group("2@g.us", "family!"));
        let (c, _) = reg.add(group("3@g.us", "FAMILY"));
        assert!(new_a);
        assert_eq!(a.identifier, "#Family");
        assert_eq!(b.identifier, "#family_2");
        assert_eq!(c.identifier, "#FAMILY_3");
    }

    #[test]
    fn test_readd_keeps_identifier_and_updates_data() {
        let reg = ChatRegistry::new(10);
        reg.add(group("1@g.us", "Family"));
        reg.add(group("2@g.us", "Family"));
        let (again, is_new) = reg.add(group("2@g.us", "Renamed"));
        assert!(!is_new);
        assert_eq!(again.identifier, "#Family_2");
        assert_eq!(again.chat.unwrap().name, "Renamed");
        assert_eq!(reg.list(true).len(), 2);
    }

    #[test]
    fn test_identifiers_stay_unique() {
        let reg = ChatRegistry::new(10);
        // A chat literally sanitizing to an already-suffixed name.
        reg.add(group("1@g.us", "a"));
        reg.add(group("2@g.us", "a"));
        reg.restore(vec![ChatIdentity {
            identifier: "#a_3".into(),
            id: "9@g.us".into(),
            is_group: true,
        }]);
        reg.add(group("3@g.us", "a"));
        reg.add(group("4@g.us", "a"));

        let mut idents: Vec<String> = reg
            .identities()
            .into_iter()
            .map(|i| i.identifier.to_lowercase())
            .collect();
        let total = idents.len();
        idents.sort();
        idents.dedup();
        assert_eq!(idents.len(), total, "identifiers must be unique: {idents:?}");
    }

    #[test]
    fn test_restored_entries_hidden_until_resolved() {
        let reg = ChatRegistry::new(10);
        reg.restore(vec![ChatIdentity {
            identifier: "#Work_2".into(),
            id: "5@g.us".into(),
            is_group: true,
        }]);
        assert!(reg.by_identifier("#work_2", false).is_none());
        assert!(reg.by_identifier("#work_2", true).is_some());

        let (item, is_new) = reg.add(group("5@g.us", "Work"));
        assert!(!is_new);
        assert_eq!(item.identifier, "#Work_2", "stored identifier survives");
        assert!(reg.by_id("5@g.us", false).is_some());
    }

    #[test]
    fn test_identities_keep_group_flag() {
        let reg = ChatRegistry::new(10);
        reg.add(group("1@g.us", "Team"));
        reg.add(direct("2@c.us", "Bob"));
        let stored = reg.identities();
        assert!(stored[0].is_group);
        assert!(!stored[1].is_group);

        let restored = ChatRegistry::new(10);
        restored.restore(stored.clone());
        assert_eq!(restored.identities(), stored);
    }

    #[test]
    fn test_try_mark_joined_succeeds_once() {
        let reg = ChatRegistry::new(10);
        reg.add(group("1@g.us", "Team"));
        reg.add(direct("2@c.us", "Bob"));
        assert!(reg.try_mark_joined("1@g.us"));
        assert!(!reg.try_mark_joined("1@g.us"), "already joined");
        assert!(!reg.try_mark_joined("2@c.us"), "direct chats are never joined");

        reg.set_joined("1@g.us", false);
        assert!(reg.try_mark_joined("1@g.us"), "rejoin after part");
    }

    #[test]
    fn test_direct_identifier_drops_plus() {
        let reg = ChatRegistry::new(10);
        let (item, _) = reg.add(direct("31612@c.us", "+31 6 12"));
        assert_eq!(item.identifier, "31612");
    }

    #[test]
    fn test_seen_ring_evicts_oldest() {
        let reg = ChatRegistry::new(2);
        reg.add(direct("1@c.us", "Bob"));
        assert!(reg.mark_seen("1@c.us", "a"));
        assert!(!reg.mark_seen("1@c.us", "a"));
        assert!(reg.mark_seen("1@c.us", "b"));
        assert!(reg.mark_seen("1@c.us", "c"));
        assert!(reg.mark_seen("1@c.us", "a"), "evicted ids are forgotten");
    }

    #[test]
    fn test_participant_safe_name_prefers_push_for_numbers() {
        assert_eq!(participant("+31 6 1234", "Bob").safe_name(), "Bob");
        assert_eq!(participant("+31 6 1234", "").safe_name(), "+3161234");
        assert_eq!(participant("+31 6 1234", "!!").safe_name(), "+3161234");
        assert_eq!(participant("Alice Smith", "Al").safe_name(), "AliceSmith");
    }

    #[test]
    fn test_topic_flattens_description() {
        let mut chat = group("1@g.us", "Team");
        chat.description = Some("line one\nline two\n".into());
        assert_eq!(chat.topic(), "Team: line one line two");
        chat.description = Some("  ".into());
        assert_eq!(chat.topic(), "Team");
    }
}
