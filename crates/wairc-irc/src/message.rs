//! IRC message parsing and formatting.
//!
//! RFC 1459 line format plus IRCv3 message tags. Tags keep their original
//! order so formatted lines are deterministic.

use chrono::{DateTime, Utc};
use std::fmt;

/// A parsed IRC message with optional IRCv3 tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// IRCv3 message tags, in the order they appeared.
    pub tags: Vec<(String, String)>,
    /// Optional origin (server or user).
    pub prefix: Option<String>,
    /// The command, upper-cased (e.g. "NICK", "PRIVMSG", "001").
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Parse a raw IRC line. Returns `None` for blank or truncated lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let mut rest = line;

        // @key=value;key2=value2
        let tags = if let Some(stripped) = rest.strip_prefix('@') {
            let end = stripped.find(' ')?;
            let tag_str = &stripped[..end];
            rest = stripped[end + 1..].trim_start_matches(' ');
            parse_tags(tag_str)
        } else {
            Vec::new()
        };

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let end = stripped.find(' ')?;
            let pfx = stripped[..end].to_string();
            rest = stripped[end + 1..].trim_start_matches(' ');
            Some(pfx)
        } else {
            None
        };

        let mut params = Vec::new();
        let command;

        if let Some(space) = rest.find(' ') {
            command = rest[..space].to_ascii_uppercase();
            rest = &rest[space + 1..];

            while !rest.is_empty() {
                if let Some(trailing) = rest.strip_prefix(':') {
                    params.push(trailing.to_string());
                    break;
                }
                if let Some(space) = rest.find(' ') {
                    if space > 0 {
                        params.push(rest[..space].to_string());
                    }
                    rest = &rest[space + 1..];
                } else {
                    params.push(rest.to_string());
                    break;
                }
            }
        } else {
            command = rest.to_ascii_uppercase();
        }

        if command.is_empty() {
            return None;
        }

        Some(Message {
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Parameter `i`, or an empty string when absent.
    pub fn param(&self, i: usize) -> &str {
        self.params.get(i).map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            write!(f, "@")?;
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    write!(f, ";")?;
                }
                if value.is_empty() {
                    write!(f, "{key}")?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            write!(f, " ")?;
        }

        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1
                && (param.contains(' ') || param.starts_with(':') || param.is_empty())
            {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

/// `:from PRIVMSG to :line`
pub fn privmsg(from: &str, to: &str, line: &str) -> String {
    format!(":{from} PRIVMSG {to} :{line}")
}

/// Log one chat line crossing the bridge as `(YYYY-MM-DD HH:MM:SS) from->to: line`.
pub fn log_chat_line(time: DateTime<Utc>, from: &str, to: &str, line: &str) {
    tracing::info!("({}) {from}->{to}: {line}", time.format("%Y-%m-%d %H:%M:%S"));
}

/// The `server-time` tag value for `time`: `YYYY-MM-DDTHH:MM:SS.sssZ`.
pub fn server_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// CTCP ACTION payload (`\x01ACTION text\x01`), if `text` is one.
pub fn ctcp_action(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\x01')?;
    let inner = inner.strip_suffix('\x01').unwrap_or(inner);
    inner.strip_prefix("ACTION ")
}

fn parse_tags(tag_str: &str) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    for pair in tag_str.split(';') {
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            tags.push((key.to_string(), unescape_tag_value(value)));
        } else {
            tags.push((pair.to_string(), String::new()));
        }
    }
    tags
}

fn unescape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => result.push(';'),
                Some('s') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('r') => result.push('\r'),
                Some('n') => result.push('\n'),
                Some(other) => result.push(other),
                None => {}
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn escape_tag_value(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => result.push_str("\\:"),
            ' ' => result.push_str("\\s"),
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

// Registration
pub const RPL_WELCOME: &str = "001";
pub const RPL_YOURHOST: &str = "002";
pub const RPL_CREATED: &str = "003";
pub const RPL_MYINFO: &str = "004";
pub const RPL_ISUPPORT: &str = "005";

// MOTD
pub const RPL_MOTDSTART: &str = "375";
pub const RPL_MOTD: &str = "372";
pub const RPL_ENDOFMOTD: &str = "376";

// Channels
pub const RPL_TOPIC: &str = "332";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const RPL_LIST: &str = "322";
pub const RPL_LISTEND: &str = "323";

// WHO / WHOIS
pub const RPL_WHOREPLY: &str = "352";
pub const RPL_ENDOFWHO: &str = "315";
pub const RPL_WHOISUSER: &str = "311";
pub const RPL_WHOISCHANNELS: &str = "319";
pub const RPL_ENDOFWHOIS: &str = "318";

// Errors
pub const ERR_NOSUCHNICK: &str = "401";
pub const ERR_NOSUCHCHANNEL: &str = "403";
pub const ERR_USERNOTINCHANNEL: &str = "441";
pub const ERR_NOTONCHANNEL: &str = "442";
pub const ERR_PASSWDMISMATCH: &str = "464";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_simple_command() {
        let msg = Message::parse("NICK alice").unwrap();
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert!(msg.tags.is_empty());
        assert!(msg.prefix.is_none());
    }

    #[test]
    fn test_parse_trailing_and_prefix() {
        let msg = Message::parse(":alice!u@h privmsg #family :hello there\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!u@h"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#family", "hello there"]);
    }

    #[test]
    fn test_parse_tags_in_order() {
        let msg = Message::parse("@b=2;a=x\\sy;flag PING :token").unwrap();
        assert_eq!(
            msg.tags,
            vec![
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "x y".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
        assert_eq!(msg.param(0), "token");
        assert_eq!(msg.param(5), "");
    }

    #[test]
    fn test_parse_blank_is_none() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("   \r\n").is_none());
        assert!(Message::parse(":onlyprefix").is_none());
    }

    #[test]
    fn test_display_uses_trailing_when_needed() {
        let msg = Message {
            tags: vec![("time".into(), "2024-01-01T00:00:00.000Z".into())],
            prefix: Some("wairc".into()),
            command: "PONG".into(),
            params: vec!["wairc".into(), "a b".into()],
        };
        assert_eq!(
            msg.to_string(),
            "@time=2024-01-01T00:00:00.000Z :wairc PONG wairc :a b"
        );
    }

    #[test]
    fn test_server_time_format() {
        let t = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(server_time(t), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn test_ctcp_action() {
        assert_eq!(ctcp_action("\x01ACTION waves\x01"), Some("waves"));
        assert_eq!(ctcp_action("\x01ACTION waves"), Some("waves"));
        assert_eq!(ctcp_action("\x01VERSION\x01"), None);
        assert_eq!(ctcp_action("plain"), None);
    }

    #[test]
    fn test_privmsg_format() {
        assert_eq!(privmsg("bob", "#fam", "hi"), ":bob PRIVMSG #fam :hi");
    }
}
