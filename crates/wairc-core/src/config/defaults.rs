//! Default value functions used by serde for config deserialization.

pub fn default_data_dir() -> String {
    "~/.wairc".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_host() -> String {
    "localhost".to_string()
}

pub fn default_irc_port() -> u16 {
    6060
}

pub fn default_server_name() -> String {
    "wairc".to_string()
}

pub fn default_password_grace_secs() -> u64 {
    5
}

pub fn default_bridge_endpoint() -> String {
    "http://127.0.0.1:9515".to_string()
}

pub fn default_setup_attempts() -> u32 {
    5
}

pub fn default_setup_retry_delay_ms() -> u64 {
    1000
}

pub fn default_message_poll_ms() -> u64 {
    500
}

pub fn default_login_poll_ms() -> u64 {
    1000
}

pub fn default_files_dir() -> String {
    "~/.wairc/files".to_string()
}

pub fn default_files_port() -> u16 {
    3000
}

pub fn default_db_path() -> String {
    "~/.wairc/data/sessions.db".to_string()
}

pub fn default_seen_ids_capacity() -> usize {
    750
}

pub fn default_prefetch_capacity() -> usize {
    50
}
