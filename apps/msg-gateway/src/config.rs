use std::str::FromStr;
use std::time::Duration;

use crate::hub::conflict::LoginPolicy;
use crate::hub::platform::{Platform, PushTerminals};
use crate::hub::HubSettings;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port of the client websocket listener.
    pub ws_port: u16,
    /// Port of the administrative RPC listener.
    pub rpc_port: u16,
    /// Maximum number of concurrently open websocket connections.
    pub max_conn_num: usize,
    /// Time a client has to send IDENTIFY after the upgrade.
    pub handshake_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_msg_len: usize,
    /// Outbound frames buffered per connection before senders wait.
    pub write_buffer: usize,
    /// Heartbeat interval advertised in READY.
    pub heartbeat_interval: Duration,
    pub push_timeout: Duration,
    pub kick_timeout: Duration,
    pub login_policy: LoginPolicy,
    pub push_terminals: PushTerminals,
    /// User IDs allowed to call administrative operations.
    pub app_manager_user_ids: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: 10001,
            rpc_port: 10140,
            max_conn_num: 10000,
            handshake_timeout: Duration::from_secs(10),
            max_msg_len: 4096,
            write_buffer: 64,
            heartbeat_interval: Duration::from_millis(30_000),
            push_timeout: Duration::from_millis(5000),
            kick_timeout: Duration::from_millis(3000),
            login_policy: LoginPolicy::default(),
            push_terminals: PushTerminals::default(),
            app_manager_user_ids: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every key has a default. Panics with a descriptive message if a value
    /// is present but malformed or out of range.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            ws_port: parsed_var("WS_PORT").unwrap_or(defaults.ws_port),
            rpc_port: parsed_var("RPC_PORT").unwrap_or(defaults.rpc_port),
            max_conn_num: parsed_var("WS_MAX_CONN_NUM").unwrap_or(defaults.max_conn_num),
            handshake_timeout: parsed_var("WS_HANDSHAKE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.handshake_timeout),
            max_msg_len: parsed_var("WS_MAX_MSG_LEN").unwrap_or(defaults.max_msg_len),
            write_buffer: parsed_var("WS_WRITE_BUFFER").unwrap_or(defaults.write_buffer),
            heartbeat_interval: parsed_var("HEARTBEAT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            push_timeout: parsed_var("PUSH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.push_timeout),
            kick_timeout: parsed_var("KICK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.kick_timeout),
            login_policy: parsed_var("MULTI_LOGIN_POLICY").unwrap_or(defaults.login_policy),
            push_terminals: optional_var("PUSH_TERMINALS")
                .map(|v| parse_terminals(&v))
                .unwrap_or(defaults.push_terminals),
            app_manager_user_ids: optional_var("APP_MANAGER_USER_IDS")
                .map(|v| split_list(&v).map(str::to_string).collect())
                .unwrap_or(defaults.app_manager_user_ids),
        };
        config.validate();
        config
    }

    /// Panics on values the gateway cannot run with.
    pub fn validate(&self) {
        let zero = [
            ("WS_HANDSHAKE_TIMEOUT_SECS", self.handshake_timeout.is_zero()),
            ("HEARTBEAT_INTERVAL_MS", self.heartbeat_interval.is_zero()),
            ("PUSH_TIMEOUT_MS", self.push_timeout.is_zero()),
            ("KICK_TIMEOUT_MS", self.kick_timeout.is_zero()),
            ("WS_MAX_MSG_LEN", self.max_msg_len == 0),
        ];
        for (name, is_zero) in zero {
            if is_zero {
                panic!("{name} must be greater than zero");
            }
        }
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            push_terminals: self.push_terminals.clone(),
            login_policy: self.login_policy,
            push_timeout: self.push_timeout,
            kick_timeout: self.kick_timeout,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parsed_var<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_var(name).map(|raw| {
        raw.trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} env var is invalid ({raw:?}): {e}"))
    })
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_terminals(raw: &str) -> PushTerminals {
    PushTerminals::new(split_list(raw).map(|p| {
        Platform::parse(p).unwrap_or_else(|| panic!("PUSH_TERMINALS contains unknown platform {p:?}"))
    }))
}
