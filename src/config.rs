use crate::reconnect::ReconnectPolicy;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:50001";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Address of the rendezvous server, `ws://` or `wss://`.
    pub server_url: String,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
