use crate::media::MediaConstraints;

pub const DEFAULT_CHANNEL: &str = "webrtc-vchat";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bus topic every party of a call shares.
    pub channel: String,
    pub ice_servers: Vec<IceServer>,
    pub caller_media: MediaConstraints,
    pub callee_media: MediaConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.into(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
            caller_media: MediaConstraints::caller_default(),
            callee_media: MediaConstraints::callee_default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let channel = lookup("CALL_SIGNAL_CHANNEL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.channel);

        let localhost_only = lookup("CALL_LOCALHOST_ONLY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(false);

        let mut ice_servers = Vec::new();
        if !localhost_only {
            let stun_urls: Vec<String> = lookup("CALL_STUN_URLS")
                .map(|v| split_urls(&v))
                .unwrap_or_else(|| vec![DEFAULT_STUN_URL.to_string()]);
            if !stun_urls.is_empty() {
                ice_servers.push(IceServer {
                    urls: stun_urls,
                    username: None,
                    credential: None,
                });
            }
            if let Some(turn_urls) = lookup("CALL_TURN_URL").map(|v| split_urls(&v)) {
                if !turn_urls.is_empty() {
                    ice_servers.push(IceServer {
                        urls: turn_urls,
                        username: lookup("CALL_TURN_USERNAME"),
                        credential: lookup("CALL_TURN_CREDENTIAL"),
                    });
                }
            }
        }

        Self {
            channel,
            ice_servers,
            ..defaults
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = ice_servers;
        self
    }
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
