use std::time::Duration;

use call_session::SessionConfig;
use clap::Parser;

use crate::telemetry::FALLBACK_FILTER;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "call-demo",
    about = "Place a call between two in-process parties over real WebRTC links",
    version
)]
pub struct DemoArgs {
    #[arg(long, env = "CALL_DEMO_CALLER", default_value = "alice", help = "Identity of the calling party")]
    pub caller: String,

    #[arg(long, env = "CALL_DEMO_CALLEE", default_value = "bob", help = "Identity of the called party")]
    pub callee: String,

    #[arg(
        long = "hold-secs",
        env = "CALL_DEMO_HOLD_SECS",
        default_value_t = 5,
        help = "How long to keep the call up once it is active"
    )]
    pub hold_secs: u64,

    #[arg(
        long = "connect-timeout-secs",
        env = "CALL_DEMO_CONNECT_TIMEOUT_SECS",
        default_value_t = 15,
        help = "Give up if the call is not active within this many seconds"
    )]
    pub connect_timeout_secs: u64,

    #[arg(
        long = "reject",
        env = "CALL_DEMO_REJECT",
        help = "Have the callee decline instead of answering"
    )]
    pub reject: bool,

    #[arg(
        long = "log-filter",
        env = "CALL_DEMO_LOG",
        default_value = FALLBACK_FILTER,
        help = "tracing filter directive"
    )]
    pub log_filter: String,
}

impl DemoArgs {
    pub fn hold(&self) -> Duration {
        Duration::from_secs(self.hold_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Session settings come from `CALL_*` variables; the demo only adds identities.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_place_a_short_call() {
        let args = DemoArgs::parse_from(["call-demo"]);
        assert_eq!(args.caller, "alice");
        assert_eq!(args.callee, "bob");
        assert_eq!(args.hold(), Duration::from_secs(5));
        assert!(!args.reject);
        assert_eq!(args.log_filter, FALLBACK_FILTER);
    }

    #[test]
    fn flags_override_defaults() {
        let args = DemoArgs::parse_from(["call-demo", "--caller", "carol", "--hold-secs", "1", "--reject"]);
        assert_eq!(args.caller, "carol");
        assert_eq!(args.hold_secs, 1);
        assert!(args.reject);
    }
}
