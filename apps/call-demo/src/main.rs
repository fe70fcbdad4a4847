mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use call_session::{CallDriver, CallSession, CallState, LocalIdentity, SessionConfig, TracingObserver};
use clap::Parser;
use peer_link_webrtc::{SyntheticMediaSource, TrackTable, WebRtcPeerLinkFactory};
use signal_bus::{LocalBus, SignalBus};
use tracing::{info, warn};

use crate::config::DemoArgs;
use crate::telemetry::init_tracing;

const POLL: Duration = Duration::from_millis(50);

struct Party {
    session: CallSession,
    driver: CallDriver,
}

impl Party {
    fn join(name: &str, config: SessionConfig, bus: Arc<dyn SignalBus>) -> Result<Self> {
        let tracks = TrackTable::new();
        let links = WebRtcPeerLinkFactory::new(tracks.clone())
            .with_context(|| format!("building webrtc api for {name}"))?;
        let (session, link_events) = CallSession::new(
            LocalIdentity::new(name, name),
            config,
            bus,
            Arc::new(links),
            Arc::new(SyntheticMediaSource::new(name, tracks)),
            Arc::new(TracingObserver::new(name)),
        );
        let driver = CallDriver::spawn(session.clone(), link_events);
        Ok(Self { session, driver })
    }

    async fn leave(self) {
        self.driver.shutdown().await;
    }
}

async fn wait_for(what: &str, limit: Duration, check: impl Fn() -> bool) -> Result<()> {
    let waited = tokio::time::timeout(limit, async {
        while !check() {
            tokio::time::sleep(POLL).await;
        }
    })
    .await;
    if waited.is_err() {
        bail!("timed out waiting for {what}");
    }
    Ok(())
}

fn is_active(session: &CallSession) -> bool {
    matches!(session.state(), CallState::Active { .. })
}

async fn run(args: &DemoArgs) -> Result<()> {
    let config = args.session_config();
    let bus: Arc<dyn SignalBus> = Arc::new(LocalBus::new());
    let caller = Party::join(&args.caller, config.clone(), bus.clone())?;
    let callee = Party::join(&args.callee, config, bus)?;

    caller
        .session
        .start_call(args.callee.as_str().into(), args.callee.clone())
        .await
        .context("placing call")?;

    let limit = args.connect_timeout();
    wait_for("incoming call", limit, || !callee.session.pending_offers().is_empty()).await?;
    let offer = callee
        .session
        .pending_offers()
        .into_iter()
        .next()
        .context("incoming call disappeared")?;

    if args.reject {
        callee.session.reject_call(&offer).await.context("rejecting call")?;
        wait_for("caller to return to idle", limit, || caller.session.state().is_idle()).await?;
        info!(caller = %args.caller, callee = %args.callee, "call declined");
    } else {
        callee.session.accept_offer(&offer).await.context("accepting call")?;
        wait_for("call to become active", limit, || {
            is_active(&caller.session) && is_active(&callee.session)
        })
        .await?;
        info!(
            caller = %args.caller,
            callee = %args.callee,
            caller_remote_tracks = caller.session.remote_media().tracks().len(),
            callee_remote_tracks = callee.session.remote_media().tracks().len(),
            hold_secs = args.hold_secs,
            "call active"
        );

        tokio::select! {
            _ = tokio::time::sleep(args.hold()) => {}
            _ = tokio::signal::ctrl_c() => warn!("interrupted, hanging up"),
        }

        caller.session.end_call().await.context("hanging up")?;
        wait_for("callee to see the hangup", limit, || callee.session.state().is_idle()).await?;
        info!("call ended");
    }

    caller.leave().await;
    callee.leave().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DemoArgs::parse();
    init_tracing(&args.log_filter);
    info!(caller = %args.caller, callee = %args.callee, reject = args.reject, "starting call-demo");
    run(&args).await
}
