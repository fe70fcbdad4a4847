use signal_bus::BusError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::peer::LinkEvent;
use crate::session::CallSession;

/// Background task feeding a [`CallSession`] from its signaling channel and
/// from its peer links. Events are handled one at a time in arrival order.
///
/// Dropping the driver stops the task as well; [`CallDriver::shutdown`]
/// additionally waits for it to unsubscribe.
#[derive(Debug)]
pub struct CallDriver {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallDriver {
    pub fn spawn(session: CallSession, mut link_events: mpsc::UnboundedReceiver<LinkEvent>) -> Self {
        let bus = session.bus();
        let mut subscription = bus.subscribe(&session.config().channel);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!(
                target = "call.driver",
                identity = %session.identity().id,
                channel = %subscription.topic(),
                "call driver started"
            );
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    message = subscription.recv() => match message {
                        Ok(message) => session.handle_payload(&message.payload).await,
                        Err(BusError::Closed) => {
                            warn!(target = "call.driver", "signal channel closed");
                            break;
                        }
                        Err(err) => {
                            warn!(target = "call.driver", error = %err, "signal receive failed");
                            break;
                        }
                    },
                    Some(event) = link_events.recv() => session.handle_link_event(event).await,
                }
            }
            bus.unsubscribe(subscription);
            debug!(target = "call.driver", identity = %session.identity().id, "call driver stopped");
        });

        Self {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            warn!(target = "call.driver", error = %err, "call driver task failed");
        }
    }
}
