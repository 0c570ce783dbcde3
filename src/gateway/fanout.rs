use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Envelope, Gateway};
use crate::limits::FANOUT_CHANNEL_CAPACITY;

/// One envelope addressed to one room.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub room: String,
    pub envelope: Envelope,
}

/// Producer handle into the gateway. Cloned into the engine and the relay.
///
/// Sends never wait: when the dispatcher falls behind, the event is dropped.
#[derive(Debug, Clone)]
pub struct Fanout {
    tx: mpsc::Sender<Dispatch>,
}

impl Fanout {
    pub fn channel() -> (Self, mpsc::Receiver<Dispatch>) {
        let (tx, rx) = mpsc::channel(FANOUT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        Self::channel().0
    }

    pub fn send(&self, room: impl Into<String>, envelope: Envelope) {
        let dispatch = Dispatch {
            room: room.into(),
            envelope,
        };
        match self.tx.try_send(dispatch) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(d)) => {
                warn!("fanout queue full, dropping {} for {}", d.envelope.kind, d.room);
            }
            Err(mpsc::error::TrySendError::Closed(d)) => {
                debug!("fanout closed, dropping {} for {}", d.envelope.kind, d.room);
            }
        }
    }
}

/// Drain producer events into the session registry until cancelled.
pub async fn run_dispatcher(
    gateway: Arc<Gateway>,
    mut rx: mpsc::Receiver<Dispatch>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(d) => {
                    gateway.broadcast(&d.room, &d.envelope);
                }
                None => break,
            },
        }
    }
    info!("gateway dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::event;

    #[tokio::test]
    async fn send_is_received_in_order() {
        let (fanout, mut rx) = Fanout::channel();
        fanout.send("admin_room", Envelope::new(event::CAR_INACTIVE, serde_json::json!(1)));
        fanout.send("all", Envelope::new(event::LOCATION_UPDATE, serde_json::json!(2)));
        assert_eq!(rx.recv().await.unwrap().room, "admin_room");
        assert_eq!(rx.recv().await.unwrap().envelope.kind, event::LOCATION_UPDATE);
    }

    #[tokio::test]
    async fn dispatcher_delivers_until_cancelled() {
        let gateway = Arc::new(Gateway::new(None));
        let mut session = gateway.connect(crate::gateway::Role::Client, None, None).unwrap();
        let (fanout, rx) = Fanout::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(gateway.clone(), rx, cancel.clone()));

        fanout.send("all", Envelope::new(event::LOCATION_UPDATE, serde_json::json!(3)));
        let env = session.rx.recv().await.unwrap();
        assert_eq!(env.kind, event::LOCATION_UPDATE);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn disabled_fanout_swallows_events() {
        let fanout = Fanout::disabled();
        fanout.send("all", Envelope::error("nobody listens"));
    }
}
