use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use gighive_types::events::GatewayEvent;

type Senders = HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>;

/// Routes gateway events to the open subscriptions of a user.
///
/// A user may hold several subscriptions at once (one per open client view).
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// user_id -> (subscription_id -> sender)
    subscribers: RwLock<HashMap<Uuid, Senders>>,
}

/// A live event stream for one user. Dropping it releases the registration;
/// cancelling its token ends `recv` for every holder of the token.
pub struct Subscription {
    id: Uuid,
    user_id: Uuid,
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
    cancel: CancellationToken,
    dispatcher: Weak<DispatcherInner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new event stream for `user_id`.
    pub fn subscribe(&self, user_id: Uuid) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        match self.inner.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.entry(user_id).or_default().insert(id, tx);
            }
            Err(e) => warn!("Subscriber lock poisoned, {} will receive nothing: {}", user_id, e),
        }
        debug!("Subscription {} opened for {}", id, user_id);

        Subscription {
            id,
            user_id,
            rx,
            cancel: CancellationToken::new(),
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every open subscription of `user_id`. Returns how
    /// many subscriptions received it.
    pub fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let Ok(mut subscribers) = self.inner.subscribers.write() else {
            warn!("Subscriber lock poisoned, dropping event for {}", user_id);
            return 0;
        };
        let Some(senders) = subscribers.get_mut(&user_id) else {
            return 0;
        };

        // Receivers that went away without unsubscribing are pruned here.
        senders.retain(|_, tx| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            subscribers.remove(&user_id);
        }
        delivered
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.subscription_count(user_id) > 0
    }

    pub fn subscription_count(&self, user_id: Uuid) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.get(&user_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

impl DispatcherInner {
    fn unsubscribe(&self, user_id: Uuid, id: Uuid) {
        let Ok(mut subscribers) = self.subscribers.write() else {
            return;
        };
        if let Some(senders) = subscribers.get_mut(&user_id) {
            senders.remove(&id);
            if senders.is_empty() {
                subscribers.remove(&user_id);
            }
        }
    }
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Token tied to this subscription's lifetime. Cancelling it makes `recv`
    /// return `None`.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once cancelled or the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.unsubscribe(self.user_id, self.id);
            debug!("Subscription {} released for {}", self.id, self.user_id);
        }
    }
}
