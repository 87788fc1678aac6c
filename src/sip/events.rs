//! Engine notifications and observer fan-out
//!
//! Every subscriber gets every notification emitted after it subscribed, in emission order.
//! Subscriber queues are unbounded so a slow UI never causes a transition to be dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::call::CallState;
use super::media::RemoteStreamId;
use super::registration::RegistrationState;

/// Engine-level notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Registration state changed
    RegistrationStateChanged {
        previous: RegistrationState,
        current: RegistrationState,
    },
    /// Registrar rejected us or the transport failed
    RegistrationFailed { cause: String },
    /// Call state changed
    CallStateChanged {
        session_id: Uuid,
        previous: CallState,
        current: CallState,
    },
    /// Incoming call is ringing
    IncomingCall {
        session_id: Uuid,
        display_name: Option<String>,
        number: String,
    },
    /// Remote audio is available
    RemoteStream {
        session_id: Uuid,
        stream: RemoteStreamId,
    },
    /// Local audio muted or unmuted
    Mute { session_id: Uuid, muted: bool },
    /// DTMF digit received
    DtmfReceived { session_id: Uuid, digit: char },
    /// Call failed
    CallFailed { session_id: Uuid, cause: String },
}

/// Discriminant of a [`Notification`], used for filtered handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    RegistrationStateChanged,
    RegistrationFailed,
    CallStateChanged,
    IncomingCall,
    RemoteStream,
    Mute,
    DtmfReceived,
    CallFailed,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::RegistrationStateChanged { .. } => NotificationKind::RegistrationStateChanged,
            Notification::RegistrationFailed { .. } => NotificationKind::RegistrationFailed,
            Notification::CallStateChanged { .. } => NotificationKind::CallStateChanged,
            Notification::IncomingCall { .. } => NotificationKind::IncomingCall,
            Notification::RemoteStream { .. } => NotificationKind::RemoteStream,
            Notification::Mute { .. } => NotificationKind::Mute,
            Notification::DtmfReceived { .. } => NotificationKind::DtmfReceived,
            Notification::CallFailed { .. } => NotificationKind::CallFailed,
        }
    }
}

/// Receiving end of a subscription
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    /// Wait for the next notification; `None` once the engine is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Next notification if one is already queued
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            drained.push(notification);
        }
        drained
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<Notification> {
        UnboundedReceiverStream::new(self.rx)
    }
}

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Fan-out to subscriptions and filtered callbacks
#[derive(Default)]
pub(crate) struct NotificationHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Notification>>>,
    handlers: Mutex<Vec<(NotificationKind, Handler)>>,
}

impl NotificationHub {
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        Subscription { rx }
    }

    pub fn on<F>(&self, kind: NotificationKind, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        lock(&self.handlers).push((kind, Arc::new(handler)));
    }

    pub fn emit(&self, notification: Notification) {
        tracing::debug!("Notification: {:?}", notification);

        // Handlers run outside the lock so they may register more handlers
        let handlers: Vec<Handler> = lock(&self.handlers)
            .iter()
            .filter(|(kind, _)| *kind == notification.kind())
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&notification);
        }

        lock(&self.subscribers).retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// Lock a hub list, recovering it if a panicking thread poisoned the mutex
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Notification hub lock poisoned, recovering");
        poisoned.into_inner()
    })
}
