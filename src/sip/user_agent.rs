//! SIP User Agent
//!
//! [`SignalingEngine`] is the single command entry point of the softphone. It owns the
//! registration and call state machines, routes transport and media events to them and
//! fans every transition out to observers.
//!
//! All state lives behind one async mutex, so state-machine logic never runs in parallel.
//! The lock is released only while local audio is being acquired for a call, which is how
//! a `hangup()` issued mid-acquisition still reaches a deterministic terminal state.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::call::{validate_dtmf, CallDirection, CallMachine, CallSession, CallSnapshot, CallState};
use super::config::UserAgentConfig;
use super::events::{Notification, NotificationHub, NotificationKind, Subscription};
use super::media::{LocalStream, MediaError, MediaEvent, MediaGateway};
use super::registration::{RegistrationMachine, RegistrationState};
use super::transport::{ConnectionHandle, SignalingRequest, TransportAdapter, TransportEvent};
use super::SipError;

/// SIP status sent when a second call arrives while one is in progress
const STATUS_BUSY_HERE: u16 = 486;
/// SIP status sent when the user declines a ringing call
const STATUS_DECLINE: u16 = 603;
/// SIP status sent when a ringing call is dropped locally for any other reason
const STATUS_TEMPORARILY_UNAVAILABLE: u16 = 480;

/// Input for the engine's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    Transport(TransportEvent),
    Media(MediaEvent),
}

/// Why a session is being torn down
#[derive(Debug, Clone, PartialEq, Eq)]
enum EndReason {
    /// Local hangup, replacement or unregistration
    Local,
    /// User declined a ringing call
    Rejected,
    /// Local media could not be set up
    MediaFailure,
    /// Remote party or network ended the session
    RemoteEnded(String),
    /// Session failed remotely
    RemoteFailed(String),
}

struct EngineInner {
    config: Option<UserAgentConfig>,
    registration: RegistrationMachine,
    call: CallMachine,
    connection: Option<ConnectionHandle>,
}

impl EngineInner {
    fn debug(&self) -> bool {
        self.config.as_ref().map(|c| c.debug).unwrap_or(false)
    }
}

/// Softphone signaling engine
pub struct SignalingEngine {
    /// Signaling transport
    transport: Arc<dyn TransportAdapter>,
    /// Audio devices and peer sessions
    media: Arc<dyn MediaGateway>,
    /// Both state machines and the configuration
    inner: Mutex<EngineInner>,
    /// Observer fan-out
    events: NotificationHub,
}

impl SignalingEngine {
    /// Create an engine with injected transport and media implementations
    pub fn new(transport: Arc<dyn TransportAdapter>, media: Arc<dyn MediaGateway>) -> Self {
        Self {
            transport,
            media,
            inner: Mutex::new(EngineInner {
                config: None,
                registration: RegistrationMachine::default(),
                call: CallMachine::default(),
                connection: None,
            }),
            events: NotificationHub::default(),
        }
    }

    /// Subscribe to all future notifications
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Register a callback for one kind of notification
    pub fn on<F>(&self, kind: NotificationKind, handler: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.events.on(kind, handler);
    }

    /// Get current registration state
    pub async fn registration_state(&self) -> RegistrationState {
        self.inner.lock().await.registration.state()
    }

    /// Get current call state
    pub async fn call_state(&self) -> CallState {
        self.inner.lock().await.call.state()
    }

    /// Snapshot of the current call
    pub async fn session(&self) -> Option<CallSnapshot> {
        self.inner.lock().await.call.snapshot()
    }

    /// Get the configuration
    pub async fn config(&self) -> Option<UserAgentConfig> {
        self.inner.lock().await.config.clone()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Adopt a new configuration, tearing down any active agent first
    pub async fn configure(&self, config: UserAgentConfig) -> Result<(), SipError> {
        config.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.registration.state() != RegistrationState::Unregistered
            || inner.connection.is_some()
        {
            tracing::info!("Replacing configuration of an active user agent");
            self.unregister_locked(&mut inner).await;
        }

        tracing::info!("User agent configured: {}", config.aor());
        inner.config = Some(config);
        Ok(())
    }

    /// Register with the configured registrar
    pub async fn register(&self) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        let config = inner.config.clone().ok_or(SipError::NotConfigured)?;
        inner.registration.check_can_register()?;

        if config.media_preflight {
            // Nothing is sent if the agent could not answer a call anyway
            match self.media.acquire_local_audio().await {
                Ok(stream) => self.media.release_local_audio(stream).await,
                Err(e) => {
                    tracing::warn!("Registration aborted, microphone unavailable: {}", e);
                    return Err(e.into());
                }
            }
        }

        let previous = inner.registration.begin()?;
        self.emit_registration(previous, RegistrationState::Registering);

        if inner.connection.is_none() {
            match self.transport.open(&config.ws_uri).await {
                Ok(connection) => {
                    tracing::info!("Signaling transport open: {}", connection.endpoint);
                    inner.connection = Some(connection);
                }
                Err(e) => {
                    let cause = e.to_string();
                    self.fail_registration(&mut inner, &cause);
                    return Err(SipError::RegistrationFailed(cause));
                }
            }
        }

        tracing::info!(
            "Attempting SIP REGISTER to {} (expires {}s)",
            config.registrar_uri(),
            config.register_expires
        );

        let request = SignalingRequest::Register {
            aor: config.aor(),
            registrar: config.registrar_uri(),
            expires: config.register_expires,
            authorization_user: config.authorization_user.clone(),
            password: config.password.clone(),
            display_name: config.display_name.clone(),
            user_agent: config.user_agent.clone(),
        };
        if let Err(e) = self.send(config.debug, request).await {
            let cause = e.to_string();
            self.fail_registration(&mut inner, &cause);
            return Err(SipError::RegistrationFailed(cause));
        }

        Ok(())
    }

    /// Unregister and close the transport. Does not wait for the registrar.
    pub async fn unregister(&self) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        self.unregister_locked(&mut inner).await;
        Ok(())
    }

    async fn unregister_locked(&self, inner: &mut EngineInner) {
        if inner.call.has_session() {
            self.end_session(inner, EndReason::Local).await;
        }

        if inner.connection.take().is_some() {
            if matches!(
                inner.registration.state(),
                RegistrationState::Registered | RegistrationState::Registering
            ) {
                if let Err(e) = self.send(inner.debug(), SignalingRequest::Unregister).await {
                    tracing::warn!("Unregister request not sent: {}", e);
                }
            }
            self.transport.close().await;
            tracing::info!("Signaling transport closed");
        }

        if let Some(previous) = inner.registration.reset() {
            self.emit_registration(previous, RegistrationState::Unregistered);
        }
    }

    /// Hang up any call and unregister
    pub async fn shutdown(&self) {
        tracing::info!("SIP user agent shutting down");
        let mut inner = self.inner.lock().await;
        self.unregister_locked(&mut inner).await;
    }

    fn fail_registration(&self, inner: &mut EngineInner, cause: &str) {
        if let Some(previous) = inner.registration.on_failed() {
            tracing::error!("Registration failed: {}", cause);
            self.emit_registration(previous, RegistrationState::Failed);
            self.events.emit(Notification::RegistrationFailed {
                cause: cause.to_string(),
            });
        }
    }

    // ========================================================================
    // Call control
    // ========================================================================

    /// Place an outbound call, replacing any existing one
    pub async fn call(&self, destination: &str) -> Result<Uuid, SipError> {
        let mut inner = self.inner.lock().await;
        let (config, target) = loop {
            let config = inner.config.clone().ok_or(SipError::NotConfigured)?;
            if !inner.registration.is_registered() {
                return Err(SipError::NotRegistered);
            }
            let target = config.target_uri(destination)?;
            if !inner.call.has_session() {
                break (config, target);
            }

            tracing::info!("Replacing current call before dialing {}", target);
            let pending = inner.call.session().and_then(|s| s.acquisition.clone());
            self.end_session(&mut inner, EndReason::Local).await;

            // The old session may still be acquiring; its device must be gone first
            if let Some(pending) = pending.filter(|p| !p.is_cancelled()) {
                drop(inner);
                pending.cancelled().await;
                inner = self.inner.lock().await;
            }
        };

        let mut session = CallSession::new_outbound(target.clone());
        let session_id = session.id;
        let cancel = session.cancel.clone();
        let settled = CancellationToken::new();
        session.acquisition = Some(settled.clone());
        let previous = inner.call.start(session)?;
        self.emit_call(session_id, previous, CallState::Connecting);

        tracing::info!("Dialing: {} -> {} (session {})", config.aor(), target, session_id);

        drop(inner);
        let _settled = settled.drop_guard();
        let acquired = self.acquire_for_session(session_id, &cancel).await?;
        let mut inner = self.inner.lock().await;

        let stream = match self.reclaim(&mut inner, session_id, &cancel, acquired).await? {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Call {} - local audio unavailable: {}", session_id, e);
                self.end_session(&mut inner, EndReason::MediaFailure).await;
                return Err(e);
            }
        };

        let created = match inner.call.current(session_id) {
            Some(session) => {
                let stream = session.local_stream.insert(stream);
                self.media
                    .create_session(stream, &target, &config.ice_servers)
                    .await
            }
            None => return Err(SipError::CallCancelled),
        };
        let peer = match created {
            Ok(peer) => peer,
            Err(e) => {
                tracing::error!("Call {} - peer session not created: {}", session_id, e);
                self.end_session(&mut inner, EndReason::MediaFailure).await;
                return Err(e.into());
            }
        };
        if let Some(session) = inner.call.current(session_id) {
            session.peer = Some(peer);
        }

        let request = SignalingRequest::Invite {
            session_id,
            target: target.clone(),
            display_name: config.display_name.clone(),
        };
        if let Err(e) = self.send(config.debug, request).await {
            tracing::error!("Call {} INVITE error: {}", session_id, e);
            self.end_session(&mut inner, EndReason::MediaFailure).await;
            return Err(SipError::CallFailed(e.to_string()));
        }
        if let Some(session) = inner.call.current(session_id) {
            session.signaling_started = true;
        }

        Ok(session_id)
    }

    /// Answer the ringing inbound call
    pub async fn answer(&self) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        let config = inner.config.clone().ok_or(SipError::NotConfigured)?;
        let state = inner.call.state();

        let settled = CancellationToken::new();
        let (session_id, cancel, remote_uri) = match inner.call.session_mut() {
            Some(session)
                if session.direction == CallDirection::Inbound
                    && state == CallState::Progressing
                    && !session.answering =>
            {
                session.answering = true;
                session.acquisition = Some(settled.clone());
                (session.id, session.cancel.clone(), session.remote_uri.clone())
            }
            _ => return Err(SipError::NoIncomingSession),
        };

        let previous = inner.call.transition(CallState::Connecting)?;
        self.emit_call(session_id, previous, CallState::Connecting);
        tracing::info!("Answering call {} from {}", session_id, remote_uri);

        drop(inner);
        let _settled = settled.drop_guard();
        let acquired = self.acquire_for_session(session_id, &cancel).await?;
        let mut inner = self.inner.lock().await;

        let stream = match self.reclaim(&mut inner, session_id, &cancel, acquired).await? {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Call {} - cannot answer, local audio unavailable: {}", session_id, e);
                self.end_session(&mut inner, EndReason::MediaFailure).await;
                return Err(e);
            }
        };

        let created = match inner.call.current(session_id) {
            Some(session) => {
                let stream = session.local_stream.insert(stream);
                self.media
                    .create_session(stream, &remote_uri, &config.ice_servers)
                    .await
            }
            None => return Err(SipError::CallCancelled),
        };
        let peer = match created {
            Ok(peer) => peer,
            Err(e) => {
                tracing::error!("Call {} - peer session not created: {}", session_id, e);
                self.end_session(&mut inner, EndReason::MediaFailure).await;
                return Err(e.into());
            }
        };
        if let Some(session) = inner.call.current(session_id) {
            session.peer = Some(peer);
        }

        if let Err(e) = self.send(config.debug, SignalingRequest::Answer { session_id }).await {
            tracing::error!("Call {} answer error: {}", session_id, e);
            self.end_session(&mut inner, EndReason::MediaFailure).await;
            return Err(SipError::CallFailed(e.to_string()));
        }
        if let Some(session) = inner.call.current(session_id) {
            session.answer_sent = true;
        }

        Ok(())
    }

    /// Decline the ringing inbound call
    pub async fn reject(&self) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        let state = inner.call.state();

        match inner.call.session() {
            Some(session)
                if session.direction == CallDirection::Inbound
                    && state == CallState::Progressing
                    && !session.answering =>
            {
                tracing::info!("Rejecting call {}", session.id);
            }
            _ => return Err(SipError::NoIncomingSession),
        }

        self.end_session(&mut inner, EndReason::Rejected).await;
        Ok(())
    }

    /// Hang up the current call. A no-op when there is none.
    pub async fn hangup(&self) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        if !inner.call.has_session() {
            tracing::debug!("Hangup requested with no call in progress");
            return Ok(());
        }
        self.end_session(&mut inner, EndReason::Local).await;
        Ok(())
    }

    /// Put the call on hold or resume it
    pub async fn hold(&self, enable: bool) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        let debug = inner.debug();
        let state = inner.call.state();

        let session_id = match inner.call.session() {
            Some(session) if state.is_active() => {
                if session.on_hold == enable {
                    return Ok(());
                }
                session.id
            }
            _ => return Err(SipError::NoActiveCall),
        };

        let (request, next) = if enable {
            (SignalingRequest::Hold { session_id }, CallState::Hold)
        } else {
            (SignalingRequest::Unhold { session_id }, CallState::Established)
        };
        self.send(debug, request).await?;

        if let Some(session) = inner.call.current(session_id) {
            session.on_hold = enable;
        }
        let previous = inner.call.transition(next)?;
        self.emit_call(session_id, previous, next);
        Ok(())
    }

    /// Mute or unmute the local microphone without renegotiating
    pub async fn mute(&self, enable: bool) -> Result<(), SipError> {
        let mut inner = self.inner.lock().await;
        let state = inner.call.state();

        let session = match inner.call.session_mut() {
            Some(session) if state.is_active() => session,
            _ => return Err(SipError::NoActiveCall),
        };
        if session.muted == enable {
            return Ok(());
        }

        if let Some(stream) = session.local_stream.as_ref() {
            self.media.set_local_audio_enabled(stream, !enable).await;
        }
        session.muted = enable;
        let session_id = session.id;

        tracing::info!("Call {} - {}", session_id, if enable { "muted" } else { "unmuted" });
        self.events.emit(Notification::Mute {
            session_id,
            muted: enable,
        });
        Ok(())
    }

    /// Send a DTMF digit on the established call
    pub async fn send_digit(&self, symbol: char) -> Result<(), SipError> {
        let inner = self.inner.lock().await;
        let session_id = match inner.call.session() {
            Some(session) if inner.call.state() == CallState::Established => session.id,
            _ => return Err(SipError::NoActiveCall),
        };
        let digit = validate_dtmf(symbol)?;
        let dtmf = inner.config.as_ref().map(|c| c.dtmf).unwrap_or_default();

        self.send(
            inner.debug(),
            SignalingRequest::Dtmf {
                session_id,
                digit,
                duration_ms: dtmf.duration_ms,
                inter_tone_gap_ms: dtmf.inter_tone_gap_ms,
            },
        )
        .await
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    /// Drive the engine from a channel until it closes or `shutdown` fires
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<EngineInput>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Signaling event loop cancelled");
                        break;
                    }
                    input = rx.recv() => match input {
                        Some(EngineInput::Transport(event)) => self.handle_transport_event(event).await,
                        Some(EngineInput::Media(event)) => self.handle_media_event(event).await,
                        None => {
                            tracing::debug!("Signaling event channel closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Route a transport or signaling event
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        let mut inner = self.inner.lock().await;
        if inner.debug() {
            tracing::debug!("SIP << {:?}", event);
        } else {
            tracing::trace!("SIP << {:?}", event);
        }

        match event {
            TransportEvent::Connected => {
                tracing::info!("Signaling transport connected");
            }
            TransportEvent::Disconnected { reason } => {
                tracing::warn!("Signaling transport disconnected: {}", reason);
                self.fail_registration(&mut inner, &format!("Transport disconnected: {}", reason));
            }
            TransportEvent::Registered => {
                if let Some(previous) = inner.registration.on_registered() {
                    tracing::info!("SIP registration successful");
                    self.emit_registration(previous, RegistrationState::Registered);
                } else {
                    tracing::debug!("SIP registration refreshed");
                }
            }
            TransportEvent::RegistrationFailed { cause } => {
                self.fail_registration(&mut inner, &cause);
            }
            TransportEvent::ReRegistrationFailed { cause } => {
                self.fail_registration(&mut inner, &format!("Re-registration failed: {}", cause));
            }
            TransportEvent::Unregistered => {
                if let Some(previous) = inner.registration.on_unregistered() {
                    tracing::warn!("Registrar removed our binding");
                    self.emit_registration(previous, RegistrationState::Unregistered);
                }
            }
            TransportEvent::IncomingSession {
                session_id,
                remote_uri,
                display_name,
            } => {
                self.on_incoming_session(&mut inner, session_id, remote_uri, display_name)
                    .await;
            }
            TransportEvent::Progress { session_id } => {
                if inner.call.is_current(session_id) && inner.call.state() == CallState::Connecting {
                    tracing::info!("Call {} - Progress (Ringing)", session_id);
                    self.move_call(&mut inner, session_id, CallState::Progressing);
                }
            }
            TransportEvent::Accepted { session_id } => {
                if inner.call.is_current(session_id) {
                    tracing::info!("Call {} - Accepted", session_id);
                }
            }
            TransportEvent::Confirmed { session_id } => {
                self.on_confirmed(&mut inner, session_id).await;
            }
            TransportEvent::Ended { session_id, cause } => {
                if inner.call.is_current(session_id) {
                    self.end_session(&mut inner, EndReason::RemoteEnded(cause)).await;
                }
            }
            TransportEvent::Failed { session_id, cause } => {
                if inner.call.is_current(session_id) {
                    self.end_session(&mut inner, EndReason::RemoteFailed(cause)).await;
                }
            }
            TransportEvent::DtmfReceived { session_id, digit } => {
                if inner.call.is_current(session_id) {
                    self.events
                        .emit(Notification::DtmfReceived { session_id, digit });
                }
            }
        }
    }

    /// Route a media gateway event
    pub async fn handle_media_event(&self, event: MediaEvent) {
        let mut inner = self.inner.lock().await;
        match event {
            MediaEvent::RemoteTrackAvailable { peer, stream } => {
                let Some(session) = inner.call.session_mut() else {
                    return;
                };
                if session.peer != Some(peer) || session.remote_stream == Some(stream) {
                    return;
                }
                session.remote_stream = Some(stream);
                let session_id = session.id;
                tracing::info!("Call {} - remote stream available", session_id);
                self.events
                    .emit(Notification::RemoteStream { session_id, stream });
            }
        }
    }

    async fn on_incoming_session(
        &self,
        inner: &mut EngineInner,
        session_id: Uuid,
        remote_uri: String,
        display_name: Option<String>,
    ) {
        if inner.call.has_session() {
            tracing::info!(
                "Rejecting concurrent incoming call {} from {} (busy)",
                session_id,
                remote_uri
            );
            let request = SignalingRequest::Reject {
                session_id,
                status: STATUS_BUSY_HERE,
            };
            if let Err(e) = self.send(inner.debug(), request).await {
                tracing::warn!("Busy rejection not sent: {}", e);
            }
            return;
        }

        if !inner.registration.is_registered() {
            tracing::warn!("Incoming call {} while not registered", session_id);
        }

        let session = CallSession::new_inbound(session_id, remote_uri, display_name.clone());
        let number = session.remote_number();
        let previous = match inner.call.start(session) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::error!("Incoming call {} not adopted: {}", session_id, e);
                return;
            }
        };
        self.emit_call(session_id, previous, CallState::Connecting);
        self.move_call(inner, session_id, CallState::Progressing);

        tracing::info!("Incoming call {} from {}", session_id, number);
        self.events.emit(Notification::IncomingCall {
            session_id,
            display_name,
            number,
        });
    }

    async fn on_confirmed(&self, inner: &mut EngineInner, session_id: Uuid) {
        if !inner.call.is_current(session_id)
            || !matches!(inner.call.state(), CallState::Connecting | CallState::Progressing)
        {
            return;
        }
        let answered = inner
            .call
            .session()
            .map(|s| s.direction == CallDirection::Outbound || s.answer_sent)
            .unwrap_or(false);
        if !answered {
            tracing::warn!("Call {} - confirmation for an unanswered call ignored", session_id);
            return;
        }
        tracing::info!("Call {} - Confirmed", session_id);

        // The remote stream must be exposed no later than Established
        let pending_peer = inner
            .call
            .session()
            .filter(|s| s.remote_stream.is_none())
            .and_then(|s| s.peer);
        if let Some(peer) = pending_peer {
            if let Some(stream) = self.media.remote_stream(&peer).await {
                if let Some(session) = inner.call.current(session_id) {
                    session.remote_stream = Some(stream);
                }
                self.events
                    .emit(Notification::RemoteStream { session_id, stream });
            }
        }

        self.move_call(inner, session_id, CallState::Established);
        self.apply_codec_preference(inner).await;
    }

    /// Move the preferred codec to the front of the outbound parameters. Never fails the call.
    async fn apply_codec_preference(&self, inner: &mut EngineInner) {
        let preference = inner.config.as_ref().and_then(|c| c.codec_preference.clone());
        let Some(session) = inner.call.session_mut() else {
            return;
        };
        if session.codec_applied {
            return;
        }
        session.codec_applied = true;

        let (Some(preference), Some(peer)) = (preference, session.peer) else {
            return;
        };
        let session_id = session.id;

        let params = match self.media.outbound_audio_parameters(&peer).await {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!("Call {} - codec preference skipped: {}", session_id, e);
                return;
            }
        };

        match preference.reorder(&params) {
            Some(reordered) => {
                match self.media.set_outbound_audio_parameters(&peer, reordered).await {
                    Ok(()) => tracing::info!("Call {} - preferred codec {} applied", session_id, preference.name),
                    Err(e) => tracing::warn!("Call {} - codec preference not applied: {}", session_id, e),
                }
            }
            None => tracing::debug!(
                "Call {} - codec {} absent or already first",
                session_id,
                preference.name
            ),
        }
    }

    // ========================================================================
    // Session teardown
    // ========================================================================

    /// Acquire local audio for a session, abandoning the attempt as soon as the session is
    /// torn down. The outer error means the session is gone; the inner one is the gateway's.
    async fn acquire_for_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Result<LocalStream, MediaError>, SipError> {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Call {} - cancelled during media acquisition", session_id);
                return Err(SipError::CallCancelled);
            }
            acquired = self.media.acquire_local_audio() => acquired,
        };

        if cancel.is_cancelled() {
            tracing::info!("Call {} - cancelled during media acquisition", session_id);
            if let Ok(stream) = acquired {
                self.media.release_local_audio(stream).await;
            }
            return Err(SipError::CallCancelled);
        }
        Ok(acquired)
    }

    /// Take back the engine lock after a suspended acquisition.
    ///
    /// If the session was torn down while the lock was being retaken, the freshly acquired
    /// stream has no owner and is released here.
    async fn reclaim(
        &self,
        inner: &mut EngineInner,
        session_id: Uuid,
        cancel: &CancellationToken,
        acquired: Result<LocalStream, MediaError>,
    ) -> Result<Result<LocalStream, SipError>, SipError> {
        if cancel.is_cancelled() || !inner.call.is_current(session_id) {
            tracing::info!("Call {} - cancelled during media acquisition", session_id);
            if let Ok(stream) = acquired {
                self.media.release_local_audio(stream).await;
            }
            return Err(SipError::CallCancelled);
        }
        Ok(acquired.map_err(SipError::from))
    }

    /// Tear down the current session: Terminating -> Terminated -> Idle.
    ///
    /// Every exit path of a session goes through here, so the capture device is released
    /// exactly once and never outlives the session.
    async fn end_session(&self, inner: &mut EngineInner, reason: EndReason) {
        let Some(session_id) = inner.call.session().map(|s| s.id) else {
            return;
        };
        let debug = inner.debug();

        if let EndReason::RemoteFailed(cause) = &reason {
            tracing::warn!("Call {} failed: {}", session_id, cause);
            self.events.emit(Notification::CallFailed {
                session_id,
                cause: cause.clone(),
            });
        }

        if inner.call.state() != CallState::Terminating {
            self.move_call(inner, session_id, CallState::Terminating);
        }

        let Some(mut session) = inner.call.take_session() else {
            return;
        };
        session.cancel.cancel();

        if let Some(request) = termination_request(&session, &reason) {
            if let Err(e) = self.send(debug, request).await {
                tracing::warn!("Call {} - termination request not sent: {}", session_id, e);
            }
        }

        if let Some(peer) = session.peer.take() {
            self.media.close_session(peer).await;
        }
        if let Some(stream) = session.local_stream.take() {
            self.media.release_local_audio(stream).await;
        }

        match &reason {
            EndReason::RemoteEnded(cause) => tracing::info!("Call {} ended: {}", session_id, cause),
            EndReason::RemoteFailed(_) => {}
            other => tracing::info!("SIP call ended: {} ({:?})", session_id, other),
        }

        self.move_call(inner, session_id, CallState::Terminated);
        self.move_call(inner, session_id, CallState::Idle);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn send(&self, debug: bool, request: SignalingRequest) -> Result<(), SipError> {
        if debug {
            tracing::debug!("SIP >> {}", request.name());
        } else {
            tracing::trace!("SIP >> {}", request.name());
        }
        self.transport.send(request).await.map_err(SipError::from)
    }

    /// Apply a call transition and notify
    fn move_call(&self, inner: &mut EngineInner, session_id: Uuid, next: CallState) {
        match inner.call.transition(next) {
            Ok(previous) => self.emit_call(session_id, previous, next),
            Err(e) => tracing::warn!("Call {} - {}", session_id, e),
        }
    }

    fn emit_call(&self, session_id: Uuid, previous: CallState, current: CallState) {
        tracing::debug!("Call {} - {} -> {}", session_id, previous, current);
        self.events.emit(Notification::CallStateChanged {
            session_id,
            previous,
            current,
        });
    }

    fn emit_registration(&self, previous: RegistrationState, current: RegistrationState) {
        tracing::info!("Registration {} -> {}", previous, current);
        self.events
            .emit(Notification::RegistrationStateChanged { previous, current });
    }
}

/// Signaling needed to end a session locally, if any
fn termination_request(session: &CallSession, reason: &EndReason) -> Option<SignalingRequest> {
    let session_id = session.id;
    let status = match reason {
        EndReason::RemoteEnded(_) | EndReason::RemoteFailed(_) => return None,
        EndReason::Rejected => STATUS_DECLINE,
        EndReason::Local | EndReason::MediaFailure => STATUS_TEMPORARILY_UNAVAILABLE,
    };

    if !session.signaling_started {
        return None;
    }

    match session.direction {
        CallDirection::Inbound if !session.answer_sent => {
            Some(SignalingRequest::Reject { session_id, status })
        }
        CallDirection::Outbound if session.connected_at.is_none() => {
            Some(SignalingRequest::Cancel { session_id })
        }
        _ => Some(SignalingRequest::Bye { session_id }),
    }
}
