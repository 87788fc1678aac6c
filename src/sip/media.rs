//! Media gateway capability interface
//!
//! The softphone never touches audio devices or peer connections directly. A gateway
//! (browser media API, native audio stack, or a test double) acquires capture devices and
//! owns peer media sessions; the engine holds handles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::codec::AudioParameters;
use super::config::IceServer;

/// Media gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Microphone access denied: {0}")]
    AccessDenied(String),

    #[error("Peer session error: {0}")]
    Session(String),

    #[error("Audio parameters unavailable: {0}")]
    Parameters(String),
}

/// Owned local capture stream.
///
/// Not `Clone`: handing it back to [`MediaGateway::release_local_audio`]
/// consumes it, so a stream can be stopped at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct LocalStream {
    id: Uuid,
}

impl LocalStream {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for LocalStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a peer media session owned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle(pub Uuid);

impl PeerHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Lookup handle for a remote stream; the gateway owns the stream itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteStreamId(pub Uuid);

impl RemoteStreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RemoteStreamId {
    fn default() -> Self {
        Self::new()
    }
}

/// Asynchronous media notifications fed back into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A remote audio track arrived on a peer session
    RemoteTrackAvailable {
        peer: PeerHandle,
        stream: RemoteStreamId,
    },
}

#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Acquire the local microphone.
    ///
    /// The engine drops this future when the owning call is torn down first. Implementations
    /// must then release any device they had already opened.
    async fn acquire_local_audio(&self) -> Result<LocalStream, MediaError>;

    /// Stop every track of a local stream
    async fn release_local_audio(&self, stream: LocalStream);

    /// Enable or disable local audio tracks without renegotiation
    async fn set_local_audio_enabled(&self, stream: &LocalStream, enabled: bool);

    /// Create a peer media session for a call
    async fn create_session(
        &self,
        local: &LocalStream,
        remote_target: &str,
        ice_servers: &[IceServer],
    ) -> Result<PeerHandle, MediaError>;

    /// Tear down a peer media session
    async fn close_session(&self, peer: PeerHandle);

    /// Remote stream currently attached to a peer session, if any
    async fn remote_stream(&self, peer: &PeerHandle) -> Option<RemoteStreamId>;

    /// Negotiated parameters of the outbound audio direction
    async fn outbound_audio_parameters(&self, peer: &PeerHandle) -> Result<AudioParameters, MediaError>;

    /// Apply a new outbound audio parameter set
    async fn set_outbound_audio_parameters(
        &self,
        peer: &PeerHandle,
        params: AudioParameters,
    ) -> Result<(), MediaError>;
}
