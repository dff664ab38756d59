use async_trait::async_trait;

use crate::error::TransportError;

/// Whatever actually makes sound.  Owned by the sync engine; nothing else
/// talks to it.
#[async_trait]
pub trait AudioTransport: Send {
    /// Start streaming (from the live edge) at `volume` in `0.0..=1.0`.
    async fn play(&mut self, volume: f32) -> Result<(), TransportError>;

    /// Stop streaming.
    async fn pause(&mut self) -> Result<(), TransportError>;

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError>;

    /// Release the backend for good.  Called once when the engine exits.
    async fn shutdown(&mut self) {}
}
