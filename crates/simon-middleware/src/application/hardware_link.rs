//! The hardware capability the interception engine drives.
//!
//! A transaction is two calls: [`HardwareLink::send`] hands the device a
//! challenge, [`HardwareLink::receive`] waits for its verdict. The engine
//! depends only on this trait. Production wires in
//! [`SerialLink`](crate::infrastructure::serial::SerialLink); tests record
//! calls or script verdicts. Hosts that prefer plain closures use [`FnLink`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use simon_core::{Challenge, Verdict};
use thiserror::Error;

/// Error type for hardware link calls.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("hardware link is not connected")]
    NotConnected,
    /// The device cannot be sent this challenge.
    #[error("challenge rejected: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(String),
    /// The task running a blocking call failed.
    #[error("link task failed: {0}")]
    Task(String),
}

/// Send/receive capability for one pattern device.
///
/// Calls for one transaction are never interleaved with another transaction's
/// calls; the engine's gate guarantees it.
#[async_trait]
pub trait HardwareLink: Send + Sync {
    /// Asks the device to play `challenge`.
    async fn send(&self, challenge: &Challenge) -> Result<(), LinkError>;

    /// Waits up to `timeout` for the device's verdict on the last challenge.
    ///
    /// A silent device yields `Ok(Verdict::Indeterminate)`, not an error.
    async fn receive(&self, timeout: Duration) -> Result<Verdict, LinkError>;
}

/// [`HardwareLink`] built from a pair of async closures.
///
/// ```rust
/// use std::time::Duration;
/// use simon_core::Verdict;
/// use simon_middleware::application::hardware_link::FnLink;
///
/// let link = FnLink::new(
///     |_challenge| async { Ok(()) },
///     |_timeout: Duration| async { Ok(Verdict::Success) },
/// );
/// # let _ = link;
/// ```
pub struct FnLink<S, R> {
    send_fn: S,
    receive_fn: R,
}

impl<S, R> FnLink<S, R> {
    pub fn new<SF, RF>(send_fn: S, receive_fn: R) -> Self
    where
        S: Fn(Challenge) -> SF,
        SF: Future<Output = Result<(), LinkError>>,
        R: Fn(Duration) -> RF,
        RF: Future<Output = Result<Verdict, LinkError>>,
    {
        Self {
            send_fn,
            receive_fn,
        }
    }
}

#[async_trait]
impl<S, SF, R, RF> HardwareLink for FnLink<S, R>
where
    S: Fn(Challenge) -> SF + Send + Sync + 'static,
    SF: Future<Output = Result<(), LinkError>> + Send + 'static,
    R: Fn(Duration) -> RF + Send + Sync + 'static,
    RF: Future<Output = Result<Verdict, LinkError>> + Send + 'static,
{
    async fn send(&self, challenge: &Challenge) -> Result<(), LinkError> {
        (self.send_fn)(challenge.clone()).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Verdict, LinkError> {
        (self.receive_fn)(timeout).await
    }
}
