//! Channel error types.

use thiserror::Error;

use crate::noise::NoiseError;
use crate::ratchet::RatchetError;

/// Errors produced by the spool service transport.
///
/// These wrap whatever failed between us and the remote provider; the
/// channel layers propagate them verbatim so the caller can decide
/// whether to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpoolError {
    /// The request never completed (connection loss, timeout, mixnet drop).
    #[error("spool transport failure: {0}")]
    Transport(String),

    /// The provider refused the request outright.
    #[error("spool request rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur during channel operations.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Underlying spool service failed.
    #[error(transparent)]
    Spool(#[from] SpoolError),

    /// The spool service answered with a non-OK status. The read offset is
    /// not advanced, so a later retry observes the same message index.
    #[error("spool returned status {0:?}")]
    SpoolStatus(String),

    /// Message exceeds the payload budget for this layer.
    #[error("message of {len} bytes exceeds the {max} byte payload budget")]
    MessageTooLarge {
        /// Length of the rejected message.
        len: usize,
        /// Maximum accepted at this layer.
        max: usize,
    },

    /// A remote writer half is already installed.
    #[error("remote writer already installed")]
    WriterAlreadyInstalled,

    /// The operation needs a remote writer descriptor that has not been
    /// installed yet.
    #[error("no remote writer installed")]
    WriterMissing,

    /// The message decrypted correctly but was authored by a static key
    /// other than the installed remote key.
    #[error("message was encrypted by an unexpected peer key")]
    UnexpectedPeerKey,

    /// One-shot handshake encryption or decryption failed.
    #[error(transparent)]
    Noise(#[from] NoiseError),

    /// Ratchet session failure.
    #[error(transparent)]
    Ratchet(#[from] RatchetError),

    /// A saved channel blob could not be encoded or decoded.
    #[error("channel state serialization failed: {0}")]
    Serialization(String),
}
