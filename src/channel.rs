//! The channel capability shared by every layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::spool::SpoolService;
use crate::USER_FORWARD_PAYLOAD_LENGTH;

/// A unidirectional-pairable communication channel over a remote spool.
///
/// Each layer (spool, noise, double ratchet) implements this same
/// capability and composes by containment: a higher layer owns its lower
/// channel and delegates transport to it. A channel is open for reading as
/// soon as it is constructed and open for writing once a peer's writer
/// descriptor has been installed.
///
/// Channels are unreliable: the mixnet below the spool service may drop or
/// reorder packets, and nothing here retransmits.
///
/// A channel instance is single-task state. It is not internally locked and
/// must not be shared by concurrent tasks without external synchronization.
#[async_trait]
pub trait Channel: Sized {
    /// Out-of-band bundle a peer needs to send messages to this channel.
    type Descriptor;

    /// Bytes of envelope and crypto overhead this layer and everything
    /// below it add around a message on the wire.
    const OVERHEAD: usize;

    /// Largest message `write` accepts at this layer.
    fn max_message_len() -> usize {
        USER_FORWARD_PAYLOAD_LENGTH - Self::OVERHEAD
    }

    /// Descriptor of the local reader half, for the peer to install.
    fn writer_descriptor(&self) -> Self::Descriptor;

    /// Install the peer's writer descriptor. Installing twice is an error;
    /// to talk to a different peer, build a new channel.
    fn with_remote_writer(&mut self, descriptor: Self::Descriptor) -> Result<(), ChannelError>;

    /// Send one message to the peer.
    async fn write(&mut self, message: &[u8]) -> Result<(), ChannelError>;

    /// Receive the next unread message from the local spool.
    async fn read(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Serialize all persistent state to a CBOR blob. The blob contains
    /// long-term secrets; protecting it at rest is the caller's job.
    fn save(&self) -> Result<Vec<u8>, ChannelError>;

    /// Rebuild a channel from a saved blob, rebinding the spool service
    /// handle (which is never serialized).
    fn load(blob: &[u8], spool: Arc<dyn SpoolService>) -> Result<Self, ChannelError>;
}
