//! Forward-secret channel over any lower channel layer.
//!
//! Wraps a lower channel (spool, or noise-over-spool) with the session
//! ratchet. Plaintexts are packed into a fixed-size frame before
//! encryption, so every ciphertext this layer emits has the same length
//! regardless of the message inside it — the spool operator learns nothing
//! about message sizes, and the result always fits the Sphinx payload
//! budget.
//!
//! Frame layout: `[len u32 BE][message][zero padding to frame size]`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::codec::{from_cbor, to_cbor};
use crate::error::ChannelError;
use crate::ratchet::{Ratchet, RatchetError, RATCHET_OVERHEAD};
use crate::spool::SpoolService;
use crate::USER_FORWARD_PAYLOAD_LENGTH;

/// Bytes reserved at the head of each frame for the message length.
const FRAME_LENGTH_PREFIX: usize = 4;

/// Saved form: the lower channel's blob and the ratchet state blob.
#[derive(Serialize, Deserialize)]
struct SerializedRatchetChannel {
    lower: Vec<u8>,
    ratchet: Vec<u8>,
}

/// Unreliable channel with forward secrecy and post-compromise security.
///
/// Before first use both endpoints must run the one-round key exchange:
/// each exports a blob with [`create_key_exchange`] and absorbs the peer's
/// with [`process_key_exchange`]. Writer-descriptor installation and the
/// key exchange may happen in either order.
///
/// [`create_key_exchange`]: DoubleRatchetChannel::create_key_exchange
/// [`process_key_exchange`]: DoubleRatchetChannel::process_key_exchange
pub struct DoubleRatchetChannel<C: Channel> {
    lower: C,
    ratchet: Ratchet,
}

impl<C: Channel> DoubleRatchetChannel<C> {
    /// Wrap a lower channel with a fresh, unconfirmed ratchet.
    pub fn new(lower: C) -> Self {
        Self {
            lower,
            ratchet: Ratchet::new(),
        }
    }

    /// Export the local key exchange blob for the peer.
    pub fn create_key_exchange(&mut self) -> Result<Vec<u8>, ChannelError> {
        Ok(self.ratchet.create_key_exchange()?)
    }

    /// Absorb the peer's key exchange blob. After this, `write` and `read`
    /// are valid.
    pub fn process_key_exchange(&mut self, blob: &[u8]) -> Result<(), ChannelError> {
        Ok(self.ratchet.process_key_exchange(blob)?)
    }

    /// Size of the fixed plaintext frame handed to the ratchet.
    fn frame_len() -> usize {
        USER_FORWARD_PAYLOAD_LENGTH - C::OVERHEAD - RATCHET_OVERHEAD
    }
}

#[async_trait]
impl<C: Channel + Send + Sync> Channel for DoubleRatchetChannel<C> {
    type Descriptor = C::Descriptor;

    const OVERHEAD: usize = C::OVERHEAD + RATCHET_OVERHEAD + FRAME_LENGTH_PREFIX;

    fn writer_descriptor(&self) -> C::Descriptor {
        self.lower.writer_descriptor()
    }

    fn with_remote_writer(&mut self, descriptor: C::Descriptor) -> Result<(), ChannelError> {
        self.lower.with_remote_writer(descriptor)
    }

    async fn write(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        if !self.ratchet.is_confirmed() {
            return Err(RatchetError::KeyExchangeIncomplete.into());
        }
        if message.len() > Self::max_message_len() {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                max: Self::max_message_len(),
            });
        }

        let mut frame = vec![0u8; Self::frame_len()];
        frame[..FRAME_LENGTH_PREFIX].copy_from_slice(&(message.len() as u32).to_be_bytes());
        frame[FRAME_LENGTH_PREFIX..FRAME_LENGTH_PREFIX + message.len()].copy_from_slice(message);

        let ciphertext = self.ratchet.encrypt(&[], &frame)?;
        self.lower.write(&ciphertext).await
    }

    async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        // Refuse before touching the lower channel: a read that cannot be
        // decrypted would still consume the message and advance the offset.
        if !self.ratchet.is_confirmed() {
            return Err(RatchetError::KeyExchangeIncomplete.into());
        }
        let ciphertext = self.lower.read().await?;
        let frame = self.ratchet.decrypt(&[], &ciphertext)?;
        if frame.len() < FRAME_LENGTH_PREFIX {
            return Err(ChannelError::Serialization(
                "ratchet frame shorter than its length prefix".to_string(),
            ));
        }
        let len = u32::from_be_bytes(frame[..FRAME_LENGTH_PREFIX].try_into().expect("sized split"))
            as usize;
        if FRAME_LENGTH_PREFIX + len > frame.len() {
            return Err(ChannelError::Serialization(
                "ratchet frame length prefix exceeds frame".to_string(),
            ));
        }
        Ok(frame[FRAME_LENGTH_PREFIX..FRAME_LENGTH_PREFIX + len].to_vec())
    }

    fn save(&self) -> Result<Vec<u8>, ChannelError> {
        to_cbor(&SerializedRatchetChannel {
            lower: self.lower.save()?,
            ratchet: to_cbor(&self.ratchet)?,
        })
    }

    fn load(blob: &[u8], spool: Arc<dyn SpoolService>) -> Result<Self, ChannelError> {
        let serialized: SerializedRatchetChannel = from_cbor(blob)?;
        Ok(Self {
            lower: C::load(&serialized.lower, spool)?,
            ratchet: from_cbor(&serialized.ratchet)?,
        })
    }
}
