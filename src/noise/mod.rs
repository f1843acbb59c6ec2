//! Per-message Noise X channel.
//!
//! Wraps the spool channel so that every message is a fresh one-shot
//! handshake: the sender's static key rides inside the handshake and the
//! recipient checks it against the key recorded when the peer's writer
//! descriptor was installed. There is no session to lose — reordered or
//! dropped messages cost nothing but themselves.

mod handshake;

pub use handshake::{open, seal, NoiseError, NOISE_OVERHEAD};

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::channel::Channel;
use crate::codec::{from_cbor, to_cbor};
use crate::error::ChannelError;
use crate::spool::{SpoolDescriptor, SpoolService};
use crate::spool_channel::{SerializedSpoolChannel, SpoolChannel, SPOOL_CHANNEL_OVERHEAD};

/// Writer descriptor for a noise channel: the spool coordinates plus the
/// static key to encrypt to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseDescriptor {
    /// Remote spool coordinates of the creator's reader half.
    pub spool: SpoolDescriptor,
    /// Public half of the creator's static Curve25519 key.
    pub noise_public_key: [u8; 32],
}

/// Saved form of a noise channel.
#[derive(Serialize, Deserialize)]
struct SerializedNoiseChannel {
    spool: SerializedSpoolChannel,
    noise_private_key: [u8; 32],
    remote_noise_public_key: Option<[u8; 32]>,
}

/// Unreliable channel whose messages are one-shot Noise X handshakes over
/// a spool channel.
///
/// The single local static key identifies this endpoint in both
/// directions: it decrypts incoming handshakes and authenticates outgoing
/// ones.
pub struct NoiseChannel {
    spool: SpoolChannel,
    noise_private_key: [u8; 32],
    remote_noise_public_key: Option<[u8; 32]>,
}

impl Drop for NoiseChannel {
    fn drop(&mut self) {
        self.noise_private_key.zeroize();
    }
}

impl NoiseChannel {
    /// Create a channel with a fresh remote spool and a fresh static
    /// Curve25519 keypair.
    pub async fn new(
        receiver: &str,
        provider: &str,
        spool_service: Arc<dyn SpoolService>,
    ) -> Result<Self, ChannelError> {
        let spool = SpoolChannel::new(receiver, provider, spool_service).await?;
        let noise_private_key = StaticSecret::random_from_rng(OsRng);
        Ok(Self {
            spool,
            noise_private_key: noise_private_key.to_bytes(),
            remote_noise_public_key: None,
        })
    }

    /// Public half of the local static key.
    pub fn noise_public_key(&self) -> [u8; 32] {
        let secret = StaticSecret::from(self.noise_private_key);
        *PublicKey::from(&secret).as_bytes()
    }

    /// Discard the contents of the local reader spool on the provider.
    pub async fn purge(&self) -> Result<(), ChannelError> {
        self.spool.purge().await
    }
}

#[async_trait]
impl Channel for NoiseChannel {
    type Descriptor = NoiseDescriptor;

    const OVERHEAD: usize = SPOOL_CHANNEL_OVERHEAD + NOISE_OVERHEAD;

    fn writer_descriptor(&self) -> NoiseDescriptor {
        NoiseDescriptor {
            spool: self.spool.writer_descriptor(),
            noise_public_key: self.noise_public_key(),
        }
    }

    fn with_remote_writer(&mut self, descriptor: NoiseDescriptor) -> Result<(), ChannelError> {
        if self.remote_noise_public_key.is_some() {
            return Err(ChannelError::WriterAlreadyInstalled);
        }
        self.spool.with_remote_writer(descriptor.spool)?;
        self.remote_noise_public_key = Some(descriptor.noise_public_key);
        Ok(())
    }

    async fn write(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let remote = self.remote_noise_public_key.ok_or(ChannelError::WriterMissing)?;
        if message.len() > Self::max_message_len() {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                max: Self::max_message_len(),
            });
        }
        let ciphertext = seal(&self.noise_private_key, &remote, message)?;
        self.spool.write(&ciphertext).await
    }

    async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        let remote = self.remote_noise_public_key.ok_or(ChannelError::WriterMissing)?;
        let ciphertext = self.spool.read().await?;
        let (message, sender) = open(&self.noise_private_key, &ciphertext)?;
        if sender != remote {
            tracing::warn!("discarding message authored by an unexpected static key");
            return Err(ChannelError::UnexpectedPeerKey);
        }
        Ok(message)
    }

    fn save(&self) -> Result<Vec<u8>, ChannelError> {
        to_cbor(&SerializedNoiseChannel {
            spool: self.spool.to_serialized(),
            noise_private_key: self.noise_private_key,
            remote_noise_public_key: self.remote_noise_public_key,
        })
    }

    fn load(blob: &[u8], spool: Arc<dyn SpoolService>) -> Result<Self, ChannelError> {
        let mut serialized: SerializedNoiseChannel = from_cbor(blob)?;
        let channel = Self {
            spool: SpoolChannel::from_serialized(serialized.spool, spool),
            noise_private_key: serialized.noise_private_key,
            remote_noise_public_key: serialized.remote_noise_public_key,
        };
        serialized.noise_private_key.zeroize();
        Ok(channel)
    }
}
