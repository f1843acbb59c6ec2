//! Base channel bound to a remote append-only spool.
//!
//! The reader half owns the spool's Ed25519 read-authority key and a
//! monotonic read offset; the writer half is just the peer spool's remote
//! coordinates. No cryptography beyond the spool signature key lives at
//! this layer — confidentiality is the job of the layers above.

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::channel::Channel;
use crate::codec::{from_cbor, to_cbor};
use crate::error::ChannelError;
use crate::spool::{SpoolDescriptor, SpoolId, SpoolService};
use crate::USER_FORWARD_PAYLOAD_LENGTH;

/// Envelope bytes the spool append RPC adds around a message on the wire
/// (command byte, spool identifier, CBOR framing).
pub const SPOOL_CHANNEL_OVERHEAD: usize = 64;

/// Reader half: the capability to read one remote spool in order.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct SpoolReader {
    spool_private_key: [u8; 32],
    spool_id: SpoolId,
    receiver: String,
    provider: String,
    read_offset: u32,
}

impl Drop for SpoolReader {
    fn drop(&mut self) {
        self.spool_private_key.zeroize();
    }
}

impl SpoolReader {
    /// Generate a fresh read-authority keypair and allocate a spool on the
    /// remote provider.
    async fn new(
        receiver: &str,
        provider: &str,
        spool: &dyn SpoolService,
    ) -> Result<Self, ChannelError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let spool_id = spool.create_spool(&signing_key, receiver, provider).await?;
        tracing::debug!(spool_id = %hex::encode(spool_id), provider, "created remote spool");

        Ok(Self {
            spool_private_key: signing_key.to_bytes(),
            spool_id,
            receiver: receiver.to_string(),
            provider: provider.to_string(),
            read_offset: 1,
        })
    }

    fn descriptor(&self) -> SpoolDescriptor {
        SpoolDescriptor {
            spool_id: self.spool_id,
            receiver: self.receiver.clone(),
            provider: self.provider.clone(),
        }
    }

    /// Read the message at the current offset. The offset advances only
    /// after the provider reports OK, so a failed read can be retried
    /// against the same index.
    async fn read(&mut self, spool: &dyn SpoolService) -> Result<Vec<u8>, ChannelError> {
        let signing_key = SigningKey::from_bytes(&self.spool_private_key);
        let response = spool
            .read_from_spool(
                &self.spool_id,
                self.read_offset,
                &signing_key,
                &self.receiver,
                &self.provider,
            )
            .await?;
        if !response.is_ok() {
            return Err(ChannelError::SpoolStatus(response.status));
        }
        self.read_offset += 1;

        Ok(response.message)
    }

    async fn purge(&self, spool: &dyn SpoolService) -> Result<(), ChannelError> {
        let signing_key = SigningKey::from_bytes(&self.spool_private_key);
        spool
            .purge_spool(&self.spool_id, &signing_key, &self.receiver, &self.provider)
            .await?;
        Ok(())
    }
}

/// Saved form of a spool channel: both halves, no service handle.
#[derive(Serialize, Deserialize)]
pub(crate) struct SerializedSpoolChannel {
    pub(crate) writer: Option<SpoolDescriptor>,
    pub(crate) reader: SpoolReader,
}

/// Unreliable channel over a pair of remote spools: ours for reading,
/// the peer's for writing.
pub struct SpoolChannel {
    spool_service: Arc<dyn SpoolService>,
    reader: SpoolReader,
    writer: Option<SpoolDescriptor>,
}

impl SpoolChannel {
    /// Create a channel with a freshly allocated remote spool. The channel
    /// can read immediately; writing needs a peer descriptor first.
    pub async fn new(
        receiver: &str,
        provider: &str,
        spool_service: Arc<dyn SpoolService>,
    ) -> Result<Self, ChannelError> {
        let reader = SpoolReader::new(receiver, provider, spool_service.as_ref()).await?;
        Ok(Self {
            spool_service,
            reader,
            writer: None,
        })
    }

    /// Discard the contents of the local reader spool on the provider.
    pub async fn purge(&self) -> Result<(), ChannelError> {
        self.reader.purge(self.spool_service.as_ref()).await
    }

    pub(crate) fn to_serialized(&self) -> SerializedSpoolChannel {
        SerializedSpoolChannel {
            writer: self.writer.clone(),
            reader: self.reader.clone(),
        }
    }

    pub(crate) fn from_serialized(
        serialized: SerializedSpoolChannel,
        spool_service: Arc<dyn SpoolService>,
    ) -> Self {
        Self {
            spool_service,
            reader: serialized.reader,
            writer: serialized.writer,
        }
    }
}

#[async_trait]
impl Channel for SpoolChannel {
    type Descriptor = SpoolDescriptor;

    const OVERHEAD: usize = SPOOL_CHANNEL_OVERHEAD;

    fn writer_descriptor(&self) -> SpoolDescriptor {
        self.reader.descriptor()
    }

    fn with_remote_writer(&mut self, descriptor: SpoolDescriptor) -> Result<(), ChannelError> {
        if self.writer.is_some() {
            return Err(ChannelError::WriterAlreadyInstalled);
        }
        self.writer = Some(descriptor);
        Ok(())
    }

    async fn write(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let writer = self.writer.as_ref().ok_or(ChannelError::WriterMissing)?;
        if message.len() > Self::max_message_len() {
            return Err(ChannelError::MessageTooLarge {
                len: message.len(),
                max: Self::max_message_len(),
            });
        }
        tracing::trace!(
            spool_id = %hex::encode(writer.spool_id),
            len = message.len(),
            "appending to remote spool"
        );
        self.spool_service
            .append_to_spool(&writer.spool_id, message, &writer.receiver, &writer.provider)
            .await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.reader.read(self.spool_service.as_ref()).await
    }

    fn save(&self) -> Result<Vec<u8>, ChannelError> {
        to_cbor(&self.to_serialized())
    }

    fn load(blob: &[u8], spool: Arc<dyn SpoolService>) -> Result<Self, ChannelError> {
        let serialized: SerializedSpoolChannel = from_cbor(blob)?;
        Ok(Self::from_serialized(serialized, spool))
    }
}

const _: () = assert!(SPOOL_CHANNEL_OVERHEAD < USER_FORWARD_PAYLOAD_LENGTH);
