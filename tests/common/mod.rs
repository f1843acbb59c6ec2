//! Shared test fixtures: an in-memory spool provider and paired channels.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ed25519_dalek::SigningKey;

use mixspool::{
    Channel, DoubleRatchetChannel, NoiseChannel, SpoolChannel, SpoolError, SpoolId, SpoolResponse,
    SpoolService, STATUS_OK,
};

/// Status a read past the end of a spool reports.
pub const STATUS_NO_SUCH_MESSAGE: &str = "no such message";

#[derive(Default)]
struct Inner {
    next_id: u8,
    spools: HashMap<SpoolId, Vec<Vec<u8>>>,
}

/// In-memory stand-in for a remote spool provider. Shared across channels
/// through an `Arc`, like a real provider connection would be.
#[derive(Default)]
pub struct MemorySpool {
    inner: Mutex<Inner>,
}

impl MemorySpool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw ciphertext stored at 1-based `index`, for size inspections.
    pub fn stored(&self, spool_id: &SpoolId, index: u32) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .spools
            .get(spool_id)?
            .get(index as usize - 1)
            .cloned()
    }
}

#[async_trait]
impl SpoolService for MemorySpool {
    async fn create_spool(
        &self,
        _private_key: &SigningKey,
        _receiver: &str,
        _provider: &str,
    ) -> Result<SpoolId, SpoolError> {
        let mut inner = self.inner.lock().unwrap();
        let mut spool_id = SpoolId::default();
        spool_id[0] = inner.next_id;
        inner.next_id += 1;
        inner.spools.insert(spool_id, Vec::new());
        Ok(spool_id)
    }

    async fn read_from_spool(
        &self,
        spool_id: &SpoolId,
        index: u32,
        _private_key: &SigningKey,
        _receiver: &str,
        _provider: &str,
    ) -> Result<SpoolResponse, SpoolError> {
        let inner = self.inner.lock().unwrap();
        let messages = inner
            .spools
            .get(spool_id)
            .ok_or_else(|| SpoolError::Rejected("unknown spool".to_string()))?;
        let response = match messages.get(index as usize - 1) {
            Some(message) => SpoolResponse {
                spool_id: *spool_id,
                message: message.clone(),
                status: STATUS_OK.to_string(),
            },
            None => SpoolResponse {
                spool_id: *spool_id,
                message: Vec::new(),
                status: STATUS_NO_SUCH_MESSAGE.to_string(),
            },
        };
        Ok(response)
    }

    async fn append_to_spool(
        &self,
        spool_id: &SpoolId,
        message: &[u8],
        _receiver: &str,
        _provider: &str,
    ) -> Result<(), SpoolError> {
        let mut inner = self.inner.lock().unwrap();
        let messages = inner
            .spools
            .get_mut(spool_id)
            .ok_or_else(|| SpoolError::Rejected("unknown spool".to_string()))?;
        messages.push(message.to_vec());
        Ok(())
    }

    async fn purge_spool(
        &self,
        spool_id: &SpoolId,
        _private_key: &SigningKey,
        _receiver: &str,
        _provider: &str,
    ) -> Result<(), SpoolError> {
        let mut inner = self.inner.lock().unwrap();
        let messages = inner
            .spools
            .get_mut(spool_id)
            .ok_or_else(|| SpoolError::Rejected("unknown spool".to_string()))?;
        messages.clear();
        Ok(())
    }
}

/// A fresh provider, both as mock (for inspection) and as service handle.
pub fn shared_spool() -> (Arc<MemorySpool>, Arc<dyn SpoolService>) {
    let mock = Arc::new(MemorySpool::new());
    let service: Arc<dyn SpoolService> = mock.clone();
    (mock, service)
}

/// Two spool channels on one provider, each with the other's writer
/// descriptor installed.
pub async fn spool_channel_pair(
    service: &Arc<dyn SpoolService>,
) -> (SpoolChannel, SpoolChannel) {
    let mut chan_a = SpoolChannel::new("receiver_a", "provider_a", service.clone())
        .await
        .unwrap();
    let mut chan_b = SpoolChannel::new("receiver_b", "provider_b", service.clone())
        .await
        .unwrap();

    let descriptor_a = chan_a.writer_descriptor();
    let descriptor_b = chan_b.writer_descriptor();
    chan_a.with_remote_writer(descriptor_b).unwrap();
    chan_b.with_remote_writer(descriptor_a).unwrap();

    (chan_a, chan_b)
}

/// Two paired noise channels on one provider.
pub async fn noise_channel_pair(
    service: &Arc<dyn SpoolService>,
) -> (NoiseChannel, NoiseChannel) {
    let mut chan_a = NoiseChannel::new("receiver_a", "provider_a", service.clone())
        .await
        .unwrap();
    let mut chan_b = NoiseChannel::new("receiver_b", "provider_b", service.clone())
        .await
        .unwrap();

    let descriptor_a = chan_a.writer_descriptor();
    let descriptor_b = chan_b.writer_descriptor();
    chan_a.with_remote_writer(descriptor_b).unwrap();
    chan_b.with_remote_writer(descriptor_a).unwrap();

    (chan_a, chan_b)
}

/// Two paired ratchet-over-spool channels with the key exchange completed.
pub async fn ratchet_channel_pair(
    service: &Arc<dyn SpoolService>,
) -> (
    DoubleRatchetChannel<SpoolChannel>,
    DoubleRatchetChannel<SpoolChannel>,
) {
    let (lower_a, lower_b) = spool_channel_pair(service).await;
    let mut chan_a = DoubleRatchetChannel::new(lower_a);
    let mut chan_b = DoubleRatchetChannel::new(lower_b);

    let kx_a = chan_a.create_key_exchange().unwrap();
    let kx_b = chan_b.create_key_exchange().unwrap();
    chan_a.process_key_exchange(&kx_b).unwrap();
    chan_b.process_key_exchange(&kx_a).unwrap();

    (chan_a, chan_b)
}
