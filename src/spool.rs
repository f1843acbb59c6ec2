//! Remote spool service interface.
//!
//! A spool is an append-only log hosted by a remote provider, read by
//! 1-based monotonic index. The service implementation owns all network
//! concerns (mixnet session, RPC framing, retries are the caller's choice);
//! channels only ever see this trait.

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::error::SpoolError;

/// Size in bytes of a provider-assigned spool identifier.
pub const SPOOL_ID_SIZE: usize = 16;

/// Status string a spool response carries on success. Anything else is an
/// error diagnostic.
pub const STATUS_OK: &str = "OK";

/// Opaque provider-assigned spool identifier.
pub type SpoolId = [u8; SPOOL_ID_SIZE];

/// Response to a spool read.
#[derive(Debug, Clone)]
pub struct SpoolResponse {
    /// Spool the response concerns.
    pub spool_id: SpoolId,
    /// Message at the requested index, when `status` is [`STATUS_OK`].
    pub message: Vec<u8>,
    /// `"OK"` or an error diagnostic from the provider.
    pub status: String,
}

impl SpoolResponse {
    /// Whether the provider reported success.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Remote coordinates of a spool: everything a peer needs to append to it.
///
/// This doubles as the spool-level writer descriptor exchanged out-of-band
/// when pairing two channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolDescriptor {
    /// Provider-assigned spool identifier.
    pub spool_id: SpoolId,
    /// Spool service receiver name on the provider.
    pub receiver: String,
    /// Provider name.
    pub provider: String,
}

/// Client interface to a remote spool provider.
///
/// Implementations must be safe for concurrent use by independent channel
/// instances; a single service handle is commonly shared across channels.
#[async_trait]
pub trait SpoolService: Send + Sync {
    /// Allocate a new spool, bound to `private_key` for read authority.
    async fn create_spool(
        &self,
        private_key: &SigningKey,
        receiver: &str,
        provider: &str,
    ) -> Result<SpoolId, SpoolError>;

    /// Read the message at 1-based `index`.
    async fn read_from_spool(
        &self,
        spool_id: &SpoolId,
        index: u32,
        private_key: &SigningKey,
        receiver: &str,
        provider: &str,
    ) -> Result<SpoolResponse, SpoolError>;

    /// Append `message` to the spool. Fire-and-forget: success does not
    /// guarantee delivery.
    async fn append_to_spool(
        &self,
        spool_id: &SpoolId,
        message: &[u8],
        receiver: &str,
        provider: &str,
    ) -> Result<(), SpoolError>;

    /// Discard the spool's contents on the provider.
    async fn purge_spool(
        &self,
        spool_id: &SpoolId,
        private_key: &SigningKey,
        receiver: &str,
        provider: &str,
    ) -> Result<(), SpoolError>;
}
