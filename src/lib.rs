//! # mixspool - confidential channels over remote mixnet spools
//!
//! Unidirectional and pairable bidirectional communication channels
//! layered over an untrusted remote append-only spool service. The spool
//! operator sees neither plaintext nor which writer belongs to which
//! reader beyond what the mixnet itself leaks.
//!
//! ## Layers
//!
//! Three composable layers implement the same [`Channel`] capability,
//! each owning the one below it:
//!
//! - [`SpoolChannel`] binds a reader half (our remote spool plus its read
//!   key and offset) and a writer half (the peer spool's coordinates) to
//!   the injected [`SpoolService`]. Pure framing and offset bookkeeping.
//! - [`NoiseChannel`] seals every message in an independent one-shot
//!   Noise X handshake, authenticating the sender's static key against
//!   the key pinned at pairing time.
//! - [`DoubleRatchetChannel`] adds forward-secret session encryption with
//!   fixed-size padded frames, after a one-round key exchange.
//!
//! ## Pairing
//!
//! Each peer constructs its own channel (allocating a fresh remote
//! spool), exports a writer descriptor, and hands it to the other side
//! over some separate secure side channel. Installing the peer's
//! descriptor opens the channel for writing; at the ratchet layer the
//! peers additionally exchange key-exchange blobs:
//!
//! ```text
//! A: new() ── writer_descriptor() ──▶ B: with_remote_writer()
//! B: new() ── writer_descriptor() ──▶ A: with_remote_writer()
//! A/B (ratchet only): create_key_exchange() ──▶ process_key_exchange()
//! ```
//!
//! ## Unreliability
//!
//! The mixnet may drop or reorder packets and nothing here retransmits.
//! Per direction, reads observe whatever was appended in order; the
//! ratchet layer tolerates a bounded amount of reordering on top of that.
//!
//! Channel state can be serialized with `save()` at any quiescent point
//! and resumed later with `load()` against a re-bound spool service. The
//! blobs are CBOR and contain long-term secrets.

pub mod channel;
mod codec;
pub mod error;
pub mod noise;
pub mod ratchet;
pub mod ratchet_channel;
pub mod spool;
pub mod spool_channel;

pub use channel::Channel;
pub use error::{ChannelError, SpoolError};
pub use noise::{NoiseChannel, NoiseDescriptor, NoiseError, NOISE_OVERHEAD};
pub use ratchet::{Ratchet, RatchetError, DEFAULT_MAX_SKIP, RATCHET_OVERHEAD};
pub use ratchet_channel::DoubleRatchetChannel;
pub use spool::{
    SpoolDescriptor, SpoolId, SpoolResponse, SpoolService, SPOOL_ID_SIZE, STATUS_OK,
};
pub use spool_channel::{SpoolChannel, SPOOL_CHANNEL_OVERHEAD};

/// Payload capacity of a single Sphinx packet in the surrounding mixnet.
/// Every ciphertext a channel hands to the spool service fits inside it.
pub const USER_FORWARD_PAYLOAD_LENGTH: usize = 2048;
