//! Forward-secret session ratchet.
//!
//! A Signal-style double ratchet: per-message keys come off one-way KDF
//! chains, and a DH ratchet step on every change of conversation direction
//! heals the session after a state compromise. The session is established
//! by a one-round symmetric key exchange — both endpoints export a blob,
//! absorb the peer's, and can then send immediately.
//!
//! ## Wire format
//!
//! Every ciphertext is framed the same way, adding a fixed
//! [`RATCHET_OVERHEAD`] bytes:
//!
//! ```text
//! [header nonce 24][sealed header 64+16][payload nonce 24][payload ct + 16]
//! ```
//!
//! The 64-byte header (ratchet public key, sequence number, previous chain
//! length, zero padding to fixed size) is sealed under a session-static
//! header key so the wire exposes no ratchet metadata. The payload is
//! sealed under the single-use message key. Both boxes are
//! XChaCha20-Poly1305 with fresh random nonces.
//!
//! ## State machine
//!
//! `Fresh -> Offered -> Confirmed`. [`Ratchet::create_key_exchange`] moves
//! `Fresh` to `Offered` and keeps returning the same blob thereafter;
//! [`Ratchet::process_key_exchange`] must be called exactly once and moves
//! the ratchet to `Confirmed`, after which encryption and decryption are
//! valid.

mod kdf;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use kdf::{derive_session, kdf_chain, kdf_root};

const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

/// Fixed size of the header plaintext. The header is zero-padded to this
/// size so every sealed header is the same length on the wire.
const HEADER_SIZE: usize = 64;

const SEALED_HEADER_SIZE: usize = NONCE_SIZE + HEADER_SIZE + TAG_SIZE;

/// Bytes the ratchet adds around a plaintext: the sealed header plus the
/// payload nonce and tag.
pub const RATCHET_OVERHEAD: usize = SEALED_HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Most message keys cached for out-of-order delivery before decryption
/// refuses to skip further.
pub const DEFAULT_MAX_SKIP: u32 = 100;

/// Ratchet session failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Encrypt or decrypt attempted before the key exchange completed.
    #[error("ratchet key exchange not yet completed")]
    KeyExchangeIncomplete,

    /// `process_key_exchange` called more than once.
    #[error("ratchet key exchange already completed")]
    KeyExchangeComplete,

    /// The peer blob did not decode to a key exchange.
    #[error("malformed key exchange blob: {0}")]
    MalformedKeyExchange(String),

    /// The peer blob carries our own identity key — it was reflected back
    /// to us instead of coming from a distinct endpoint.
    #[error("key exchange carries our own identity key")]
    ReflectedKeyExchange,

    /// Ciphertext could not be decrypted: truncation, tampering, or chain
    /// state that no longer matches the sender.
    #[error("ratchet decrypt failed")]
    Decrypt,

    /// Decrypting this message would skip more keys than the cache budget
    /// allows.
    #[error("too many skipped messages ({requested} > {max})")]
    TooManySkipped {
        /// Keys that would need caching.
        requested: u32,
        /// Configured budget.
        max: u32,
    },

    /// Key exchange blob serialization failed.
    #[error("key exchange serialization failed: {0}")]
    Serialization(String),
}

/// Key exchange phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Phase {
    Fresh,
    Offered,
    Confirmed,
}

/// Direction of the last message processed, for ratchet-step detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Direction {
    Sending,
    Receiving,
}

/// Public keys exported to the peer during the key exchange.
#[derive(Serialize, Deserialize)]
struct KeyExchange {
    identity: [u8; 32],
    handshake: [u8; 32],
}

/// A message key retained for an out-of-order message.
#[derive(Serialize, Deserialize)]
struct SkippedKey {
    dh_public: [u8; 32],
    seq: u32,
    message_key: [u8; 32],
}

impl Drop for SkippedKey {
    fn drop(&mut self) {
        self.message_key.zeroize();
    }
}

/// Double ratchet session state. Serializable as an opaque CBOR value;
/// all key material is zeroized on drop.
#[derive(Serialize, Deserialize)]
pub struct Ratchet {
    phase: Phase,

    // Key exchange keypairs, generated at construction.
    identity_secret: [u8; 32],
    identity_public: [u8; 32],
    handshake_secret: [u8; 32],
    handshake_public: [u8; 32],

    // Session state, valid once confirmed.
    root_key: [u8; 32],
    header_key: [u8; 32],
    send_chain: [u8; 32],
    recv_chain: [u8; 32],
    dh_secret: [u8; 32],
    dh_public: [u8; 32],
    their_dh_public: [u8; 32],
    send_seq: u32,
    recv_seq: u32,
    prev_chain_len: u32,
    last_direction: Option<Direction>,
    skipped: Vec<SkippedKey>,
    max_skip: u32,
}

impl Drop for Ratchet {
    fn drop(&mut self) {
        self.identity_secret.zeroize();
        self.handshake_secret.zeroize();
        self.root_key.zeroize();
        self.header_key.zeroize();
        self.send_chain.zeroize();
        self.recv_chain.zeroize();
        self.dh_secret.zeroize();
        // SkippedKey zeroizes itself.
        self.skipped.clear();
    }
}

impl Default for Ratchet {
    fn default() -> Self {
        Self::new()
    }
}

impl Ratchet {
    /// Create a fresh ratchet with new identity and handshake keypairs.
    pub fn new() -> Self {
        let identity = StaticSecret::random_from_rng(OsRng);
        let handshake = StaticSecret::random_from_rng(OsRng);
        Self {
            phase: Phase::Fresh,
            identity_secret: identity.to_bytes(),
            identity_public: *PublicKey::from(&identity).as_bytes(),
            handshake_secret: handshake.to_bytes(),
            handshake_public: *PublicKey::from(&handshake).as_bytes(),
            root_key: [0u8; 32],
            header_key: [0u8; 32],
            send_chain: [0u8; 32],
            recv_chain: [0u8; 32],
            dh_secret: [0u8; 32],
            dh_public: [0u8; 32],
            their_dh_public: [0u8; 32],
            send_seq: 0,
            recv_seq: 0,
            prev_chain_len: 0,
            last_direction: None,
            skipped: Vec::new(),
            max_skip: DEFAULT_MAX_SKIP,
        }
    }

    /// Whether the key exchange has completed and messages may flow.
    pub fn is_confirmed(&self) -> bool {
        self.phase == Phase::Confirmed
    }

    /// Export the key exchange blob for the peer. Repeated calls return
    /// the same blob, so it can be re-sent over a lossy side channel.
    pub fn create_key_exchange(&mut self) -> Result<Vec<u8>, RatchetError> {
        let kx = KeyExchange {
            identity: self.identity_public,
            handshake: self.handshake_public,
        };
        let mut blob = Vec::new();
        ciborium::ser::into_writer(&kx, &mut blob)
            .map_err(|e| RatchetError::Serialization(e.to_string()))?;
        if self.phase == Phase::Fresh {
            self.phase = Phase::Offered;
        }
        Ok(blob)
    }

    /// Absorb the peer's key exchange blob and derive the session. Exactly
    /// one call per endpoint; afterwards both sides may send immediately.
    pub fn process_key_exchange(&mut self, blob: &[u8]) -> Result<(), RatchetError> {
        if self.phase == Phase::Confirmed {
            return Err(RatchetError::KeyExchangeComplete);
        }
        let kx: KeyExchange = ciborium::de::from_reader(blob)
            .map_err(|e| RatchetError::MalformedKeyExchange(e.to_string()))?;
        if kx.identity == self.identity_public {
            return Err(RatchetError::ReflectedKeyExchange);
        }

        // The endpoint with the smaller identity key takes the "first"
        // role; the triple-DH terms are ordered by role so both sides
        // derive identical secrets.
        let am_first = self.identity_public < kx.identity;

        let identity = StaticSecret::from(self.identity_secret);
        let handshake = StaticSecret::from(self.handshake_secret);
        let their_identity = PublicKey::from(kx.identity);
        let their_handshake = PublicKey::from(kx.handshake);

        let (dh1, dh2) = if am_first {
            (
                identity.diffie_hellman(&their_handshake),
                handshake.diffie_hellman(&their_identity),
            )
        } else {
            (
                handshake.diffie_hellman(&their_identity),
                identity.diffie_hellman(&their_handshake),
            )
        };
        let dh3 = handshake.diffie_hellman(&their_handshake);

        let mut shared = [0u8; 96];
        shared[..32].copy_from_slice(dh1.as_bytes());
        shared[32..64].copy_from_slice(dh2.as_bytes());
        shared[64..].copy_from_slice(dh3.as_bytes());

        let mut salt = [0u8; 64];
        if am_first {
            salt[..32].copy_from_slice(&self.identity_public);
            salt[32..].copy_from_slice(&kx.identity);
        } else {
            salt[..32].copy_from_slice(&kx.identity);
            salt[32..].copy_from_slice(&self.identity_public);
        }

        let secrets = derive_session(&shared, &salt);
        shared.zeroize();

        self.root_key = secrets.root_key;
        self.header_key = secrets.header_key;
        if am_first {
            self.send_chain = secrets.first_chain;
            self.recv_chain = secrets.second_chain;
        } else {
            self.send_chain = secrets.second_chain;
            self.recv_chain = secrets.first_chain;
        }

        // The handshake keypair doubles as the initial DH ratchet keypair.
        self.dh_secret = self.handshake_secret;
        self.dh_public = self.handshake_public;
        self.their_dh_public = kx.handshake;

        self.phase = Phase::Confirmed;
        Ok(())
    }

    /// Encrypt one message. `aad` is bound to the payload box but not
    /// transmitted.
    pub fn encrypt(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, RatchetError> {
        if self.phase != Phase::Confirmed {
            return Err(RatchetError::KeyExchangeIncomplete);
        }

        // Direction flipped from receiving to sending: DH ratchet step.
        if self.last_direction == Some(Direction::Receiving) {
            self.ratchet_send_keys();
        }

        let (new_chain, message_key) = kdf_chain(&self.send_chain);
        self.send_chain = new_chain;

        let mut header = [0u8; HEADER_SIZE];
        header[..32].copy_from_slice(&self.dh_public);
        header[32..36].copy_from_slice(&self.send_seq.to_be_bytes());
        header[36..40].copy_from_slice(&self.prev_chain_len.to_be_bytes());

        let mut header_nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut header_nonce);
        let sealed_header = seal_box(&self.header_key, &header_nonce, &[], &header)?;

        let mut payload_nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut payload_nonce);
        let sealed_payload = seal_box(&message_key, &payload_nonce, aad, plaintext)?;

        let mut wire = Vec::with_capacity(plaintext.len() + RATCHET_OVERHEAD);
        wire.extend_from_slice(&header_nonce);
        wire.extend_from_slice(&sealed_header);
        wire.extend_from_slice(&payload_nonce);
        wire.extend_from_slice(&sealed_payload);

        self.send_seq += 1;
        self.last_direction = Some(Direction::Sending);
        Ok(wire)
    }

    /// Decrypt one message. Chain state advances before the payload box is
    /// opened, so a tampered payload still consumes its message key.
    pub fn decrypt(&mut self, aad: &[u8], wire: &[u8]) -> Result<Vec<u8>, RatchetError> {
        if self.phase != Phase::Confirmed {
            return Err(RatchetError::KeyExchangeIncomplete);
        }
        if wire.len() < RATCHET_OVERHEAD {
            return Err(RatchetError::Decrypt);
        }

        let header_nonce: [u8; NONCE_SIZE] = wire[..NONCE_SIZE].try_into().expect("sized split");
        let sealed_header = &wire[NONCE_SIZE..SEALED_HEADER_SIZE];
        let payload_nonce: [u8; NONCE_SIZE] = wire
            [SEALED_HEADER_SIZE..SEALED_HEADER_SIZE + NONCE_SIZE]
            .try_into()
            .expect("sized split");
        let sealed_payload = &wire[SEALED_HEADER_SIZE + NONCE_SIZE..];

        let header = open_box(&self.header_key, &header_nonce, &[], sealed_header)?;
        if header.len() != HEADER_SIZE {
            return Err(RatchetError::Decrypt);
        }
        let mut dh_public = [0u8; 32];
        dh_public.copy_from_slice(&header[..32]);
        let seq = u32::from_be_bytes(header[32..36].try_into().expect("sized split"));
        let prev_chain_len = u32::from_be_bytes(header[36..40].try_into().expect("sized split"));

        // A key cached for this exact message wins over chain state: this
        // covers late arrivals from a chain we have already ratcheted past.
        let message_key = if let Some(key) = self.take_skipped(&dh_public, seq) {
            key
        } else {
            if dh_public != self.their_dh_public {
                self.ratchet_recv_keys(&dh_public, prev_chain_len)?;
            }
            if seq < self.recv_seq {
                // Key already consumed and not in the cache.
                return Err(RatchetError::Decrypt);
            }
            if seq > self.recv_seq {
                self.skip_until(seq)?
            } else {
                let (new_chain, key) = kdf_chain(&self.recv_chain);
                self.recv_chain = new_chain;
                self.recv_seq += 1;
                key
            }
        };

        let plaintext = open_box(&message_key, &payload_nonce, aad, sealed_payload)?;
        self.last_direction = Some(Direction::Receiving);
        Ok(plaintext)
    }

    /// DH ratchet step on the sending side: fresh keypair, new root and
    /// sending chain.
    fn ratchet_send_keys(&mut self) {
        let new_secret = StaticSecret::random_from_rng(OsRng);
        let dh = new_secret.diffie_hellman(&PublicKey::from(self.their_dh_public));
        let (root_key, send_chain) = kdf_root(&self.root_key, dh.as_bytes());

        self.root_key = root_key;
        self.send_chain = send_chain;
        self.prev_chain_len = self.send_seq;
        self.send_seq = 0;
        self.dh_secret = new_secret.to_bytes();
        self.dh_public = *PublicKey::from(&new_secret).as_bytes();
    }

    /// The peer ratcheted: close out the old receiving chain, then derive
    /// the new one from their advertised public key.
    fn ratchet_recv_keys(
        &mut self,
        new_public: &[u8; 32],
        prev_chain_len: u32,
    ) -> Result<(), RatchetError> {
        // Cache any keys still owed to the old chain.
        while self.recv_seq < prev_chain_len {
            if self.skipped.len() as u32 >= self.max_skip {
                return Err(RatchetError::TooManySkipped {
                    requested: self.skipped.len() as u32 + 1,
                    max: self.max_skip,
                });
            }
            let (new_chain, message_key) = kdf_chain(&self.recv_chain);
            self.recv_chain = new_chain;
            self.skipped.push(SkippedKey {
                dh_public: self.their_dh_public,
                seq: self.recv_seq,
                message_key,
            });
            self.recv_seq += 1;
        }

        self.their_dh_public = *new_public;
        let secret = StaticSecret::from(self.dh_secret);
        let dh = secret.diffie_hellman(&PublicKey::from(*new_public));
        let (root_key, recv_chain) = kdf_root(&self.root_key, dh.as_bytes());
        self.root_key = root_key;
        self.recv_chain = recv_chain;
        self.recv_seq = 0;
        Ok(())
    }

    /// Advance the receiving chain to `target`, caching the intermediate
    /// keys, and return the key for `target` itself.
    fn skip_until(&mut self, target: u32) -> Result<[u8; 32], RatchetError> {
        let requested = target - self.recv_seq;
        if requested > self.max_skip || self.skipped.len() as u32 + requested > self.max_skip {
            return Err(RatchetError::TooManySkipped {
                requested,
                max: self.max_skip,
            });
        }

        while self.recv_seq < target {
            let (new_chain, message_key) = kdf_chain(&self.recv_chain);
            self.recv_chain = new_chain;
            self.skipped.push(SkippedKey {
                dh_public: self.their_dh_public,
                seq: self.recv_seq,
                message_key,
            });
            self.recv_seq += 1;
        }

        let (new_chain, message_key) = kdf_chain(&self.recv_chain);
        self.recv_chain = new_chain;
        self.recv_seq += 1;
        Ok(message_key)
    }

    fn take_skipped(&mut self, dh_public: &[u8; 32], seq: u32) -> Option<[u8; 32]> {
        let index = self
            .skipped
            .iter()
            .position(|k| k.dh_public == *dh_public && k.seq == seq)?;
        let entry = self.skipped.swap_remove(index);
        Some(entry.message_key)
    }
}

fn seal_box(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| RatchetError::Decrypt)?;
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| RatchetError::Decrypt)
}

fn open_box(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| RatchetError::Decrypt)?;
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| RatchetError::Decrypt)
}
