//! One-shot Noise X handshake (`Noise_X_25519_ChaChaPoly_SHA256`).
//!
//! The X pattern carries the whole exchange in a single message:
//!
//! ```text
//! <- s            (recipient static known to the sender beforehand)
//! -> e, es, s, ss (ephemeral, sender static, payload)
//! ```
//!
//! Every sealed message is an independent handshake, so messages stay
//! individually decipherable no matter how the mixnet reorders them. The
//! recipient learns the sender's static key, authenticated by the `ss`
//! token; it is the caller's job to compare it against the pinned peer key.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Ciphertext overhead of one sealed message: cleartext ephemeral key,
/// sealed sender static key, and the payload tag.
pub const NOISE_OVERHEAD: usize = 32 + (32 + TAG_SIZE) + TAG_SIZE;

const PROTOCOL_NAME: &[u8] = b"Noise_X_25519_ChaChaPoly_SHA256";
const TAG_SIZE: usize = 16;

/// Errors from sealing or opening a handshake message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoiseError {
    /// Message shorter than the fixed handshake overhead.
    #[error("handshake message truncated")]
    Truncated,

    /// AEAD failure while sealing.
    #[error("handshake encryption failed")]
    Encrypt,

    /// AEAD failure while opening: tampering, or a message that was not
    /// encrypted to our static key.
    #[error("handshake decryption failed")]
    Decrypt,
}

/// The `ck`/`h` pair the Noise spec calls the symmetric state, plus the
/// current cipher key and nonce counter.
struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    key: Option<[u8; 32]>,
    nonce: u64,
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.zeroize();
        if let Some(ref mut key) = self.key {
            key.zeroize();
        }
    }
}

impl SymmetricState {
    fn new() -> Self {
        // The protocol name is shorter than the hash output, so it is
        // zero-padded rather than hashed.
        let mut h = [0u8; 32];
        h[..PROTOCOL_NAME.len()].copy_from_slice(PROTOCOL_NAME);

        let mut state = Self {
            ck: h,
            h,
            key: None,
            nonce: 0,
        };
        // Empty prologue.
        state.mix_hash(&[]);
        state
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.h);
        hasher.update(data);
        self.h = hasher.finalize().into();
    }

    fn mix_key(&mut self, input: &[u8]) {
        let hk = hkdf::Hkdf::<Sha256>::new(Some(&self.ck), input);
        let mut okm = [0u8; 64];
        hk.expand(&[], &mut okm).expect("64 bytes is valid output length");

        self.ck.copy_from_slice(&okm[..32]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&okm[32..]);
        self.key = Some(key);
        self.nonce = 0;
        okm.zeroize();
    }

    /// 96-bit ChaChaPoly nonce: four zero bytes then the counter,
    /// little-endian.
    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.nonce.to_le_bytes());
        self.nonce += 1;
        nonce
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let key = self.key.expect("cipher key must be mixed before encryption");
        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| NoiseError::Encrypt)?;
        let nonce = self.next_nonce();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                chacha20poly1305::aead::Payload {
                    msg: plaintext,
                    aad: &self.h,
                },
            )
            .map_err(|_| NoiseError::Encrypt)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let key = self.key.expect("cipher key must be mixed before decryption");
        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| NoiseError::Decrypt)?;
        let nonce = self.next_nonce();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                chacha20poly1305::aead::Payload {
                    msg: ciphertext,
                    aad: &self.h,
                },
            )
            .map_err(|_| NoiseError::Decrypt)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }
}

/// Seal `plaintext` to the recipient's static key, authenticating with the
/// sender's static key. Output layout:
/// `ephemeral pub (32) || sealed sender static (48) || sealed payload`.
pub fn seal(
    sender_static: &[u8; 32],
    recipient_static: &[u8; 32],
    plaintext: &[u8],
) -> Result<Vec<u8>, NoiseError> {
    let sender = StaticSecret::from(*sender_static);
    let sender_public = PublicKey::from(&sender);
    let recipient = PublicKey::from(*recipient_static);

    let mut state = SymmetricState::new();
    // Pre-message: the recipient's static key.
    state.mix_hash(recipient.as_bytes());

    let mut message = Vec::with_capacity(plaintext.len() + NOISE_OVERHEAD);

    // e
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    message.extend_from_slice(ephemeral_public.as_bytes());
    state.mix_hash(ephemeral_public.as_bytes());

    // es
    state.mix_key(ephemeral.diffie_hellman(&recipient).as_bytes());

    // s
    let sealed_static = state.encrypt_and_hash(sender_public.as_bytes())?;
    message.extend_from_slice(&sealed_static);

    // ss
    state.mix_key(sender.diffie_hellman(&recipient).as_bytes());

    // payload
    let sealed_payload = state.encrypt_and_hash(plaintext)?;
    message.extend_from_slice(&sealed_payload);

    Ok(message)
}

/// Open a sealed message with our static key. Returns the payload and the
/// sender's authenticated static public key.
pub fn open(
    recipient_static: &[u8; 32],
    message: &[u8],
) -> Result<(Vec<u8>, [u8; 32]), NoiseError> {
    if message.len() < NOISE_OVERHEAD {
        return Err(NoiseError::Truncated);
    }
    let recipient = StaticSecret::from(*recipient_static);
    let recipient_public = PublicKey::from(&recipient);

    let mut state = SymmetricState::new();
    state.mix_hash(recipient_public.as_bytes());

    // e
    let mut ephemeral_bytes = [0u8; 32];
    ephemeral_bytes.copy_from_slice(&message[..32]);
    let ephemeral = PublicKey::from(ephemeral_bytes);
    state.mix_hash(ephemeral.as_bytes());

    // es
    state.mix_key(recipient.diffie_hellman(&ephemeral).as_bytes());

    // s
    let sender_bytes = state.decrypt_and_hash(&message[32..32 + 32 + TAG_SIZE])?;
    let mut sender_public = [0u8; 32];
    sender_public.copy_from_slice(&sender_bytes);

    // ss
    state.mix_key(recipient.diffie_hellman(&PublicKey::from(sender_public)).as_bytes());

    // payload
    let payload = state.decrypt_and_hash(&message[32 + 32 + TAG_SIZE..])?;

    Ok((payload, sender_public))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> ([u8; 32], [u8; 32]) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret.to_bytes(), *public.as_bytes())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (sender_secret, sender_public) = keypair();
        let (recipient_secret, recipient_public) = keypair();

        let message = seal(&sender_secret, &recipient_public, b"hello noise").unwrap();
        let (payload, observed_sender) = open(&recipient_secret, &message).unwrap();

        assert_eq!(payload, b"hello noise");
        assert_eq!(observed_sender, sender_public);
    }

    #[test]
    fn test_overhead_is_exact() {
        let (sender_secret, _) = keypair();
        let (_, recipient_public) = keypair();

        for len in [0usize, 1, 100, 1000] {
            let plaintext = vec![0x5au8; len];
            let message = seal(&sender_secret, &recipient_public, &plaintext).unwrap();
            assert_eq!(message.len(), len + NOISE_OVERHEAD);
        }
    }

    #[test]
    fn test_open_with_wrong_recipient_fails() {
        let (sender_secret, _) = keypair();
        let (_, recipient_public) = keypair();
        let (other_secret, _) = keypair();

        let message = seal(&sender_secret, &recipient_public, b"secret").unwrap();
        assert_eq!(open(&other_secret, &message), Err(NoiseError::Decrypt));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let (sender_secret, _) = keypair();
        let (recipient_secret, recipient_public) = keypair();

        let mut message = seal(&sender_secret, &recipient_public, b"secret").unwrap();
        let last = message.len() - 1;
        message[last] ^= 0x01;

        assert_eq!(open(&recipient_secret, &message), Err(NoiseError::Decrypt));
    }

    #[test]
    fn test_tampered_static_fails() {
        let (sender_secret, _) = keypair();
        let (recipient_secret, recipient_public) = keypair();

        let mut message = seal(&sender_secret, &recipient_public, b"secret").unwrap();
        message[40] ^= 0x01; // inside the sealed static key

        assert_eq!(open(&recipient_secret, &message), Err(NoiseError::Decrypt));
    }

    #[test]
    fn test_truncated_message_fails() {
        let (recipient_secret, _) = keypair();
        assert_eq!(
            open(&recipient_secret, &[0u8; NOISE_OVERHEAD - 1]),
            Err(NoiseError::Truncated)
        );
    }
}
