//! KDF chains for the ratchet.
//!
//! All derivations are HKDF-SHA256 with domain separation labels. Chain
//! keys advance one way: compromise of a current key never reveals the
//! keys that came before it.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

const LABEL_ROOT: &[u8] = b"MIXSPOOL-RATCHET-ROOT";
const LABEL_HEADER: &[u8] = b"MIXSPOOL-RATCHET-HEADER";
const LABEL_CHAIN: &[u8] = b"MIXSPOOL-RATCHET-CHAIN";
const LABEL_MESSAGE: &[u8] = b"MIXSPOOL-RATCHET-MESSAGE";
const LABEL_CHAIN_FIRST: &[u8] = b"MIXSPOOL-RATCHET-SEND-FIRST";
const LABEL_CHAIN_SECOND: &[u8] = b"MIXSPOOL-RATCHET-SEND-SECOND";

/// Session secrets derived once from the key-exchange triple-DH output.
pub(crate) struct SessionSecrets {
    /// Initial root key.
    pub root_key: [u8; 32],
    /// Static header encryption key, shared by both directions.
    pub header_key: [u8; 32],
    /// Initial sending chain for the endpoint with the smaller identity key.
    pub first_chain: [u8; 32],
    /// Initial sending chain for the other endpoint.
    pub second_chain: [u8; 32],
}

impl Drop for SessionSecrets {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.header_key.zeroize();
        self.first_chain.zeroize();
        self.second_chain.zeroize();
    }
}

/// Derive the session secrets. `shared` is the concatenated triple-DH
/// output; `salt` is the two identity public keys in role order, so both
/// endpoints derive identical values.
pub(crate) fn derive_session(shared: &[u8], salt: &[u8]) -> SessionSecrets {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);

    let mut root_key = [0u8; 32];
    let mut header_key = [0u8; 32];
    let mut first_chain = [0u8; 32];
    let mut second_chain = [0u8; 32];

    hk.expand(LABEL_ROOT, &mut root_key)
        .expect("32 bytes is valid output length");
    hk.expand(LABEL_HEADER, &mut header_key)
        .expect("32 bytes is valid output length");
    hk.expand(LABEL_CHAIN_FIRST, &mut first_chain)
        .expect("32 bytes is valid output length");
    hk.expand(LABEL_CHAIN_SECOND, &mut second_chain)
        .expect("32 bytes is valid output length");

    SessionSecrets {
        root_key,
        header_key,
        first_chain,
        second_chain,
    }
}

/// Root KDF step: mix a fresh DH output into the root key, producing the
/// next root key and a new chain key.
pub(crate) fn kdf_root(root_key: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(root_key), dh_output);

    let mut new_root = [0u8; 32];
    let mut chain_key = [0u8; 32];

    hk.expand(LABEL_ROOT, &mut new_root)
        .expect("32 bytes is valid output length");
    hk.expand(LABEL_CHAIN, &mut chain_key)
        .expect("32 bytes is valid output length");

    (new_root, chain_key)
}

/// Symmetric chain step: advance the chain key and derive a single-use
/// message key.
pub(crate) fn kdf_chain(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(None, chain_key);

    let mut new_chain = [0u8; 32];
    let mut message_key = [0u8; 32];

    hk.expand(LABEL_CHAIN, &mut new_chain)
        .expect("32 bytes is valid output length");
    hk.expand(LABEL_MESSAGE, &mut message_key)
        .expect("32 bytes is valid output length");

    (new_chain, message_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_chain_is_deterministic() {
        let chain = [7u8; 32];
        assert_eq!(kdf_chain(&chain), kdf_chain(&chain));
    }

    #[test]
    fn test_kdf_chain_outputs_differ() {
        let (new_chain, message_key) = kdf_chain(&[7u8; 32]);
        assert_ne!(new_chain, message_key);
        assert_ne!(new_chain, [7u8; 32]);
    }

    #[test]
    fn test_kdf_root_mixes_dh_output() {
        let root = [1u8; 32];
        let (root_a, chain_a) = kdf_root(&root, &[2u8; 32]);
        let (root_b, chain_b) = kdf_root(&root, &[3u8; 32]);
        assert_ne!(root_a, root_b);
        assert_ne!(chain_a, chain_b);
    }

    #[test]
    fn test_derive_session_role_symmetry() {
        let shared = [9u8; 96];
        let salt = [4u8; 64];
        let a = derive_session(&shared, &salt);
        let b = derive_session(&shared, &salt);
        assert_eq!(a.root_key, b.root_key);
        assert_eq!(a.header_key, b.header_key);
        assert_eq!(a.first_chain, b.first_chain);
        assert_eq!(a.second_chain, b.second_chain);
        assert_ne!(a.first_chain, a.second_chain);
    }
}
