//! Cryptographic primitives for Rialto.
//!
//! Provides three things:
//!   1. BLAKE3 hashing — entry identities, persistable-payload hashes
//!   2. Ed25519 signing — protected-entry ownership, envelope authentication
//!   3. Sealed envelopes — X25519 ECDH + ChaCha20-Poly1305 for encrypted
//!      point-to-point messages
//!
//! A node's identity is a [`KeyRing`]: one Ed25519 keypair for signatures
//! and one X25519 keypair for encryption. The public halves travel on the
//! wire as a [`PubKeyRing`].
//!
//! All private key material is ZeroizeOnDrop — wiped from memory when
//! dropped. There is no unsafe code in this module.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
///
/// Used for entry identities, persistable-payload hashes, and the
/// sealed-envelope signature input.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Context string for deriving the sealed-envelope AEAD key from the
/// X25519 shared secret. Changing this breaks wire compatibility.
const SEAL_KDF_CONTEXT: &str = "rialto sealed envelope v1";

// ── PubKeyRing ────────────────────────────────────────────────────────────────

/// The public half of a node's key ring: Ed25519 signing key and
/// X25519 encryption key. This is how peers identify each other in
/// protected-storage entries and direct messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKeyRing {
    /// Ed25519 verifying key bytes.
    pub signing: [u8; 32],
    /// X25519 public key bytes.
    pub encryption: [u8; 32],
}

impl PubKeyRing {
    /// Short hex prefix of the signing key, for log output.
    pub fn short_id(&self) -> String {
        hex::encode(&self.signing[..8])
    }
}

// ── KeyRing ───────────────────────────────────────────────────────────────────

/// A node's long-term key material: Ed25519 signing keypair plus
/// X25519 encryption keypair.
///
/// Generated once per node and stored persistently. The private halves
/// never leave this struct; [`KeyRing::private_bytes`] exists only for
/// checkpointing to the node's own key store.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyRing {
    signing_secret: Zeroizing<[u8; 32]>,
    encryption_secret: Zeroizing<[u8; 32]>,
    #[zeroize(skip)]
    pub_key_ring: PubKeyRing,
}

impl KeyRing {
    /// Generate a fresh random key ring.
    pub fn generate() -> Self {
        let mut signing = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut signing);
        let mut encryption = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut encryption);
        Self::from_private(signing, encryption)
    }

    /// Reconstruct a key ring from stored private key bytes.
    /// Both public keys are derived deterministically.
    pub fn from_private(signing_secret: [u8; 32], encryption_secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&signing_secret);
        let enc_secret = StaticSecret::from(encryption_secret);
        let pub_key_ring = PubKeyRing {
            signing: signing_key.verifying_key().to_bytes(),
            encryption: *PublicKey::from(&enc_secret).as_bytes(),
        };
        Self {
            signing_secret: Zeroizing::new(signing_secret),
            encryption_secret: Zeroizing::new(encryption_secret),
            pub_key_ring,
        }
    }

    /// The public halves, as sent on the wire.
    pub fn pub_key_ring(&self) -> &PubKeyRing {
        &self.pub_key_ring
    }

    /// Serialize the private keys for persistent storage.
    /// Store these bytes securely (mode 0600, ideally encrypted at rest).
    pub fn private_bytes(&self) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
        (
            Zeroizing::new(*self.signing_secret),
            Zeroizing::new(*self.encryption_secret),
        )
    }

    /// Sign a message with the node's Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let key = SigningKey::from_bytes(&self.signing_secret);
        key.sign(message).to_bytes().to_vec()
    }
}

/// Verify an Ed25519 signature against a 32-byte verifying key.
///
/// Returns false on malformed keys or signatures — a peer sending
/// garbage must never produce an error path the caller has to handle.
pub fn verify(signing_pub_key: &[u8; 32], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(signing_pub_key) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

// ── Sealed envelopes ──────────────────────────────────────────────────────────

/// An encrypted, signed point-to-point envelope.
///
/// Construction: an ephemeral X25519 key agrees with the recipient's
/// encryption key; the shared secret is run through BLAKE3 derive_key
/// to produce the ChaCha20-Poly1305 key; the sender then signs
/// `BLAKE3(ephemeral_pub || nonce || ciphertext)` with their Ed25519
/// key. The sender's full [`PubKeyRing`] travels alongside so the
/// recipient can verify and reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedAndSigned {
    pub sender_pub_key_ring: PubKeyRing,
    pub ephemeral_pub: [u8; 32],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SealedAndSigned {
    fn signature_input(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(44 + self.ciphertext.len());
        buf.extend_from_slice(&self.ephemeral_pub);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        hash(&buf)
    }
}

/// Encrypt a plaintext for `recipient` and sign it as `sender`.
pub fn encrypt_and_sign(
    sender: &KeyRing,
    recipient: &PubKeyRing,
    plaintext: &[u8],
) -> Result<SealedAndSigned, CryptoError> {
    let ephemeral = StaticSecret::random_from_rng(rand::thread_rng());
    let ephemeral_pub = *PublicKey::from(&ephemeral).as_bytes();

    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.encryption));
    let key = blake3::derive_key(SEAL_KDF_CONTEXT, shared.as_bytes());

    let mut nonce = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = SealedAndSigned {
        sender_pub_key_ring: sender.pub_key_ring().clone(),
        ephemeral_pub,
        nonce,
        ciphertext,
        signature: Vec::new(),
    };
    sealed.signature = sender.sign(&sealed.signature_input());
    Ok(sealed)
}

/// Verify the sender signature and decrypt the ciphertext.
///
/// The two failure modes are distinct: [`CryptoError::BadSignature`]
/// means the envelope was tampered with or mis-attributed;
/// [`CryptoError::Decryption`] means it was not encrypted to our key
/// (expected background noise for messages addressed to a previous
/// identity).
pub fn decrypt_and_verify(
    key_ring: &KeyRing,
    sealed: &SealedAndSigned,
) -> Result<Vec<u8>, CryptoError> {
    if !verify(
        &sealed.sender_pub_key_ring.signing,
        &sealed.signature_input(),
        &sealed.signature,
    ) {
        return Err(CryptoError::BadSignature);
    }

    let secret = StaticSecret::from(*key_ring.encryption_secret);
    let shared = secret.diffie_hellman(&PublicKey::from(sealed.ephemeral_pub));
    let key = blake3::derive_key(SEAL_KDF_CONTEXT, shared.as_bytes());

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature verification failed")]
    BadSignature,

    #[error("decryption failed — message not addressed to this key")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
