use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use shared::error::CommonError;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Freshly generated hybrid keypair, before it is split.
pub struct HybridKeyPair {
    /// Serialized public key handle.
    pub public_key: Vec<u8>,
    /// Base64 public key bytes, the form published to encrypting clients.
    pub public_key_material: String,
    private_key: Zeroizing<Vec<u8>>,
}

impl HybridKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public_key: public.as_bytes().to_vec(),
            public_key_material: base64::engine::general_purpose::STANDARD.encode(public.as_bytes()),
            private_key: Zeroizing::new(secret.to_bytes().to_vec()),
        }
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

/// Breaks private key material into shares and puts it back together.
pub trait KeySplitter: Send + Sync {
    fn split(&self, private_key: &[u8]) -> Result<Vec<Zeroizing<Vec<u8>>>, CommonError>;

    fn combine(&self, splits: &[&[u8]]) -> Result<Zeroizing<Vec<u8>>, CommonError>;
}

/// n-of-n XOR sharing: n-1 random shares plus one that XORs back to the key.
#[derive(Debug, Clone, Copy)]
pub struct XorKeySplitter {
    shares: usize,
}

impl XorKeySplitter {
    pub fn new(shares: usize) -> Result<Self, CommonError> {
        if shares < 2 {
            return Err(CommonError::invalid_argument(format!(
                "a key must be split into at least 2 shares, got {shares}"
            )));
        }
        Ok(Self { shares })
    }
}

impl Default for XorKeySplitter {
    fn default() -> Self {
        Self { shares: 2 }
    }
}

impl KeySplitter for XorKeySplitter {
    fn split(&self, private_key: &[u8]) -> Result<Vec<Zeroizing<Vec<u8>>>, CommonError> {
        if private_key.is_empty() {
            return Err(CommonError::invalid_argument("cannot split empty key material"));
        }

        let mut last = Zeroizing::new(private_key.to_vec());
        let mut splits = Vec::with_capacity(self.shares);
        for _ in 1..self.shares {
            let mut share = Zeroizing::new(vec![0u8; private_key.len()]);
            OsRng.fill_bytes(&mut share);
            for (byte, mask) in last.iter_mut().zip(share.iter()) {
                *byte ^= mask;
            }
            splits.push(share);
        }
        splits.push(last);
        Ok(splits)
    }

    fn combine(&self, splits: &[&[u8]]) -> Result<Zeroizing<Vec<u8>>, CommonError> {
        if splits.len() != self.shares {
            return Err(CommonError::invalid_argument(format!(
                "expected {} key splits, got {}",
                self.shares,
                splits.len()
            )));
        }
        let len = splits[0].len();
        if splits.iter().any(|split| split.len() != len) {
            return Err(CommonError::invalid_argument("key splits differ in length"));
        }

        let mut combined = Zeroizing::new(vec![0u8; len]);
        for split in splits {
            for (byte, share) in combined.iter_mut().zip(split.iter()) {
                *byte ^= share;
            }
        }
        Ok(combined)
    }
}
