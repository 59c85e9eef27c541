use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use shared::{error::CommonError, primitives::WrappedChronoDateTime};
use utoipa::ToSchema;

/// Kind of hybrid key a record describes.
///
/// Records written before the type existed carry an empty value, which reads
/// back as [`KeyType::SinglePartyHybridKey`]. Any other unknown value is
/// rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    #[default]
    SinglePartyHybridKey,
    MultiPartyHybridKey,
    MultiPartyHybridEvenKeysplit,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::SinglePartyHybridKey => "SINGLE_PARTY_HYBRID_KEY",
            KeyType::MultiPartyHybridKey => "MULTI_PARTY_HYBRID_KEY",
            KeyType::MultiPartyHybridEvenKeysplit => "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT",
        }
    }
}

impl std::str::FromStr for KeyType {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "SINGLE_PARTY_HYBRID_KEY" => Ok(KeyType::SinglePartyHybridKey),
            "MULTI_PARTY_HYBRID_KEY" => Ok(KeyType::MultiPartyHybridKey),
            "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT" => Ok(KeyType::MultiPartyHybridEvenKeysplit),
            other => Err(CommonError::invalid_argument(format!(
                "unknown key type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl From<KeyType> for libsql::Value {
    fn from(value: KeyType) -> Self {
        libsql::Value::Text(value.as_str().to_string())
    }
}

/// A coordinator's attestation that it holds a split of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct KeySplitData {
    /// Identifies the KEK protecting this coordinator's split.
    pub key_split_key_encryption_key_uri: String,
    /// Base64 signature over the canonical key message, empty when the
    /// coordinator runs without a signing key.
    #[serde(default)]
    pub public_key_signature: String,
}

/// A split hybrid key as one coordinator stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncryptionKey {
    pub key_id: String,
    /// Base64 of the serialized public key handle.
    pub public_key: String,
    /// Public key material as published to clients, also covered by every
    /// split signature.
    pub public_key_material: String,
    /// URI of the KEK that protects `encrypted_private_material`.
    #[serde(default)]
    pub key_encryption_key_uri: String,
    /// Base64 ciphertext of this coordinator's split, empty on the wire.
    #[serde(default)]
    pub encrypted_private_material: String,
    #[serde(default)]
    pub key_split_data: Vec<KeySplitData>,
    #[serde(default)]
    pub key_type: KeyType,
    pub creation_time: WrappedChronoDateTime,
    pub activation_time: WrappedChronoDateTime,
    pub expiration_time: WrappedChronoDateTime,
    pub ttl_time: WrappedChronoDateTime,
}

impl EncryptionKey {
    /// Copy suitable for handing to another party.
    pub fn without_private_material(mut self) -> Self {
        self.encrypted_private_material = String::new();
        self
    }

    pub fn find_key_split_data(&self, key_encryption_key_uri: &str) -> Option<&KeySplitData> {
        self.key_split_data
            .iter()
            .find(|data| data.key_split_key_encryption_key_uri == key_encryption_key_uri)
    }
}

/// Associated data that binds a key split to its key: the decoded bytes of
/// the base64 public key material.
pub fn split_associated_data(public_key_material: &str) -> Result<Vec<u8>, CommonError> {
    base64::engine::general_purpose::STANDARD
        .decode(public_key_material)
        .map_err(|e| {
            CommonError::invalid_argument_with_source("public_key_material must be base64", e)
        })
}

/// How a split travelling to the peer is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeySplitEncryptionType {
    /// Encrypted under a data key the peer issued beforehand.
    DataKey,
    /// Encrypted directly under the peer's KEK.
    Direct,
}
