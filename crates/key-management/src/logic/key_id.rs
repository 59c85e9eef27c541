use shared::error::CommonError;
use tracing::warn;

use crate::repository::KeyDb;

/// Sequence ids are allocated from keys created within this window.
pub const SEQUENCE_LOOKBACK_HOURS: i64 = 1176;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyIdFactory {
    #[default]
    Uuid,
    /// Bit-reversed counter rendered as 16 hex digits, so consecutive ids
    /// spread across the key space.
    Sequence,
}

impl std::str::FromStr for KeyIdFactory {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uuid" => Ok(KeyIdFactory::Uuid),
            "sequence" => Ok(KeyIdFactory::Sequence),
            other => Err(CommonError::invalid_argument(format!(
                "unknown key id type: {other}"
            ))),
        }
    }
}

impl KeyIdFactory {
    pub async fn next_key_id<R: KeyDb + ?Sized>(&self, key_db: &R) -> Result<String, CommonError> {
        match self {
            KeyIdFactory::Uuid => Ok(uuid::Uuid::new_v4().to_string()),
            KeyIdFactory::Sequence => {
                let recent = key_db
                    .list_recent_keys(chrono::Duration::hours(SEQUENCE_LOOKBACK_HOURS))
                    .await?;
                let mut used = Vec::with_capacity(recent.len());
                for key in &recent {
                    match decode_sequence_key_id(&key.key_id) {
                        Ok(value) => used.push(value),
                        Err(_) => warn!(key_id = %key.key_id, "ignoring non-sequence key id"),
                    }
                }
                used.sort_unstable();
                used.dedup();
                Ok(encode_sequence_key_id(next_sequence_value(&used)?))
            }
        }
    }
}

pub fn encode_sequence_key_id(value: u64) -> String {
    format!("{:016X}", value.reverse_bits())
}

pub fn decode_sequence_key_id(key_id: &str) -> Result<u64, CommonError> {
    u64::from_str_radix(key_id, 16)
        .map(u64::reverse_bits)
        .map_err(|e| {
            CommonError::invalid_argument_with_source(
                format!("not a sequence key id: {key_id}"),
                e,
            )
        })
}

/// Smallest value past the contiguous run that starts at the lowest used value.
fn next_sequence_value(sorted: &[u64]) -> Result<u64, CommonError> {
    let Some((first, rest)) = sorted.split_first() else {
        return Ok(0);
    };

    let carry = rest.iter().fold(*first, |carry, next| {
        if carry.checked_add(1) == Some(*next) {
            *next
        } else {
            carry
        }
    });

    carry
        .checked_add(1)
        .ok_or_else(|| CommonError::internal("sequence key id space exhausted"))
}
