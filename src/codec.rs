//! CBOR encoding helpers.
//!
//! Every persistent blob in this crate (saved channels, key-exchange blobs)
//! goes through these two functions so the on-disk format stays a single
//! canonical encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ChannelError;

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ChannelError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| ChannelError::Serialization(e.to_string()))?;
    Ok(out)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ChannelError> {
    ciborium::de::from_reader(bytes).map_err(|e| ChannelError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Sample {
        id: [u8; 16],
        offset: u32,
        label: String,
    }

    #[test]
    fn test_cbor_roundtrip() {
        let sample = Sample {
            id: [7u8; 16],
            offset: 42,
            label: "provider_a".to_string(),
        };

        let bytes = to_cbor(&sample).unwrap();
        let decoded: Sample = from_cbor(&bytes).unwrap();

        assert_eq!(sample, decoded);
    }

    #[test]
    fn test_cbor_is_deterministic() {
        let sample = Sample {
            id: [1u8; 16],
            offset: 1,
            label: "x".to_string(),
        };

        assert_eq!(to_cbor(&sample).unwrap(), to_cbor(&sample).unwrap());
    }

    #[test]
    fn test_cbor_rejects_garbage() {
        let result: Result<Sample, _> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
