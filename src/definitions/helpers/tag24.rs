//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::cbor::{self, CborError, Value};

/// A wrapper for a struct that is to be encoded as a CBOR tagged item, with tag number 24.
///
/// If this struct is created through deserializing CBOR, then the original byte representation is
/// preserved for future serializing. Keys and transcripts are hashed over these bytes, so they
/// must never be re-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    pub inner_bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Expected a CBOR byte string, received: '{0:?}'")]
    InvalidTag24(Box<Value>),
    #[error("Expected a CBOR tagged data item with tag number 24, received: '{0:?}'")]
    NotATag24(Value),
    #[error("Unable to encode value as CBOR: {0}")]
    UnableToEncode(CborError),
    #[error("Unable to decode bytes to inner type: {0}")]
    UnableToDecode(CborError),
}

impl<T> Tag24<T> {
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Serialize + de::DeserializeOwned> Tag24<T> {
    pub fn new(inner: T) -> Result<Tag24<T>, Error> {
        let inner_bytes = cbor::to_vec(&inner).map_err(Error::UnableToEncode)?;
        let inner = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(Self { inner, inner_bytes })
    }

    pub fn from_bytes(inner_bytes: Vec<u8>) -> Result<Tag24<T>, Error> {
        let inner = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(Self { inner, inner_bytes })
    }

    /// The full encoding, including the tag and the byte string header.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, Error> {
        cbor::to_vec(&Value::from(self)).map_err(Error::UnableToEncode)
    }
}

impl<T: de::DeserializeOwned> TryFrom<Value> for Tag24<T> {
    type Error = Error;

    fn try_from(v: Value) -> Result<Tag24<T>, Error> {
        match v {
            Value::Tag(24, inner_value) => match *inner_value {
                Value::Bytes(inner_bytes) => {
                    let inner = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
                    Ok(Tag24 { inner, inner_bytes })
                }
                other => Err(Error::InvalidTag24(Box::new(other))),
            },
            _ => Err(Error::NotATag24(v)),
        }
    }
}

impl<T> From<&Tag24<T>> for Value {
    fn from(tag: &Tag24<T>) -> Value {
        Value::Tag(24, Box::new(Value::Bytes(tag.inner_bytes.clone())))
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> Serialize for Tag24<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self).serialize(serializer)
    }
}

impl<'de, T: de::DeserializeOwned> Deserialize<'de> for Tag24<T> {
    fn deserialize<D>(d: D) -> Result<Tag24<T>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(d)?
            .try_into()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::Tag24;
    use crate::cbor;

    #[test]
    fn preserves_inner_bytes() {
        let original = Tag24::new("some data".to_string()).unwrap();
        let cbor = cbor::to_vec(&original).unwrap();
        assert_eq!(&cbor[..3], &[0xD8, 0x18, 0x4A]);
        let roundtripped: Tag24<String> = cbor::from_slice(&cbor).unwrap();
        assert_eq!(original, roundtripped);
        assert_eq!(original.to_tagged_bytes().unwrap(), cbor);
    }

    #[test]
    fn untagged_bytes_are_rejected() {
        let bytes = cbor::to_vec(&crate::definitions::helpers::ByteStr::from(vec![0x60])).unwrap();
        assert!(cbor::from_slice::<Tag24<String>>(&bytes).is_err());
    }
}
