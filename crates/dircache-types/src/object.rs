use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TypeError;

/// Bytes in an object name under the SHA-256 object format.
pub const OBJECT_ID_LEN: usize = 32;

/// The name of a stored object.
///
/// Equal content always gets the same name, so the index can tell whether
/// two entries or two trees hold the same thing by comparing ids alone.
/// Ordering is bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// SHA-256 of `data` with no object header.
    ///
    /// Real object names go through `dircache_crypto::ContentHasher`.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_hash(hash: [u8; OBJECT_ID_LEN]) -> Self {
        Self(hash)
    }

    /// Copy an id out of a slice of exactly [`OBJECT_ID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        <[u8; OBJECT_ID_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| TypeError::InvalidLength {
                expected: OBJECT_ID_LEN,
                actual: bytes.len(),
            })
    }

    /// All zeros. Stands for "no object", e.g. an unresolved tree.
    pub const fn null() -> Self {
        Self([0; OBJECT_ID_LEN])
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes in hex, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        hex::decode(s)
            .map_err(|e| TypeError::InvalidHex(e.to_string()))
            .and_then(|bytes| Self::from_slice(&bytes))
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.short_hex()).finish()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; OBJECT_ID_LEN]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_digest_of_known_input() {
        assert_eq!(
            ObjectId::from_bytes(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ObjectId::from_bytes(b"abc"), ObjectId::from_bytes(b"abc"));
    }

    #[test]
    fn null_id() {
        assert!(ObjectId::null().is_null());
        assert!(!ObjectId::from_bytes(b"").is_null());
        assert_eq!(ObjectId::null().to_hex(), "0".repeat(64));
    }

    #[test]
    fn parses_its_own_hex() {
        let id = ObjectId::from_bytes(b"index");
        assert_eq!(id.to_hex().parse::<ObjectId>().unwrap(), id);
        assert_eq!(id.to_string(), id.to_hex());
        assert!(id.to_hex().starts_with(&id.short_hex()));
        assert_eq!(format!("{id:?}"), format!("ObjectId({:?})", id.short_hex()));
    }

    #[test]
    fn sha1_width_is_rejected() {
        assert_eq!(
            ObjectId::from_hex(&"ab".repeat(20)),
            Err(TypeError::InvalidLength {
                expected: 32,
                actual: 20
            })
        );
        assert!(ObjectId::from_slice(&[0; 33]).is_err());
    }

    #[test]
    fn non_hex_is_rejected() {
        assert!(matches!(
            ObjectId::from_hex("not hex"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn serde_uses_raw_bytes() {
        let id = ObjectId::from_hash([7; OBJECT_ID_LEN]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<ObjectId>(&json).unwrap(), id);
        assert!(json.starts_with("[7,7,"));
    }

    #[test]
    fn ordering_is_bytewise() {
        let mut low = [0xff; OBJECT_ID_LEN];
        low[0] = 0;
        assert!(ObjectId::from_hash(low) < ObjectId::from_hash([1; OBJECT_ID_LEN]));
    }
}
