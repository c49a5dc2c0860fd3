use core::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::{
    name::ContentName,
    tlv::{encode_header, header_length, Encode, EncodingError, NonNegativeInteger, Write, TLV},
};

/// The request unit the substrate routes by name.
///
/// Only the fields needed to tunnel COPSS messages are modelled: the name,
/// a 4-byte nonce and an optional lifetime. Unknown non-critical TLVs after
/// the name are skipped on decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interest {
    pub name: ContentName,
    pub nonce: [u8; 4],
    pub lifetime_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterestDecodingError {
    #[error("not an interest")]
    WrongType,
    #[error("interest framing is malformed")]
    Malformed,
    #[error("interest is missing its name")]
    MissingName,
    #[error("interest nonce must be 4 bytes")]
    BadNonce,
    #[error("interest has trailing bytes")]
    TrailingBytes,
    #[error("interest carries unknown critical TLV {0}")]
    UnknownCritical(u32),
}

static NEXT_NONCE: AtomicU32 = AtomicU32::new(1);

impl Interest {
    pub const TLV_TYPE: u32 = 5;
    const NONCE_TYPE: u32 = 10;
    const LIFETIME_TYPE: u32 = 12;

    pub fn new(name: ContentName) -> Self {
        let nonce = NEXT_NONCE.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        Self {
            name,
            nonce,
            lifetime_ms: None,
        }
    }

    pub fn with_lifetime(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Decodes a whole interest packet, outer TLV included.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InterestDecodingError> {
        let (tlv, len) = TLV::try_decode(bytes).map_err(|_| InterestDecodingError::Malformed)?;
        if tlv.typ.get() != Self::TLV_TYPE {
            return Err(InterestDecodingError::WrongType);
        }
        if len != bytes.len() {
            return Err(InterestDecodingError::TrailingBytes);
        }
        Self::try_decode(tlv.val)
    }

    /// Decodes the value of an interest TLV.
    pub fn try_decode(inner_bytes: &[u8]) -> Result<Self, InterestDecodingError> {
        let mut offset = 0;

        let (name_tlv, name_len) =
            TLV::try_decode(inner_bytes).map_err(|_| InterestDecodingError::MissingName)?;
        if name_tlv.typ.get() != ContentName::TLV_TYPE {
            return Err(InterestDecodingError::MissingName); // Name must be the first TLV
        }
        offset += name_len;
        let name = ContentName::try_decode(name_tlv.val)
            .map_err(|_| InterestDecodingError::Malformed)?;

        let mut nonce = None;
        let mut lifetime_ms = None;

        while offset < inner_bytes.len() {
            let (tlv, tlv_len) = TLV::try_decode(&inner_bytes[offset..])
                .map_err(|_| InterestDecodingError::Malformed)?;
            match tlv.typ.get() {
                Self::NONCE_TYPE => {
                    nonce = Some(
                        tlv.val
                            .try_into()
                            .map_err(|_| InterestDecodingError::BadNonce)?,
                    )
                }
                Self::LIFETIME_TYPE => {
                    lifetime_ms = Some(tlv.val_as_u64().ok_or(InterestDecodingError::Malformed)?)
                }
                typ if is_critical(typ) => return Err(InterestDecodingError::UnknownCritical(typ)),
                _ => {}
            }
            offset += tlv_len;
        }

        Ok(Self {
            name,
            nonce: nonce.unwrap_or_default(),
            lifetime_ms,
        })
    }

    fn inner_length(&self) -> usize {
        self.name.encoded_length()
            + header_length(Self::NONCE_TYPE, 4)
            + 4
            + self
                .lifetime_ms
                .map(|l| NonNegativeInteger::new(Self::LIFETIME_TYPE, l).encoded_length())
                .unwrap_or(0)
    }
}

// Types 0-31 and odd types are critical
fn is_critical(typ: u32) -> bool {
    typ < 32 || typ & 1 == 1
}

impl Encode for Interest {
    fn encoded_length(&self) -> usize {
        let len = self.inner_length();
        header_length(Self::TLV_TYPE, len) + len
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        encode_header(Self::TLV_TYPE, self.inner_length(), writer)?;
        self.name.encode(writer)?;
        encode_header(Self::NONCE_TYPE, 4, writer)?;
        writer.write(&self.nonce)?;
        if let Some(lifetime_ms) = self.lifetime_ms {
            NonNegativeInteger::new(Self::LIFETIME_TYPE, lifetime_ms).encode(writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_encoding() {
        let interest = Interest {
            name: "/a".parse().unwrap(),
            nonce: [1, 2, 3, 4],
            lifetime_ms: Some(4000),
        };
        let bytes = interest.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![5, 15, 7, 3, 8, 1, b'a', 10, 4, 1, 2, 3, 4, 12, 2, 0x0f, 0xa0]
        );
        assert_eq!(bytes.len(), interest.encoded_length());
        assert_eq!(Interest::from_bytes(&bytes).unwrap(), interest);
    }

    #[test]
    fn test_nonces_differ() {
        let a = Interest::new(ContentName::root());
        let b = Interest::new(ContentName::root());
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.lifetime_ms, None);
    }

    #[test]
    fn test_skips_non_critical_tlvs() {
        // Name, then an unknown even type 34, then the nonce
        let bytes = [5, 11, 7, 0, 34, 1, 0xff, 10, 4, 9, 9, 9, 9];
        let interest = Interest::from_bytes(&bytes).unwrap();
        assert!(interest.name.is_root());
        assert_eq!(interest.nonce, [9, 9, 9, 9]);
    }

    #[test]
    fn test_rejects_bad_interests() {
        assert_eq!(
            Interest::from_bytes(&[6, 2, 7, 0]),
            Err(InterestDecodingError::WrongType)
        );
        assert_eq!(
            Interest::from_bytes(&[5, 2, 7, 0, 0]),
            Err(InterestDecodingError::TrailingBytes)
        );
        assert_eq!(
            Interest::from_bytes(&[5, 3, 8, 1, b'a']),
            Err(InterestDecodingError::MissingName)
        );
        assert_eq!(
            Interest::from_bytes(&[5, 5, 7, 0, 10, 1, 1]),
            Err(InterestDecodingError::BadNonce)
        );
        assert_eq!(
            Interest::from_bytes(&[5, 5, 7, 0, 35, 1, 1]),
            Err(InterestDecodingError::UnknownCritical(35))
        );
        assert_eq!(
            Interest::from_bytes(&[5, 9, 7, 0]),
            Err(InterestDecodingError::Malformed)
        );
    }
}
