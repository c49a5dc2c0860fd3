mod control;
pub mod encap;
mod multicast;

pub use control::{Control, ControlType};
pub use multicast::Multicast;

use thiserror::Error;

use crate::{
    name::ContentName,
    packet::{Interest, InterestDecodingError},
    tlv::{peek_type, EncodingError, TlvDecodingError, TLV},
};

// Wire tags. These are shared with every peer and must not change.
pub const TAG_CONTROL: u32 = 200;
pub const TAG_MULTICAST: u32 = 201;
pub const TAG_FIB_CHANGE: u32 = 211;
pub const TAG_ST_CHANGE: u32 = 212;
pub const TAG_ADDED_COUNT: u32 = 220;
pub const TAG_REMOVED_COUNT: u32 = 221;
pub const TAG_CONTROL_TYPE: u32 = 230;
pub const TAG_VERSION: u32 = 231;
pub const TAG_TTL: u32 = 232;
pub const TAG_PAYLOAD: u32 = 233;

/// Largest datagram the router sends or accepts.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad framing: {0}")]
    Framing(#[from] TlvDecodingError),
    #[error("expected a TLV of type {expected}, found {found}")]
    UnexpectedType { expected: u32, found: u32 },
    #[error("unexpected field {0} in message")]
    UnexpectedField(u32),
    #[error("unknown control type {0}")]
    UnknownControlType(u64),
    #[error("required field {0} is missing")]
    MissingField(u32),
    #[error("field {0} does not hold a valid integer")]
    BadInteger(u32),
    #[error("declared {declared} names but found {found}")]
    CountMismatch { declared: u64, found: usize },
    #[error("multicast message carries no content descriptors")]
    NoContentDescriptors,
    #[error("malformed name")]
    BadName,
    #[error("trailing bytes after message")]
    TrailingBytes,
    #[error("tunnelled payload is not valid base64")]
    Base64,
    #[error("bad request unit: {0}")]
    Interest(#[from] InterestDecodingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("multicast message needs at least one content descriptor")]
    NoContentDescriptors,
    #[error("cannot tunnel towards the root name")]
    RootRendezvous,
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),
}

/// What a datagram claims to be, judged only by its outer tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Envelope {
    Control,
    Multicast,
    Interest,
    Other,
}

pub fn peek_envelope(bytes: &[u8]) -> Envelope {
    match peek_type(bytes) {
        Ok(TAG_CONTROL) => Envelope::Control,
        Ok(TAG_MULTICAST) => Envelope::Multicast,
        Ok(Interest::TLV_TYPE) => Envelope::Interest,
        _ => Envelope::Other,
    }
}

/// Returns the value of the single TLV of type `tag` that makes up `bytes`.
pub(crate) fn open_envelope(bytes: &[u8], tag: u32) -> Result<&[u8], DecodeError> {
    let (tlv, len) = TLV::try_decode(bytes)?;
    if tlv.typ.get() != tag {
        return Err(DecodeError::UnexpectedType {
            expected: tag,
            found: tlv.typ.get(),
        });
    }
    if len != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(tlv.val)
}

/// Walks the fields inside an envelope.
pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub(crate) fn next_field(&mut self) -> Result<Option<TLV<'a>>, DecodeError> {
        if self.cursor >= self.bytes.len() {
            return Ok(None);
        }
        let (tlv, len) = TLV::try_decode(&self.bytes[self.cursor..])?;
        self.cursor += len;
        Ok(Some(tlv))
    }

    /// Reads the `count` names that follow a count field.
    pub(crate) fn names(&mut self, count: u64) -> Result<Vec<ContentName>, DecodeError> {
        let mut names = Vec::new();
        while (names.len() as u64) < count {
            let tlv = match self.next_field()? {
                Some(tlv) if tlv.typ.get() == ContentName::TLV_TYPE => tlv,
                _ => {
                    return Err(DecodeError::CountMismatch {
                        declared: count,
                        found: names.len(),
                    })
                }
            };
            names.push(ContentName::try_decode(tlv.val).map_err(|_| DecodeError::BadName)?);
        }
        Ok(names)
    }
}

pub(crate) fn integer(tlv: &TLV<'_>) -> Result<u64, DecodeError> {
    tlv.val_as_u64()
        .ok_or(DecodeError::BadInteger(tlv.typ.get()))
}

pub(crate) fn integer_u32(tlv: &TLV<'_>) -> Result<u32, DecodeError> {
    integer(tlv)?
        .try_into()
        .map_err(|_| DecodeError::BadInteger(tlv.typ.get()))
}
