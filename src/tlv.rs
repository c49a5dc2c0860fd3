use core::num::NonZeroU32;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintDecodingError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("non-minimal integer encoding")]
    NonMinimalIntegerEncoding,
    #[error("invalid value")]
    InvalidValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TlvDecodingError {
    #[error("cannot decode TLV type: {err}")]
    CannotDecodeType { err: VarintDecodingError },
    #[error("cannot decode length of TLV {typ}: {err}")]
    CannotDecodeLength {
        typ: NonZeroU32,
        err: VarintDecodingError,
    },
    #[error("TLV {typ} declares {len} bytes but fewer are available")]
    CannotDecodeValue { typ: NonZeroU32, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("buffer too short")]
    BufferTooShort,
}

pub trait Write {
    fn write(&mut self, bytes: &[u8]) -> Result<(), EncodingError>;
}

impl Write for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), EncodingError> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

pub trait Encode {
    fn encoded_length(&self) -> usize;
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError>;

    fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut out = Vec::with_capacity(self.encoded_length());
        self.encode(&mut out)?;
        Ok(out)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TLV<'a> {
    pub typ: NonZeroU32,
    pub val: &'a [u8],
}

impl<'a> TLV<'a> {
    pub fn new(typ: u32, val: &'a [u8]) -> Option<Self> {
        Some(Self {
            typ: NonZeroU32::new(typ)?,
            val,
        })
    }

    pub fn val_as_u64(&self) -> Option<u64> {
        match self.val.len() {
            1 => Some(self.val[0] as u64),
            2 => Some(u16::from_be_bytes(self.val.try_into().ok()?) as u64),
            4 => Some(u32::from_be_bytes(self.val.try_into().ok()?) as u64),
            8 => Some(u64::from_be_bytes(self.val.try_into().ok()?)),
            _ => None,
        }
    }

    pub fn try_decode(bytes: &'a [u8]) -> Result<(TLV<'a>, usize), TlvDecodingError> {
        let mut cursor = 0;
        let typ: u32 = parse_varint(bytes, &mut cursor)
            .map_err(|err| TlvDecodingError::CannotDecodeType { err })?
            .try_into()
            .map_err(|_| TlvDecodingError::CannotDecodeType {
                err: VarintDecodingError::InvalidValue,
            })?;
        let typ = NonZeroU32::new(typ).ok_or(TlvDecodingError::CannotDecodeType {
            err: VarintDecodingError::InvalidValue,
        })?;

        let len: usize = parse_varint(bytes, &mut cursor)
            .map_err(|err| TlvDecodingError::CannotDecodeLength { typ, err })?
            .try_into()
            .map_err(|_| TlvDecodingError::CannotDecodeLength {
                typ,
                err: VarintDecodingError::InvalidValue,
            })?;

        let end = cursor
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(TlvDecodingError::CannotDecodeValue { typ, len })?;

        let val = &bytes[cursor..end];
        Ok((TLV { typ, val }, end))
    }
}

/// Reads only the outer type of the TLV at the start of `bytes`.
pub fn peek_type(bytes: &[u8]) -> Result<u32, TlvDecodingError> {
    let mut cursor = 0;
    parse_varint(bytes, &mut cursor)
        .map_err(|err| TlvDecodingError::CannotDecodeType { err })?
        .try_into()
        .map_err(|_| TlvDecodingError::CannotDecodeType {
            err: VarintDecodingError::InvalidValue,
        })
}

/// Iterates over consecutive TLVs, stopping after the first error.
pub fn parse_tlvs(bytes: &[u8]) -> TlvIterator<'_> {
    TlvIterator {
        bytes,
        cursor: 0,
        failed: false,
    }
}

pub struct TlvIterator<'a> {
    bytes: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> Iterator for TlvIterator<'a> {
    type Item = Result<TLV<'a>, TlvDecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.bytes.len() {
            return None;
        }
        match TLV::try_decode(&self.bytes[self.cursor..]) {
            Ok((tlv, len)) => {
                self.cursor += len;
                Some(Ok(tlv))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

fn parse_varint(bytes: &[u8], cursor: &mut usize) -> Result<u64, VarintDecodingError> {
    let first = *bytes
        .get(*cursor)
        .ok_or(VarintDecodingError::BufferTooShort)?;
    *cursor += 1;
    match first {
        0..=252 => Ok(first as u64),
        253 => {
            let next: [u8; 2] = take(bytes, cursor)?;
            let val = u16::from_be_bytes(next);
            if val > 252 {
                Ok(val as u64)
            } else {
                Err(VarintDecodingError::NonMinimalIntegerEncoding)
            }
        }
        254 => {
            let next: [u8; 4] = take(bytes, cursor)?;
            let val = u32::from_be_bytes(next);
            if val > 65535 {
                Ok(val as u64)
            } else {
                Err(VarintDecodingError::NonMinimalIntegerEncoding)
            }
        }
        255 => {
            let next: [u8; 8] = take(bytes, cursor)?;
            let val = u64::from_be_bytes(next);
            if val > 4294967295 {
                Ok(val)
            } else {
                Err(VarintDecodingError::NonMinimalIntegerEncoding)
            }
        }
    }
}

fn take<const N: usize>(bytes: &[u8], cursor: &mut usize) -> Result<[u8; N], VarintDecodingError> {
    let end = *cursor + N;
    let arr: [u8; N] = bytes
        .get(*cursor..end)
        .ok_or(VarintDecodingError::BufferTooShort)?
        .try_into()
        .map_err(|_| VarintDecodingError::BufferTooShort)?;
    *cursor = end;
    Ok(arr)
}

impl Encode for u64 {
    fn encoded_length(&self) -> usize {
        if *self <= 252 {
            1
        } else if *self <= 65535 {
            3
        } else if *self <= 4294967295 {
            5
        } else {
            9
        }
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        if *self <= 252 {
            writer.write(&[*self as u8])
        } else if *self <= 65535 {
            writer.write(&[253])?;
            writer.write(&(*self as u16).to_be_bytes())
        } else if *self <= 4294967295 {
            writer.write(&[254])?;
            writer.write(&(*self as u32).to_be_bytes())
        } else {
            writer.write(&[255])?;
            writer.write(&self.to_be_bytes())
        }
    }
}

impl<'a> Encode for TLV<'a> {
    fn encoded_length(&self) -> usize {
        let l = self.val.len();
        (self.typ.get() as u64).encoded_length() + (l as u64).encoded_length() + l
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        (self.typ.get() as u64).encode(writer)?;
        (self.val.len() as u64).encode(writer)?;
        writer.write(self.val)
    }
}

/// A non-negative integer carried as the value of a TLV, in its shortest
/// 1, 2, 4 or 8 byte big-endian form.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NonNegativeInteger {
    pub typ: u32,
    pub val: u64,
}

impl NonNegativeInteger {
    pub fn new(typ: u32, val: u64) -> Self {
        Self { typ, val }
    }

    fn value_length(&self) -> usize {
        if self.val <= u8::MAX as u64 {
            1
        } else if self.val <= u16::MAX as u64 {
            2
        } else if self.val <= u32::MAX as u64 {
            4
        } else {
            8
        }
    }
}

impl Encode for NonNegativeInteger {
    fn encoded_length(&self) -> usize {
        let l = self.value_length();
        (self.typ as u64).encoded_length() + (l as u64).encoded_length() + l
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        let l = self.value_length();
        (self.typ as u64).encode(writer)?;
        (l as u64).encode(writer)?;
        match l {
            1 => writer.write(&[self.val as u8]),
            2 => writer.write(&(self.val as u16).to_be_bytes()),
            4 => writer.write(&(self.val as u32).to_be_bytes()),
            _ => writer.write(&self.val.to_be_bytes()),
        }
    }
}

/// Writes the type and length header of a TLV whose value follows.
pub fn encode_header<W: Write>(typ: u32, len: usize, writer: &mut W) -> Result<(), EncodingError> {
    (typ as u64).encode(writer)?;
    (len as u64).encode(writer)
}

pub fn header_length(typ: u32, len: usize) -> usize {
    (typ as u64).encoded_length() + (len as u64).encoded_length()
}
