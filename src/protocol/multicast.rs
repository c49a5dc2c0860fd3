use crate::{
    name::ContentName,
    protocol::{
        integer, open_envelope, DecodeError, EncodeError, FieldReader, TAG_ADDED_COUNT,
        TAG_MULTICAST, TAG_PAYLOAD,
    },
    tables::rendezvous::RpMappingTable,
    tlv::{encode_header, header_length, Encode, EncodingError, NonNegativeInteger, Write},
};

/// A data-plane message: an opaque payload tagged with one or more CDs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Multicast {
    cds: Vec<ContentName>,
    payload: Vec<u8>,
}

impl Multicast {
    pub fn new(cds: Vec<ContentName>, payload: Vec<u8>) -> Result<Self, EncodeError> {
        if cds.is_empty() {
            return Err(EncodeError::NoContentDescriptors);
        }
        Ok(Self { cds, payload })
    }

    pub fn cds(&self) -> &[ContentName] {
        &self.cds
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(open_envelope(bytes, TAG_MULTICAST)?);

        let cds = match reader.next_field()? {
            Some(count) if count.typ.get() == TAG_ADDED_COUNT => reader.names(integer(&count)?)?,
            Some(other) => {
                return Err(DecodeError::UnexpectedType {
                    expected: TAG_ADDED_COUNT,
                    found: other.typ.get(),
                })
            }
            None => return Err(DecodeError::MissingField(TAG_ADDED_COUNT)),
        };
        if cds.is_empty() {
            return Err(DecodeError::NoContentDescriptors);
        }

        let payload = match reader.next_field()? {
            Some(field) if field.typ.get() == TAG_PAYLOAD => field.val.to_vec(),
            Some(other) => return Err(DecodeError::UnexpectedField(other.typ.get())),
            None => return Err(DecodeError::MissingField(TAG_PAYLOAD)),
        };

        if let Some(extra) = reader.next_field()? {
            return Err(DecodeError::UnexpectedField(extra.typ.get()));
        }

        Ok(Self { cds, payload })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(self.to_bytes()?)
    }

    /// One message per RP, each with the same payload and the CDs that RP
    /// serves. CDs without an RP are left out.
    pub fn split_by_rp(&self, mapping: &RpMappingTable) -> Vec<(ContentName, Multicast)> {
        mapping
            .split_by_rp(&self.cds)
            .into_iter()
            .map(|(rp, cds)| {
                (
                    rp,
                    Self {
                        cds,
                        payload: self.payload.clone(),
                    },
                )
            })
            .collect()
    }

    fn inner_length(&self) -> usize {
        NonNegativeInteger::new(TAG_ADDED_COUNT, self.cds.len() as u64).encoded_length()
            + self.cds.iter().map(|cd| cd.encoded_length()).sum::<usize>()
            + header_length(TAG_PAYLOAD, self.payload.len())
            + self.payload.len()
    }
}

impl Encode for Multicast {
    fn encoded_length(&self) -> usize {
        let len = self.inner_length();
        header_length(TAG_MULTICAST, len) + len
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        encode_header(TAG_MULTICAST, self.inner_length(), writer)?;
        NonNegativeInteger::new(TAG_ADDED_COUNT, self.cds.len() as u64).encode(writer)?;
        for cd in self.cds.iter() {
            cd.encode(writer)?;
        }
        encode_header(TAG_PAYLOAD, self.payload.len(), writer)?;
        writer.write(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    #[test]
    fn test_multicast_wire_layout() {
        let multicast = Multicast::new(vec![name("/a")], b"hi".to_vec()).unwrap();
        let bytes = multicast.to_wire().unwrap();
        assert_eq!(
            bytes,
            vec![201, 12, 220, 1, 1, 7, 3, 8, 1, b'a', 233, 2, b'h', b'i']
        );
        assert_eq!(bytes.len(), multicast.encoded_length());
    }

    #[test]
    fn test_multicast_round_trip() {
        let big_payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let messages = [
            Multicast::new(vec![name("/sports/football")], b"hi".to_vec()).unwrap(),
            Multicast::new(vec![name("/a"), name("/b/c"), name("/")], vec![]).unwrap(),
            Multicast::new(vec![name("/x")], big_payload).unwrap(),
        ];
        for multicast in messages {
            let decoded = Multicast::from_wire(&multicast.to_wire().unwrap()).unwrap();
            assert_eq!(decoded, multicast);
        }
    }

    #[test]
    fn test_empty_cds_rejected() {
        assert_eq!(
            Multicast::new(vec![], b"x".to_vec()),
            Err(EncodeError::NoContentDescriptors)
        );
        assert_eq!(
            Multicast::from_wire(&[201, 6, 220, 1, 0, 233, 1, b'x']),
            Err(DecodeError::NoContentDescriptors)
        );
    }

    #[test]
    fn test_missing_payload_rejected() {
        assert_eq!(
            Multicast::from_wire(&[201, 5, 220, 1, 1, 7, 0]),
            Err(DecodeError::MissingField(TAG_PAYLOAD))
        );
        assert_eq!(
            Multicast::from_wire(&[201, 3, 233, 1, b'x']),
            Err(DecodeError::UnexpectedType {
                expected: TAG_ADDED_COUNT,
                found: TAG_PAYLOAD
            })
        );
    }

    #[test]
    fn test_not_a_multicast() {
        let control = crate::protocol::Control::st_change(vec![], vec![]);
        assert!(matches!(
            Multicast::from_wire(&control.to_wire().unwrap()),
            Err(DecodeError::UnexpectedType { expected: 201, .. })
        ));
    }

    #[test]
    fn test_split_keeps_payload() {
        let mapping = RpMappingTable::from_pairs([
            (name("/sports"), name("/RP1")),
            (name("/sports2"), name("/RP2")),
        ]);
        let multicast = Multicast::new(
            vec![name("/sports/a"), name("/sports2/b"), name("/none")],
            b"p".to_vec(),
        )
        .unwrap();

        let split = multicast.split_by_rp(&mapping);
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].0, name("/RP1"));
        assert_eq!(split[0].1.cds(), &[name("/sports/a")]);
        assert_eq!(split[1].0, name("/RP2"));
        assert_eq!(split[1].1.cds(), &[name("/sports2/b")]);
        assert!(split.iter().all(|(_, m)| m.payload() == b"p"));
    }
}
