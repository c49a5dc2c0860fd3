use core::{fmt, hash::Hash};

use crate::{
    name::ContentName,
    protocol::{
        integer, integer_u32, open_envelope, DecodeError, EncodeError, FieldReader, TAG_ADDED_COUNT,
        TAG_CONTROL, TAG_CONTROL_TYPE, TAG_FIB_CHANGE, TAG_REMOVED_COUNT, TAG_ST_CHANGE, TAG_TTL,
        TAG_VERSION,
    },
    tables::rendezvous::RpMappingTable,
    tlv::{encode_header, header_length, Encode, EncodingError, NonNegativeInteger, Write, TLV},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ControlType {
    FibChange,
    StChange,
}

impl ControlType {
    pub fn tag(self) -> u32 {
        match self {
            ControlType::FibChange => TAG_FIB_CHANGE,
            ControlType::StChange => TAG_ST_CHANGE,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            t if t == TAG_FIB_CHANGE as u64 => Some(ControlType::FibChange),
            t if t == TAG_ST_CHANGE as u64 => Some(ControlType::StChange),
            _ => None,
        }
    }
}

/// A control-plane message announcing names added and removed.
///
/// Equality and hashing ignore the TTL.
#[derive(Clone, Debug)]
pub struct Control {
    typ: ControlType,
    added: Vec<ContentName>,
    removed: Vec<ContentName>,
    version: u32,
    ttl: u32,
}

impl Control {
    pub fn new(
        typ: ControlType,
        added: Vec<ContentName>,
        removed: Vec<ContentName>,
        version: u32,
        ttl: u32,
    ) -> Self {
        Self {
            typ,
            added,
            removed,
            version,
            ttl,
        }
    }

    /// A subscription change with version and TTL zero.
    pub fn st_change(added: Vec<ContentName>, removed: Vec<ContentName>) -> Self {
        Self::new(ControlType::StChange, added, removed, 0, 0)
    }

    pub fn typ(&self) -> ControlType {
        self.typ
    }

    pub fn added(&self) -> &[ContentName] {
        &self.added
    }

    pub fn removed(&self) -> &[ContentName] {
        &self.removed
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = FieldReader::new(open_envelope(bytes, TAG_CONTROL)?);

        let field = expect(reader.next_field()?, TAG_CONTROL_TYPE)?;
        let typ_tag = integer(&field)?;
        let typ = ControlType::from_tag(typ_tag).ok_or(DecodeError::UnknownControlType(typ_tag))?;

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut field = reader.next_field()?;
        if let Some(count) = field.filter(|f| f.typ.get() == TAG_ADDED_COUNT) {
            added = reader.names(integer(&count)?)?;
            field = reader.next_field()?;
        }
        if let Some(count) = field.filter(|f| f.typ.get() == TAG_REMOVED_COUNT) {
            removed = reader.names(integer(&count)?)?;
            field = reader.next_field()?;
        }

        let version = integer_u32(&expect(field, TAG_VERSION)?)?;
        let ttl = integer_u32(&expect(reader.next_field()?, TAG_TTL)?)?;

        if let Some(extra) = reader.next_field()? {
            return Err(DecodeError::UnexpectedField(extra.typ.get()));
        }

        Ok(Self {
            typ,
            added,
            removed,
            version,
            ttl,
        })
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(self.to_bytes()?)
    }

    /// Splits this message into one message per RP, each carrying only the
    /// names that RP serves. Additions and removals are grouped separately
    /// and then merged per RP.
    pub fn split_by_rp(&self, mapping: &RpMappingTable) -> Vec<(ContentName, Control)> {
        let mut split: Vec<(ContentName, Control)> = Vec::new();
        let added = mapping.split_by_rp(&self.added);
        let removed = mapping.split_by_rp(&self.removed);

        for (rp, names) in added {
            split.push((
                rp,
                Self::new(self.typ, names, Vec::new(), self.version, self.ttl),
            ));
        }
        for (rp, names) in removed {
            match split.iter_mut().find(|(r, _)| *r == rp) {
                Some((_, control)) => control.removed = names,
                None => split.push((
                    rp,
                    Self::new(self.typ, Vec::new(), names, self.version, self.ttl),
                )),
            }
        }
        split
    }

    fn inner_length(&self) -> usize {
        NonNegativeInteger::new(TAG_CONTROL_TYPE, self.typ.tag() as u64).encoded_length()
            + names_length(TAG_ADDED_COUNT, &self.added)
            + names_length(TAG_REMOVED_COUNT, &self.removed)
            + NonNegativeInteger::new(TAG_VERSION, self.version as u64).encoded_length()
            + NonNegativeInteger::new(TAG_TTL, self.ttl as u64).encoded_length()
    }
}

fn expect(field: Option<TLV<'_>>, tag: u32) -> Result<TLV<'_>, DecodeError> {
    match field {
        Some(tlv) if tlv.typ.get() == tag => Ok(tlv),
        Some(tlv) => Err(DecodeError::UnexpectedType {
            expected: tag,
            found: tlv.typ.get(),
        }),
        None => Err(DecodeError::MissingField(tag)),
    }
}

// A count field followed by the names, or nothing for an empty list
fn names_length(count_tag: u32, names: &[ContentName]) -> usize {
    if names.is_empty() {
        return 0;
    }
    NonNegativeInteger::new(count_tag, names.len() as u64).encoded_length()
        + names.iter().map(|n| n.encoded_length()).sum::<usize>()
}

fn encode_names<W: Write>(
    count_tag: u32,
    names: &[ContentName],
    writer: &mut W,
) -> Result<(), EncodingError> {
    if names.is_empty() {
        return Ok(());
    }
    NonNegativeInteger::new(count_tag, names.len() as u64).encode(writer)?;
    for name in names {
        name.encode(writer)?;
    }
    Ok(())
}

impl Encode for Control {
    fn encoded_length(&self) -> usize {
        let len = self.inner_length();
        header_length(TAG_CONTROL, len) + len
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        encode_header(TAG_CONTROL, self.inner_length(), writer)?;
        NonNegativeInteger::new(TAG_CONTROL_TYPE, self.typ.tag() as u64).encode(writer)?;
        encode_names(TAG_ADDED_COUNT, &self.added, writer)?;
        encode_names(TAG_REMOVED_COUNT, &self.removed, writer)?;
        NonNegativeInteger::new(TAG_VERSION, self.version as u64).encode(writer)?;
        NonNegativeInteger::new(TAG_TTL, self.ttl as u64).encode(writer)
    }
}

impl PartialEq for Control {
    fn eq(&self, other: &Self) -> bool {
        self.typ == other.typ
            && self.version == other.version
            && self.added == other.added
            && self.removed == other.removed
    }
}

impl Eq for Control {}

impl Hash for Control {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.typ.hash(state);
        self.added.hash(state);
        self.removed.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: V={}, ttl={}, add={:?}, del={:?}",
            self.typ, self.version, self.ttl, self.added, self.removed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    #[test]
    fn test_control_wire_layout() {
        let control = Control::st_change(vec![name("/a")], vec![]);
        let bytes = control.to_wire().unwrap();
        assert_eq!(
            bytes,
            vec![
                200, 17, // envelope
                230, 1, 212, // subtype
                220, 1, 1, // one added name
                7, 3, 8, 1, b'a', // /a
                231, 1, 0, // version
                232, 1, 0, // ttl
            ]
        );
        assert_eq!(bytes.len(), control.encoded_length());
    }

    #[test]
    fn test_control_round_trip() {
        let controls = [
            Control::st_change(vec![], vec![]),
            Control::st_change(vec![name("/a/b"), name("/c")], vec![name("/d")]),
            Control::new(ControlType::FibChange, vec![], vec![name("/x")], 70000, 3),
            Control::new(ControlType::StChange, vec![name("/")], vec![], u32::MAX, 255),
        ];
        for control in controls {
            let decoded = Control::from_wire(&control.to_wire().unwrap()).unwrap();
            assert_eq!(decoded, control);
            assert_eq!(decoded.ttl(), control.ttl());
            assert_eq!(decoded.added(), control.added());
            assert_eq!(decoded.removed(), control.removed());
        }
    }

    #[test]
    fn test_unknown_subtype_rejected() {
        let bytes = [200, 9, 230, 1, 213, 231, 1, 0, 232, 1, 0];
        assert_eq!(
            Control::from_wire(&bytes),
            Err(DecodeError::UnknownControlType(213))
        );
    }

    #[test]
    fn test_missing_fields_rejected() {
        // No TTL
        let bytes = [200, 6, 230, 1, 212, 231, 1, 0];
        assert_eq!(
            Control::from_wire(&bytes),
            Err(DecodeError::MissingField(TAG_TTL))
        );
        // No version
        let bytes = [200, 6, 230, 1, 212, 232, 1, 0];
        assert_eq!(
            Control::from_wire(&bytes),
            Err(DecodeError::UnexpectedType {
                expected: TAG_VERSION,
                found: TAG_TTL
            })
        );
    }

    #[test]
    fn test_short_count_rejected() {
        // Two added names declared, only the root name present
        let bytes = [200, 14, 230, 1, 212, 220, 1, 2, 7, 0, 231, 1, 0, 232, 1, 0];
        assert_eq!(
            Control::from_wire(&bytes),
            Err(DecodeError::CountMismatch {
                declared: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_oversized_length_rejected() {
        let bytes = [200, 255, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert!(Control::from_wire(&bytes).is_err());
        // Inner field claiming far more bytes than the envelope holds
        let bytes = [200, 11, 230, 255, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xf0, 212];
        assert!(Control::from_wire(&bytes).is_err());
    }

    #[test]
    fn test_trailing_field_rejected() {
        let bytes = [200, 12, 230, 1, 212, 231, 1, 0, 232, 1, 0, 233, 1, 0];
        assert_eq!(
            Control::from_wire(&bytes),
            Err(DecodeError::UnexpectedField(233))
        );
    }

    #[test]
    fn test_equality_ignores_ttl() {
        let a = Control::new(ControlType::StChange, vec![name("/a")], vec![], 1, 5);
        let b = Control::new(ControlType::StChange, vec![name("/a")], vec![], 1, 9);
        let c = Control::new(ControlType::StChange, vec![name("/a")], vec![], 2, 5);
        let d = Control::new(ControlType::FibChange, vec![name("/a")], vec![], 1, 5);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_split_merges_per_rp() {
        let mapping = RpMappingTable::from_pairs([
            (name("/sports"), name("/RP1")),
            (name("/news"), name("/RP2")),
        ]);
        let control = Control::st_change(
            vec![name("/sports/a"), name("/weather")],
            vec![name("/news/b"), name("/sports/c")],
        );

        let split = control.split_by_rp(&mapping);
        assert_eq!(
            split,
            vec![
                (
                    name("/RP1"),
                    Control::st_change(vec![name("/sports/a")], vec![name("/sports/c")])
                ),
                (
                    name("/RP2"),
                    Control::st_change(vec![], vec![name("/news/b")])
                ),
            ]
        );
        assert!(Control::st_change(vec![], vec![])
            .split_by_rp(&mapping)
            .is_empty());
    }
}
