use core::{fmt, num::NonZeroU16, str::FromStr};

use thiserror::Error;

use crate::tlv::{encode_header, header_length, parse_tlvs, Encode, EncodingError, Write, TLV};

/// A hierarchical name: an ordered sequence of opaque components.
///
/// `A` is a prefix of `B` iff `B` starts with all components of `A`, in
/// order. The empty name (the root) is a prefix of every name.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentName {
    components: Vec<NameComponent>,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameComponent {
    typ: NonZeroU16,
    bytes: Box<[u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name {0:?} is not a valid URI")]
    InvalidUri(String),
    #[error("name TLV is malformed")]
    Malformed,
}

const GENERIC: NonZeroU16 = match NonZeroU16::new(NameComponent::TYPE_GENERIC) {
    Some(typ) => typ,
    None => panic!(),
};

impl NameComponent {
    pub const TYPE_GENERIC: u16 = 8;
    pub const TYPE_IMPLICIT_SHA256: u16 = 1;
    pub const TYPE_PARAMETER_SHA256: u16 = 2;

    pub fn new(typ: u16, bytes: &[u8]) -> Option<Self> {
        Some(Self {
            typ: NonZeroU16::new(typ)?,
            bytes: Box::from(bytes),
        })
    }

    pub fn generic(bytes: &[u8]) -> Self {
        Self {
            typ: GENERIC,
            bytes: Box::from(bytes),
        }
    }

    pub fn typ(&self) -> u16 {
        self.typ.get()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_generic(&self) -> bool {
        self.typ.get() == Self::TYPE_GENERIC
    }

    fn tlv(&self) -> TLV<'_> {
        TLV {
            typ: self.typ.into(),
            val: &self.bytes,
        }
    }
}

impl ContentName {
    pub const TLV_TYPE: u32 = 7;

    /// The empty name, a prefix of everything.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            components: components
                .into_iter()
                .map(|c| NameComponent::generic(c.as_ref()))
                .collect(),
        }
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[NameComponent] {
        &self.components
    }

    pub fn component(&self, index: usize) -> Option<&[u8]> {
        self.components.get(index).map(|c| c.bytes())
    }

    pub fn is_prefix_of(&self, other: &ContentName) -> bool {
        self.components.len() <= other.components.len()
            && self.components[..] == other.components[..self.components.len()]
    }

    /// The name made of the first `count` components.
    pub fn prefix(&self, count: usize) -> Self {
        Self {
            components: self.components[..count.min(self.components.len())].to_vec(),
        }
    }

    pub fn adding_component(&self, component: NameComponent) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self { components }
    }

    pub fn adding_generic(&self, bytes: &[u8]) -> Self {
        self.adding_component(NameComponent::generic(bytes))
    }

    /// Parses the inner bytes of a name TLV (the sequence of components).
    pub fn try_decode(inner_bytes: &[u8]) -> Result<Self, NameError> {
        let mut components = Vec::new();
        for tlv in parse_tlvs(inner_bytes) {
            let tlv = tlv.map_err(|_| NameError::Malformed)?;
            let typ: u16 = tlv.typ.get().try_into().map_err(|_| NameError::Malformed)?;
            components.push(NameComponent::new(typ, tlv.val).ok_or(NameError::Malformed)?);
        }
        Ok(Self { components })
    }

    fn components_length(&self) -> usize {
        self.components
            .iter()
            .map(|c| c.tlv().encoded_length())
            .sum()
    }
}

impl Encode for ContentName {
    fn encoded_length(&self) -> usize {
        let len = self.components_length();
        header_length(Self::TLV_TYPE, len) + len
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), EncodingError> {
        encode_header(Self::TLV_TYPE, self.components_length(), writer)?;
        for component in self.components.iter() {
            component.tlv().encode(writer)?;
        }
        Ok(())
    }
}

impl FromStr for ContentName {
    type Err = NameError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let trimmed = uri
            .strip_prefix("ndn:")
            .or_else(|| uri.strip_prefix("ccnx:"))
            .unwrap_or(uri);
        if !trimmed.starts_with('/') {
            return Err(NameError::InvalidUri(uri.to_string()));
        }
        let mut components = Vec::new();
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            let decoded = urlencoding::decode_binary(segment.as_bytes());
            components.push(NameComponent::generic(&decoded));
        }
        Ok(Self { components })
    }
}

impl fmt::Display for ContentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return f.write_str("/");
        }
        for component in self.components.iter() {
            f.write_str("/")?;
            if !component.is_generic() {
                write!(f, "{}=", component.typ())?;
            }
            f.write_str(&urlencoding::encode_binary(component.bytes()))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentName({self})")
    }
}

impl fmt::Debug for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            self.typ,
            urlencoding::encode_binary(self.bytes())
        )
    }
}

impl serde::Serialize for ContentName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        uri.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let n = name("/sports/football");
        assert_eq!(n.component_count(), 2);
        assert_eq!(n.component(0), Some(&b"sports"[..]));
        assert_eq!(n.to_string(), "/sports/football");
        assert_eq!(name("/").to_string(), "/");
        assert_eq!(name("ndn:/a//b/").to_string(), "/a/b");
        assert!("sports".parse::<ContentName>().is_err());
    }

    #[test]
    fn test_escaped_components_round_trip() {
        let n = ContentName::from_components(["a b", "x+y/z="]);
        let printed = n.to_string();
        assert_eq!(printed, "/a%20b/x%2By%2Fz%3D");
        assert_eq!(name(&printed), n);
    }

    #[test]
    fn test_prefix_relation() {
        let root = ContentName::root();
        let sports = name("/sports");
        let football = name("/sports/football");
        let sports2 = name("/sports2");

        assert!(root.is_prefix_of(&football));
        assert!(sports.is_prefix_of(&football));
        assert!(football.is_prefix_of(&football));
        assert!(!football.is_prefix_of(&sports));
        assert!(!sports2.is_prefix_of(&football));
        assert!(!sports.is_prefix_of(&sports2));
        assert_eq!(football.prefix(1), sports);
        assert_eq!(football.prefix(9), football);
    }

    #[test]
    fn test_tlv_encoding() {
        let n = name("/a/bc");
        let bytes = n.to_bytes().unwrap();
        assert_eq!(bytes, vec![7, 7, 8, 1, b'a', 8, 2, b'b', b'c']);
        assert_eq!(bytes.len(), n.encoded_length());

        let (tlv, _) = TLV::try_decode(&bytes).unwrap();
        assert_eq!(ContentName::try_decode(tlv.val).unwrap(), n);
    }

    #[test]
    fn test_root_encoding() {
        let bytes = ContentName::root().to_bytes().unwrap();
        assert_eq!(bytes, vec![7, 0]);
        assert!(ContentName::try_decode(&[]).unwrap().is_root());
    }

    #[test]
    fn test_malformed_components() {
        assert_eq!(
            ContentName::try_decode(&[8, 4, b'a']),
            Err(NameError::Malformed)
        );
    }

    #[test]
    fn test_non_generic_display() {
        let n = ContentName::root()
            .adding_component(NameComponent::new(NameComponent::TYPE_IMPLICIT_SHA256, &[1]).unwrap());
        assert_eq!(n.to_string(), "/1=%01");
    }
}
