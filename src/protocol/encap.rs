//! Tunnelling COPSS messages through the substrate.
//!
//! A message bound for a rendezvous point travels as a request unit named
//! `<rp>/<marker>/<base64 of the wire encoding>`, so the substrate can route
//! it by the RP prefix like any other request.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    name::ContentName,
    packet::Interest,
    protocol::{Control, DecodeError, EncodeError, Multicast},
};

pub const CONTROL_MARKER: &str = "control";
pub const MULTICAST_MARKER: &str = "multicast";

pub trait Encapsulate: Sized {
    const MARKER: &'static str;

    fn wire_bytes(&self) -> Result<Vec<u8>, EncodeError>;

    fn from_wire_bytes(bytes: &[u8]) -> Result<Self, DecodeError>;

    fn encapsulate(&self, rp: &ContentName) -> Result<Interest, EncodeError> {
        if rp.is_root() {
            return Err(EncodeError::RootRendezvous);
        }
        let encoded = STANDARD.encode(self.wire_bytes()?);
        let name = rp
            .adding_generic(Self::MARKER.as_bytes())
            .adding_generic(encoded.as_bytes());
        Ok(Interest::new(name))
    }

    /// `Ok(None)` if the unit does not carry this kind of message. The
    /// marker is always component 1 and the payload component 2, whatever
    /// follows them.
    fn decapsulate(interest: &Interest) -> Result<Option<Self>, DecodeError> {
        let name = &interest.name;
        if name.component_count() < 3 || name.component(1) != Some(Self::MARKER.as_bytes()) {
            return Ok(None);
        }
        let payload = name.component(2).unwrap_or_default();
        let unescaped = urlencoding::decode_binary(payload);
        let decoded = STANDARD
            .decode(unescaped.as_ref())
            .map_err(|_| DecodeError::Base64)?;
        Self::from_wire_bytes(&decoded).map(Some)
    }
}

impl Encapsulate for Control {
    const MARKER: &'static str = CONTROL_MARKER;

    fn wire_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        self.to_wire()
    }

    fn from_wire_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Control::from_wire(bytes)
    }
}

impl Encapsulate for Multicast {
    const MARKER: &'static str = MULTICAST_MARKER;

    fn wire_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        self.to_wire()
    }

    fn from_wire_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        Multicast::from_wire(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    #[test]
    fn test_control_encapsulation_round_trip() {
        let control = Control::st_change(vec![name("/sports/football")], vec![name("/news")]);
        let interest = control.encapsulate(&name("/RP1")).unwrap();

        assert_eq!(interest.name.component_count(), 3);
        assert_eq!(interest.name.component(0), Some(&b"RP1"[..]));
        assert_eq!(interest.name.component(1), Some(CONTROL_MARKER.as_bytes()));
        assert!(name("/RP1").is_prefix_of(&interest.name));

        assert_eq!(Control::decapsulate(&interest), Ok(Some(control)));
    }

    #[test]
    fn test_multicast_encapsulation_round_trip() {
        let payloads: [&[u8]; 3] = [b"hi", b"", &[0xff; 300]];
        for payload in payloads {
            let multicast = Multicast::new(vec![name("/a/b"), name("/c")], payload.to_vec()).unwrap();
            let interest = multicast.encapsulate(&name("/RP")).unwrap();
            assert_eq!(Multicast::decapsulate(&interest), Ok(Some(multicast)));
        }
    }

    #[test]
    fn test_multi_component_rp() {
        let control = Control::st_change(vec![name("/x")], vec![]);
        let interest = control.encapsulate(&name("/region/RP")).unwrap();
        assert_eq!(interest.name.component_count(), 4);
        // Component 1 is "RP", not the marker
        assert_eq!(Control::decapsulate(&interest), Ok(None));
    }

    #[test]
    fn test_components_after_payload_ignored() {
        let control = Control::st_change(vec![name("/x")], vec![name("/y")]);
        let interest = control.encapsulate(&name("/RP")).unwrap();
        let extended = Interest::new(interest.name.adding_generic(b"extra"));
        assert_eq!(extended.name.component_count(), 4);
        assert_eq!(Control::decapsulate(&extended), Ok(Some(control)));
    }

    #[test]
    fn test_survives_the_wire() {
        use crate::tlv::Encode;

        let multicast = Multicast::new(vec![name("/sports")], b"score".to_vec()).unwrap();
        let bytes = multicast.encapsulate(&name("/RP1")).unwrap().to_bytes().unwrap();
        let interest = Interest::from_bytes(&bytes).unwrap();
        assert_eq!(Multicast::decapsulate(&interest), Ok(Some(multicast)));
    }

    #[test]
    fn test_percent_escaped_payload_accepted() {
        let control = Control::st_change(vec![name("/a")], vec![]);
        let encoded = STANDARD.encode(control.to_wire().unwrap());
        let escaped = urlencoding::encode(&encoded).into_owned();
        let interest = Interest::new(
            name("/RP")
                .adding_generic(CONTROL_MARKER.as_bytes())
                .adding_generic(escaped.as_bytes()),
        );
        assert_eq!(Control::decapsulate(&interest), Ok(Some(control)));
    }

    #[test]
    fn test_foreign_units_are_not_copss() {
        let plain = Interest::new(name("/RP/video/segment1"));
        assert_eq!(Control::decapsulate(&plain), Ok(None));
        assert_eq!(Multicast::decapsulate(&plain), Ok(None));

        let short = Interest::new(name("/control/abc"));
        assert_eq!(Control::decapsulate(&short), Ok(None));

        let multicast = Multicast::new(vec![name("/a")], vec![1]).unwrap();
        let interest = multicast.encapsulate(&name("/RP")).unwrap();
        assert_eq!(Control::decapsulate(&interest), Ok(None));
    }

    #[test]
    fn test_bad_payload_is_a_decode_error() {
        let interest = Interest::new(name("/RP/control/%%%not-base64"));
        assert_eq!(Control::decapsulate(&interest), Err(DecodeError::Base64));

        let garbage = STANDARD.encode([1, 2, 3]);
        let interest = Interest::new(
            name("/RP/control").adding_generic(garbage.as_bytes()),
        );
        assert!(Control::decapsulate(&interest).is_err());
    }

    #[test]
    fn test_root_rp_rejected() {
        let control = Control::st_change(vec![], vec![]);
        assert_eq!(
            control.encapsulate(&ContentName::root()),
            Err(EncodeError::RootRendezvous)
        );
    }
}
