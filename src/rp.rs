use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    name::ContentName,
    packet::Interest,
    protocol::{encap::Encapsulate, Multicast},
    substrate::{HandlerId, Substrate, SubstrateError},
};

/// A rendezvous point hosted by this router.
///
/// Claims a prefix in the substrate and takes the tunnelled multicast
/// messages addressed to it out of the substrate, handing each one to
/// `deliver`. Anything else under the prefix is declined so the substrate can
/// keep forwarding it.
pub struct RpModule {
    prefix: ContentName,
    handler: HandlerId,
}

impl RpModule {
    pub fn start<S, F>(substrate: &S, prefix: ContentName, deliver: F) -> Result<Self, SubstrateError>
    where
        S: Substrate,
        F: Fn(Multicast) + Send + Sync + 'static,
    {
        let rp = prefix.clone();
        let handler = substrate.register_prefix_handler(
            &prefix,
            Arc::new(move |interest: &Interest| match Multicast::decapsulate(interest) {
                Ok(Some(multicast)) => {
                    debug!(%rp, cds = multicast.cds().len(), "Multicast reached rendezvous point");
                    deliver(multicast);
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    warn!(%rp, name = %interest.name, %err, "Cannot decapsulate multicast");
                    false
                }
            }),
        )?;
        info!(%prefix, "Rendezvous point started");
        Ok(Self { prefix, handler })
    }

    pub fn prefix(&self) -> &ContentName {
        &self.prefix
    }

    pub fn stop<S: Substrate>(&self, substrate: &S) {
        match substrate.unregister_prefix_handler(self.handler) {
            Ok(_) => info!(prefix = %self.prefix, "Rendezvous point stopped"),
            Err(err) => debug!(prefix = %self.prefix, %err, "Substrate already gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::Control,
        substrate::{Attachment, ForwardingFlags, LocalSubstrate},
        tlv::Encode,
    };
    use core::time::Duration;
    use parking_lot::Mutex;

    fn name(uri: &str) -> ContentName {
        uri.parse().unwrap()
    }

    #[test]
    fn test_rp_takes_multicast_and_declines_the_rest() {
        let substrate = LocalSubstrate::new();
        let publisher = substrate.create_attachment().unwrap();
        let mut upstream = substrate.create_attachment().unwrap();
        substrate
            .register_prefix(
                upstream.id(),
                &name("/RP1"),
                ForwardingFlags::ACTIVE | ForwardingFlags::CHILD_INHERIT,
            )
            .unwrap();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let rp = RpModule::start(&substrate, name("/RP1"), move |m| sink.lock().push(m)).unwrap();
        assert_eq!(rp.prefix(), &name("/RP1"));

        let multicast = Multicast::new(vec![name("/sports/football")], b"hi".to_vec()).unwrap();
        let unit = multicast.encapsulate(&name("/RP1")).unwrap().to_bytes().unwrap();
        substrate.send(publisher.id(), &unit).unwrap();
        assert_eq!(*delivered.lock(), vec![multicast]);

        let mut buf = [0u8; 1024];
        assert_eq!(upstream.recv(&mut buf, Duration::from_millis(100)), Ok(0));

        // Control units pass through to the FIB
        let control = Control::st_change(vec![name("/sports")], vec![]);
        let unit = control.encapsulate(&name("/RP1")).unwrap().to_bytes().unwrap();
        substrate.send(publisher.id(), &unit).unwrap();
        let n = upstream.recv(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(&buf[..n], &unit[..]);
        assert_eq!(delivered.lock().len(), 1);

        rp.stop(&substrate);
        let unit = Multicast::new(vec![name("/x")], vec![])
            .unwrap()
            .encapsulate(&name("/RP1"))
            .unwrap()
            .to_bytes()
            .unwrap();
        substrate.send(publisher.id(), &unit).unwrap();
        assert_eq!(delivered.lock().len(), 1);
    }
}
