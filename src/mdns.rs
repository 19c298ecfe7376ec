//! Service discovery announcement over mDNS

use esp_idf_svc::mdns::EspMdns;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::net::Advertiser;

pub struct MdnsAdvertiser {
    mdns: EspMdns,
}

impl MdnsAdvertiser {
    pub fn new() -> Result<Self> {
        let mdns = EspMdns::take()
            .map_err(|e| Error::General(format!("failed to take mDNS responder: {}", e)))?;
        Ok(Self { mdns })
    }
}

impl Advertiser for MdnsAdvertiser {
    fn advertise(&mut self, hostname: &str) {
        match self.mdns.set_hostname(hostname) {
            Ok(()) => info!("advertising as {}.local", hostname),
            Err(err) => warn!("failed to set mDNS hostname: {}", err),
        }
    }
}
