//! WiFi link management
//!
//! Implements the engine's [`WirelessLink`] contract over the ESP-IDF WiFi
//! driver. Static addressing is baked into the netif at construction time;
//! the engine's reconfigure path only ever re-applies mode and credentials.

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    ipv4,
    netif::{EspNetif, NetifConfiguration},
    nvs::EspDefaultNvsPartition,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi},
};
use log::{info, warn};
use std::net::Ipv4Addr;

use crate::config::{NetMode, NetworkConfig};
use crate::error::{Error, Result};
use crate::net::{WirelessLink, RSSI_NONE};

pub struct WifiLink {
    wifi: Box<EspWifi<'static>>,
}

impl WifiLink {
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        cfg: &NetworkConfig,
    ) -> Result<Self> {
        let mut wifi = Box::new(
            EspWifi::new(modem, sysloop, Some(nvs))
                .map_err(|e| Error::Wifi(format!("failed to create WiFi driver: {}", e)))?,
        );

        if cfg.uses_static_address() {
            Self::apply_static_address(&mut wifi, cfg)?;
        }

        Ok(Self { wifi })
    }

    fn apply_static_address(wifi: &mut EspWifi<'static>, cfg: &NetworkConfig) -> Result<()> {
        let subnet = ipv4::Subnet {
            // The device is its own gateway, both as AP and with a fixed
            // station address.
            gateway: cfg.address,
            mask: ipv4::Mask(mask_prefix(cfg.netmask)),
        };
        match cfg.mode {
            NetMode::AccessPoint => {
                let netif = EspNetif::new_with_conf(&NetifConfiguration {
                    ip_configuration: Some(ipv4::Configuration::Router(
                        ipv4::RouterConfiguration {
                            subnet,
                            ..Default::default()
                        },
                    )),
                    ..NetifConfiguration::wifi_default_router()
                })
                .map_err(|e| Error::Wifi(format!("failed to create AP netif: {}", e)))?;
                wifi.swap_netif_ap(netif)
                    .map_err(|e| Error::Wifi(format!("failed to install AP netif: {}", e)))?;
            }
            NetMode::Station => {
                let netif = EspNetif::new_with_conf(&NetifConfiguration {
                    ip_configuration: Some(ipv4::Configuration::Client(
                        ipv4::ClientConfiguration::Fixed(ipv4::ClientSettings {
                            ip: cfg.address,
                            subnet,
                            ..Default::default()
                        }),
                    )),
                    ..NetifConfiguration::wifi_default_client()
                })
                .map_err(|e| Error::Wifi(format!("failed to create STA netif: {}", e)))?;
                wifi.swap_netif_sta(netif)
                    .map_err(|e| Error::Wifi(format!("failed to install STA netif: {}", e)))?;
            }
            NetMode::Off => {}
        }
        Ok(())
    }

    fn apply_mode(&mut self, cfg: &NetworkConfig) -> Result<()> {
        let auth_method = if cfg.psk.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        match cfg.mode {
            NetMode::AccessPoint => {
                self.wifi
                    .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                        ssid: cfg.ssid.clone(),
                        password: cfg.psk.clone(),
                        auth_method,
                        channel: 1,
                        max_connections: 1,
                        ..Default::default()
                    }))
                    .map_err(|e| Error::Wifi(format!("failed to configure AP: {}", e)))?;
                self.wifi
                    .start()
                    .map_err(|e| Error::Wifi(format!("failed to start AP: {}", e)))?;
                info!("broadcasting AP '{}'", cfg.ssid);
            }
            NetMode::Station => {
                self.wifi
                    .set_configuration(&Configuration::Client(ClientConfiguration {
                        ssid: cfg.ssid.clone(),
                        password: cfg.psk.clone(),
                        auth_method,
                        ..Default::default()
                    }))
                    .map_err(|e| Error::Wifi(format!("failed to configure station: {}", e)))?;
                self.wifi
                    .start()
                    .map_err(|e| Error::Wifi(format!("failed to start station: {}", e)))?;
                self.wifi
                    .connect()
                    .map_err(|e| Error::Wifi(format!("failed to start association: {}", e)))?;
                info!("associating with '{}'", cfg.ssid);
            }
            NetMode::Off => {}
        }
        Ok(())
    }
}

impl WirelessLink for WifiLink {
    fn configure(&mut self, cfg: &NetworkConfig) -> bool {
        match self.apply_mode(cfg) {
            Ok(()) => true,
            Err(err) => {
                warn!("{}", err);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        let _ = self.wifi.disconnect();
        let _ = self.wifi.stop();
    }

    fn link_up(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn signal_strength(&mut self) -> i32 {
        let mut record = esp_idf_sys::wifi_ap_record_t::default();
        let err = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut record) };
        if err == esp_idf_sys::ESP_OK {
            record.rssi as i32
        } else {
            // Unassociated radios have no measurement.
            RSSI_NONE
        }
    }

    fn local_address(&self) -> Ipv4Addr {
        let sta = self
            .wifi
            .sta_netif()
            .get_ip_info()
            .map(|info| info.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        if !sta.is_unspecified() {
            return sta;
        }
        self.wifi
            .ap_netif()
            .get_ip_info()
            .map(|info| info.ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }
}

fn mask_prefix(netmask: Ipv4Addr) -> u8 {
    u32::from_be_bytes(netmask.octets()).leading_ones() as u8
}
