//! Bridge configuration
//!
//! Plain configuration structs plus the fixed byte layout used by the
//! persistent vault. Field widths follow the radio API limits (32-byte SSID,
//! 64-byte passphrase).

use std::net::Ipv4Addr;

use heapless::String;

use crate::error::{Error, Result};

/// Network operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    /// Networking disabled; the engine is a no-op.
    Off,
    /// Broadcast our own access point.
    AccessPoint,
    /// Join an existing network as a station.
    Station,
}

impl NetMode {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(NetMode::Off),
            1 => Ok(NetMode::AccessPoint),
            2 => Ok(NetMode::Station),
            other => Err(Error::Config(format!("invalid network mode {}", other))),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            NetMode::Off => 0,
            NetMode::AccessPoint => 1,
            NetMode::Station => 2,
        }
    }
}

/// Network configuration
///
/// Immutable for the lifetime of one engine `begin`; mode switches only take
/// effect through an explicit re-`begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Advertised device name
    pub hostname: String<32>,
    /// Operating mode
    pub mode: NetMode,
    /// SSID (broadcast in AP mode, joined in station mode)
    pub ssid: String<32>,
    /// Passphrase for the chosen mode
    pub psk: String<64>,
    /// Static address; all-zero means "use DHCP" (station mode only)
    pub address: Ipv4Addr,
    /// Netmask for static addressing
    pub netmask: Ipv4Addr,
    /// TCP listener port
    pub port: u16,
}

impl NetworkConfig {
    /// Whether a static address was configured (the all-zero address is the
    /// "use dynamic addressing" sentinel).
    pub fn uses_static_address(&self) -> bool {
        !self.address.is_unspecified()
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: String::try_from("netbridge").unwrap_or_default(),
            mode: NetMode::AccessPoint,
            ssid: String::try_from("NETBRIDGE").unwrap_or_default(),
            psk: String::try_from("password123").unwrap_or_default(),
            address: Ipv4Addr::new(192, 168, 4, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            port: 8080,
        }
    }
}

/// UART parity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// UART stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Serial port configuration for the bridged UART
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate
    pub baudrate: u32,
    /// Data bits (5..=8)
    pub data_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppConfig {
    /// Network configuration
    pub net: NetworkConfig,
    /// Serial configuration
    pub serial: SerialConfig,
}

// Fixed vault payload layout. Strings are NUL-padded at fixed offsets so the
// image stays the same size regardless of content.
const HOSTNAME_AT: usize = 0;
const MODE_AT: usize = 32;
const SSID_AT: usize = 33;
const PSK_AT: usize = 65;
const ADDRESS_AT: usize = 129;
const NETMASK_AT: usize = 133;
const PORT_AT: usize = 137;
const BAUDRATE_AT: usize = 139;
const DATA_BITS_AT: usize = 143;
const PARITY_AT: usize = 144;
const STOP_BITS_AT: usize = 145;

/// Size of the encoded configuration image.
pub const CONFIG_IMAGE_LEN: usize = 146;

fn put_str(buf: &mut [u8], s: &str) {
    buf.fill(0);
    buf[..s.len()].copy_from_slice(s.as_bytes());
}

fn get_str<const N: usize>(buf: &[u8], what: &str) -> Result<String<N>> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| Error::Config(format!("{} is not valid UTF-8", what)))?;
    String::try_from(s).map_err(|_| Error::Config(format!("{} too long", what)))
}

fn get_addr(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3])
}

impl AppConfig {
    /// Serialize into the fixed vault image.
    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= CONFIG_IMAGE_LEN);
        put_str(&mut buf[HOSTNAME_AT..MODE_AT], &self.net.hostname);
        buf[MODE_AT] = self.net.mode.as_byte();
        put_str(&mut buf[SSID_AT..PSK_AT], &self.net.ssid);
        put_str(&mut buf[PSK_AT..ADDRESS_AT], &self.net.psk);
        buf[ADDRESS_AT..NETMASK_AT].copy_from_slice(&self.net.address.octets());
        buf[NETMASK_AT..PORT_AT].copy_from_slice(&self.net.netmask.octets());
        buf[PORT_AT..BAUDRATE_AT].copy_from_slice(&self.net.port.to_le_bytes());
        buf[BAUDRATE_AT..DATA_BITS_AT].copy_from_slice(&self.serial.baudrate.to_le_bytes());
        buf[DATA_BITS_AT] = self.serial.data_bits;
        buf[PARITY_AT] = match self.serial.parity {
            Parity::None => 0,
            Parity::Even => 1,
            Parity::Odd => 2,
        };
        buf[STOP_BITS_AT] = match self.serial.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
    }

    /// Deserialize a vault image, validating every field.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < CONFIG_IMAGE_LEN {
            return Err(Error::Config(format!(
                "config image truncated: {} bytes",
                buf.len()
            )));
        }
        let data_bits = buf[DATA_BITS_AT];
        if !(5..=8).contains(&data_bits) {
            return Err(Error::Config(format!("invalid data bits {}", data_bits)));
        }
        Ok(Self {
            net: NetworkConfig {
                hostname: get_str(&buf[HOSTNAME_AT..MODE_AT], "hostname")?,
                mode: NetMode::from_byte(buf[MODE_AT])?,
                ssid: get_str(&buf[SSID_AT..PSK_AT], "ssid")?,
                psk: get_str(&buf[PSK_AT..ADDRESS_AT], "psk")?,
                address: get_addr(&buf[ADDRESS_AT..NETMASK_AT]),
                netmask: get_addr(&buf[NETMASK_AT..PORT_AT]),
                port: u16::from_le_bytes([buf[PORT_AT], buf[PORT_AT + 1]]),
            },
            serial: SerialConfig {
                baudrate: u32::from_le_bytes([
                    buf[BAUDRATE_AT],
                    buf[BAUDRATE_AT + 1],
                    buf[BAUDRATE_AT + 2],
                    buf[BAUDRATE_AT + 3],
                ]),
                data_bits,
                parity: match buf[PARITY_AT] {
                    0 => Parity::None,
                    1 => Parity::Even,
                    2 => Parity::Odd,
                    other => {
                        return Err(Error::Config(format!("invalid parity {}", other)));
                    }
                },
                stop_bits: match buf[STOP_BITS_AT] {
                    1 => StopBits::One,
                    2 => StopBits::Two,
                    other => {
                        return Err(Error::Config(format!("invalid stop bits {}", other)));
                    }
                },
            },
        })
    }
}
