//! UART management
//!
//! Thin wrapper over the IDF UART driver, which does its own DMA/ring
//! buffering. Reads are non-blocking so the bridge loop stays cooperative.

use esp_idf_hal::gpio;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config, UartDriver};
use log::info;

use crate::config::{Parity, SerialConfig, StopBits};
use crate::error::{Error, Result};

/// Baud rates the bridge is willing to run the UART at.
const VALID_BAUDRATES: [u32; 9] = [
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1500000,
];

pub struct UartManager {
    uart: UartDriver<'static>,
}

impl UartManager {
    pub fn new(
        uart: impl Peripheral<P = esp_idf_hal::uart::UART1> + 'static,
        tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'static,
        rx_pin: impl Peripheral<P = impl gpio::InputPin> + 'static,
        serial: &SerialConfig,
    ) -> Result<Self> {
        if !Self::is_valid_baudrate(serial.baudrate) {
            return Err(Error::Uart(format!("invalid baudrate: {}", serial.baudrate)));
        }

        let uart_config = config::Config::new()
            .baudrate(Hertz(serial.baudrate))
            .data_bits(match serial.data_bits {
                5 => config::DataBits::DataBits5,
                6 => config::DataBits::DataBits6,
                7 => config::DataBits::DataBits7,
                _ => config::DataBits::DataBits8,
            })
            .stop_bits(match serial.stop_bits {
                StopBits::One => config::StopBits::STOP1,
                StopBits::Two => config::StopBits::STOP2,
            });
        let uart_config = match serial.parity {
            Parity::None => uart_config.parity_none(),
            Parity::Even => uart_config.parity_even(),
            Parity::Odd => uart_config.parity_odd(),
        };

        let uart = UartDriver::new(
            uart,
            tx_pin,
            rx_pin,
            Option::<gpio::Gpio0>::None, // RTS pin (not used)
            Option::<gpio::Gpio1>::None, // CTS pin (not used)
            &uart_config,
        )
        .map_err(|e| Error::Uart(format!("failed to create UART driver: {}", e)))?;

        info!("UART initialized at {} baud", serial.baudrate);
        Ok(Self { uart })
    }

    /// Send data to the serial peripheral.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.uart
            .write(data)
            .map_err(|e| Error::Uart(format!("failed to write to UART: {}", e)))?;
        Ok(())
    }

    /// Receive whatever is pending, without blocking. Returns 0 when the
    /// receive buffer is empty.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.uart.read(buf, 0) {
            Ok(len) => Ok(len),
            Err(err) => {
                // A timeout just means no data was pending.
                let msg = format!("{:?}", err);
                if msg.contains("TIMEOUT") {
                    Ok(0)
                } else {
                    Err(Error::Uart(format!("failed to read from UART: {}", err)))
                }
            }
        }
    }

    pub fn is_valid_baudrate(baudrate: u32) -> bool {
        VALID_BAUDRATES.contains(&baudrate)
    }
}
