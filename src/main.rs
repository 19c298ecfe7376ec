#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();

    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("netbridge starting up...");

    app::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("netbridge is device firmware; build it for the espidf target");
}

#[cfg(target_os = "espidf")]
mod app {
    use log::{error, info, warn};
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::gpio::PinDriver;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use netbridge::clock::{Clock, SystemClock};
    use netbridge::config::{AppConfig, CONFIG_IMAGE_LEN};
    use netbridge::led::StatusLed;
    use netbridge::mdns::MdnsAdvertiser;
    use netbridge::net::{NetManager, Phase};
    use netbridge::nvm::Vault;
    use netbridge::session::Connection;
    use netbridge::storage::NvsRegion;
    use netbridge::tcp::{TcpAcceptor, TcpClient};
    use netbridge::uart::UartManager;
    use netbridge::wifi::WifiLink;

    pub fn run() -> anyhow::Result<()> {
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs_partition = EspDefaultNvsPartition::take()?;

        let config = load_or_init_config(nvs_partition.clone())?;
        info!("configuration loaded");

        let link = WifiLink::new(peripherals.modem, sysloop, nvs_partition, &config.net)?;
        let advertiser = MdnsAdvertiser::new()?;
        let mut uart = UartManager::new(
            peripherals.uart1,
            peripherals.pins.gpio21,
            peripherals.pins.gpio20,
            &config.serial,
        )?;
        let mut led = StatusLed::new(PinDriver::output(peripherals.pins.gpio8)?);

        let clock = SystemClock::new();
        let mut net = NetManager::new(
            config.net.clone(),
            link,
            TcpAcceptor::new(),
            advertiser,
            clock,
        );

        let mut handoff = |client: &mut TcpClient, header: &str| {
            if let Some(request) = header.lines().next() {
                info!("client {} requested '{}'", client.peer_addr(), request);
            }
            bridge(client, &mut uart);
        };

        let mut was_active = false;
        loop {
            led.poll(clock.now_millis());
            let phase = net.poll(&mut led, Some(&mut handoff));
            let active = phase == Some(Phase::Active);
            if active && !was_active {
                net.log_status();
            }
            was_active = active;
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Pull the configuration out of the vault; on first boot (or after
    /// corruption) store the defaults back so the image exists from then on.
    fn load_or_init_config(
        partition: esp_idf_svc::nvs::EspNvsPartition<esp_idf_svc::nvs::NvsDefault>,
    ) -> anyhow::Result<AppConfig> {
        let mut vault = Vault::new(NvsRegion::new(partition)?);
        let mut image = [0u8; CONFIG_IMAGE_LEN];
        if vault.load(&mut image) {
            match AppConfig::decode(&image) {
                Ok(config) => return Ok(config),
                Err(err) => warn!("stored configuration invalid: {}", err),
            }
        }
        let config = AppConfig::default();
        config.encode(&mut image);
        vault.store(&image);
        vault.flush();
        info!("defaults written to NVM");
        Ok(config)
    }

    /// Forward bytes between the accepted client and the UART until the
    /// client goes away. One client at a time, by design.
    fn bridge(client: &mut TcpClient, uart: &mut UartManager) {
        let mut buf = [0u8; 256];
        while client.is_connected() {
            let mut idle = true;
            while client.byte_available() {
                match client.read_byte() {
                    Some(byte) => {
                        if let Err(err) = uart.send(&[byte]) {
                            error!("UART write failed: {}", err);
                        }
                        idle = false;
                    }
                    None => break,
                }
            }
            match uart.recv(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if client.write_all(&buf[..n]).is_err() {
                        break;
                    }
                    idle = false;
                }
                Err(err) => error!("UART read failed: {}", err),
            }
            if idle {
                thread::sleep(Duration::from_millis(1));
            }
        }
        info!("client {} disconnected", client.peer_addr());
    }
}
