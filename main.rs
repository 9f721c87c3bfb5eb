use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use rppal::hal::Delay;

use cansat::altitude::sealevel_pressure;
use cansat::bme280::Bme280;
use cansat::buffer::SampleBuffer;
use cansat::bus::I2cBus;
use cansat::config::Config;
use cansat::ms5611::Ms5611;
use cansat::payload::Payload;
use cansat::storage::SessionStorage;
use cansat::Result;

fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref())?;
    info!("Configuration: {:?}", config);

    let ms5611_bus = I2cBus::open(config.ms5611.bus, config.ms5611.address)?;
    let ms5611 = Ms5611::new(ms5611_bus, Delay::new(), config.ms5611.oversampling()?)?;
    info!("MS5611 ready: {}", ms5611.reading());

    let bme280_bus = I2cBus::open(config.bme280.bus, config.bme280.address)?;
    let bme280 = Bme280::new(bme280_bus, Delay::new(), config.bme280.oversampling()?)?;
    info!("BME280 ready");

    let storage = SessionStorage::open(
        &config.storage.root,
        &config.storage.session,
        &config.storage.file,
    )?;
    let buffer = SampleBuffer::new(storage, config.buffer_capacity)?;
    info!("Buffering {} samples per flush", buffer.capacity());

    let sealevel_pa = match config.launch_altitude_m {
        Some(altitude_m) => {
            let reference = sealevel_pressure(ms5611.reading().pressure, altitude_m);
            info!(
                "Sea-level reference {:.0} Pa from launch altitude {} m",
                reference, altitude_m
            );
            reference
        }
        None => config.sealevel_pa,
    };

    let mut payload = Payload::new(ms5611, bme280, buffer, sealevel_pa);
    let interval = Duration::from_millis(config.sample_interval_ms);
    let mut cycles: u64 = 0;
    let mut stalled = false;

    loop {
        let report = payload.cycle(None);
        cycles += 1;

        // StorageUnavailable is only logged once per stall
        match (&report.storage, stalled) {
            (Some(_), false) => {
                warn!(
                    "Logging stalled, {} samples dropped",
                    payload.buffer().dropped()
                );
                stalled = true;
            }
            (None, true) => {
                info!("Logging resumed");
                stalled = false;
            }
            _ => {}
        }

        if let Some(max_cycles) = config.max_cycles {
            if cycles >= max_cycles {
                break;
            }
        }
        thread::sleep(interval);
    }

    payload.finish()?;
    info!(
        "Done after {} cycles, {} flushes, {} samples dropped",
        cycles,
        payload.buffer().flushes(),
        payload.buffer().dropped()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    if let Err(e) = run(config_path) {
        error!("{}", e);
        process::exit(1);
    }
}
