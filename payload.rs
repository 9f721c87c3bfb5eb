use std::time::Instant;

use embedded_hal::blocking::delay::DelayMs;
use log::{debug, warn};

use crate::altitude::altitude;
use crate::bme280::Bme280;
use crate::buffer::SampleBuffer;
use crate::bus::BusTransport;
use crate::ms5611::Ms5611;
use crate::storage::StorageSink;
use crate::structs::{BaroSample, GpsFix, Reading, SampleRecord};
use crate::{Error, Result};

/// What went wrong in one sampling cycle. A failed sensor contributed its
/// previous reading to the record.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub ms5611: Option<Error>,
    pub bme280: Option<Error>,
    pub storage: Option<Error>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.ms5611.is_none() && self.bme280.is_none() && self.storage.is_none()
    }
}

/// The payload's peripherals and log buffer, owned by the control loop.
pub struct Payload<MB, EB, D, S> {
    ms5611: Ms5611<MB, D>,
    bme280: Bme280<EB, D>,
    buffer: SampleBuffer<S>,
    sealevel_pa: f64,
    started: Instant,
}

impl<MB, EB, D, S> Payload<MB, EB, D, S>
where
    MB: BusTransport,
    EB: BusTransport,
    D: DelayMs<u32>,
    S: StorageSink,
{
    pub fn new(
        ms5611: Ms5611<MB, D>,
        bme280: Bme280<EB, D>,
        buffer: SampleBuffer<S>,
        sealevel_pa: f64,
    ) -> Self {
        Self {
            ms5611,
            bme280,
            buffer,
            sealevel_pa,
            started: Instant::now(),
        }
    }

    /// Update both sensors, build the record and buffer it.
    ///
    /// Sensor and storage faults are logged and reported, never fatal.
    pub fn cycle(&mut self, gps: Option<GpsFix>) -> CycleReport {
        let mut report = CycleReport::default();

        if let Err(e) = self.ms5611.update() {
            warn!("MS5611 update failed, keeping last reading: {}", e);
            report.ms5611 = Some(e);
        }
        if let Err(e) = self.bme280.update() {
            warn!("BME280 update failed, keeping last reading: {}", e);
            report.bme280 = Some(e);
        }

        let record = self.record(gps);
        debug!("{}", record);
        match self.buffer.append(record) {
            Ok(()) => {}
            Err(Error::StorageUnavailable) => report.storage = Some(Error::StorageUnavailable),
            Err(e) => {
                warn!("Could not store sample: {}", e);
                report.storage = Some(e);
            }
        }
        report
    }

    /// A record from the latest readings, without touching the sensors.
    pub fn record(&self, gps: Option<GpsFix>) -> SampleRecord {
        SampleRecord {
            timestamp_ms: self.started.elapsed().as_millis() as u64,
            ms5611: self.baro_sample(self.ms5611.reading()),
            bme280: self.baro_sample(self.bme280.reading()),
            humidity: self.bme280.humidity(),
            gps,
        }
    }

    fn baro_sample(&self, reading: Reading) -> BaroSample {
        BaroSample {
            temperature: reading.temperature,
            pressure_hpa: reading.pressure_hpa(),
            altitude_m: altitude(reading.pressure, self.sealevel_pa),
        }
    }

    /// Write out whatever is still buffered, e.g. before shutdown.
    ///
    /// A missing medium only costs the unwritten tail and is logged, not
    /// returned. Write failures are returned.
    pub fn finish(&mut self) -> Result<()> {
        match self.buffer.flush() {
            Err(Error::StorageUnavailable) => {
                warn!(
                    "Storage unavailable at shutdown, {} samples not written",
                    self.buffer.len()
                );
                Ok(())
            }
            result => result,
        }
    }

    pub fn bme280(&self) -> &Bme280<EB, D> {
        &self.bme280
    }

    pub fn buffer(&self) -> &SampleBuffer<S> {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::altitude::SEALEVEL_PA;
    use crate::bme280::OversamplingMode;
    use crate::buffer::tests::{MemorySink, SinkState};
    use crate::bus::mock::{CountingDelay, MockBus};
    use crate::ms5611::Oversampling;
    use approx::assert_abs_diff_eq;

    fn ms5611_bus() -> MockBus {
        let mut bus = MockBus::new();
        let prom: [u16; 6] = [40127, 36924, 23317, 23282, 33464, 28312];
        for (n, word) in prom.iter().enumerate() {
            bus.respond(0xA2 + 2 * n as u8, &word.to_be_bytes());
        }
        // D1 = 9085466, D2 = 8569150
        bus.respond(0x00, &[0x8A, 0xA2, 0x1A]);
        bus.respond(0x00, &[0x82, 0xC1, 0x3E]);
        bus
    }

    fn bme280_bus(status: &[u8]) -> MockBus {
        let mut bus = MockBus::new();
        bus.respond(
            0x88,
            &[
                0x70, 0x6b, 0x43, 0x67, 0x18, 0xfc, 0x7d, 0x8e, 0x43, 0xd6, 0xd0, 0x0b, 0x27,
                0x0b, 0x8c, 0x00, 0xf9, 0xff, 0x8c, 0x3c, 0xf8, 0xc6, 0x70, 0x17, 0x00, 0x4b,
            ],
        )
        .respond(0xE1, &[0x6a, 0x01, 0x00, 0x13, 0x29, 0x03, 0x1e])
        // raw P = 415148, raw T = 519888, raw H = 30000
        .respond(0xF7, &[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x75, 0x30]);
        for &s in status {
            bus.respond(0xF3, &[s]);
        }
        bus
    }

    fn payload(
        capacity: usize,
        bme_status: &[u8],
    ) -> Payload<MockBus, MockBus, CountingDelay, MemorySink> {
        let ms5611 =
            Ms5611::new(ms5611_bus(), CountingDelay::default(), Oversampling::Osr4096).unwrap();
        let bme280 = Bme280::new(
            bme280_bus(bme_status),
            CountingDelay::default(),
            OversamplingMode::default(),
        )
        .unwrap();
        let buffer = SampleBuffer::new(MemorySink::new(), capacity).unwrap();
        Payload::new(ms5611, bme280, buffer, SEALEVEL_PA)
    }

    #[test]
    fn cycle_merges_both_sensors() {
        let mut payload = payload(10, &[0x00]);
        let gps = GpsFix {
            latitude: 50.85,
            longitude: 4.35,
            satellites: 6,
            fix_quality: 1,
            ..GpsFix::default()
        };
        let report = payload.cycle(Some(gps));
        assert!(report.is_clean(), "{:?}", report);

        let records = payload.buffer().records();
        assert_eq!(records.len(), 1);
        let record = records[0];
        assert_abs_diff_eq!(record.bme280.temperature, 25.08, epsilon = 0.01);
        assert_abs_diff_eq!(record.bme280.pressure_hpa, 1006.53, epsilon = 0.01);
        assert_abs_diff_eq!(record.humidity, 55.0, epsilon = 0.01);
        assert_abs_diff_eq!(
            record.bme280.altitude_m,
            altitude(100_653.258, SEALEVEL_PA),
            epsilon = 0.01
        );
        assert!(record.ms5611.altitude_m > 0.0);
        assert_eq!(record.gps, Some(gps));
    }

    #[test]
    fn sensor_timeout_reports_and_keeps_logging() {
        // ready for the first reading, then stuck measuring
        let mut payload = payload(10, &[0x00, 0x08]);
        let before = payload.bme280().reading();

        let report = payload.cycle(None);
        assert!(matches!(report.bme280, Some(Error::SensorNotReady)));
        assert!(report.ms5611.is_none());
        assert!(report.storage.is_none());
        assert_eq!(payload.buffer().len(), 1);
        assert_eq!(payload.bme280().reading(), before);
        let record = payload.buffer().records()[0];
        assert_abs_diff_eq!(record.bme280.temperature, 25.08, epsilon = 0.01);
    }

    #[test]
    fn unmounted_storage_is_reported_not_fatal() {
        let mut payload = payload(2, &[0x00]);
        payload.buffer.sink_mut().state = SinkState::Unmounted;
        assert!(payload.cycle(None).is_clean());
        assert!(payload.cycle(None).is_clean());

        let report = payload.cycle(None);
        assert!(matches!(report.storage, Some(Error::StorageUnavailable)));
        assert_eq!(payload.buffer().len(), 2);
        assert_eq!(payload.buffer().dropped(), 1);
    }

    #[test]
    fn finish_flushes_the_tail() {
        let mut payload = payload(10, &[0x00]);
        payload.cycle(None);
        payload.cycle(None);
        payload.finish().unwrap();
        assert!(payload.buffer().is_empty());
        assert_eq!(payload.buffer().sink().batches.len(), 1);
        assert_eq!(payload.buffer().sink().batches[0].len(), 2);

        // nothing left, nothing written
        payload.finish().unwrap();
        assert_eq!(payload.buffer().sink().batches.len(), 1);
    }

    #[test]
    fn finish_without_medium_is_not_an_error() {
        let mut payload = payload(10, &[0x00]);
        payload.cycle(None);
        payload.buffer.sink_mut().state = SinkState::Unmounted;
        payload.finish().unwrap();
        assert_eq!(payload.buffer().len(), 1);

        payload.buffer.sink_mut().state = SinkState::Failing;
        assert!(matches!(payload.finish(), Err(Error::Storage(_))));
    }
}
