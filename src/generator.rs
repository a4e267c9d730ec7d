//! Reading sources for the producer.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ValidationError;
use crate::models::{DomainBand, Reading};

/// An infinite, restartable source of readings.
///
/// Pacing is the caller's business; `next_reading` returns immediately.
pub trait Generator: Send {
    fn next_reading(&mut self) -> Result<Reading, ValidationError>;
}

/// Simulated stations drawing uniformly from a [`DomainBand`].
///
/// Values are rounded to two decimals and stamped with the current UTC time.
pub struct RandomGenerator {
    band: DomainBand,
    rng: StdRng,
}

impl RandomGenerator {
    pub fn new(band: DomainBand) -> Self {
        Self {
            band,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic sequence, for tests and reproducible load runs.
    pub fn with_seed(band: DomainBand, seed: u64) -> Self {
        Self {
            band,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn band(&self) -> &DomainBand {
        &self.band
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new(DomainBand::default())
    }
}

impl Generator for RandomGenerator {
    fn next_reading(&mut self) -> Result<Reading, ValidationError> {
        let station_id = self.rng.random_range(self.band.station_id.clone());
        let temperature = round2(self.rng.random_range(self.band.temperature.clone()));
        let humidity = round2(self.rng.random_range(self.band.humidity.clone()));
        let pressure = round2(self.rng.random_range(self.band.pressure.clone()));

        let reading = Reading::new(station_id, temperature, humidity, Utc::now().naive_utc())?
            .with_pressure(pressure)?;
        reading.check_band(&self.band)?;
        Ok(reading)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
