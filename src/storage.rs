//! Persistent configuration store used by the networking subsystem

use core::convert::Infallible;

use crate::errors::ErrorCode;
use crate::info;

/// Key-value store the radio keeps its calibration and settings in
///
/// It has to be initialised once before the radio is started.
pub trait ConfigStore {
    type Error: ErrorCode;

    fn init(&mut self) -> Result<(), Self::Error>;
}

/// In-memory store for hosts without flash
#[derive(Debug, Default)]
pub struct VolatileStore {
    initialised: bool,
}

impl VolatileStore {
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }
}

impl ConfigStore for VolatileStore {
    type Error = Infallible;

    fn init(&mut self) -> Result<(), Self::Error> {
        info!("Using volatile configuration store");
        self.initialised = true;
        Ok(())
    }
}
