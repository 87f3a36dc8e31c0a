//! SPI master exchange task
//!
//! Sends one byte every period and logs what came back. The loop owns its
//! [SpiDevice]; chip select timing and the bus clock are the device's
//! concern, [SpiMasterConfig] only records what the bus was set up with.

use embedded_hal::spi::{Error as _, ErrorKind, Mode, SpiDevice, MODE_0};

use crate::config::{
    GPIO_CS, GPIO_MISO, GPIO_MOSI, GPIO_SCLK, SPI_CLOCK_HZ, SPI_CS_POSTTRANS_CYCLES,
    SPI_DUTY_CYCLE_POS, SPI_PERIOD_MS, SPI_QUEUE_SIZE, SPI_RX_FILL, SPI_TX_BYTE,
};
use crate::{error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    pub cs: u8,
    pub sclk: u8,
    pub miso: u8,
    pub mosi: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiMasterConfig {
    pub pins: SpiPins,
    pub clock_hz: u32,
    pub mode: Mode,
    /// High time of the clock in 1/256 of the period
    pub duty_cycle_pos: u16,
    /// Clock cycles chip select stays active after a transaction
    pub cs_posttrans_cycles: u8,
    pub queue_size: u8,
    pub tx_byte: u8,
    /// Receive buffer contents before the first exchange
    pub rx_fill: u8,
    pub period_ms: u32,
}

impl Default for SpiMasterConfig {
    fn default() -> Self {
        Self {
            pins: SpiPins {
                cs: GPIO_CS,
                sclk: GPIO_SCLK,
                miso: GPIO_MISO,
                mosi: GPIO_MOSI,
            },
            clock_hz: SPI_CLOCK_HZ,
            mode: MODE_0,
            duty_cycle_pos: SPI_DUTY_CYCLE_POS,
            cs_posttrans_cycles: SPI_CS_POSTTRANS_CYCLES,
            queue_size: SPI_QUEUE_SIZE,
            tx_byte: SPI_TX_BYTE,
            rx_fill: SPI_RX_FILL,
            period_ms: SPI_PERIOD_MS,
        }
    }
}

pub struct PeripheralLoop<D> {
    device: D,
    config: SpiMasterConfig,
    rx: [u8; 1],
    exchanges: u32,
}

impl<D: SpiDevice> PeripheralLoop<D> {
    pub fn new(device: D, config: SpiMasterConfig) -> Self {
        let pins = config.pins;
        info!(
            "SPI master cs={} sclk={} miso={} mosi={} at {} Hz",
            pins.cs, pins.sclk, pins.miso, pins.mosi, config.clock_hz
        );
        Self {
            device,
            rx: [config.rx_fill],
            config,
            exchanges: 0,
        }
    }

    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// One full-duplex byte exchange
    pub fn exchange(&mut self) -> Result<u8, ErrorKind> {
        let tx = [self.config.tx_byte];
        self.device
            .transfer(&mut self.rx, &tx)
            .map_err(|e| e.kind())?;
        self.exchanges += 1;
        trace!("SPI sent {:#x}", tx[0]);
        info!("Received: {}", self.rx[0] as char);
        Ok(self.rx[0])
    }

    /// Exchange once per period until `keep_running` returns false
    ///
    /// A failed exchange is logged and the loop carries on.
    pub fn run(&mut self, delay: &mut dyn FnMut(u32), keep_running: &mut dyn FnMut() -> bool) {
        while keep_running() {
            if let Err(kind) = self.exchange() {
                error!("SPI exchange failed: {:?}", kind);
            }
            delay(self.config.period_ms);
        }
        info!("SPI loop stopped after {} exchanges", self.exchanges);
    }
}
