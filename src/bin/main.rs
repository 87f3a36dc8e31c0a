use core::convert::Infallible;
use core::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use heapless::spsc::{Producer, Queue};
use std_embedded_nal::Stack;

use station_report::association::deliver;
use station_report::config::{EVENT_QUEUE_LEN, WIFI_PASSWORD, WIFI_SSID};
use station_report::peripheral::{PeripheralLoop, SpiMasterConfig};
use station_report::storage::VolatileStore;
use station_report::{
    App, AppError, AssociationConfig, AssociationManager, Credentials, LinkEvent, Radio,
    RedirectPolicy, ReporterConfig,
};

// The host stack has no TLS
const HOST_REPORT_URL: &str = "http://api.open-meteo.com/v1/forecast?latitude=36.2127&longitude=-121.126&current=temperature_2m&timezone=America%2FLos_Angeles&temperature_unit=fahrenheit";
const HOST_PORT: u16 = 8080;

/// The host is already on a network: joining always succeeds at once
struct LoopbackRadio<'q> {
    events: Producer<'q, LinkEvent, EVENT_QUEUE_LEN>,
}

impl Radio for LoopbackRadio<'_> {
    type Error = Infallible;

    fn start(&mut self, credentials: &Credentials) -> Result<(), Self::Error> {
        log::info!("Loopback radio up, ignoring SSID {}", credentials.ssid());
        deliver(&mut self.events, LinkEvent::StationStarted);
        Ok(())
    }

    fn connect(&mut self) -> Result<(), Self::Error> {
        deliver(
            &mut self.events,
            LinkEvent::GotIp {
                address: Ipv4Addr::LOCALHOST,
            },
        );
        Ok(())
    }
}

/// SPI device with MISO wired to MOSI
struct LoopbackSpi;

impl ErrorType for LoopbackSpi {
    type Error = ErrorKind;
}

impl SpiDevice for LoopbackSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::Transfer(read, write) => {
                    let len = read.len().min(write.len());
                    read[..len].copy_from_slice(&write[..len]);
                }
                Operation::DelayNs(ns) => thread::sleep(Duration::from_nanos(u64::from(*ns))),
                Operation::Read(_) | Operation::Write(_) | Operation::TransferInPlace(_) => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
enum LocalErrors {
    Credentials,
    App(AppError),
    SpiTask,
}

impl From<AppError> for LocalErrors {
    fn from(inner: AppError) -> Self {
        LocalErrors::App(inner)
    }
}

fn sleep_ms(ms: u32) {
    thread::sleep(Duration::from_millis(u64::from(ms)));
}

fn main() -> Result<(), LocalErrors> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Starting station");
    let credentials =
        Credentials::new(WIFI_SSID, WIFI_PASSWORD).map_err(|_| LocalErrors::Credentials)?;

    let running = Arc::new(AtomicBool::new(true));
    let spi_running = running.clone();
    let spi_task = thread::spawn(move || {
        let mut spi = PeripheralLoop::new(LoopbackSpi, SpiMasterConfig::default());
        spi.run(&mut sleep_ms, &mut || spi_running.load(Ordering::Relaxed));
    });

    let mut queue: Queue<LinkEvent, EVENT_QUEUE_LEN> = Queue::new();
    let (producer, consumer) = queue.split();
    let mut association_delay = sleep_ms;
    let manager = AssociationManager::new(
        LoopbackRadio { events: producer },
        consumer,
        AssociationConfig::default(),
        &mut association_delay,
    );

    let mut stack = Stack::default();
    let mut app = App::new(VolatileStore::default(), manager, credentials)
        .with_reporter(ReporterConfig {
            url: HOST_REPORT_URL,
            redirect_policy: RedirectPolicy::Observe,
        })
        .with_port(HOST_PORT);
    let result = app.run(&mut stack, &mut sleep_ms, &mut || true);

    running.store(false, Ordering::Relaxed);
    spi_task.join().map_err(|_| LocalErrors::SpiTask)?;

    let summary = result?;
    log::info!(
        "Station done: {:?}, report status {:?}, {} requests served",
        summary.outcome,
        summary.report_status,
        summary.requests_served
    );
    Ok(())
}
