//! Wi-Fi station connectivity and reporting loop
//!
//! The crate joins a wireless network with a bounded retry budget
//! ([association]), serves a single static route ([responder]), performs
//! one outbound request to a weather endpoint ([reporter]) and then idles,
//! serving requests, until told to stop ([app]). A SPI master exchange
//! loop ([peripheral]) is meant to run as its own task next to it.
//!
//! Hardware is reached through traits only: [association::Radio] for the
//! Wi-Fi driver, [embedded_nal] stacks for TCP and DNS, and
//! [embedded_hal::spi::SpiDevice] for the SPI bus.
#![no_std]
// Dual logging system compatibility: defmt doesn't support modern format syntax
#![allow(clippy::uninlined_format_args)]

#[cfg(any(test, feature = "std"))]
extern crate std;

// Compile-time checks for logging features
#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("Features 'defmt' and 'log' are mutually exclusive. Enable only one for logging.");

#[cfg(not(any(feature = "defmt", feature = "log")))]
compile_error!("Must enable either 'defmt' or 'log' feature for logging support.");

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(feature = "log")]
#[allow(unused_imports)]
pub(crate) use log::{debug, error, info, trace, warn};

pub mod app;
pub mod association;
pub mod config;
pub mod errors;
pub mod peripheral;
pub mod reporter;
pub mod responder;
pub mod storage;
pub mod transport;
pub mod uri;
pub mod url;

#[cfg(test)]
mod test_shared;

pub use app::{App, IdleConfig, RunSummary};
pub use association::{
    AssociationConfig, AssociationManager, AssociationOutcome, AssociationState, Credentials,
    LinkEvent, Radio,
};
pub use errors::{
    AppError, AssociationError, ErrorCode, HandlerError, ReportError, ResponderError, RouteError,
    TransportError,
};
pub use reporter::{RedirectPolicy, ReportOutcome, Reporter, ReporterConfig, ResponseBuffer};
pub use responder::{Method, Responder, RouteTable, ServerHandle};
pub use storage::ConfigStore;
pub use transport::{NalTransport, TlsSetup, Transport};

pub(crate) struct Ipv4AddrWrap<'a> {
    addr: &'a core::net::Ipv4Addr,
}

impl<'a> Ipv4AddrWrap<'a> {
    pub(crate) fn new(addr: &'a core::net::Ipv4Addr) -> Self {
        Self { addr }
    }
}

impl core::fmt::Display for Ipv4AddrWrap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self.addr, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Ipv4AddrWrap<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        let [a, b, c, d] = self.addr.octets();
        defmt::write!(fmt, "{=u8}.{=u8}.{=u8}.{=u8}", a, b, c, d);
    }
}

pub(crate) struct SocketAddrWrap<'a> {
    addr: &'a core::net::SocketAddr,
}

impl<'a> SocketAddrWrap<'a> {
    pub(crate) fn new(addr: &'a core::net::SocketAddr) -> Self {
        Self { addr }
    }
}

impl core::fmt::Display for SocketAddrWrap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(self.addr, f)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SocketAddrWrap<'_> {
    fn format(&self, fmt: defmt::Formatter) {
        match self.addr {
            core::net::SocketAddr::V4(addr) => defmt::write!(
                fmt,
                "{}:{}",
                Ipv4AddrWrap { addr: addr.ip() },
                addr.port()
            ),
            core::net::SocketAddr::V6(addr) => defmt::write!(fmt, "[v6]:{}", addr.port()),
        }
    }
}
