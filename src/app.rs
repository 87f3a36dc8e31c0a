//! Startup sequence and idle loop
//!
//! Storage init, association, responder start, one report, then serve
//! requests until told to stop. Only a storage failure aborts the run;
//! everything after it degrades instead.

use embedded_nal::nb;
use embedded_nal::{Dns, TcpFullStack};

use crate::association::{AssociationManager, AssociationOutcome, Credentials, Radio};
use crate::config::{HTTP_PORT, IDLE_LOG_INTERVAL_MS, IDLE_POLL_MS, MAX_HTTP_OUTPUT_BUFFER};
use crate::errors::{AppError, ErrorCode};
use crate::reporter::{Reporter, ReporterConfig};
use crate::responder::{hello_route, Responder, ServerHandle};
use crate::storage::ConfigStore;
use crate::transport::{NalTransport, TlsSetup};
use crate::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// How often the idle loop says it is still alive
    pub interval_ms: u32,
    /// Sleep between server polls
    pub poll_ms: u32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            interval_ms: IDLE_LOG_INTERVAL_MS,
            poll_ms: IDLE_POLL_MS,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// `None` when association ended in an error
    pub outcome: Option<AssociationOutcome>,
    /// Status of the report, if one completed
    pub report_status: Option<u16>,
    pub requests_served: u32,
}

pub struct App<'a, St, R, const Q: usize> {
    store: St,
    association: AssociationManager<'a, R, Q>,
    credentials: Credentials,
    reporter: ReporterConfig<'a>,
    idle: IdleConfig,
    port: u16,
}

impl<'a, St, R, const Q: usize> App<'a, St, R, Q>
where
    St: ConfigStore,
    R: Radio,
{
    pub fn new(
        store: St,
        association: AssociationManager<'a, R, Q>,
        credentials: Credentials,
    ) -> Self {
        Self {
            store,
            association,
            credentials,
            reporter: ReporterConfig::default(),
            idle: IdleConfig::default(),
            port: HTTP_PORT,
        }
    }

    pub fn with_reporter(mut self, reporter: ReporterConfig<'a>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_idle(mut self, idle: IdleConfig) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn association(&self) -> &AssociationManager<'a, R, Q> {
        &self.association
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Run the whole sequence, returning when `keep_running` says so or
    /// when the server goes away
    ///
    /// An `https` report needs [App::run_with_tls].
    pub fn run<T>(
        &mut self,
        stack: &mut T,
        delay: &mut dyn FnMut(u32),
        keep_running: &mut dyn FnMut() -> bool,
    ) -> Result<RunSummary, AppError>
    where
        T: TcpFullStack + Dns + ?Sized,
    {
        self.run_with_tls(stack, None, delay, keep_running)
    }

    /// [App::run], with `tls` securing the report socket
    pub fn run_with_tls<T>(
        &mut self,
        stack: &mut T,
        tls: Option<&mut dyn TlsSetup<T::TcpSocket>>,
        delay: &mut dyn FnMut(u32),
        keep_running: &mut dyn FnMut() -> bool,
    ) -> Result<RunSummary, AppError>
    where
        T: TcpFullStack + Dns + ?Sized,
    {
        self.store
            .init()
            .map_err(|e| AppError::Storage(e.code()))?;
        info!("Configuration store ready");

        let outcome = match self.association.associate(&self.credentials) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Association failed: {}", e);
                None
            }
        };

        let mut responder: Responder = Responder::new(self.port);
        let hello = hello_route();
        responder.register_route(hello.path, hello.method, hello.handler, hello.user_ctx)?;
        let mut server = match responder.start(stack) {
            Ok(server) => Some(server),
            Err(e) => {
                error!("Error starting server: {}", e);
                None
            }
        };

        let report_status = if outcome == Some(AssociationOutcome::Connected) {
            self.report(stack, tls)
        } else {
            warn!("Not connected, skipping report");
            None
        };

        let requests_served = match server.as_mut() {
            Some(server) => self.idle_loop(stack, server, delay, keep_running),
            None => 0,
        };

        Ok(RunSummary {
            outcome,
            report_status,
            requests_served,
        })
    }

    fn report<T>(&self, stack: &mut T, tls: Option<&mut dyn TlsSetup<T::TcpSocket>>) -> Option<u16>
    where
        T: TcpFullStack + Dns + ?Sized,
    {
        let transport = match tls {
            Some(tls) => NalTransport::new(stack).with_tls(tls),
            None => NalTransport::new(stack),
        };
        let mut reporter = Reporter::<_, MAX_HTTP_OUTPUT_BUFFER>::new(transport, self.reporter);
        match reporter.report() {
            Ok(outcome) => {
                info!(
                    "Report: {}",
                    outcome.body.as_str().unwrap_or("(invalid utf-8)")
                );
                if let Some(location) = outcome.redirect {
                    info!("Report endpoint redirects to {}", location.as_str());
                }
                Some(outcome.status)
            }
            Err(e) => {
                error!("Report failed: {}", e);
                None
            }
        }
    }

    fn idle_loop<T>(
        &mut self,
        stack: &mut T,
        server: &mut ServerHandle<T::TcpSocket>,
        delay: &mut dyn FnMut(u32),
        keep_running: &mut dyn FnMut() -> bool,
    ) -> u32
    where
        T: TcpFullStack + ?Sized,
    {
        let mut since_log = self.idle.interval_ms;
        while server.is_valid() && keep_running() {
            if since_log >= self.idle.interval_ms {
                info!("Accepting requests...");
                since_log = 0;
            }
            match server.poll(stack) {
                Ok(()) | Err(nb::Error::WouldBlock) => {}
                Err(nb::Error::Other(e)) => warn!("Request failed: {}", e),
            }
            if let Err(e) = self.association.heartbeat() {
                warn!("Association heartbeat failed: {}", e);
            }
            delay(self.idle.poll_ms);
            since_log = since_log.saturating_add(self.idle.poll_ms);
        }
        if server.is_valid() {
            if let Err(e) = server.stop(stack) {
                warn!("Error stopping server: {}", e);
            }
        }
        info!("Idle loop done, served {} requests", server.served());
        server.served()
    }
}
