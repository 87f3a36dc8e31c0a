//! One-shot outbound report
//!
//! The reporter issues a single GET to its configured endpoint and keeps the
//! whole body in a [ResponseBuffer] that is allocated for that call. A body
//! larger than the buffer is rejected with [ReportError::Overflow], never
//! truncated.

use arrayvec::ArrayString;

use crate::config::{MAX_HTTP_OUTPUT_BUFFER, MAX_URL_LEN, REDIRECT_HEADERS, REPORT_URL};
use crate::errors::ReportError;
use crate::transport::{ClientEvent, Refused, Request, Transport};
use crate::url::Url;
use crate::{debug, error, info, warn};

pub type Location = ArrayString<MAX_URL_LEN>;

/// What to do when the endpoint answers with a redirect
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    /// Log the target and return it with the outcome
    #[default]
    Observe,
    /// Re-issue the request to the target with the redirect headers attached
    Follow { max_hops: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig<'a> {
    pub url: &'a str,
    pub redirect_policy: RedirectPolicy,
}

impl Default for ReporterConfig<'static> {
    fn default() -> Self {
        Self {
            url: REPORT_URL,
            redirect_policy: RedirectPolicy::Observe,
        }
    }
}

/// Capacity checked response body
///
/// The body is length-terminated: [ResponseBuffer::terminate] marks the end
/// of the response and [ResponseBuffer::as_bytes] returns exactly the bytes
/// received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBuffer<const N: usize> {
    bytes: heapless::Vec<u8, N>,
    overflowed: bool,
    terminated: bool,
}

impl<const N: usize> Default for ResponseBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ResponseBuffer<N> {
    pub const fn new() -> Self {
        Self {
            bytes: heapless::Vec::new(),
            overflowed: false,
            terminated: false,
        }
    }

    /// Append a chunk. Nothing is copied when it does not fit, and the
    /// buffer stays marked as overflowed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), Refused> {
        if self.overflowed || self.bytes.extend_from_slice(chunk).is_err() {
            self.overflowed = true;
            return Err(Refused);
        }
        Ok(())
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Result<&str, core::str::Utf8Error> {
        core::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome<const N: usize> {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: ResponseBuffer<N>,
    /// Redirect target that was observed and not followed
    pub redirect: Option<Location>,
}

pub struct Reporter<'a, T, const N: usize = MAX_HTTP_OUTPUT_BUFFER> {
    transport: T,
    config: ReporterConfig<'a>,
}

impl<'a, T: Transport, const N: usize> Reporter<'a, T, N> {
    pub fn new(transport: T, config: ReporterConfig<'a>) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the request once, following redirects only if the policy says so
    pub fn report(&mut self) -> Result<ReportOutcome<N>, ReportError> {
        let mut target = Location::new();
        target
            .try_push_str(self.config.url)
            .map_err(|_| ReportError::InvalidUrl(crate::errors::UrlError::TooLong))?;
        let mut extra_headers: &[(&str, &str)] = &[];
        let mut hops = 0;

        loop {
            let url = Url::parse(&target)?;
            info!("HTTP request with url => {}", target.as_str());
            let outcome = self.perform(url, extra_headers)?;

            let location = match (outcome.redirect, self.config.redirect_policy) {
                (Some(location), RedirectPolicy::Follow { max_hops }) => {
                    if hops >= max_hops {
                        warn!("Redirect limit of {} reached", max_hops);
                        return Err(ReportError::TooManyRedirects);
                    }
                    location
                }
                _ => return Ok(outcome),
            };
            hops += 1;
            let next: Location = url.resolve(&location)?;
            info!("Following redirect {} to {}", hops, next.as_str());
            target = next;
            extra_headers = REDIRECT_HEADERS;
        }
    }

    fn perform(
        &mut self,
        url: Url<'_>,
        headers: &[(&str, &str)],
    ) -> Result<ReportOutcome<N>, ReportError> {
        let mut body = ResponseBuffer::<N>::new();
        let mut redirect: Option<Location> = None;

        let mut sink = |event: ClientEvent<'_>| -> Result<(), Refused> {
            match event {
                ClientEvent::Connected => debug!("HTTP client connected"),
                ClientEvent::HeaderSent => debug!("HTTP request header sent"),
                ClientEvent::Header { name, value } => {
                    debug!("HTTP header, key={}, value={}", name, value)
                }
                ClientEvent::Data(chunk) => {
                    info!("HTTP data, len={}", chunk.len());
                    if body.push(chunk).is_err() {
                        error!(
                            "Response body exceeds {} bytes, rejecting",
                            body.capacity()
                        );
                        return Err(Refused);
                    }
                }
                ClientEvent::Finish => {
                    debug!("HTTP finished");
                    body.terminate();
                }
                ClientEvent::Disconnected { error } => {
                    info!("HTTP disconnected");
                    if let Some(error) = error {
                        if let Some(code) = error.code {
                            info!("Last error code: 0x{:x}", code);
                        }
                        if let Some(tls_code) = error.tls_code {
                            info!("Last TLS failure: 0x{:x}", tls_code);
                        }
                    }
                    body.terminate();
                }
                ClientEvent::Redirect { location } => {
                    info!("HTTP redirect to {}", location);
                    redirect = Location::from(location).ok();
                    if redirect.is_none() {
                        warn!("Redirect target too long, ignoring");
                    }
                }
            }
            Ok(())
        };

        let request = Request { url, headers };
        let result = self.transport.perform(&request, &mut sink);

        if body.overflowed() {
            return Err(ReportError::Overflow { capacity: N });
        }
        let meta = match result {
            Ok(meta) => meta,
            Err(err) => {
                error!("HTTP GET request failed: {}", err);
                return Err(err.into());
            }
        };
        body.terminate();
        info!(
            "HTTP GET Status = {}, content_length = {:?}",
            meta.status, meta.content_length
        );
        Ok(ReportOutcome {
            status: meta.status,
            content_length: meta.content_length,
            body,
            redirect,
        })
    }
}
