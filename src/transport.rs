//! Outbound HTTP transport
//!
//! [Transport::perform] runs one request to completion and reports its
//! progress to a sink as a sequence of [ClientEvent]s. The sink runs on the
//! caller's context, before `perform` returns.
//!
//! [NalTransport] is the implementation over an [embedded_nal] stack. It
//! writes one `Connection: close` request and reads the response body as
//! framed by the head: `Content-Length`, chunked transfer coding, or until
//! the peer closes. Chunk framing is stripped before the body reaches the
//! sink. Redirects are reported, never followed here.
//!
//! `https` needs a [TlsSetup] for the stack's sockets. Without one the
//! request fails before anything goes on the wire.

use core::fmt::Write;
use core::net::{IpAddr, SocketAddr};

use embedded_nal::nb::block;
use embedded_nal::{AddrType, Dns, TcpClientStack};
use heapless::{String, Vec};

use crate::config::{
    MAX_CHUNK_LINE, MAX_HTTP_RECV_BUFFER, MAX_REQUEST_HEAD, MAX_RESPONSE_HEAD,
    MAX_RESPONSE_HEADERS, USER_AGENT,
};
use crate::errors::{TransportError, TransportErrorKind};
use crate::url::{Scheme, Url};
use crate::{debug, info, trace, warn};

/// Progress of one outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClientEvent<'a> {
    Connected,
    HeaderSent,
    Header { name: &'a str, value: &'a str },
    /// A chunk of the response body
    Data(&'a [u8]),
    /// Response complete
    Finish,
    /// Connection closed, with the error that ended it, if any
    Disconnected { error: Option<TransportError> },
    /// The response is a redirect to `location`
    Redirect { location: &'a str },
}

/// Returned by a sink that cannot take more data. Aborts the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Refused;

impl From<Refused> for TransportError {
    fn from(_: Refused) -> Self {
        TransportError::new(TransportErrorKind::Aborted)
    }
}

pub type EventSink<'s> = dyn FnMut(ClientEvent<'_>) -> Result<(), Refused> + 's;

#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub url: Url<'a>,
    /// Extra request headers
    pub headers: &'a [(&'a str, &'a str)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseMeta {
    pub status: u16,
    /// `None` for chunked and close-delimited bodies
    pub content_length: Option<u64>,
}

pub trait Transport {
    fn perform(
        &mut self,
        request: &Request<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<ResponseMeta, TransportError>;
}

/// Switches a fresh socket to TLS before it connects
///
/// On a WINC style stack this sets the SSL socket option and the SNI name.
pub trait TlsSetup<S> {
    /// Enable TLS on `socket` for a server called `host`. The error is the
    /// stack's own code.
    fn enable(&mut self, socket: &mut S, host: &str) -> Result<(), i32>;
}

impl<S, F> TlsSetup<S> for F
where
    F: FnMut(&mut S, &str) -> Result<(), i32>,
{
    fn enable(&mut self, socket: &mut S, host: &str) -> Result<(), i32> {
        self(socket, host)
    }
}

pub struct NalTransport<'s, T: TcpClientStack + ?Sized> {
    stack: &'s mut T,
    tls: Option<&'s mut dyn TlsSetup<T::TcpSocket>>,
}

impl<'s, T> NalTransport<'s, T>
where
    T: TcpClientStack + Dns + ?Sized,
{
    pub fn new(stack: &'s mut T) -> Self {
        Self { stack, tls: None }
    }

    /// Allow `https` requests, using `tls` to secure each socket
    pub fn with_tls(mut self, tls: &'s mut dyn TlsSetup<T::TcpSocket>) -> Self {
        self.tls = Some(tls);
        self
    }

    fn resolve(&mut self, host: &str) -> Result<IpAddr, TransportError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        block!(self.stack.get_host_by_name(host, AddrType::IPv4))
            .map_err(|_| TransportError::new(TransportErrorKind::Dns))
    }

    fn exchange(
        &mut self,
        sock: &mut T::TcpSocket,
        remote: SocketAddr,
        request: &Request<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<ResponseMeta, TransportError> {
        if request.url.scheme == Scheme::Https {
            let tls = self
                .tls
                .as_mut()
                .ok_or(TransportError::new(TransportErrorKind::Tls))?;
            tls.enable(sock, request.url.host)
                .map_err(|code| TransportError::with_codes(TransportErrorKind::Tls, code, None))?;
            debug!("-----TLS enabled for {}-----", request.url.host);
        }
        block!(self.stack.connect(sock, remote))
            .map_err(|_| TransportError::new(TransportErrorKind::Connect))?;
        sink(ClientEvent::Connected)?;

        let head = request_head(request)?;
        let mut remaining = head.as_bytes();
        while !remaining.is_empty() {
            let sent = block!(self.stack.send(sock, remaining))
                .map_err(|_| TransportError::new(TransportErrorKind::Send))?;
            remaining = remaining.get(sent..).unwrap_or(&[]);
        }
        sink(ClientEvent::HeaderSent)?;
        debug!("-----Request sent ({} bytes)-----", head.len());

        // Receive straight into the head buffer until the head parses, so a
        // segment that carries both head and body never overruns it
        let mut head_buf = [0u8; MAX_RESPONSE_HEAD];
        let mut head_len = 0;
        let (meta, chunked, head_size) = loop {
            let free = &mut head_buf[head_len..];
            if free.is_empty() {
                return Err(TransportError::new(TransportErrorKind::HeaderTooLarge));
            }
            let received = block!(self.stack.receive(sock, free))
                .map_err(|_| TransportError::new(TransportErrorKind::Receive))?;
            if received == 0 {
                return Err(TransportError::new(TransportErrorKind::Closed));
            }
            trace!("-----Received {} bytes-----", received);
            head_len += received;

            let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
            let mut response = httparse::Response::new(&mut headers);
            match response.parse(&head_buf[..head_len]) {
                Ok(httparse::Status::Complete(size)) => {
                    let (meta, chunked) = response_meta(&response, sink)?;
                    break (meta, chunked, size);
                }
                Ok(httparse::Status::Partial) => {}
                Err(_) => return Err(TransportError::new(TransportErrorKind::Protocol)),
            }
        };

        let mut body = if chunked {
            BodyFraming::Chunked(ChunkedDecoder::new())
        } else if let Some(length) = meta.content_length {
            BodyFraming::Length { remaining: length }
        } else {
            BodyFraming::UntilClose
        };
        let mut done = body.feed(&head_buf[head_size..head_len], sink)?;

        let mut chunk = [0u8; MAX_HTTP_RECV_BUFFER];
        while !done {
            let received = block!(self.stack.receive(sock, &mut chunk))
                .map_err(|_| TransportError::new(TransportErrorKind::Receive))?;
            if received == 0 {
                if let BodyFraming::UntilClose = body {
                    break;
                }
                warn!("-----Peer closed mid body-----");
                return Err(TransportError::new(TransportErrorKind::Closed));
            }
            trace!("-----Received {} bytes-----", received);
            done = body.feed(&chunk[..received], sink)?;
        }

        sink(ClientEvent::Finish)?;
        Ok(meta)
    }
}

/// How the end of the response body is found
enum BodyFraming {
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
    UntilClose,
}

impl BodyFraming {
    /// Pass received body bytes on to the sink. Returns true once the body
    /// is complete; bytes past its end are dropped.
    fn feed(&mut self, data: &[u8], sink: &mut EventSink<'_>) -> Result<bool, TransportError> {
        match self {
            Self::Length { remaining } => {
                let take = data.len().min(usize::try_from(*remaining).unwrap_or(usize::MAX));
                if take > 0 {
                    sink(ClientEvent::Data(&data[..take]))?;
                }
                *remaining -= take as u64;
                Ok(*remaining == 0)
            }
            Self::Chunked(decoder) => decoder.feed(data, sink),
            Self::UntilClose => {
                if !data.is_empty() {
                    sink(ClientEvent::Data(data))?;
                }
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Reading a chunk size line
    Size,
    /// Bytes left in the current chunk
    Data(u64),
    /// Expecting the CRLF after chunk data
    DataEnd,
    /// After the last chunk, reading trailer lines up to the empty one
    Trailer,
    Done,
}

/// Incremental chunked transfer decoder. Size and trailer lines may be
/// split across any number of receives.
struct ChunkedDecoder {
    state: ChunkState,
    line: Vec<u8, MAX_CHUNK_LINE>,
}

impl ChunkedDecoder {
    fn new() -> Self {
        Self {
            state: ChunkState::Size,
            line: Vec::new(),
        }
    }

    fn feed(&mut self, mut data: &[u8], sink: &mut EventSink<'_>) -> Result<bool, TransportError> {
        let malformed = || TransportError::new(TransportErrorKind::Protocol);
        while let Some((&byte, rest)) = data.split_first() {
            match self.state {
                ChunkState::Data(remaining) => {
                    let take = data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    sink(ClientEvent::Data(&data[..take]))?;
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    data = &data[take..];
                    continue;
                }
                ChunkState::Done => break,
                ChunkState::Size | ChunkState::DataEnd | ChunkState::Trailer => {}
            }

            data = rest;
            self.line.push(byte).map_err(|_| malformed())?;
            if byte != b'\n' {
                continue;
            }
            let empty_line = self.line.as_slice() == b"\r\n";
            self.state = match self.state {
                ChunkState::Size => match httparse::parse_chunk_size(&self.line) {
                    Ok(httparse::Status::Complete((_, 0))) => ChunkState::Trailer,
                    Ok(httparse::Status::Complete((_, size))) => {
                        trace!("-----Chunk of {} bytes-----", size);
                        ChunkState::Data(size)
                    }
                    _ => return Err(malformed()),
                },
                ChunkState::DataEnd if empty_line => ChunkState::Size,
                ChunkState::Trailer if empty_line => ChunkState::Done,
                ChunkState::Trailer => ChunkState::Trailer,
                _ => return Err(malformed()),
            };
            self.line.clear();
        }
        Ok(self.state == ChunkState::Done)
    }
}

fn request_head(request: &Request<'_>) -> Result<String<MAX_REQUEST_HEAD>, TransportError> {
    let too_large = |_: core::fmt::Error| TransportError::new(TransportErrorKind::RequestTooLarge);
    let mut head = String::new();
    head.write_str("GET ").map_err(too_large)?;
    request.url.write_target(&mut head).map_err(too_large)?;
    write!(
        head,
        " HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n",
        request.url.host, USER_AGENT
    )
    .map_err(too_large)?;
    for (name, value) in request.headers {
        write!(head, "{}: {}\r\n", name, value).map_err(too_large)?;
    }
    head.write_str("\r\n").map_err(too_large)?;
    Ok(head)
}

/// Report the headers to the sink. Also returns whether the body is chunked.
fn response_meta(
    response: &httparse::Response<'_, '_>,
    sink: &mut EventSink<'_>,
) -> Result<(ResponseMeta, bool), TransportError> {
    let status = response
        .code
        .ok_or(TransportError::new(TransportErrorKind::Protocol))?;
    let mut content_length = None;
    let mut chunked = false;
    let mut location = None;
    for header in response.headers.iter() {
        let value = core::str::from_utf8(header.value).unwrap_or("(invalid utf-8)");
        sink(ClientEvent::Header {
            name: header.name,
            value,
        })?;
        if header.name.eq_ignore_ascii_case("Content-Length") {
            content_length = value.trim().parse::<u64>().ok();
        } else if header.name.eq_ignore_ascii_case("Transfer-Encoding") {
            chunked = value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        } else if header.name.eq_ignore_ascii_case("Location") {
            location = Some(value);
        }
    }
    if (300..400).contains(&status) {
        if let Some(location) = location {
            sink(ClientEvent::Redirect { location })?;
        }
    }
    // Transfer-Encoding wins over Content-Length
    if chunked {
        content_length = None;
    }
    Ok((
        ResponseMeta {
            status,
            content_length,
        },
        chunked,
    ))
}

impl<T> Transport for NalTransport<'_, T>
where
    T: TcpClientStack + Dns + ?Sized,
{
    fn perform(
        &mut self,
        request: &Request<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<ResponseMeta, TransportError> {
        if request.url.scheme == Scheme::Https && self.tls.is_none() {
            warn!("-----No TLS support for {}-----", request.url.host);
            let error = TransportError::new(TransportErrorKind::Tls);
            let _ = sink(ClientEvent::Disconnected { error: Some(error) });
            return Err(error);
        }
        let ip = self.resolve(request.url.host)?;
        let remote = SocketAddr::new(ip, request.url.port);
        info!(
            "-----Connecting to {}:{}-----",
            request.url.host, request.url.port
        );

        let mut sock = self
            .stack
            .socket()
            .map_err(|_| TransportError::new(TransportErrorKind::Connect))?;
        let result = self.exchange(&mut sock, remote, request, sink);
        if self.stack.close(sock).is_err() {
            debug!("-----Socket close failed-----");
        }
        // Refusal only matters while data is flowing
        let _ = sink(ClientEvent::Disconnected {
            error: result.err(),
        });
        result
    }
}
