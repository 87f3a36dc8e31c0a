//! Mock radio, network stack, transport and SPI device for unit tests

use core::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::collections::{HashMap, VecDeque};
use std::string::String;
use std::vec::Vec;

use embedded_nal::nb;
use embedded_nal::{AddrType, Dns, TcpClientStack, TcpErrorKind, TcpFullStack};
use heapless::spsc::Producer;

use crate::association::{deliver, Credentials, LinkEvent, Radio};
use crate::errors::{ErrorCode, TransportError};
use crate::transport::{ClientEvent, EventSink, Request, ResponseMeta, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedError(pub i32);

impl ErrorCode for ScriptedError {
    fn code(&self) -> i32 {
        self.0
    }
}

/// Radio that fails the first `joins_before_success` join attempts
pub struct ScriptedRadio<'q, const N: usize> {
    events: Producer<'q, LinkEvent, N>,
    joins_before_success: Option<u32>,
    silent: bool,
    attempts: u32,
    pub start_calls: u32,
    pub connect_calls: u32,
    pub fail_start: Option<i32>,
}

impl<'q, const N: usize> ScriptedRadio<'q, N> {
    /// `None` never gets an address
    pub fn new(events: Producer<'q, LinkEvent, N>, joins_before_success: Option<u32>) -> Self {
        Self {
            events,
            joins_before_success,
            silent: false,
            attempts: 0,
            start_calls: 0,
            connect_calls: 0,
            fail_start: None,
        }
    }

    /// Radio that accepts every call and never reports anything
    pub fn silent(events: Producer<'q, LinkEvent, N>) -> Self {
        Self {
            silent: true,
            ..Self::new(events, None)
        }
    }

    pub fn drop_link(&mut self) {
        deliver(&mut self.events, LinkEvent::Disconnected { reason: 8 });
    }
}

impl<const N: usize> Radio for ScriptedRadio<'_, N> {
    type Error = ScriptedError;

    fn start(&mut self, _credentials: &Credentials) -> Result<(), Self::Error> {
        if let Some(code) = self.fail_start {
            return Err(ScriptedError(code));
        }
        self.start_calls += 1;
        if !self.silent {
            deliver(&mut self.events, LinkEvent::StationStarted);
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<(), Self::Error> {
        self.connect_calls += 1;
        if self.silent {
            return Ok(());
        }
        self.attempts += 1;
        let event = match self.joins_before_success {
            Some(failures) if self.attempts > failures => LinkEvent::GotIp {
                address: Ipv4Addr::new(192, 168, 1, 20),
            },
            _ => LinkEvent::Disconnected { reason: 201 },
        };
        deliver(&mut self.events, event);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockStackError;

impl embedded_nal::TcpError for MockStackError {
    fn kind(&self) -> TcpErrorKind {
        TcpErrorKind::Other
    }
}

enum MockSocket {
    Fresh,
    Client,
    Listener,
    /// Accepted connection: remaining request bytes, response slot
    Accepted(Vec<u8>, usize),
}

/// TCP and DNS stack with one scripted outbound response and a queue of
/// inbound requests
pub struct MockStack {
    sockets: HashMap<usize, MockSocket>,
    next_socket: usize,
    client_response: Vec<u8>,
    client_chunk: usize,
    client_pos: usize,
    pending_requests: VecDeque<Vec<u8>>,
    pub client_sent: Vec<u8>,
    pub server_sent: Vec<Vec<u8>>,
    pub connected_to: Option<SocketAddr>,
    pub bound_port: Option<u16>,
    pub resolved_names: usize,
    pub closed: usize,
    pub refuse_connect: bool,
    pub fail_bind: bool,
    /// Bytes an accepted connection hands out per receive
    pub server_chunk: usize,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            next_socket: 0,
            client_response: Vec::new(),
            client_chunk: 1,
            client_pos: 0,
            pending_requests: VecDeque::new(),
            client_sent: Vec::new(),
            server_sent: Vec::new(),
            connected_to: None,
            bound_port: None,
            resolved_names: 0,
            closed: 0,
            refuse_connect: false,
            fail_bind: false,
            server_chunk: usize::MAX,
        }
    }

    /// Response for the next outbound connection, delivered `chunk` bytes
    /// per receive
    pub fn set_client_response(&mut self, response: &[u8], chunk: usize) {
        self.client_response = response.to_vec();
        self.client_chunk = chunk.max(1);
        self.client_pos = 0;
    }

    /// Queue an inbound connection that sends `request`
    pub fn push_request(&mut self, request: &[u8]) {
        self.pending_requests.push_back(request.to_vec());
    }

    fn new_socket(&mut self, kind: MockSocket) -> usize {
        let id = self.next_socket;
        self.next_socket += 1;
        self.sockets.insert(id, kind);
        id
    }
}

impl TcpClientStack for MockStack {
    type TcpSocket = usize;
    type Error = MockStackError;

    fn socket(&mut self) -> Result<Self::TcpSocket, Self::Error> {
        Ok(self.new_socket(MockSocket::Fresh))
    }

    fn connect(
        &mut self,
        socket: &mut Self::TcpSocket,
        remote: SocketAddr,
    ) -> nb::Result<(), Self::Error> {
        if self.refuse_connect {
            return Err(nb::Error::Other(MockStackError));
        }
        self.connected_to = Some(remote);
        self.sockets.insert(*socket, MockSocket::Client);
        Ok(())
    }

    fn send(&mut self, socket: &mut Self::TcpSocket, buffer: &[u8]) -> nb::Result<usize, Self::Error> {
        match self.sockets.get(socket) {
            Some(MockSocket::Client) => self.client_sent.extend_from_slice(buffer),
            Some(MockSocket::Accepted(_, slot)) => {
                let slot = *slot;
                self.server_sent[slot].extend_from_slice(buffer)
            }
            _ => return Err(nb::Error::Other(MockStackError)),
        }
        Ok(buffer.len())
    }

    fn receive(
        &mut self,
        socket: &mut Self::TcpSocket,
        buffer: &mut [u8],
    ) -> nb::Result<usize, Self::Error> {
        match self.sockets.get_mut(socket) {
            Some(MockSocket::Client) => {
                let remaining = &self.client_response[self.client_pos..];
                let len = remaining.len().min(self.client_chunk).min(buffer.len());
                buffer[..len].copy_from_slice(&remaining[..len]);
                self.client_pos += len;
                Ok(len)
            }
            Some(MockSocket::Accepted(request, _)) => {
                let len = request.len().min(buffer.len()).min(self.server_chunk.max(1));
                buffer[..len].copy_from_slice(&request[..len]);
                request.drain(..len);
                Ok(len)
            }
            _ => Err(nb::Error::Other(MockStackError)),
        }
    }

    fn close(&mut self, socket: Self::TcpSocket) -> Result<(), Self::Error> {
        self.sockets
            .remove(&socket)
            .ok_or(MockStackError)
            .map(|_| self.closed += 1)
    }
}

impl TcpFullStack for MockStack {
    fn bind(&mut self, socket: &mut Self::TcpSocket, local_port: u16) -> Result<(), Self::Error> {
        if self.fail_bind {
            return Err(MockStackError);
        }
        self.bound_port = Some(local_port);
        self.sockets.insert(*socket, MockSocket::Listener);
        Ok(())
    }

    fn listen(&mut self, socket: &mut Self::TcpSocket) -> Result<(), Self::Error> {
        match self.sockets.get(socket) {
            Some(MockSocket::Listener) => Ok(()),
            _ => Err(MockStackError),
        }
    }

    fn accept(
        &mut self,
        socket: &mut Self::TcpSocket,
    ) -> nb::Result<(Self::TcpSocket, SocketAddr), Self::Error> {
        if !matches!(self.sockets.get(socket), Some(MockSocket::Listener)) {
            return Err(nb::Error::Other(MockStackError));
        }
        let request = self.pending_requests.pop_front().ok_or(nb::Error::WouldBlock)?;
        self.server_sent.push(Vec::new());
        let slot = self.server_sent.len() - 1;
        let client = self.new_socket(MockSocket::Accepted(request, slot));
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)), 50_000);
        Ok((client, remote))
    }
}

impl Dns for MockStack {
    type Error = MockStackError;

    fn get_host_by_name(
        &mut self,
        _hostname: &str,
        _addr_type: AddrType,
    ) -> nb::Result<IpAddr, Self::Error> {
        self.resolved_names += 1;
        Ok(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)))
    }

    fn get_host_by_address(
        &mut self,
        _addr: IpAddr,
        _result: &mut [u8],
    ) -> nb::Result<usize, Self::Error> {
        Err(nb::Error::Other(MockStackError))
    }
}

/// Transport answering every request with one scripted response
pub struct MockTransport {
    status: u16,
    body: Vec<u8>,
    chunk: usize,
    pub redirect: Option<&'static str>,
    /// Redirect on every request, not only the first one
    pub redirect_always: bool,
    pub fail: Option<TransportError>,
    /// Host and path of each request, with the number of extra headers
    pub requests: Vec<(String, usize)>,
    pub aborted: bool,
}

impl MockTransport {
    pub fn new(status: u16, body: &[u8], chunk: usize) -> Self {
        Self {
            status,
            body: body.to_vec(),
            chunk: chunk.max(1),
            redirect: None,
            redirect_always: false,
            fail: None,
            requests: Vec::new(),
            aborted: false,
        }
    }

    fn serve(&mut self, sink: &mut EventSink<'_>, redirect: bool) -> Result<ResponseMeta, TransportError> {
        sink(ClientEvent::Connected)?;
        sink(ClientEvent::HeaderSent)?;
        if let Some(failure) = self.fail {
            return Err(failure);
        }
        if let (true, Some(location)) = (redirect, self.redirect) {
            let status = if (300..400).contains(&self.status) {
                self.status
            } else {
                302
            };
            sink(ClientEvent::Header {
                name: "Location",
                value: location,
            })?;
            sink(ClientEvent::Redirect { location })?;
            sink(ClientEvent::Finish)?;
            return Ok(ResponseMeta {
                status,
                content_length: Some(0),
            });
        }
        for chunk in self.body.chunks(self.chunk) {
            if let Err(refused) = sink(ClientEvent::Data(chunk)) {
                self.aborted = true;
                return Err(refused.into());
            }
        }
        sink(ClientEvent::Finish)?;
        Ok(ResponseMeta {
            status: self.status,
            content_length: Some(self.body.len() as u64),
        })
    }
}

impl Transport for MockTransport {
    fn perform(
        &mut self,
        request: &Request<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<ResponseMeta, TransportError> {
        let mut target = String::from(request.url.host);
        target.push_str(request.url.path());
        let redirect = self.redirect_always || self.requests.is_empty();
        self.requests.push((target, request.headers.len()));

        let result = self.serve(sink, redirect);
        let _ = sink(ClientEvent::Disconnected {
            error: result.err(),
        });
        result
    }
}

/// SPI device that echoes every written byte
#[derive(Debug, Default)]
pub struct LoopbackSpi {
    pub sent: Vec<u8>,
    pub fail: bool,
}

impl embedded_hal::spi::ErrorType for LoopbackSpi {
    type Error = embedded_hal::spi::ErrorKind;
}

impl embedded_hal::spi::SpiDevice for LoopbackSpi {
    fn transaction(
        &mut self,
        operations: &mut [embedded_hal::spi::Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        use embedded_hal::spi::Operation;
        if self.fail {
            return Err(embedded_hal::spi::ErrorKind::Other);
        }
        for operation in operations {
            match operation {
                Operation::Transfer(read, write) => {
                    self.sent.extend_from_slice(write);
                    let len = read.len().min(write.len());
                    read[..len].copy_from_slice(&write[..len]);
                }
                Operation::Write(write) => self.sent.extend_from_slice(write),
                Operation::TransferInPlace(words) => self.sent.extend_from_slice(words),
                Operation::Read(_) | Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}
