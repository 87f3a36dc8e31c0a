//! Inbound HTTP responder
//!
//! Routes are registered once, before [Responder::start]. The running server
//! is a [ServerHandle] that serves one connection per [ServerHandle::poll]
//! and never blocks waiting for a client.
//!
//! Request handling itself is [RouteTable::dispatch], which turns the raw
//! request bytes into response bytes and does no I/O.

use core::fmt::Write;
use core::net::SocketAddr;

use embedded_nal::nb::{self, block};
use embedded_nal::TcpFullStack;
use heapless::{String, Vec};

use crate::config::{
    HELLO_BODY, HELLO_PATH, HELLO_QUERY_KEY, HOST_HEADER_MAX, MAX_CUSTOM_HEADERS,
    MAX_REQUEST_HEADERS, MAX_ROUTES, QUERY_VALUE_MAX, REQUEST_BUFFER_LEN, SEND_BUFFER_LEN,
};
use crate::errors::{HandlerError, QueryError, ResponderError, RouteError};
use crate::uri::{percent_decode, query_key_value};
use crate::SocketAddrWrap;
use crate::{debug, error, info, trace, warn};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl Method {
    pub fn parse(method: &str) -> Option<Self> {
        Some(match method {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "OPTIONS" => Self::Options,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }
}

#[allow(dead_code)]
#[derive(Debug)]
struct WrapError(httparse::Error);

#[cfg(feature = "defmt")]
impl defmt::Format for WrapError {
    fn format(&self, fmt: defmt::Formatter) {
        match self.0 {
            httparse::Error::HeaderName => defmt::write!(fmt, "HeaderName"),
            httparse::Error::HeaderValue => defmt::write!(fmt, "HeaderValue"),
            httparse::Error::NewLine => defmt::write!(fmt, "NewLine"),
            httparse::Error::Status => defmt::write!(fmt, "Status"),
            httparse::Error::Token => defmt::write!(fmt, "Token"),
            httparse::Error::TooManyHeaders => defmt::write!(fmt, "TooManyHeaders"),
            httparse::Error::Version => defmt::write!(fmt, "Version"),
        }
    }
}

/// A parsed inbound request, borrowed from the receive buffer
pub struct Request<'r> {
    pub method: Method,
    pub path: &'r str,
    pub query: Option<&'r str>,
    headers: &'r [httparse::Header<'r>],
    pub body: &'r [u8],
}

impl<'r> Request<'r> {
    /// Value of the first header called `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&'r [u8]> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value)
    }

    pub fn header_len(&self, name: &str) -> Option<usize> {
        self.header(name).map(<[u8]>::len)
    }

    /// Copy a header value into a buffer of capacity `N`
    ///
    /// The copy needs as many bytes as the header reports. A value that
    /// does not fit is an allocation failure, not a truncation.
    pub fn header_str<const N: usize>(&self, name: &str) -> Result<Option<String<N>>, HandlerError> {
        let Some(value) = self.header(name) else {
            return Ok(None);
        };
        let bytes = Vec::<u8, N>::from_slice(value).map_err(|_| HandlerError::NoMemory)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| HandlerError::InvalidHeader)
    }
}

pub struct Response {
    pub status: u16,
    pub body: &'static str,
    headers: Vec<(&'static str, &'static str), MAX_CUSTOM_HEADERS>,
}

impl Response {
    pub fn ok(body: &'static str) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    pub fn set_header(
        &mut self,
        name: &'static str,
        value: &'static str,
    ) -> Result<(), HandlerError> {
        self.headers
            .push((name, value))
            .map_err(|_| HandlerError::HeaderCapacity)
    }

    pub fn headers(&self) -> &[(&'static str, &'static str)] {
        &self.headers
    }
}

/// Route handler. The second argument is the route's user context.
pub type Handler = fn(&Request<'_>, &'static str) -> Result<Response, HandlerError>;

#[derive(Clone, Copy)]
pub struct Route {
    pub path: &'static str,
    pub method: Method,
    pub handler: Handler,
    pub user_ctx: &'static str,
}

enum Lookup<'t> {
    Found(&'t Route),
    MethodNotAllowed,
    NotFound,
}

pub struct RouteTable<const N: usize = MAX_ROUTES> {
    routes: Vec<Route, N>,
}

impl<const N: usize> Default for RouteTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RouteTable<N> {
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn register(&mut self, route: Route) -> Result<(), RouteError> {
        if self
            .routes
            .iter()
            .any(|r| r.path == route.path && r.method == route.method)
        {
            return Err(RouteError::Duplicate);
        }
        self.routes.push(route).map_err(|_| RouteError::TableFull)?;
        info!(
            "Registering URI handler: {} {}",
            route.method.as_str(),
            route.path
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn lookup(&self, path: &str, method: Method) -> Lookup<'_> {
        let mut path_known = false;
        for route in self.routes.iter().filter(|r| r.path == path) {
            if route.method == method {
                return Lookup::Found(route);
            }
            path_known = true;
        }
        if path_known {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }

    /// Handle one raw request and write the full response into `out`
    ///
    /// # Returns
    ///
    /// * `usize` - Length of the response in `out`.
    /// * `ResponderError::ResponseTooLarge` - `out` cannot hold the response.
    pub fn dispatch(&self, raw: &[u8], out: &mut [u8]) -> Result<usize, ResponderError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let size = match req.parse(raw) {
            Ok(httparse::Status::Complete(size)) => size,
            Ok(httparse::Status::Partial) => {
                error!("-----Request parsed, but not complete-----");
                return write_response(out, &Response::with_status(400, "Bad Request"), true);
            }
            Err(e) => {
                error!("-----Error parsing request: {:?}-----", WrapError(e));
                return write_response(out, &Response::with_status(400, "Bad Request"), true);
            }
        };
        debug!("-----Request parsed----- {} bytes", size);

        let Some(method) = req.method.and_then(Method::parse) else {
            return write_response(out, &Response::with_status(405, "Method Not Allowed"), true);
        };
        let target = req.path.unwrap_or("/");
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        debug!(" method: {} path: {}", method.as_str(), path);
        for header in req.headers.iter() {
            trace!(" header: {}", header.name);
        }

        let route = match self.lookup(path, method) {
            Lookup::Found(route) => route,
            Lookup::MethodNotAllowed => {
                warn!("-----{} not allowed on {}-----", method.as_str(), path);
                return write_response(
                    out,
                    &Response::with_status(405, "Method Not Allowed"),
                    true,
                );
            }
            Lookup::NotFound => {
                warn!("-----No handler for {}-----", path);
                return write_response(out, &Response::with_status(404, "Not Found"), true);
            }
        };

        let request = Request {
            method,
            path,
            query,
            headers: req.headers,
            body: &raw[size..],
        };
        match (route.handler)(&request, route.user_ctx) {
            Ok(response) => write_response(out, &response, method != Method::Head),
            Err(e) => {
                error!("-----Handler for {} failed: {}-----", path, e);
                write_response(
                    out,
                    &Response::with_status(500, "Internal Server Error"),
                    true,
                )
            }
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

struct SliceWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl SliceWriter<'_> {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ResponderError> {
        let end = self.len + bytes.len();
        let dest = self
            .buf
            .get_mut(self.len..end)
            .ok_or(ResponderError::ResponseTooLarge)?;
        dest.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

impl Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| core::fmt::Error)
    }
}

fn write_response(
    out: &mut [u8],
    response: &Response,
    with_body: bool,
) -> Result<usize, ResponderError> {
    let too_large = |_: core::fmt::Error| ResponderError::ResponseTooLarge;
    let mut writer = SliceWriter { buf: out, len: 0 };
    write!(
        writer,
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    )
    .map_err(too_large)?;
    for (name, value) in response.headers() {
        write!(writer, "{}: {}\r\n", name, value).map_err(too_large)?;
    }
    writer.write_str("Connection: close\r\n\r\n").map_err(too_large)?;
    if with_body {
        writer.write_bytes(response.body.as_bytes())?;
    }
    Ok(writer.len)
}

/// Look up `key` in `query` and percent-decode its value
pub fn decoded_query_param(
    query: &str,
    key: &str,
) -> Result<String<QUERY_VALUE_MAX>, QueryError> {
    let raw: String<QUERY_VALUE_MAX> = query_key_value(query, key)?;
    percent_decode(&raw)
}

/// `GET /hello`: logs the Host header and the decoded `query1` parameter,
/// answers with the route context and one custom header.
pub fn hello_get_handler(
    req: &Request<'_>,
    user_ctx: &'static str,
) -> Result<Response, HandlerError> {
    match req.header_str::<HOST_HEADER_MAX>("Host") {
        Ok(Some(host)) => info!("Found header => Host: {}", host.as_str()),
        Ok(None) => {}
        Err(HandlerError::InvalidHeader) => warn!(
            "Host header is not UTF-8 ({} bytes)",
            req.header_len("Host").unwrap_or(0)
        ),
        Err(e) => return Err(e),
    }

    if let Some(query) = req.query.filter(|q| !q.is_empty()) {
        info!("Found URL query => {}", query);
        match decoded_query_param(query, HELLO_QUERY_KEY) {
            Ok(value) => info!(
                "Decoded query parameter => {}={}",
                HELLO_QUERY_KEY,
                value.as_str()
            ),
            Err(QueryError::NotFound) => {}
            Err(e) => warn!("Query parameter {}: {}", HELLO_QUERY_KEY, e),
        }
    }

    let mut response = Response::ok(user_ctx);
    response.set_header("Custom-Header-1", "Custom-Value-1")?;
    Ok(response)
}

pub fn hello_route() -> Route {
    Route {
        path: HELLO_PATH,
        method: Method::Get,
        handler: hello_get_handler,
        user_ctx: HELLO_BODY,
    }
}

/// Server configuration: the port and the routes to serve
pub struct Responder<const N: usize = MAX_ROUTES> {
    port: u16,
    routes: RouteTable<N>,
}

impl<const N: usize> Responder<N> {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            routes: RouteTable::new(),
        }
    }

    pub fn register_route(
        &mut self,
        path: &'static str,
        method: Method,
        handler: Handler,
        user_ctx: &'static str,
    ) -> Result<(), RouteError> {
        self.routes.register(Route {
            path,
            method,
            handler,
            user_ctx,
        })
    }

    /// Bind and listen on the configured port
    pub fn start<T>(self, stack: &mut T) -> Result<ServerHandle<T::TcpSocket, N>, ResponderError>
    where
        T: TcpFullStack + ?Sized,
    {
        info!("Starting server on port: '{}'", self.port);
        let mut sock = stack.socket().map_err(|_| ResponderError::Socket)?;
        debug!("-----Binding to TCP port {}-----", self.port);
        if stack.bind(&mut sock, self.port).is_err() {
            let _ = stack.close(sock);
            return Err(ResponderError::Bind);
        }
        info!("-----Bound to TCP port {}-----", self.port);
        if stack.listen(&mut sock).is_err() {
            let _ = stack.close(sock);
            return Err(ResponderError::Listen);
        }
        info!("-----Listening-----");
        Ok(ServerHandle {
            socket: Some(sock),
            routes: self.routes,
            port: self.port,
            served: 0,
        })
    }
}

/// A started server
pub struct ServerHandle<S, const N: usize = MAX_ROUTES> {
    socket: Option<S>,
    routes: RouteTable<N>,
    port: u16,
    served: u32,
}

impl<S, const N: usize> ServerHandle<S, N> {
    /// Whether the listening socket is still open
    pub fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Requests answered so far
    pub fn served(&self) -> u32 {
        self.served
    }

    pub fn routes(&self) -> &RouteTable<N> {
        &self.routes
    }

    /// Serve one pending connection, if there is one
    ///
    /// # Returns
    ///
    /// * `()` - A connection was accepted, answered and closed.
    /// * `nb::Error::WouldBlock` - No client is waiting.
    /// * `ResponderError` - The server is stopped or the connection failed.
    pub fn poll<T>(&mut self, stack: &mut T) -> nb::Result<(), ResponderError>
    where
        T: TcpFullStack<TcpSocket = S> + ?Sized,
    {
        let sock = self
            .socket
            .as_mut()
            .ok_or(nb::Error::Other(ResponderError::Stopped))?;
        let (mut client, addr) = match stack.accept(sock) {
            Ok(accepted) => accepted,
            Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(_)) => return Err(nb::Error::Other(ResponderError::Accept)),
        };
        info!(
            "-----Accepted connection from {}-----",
            SocketAddrWrap::new(&addr)
        );
        let result = serve(stack, &mut client, addr, &self.routes);
        let closed = stack.close(client);
        result?;
        closed.map_err(|_| ResponderError::Close)?;
        self.served += 1;
        Ok(())
    }

    /// Close the listening socket
    pub fn stop<T>(&mut self, stack: &mut T) -> Result<(), ResponderError>
    where
        T: TcpFullStack<TcpSocket = S> + ?Sized,
    {
        let sock = self.socket.take().ok_or(ResponderError::Stopped)?;
        info!("-----Stopping server on port {}-----", self.port);
        stack.close(sock).map_err(|_| ResponderError::Close)
    }
}

fn serve<T, const N: usize>(
    stack: &mut T,
    client: &mut T::TcpSocket,
    addr: SocketAddr,
    routes: &RouteTable<N>,
) -> Result<(), ResponderError>
where
    T: TcpFullStack + ?Sized,
{
    let mut buf = [0; REQUEST_BUFFER_LEN];
    let mut received_len = 0;
    // Read until the head is complete, the buffer is full or the client
    // stops sending. Anything short of a full head gets a 400 from dispatch.
    while received_len < buf.len() {
        let received = block!(stack.receive(client, &mut buf[received_len..]))
            .map_err(|_| ResponderError::Receive)?;
        if received == 0 {
            break;
        }
        received_len += received;
        let mut headers = [httparse::EMPTY_HEADER; MAX_REQUEST_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf[..received_len]) {
            Ok(httparse::Status::Partial) => {
                trace!("-----Partial request, {} bytes-----", received_len)
            }
            Ok(httparse::Status::Complete(_)) | Err(_) => break,
        }
    }
    if received_len == 0 {
        debug!("-----Client closed before sending-----");
        return Ok(());
    }
    info!(
        "-----Received {} bytes from {}-----",
        received_len,
        SocketAddrWrap::new(&addr)
    );

    let mut send_buffer = [0; SEND_BUFFER_LEN];
    let len = routes.dispatch(&buf[..received_len], &mut send_buffer)?;
    let mut remaining = &send_buffer[..len];
    while !remaining.is_empty() {
        let sent = block!(stack.send(client, remaining)).map_err(|_| ResponderError::Send)?;
        remaining = remaining.get(sent..).unwrap_or(&[]);
    }
    debug!("-----Sent {} bytes-----", len);
    Ok(())
}
