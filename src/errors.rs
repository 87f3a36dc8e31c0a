use core::fmt;

/// Numeric code of a driver level error
///
/// Radios and configuration stores report failures through their own
/// error types. The loop only keeps the code, for logging and for
/// carrying it up to the caller.
pub trait ErrorCode {
    fn code(&self) -> i32;
}

impl ErrorCode for core::convert::Infallible {
    fn code(&self) -> i32 {
        match *self {}
    }
}

/// Rejected station credentials
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsError {
    /// SSID is empty or longer than 32 bytes
    InvalidSsid,
    /// Passphrase is not empty and not 8..=63 bytes
    InvalidPassphrase,
}

/// Association manager errors
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationError {
    /// The radio driver failed, with its error code
    Radio(i32),
    /// Neither connected nor failed before the association deadline
    Timeout,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlError {
    MissingScheme,
    UnsupportedScheme,
    EmptyHost,
    InvalidPort,
    TooLong,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Host name lookup failed
    Dns,
    Connect,
    Send,
    Receive,
    /// TLS session setup or record layer failure
    Tls,
    /// Malformed status line or headers
    Protocol,
    /// Response headers did not fit the header buffer
    HeaderTooLarge,
    /// The request could not be framed
    RequestTooLarge,
    /// Peer closed before the response was complete
    Closed,
    /// The event sink refused the data
    Aborted,
}

/// Transport failure with the low level codes captured at the time
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// Last error code of the network stack, if it reports one
    pub code: Option<i32>,
    /// Last TLS library failure, if it reports one
    pub tls_code: Option<i32>,
}

impl TransportError {
    pub const fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            code: None,
            tls_code: None,
        }
    }

    pub const fn with_codes(kind: TransportErrorKind, code: i32, tls_code: Option<i32>) -> Self {
        Self {
            kind,
            code: Some(code),
            tls_code,
        }
    }
}

impl From<TransportErrorKind> for TransportError {
    fn from(kind: TransportErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Outbound report errors
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    InvalidUrl(UrlError),
    Transport(TransportError),
    /// Response body exceeded the buffer capacity
    Overflow { capacity: usize },
    /// Redirect hop limit reached
    TooManyRedirects,
}

impl From<UrlError> for ReportError {
    fn from(inner: UrlError) -> Self {
        Self::InvalidUrl(inner)
    }
}

impl From<TransportError> for ReportError {
    fn from(inner: TransportError) -> Self {
        Self::Transport(inner)
    }
}

/// Query string lookup errors
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    NotFound,
    /// Value does not fit the destination
    TooLong,
    /// Decoded bytes are not UTF-8
    InvalidUtf8,
}

/// Route handler failures. Any of them turns into a 500 response.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// A bounded buffer could not hold the request data
    NoMemory,
    /// A request header value is not UTF-8
    InvalidHeader,
    /// Too many response headers
    HeaderCapacity,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    /// Same path and method registered twice
    Duplicate,
    TableFull,
}

/// HTTP server errors
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderError {
    Socket,
    Bind,
    Listen,
    Accept,
    Receive,
    Send,
    Close,
    /// Server handle was already stopped
    Stopped,
    /// Serialized response does not fit the send buffer
    ResponseTooLarge,
}

/// Startup errors that abort the main loop
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    /// Configuration store init failed, with its error code
    Storage(i32),
    Route(RouteError),
}

impl From<RouteError> for AppError {
    fn from(inner: RouteError) -> Self {
        Self::Route(inner)
    }
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID must be 1 to 32 bytes"),
            Self::InvalidPassphrase => write!(f, "Passphrase must be empty or 8 to 63 bytes"),
        }
    }
}

impl fmt::Display for AssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio(code) => write!(f, "Radio error: 0x{:x}", code),
            Self::Timeout => write!(f, "Association timed out"),
        }
    }
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingScheme => write!(f, "Missing scheme"),
            Self::UnsupportedScheme => write!(f, "Unsupported scheme"),
            Self::EmptyHost => write!(f, "Empty host"),
            Self::InvalidPort => write!(f, "Invalid port"),
            Self::TooLong => write!(f, "URL too long"),
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS lookup failed"),
            Self::Connect => write!(f, "Connect failed"),
            Self::Send => write!(f, "Send failed"),
            Self::Receive => write!(f, "Receive failed"),
            Self::Tls => write!(f, "TLS failure"),
            Self::Protocol => write!(f, "Malformed response"),
            Self::HeaderTooLarge => write!(f, "Response header too large"),
            Self::RequestTooLarge => write!(f, "Request too large"),
            Self::Closed => write!(f, "Connection closed early"),
            Self::Aborted => write!(f, "Transfer aborted"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = self.code {
            write!(f, " (code 0x{:x})", code)?;
        }
        if let Some(tls_code) = self.tls_code {
            write!(f, " (tls 0x{:x})", tls_code)?;
        }
        Ok(())
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(err) => write!(f, "Invalid URL: {}", err),
            Self::Transport(err) => write!(f, "Transport error: {}", err),
            Self::Overflow { capacity } => {
                write!(f, "Response body exceeds {} bytes", capacity)
            }
            Self::TooManyRedirects => write!(f, "Too many redirects"),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Key not found"),
            Self::TooLong => write!(f, "Value too long"),
            Self::InvalidUtf8 => write!(f, "Value is not UTF-8"),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory => write!(f, "Buffer alloc failed"),
            Self::InvalidHeader => write!(f, "Header value is not UTF-8"),
            Self::HeaderCapacity => write!(f, "Too many response headers"),
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "Route already registered"),
            Self::TableFull => write!(f, "Route table full"),
        }
    }
}

impl fmt::Display for ResponderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket => write!(f, "Socket creation failed"),
            Self::Bind => write!(f, "Bind failed"),
            Self::Listen => write!(f, "Listen failed"),
            Self::Accept => write!(f, "Accept failed"),
            Self::Receive => write!(f, "Receive failed"),
            Self::Send => write!(f, "Send failed"),
            Self::Close => write!(f, "Close failed"),
            Self::Stopped => write!(f, "Server stopped"),
            Self::ResponseTooLarge => write!(f, "Response too large"),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(code) => write!(f, "Storage init failed: 0x{:x}", code),
            Self::Route(err) => write!(f, "Route registration failed: {}", err),
        }
    }
}
