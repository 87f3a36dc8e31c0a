//! Build-time configuration
//!
//! Credentials and the report endpoint can be overridden with the
//! `TEST_SSID`, `TEST_PASSWORD` and `REPORT_URL` environment variables at
//! compile time. Everything else is fixed.

pub const DEFAULT_TEST_SSID: &str = "network";
pub const DEFAULT_TEST_PASSWORD: &str = "password";

pub const WIFI_SSID: &str = match option_env!("TEST_SSID") {
    Some(ssid) => ssid,
    None => DEFAULT_TEST_SSID,
};

pub const WIFI_PASSWORD: &str = match option_env!("TEST_PASSWORD") {
    Some(password) => password,
    None => DEFAULT_TEST_PASSWORD,
};

/// Reassociation attempts after the first join before giving up
pub const MAXIMUM_RETRY: u8 = 5;
// 1 minute max, if no other delays are added
pub const ASSOCIATION_TIMEOUT_MS: u32 = 60_000;
pub const ASSOCIATION_POLL_MS: u32 = 10;
/// Slots in the link event queue. One slot is always kept free.
pub const EVENT_QUEUE_LEN: usize = 8;

pub const DEFAULT_REPORT_URL: &str = "https://api.open-meteo.com/v1/forecast?latitude=36.2127&longitude=-121.126&current=temperature_2m&timezone=America%2FLos_Angeles&temperature_unit=fahrenheit";

pub const REPORT_URL: &str = match option_env!("REPORT_URL") {
    Some(url) => url,
    None => DEFAULT_REPORT_URL,
};

pub const MAX_HTTP_OUTPUT_BUFFER: usize = 2048;
pub const MAX_HTTP_RECV_BUFFER: usize = 512;
pub const MAX_RESPONSE_HEAD: usize = 1024;
pub const MAX_REQUEST_HEAD: usize = 512;
pub const MAX_URL_LEN: usize = 256;
pub const MAX_RESPONSE_HEADERS: usize = 32;
/// Longest chunk size or trailer line of a chunked body
pub const MAX_CHUNK_LINE: usize = 128;
pub const USER_AGENT: &str = "station-report/0.1";

/// Headers re-attached to a request that follows a redirect
pub const REDIRECT_HEADERS: &[(&str, &str)] = &[("From", "user@example.com"), ("Accept", "text/html")];

pub const HTTP_PORT: u16 = 80;
pub const MAX_ROUTES: usize = 8;
pub const MAX_REQUEST_HEADERS: usize = 16;
pub const MAX_CUSTOM_HEADERS: usize = 4;
pub const REQUEST_BUFFER_LEN: usize = 1024;
pub const SEND_BUFFER_LEN: usize = 2048;
// 253 byte name, a colon and a five digit port
pub const HOST_HEADER_MAX: usize = 260;
pub const QUERY_VALUE_MAX: usize = 64;

pub const HELLO_PATH: &str = "/hello";
pub const HELLO_BODY: &str = "Hello world";
pub const HELLO_QUERY_KEY: &str = "query1";

pub const IDLE_LOG_INTERVAL_MS: u32 = 5_000;
pub const IDLE_POLL_MS: u32 = 100;

pub const GPIO_CS: u8 = 15;
pub const GPIO_SCLK: u8 = 14;
pub const GPIO_MISO: u8 = 12;
pub const GPIO_MOSI: u8 = 13;
pub const SPI_CLOCK_HZ: u32 = 1_000_000;
// 128/256 = 50% duty cycle
pub const SPI_DUTY_CYCLE_POS: u16 = 128;
pub const SPI_CS_POSTTRANS_CYCLES: u8 = 3;
pub const SPI_QUEUE_SIZE: u8 = 1;
pub const SPI_TX_BYTE: u8 = b'C';
pub const SPI_RX_FILL: u8 = b'D';
pub const SPI_PERIOD_MS: u32 = 5_000;
