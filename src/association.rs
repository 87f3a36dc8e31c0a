//! Station association with a bounded retry budget
//!
//! Link events from the radio arrive through a single-producer,
//! single-consumer queue. The radio (or its event task) owns the
//! [Producer], the [AssociationManager] owns the [Consumer] and is the
//! only place the [AssociationState] changes. The state changes
//! themselves are the pure [transition] function.

use core::net::Ipv4Addr;

use arrayvec::ArrayString;
use embedded_nal::nb;
use heapless::spsc::{Consumer, Producer};

use crate::config::{ASSOCIATION_POLL_MS, ASSOCIATION_TIMEOUT_MS, MAXIMUM_RETRY};
use crate::errors::{AssociationError, CredentialsError, ErrorCode};
use crate::Ipv4AddrWrap;
use crate::{debug, info, warn};

pub const MAX_SSID_LEN: usize = 32;
pub const MIN_PSK_KEY_LEN: usize = 8;
pub const MAX_PSK_KEY_LEN: usize = 63;

pub type Ssid = ArrayString<MAX_SSID_LEN>;
pub type WpaKey = ArrayString<MAX_PSK_KEY_LEN>;

/// Weakest access point security the station accepts
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthThreshold {
    Open,
    Wpa2Psk,
    Wpa3Psk,
}

/// Network name and passphrase for the station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: Ssid,
    passphrase: WpaKey,
    threshold: AuthThreshold,
}

impl Credentials {
    /// A non-empty passphrase sets the threshold to WPA2-PSK, so the
    /// station refuses deprecated WEP/WPA access points.
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, CredentialsError> {
        if ssid.is_empty() {
            return Err(CredentialsError::InvalidSsid);
        }
        let ssid = Ssid::from(ssid).map_err(|_| CredentialsError::InvalidSsid)?;
        if !passphrase.is_empty() && passphrase.len() < MIN_PSK_KEY_LEN {
            return Err(CredentialsError::InvalidPassphrase);
        }
        let threshold = if passphrase.is_empty() {
            AuthThreshold::Open
        } else {
            AuthThreshold::Wpa2Psk
        };
        let passphrase =
            WpaKey::from(passphrase).map_err(|_| CredentialsError::InvalidPassphrase)?;
        Ok(Self {
            ssid,
            passphrase,
            threshold,
        })
    }

    pub fn with_threshold(mut self, threshold: AuthThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn threshold(&self) -> AuthThreshold {
        self.threshold
    }
}

/// Events delivered from the radio's event context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Station interface is up and may start joining
    StationStarted,
    /// Join failed or an established link dropped
    Disconnected { reason: u8 },
    /// The station got an address
    GotIp { address: Ipv4Addr },
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkEvent {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::StationStarted => defmt::write!(f, "StationStarted"),
            Self::Disconnected { reason } => defmt::write!(f, "Disconnected({})", reason),
            Self::GotIp { address } => {
                defmt::write!(f, "GotIp({})", Ipv4AddrWrap::new(address))
            }
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Idle,
    Connecting,
    Connected,
    Failed,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationOutcome {
    Connected,
    Failed,
}

/// Consecutive reassociation attempts since the last successful join
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryCounter(u8);

impl RetryCounter {
    pub const fn new() -> Self {
        Self(0)
    }

    pub const fn count(self) -> u8 {
        self.0
    }

    fn incremented(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Side effect requested by a transition
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Ask the radio to (re)join
    Connect,
    SignalConnected,
    SignalFailed,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: AssociationState,
    pub retries: RetryCounter,
    pub action: Option<Action>,
}

/// Next state for `event` in `state`, with `ceiling` reassociation attempts
/// allowed before giving up
pub fn transition(
    state: AssociationState,
    retries: RetryCounter,
    event: LinkEvent,
    ceiling: u8,
) -> Transition {
    use AssociationState::{Connected, Connecting, Failed, Idle};
    match (state, event) {
        (Idle, LinkEvent::StationStarted) => Transition {
            state: Connecting,
            retries,
            action: Some(Action::Connect),
        },
        (Connecting | Connected, LinkEvent::Disconnected { .. }) => {
            if retries.count() < ceiling {
                Transition {
                    state: Connecting,
                    retries: retries.incremented(),
                    action: Some(Action::Connect),
                }
            } else {
                Transition {
                    state: Failed,
                    retries,
                    action: Some(Action::SignalFailed),
                }
            }
        }
        (Connecting | Connected | Failed, LinkEvent::GotIp { .. }) => Transition {
            state: Connected,
            retries: RetryCounter::new(),
            action: Some(Action::SignalConnected),
        },
        _ => Transition {
            state,
            retries,
            action: None,
        },
    }
}

/// Wi-Fi station driver seam
///
/// Implementations push [LinkEvent]s into the producer half of the
/// manager's queue, either from their own event task or from
/// [Radio::dispatch].
pub trait Radio {
    type Error: ErrorCode;

    /// Configure the station with `credentials` and bring it up. The radio
    /// reports [LinkEvent::StationStarted] once it is ready to join.
    fn start(&mut self, credentials: &Credentials) -> Result<(), Self::Error>;

    /// Start a join attempt. The result arrives as a later event.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Deliver pending events into the queue. Radios with their own event
    /// task can leave this empty.
    fn dispatch(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Push an event from the radio side, dropping it when the queue is full
pub fn deliver<const N: usize>(events: &mut Producer<'_, LinkEvent, N>, event: LinkEvent) {
    if events.enqueue(event).is_err() {
        warn!("Link event queue full, dropping {:?}", event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationConfig {
    pub max_retry: u8,
    pub timeout_ms: u32,
    pub poll_interval_ms: u32,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            max_retry: MAXIMUM_RETRY,
            timeout_ms: ASSOCIATION_TIMEOUT_MS,
            poll_interval_ms: ASSOCIATION_POLL_MS,
        }
    }
}

impl AssociationConfig {
    fn poll_budget(&self) -> u32 {
        (self.timeout_ms / self.poll_interval_ms.max(1)).max(1)
    }
}

pub struct AssociationManager<'a, R, const N: usize> {
    radio: R,
    events: Consumer<'a, LinkEvent, N>,
    config: AssociationConfig,
    state: AssociationState,
    retries: RetryCounter,
    address: Option<Ipv4Addr>,
    signal: Option<AssociationOutcome>,
    operation_countdown: Option<u32>,
    delay: &'a mut dyn FnMut(u32),
}

impl<'a, R: Radio, const N: usize> AssociationManager<'a, R, N> {
    /// `delay` is called with milliseconds between polls while waiting
    pub fn new(
        radio: R,
        events: Consumer<'a, LinkEvent, N>,
        config: AssociationConfig,
        delay: &'a mut dyn FnMut(u32),
    ) -> Self {
        Self {
            radio,
            events,
            config,
            state: AssociationState::Idle,
            retries: RetryCounter::new(),
            address: None,
            signal: None,
            operation_countdown: None,
            delay,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn retries(&self) -> RetryCounter {
        self.retries
    }

    /// Address from the last successful association
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Call this periodically to process link events after association
    ///
    /// Keeps reconnecting on link loss, under the same retry ceiling.
    pub fn heartbeat(&mut self) -> Result<(), AssociationError> {
        self.radio
            .dispatch()
            .map_err(|e| AssociationError::Radio(e.code()))?;
        while let Some(event) = self.events.dequeue() {
            self.apply(event)?;
        }
        Ok(())
    }

    fn apply(&mut self, event: LinkEvent) -> Result<(), AssociationError> {
        let next = transition(self.state, self.retries, event, self.config.max_retry);
        if next.state != self.state {
            info!(
                "Association {:?} -> {:?} (retries {})",
                self.state,
                next.state,
                next.retries.count()
            );
        } else if next.action.is_none() {
            debug!("Ignoring {:?} in {:?}", event, self.state);
        }
        self.state = next.state;
        self.retries = next.retries;

        match next.action {
            Some(Action::Connect) => {
                if let LinkEvent::Disconnected { reason } = event {
                    info!(
                        "Retry to connect to the AP ({}/{}), reason {}",
                        self.retries.count(),
                        self.config.max_retry,
                        reason
                    );
                }
                self.radio
                    .connect()
                    .map_err(|e| AssociationError::Radio(e.code()))?;
            }
            Some(Action::SignalConnected) => {
                if let LinkEvent::GotIp { address } = event {
                    info!("Got ip: {}", Ipv4AddrWrap::new(&address));
                    self.address = Some(address);
                }
                self.signal = Some(AssociationOutcome::Connected);
            }
            Some(Action::SignalFailed) => {
                info!("Connect to the AP failed");
                self.address = None;
                self.signal = Some(AssociationOutcome::Failed);
            }
            None => {}
        }
        Ok(())
    }

    /// Drive association without blocking
    ///
    /// # Returns
    ///
    /// * `AssociationOutcome` - Connected, or failed after the retry ceiling.
    /// * `nb::Error::WouldBlock` - Still associating.
    /// * `AssociationError` - The radio failed, or the deadline passed.
    pub fn poll_associate(
        &mut self,
        credentials: &Credentials,
    ) -> nb::Result<AssociationOutcome, AssociationError> {
        let Some(remaining) = self.operation_countdown else {
            return self.begin(credentials);
        };

        self.heartbeat()?;
        if let Some(outcome) = self.signal.take() {
            self.operation_countdown = None;
            return Ok(outcome);
        }

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.operation_countdown = None;
            warn!("Association timed out in {:?}", self.state);
            return Err(nb::Error::Other(AssociationError::Timeout));
        }
        self.operation_countdown = Some(remaining);
        (self.delay)(self.config.poll_interval_ms);
        Err(nb::Error::WouldBlock)
    }

    fn begin(
        &mut self,
        credentials: &Credentials,
    ) -> nb::Result<AssociationOutcome, AssociationError> {
        self.signal = None;
        match self.state {
            AssociationState::Connected => return Ok(AssociationOutcome::Connected),
            AssociationState::Idle => {
                info!("Starting station for SSID: {}", credentials.ssid());
                self.radio
                    .start(credentials)
                    .map_err(|e| AssociationError::Radio(e.code()))?;
            }
            AssociationState::Failed => {
                info!("Rejoining SSID: {}", credentials.ssid());
                self.retries = RetryCounter::new();
                self.state = AssociationState::Connecting;
                self.radio
                    .connect()
                    .map_err(|e| AssociationError::Radio(e.code()))?;
            }
            AssociationState::Connecting => {}
        }
        self.operation_countdown = Some(self.config.poll_budget());
        Err(nb::Error::WouldBlock)
    }

    /// Block until the station is connected or has given up
    pub fn associate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<AssociationOutcome, AssociationError> {
        let outcome = nb::block!(self.poll_associate(credentials))?;
        match outcome {
            AssociationOutcome::Connected => {
                info!("Connected to AP SSID: {}", credentials.ssid())
            }
            AssociationOutcome::Failed => {
                warn!("Failed to connect to SSID: {}", credentials.ssid())
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_shared::ScriptedRadio;
    use heapless::spsc::Queue;

    const CEILING: u8 = MAXIMUM_RETRY;
    const DROP: LinkEvent = LinkEvent::Disconnected { reason: 201 };
    const GOT_IP: LinkEvent = LinkEvent::GotIp {
        address: Ipv4Addr::new(192, 168, 1, 20),
    };

    fn credentials() -> Credentials {
        Credentials::new("network", "password").unwrap()
    }

    #[test]
    fn test_start_moves_to_connecting() {
        let next = transition(
            AssociationState::Idle,
            RetryCounter::new(),
            LinkEvent::StationStarted,
            CEILING,
        );
        assert_eq!(next.state, AssociationState::Connecting);
        assert_eq!(next.action, Some(Action::Connect));
    }

    #[test]
    fn test_disconnect_below_ceiling_retries() {
        let mut retries = RetryCounter::new();
        for expected in 1..=CEILING {
            let next = transition(AssociationState::Connecting, retries, DROP, CEILING);
            assert_eq!(next.state, AssociationState::Connecting);
            assert_eq!(next.action, Some(Action::Connect));
            assert_eq!(next.retries.count(), expected);
            retries = next.retries;
        }
        let next = transition(AssociationState::Connecting, retries, DROP, CEILING);
        assert_eq!(next.state, AssociationState::Failed);
        assert_eq!(next.action, Some(Action::SignalFailed));
        assert_eq!(next.retries.count(), CEILING);
    }

    #[test]
    fn test_got_ip_resets_retries() {
        let next = transition(AssociationState::Connecting, RetryCounter(3), GOT_IP, CEILING);
        assert_eq!(next.state, AssociationState::Connected);
        assert_eq!(next.retries.count(), 0);
        assert_eq!(next.action, Some(Action::SignalConnected));
    }

    #[test]
    fn test_disconnect_after_connected_reconnects() {
        let next = transition(AssociationState::Connected, RetryCounter::new(), DROP, CEILING);
        assert_eq!(next.state, AssociationState::Connecting);
        assert_eq!(next.retries.count(), 1);
        assert_eq!(next.action, Some(Action::Connect));
    }

    #[test]
    fn test_failed_ignores_disconnects() {
        let next = transition(AssociationState::Failed, RetryCounter(CEILING), DROP, CEILING);
        assert_eq!(next.state, AssociationState::Failed);
        assert_eq!(next.action, None);
    }

    #[test]
    fn test_idle_ignores_link_events() {
        for event in [DROP, GOT_IP] {
            let next = transition(AssociationState::Idle, RetryCounter::new(), event, CEILING);
            assert_eq!(next.state, AssociationState::Idle);
            assert_eq!(next.action, None);
        }
    }

    #[test]
    fn test_credentials_validation() {
        assert_eq!(
            Credentials::new("", "password"),
            Err(CredentialsError::InvalidSsid)
        );
        assert_eq!(
            Credentials::new("a-very-long-network-name-over-32-bytes", "password"),
            Err(CredentialsError::InvalidSsid)
        );
        assert_eq!(
            Credentials::new("network", "short"),
            Err(CredentialsError::InvalidPassphrase)
        );
        let open = Credentials::new("network", "").unwrap();
        assert_eq!(open.threshold(), AuthThreshold::Open);
        assert_eq!(credentials().threshold(), AuthThreshold::Wpa2Psk);
    }

    #[test]
    fn test_associate_connects() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut delay = |_ms: u32| {};
        let radio = ScriptedRadio::new(producer, Some(2));
        let mut manager =
            AssociationManager::new(radio, consumer, AssociationConfig::default(), &mut delay);

        let outcome = manager.associate(&credentials());
        assert_eq!(outcome, Ok(AssociationOutcome::Connected));
        assert_eq!(manager.state(), AssociationState::Connected);
        assert_eq!(manager.retries().count(), 0);
        assert_eq!(manager.radio().connect_calls, 3);
        assert_eq!(manager.address(), Some(Ipv4Addr::new(192, 168, 1, 20)));
    }

    #[test]
    fn test_associate_fails_after_ceiling() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut delay = |_ms: u32| {};
        let radio = ScriptedRadio::new(producer, None);
        let mut manager =
            AssociationManager::new(radio, consumer, AssociationConfig::default(), &mut delay);

        let outcome = manager.associate(&credentials());
        assert_eq!(outcome, Ok(AssociationOutcome::Failed));
        assert_eq!(manager.state(), AssociationState::Failed);
        // First join plus exactly MAXIMUM_RETRY reassociations
        assert_eq!(manager.radio().connect_calls, 1 + u32::from(MAXIMUM_RETRY));
        assert_eq!(manager.retries().count(), MAXIMUM_RETRY);
        assert_eq!(manager.address(), None);
    }

    #[test]
    fn test_associate_times_out_without_events() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut polls = 0;
        let mut delay = |_ms: u32| polls += 1;
        let radio = ScriptedRadio::silent(producer);
        let config = AssociationConfig {
            timeout_ms: 50,
            poll_interval_ms: 10,
            ..Default::default()
        };
        let mut manager = AssociationManager::new(radio, consumer, config, &mut delay);

        assert_eq!(
            manager.associate(&credentials()),
            Err(AssociationError::Timeout)
        );
        drop(manager);
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_heartbeat_reconnects_after_link_loss() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut delay = |_ms: u32| {};
        let radio = ScriptedRadio::new(producer, Some(0));
        let mut manager =
            AssociationManager::new(radio, consumer, AssociationConfig::default(), &mut delay);
        assert_eq!(
            manager.associate(&credentials()),
            Ok(AssociationOutcome::Connected)
        );

        manager.radio.drop_link();
        manager.heartbeat().unwrap();
        assert_eq!(manager.state(), AssociationState::Connected);
        assert_eq!(manager.retries().count(), 0);
        assert_eq!(manager.radio().connect_calls, 2);
    }

    #[test]
    fn test_associate_again_after_failure() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut delay = |_ms: u32| {};
        let radio = ScriptedRadio::new(producer, Some(u32::from(MAXIMUM_RETRY) + 1));
        let mut manager =
            AssociationManager::new(radio, consumer, AssociationConfig::default(), &mut delay);

        assert_eq!(
            manager.associate(&credentials()),
            Ok(AssociationOutcome::Failed)
        );
        assert_eq!(
            manager.associate(&credentials()),
            Ok(AssociationOutcome::Connected)
        );
        assert_eq!(manager.radio().start_calls, 1);
    }

    #[test]
    fn test_radio_error_is_surfaced() {
        let mut queue: Queue<LinkEvent, 8> = Queue::new();
        let (producer, consumer) = queue.split();
        let mut delay = |_ms: u32| {};
        let mut radio = ScriptedRadio::new(producer, Some(0));
        radio.fail_start = Some(0x3001);
        let mut manager =
            AssociationManager::new(radio, consumer, AssociationConfig::default(), &mut delay);
        assert_eq!(
            manager.associate(&credentials()),
            Err(AssociationError::Radio(0x3001))
        );
    }
}
