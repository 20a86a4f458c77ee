//! Connection supervision.
//!
//! [`PlcLink`] owns one [`Transport`] handle and keeps it usable: it
//! connects with retries, probes reachability before each attempt, runs a
//! background monitoring loop that drives the action registry on a fixed
//! tick, and reconnects when the loop detects a drop.
//!
//! Connect, ping, and disconnect are asynchronous and serialized against
//! each other through a shared cancellation context: starting a new
//! operation replaces (and cancels) the previous one, so the newest
//! request always wins. The monitoring loop has its own context and
//! terminates only on disconnect or teardown.
//!
//! Every outcome is published on the [`EventBus`]; transport failures are
//! caught at the boundary where they occur and never cross the public
//! surface as errors.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::events::{EventBus, LinkEvent};
use crate::registry::ActionRegistry;
use crate::transport::{shared_transport, SharedTransport, Transport};

/// Maximum attempts of a standalone ping operation.
const MAX_PING_ATTEMPTS: u32 = 4;
/// Bound on each reachability probe.
const PING_TIMEOUT: Duration = Duration::from_millis(1000);
/// Base delay between connect retries and between ping attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default tick of the background monitoring loop.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(50);
/// TCP port of the controller's protocol endpoint, used by the default
/// reachability probe.
pub const ISO_TSAP_PORT: u16 = 102;

/// CPU variants a controller can be configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CpuVariant {
    /// S7-200 compact series.
    S7_200,
    /// S7-200 Smart series.
    S7_200Smart,
    /// S7-300 modular series.
    S7_300,
    /// S7-400 modular series.
    S7_400,
    /// S7-1200 basic series.
    S7_1200,
    /// S7-1500 advanced series.
    #[default]
    S7_1500,
    /// LOGO! 0BA8 logic module.
    Logo0Ba8,
}

impl std::fmt::Display for CpuVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CpuVariant::S7_200 => "S7-200",
            CpuVariant::S7_200Smart => "S7-200 Smart",
            CpuVariant::S7_300 => "S7-300",
            CpuVariant::S7_400 => "S7-400",
            CpuVariant::S7_1200 => "S7-1200",
            CpuVariant::S7_1500 => "S7-1500",
            CpuVariant::Logo0Ba8 => "LOGO! 0BA8",
        };
        write!(f, "{}", name)
    }
}

/// Connection state of a link, driven only by [`PlcLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkStatus {
    /// No connect has been attempted yet.
    #[default]
    Unknown,
    /// A connect cycle is in progress.
    Connecting,
    /// The transport reports an open connection.
    Connected,
    /// The link was closed or a connect cycle was exhausted.
    Disconnected,
}

/// Validates an IPv4 address string.
///
/// The address must parse as IPv4 and format back to exactly the given
/// string, which rules out shorthand and padded notations.
///
/// # Example
///
/// ```
/// use s7_link::validate_ip;
///
/// assert!(validate_ip("10.0.0.5"));
/// assert!(!validate_ip("10.0.0"));
/// assert!(!validate_ip("::1"));
/// ```
pub fn validate_ip(address: &str) -> bool {
    match address.parse::<Ipv4Addr>() {
        Ok(ip) => ip.to_string() == address,
        Err(_) => false,
    }
}

/// Static configuration of one controller connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlcConfig {
    /// Display name of the controller.
    pub name: String,
    /// IPv4 address of the controller.
    pub address: String,
    /// Rack number of the CPU module.
    pub rack: u16,
    /// Slot number of the CPU module.
    pub slot: u16,
    /// CPU variant.
    pub cpu: CpuVariant,
}

impl PlcConfig {
    /// Creates a configuration with rack 0, slot 1, and the default CPU
    /// variant.
    ///
    /// # Errors
    ///
    /// Rejects addresses that fail [`validate_ip`].
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if !validate_ip(&address) {
            return Err(LinkError::config(format!(
                "invalid IP address '{}'",
                address
            )));
        }
        Ok(Self {
            name: name.into(),
            address,
            rack: 0,
            slot: 1,
            cpu: CpuVariant::default(),
        })
    }

    /// Creates an entry with no address configured yet.
    pub(crate) fn unconfigured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: String::new(),
            rack: 0,
            slot: 1,
            cpu: CpuVariant::default(),
        }
    }

    /// Sets the rack number.
    pub fn with_rack(mut self, rack: u16) -> Self {
        self.rack = rack;
        self
    }

    /// Sets the slot number.
    pub fn with_slot(mut self, slot: u16) -> Self {
        self.slot = slot;
        self
    }

    /// Sets the CPU variant.
    pub fn with_cpu(mut self, cpu: CpuVariant) -> Self {
        self.cpu = cpu;
        self
    }
}

/// Reachability probe used before connect attempts and by [`PlcLink::ping`].
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns whether the host at `address` answered within `timeout`.
    async fn probe(&self, address: &str, timeout: Duration) -> bool;
}

/// Default prober: attempts a TCP connection to the controller's protocol
/// port within the timeout.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    port: u16,
}

impl TcpProbe {
    /// Creates a probe against the given TCP port.
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(ISO_TSAP_PORT)
    }
}

#[async_trait]
impl Prober for TcpProbe {
    async fn probe(&self, address: &str, timeout: Duration) -> bool {
        let Ok(ip) = address.parse::<Ipv4Addr>() else {
            return false;
        };
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((ip, self.port))).await,
            Ok(Ok(_))
        )
    }
}

/// Everything the monitoring loop and connect cycle share.
#[derive(Clone)]
struct Shared {
    config: PlcConfig,
    transport: SharedTransport,
    prober: Arc<dyn Prober>,
    registry: Arc<ActionRegistry>,
    events: EventBus,
    status: Arc<StdMutex<LinkStatus>>,
    interval: Duration,
}

impl Shared {
    fn status(&self) -> LinkStatus {
        *self
            .status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_status(&self, status: LinkStatus) {
        *self
            .status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = status;
    }

    fn emit_cancelled(&self) -> bool {
        debug!(address = %self.config.address, "connect cancelled");
        self.events.emit(LinkEvent::ConnectionCancelled {
            address: self.config.address.clone(),
        });
        false
    }

    /// Runs one connect cycle of up to `retries` attempts. Emits every
    /// lifecycle event including the terminal `ConnectionFailed` or
    /// `ConnectionCancelled`, and returns whether the link came up.
    async fn run_connect_cycle(&self, retries: u32, token: &CancellationToken) -> bool {
        let address = self.config.address.clone();
        let mut attempts = 0;

        while attempts < retries {
            attempts += 1;
            self.events.emit(LinkEvent::ConnectionAttempt {
                attempt: attempts,
                max_attempts: retries,
            });

            let reachable = tokio::select! {
                _ = token.cancelled() => return self.emit_cancelled(),
                reachable = self.prober.probe(&address, PING_TIMEOUT) => reachable,
            };

            if reachable {
                let outcome = {
                    let mut transport = self.transport.lock().await;
                    tokio::select! {
                        _ = token.cancelled() => None,
                        result = async {
                            transport.open().await?;
                            if transport.is_connected() {
                                Ok(())
                            } else {
                                Err(LinkError::transport(
                                    "transport opened but reports disconnected",
                                ))
                            }
                        } => Some(result),
                    }
                };

                match outcome {
                    None => return self.emit_cancelled(),
                    Some(Ok(())) => {
                        self.set_status(LinkStatus::Connected);
                        self.registry.set_online(true);
                        info!(address = %address, "connected");
                        self.events.emit(LinkEvent::Connected { address });
                        return true;
                    }
                    Some(Err(err)) => {
                        warn!(address = %address, error = %err, "connect attempt failed");
                        self.events.emit(LinkEvent::ConnectionAttemptFailed {
                            address: address.clone(),
                            reason: format!("attempt {}/{}: {}", attempts, retries, err),
                        });
                    }
                }
            } else {
                self.events.emit(LinkEvent::ConnectionAttemptFailed {
                    address: address.clone(),
                    reason: format!("attempt {}/{}: not responding to probe", attempts, retries),
                });
            }

            if attempts < retries {
                tokio::select! {
                    _ = token.cancelled() => return self.emit_cancelled(),
                    _ = sleep(RETRY_BASE_DELAY) => {}
                }
            }
        }

        warn!(address = %address, attempts, "connection failed");
        self.set_status(LinkStatus::Disconnected);
        self.events.emit(LinkEvent::ConnectionFailed { address, attempts });
        false
    }

    /// Background loop: every tick, either drive the registered actions or
    /// detect a dropped connection and reconnect inline with one retry.
    async fn monitor_loop(self, token: CancellationToken) {
        let address = self.config.address.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.interval) => {}
            }

            let connected = self.transport.lock().await.is_connected();
            if self.registry.is_online() && connected {
                self.registry.execute_all().await;
                self.events.emit(LinkEvent::DataUpdated {
                    address: address.clone(),
                });
            } else if !token.is_cancelled() {
                let reachable = if connected {
                    self.prober.probe(&address, PING_TIMEOUT).await
                } else {
                    false
                };
                if !connected || !reachable {
                    warn!(address = %address, "connection lost");
                    self.events.emit(LinkEvent::ConnectionLost {
                        address: address.clone(),
                    });
                    self.registry.set_online(false);
                    self.set_status(LinkStatus::Connecting);
                    self.run_connect_cycle(1, &token).await;
                }
            }
        }
        debug!(address = %address, "monitoring stopped");
    }
}

/// Supervises one controller connection.
///
/// See the [module documentation](self) for the lifecycle model.
pub struct PlcLink {
    shared: Shared,
    current: StdMutex<CancellationToken>,
    monitor: StdMutex<CancellationToken>,
}

impl PlcLink {
    /// Creates a link over the given transport.
    ///
    /// # Errors
    ///
    /// Rejects configurations whose address fails [`validate_ip`].
    pub fn new(
        config: PlcConfig,
        transport: impl Transport + 'static,
        events: EventBus,
    ) -> Result<Self> {
        if !validate_ip(&config.address) {
            return Err(LinkError::config(format!(
                "invalid IP address '{}'",
                config.address
            )));
        }
        Ok(Self {
            shared: Shared {
                config,
                transport: shared_transport(transport),
                prober: Arc::new(TcpProbe::default()),
                registry: Arc::new(ActionRegistry::new(events.clone())),
                events,
                status: Arc::new(StdMutex::new(LinkStatus::Unknown)),
                interval: DEFAULT_MONITOR_INTERVAL,
            },
            current: StdMutex::new(CancellationToken::new()),
            monitor: StdMutex::new(CancellationToken::new()),
        })
    }

    /// Replaces the default reachability probe.
    pub fn with_prober(mut self, prober: impl Prober + 'static) -> Self {
        self.shared.prober = Arc::new(prober);
        self
    }

    /// Replaces the default monitoring tick.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.shared.interval = interval;
        self
    }

    /// Returns the link's configuration.
    pub fn config(&self) -> &PlcConfig {
        &self.shared.config
    }

    /// Returns the current connection state.
    pub fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    /// Returns the action registry driven by the monitoring loop.
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.shared.registry
    }

    /// Returns the shared transport handle, for declaring data groups and
    /// I/O banks on this connection.
    pub fn transport(&self) -> SharedTransport {
        self.shared.transport.clone()
    }

    /// Enables or disables cyclic data exchange without disconnecting.
    pub fn set_online(&self, online: bool) {
        self.shared.registry.set_online(online);
    }

    /// Returns whether cyclic data exchange is enabled.
    pub fn is_online(&self) -> bool {
        self.shared.registry.is_online()
    }

    /// Connects with up to `retries` attempts and starts the monitoring
    /// loop on success.
    ///
    /// Any in-flight connect, ping, or monitoring work is cancelled first.
    /// Returns whether the link came up; every outcome is also published
    /// as events.
    pub async fn connect(&self, retries: u32) -> bool {
        self.cancel_all();
        let token = self.replace_current();
        self.shared.set_status(LinkStatus::Connecting);

        let connected = self.shared.run_connect_cycle(retries, &token).await;
        if connected {
            self.start_monitor();
        }
        connected
    }

    /// Closes the connection and stops all in-flight work.
    ///
    /// Close failures are reported as `DisconnectionFailed` events and
    /// never propagated.
    pub async fn disconnect(&self) {
        self.cancel_all();
        self.shared.registry.set_online(false);

        let address = self.shared.config.address.clone();
        let mut transport = self.shared.transport.lock().await;
        if transport.is_connected() {
            match transport.close().await {
                Ok(()) => {
                    self.shared.set_status(LinkStatus::Disconnected);
                    info!(address = %address, "disconnected");
                    self.shared.events.emit(LinkEvent::Disconnected { address });
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "disconnect failed");
                    self.shared.events.emit(LinkEvent::DisconnectionFailed {
                        address,
                        reason: err.to_string(),
                    });
                }
            }
        } else {
            self.shared
                .events
                .emit(LinkEvent::AlreadyDisconnected { address });
        }
    }

    /// Probes the controller with up to 4 attempts, 1000 ms each, and a
    /// linear backoff of 500 ms × attempt between attempts.
    ///
    /// Cancels any in-flight connect or ping first. Returns whether any
    /// attempt succeeded.
    pub async fn ping(&self) -> bool {
        self.cancel_all();
        let token = self.replace_current();
        let address = self.shared.config.address.clone();
        let events = &self.shared.events;

        let mut success = false;
        for attempt in 1..=MAX_PING_ATTEMPTS {
            events.emit(LinkEvent::PingAttempt {
                address: address.clone(),
                attempt,
                max_attempts: MAX_PING_ATTEMPTS,
            });

            let reachable = tokio::select! {
                _ = token.cancelled() => {
                    events.emit(LinkEvent::PingCancelled { address });
                    return false;
                }
                reachable = self.shared.prober.probe(&address, PING_TIMEOUT) => reachable,
            };

            if reachable {
                success = true;
                break;
            }

            events.emit(LinkEvent::PingAttemptFailed {
                address: address.clone(),
                attempt,
                max_attempts: MAX_PING_ATTEMPTS,
            });

            if attempt < MAX_PING_ATTEMPTS {
                tokio::select! {
                    _ = token.cancelled() => {
                        events.emit(LinkEvent::PingCancelled { address });
                        return false;
                    }
                    _ = sleep(RETRY_BASE_DELAY * attempt) => {}
                }
            }
        }

        events.emit(LinkEvent::PingCompleted { address, success });
        success
    }

    /// Cancels the current connect/ping operation and the monitoring loop.
    /// Idempotent; safe to call when nothing is running.
    pub fn cancel_all(&self) {
        self.lock_token(&self.current).cancel();
        self.lock_token(&self.monitor).cancel();
    }

    fn replace_current(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock_token(&self.current) = token.clone();
        token
    }

    fn start_monitor(&self) {
        let token = CancellationToken::new();
        *self.lock_token(&self.monitor) = token.clone();
        tokio::spawn(self.shared.clone().monitor_loop(token));
    }

    fn lock_token<'a>(
        &self,
        slot: &'a StdMutex<CancellationToken>,
    ) -> std::sync::MutexGuard<'a, CancellationToken> {
        slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for PlcLink {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl std::fmt::Debug for PlcLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcLink")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;
    use crate::registry::PlcAction;
    use crate::transport::test_support::{FakeState, FakeTransport};

    struct FakeProber {
        reachable: Arc<AtomicBool>,
    }

    impl FakeProber {
        fn new(reachable: bool) -> (Self, Arc<AtomicBool>) {
            let flag = Arc::new(AtomicBool::new(reachable));
            (
                Self {
                    reachable: flag.clone(),
                },
                flag,
            )
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, _address: &str, _timeout: Duration) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }
    }

    struct TickCounter {
        runs: AtomicU32,
    }

    #[async_trait]
    impl PlcAction for TickCounter {
        fn name(&self) -> &str {
            "tick_counter"
        }

        async fn execute(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn link_with(
        reachable: bool,
        events: EventBus,
    ) -> (PlcLink, Arc<StdMutex<FakeState>>, Arc<AtomicBool>) {
        let (transport, state) = FakeTransport::new();
        let (prober, flag) = FakeProber::new(reachable);
        let config = PlcConfig::new("press", "10.0.0.5").unwrap();
        let link = PlcLink::new(config, transport, events)
            .unwrap()
            .with_prober(prober);
        (link, state, flag)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("10.0.0.5"));
        assert!(validate_ip("192.168.1.250"));
        assert!(!validate_ip(""));
        assert!(!validate_ip("10.0.0"));
        assert!(!validate_ip("10.0.0.256"));
        assert!(!validate_ip("not-an-ip"));
        assert!(!validate_ip("::1"));
    }

    #[test]
    fn test_config_defaults() {
        let config = PlcConfig::new("press", "10.0.0.5").unwrap();
        assert_eq!(config.rack, 0);
        assert_eq!(config.slot, 1);
        assert_eq!(config.cpu, CpuVariant::S7_1500);

        let config = config.with_rack(2).with_slot(3).with_cpu(CpuVariant::S7_300);
        assert_eq!((config.rack, config.slot), (2, 3));
        assert_eq!(config.cpu, CpuVariant::S7_300);
    }

    #[test]
    fn test_config_rejects_invalid_address() {
        assert!(PlcConfig::new("press", "10.0.0").is_err());
    }

    #[tokio::test]
    async fn test_link_rejects_invalid_address() {
        let (transport, _) = FakeTransport::new();
        let config = PlcConfig::unconfigured("press");
        assert!(PlcLink::new(config, transport, EventBus::default()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, state, _) = link_with(true, events);

        assert!(link.connect(3).await);
        assert_eq!(link.status(), LinkStatus::Connected);
        assert!(link.is_online());
        assert_eq!(state.lock().unwrap().opens, 1);

        let seen = drain(&mut rx);
        assert!(matches!(
            seen[0],
            LinkEvent::ConnectionAttempt {
                attempt: 1,
                max_attempts: 3
            }
        ));
        assert!(seen
            .iter()
            .any(|e| matches!(e, LinkEvent::Connected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retry_bound_and_single_failure_event() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, _, _) = link_with(false, events);

        assert!(!link.connect(3).await);
        assert_eq!(link.status(), LinkStatus::Disconnected);

        let seen = drain(&mut rx);
        let attempts = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::ConnectionAttempt { .. }))
            .count();
        let failures = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::ConnectionFailed { .. }))
            .count();
        assert_eq!(attempts, 3);
        assert_eq!(failures, 1);
        assert!(seen.iter().any(|e| matches!(
            e,
            LinkEvent::ConnectionFailed { attempts: 3, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_after_open_failures() {
        let events = EventBus::default();
        let (link, state, _) = link_with(true, events);
        state.lock().unwrap().fail_opens = 2;

        assert!(link.connect(3).await);
        assert_eq!(state.lock().unwrap().opens, 1);
        assert_eq!(link.status(), LinkStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cancellation() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, _, _) = link_with(false, events);
        let link = Arc::new(link);

        let task = {
            let link = link.clone();
            tokio::spawn(async move { link.connect(10).await })
        };
        // Let the connect task reach its first backoff sleep
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        link.cancel_all();

        assert!(!task.await.unwrap());
        let seen = drain(&mut rx);
        assert!(seen
            .iter()
            .any(|e| matches!(e, LinkEvent::ConnectionCancelled { .. })));
        assert!(!seen
            .iter()
            .any(|e| matches!(e, LinkEvent::ConnectionFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_outcomes() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, state, _) = link_with(true, events);

        // Not connected yet
        link.disconnect().await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LinkEvent::AlreadyDisconnected { .. })));

        assert!(link.connect(1).await);
        link.disconnect().await;
        assert_eq!(link.status(), LinkStatus::Disconnected);
        assert!(!link.is_online());
        assert_eq!(state.lock().unwrap().closes, 1);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LinkEvent::Disconnected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_close_failure_is_reported() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, state, _) = link_with(true, events);

        assert!(link.connect(1).await);
        state.lock().unwrap().fail_closes = 1;
        link.disconnect().await;

        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LinkEvent::DisconnectionFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_ticks_touch_no_transport() {
        let events = EventBus::default();
        let (link, state, _) = link_with(true, events);

        assert!(link.connect(1).await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        {
            let s = state.lock().unwrap();
            assert_eq!((s.reads, s.multi_reads), (0, 0));
            assert!(s.writes.is_empty());
        }

        link.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_linear_backoff() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, _, _) = link_with(false, events);

        let started = tokio::time::Instant::now();
        assert!(!link.ping().await);
        // Backoffs of 500, 1000, and 1500 ms between the four attempts
        assert_eq!(started.elapsed(), Duration::from_millis(3000));

        let seen = drain(&mut rx);
        let attempts = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::PingAttempt { .. }))
            .count();
        let failed = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::PingAttemptFailed { .. }))
            .count();
        assert_eq!(attempts, 4);
        assert_eq!(failed, 4);
        assert!(seen
            .iter()
            .any(|e| matches!(e, LinkEvent::PingCompleted { success: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_success_stops_early() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, _, _) = link_with(true, events);

        assert!(link.ping().await);
        let seen = drain(&mut rx);
        let attempts = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::PingAttempt { .. }))
            .count();
        assert_eq!(attempts, 1);
        assert!(seen
            .iter()
            .any(|e| matches!(e, LinkEvent::PingCompleted { success: true, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_drives_actions_and_emits_data_updated() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, _, _) = link_with(true, events);

        let counter = Arc::new(TickCounter {
            runs: AtomicU32::new(0),
        });
        link.registry().register(counter.clone()).await;

        assert!(link.connect(1).await);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(counter.runs.load(Ordering::SeqCst) >= 2);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LinkEvent::DataUpdated { .. })));

        link.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_detects_loss_and_reconnects_once() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let (link, state, _) = link_with(true, events);

        assert!(link.connect(1).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        drain(&mut rx);

        // Drop the link out from under the monitor
        state.lock().unwrap().connected = false;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let seen = drain(&mut rx);
        let losses = seen
            .iter()
            .filter(|e| matches!(e, LinkEvent::ConnectionLost { .. }))
            .count();
        assert_eq!(losses, 1);
        // The inline reconnect used a single retry and came back up
        assert!(seen.iter().any(|e| matches!(
            e,
            LinkEvent::ConnectionAttempt {
                attempt: 1,
                max_attempts: 1
            }
        )));
        assert!(seen
            .iter()
            .any(|e| matches!(e, LinkEvent::Connected { .. })));
        assert_eq!(link.status(), LinkStatus::Connected);

        link.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_online_pauses_exchange() {
        let events = EventBus::default();
        let (link, _, _) = link_with(true, events);

        let counter = Arc::new(TickCounter {
            runs: AtomicU32::new(0),
        });
        link.registry().register(counter.clone()).await;

        assert!(link.connect(1).await);
        link.set_online(false);
        let before = counter.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), before);
        assert_eq!(link.status(), LinkStatus::Connected);

        link.disconnect().await;
    }
}
