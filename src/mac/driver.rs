//! Cooperative driver loop around a [`MacEngine`].
//!
//! One thread owns the engine, the HAL and the send schedule. Each
//! [`service`](MacDriver::service) call runs the engine once, dispatches the
//! events it raised, reports transient HAL faults and fires the periodic
//! uplink when it is due. [`run`](MacDriver::run) repeats that with a bounded
//! sleep until cancelled, then shuts the hardware down.
//!
//! Job states:
//!
//! ```text
//! Idle ──start──▶ Queued ──due──▶ Submitted ──TxComplete──▶ Complete ──due──▶ Submitted ...
//! due, engine busy:  Queued/Complete ──▶ Idle ──TxComplete──▶ Complete
//! due, rejected:     Queued/Complete ──▶ Queued (retry after tx_interval)
//! ```
//!
//! A send attempt while the engine is busy is dropped without rescheduling
//! and the job falls back to `Idle`; the cycle that kept the engine busy
//! ends with a `TxComplete` that re-arms the schedule.

use super::{Channel, DataRate, EngineError, MacEngine, MacEvent, Session, UplinkJob};
use crate::clock::{self, Clock, Sleeper};
use crate::hal::{EnginePort, GpioBackend, HalError, HostHal, Level, Pin, PinMode, SpiBackend};
use crate::stats::{LoopStats, StatsSnapshot};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where the periodic uplink stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Nothing scheduled: before start, or after a due send was dropped.
    Idle,
    /// Send scheduled, not yet handed to the engine.
    Queued,
    /// Engine is carrying the uplink.
    Submitted,
    /// Last uplink finished; next one scheduled.
    Complete,
}

/// Result of [`MacDriver::submit_uplink`].
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Handed to the engine.
    Submitted,
    /// Engine busy; nothing changed.
    Dropped,
    /// Engine refused the uplink.
    Rejected(EngineError),
}

/// Fatal driver errors. Only startup can fail; the running loop reports
/// faults instead.
#[derive(Debug)]
pub enum DriverError {
    /// Hardware could not be brought up.
    Init(HalError),
    /// Engine refused its initial configuration.
    Engine(EngineError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Init(e) => write!(f, "hardware init failed: {}", e),
            DriverError::Engine(e) => write!(f, "engine setup failed: {}", e),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Init(e) => Some(e),
            DriverError::Engine(e) => Some(e),
        }
    }
}

impl From<HalError> for DriverError {
    fn from(e: HalError) -> Self {
        DriverError::Init(e)
    }
}

impl From<EngineError> for DriverError {
    fn from(e: EngineError) -> Self {
        DriverError::Engine(e)
    }
}

/// What the driver sets up and sends.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub session: Session,
    /// Channels to (re)define after the session is installed.
    pub channels: Vec<Channel>,
    pub rx2_data_rate: DataRate,
    pub data_rate: DataRate,
    pub tx_power_dbm: i8,
    /// Periodic uplink.
    pub job: UplinkJob,
    /// Delay between a transmit completion and the next send.
    pub tx_interval: Duration,
    /// Sleep between loop iterations.
    pub poll_interval: Duration,
    /// Activity indicator, high while an uplink is in flight.
    pub led: Pin,
}

impl DriverConfig {
    /// SF7 at 14 dBm, RX2 on SF9, 120 s between uplinks, 1 ms poll, no LED.
    pub fn new(session: Session, job: UplinkJob) -> Self {
        Self {
            session,
            channels: Vec::new(),
            rx2_data_rate: DataRate::Sf9,
            data_rate: DataRate::Sf7,
            tx_power_dbm: 14,
            job,
            tx_interval: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1),
            led: Pin::UNUSED,
        }
    }
}

/// The MAC driver loop.
pub struct MacDriver<E, G, S, C, Sl> {
    engine: E,
    hal: HostHal<G, S, C>,
    sleeper: Sl,
    config: DriverConfig,
    state: JobState,
    next_send_at: Option<u32>,
    stats: Arc<LoopStats>,
    shut_down: bool,
}

impl<E, G, S, C, Sl> MacDriver<E, G, S, C, Sl>
where
    E: MacEngine,
    G: GpioBackend,
    S: SpiBackend,
    C: Clock,
    Sl: Sleeper,
{
    /// Driver over `engine` and `hal`. Nothing touches the hardware until
    /// [`start`](Self::start).
    pub fn new(
        engine: E,
        hal: HostHal<G, S, C>,
        sleeper: Sl,
        config: DriverConfig,
        stats: Arc<LoopStats>,
    ) -> Self {
        Self {
            engine,
            hal,
            sleeper,
            config,
            state: JobState::Idle,
            next_send_at: None,
            stats,
            shut_down: false,
        }
    }

    /// Bring up the hardware and configure the engine, then schedule the
    /// first uplink for immediately.
    ///
    /// Order: HAL init, indicator off, engine reset, session (static keys or
    /// join), channels, link check off, RX2 data rate, data rate and power.
    /// If anything after HAL init fails the bus is released again.
    pub fn start(&mut self) -> Result<(), DriverError> {
        self.hal.init()?;
        if let Err(e) = self.configure() {
            if let Err(shutdown) = self.hal.shutdown() {
                warn!("Releasing the bus after failed start: {}", shutdown);
            }
            self.report_faults();
            return Err(e);
        }

        self.next_send_at = Some(self.hal.now_millis());
        self.state = JobState::Queued;
        self.report_faults();
        info!("Driver started, first uplink due now");
        Ok(())
    }

    fn configure(&mut self) -> Result<(), DriverError> {
        let led = self.config.led;
        self.hal.pins_mut().set_mode(led, PinMode::Output)?;
        self.hal.pins_mut().write(led, Level::Low)?;

        self.engine.reset(&mut self.hal)?;
        match &self.config.session {
            Session::Abp(session) => {
                info!(
                    "ABP session: net id 0x{:X}, address 0x{:08X}",
                    session.net_id, session.dev_addr
                );
                self.engine.set_session(session);
            }
            Session::Otaa(credentials) => {
                info!("Starting OTAA join");
                self.engine.start_join(credentials)?;
            }
        }
        for channel in &self.config.channels {
            debug!(
                "Channel {}: {} Hz {:?}..{:?} {:?}",
                channel.index, channel.frequency_hz, channel.min_dr, channel.max_dr, channel.band
            );
            self.engine.setup_channel(channel);
        }
        self.engine.set_link_check_mode(false);
        self.engine.set_rx2_data_rate(self.config.rx2_data_rate);
        self.engine
            .set_data_rate_and_power(self.config.data_rate, self.config.tx_power_dbm);
        Ok(())
    }

    /// Hand `job` to the engine unless a transmit/receive cycle is pending.
    /// A dropped call leaves the job state alone.
    pub fn submit_uplink(&mut self, job: &UplinkJob) -> SubmitOutcome {
        if self.engine.is_busy() {
            warn!("OP_TXRXPEND, not sending");
            LoopStats::bump(&self.stats.dropped);
            return SubmitOutcome::Dropped;
        }

        self.set_indicator(Level::High);
        match self.engine.queue_uplink(&mut self.hal, job) {
            Ok(()) => {
                info!(
                    "Packet queued: {} bytes on port {}{}",
                    job.payload.len(),
                    job.port,
                    if job.confirmed { " (confirmed)" } else { "" }
                );
                LoopStats::bump(&self.stats.submitted);
                self.state = JobState::Submitted;
                SubmitOutcome::Submitted
            }
            Err(e) => {
                warn!("Uplink rejected: {}", e);
                LoopStats::bump(&self.stats.rejected);
                self.set_indicator(Level::Low);
                self.schedule_next();
                self.state = JobState::Queued;
                SubmitOutcome::Rejected(e)
            }
        }
    }

    /// One non-blocking loop step.
    pub fn service(&mut self) {
        let mut events = Vec::new();
        self.engine
            .run_once(&mut self.hal, &mut |event| events.push(event));
        for event in events {
            self.on_event(event);
        }

        if let Some(due) = self.next_send_at {
            if clock::is_due(self.hal.now_millis(), due) {
                self.next_send_at = None;
                let job = self.config.job.clone();
                if let SubmitOutcome::Dropped = self.submit_uplink(&job) {
                    self.state = JobState::Idle;
                }
            }
        }

        self.report_faults();
        LoopStats::bump(&self.stats.iterations);
    }

    /// React to one engine event.
    pub fn on_event(&mut self, event: MacEvent) {
        LoopStats::bump(&self.stats.events);
        let now = self.hal.now_millis();
        match event {
            MacEvent::TxComplete { ack, downlink } => {
                info!("{}: EV_TXCOMPLETE (includes waiting for RX windows)", now);
                if ack {
                    info!("Received ack");
                }
                if let Some(downlink) = downlink {
                    info!(
                        "Received {} bytes of payload on port {}",
                        downlink.payload.len(),
                        downlink.port
                    );
                }
                LoopStats::bump(&self.stats.tx_complete);
                self.set_indicator(Level::Low);
                self.schedule_next();
                self.state = JobState::Complete;
            }
            MacEvent::Joined => {
                info!("{}: EV_JOINED", now);
                self.set_indicator(Level::Low);
                // Link check validation is not supported by single-channel gateways.
                self.engine.set_link_check_mode(false);
            }
            MacEvent::Unknown(code) => warn!("{}: Unknown event {}", now, code),
            other => info!("{}: {}", now, other),
        }
    }

    /// Service until `cancel` fires, then shut down.
    ///
    /// Cancellation is checked between iterations only.
    pub fn run(&mut self, cancel: &CancellationToken) -> StatsSnapshot {
        info!(
            "Driver loop running, poll interval {:?}",
            self.config.poll_interval
        );
        while !cancel.is_cancelled() {
            self.service();
            self.sleeper.sleep(self.config.poll_interval);
        }
        info!("Driver loop cancelled");
        self.shutdown()
    }

    /// Indicator off, every chip-select deselected, bus released.
    /// Returns the final counters. Repeated calls only return counters.
    pub fn shutdown(&mut self) -> StatsSnapshot {
        if !self.shut_down {
            self.shut_down = true;
            self.set_indicator(Level::Low);
            if let Err(e) = self.hal.shutdown() {
                error!("Shutdown could not deselect every chip-select: {}", e);
                LoopStats::bump(&self.stats.io_faults);
            }
            self.report_faults();
        }
        let summary = self.stats.snapshot();
        info!(
            "Driver stopped after {} iterations, {} uplinks",
            summary.iterations, summary.uplinks.submitted
        );
        summary
    }

    /// Current job state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Millisecond timestamp of the next send, if scheduled.
    pub fn next_send_at(&self) -> Option<u32> {
        self.next_send_at
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The wrapped engine, for reconfiguration between iterations.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The porting layer the engine runs against.
    pub fn hal(&self) -> &HostHal<G, S, C> {
        &self.hal
    }

    /// Shared loop counters.
    pub fn stats(&self) -> &Arc<LoopStats> {
        &self.stats
    }

    fn schedule_next(&mut self) {
        let interval_ms = self.config.tx_interval.as_millis().min(u32::MAX as u128 / 2) as u32;
        self.next_send_at = Some(self.hal.now_millis().wrapping_add(interval_ms));
    }

    fn set_indicator(&mut self, level: Level) {
        let led = self.config.led;
        if let Err(e) = self.hal.pins_mut().write(led, level) {
            warn!("Indicator {}: {}", led, e);
            LoopStats::bump(&self.stats.io_faults);
        }
    }

    fn report_faults(&mut self) {
        for fault in self.hal.take_faults() {
            warn!("Transient I/O fault: {}", fault);
            LoopStats::bump(&self.stats.io_faults);
        }
    }
}
