//! Stand-in MAC engine.
//!
//! Runs the outward behaviour of a class A LoRaWAN device closely enough for
//! the driver loop and the HAL to be exercised end to end:
//! - reset checks the radio's silicon version and puts it to sleep,
//! - an uplink is framed (header, port, payload, zero MIC; no encryption)
//!   and written to the radio FIFO,
//! - the radio stays busy for the frame's time-on-air plus both receive
//!   windows, then `TxComplete` is raised,
//! - each band is closed after a transmission until its duty-cycle share of
//!   airtime has elapsed; queued uplinks wait for a free channel,
//! - an OTAA join raises `Joining`, then `Joined` after a fixed delay; the
//!   accepted join turns link-check validation back on and an uplink queued
//!   during the join waits until the run after `Joined` was delivered.
//!
//! Every radio access goes through the [`EnginePort`].

use super::{
    time_on_air_ms, AbpSession, Band, Channel, DataRate, Downlink, EngineError, MacEngine,
    MacEvent, ModulationParams, OtaaCredentials, UplinkJob,
};
use crate::clock;
use crate::hal::{BusSettings, EnginePort, HalError, Level, PinMode};
use log::{debug, info};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_VERSION: u8 = 0x42;
const SX1276_VERSION: u8 = 0x12;

const OPMODE_LORA_SLEEP: u8 = 0x80;
const OPMODE_LORA_TX: u8 = 0x83;

/// MHDR, DevAddr, FCtrl, FCnt, FPort and MIC around the payload.
const FRAME_OVERHEAD: usize = 13;

/// Timing and behaviour of the simulated network.
#[derive(Debug, Clone)]
pub struct SimulatedMacConfig {
    /// End of transmission to start of RX1; RX2 follows one second later.
    pub rx1_delay: Duration,
    /// How long a receive window stays open.
    pub rx_window: Duration,
    /// Join request to join accept.
    pub join_delay: Duration,
    /// Whether confirmed uplinks are acknowledged.
    pub ack_confirmed: bool,
    /// Settings for every radio register access.
    pub bus: BusSettings,
}

impl Default for SimulatedMacConfig {
    fn default() -> Self {
        Self {
            rx1_delay: Duration::from_secs(1),
            rx_window: Duration::from_millis(50),
            join_delay: Duration::from_secs(5),
            ack_confirmed: true,
            bus: BusSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinState {
    Idle,
    Requested { dev_addr: u32 },
    Pending { accept_at: u32, dev_addr: u32 },
}

#[derive(Debug)]
struct Transmission {
    confirmed: bool,
    done_at: u32,
}

/// Simulated MAC engine.
pub struct SimulatedMac {
    config: SimulatedMacConfig,
    dev_addr: Option<u32>,
    join: JoinState,
    channels: Vec<Channel>,
    next_channel: usize,
    band_free_at: HashMap<Band, u32>,
    data_rate: DataRate,
    tx_power_dbm: i8,
    rx2_data_rate: DataRate,
    link_check: bool,
    fcnt_up: u32,
    pending: Option<UplinkJob>,
    on_air: Option<Transmission>,
    downlinks: VecDeque<Downlink>,
    events: VecDeque<MacEvent>,
}

impl SimulatedMac {
    /// Engine in its post-reset state: no session, three EU868 join
    /// channels, SF7 at 14 dBm, link check on.
    pub fn new(config: SimulatedMacConfig) -> Self {
        Self {
            config,
            dev_addr: None,
            join: JoinState::Idle,
            channels: default_channels(),
            next_channel: 0,
            band_free_at: HashMap::new(),
            data_rate: DataRate::Sf7,
            tx_power_dbm: 14,
            rx2_data_rate: DataRate::Sf12,
            link_check: true,
            fcnt_up: 0,
            pending: None,
            on_air: None,
            downlinks: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Deliver `downlink` with the next transmit completion.
    pub fn queue_downlink(&mut self, downlink: Downlink) {
        self.downlinks.push_back(downlink);
    }

    /// Uplink frame counter.
    pub fn frame_counter(&self) -> u32 {
        self.fcnt_up
    }

    /// Whether link-check validation is on.
    pub fn link_check(&self) -> bool {
        self.link_check
    }

    /// Active channel plan.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Current uplink data rate and power.
    pub fn data_rate_and_power(&self) -> (DataRate, i8) {
        (self.data_rate, self.tx_power_dbm)
    }

    /// Data rate of the second receive window.
    pub fn rx2_data_rate(&self) -> DataRate {
        self.rx2_data_rate
    }

    /// Device address of the current session.
    pub fn dev_addr(&self) -> Option<u32> {
        self.dev_addr
    }

    fn read_register(&self, port: &mut dyn EnginePort, register: u8) -> u8 {
        let nss = port.radio_pins().nss;
        port.spi_begin_transaction(&self.config.bus);
        port.digital_write(nss, Level::Low);
        port.spi_transfer(register & 0x7F);
        let value = port.spi_transfer(0x00);
        port.spi_end_transaction();
        value
    }

    fn write_registers(&self, port: &mut dyn EnginePort, register: u8, data: &[u8]) {
        let nss = port.radio_pins().nss;
        port.spi_begin_transaction(&self.config.bus);
        port.digital_write(nss, Level::Low);
        port.spi_transfer(0x80 | register);
        for &byte in data {
            port.spi_transfer(byte);
        }
        port.spi_end_transaction();
    }

    fn frame(&self, dev_addr: u32, job: &UplinkJob) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + job.payload.len());
        frame.push(if job.confirmed { 0x80 } else { 0x40 });
        frame.extend_from_slice(&dev_addr.to_le_bytes());
        frame.push(0x00);
        frame.extend_from_slice(&(self.fcnt_up as u16).to_le_bytes());
        frame.push(job.port);
        frame.extend_from_slice(&job.payload);
        frame.extend_from_slice(&[0u8; 4]);
        frame
    }

    /// Next channel that carries the current data rate and whose band is open.
    fn free_channel(&mut self, now: u32) -> Option<Channel> {
        let count = self.channels.len();
        for offset in 0..count {
            let idx = (self.next_channel + offset) % count;
            let channel = self.channels[idx];
            if self.data_rate < channel.min_dr || self.data_rate > channel.max_dr {
                continue;
            }
            let open = self
                .band_free_at
                .get(&channel.band)
                .map_or(true, |&free_at| clock::is_due(now, free_at));
            if open {
                self.next_channel = (idx + 1) % count;
                return Some(channel);
            }
        }
        None
    }

    fn try_transmit(&mut self, port: &mut dyn EnginePort, now: u32) {
        if self.on_air.is_some() {
            return;
        }
        let Some(dev_addr) = self.dev_addr else {
            return;
        };
        let Some(job) = self.pending.take() else {
            return;
        };
        let Some(channel) = self.free_channel(now) else {
            self.pending = Some(job);
            return;
        };

        let frame = self.frame(dev_addr, &job);
        let airtime = time_on_air_ms(frame.len(), &ModulationParams::uplink(self.data_rate));

        self.write_registers(port, REG_FIFO, &frame);
        self.write_registers(port, REG_OP_MODE, &[OPMODE_LORA_TX]);
        let rxtx = port.radio_pins().rxtx;
        port.digital_write(rxtx, Level::High);

        let band_hold = (airtime as u64 * channel.band.duty_cycle_factor()).min(u32::MAX as u64 / 2);
        self.band_free_at
            .insert(channel.band, now.wrapping_add(band_hold as u32));

        let rx_end = self.config.rx1_delay + Duration::from_secs(1) + self.config.rx_window;
        let done_at = now
            .wrapping_add(airtime)
            .wrapping_add(rx_end.as_millis() as u32);
        info!(
            "TX {} bytes on {} Hz {:?} ({} ms on air, FCnt {})",
            frame.len(),
            channel.frequency_hz,
            self.data_rate,
            airtime,
            self.fcnt_up
        );
        self.fcnt_up = self.fcnt_up.wrapping_add(1);
        self.on_air = Some(Transmission {
            confirmed: job.confirmed,
            done_at,
        });
    }
}

impl Default for SimulatedMac {
    fn default() -> Self {
        Self::new(SimulatedMacConfig::default())
    }
}

/// EU868 default join channels.
fn default_channels() -> Vec<Channel> {
    [868_100_000, 868_300_000, 868_500_000]
        .iter()
        .enumerate()
        .map(|(index, &frequency_hz)| Channel {
            index: index as u8,
            frequency_hz,
            min_dr: DataRate::Sf12,
            max_dr: DataRate::Sf7,
            band: Band::Centi,
        })
        .collect()
}

impl MacEngine for SimulatedMac {
    fn reset(&mut self, port: &mut dyn EnginePort) -> Result<(), EngineError> {
        let pins = *port.radio_pins();
        port.pin_mode(pins.rst, PinMode::Output);
        port.digital_write(pins.rst, Level::Low);
        port.pin_mode(pins.rst, PinMode::Input);

        let version = self.read_register(port, REG_VERSION);
        if version != SX1276_VERSION {
            return Err(EngineError::Hal(HalError::Backend(format!(
                "unexpected radio version 0x{:02X}",
                version
            ))));
        }
        self.write_registers(port, REG_OP_MODE, &[OPMODE_LORA_SLEEP]);

        let config = std::mem::take(&mut self.config);
        *self = Self::new(config);
        debug!("Simulated MAC reset, radio version 0x{:02X}", version);
        Ok(())
    }

    fn set_session(&mut self, session: &AbpSession) {
        self.dev_addr = Some(session.dev_addr);
        self.join = JoinState::Idle;
        self.fcnt_up = 0;
    }

    fn start_join(&mut self, credentials: &OtaaCredentials) -> Result<(), EngineError> {
        if self.join != JoinState::Idle || self.on_air.is_some() {
            return Err(EngineError::Busy);
        }
        debug!("Join requested for DevEUI {:02X?}", credentials.dev_eui);
        // Joined address: 0x26 prefix and the low DevEUI bytes.
        let tail = u32::from_be_bytes([
            credentials.dev_eui[4],
            credentials.dev_eui[5],
            credentials.dev_eui[6],
            credentials.dev_eui[7],
        ]);
        self.dev_addr = None;
        self.join = JoinState::Requested {
            dev_addr: 0x2600_0000 | (tail & 0x00FF_FFFF),
        };
        Ok(())
    }

    fn setup_channel(&mut self, channel: &Channel) {
        match self.channels.iter_mut().find(|c| c.index == channel.index) {
            Some(existing) => *existing = *channel,
            None => self.channels.push(*channel),
        }
    }

    fn set_rx2_data_rate(&mut self, data_rate: DataRate) {
        self.rx2_data_rate = data_rate;
    }

    fn set_link_check_mode(&mut self, enabled: bool) {
        self.link_check = enabled;
    }

    fn set_data_rate_and_power(&mut self, data_rate: DataRate, power_dbm: i8) {
        self.data_rate = data_rate;
        self.tx_power_dbm = power_dbm;
    }

    fn queue_uplink(&mut self, _port: &mut dyn EnginePort, job: &UplinkJob) -> Result<(), EngineError> {
        if !(1..=223).contains(&job.port) {
            return Err(EngineError::InvalidPort(job.port));
        }
        let max = self.data_rate.max_payload();
        if job.payload.len() > max {
            return Err(EngineError::PayloadTooLarge {
                len: job.payload.len(),
                max,
            });
        }
        if self.is_busy() {
            return Err(EngineError::Busy);
        }
        self.pending = Some(job.clone());
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.pending.is_some() || self.on_air.is_some()
    }

    fn run_once(&mut self, port: &mut dyn EnginePort, on_event: &mut dyn FnMut(MacEvent)) {
        let now = port.now_millis();
        let pins = *port.radio_pins();
        // DIO lines are polled; the simulated radio never raises them.
        for dio in pins.dio {
            port.digital_read(dio);
        }

        let mut joined_now = false;
        match self.join {
            JoinState::Requested { dev_addr } => {
                self.join = JoinState::Pending {
                    accept_at: now.wrapping_add(self.config.join_delay.as_millis() as u32),
                    dev_addr,
                };
                self.events.push_back(MacEvent::Joining);
            }
            JoinState::Pending {
                accept_at,
                dev_addr,
            } if clock::is_due(now, accept_at) => {
                self.join = JoinState::Idle;
                self.dev_addr = Some(dev_addr);
                self.fcnt_up = 0;
                self.link_check = true;
                joined_now = true;
                self.events.push_back(MacEvent::Joined);
            }
            _ => {}
        }

        if let Some(tx) = &self.on_air {
            if clock::is_due(now, tx.done_at) {
                let ack = tx.confirmed && self.config.ack_confirmed;
                self.on_air = None;
                port.digital_write(pins.rxtx, Level::Low);
                self.write_registers(port, REG_OP_MODE, &[OPMODE_LORA_SLEEP]);
                self.events.push_back(MacEvent::TxComplete {
                    ack,
                    downlink: self.downlinks.pop_front(),
                });
            }
        }

        // Listeners reconfigure the session on Joined before anything is sent.
        if !joined_now {
            self.try_transmit(port, now);
        }

        while let Some(event) = self.events.pop_front() {
            on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hal::{ChipSelectSet, HostHal, Pin, RadioPins, SimBoard, SimGpio, SimSpi};

    type TestHal = HostHal<SimGpio, SimSpi, ManualClock>;

    fn setup() -> (SimulatedMac, TestHal, SimBoard, ManualClock) {
        let board = SimBoard::with_radio(8);
        let clock = ManualClock::new();
        let mut hal = HostHal::new(
            clock.clone(),
            board.gpio(),
            board.spi(),
            RadioPins {
                rxtx: Pin::new(24),
                ..Default::default()
            },
            ChipSelectSet::raspberry_pi(),
        );
        hal.init().unwrap();
        let mut mac = SimulatedMac::default();
        mac.reset(&mut hal).unwrap();
        (mac, hal, board, clock)
    }

    fn abp(mac: &mut SimulatedMac) {
        mac.set_session(&AbpSession {
            net_id: 1,
            dev_addr: 0x03FF_0001,
            nwk_skey: super::super::AesKey::new([0; 16]),
            app_skey: super::super::AesKey::new([0; 16]),
        });
    }

    fn hello() -> UplinkJob {
        UplinkJob {
            port: 1,
            payload: b"Hello, world!".to_vec(),
            confirmed: false,
        }
    }

    fn collect(mac: &mut SimulatedMac, hal: &mut TestHal) -> Vec<MacEvent> {
        let mut events = Vec::new();
        mac.run_once(hal, &mut |e| events.push(e));
        events
    }

    #[test]
    fn test_reset_checks_radio_version() {
        let (_, mut hal, board, _) = setup();
        assert_eq!(board.register(REG_OP_MODE), OPMODE_LORA_SLEEP);
        assert!(hal.take_faults().is_empty());
        assert_eq!(board.level(8), Level::High);
    }

    #[test]
    fn test_reset_fails_without_radio() {
        let board = SimBoard::with_radio(8);
        let mut hal = HostHal::new(
            ManualClock::new(),
            board.gpio(),
            board.spi(),
            RadioPins::default(),
            ChipSelectSet::raspberry_pi(),
        );
        // Bus never opened: every transfer faults and reads back zero.
        let mut mac = SimulatedMac::default();
        assert!(matches!(mac.reset(&mut hal), Err(EngineError::Hal(_))));
        assert!(!hal.take_faults().is_empty());
    }

    #[test]
    fn test_uplink_written_to_fifo_and_completes() {
        let (mut mac, mut hal, board, clock) = setup();
        abp(&mut mac);
        mac.queue_uplink(&mut hal, &hello()).unwrap();
        assert!(mac.is_busy());

        assert!(collect(&mut mac, &mut hal).is_empty());
        let fifo = board.fifo();
        assert_eq!(fifo.len(), 26);
        assert_eq!(fifo[0], 0x40);
        assert_eq!(&fifo[1..5], &0x03FF_0001u32.to_le_bytes());
        assert_eq!(fifo[8], 1);
        assert_eq!(&fifo[9..22], b"Hello, world!");
        assert_eq!(board.register(REG_OP_MODE), OPMODE_LORA_TX);
        assert_eq!(board.level(24), Level::High);
        assert_eq!(board.level(8), Level::High);

        // 62 ms on air, RX1 at +1 s, RX2 at +2 s, 50 ms window.
        clock.advance(Duration::from_millis(2_111));
        assert!(collect(&mut mac, &mut hal).is_empty());
        assert!(mac.is_busy());

        clock.advance(Duration::from_millis(1));
        let events = collect(&mut mac, &mut hal);
        assert_eq!(
            events,
            vec![MacEvent::TxComplete {
                ack: false,
                downlink: None
            }]
        );
        assert!(!mac.is_busy());
        assert_eq!(mac.frame_counter(), 1);
        assert_eq!(board.level(24), Level::Low);
    }

    #[test]
    fn test_busy_engine_refuses_second_uplink() {
        let (mut mac, mut hal, _, _) = setup();
        abp(&mut mac);
        mac.queue_uplink(&mut hal, &hello()).unwrap();
        assert!(matches!(mac.queue_uplink(&mut hal, &hello()), Err(EngineError::Busy)));
    }

    #[test]
    fn test_invalid_uplinks_rejected() {
        let (mut mac, mut hal, _, _) = setup();
        let mut job = hello();
        job.port = 0;
        assert!(matches!(mac.queue_uplink(&mut hal, &job), Err(EngineError::InvalidPort(0))));

        mac.set_data_rate_and_power(DataRate::Sf12, 14);
        let job = UplinkJob {
            port: 1,
            payload: vec![0; 52],
            confirmed: false,
        };
        assert!(matches!(
            mac.queue_uplink(&mut hal, &job),
            Err(EngineError::PayloadTooLarge { len: 52, max: 51 })
        ));
    }

    #[test]
    fn test_band_duty_cycle_delays_next_uplink() {
        let (mut mac, mut hal, board, clock) = setup();
        abp(&mut mac);
        let single = Channel {
            index: 0,
            frequency_hz: 868_100_000,
            min_dr: DataRate::Sf7,
            max_dr: DataRate::Sf7,
            band: Band::Centi,
        };
        mac.channels.clear();
        mac.setup_channel(&single);

        mac.queue_uplink(&mut hal, &hello()).unwrap();
        collect(&mut mac, &mut hal);
        clock.advance(Duration::from_millis(2_112));
        collect(&mut mac, &mut hal);
        assert!(!mac.is_busy());

        // 62 ms at 1% keeps the band closed for 6.2 s from the start.
        mac.queue_uplink(&mut hal, &hello()).unwrap();
        collect(&mut mac, &mut hal);
        assert_eq!(board.fifo().len(), 26);

        clock.advance(Duration::from_millis(6_200 - 2_112));
        collect(&mut mac, &mut hal);
        assert_eq!(board.fifo().len(), 52);
    }

    #[test]
    fn test_confirmed_uplink_acknowledged_with_downlink() {
        let (mut mac, mut hal, _, clock) = setup();
        abp(&mut mac);
        mac.queue_downlink(Downlink {
            port: 2,
            payload: vec![0xAA, 0xBB],
        });
        let mut job = hello();
        job.confirmed = true;
        mac.queue_uplink(&mut hal, &job).unwrap();
        collect(&mut mac, &mut hal);
        clock.advance(Duration::from_secs(3));
        let events = collect(&mut mac, &mut hal);
        assert_eq!(
            events,
            vec![MacEvent::TxComplete {
                ack: true,
                downlink: Some(Downlink {
                    port: 2,
                    payload: vec![0xAA, 0xBB]
                })
            }]
        );
    }

    #[test]
    fn test_otaa_join_then_transmit() {
        let (mut mac, mut hal, board, clock) = setup();
        mac.start_join(&OtaaCredentials {
            dev_eui: [1, 2, 3, 4, 5, 6, 7, 8],
            app_eui: [0; 8],
            app_key: super::super::AesKey::new([0; 16]),
        })
        .unwrap();
        mac.queue_uplink(&mut hal, &hello()).unwrap();

        assert_eq!(collect(&mut mac, &mut hal), vec![MacEvent::Joining]);
        assert!(board.fifo().is_empty());

        clock.advance(Duration::from_secs(5));
        assert_eq!(collect(&mut mac, &mut hal), vec![MacEvent::Joined]);
        assert_eq!(mac.dev_addr(), Some(0x2606_0708));
        assert!(board.fifo().is_empty());

        assert!(collect(&mut mac, &mut hal).is_empty());
        assert_eq!(board.fifo().len(), 26);
    }

    #[test]
    fn test_join_accept_enables_link_check() {
        let (mut mac, mut hal, _, clock) = setup();
        mac.set_link_check_mode(false);
        mac.start_join(&OtaaCredentials {
            dev_eui: [0; 8],
            app_eui: [0; 8],
            app_key: super::super::AesKey::new([0; 16]),
        })
        .unwrap();
        collect(&mut mac, &mut hal);
        assert!(!mac.link_check());

        clock.advance(Duration::from_secs(5));
        collect(&mut mac, &mut hal);
        assert!(mac.link_check());
    }

    #[test]
    fn test_reset_restores_defaults() {
        let (mut mac, mut hal, _, _) = setup();
        mac.set_link_check_mode(false);
        mac.set_rx2_data_rate(DataRate::Sf9);
        mac.reset(&mut hal).unwrap();
        assert!(mac.link_check());
        assert_eq!(mac.rx2_data_rate(), DataRate::Sf12);
        assert_eq!(mac.channels().len(), 3);
        assert_eq!(mac.dev_addr(), None);
    }
}
