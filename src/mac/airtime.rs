//! LoRa time-on-air.
//!
//! Semtech formula (SX1276 datasheet, section 4.1.1.7) for the duration of a
//! frame given its PHY payload length and modulation. Used by the simulated
//! engine to hold the radio busy and to charge band duty cycle.

use super::DataRate;

/// Modulation parameters that determine time-on-air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationParams {
    /// Spreading factor (7-12).
    pub spreading_factor: u8,
    /// Bandwidth in Hz.
    pub bandwidth_hz: u32,
    /// Coding rate denominator (5-8 for 4/5 to 4/8).
    pub coding_rate: u8,
    /// Preamble length in symbols.
    pub preamble_symbols: u8,
    pub explicit_header: bool,
    pub crc_enabled: bool,
}

impl ModulationParams {
    /// LoRaWAN uplink modulation for `data_rate`: 125 kHz, 4/5, 8-symbol
    /// preamble, explicit header, CRC on.
    pub fn uplink(data_rate: DataRate) -> Self {
        Self {
            spreading_factor: data_rate.spreading_factor(),
            bandwidth_hz: 125_000,
            coding_rate: 5,
            preamble_symbols: 8,
            explicit_header: true,
            crc_enabled: true,
        }
    }

    /// Symbol duration in microseconds.
    pub fn symbol_duration_us(&self) -> u64 {
        if self.bandwidth_hz == 0 {
            return 0;
        }
        (1u64 << self.spreading_factor) * 1_000_000 / self.bandwidth_hz as u64
    }

    /// Low data rate optimisation is mandated above 16 ms per symbol.
    pub fn low_data_rate_optimize(&self) -> bool {
        self.symbol_duration_us() > 16_000
    }
}

/// Time-on-air of a frame with `phy_len` bytes, in microseconds.
pub fn time_on_air_us(phy_len: usize, params: &ModulationParams) -> u64 {
    let sf = params.spreading_factor as f64;
    let bw = params.bandwidth_hz as f64;
    if bw == 0.0 {
        return 0;
    }

    let t_sym_us = 2.0_f64.powf(sf) * 1_000_000.0 / bw;
    let t_preamble_us = (params.preamble_symbols as f64 + 4.25) * t_sym_us;

    let de = if params.low_data_rate_optimize() { 1.0 } else { 0.0 };
    let ih = if params.explicit_header { 0.0 } else { 1.0 };
    let crc = if params.crc_enabled { 16.0 } else { 0.0 };

    // 8*PL - 4*SF + 28 + 16*CRC - 20*IH over 4*(SF - 2*DE)
    let numerator = 8.0 * phy_len as f64 - 4.0 * sf + 28.0 + crc - 20.0 * ih;
    let denominator = 4.0 * (sf - 2.0 * de);
    let payload_symbols = if denominator > 0.0 {
        8.0 + (numerator / denominator).ceil().max(0.0) * params.coding_rate as f64
    } else {
        8.0
    };

    (t_preamble_us + payload_symbols * t_sym_us) as u64
}

/// Time-on-air in whole milliseconds, rounded up.
pub fn time_on_air_ms(phy_len: usize, params: &ModulationParams) -> u32 {
    time_on_air_us(phy_len, params).div_ceil(1000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_durations() {
        assert_eq!(ModulationParams::uplink(DataRate::Sf7).symbol_duration_us(), 1024);
        assert_eq!(ModulationParams::uplink(DataRate::Sf12).symbol_duration_us(), 32768);
    }

    #[test]
    fn test_low_data_rate_optimize() {
        assert!(!ModulationParams::uplink(DataRate::Sf10).low_data_rate_optimize());
        assert!(ModulationParams::uplink(DataRate::Sf11).low_data_rate_optimize());
        assert!(ModulationParams::uplink(DataRate::Sf12).low_data_rate_optimize());
    }

    #[test]
    fn test_hello_world_frame_sf7() {
        // 13-byte payload plus 13 bytes of MAC header, port and MIC.
        let params = ModulationParams::uplink(DataRate::Sf7);
        assert_eq!(time_on_air_us(26, &params), 61_696);
        assert_eq!(time_on_air_ms(26, &params), 62);
    }

    #[test]
    fn test_airtime_grows_with_spreading_factor() {
        let mut last = 0;
        for dr in [
            DataRate::Sf7,
            DataRate::Sf8,
            DataRate::Sf9,
            DataRate::Sf10,
            DataRate::Sf11,
            DataRate::Sf12,
        ] {
            let airtime = time_on_air_us(26, &ModulationParams::uplink(dr));
            assert!(airtime > last, "{:?}: {} <= {}", dr, airtime, last);
            last = airtime;
        }
        assert!(last > 1_000_000);
    }

    #[test]
    fn test_zero_bandwidth_is_safe() {
        let params = ModulationParams {
            bandwidth_hz: 0,
            ..ModulationParams::uplink(DataRate::Sf7)
        };
        assert_eq!(time_on_air_us(26, &params), 0);
    }
}
