//! Fixed hardware calibration constants.
//!
//! The front-end board exposes a 10-bit DAC/ADC pair referenced to 3.3 V.
//! Channel 1 sits behind a 1:3 voltage divider across the cell and channel 2
//! measures the drop over a 4.7 Ω shunt. None of these values are fitted at
//! runtime; they are the linear scale factors determined for the hardware.

use serde::{Deserialize, Serialize};

/// Integer index into the discretized output range.
pub type Level = u32;

/// Analog input channel number on the instrument.
pub type Channel = u8;

/// Channel across the cell (behind the voltage divider).
pub const VOLTAGE_CHANNEL: Channel = 1;
/// Channel across the current-sense resistor.
pub const CURRENT_CHANNEL: Channel = 2;

/// Resistance reported for a sample whose current reading is exactly zero.
pub const SENTINEL_RESISTANCE_OHM: f64 = 5000.0;

/// Linear scale factors converting raw channel voltages into physical quantities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Divider ratio on channel 1 (`U_pv = scale_v * U_1`).
    pub scale_v: f64,
    /// Shunt resistance on channel 2 in ohms (`I_pv = U_2 / r_shunt`).
    pub r_shunt: f64,
    /// Factor `k` in the per-sample resistance `U_1 * k / U_2`.
    pub resistance_factor: f64,
    /// Resistance substituted when a per-sample denominator is zero.
    pub sentinel_resistance: f64,
    /// Series resistor used by the diode (LED) front end, in ohms.
    pub r_series: f64,
    /// Output voltage at `max_level`.
    pub full_scale_voltage: f64,
    /// Highest valid output level (exclusive upper bound of a sweep is `max_level`).
    pub max_level: Level,
    /// Number of ADC counts spanning `full_scale_voltage` on the inputs.
    pub adc_levels: u32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale_v: 3.0,
            r_shunt: 4.7,
            resistance_factor: 14.1,
            sentinel_resistance: SENTINEL_RESISTANCE_OHM,
            r_series: 220.0,
            full_scale_voltage: 3.3,
            max_level: 1023,
            adc_levels: 1023,
        }
    }
}

impl Calibration {
    /// Nominal output voltage for a level: `level * full_scale / max_level`.
    pub fn drive_voltage(&self, level: Level) -> f64 {
        f64::from(level) * self.full_scale_voltage / f64::from(self.max_level)
    }

    /// Nearest level for a requested output voltage, clamped to the valid range.
    pub fn level_for_voltage(&self, volts: f64) -> Level {
        if !volts.is_finite() || volts <= 0.0 {
            return 0;
        }
        let level = (volts * f64::from(self.max_level) / self.full_scale_voltage).round();
        if level >= f64::from(self.max_level) {
            self.max_level
        } else {
            level as Level
        }
    }

    /// Convert a raw ADC count into volts at the input pin.
    pub fn adc_to_volts(&self, counts: f64) -> f64 {
        counts * self.full_scale_voltage / f64::from(self.adc_levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_voltage_spans_full_scale() {
        let cal = Calibration::default();
        assert_eq!(cal.drive_voltage(0), 0.0);
        assert!((cal.drive_voltage(1023) - 3.3).abs() < 1e-12);
        assert!(cal.drive_voltage(10) < cal.drive_voltage(11));
    }

    #[test]
    fn level_for_voltage_rounds_and_clamps() {
        let cal = Calibration::default();
        assert_eq!(cal.level_for_voltage(0.0), 0);
        assert_eq!(cal.level_for_voltage(-1.0), 0);
        assert_eq!(cal.level_for_voltage(1.0), 310);
        assert_eq!(cal.level_for_voltage(3.3), 1023);
        assert_eq!(cal.level_for_voltage(10.0), 1023);
        assert_eq!(cal.level_for_voltage(f64::NAN), 0);
    }

    #[test]
    fn adc_counts_scale_to_reference() {
        let cal = Calibration::default();
        assert!((cal.adc_to_volts(1023.0) - 3.3).abs() < 1e-12);
        assert_eq!(cal.adc_to_volts(0.0), 0.0);
    }
}
