//! Conversion of raw channel voltages into physical quantities.
//!
//! Everything here is pure and total over finite inputs. Power and resistance
//! are evaluated per reading pair and reduced afterwards, never from the
//! reduced means, so their spread reflects the nonlinear combination.

use crate::calibration::{Calibration, Level};
use crate::config::ModelKind;
use crate::sweep::reducer::{RawBatch, ReducedSample};
use crate::sweep::series::DerivedRecord;
use chrono::Utc;

/// Maps one level's raw readings to a [`DerivedRecord`].
pub trait QuantityModel: Send + Sync {
    /// Short name used in logs and exports
    fn name(&self) -> &'static str;

    /// Derive the record for `level` from its batch.
    fn derive(&self, level: Level, batch: &RawBatch) -> DerivedRecord;

    /// Whether a completed sweep carries a fill factor.
    fn reports_fill_factor(&self) -> bool {
        true
    }
}

/// Build the model selected in configuration.
pub fn model_for(kind: ModelKind, calibration: Calibration) -> Box<dyn QuantityModel> {
    match kind {
        ModelKind::Photovoltaic => Box::new(PhotovoltaicModel::new(calibration)),
        ModelKind::Diode => Box::new(DiodeModel::new(calibration)),
    }
}

/// `numerator * factor / denominator`, or `sentinel` when the denominator is exactly zero.
pub fn ratio_or_sentinel(numerator: f64, denominator: f64, factor: f64, sentinel: f64) -> f64 {
    if denominator == 0.0 {
        sentinel
    } else {
        numerator * factor / denominator
    }
}

/// Cell voltage from the divider channel.
pub fn voltage_pv(cal: &Calibration, channel_1: &ReducedSample) -> ReducedSample {
    channel_1.scaled(cal.scale_v)
}

/// Cell current from the shunt channel.
pub fn current_pv(cal: &Calibration, channel_2: &ReducedSample) -> ReducedSample {
    channel_2.scaled(1.0 / cal.r_shunt)
}

/// Per-sample `U_1 * k / U_2`, reduced across the batch.
pub fn resistance(cal: &Calibration, batch: &RawBatch) -> ReducedSample {
    let per_sample: Vec<f64> = batch
        .pairs()
        .map(|(u1, u2)| {
            ratio_or_sentinel(u1, u2, cal.resistance_factor, cal.sentinel_resistance)
        })
        .collect();
    ReducedSample::from_samples(&per_sample)
}

/// Per-sample `U_1 * U_2`, reduced across the batch.
pub fn power(batch: &RawBatch) -> ReducedSample {
    let per_sample: Vec<f64> = batch.pairs().map(|(u1, u2)| u1 * u2).collect();
    ReducedSample::from_samples(&per_sample)
}

/// Solar cell front end: channel 1 behind a 1:3 divider, channel 2 over the shunt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhotovoltaicModel {
    calibration: Calibration,
}

impl PhotovoltaicModel {
    /// Model with the given hardware constants.
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }
}

impl QuantityModel for PhotovoltaicModel {
    fn name(&self) -> &'static str {
        "photovoltaic"
    }

    fn derive(&self, level: Level, batch: &RawBatch) -> DerivedRecord {
        let cal = &self.calibration;
        let u = voltage_pv(cal, &ReducedSample::from_samples(&batch.voltage));
        let i = current_pv(cal, &ReducedSample::from_samples(&batch.current));
        let r = resistance(cal, batch);
        let p = power(batch);

        DerivedRecord {
            level,
            drive_voltage: cal.drive_voltage(level),
            voltage_pv: u.mean,
            voltage_err: u.std,
            current_pv: i.mean,
            current_err: i.std,
            resistance: r.mean,
            resistance_err: r.std,
            power: p.mean,
            power_err: p.std,
            samples: batch.len(),
            acquired_at: Utc::now(),
        }
    }
}

/// LED front end: channel 1 over LED plus series resistor, channel 2 over the resistor.
///
/// The LED voltage `U_1 - U_2` and current `U_2 / R_series` are formed per
/// reading, so their spread includes the correlation between the channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiodeModel {
    calibration: Calibration,
}

impl DiodeModel {
    /// Model with the given hardware constants.
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }
}

impl QuantityModel for DiodeModel {
    fn name(&self) -> &'static str {
        "diode"
    }

    fn reports_fill_factor(&self) -> bool {
        false
    }

    fn derive(&self, level: Level, batch: &RawBatch) -> DerivedRecord {
        let cal = &self.calibration;
        let (led_u, led_i): (Vec<f64>, Vec<f64>) = batch
            .pairs()
            .map(|(u1, u2)| (u1 - u2, u2 / cal.r_series))
            .unzip();
        let resistance: Vec<f64> = led_u
            .iter()
            .zip(&led_i)
            .map(|(&u, &i)| ratio_or_sentinel(u, i, 1.0, cal.sentinel_resistance))
            .collect();
        let power: Vec<f64> = led_u.iter().zip(&led_i).map(|(u, i)| u * i).collect();

        let u = ReducedSample::from_samples(&led_u);
        let i = ReducedSample::from_samples(&led_i);
        let r = ReducedSample::from_samples(&resistance);
        let p = ReducedSample::from_samples(&power);

        DerivedRecord {
            level,
            drive_voltage: cal.drive_voltage(level),
            voltage_pv: u.mean,
            voltage_err: u.std,
            current_pv: i.mean,
            current_err: i.std,
            resistance: r.mean,
            resistance_err: r.std,
            power: p.mean,
            power_err: p.std,
            samples: batch.len(),
            acquired_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(pairs: &[(f64, f64)]) -> RawBatch {
        let mut b = RawBatch::with_capacity(pairs.len());
        for &(u1, u2) in pairs {
            b.push(u1, u2);
        }
        b
    }

    #[test]
    fn pv_scales_means_and_errors() {
        let model = PhotovoltaicModel::new(Calibration::default());
        let rec = model.derive(0, &batch(&[(1.0, 0.47), (1.0, 0.47)]));
        assert_eq!(rec.voltage_pv, 3.0);
        assert_eq!(rec.voltage_err, 0.0);
        assert!((rec.current_pv - 0.1).abs() < 1e-12);
        assert_eq!(rec.current_err, 0.0);
        assert_eq!(rec.samples, 2);
    }

    #[test]
    fn power_is_reduced_per_sample() {
        // mean(u1) * mean(u2) = 1.5 * 1.5 = 2.25, but the per-sample products are 1 and 4.
        let p = power(&batch(&[(1.0, 1.0), (2.0, 2.0)]));
        assert_eq!(p.mean, 2.5);
        assert_eq!(p.std, 1.5);
    }

    #[test]
    fn resistance_is_reduced_per_sample() {
        let cal = Calibration::default();
        let r = resistance(&cal, &batch(&[(1.0, 1.0), (1.0, 2.0)]));
        let expected = (14.1 + 7.05) / 2.0;
        assert!((r.mean - expected).abs() < 1e-12);
        assert!((r.std - 3.525).abs() < 1e-12);
    }

    #[test]
    fn zero_current_sample_uses_sentinel() {
        let cal = Calibration::default();
        let all_zero = resistance(&cal, &batch(&[(0.5, 0.0), (0.7, 0.0)]));
        assert_eq!(all_zero.mean, 5000.0);
        assert_eq!(all_zero.std, 0.0);

        let mixed = resistance(&cal, &batch(&[(1.0, 0.0), (1.0, 1.0)]));
        let expected_mean = (5000.0 + 14.1) / 2.0;
        assert!((mixed.mean - expected_mean).abs() < 1e-9);
        assert!((mixed.std - (5000.0 - 14.1) / 2.0).abs() < 1e-9);
        assert!(mixed.mean.is_finite());
    }

    #[test]
    fn ratio_handles_negative_zero() {
        assert_eq!(ratio_or_sentinel(1.0, -0.0, 2.0, 42.0), 42.0);
        assert_eq!(ratio_or_sentinel(1.0, 0.5, 2.0, 42.0), 4.0);
    }

    #[test]
    fn drive_voltage_follows_level() {
        let model = PhotovoltaicModel::new(Calibration::default());
        let low = model.derive(100, &batch(&[(0.0, 0.0)]));
        let high = model.derive(101, &batch(&[(0.0, 0.0)]));
        assert!(low.drive_voltage < high.drive_voltage);
        assert!((high.drive_voltage - 101.0 * 3.3 / 1023.0).abs() < 1e-12);
    }

    #[test]
    fn diode_subtracts_resistor_drop() {
        let model = DiodeModel::new(Calibration::default());
        let rec = model.derive(5, &batch(&[(2.2, 0.22), (2.2, 0.22)]));
        assert!((rec.voltage_pv - 1.98).abs() < 1e-12);
        assert!((rec.current_pv - 0.001).abs() < 1e-12);
        assert!((rec.resistance - 1980.0).abs() < 1e-6);
        assert_eq!(model.name(), "diode");
    }

    #[test]
    fn diode_dark_led_uses_sentinel() {
        let model = DiodeModel::new(Calibration::default());
        let rec = model.derive(0, &batch(&[(0.3, 0.0)]));
        assert_eq!(rec.current_pv, 0.0);
        assert_eq!(rec.resistance, 5000.0);
        assert_eq!(rec.power, 0.0);
    }

    #[test]
    fn factory_selects_model() {
        let cal = Calibration::default();
        assert_eq!(model_for(ModelKind::Photovoltaic, cal).name(), "photovoltaic");
        assert_eq!(model_for(ModelKind::Diode, cal).name(), "diode");
        assert!(model_for(ModelKind::Photovoltaic, cal).reports_fill_factor());
        assert!(!model_for(ModelKind::Diode, cal).reports_fill_factor());
    }
}
