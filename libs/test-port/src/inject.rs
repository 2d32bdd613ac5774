//! On-board signal-injection driver.
//!
//! Maps a requested RMS primary current onto the generator's DAC drive
//! using the calibrated linear models. Small and mid currents use the
//! sine model (a cosine of computed amplitude around the calibrated
//! midpoint); when the sine drive would clip the DAC, or the request
//! exceeds the sine model's validated range, the driver falls back to a
//! pure DC drive. The integrator gain is much higher for DC, so the DC
//! model is driven at one third of the requested current to stay inside
//! its fitted range, scaled by the breaker frame factor.
//!
//! An invalid request (bad channel, non-positive or unproducible current)
//! while injection is running performs a clean shutdown request instead
//! of being ignored, so the generator is never stranded active.

use tripunit_cal_format::InjCal;

use crate::hw::InjectionControl;

/// Highest current the sine model is validated for.
pub const MAX_SINE_CURRENT: f32 = 65_000.0;
/// Full-scale DAC code.
pub const DAC_MAX: f32 = 4095.0;
/// DC-model drive reduction keeping the integrator inside its fitted range.
pub const DC_GAIN_REDUCTION: f32 = 1.0 / 3.0;
/// Extra DC scaling on the override-micro trip path, whose DAC reference
/// differs from the protection processor's.
pub const OVR_DC_SCALE: f32 = 1.5;

/// Highest injection channel on the protection-processor trip path
/// (0-3 phases, 4 ground).
pub const PROT_PATH_MAX_CHANNEL: u8 = 4;
/// The override-micro path has no ground channel.
pub const OVR_PATH_MAX_CHANNEL: u8 = 3;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Sine drive active.
    Sine,
    /// DC fallback drive active.
    Dc,
    /// Invalid request while active: clean shutdown requested.
    Off,
    /// Invalid request while idle: dropped.
    Rejected,
}

/// Driver state for the test-signal generator.
pub struct Injector {
    active: bool,
    /// Breaker-frame DC scale factor, fixed per unit.
    frame_dc_scale: f32,
    last_amplitude: f32,
    last_midpoint: f32,
    last_channel: u8,
}

impl Injector {
    pub fn new(frame_dc_scale: f32) -> Self {
        Self {
            active: false,
            frame_dc_scale,
            last_amplitude: 0.0,
            last_midpoint: 0.0,
            last_channel: 0,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn drive(&self) -> (f32, f32, u8) {
        (self.last_amplitude, self.last_midpoint, self.last_channel)
    }

    /// Request injection through the protection-processor trip path.
    pub fn request(
        &mut self,
        cal: &InjCal,
        hw: &mut impl InjectionControl,
        channel: u8,
        amps: f32,
    ) -> InjectOutcome {
        self.request_scaled(cal, hw, channel, amps, PROT_PATH_MAX_CHANNEL, 1.0)
    }

    /// Request injection through the independent override-micro trip path.
    pub fn request_override(
        &mut self,
        cal: &InjCal,
        hw: &mut impl InjectionControl,
        channel: u8,
        amps: f32,
    ) -> InjectOutcome {
        self.request_scaled(cal, hw, channel, amps, OVR_PATH_MAX_CHANNEL, OVR_DC_SCALE)
    }

    fn request_scaled(
        &mut self,
        cal: &InjCal,
        hw: &mut impl InjectionControl,
        channel: u8,
        amps: f32,
        max_channel: u8,
        dc_scale: f32,
    ) -> InjectOutcome {
        if channel > max_channel || amps <= 0.0 {
            return self.reject(hw);
        }

        let idx = channel as usize;
        let midpoint = if channel < 4 {
            cal.midpoint_ph
        } else {
            cal.midpoint_gnd
        };

        let amplitude = cal.m_sine[idx] * amps + cal.b_sine[idx];
        let sine_fits =
            amps <= MAX_SINE_CURRENT && amplitude > 0.0 && amplitude + midpoint <= DAC_MAX;

        if sine_fits {
            hw.set_waveform(amplitude, midpoint);
            // Low currents need the low-current integrator constant.
            hw.enable(channel, true);
            self.activate(amplitude, midpoint, channel);
            return InjectOutcome::Sine;
        }

        // DC fallback: reduced drive, frame-scaled.
        let reduced = amps * DC_GAIN_REDUCTION * dc_scale * self.frame_dc_scale;
        let code = cal.m_dc[idx] * reduced + cal.b_dc[idx];
        if code <= 0.0 || code > DAC_MAX {
            return self.reject(hw);
        }
        hw.set_waveform(0.0, code);
        hw.enable(channel, false);
        self.activate(0.0, code, channel);
        InjectOutcome::Dc
    }

    /// Operator- or dispatcher-initiated shutdown.
    pub fn shutdown(&mut self, hw: &mut impl InjectionControl) {
        if self.active {
            hw.request_disable();
            self.active = false;
        }
    }

    fn activate(&mut self, amplitude: f32, midpoint: f32, channel: u8) {
        self.last_amplitude = amplitude;
        self.last_midpoint = midpoint;
        self.last_channel = channel;
        self.active = true;
    }

    fn reject(&mut self, hw: &mut impl InjectionControl) -> InjectOutcome {
        if self.active {
            info!("invalid injection request while active: shutting down");
            hw.request_disable();
            self.active = false;
            return InjectOutcome::Off;
        }
        InjectOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHardware;

    fn calibrated() -> InjCal {
        let mut cal = InjCal::default_block();
        cal.midpoint_ph = 2400.0;
        cal.midpoint_gnd = 2410.0;
        for i in 0..5 {
            cal.m_sine[i] = 0.025;
            cal.b_sine[i] = 0.0;
            cal.m_dc[i] = 0.5;
            cal.b_dc[i] = 2400.0;
        }
        cal.seal();
        cal
    }

    #[test]
    fn small_current_uses_sine_model() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);

        let outcome = inj.request(&cal, &mut hw, 0, 1000.0);
        assert_eq!(outcome, InjectOutcome::Sine);
        assert!(hw.inj.active);
        assert_eq!(hw.inj.amplitude, 25.0);
        assert_eq!(hw.inj.midpoint, 2400.0);
        assert!(hw.inj.low_current);
    }

    #[test]
    fn ground_channel_uses_ground_midpoint() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);
        assert_eq!(inj.request(&cal, &mut hw, 4, 400.0), InjectOutcome::Sine);
        assert_eq!(hw.inj.midpoint, 2410.0);
    }

    #[test]
    fn unproducible_fallback_while_active_shuts_down() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);

        // 24 kA: amplitude 600 around 2400 fits the DAC.
        assert_eq!(inj.request(&cal, &mut hw, 1, 24_000.0), InjectOutcome::Sine);

        // 70 kA exceeds the sine range and the DC code (0.5 * 70000/3 +
        // 2400) clips the DAC, so the active drive is shut down cleanly.
        assert_eq!(inj.request(&cal, &mut hw, 1, 70_000.0), InjectOutcome::Off);
        assert!(!hw.inj.active);
    }

    #[test]
    fn over_range_current_uses_dc_model() {
        let mut cal = calibrated();
        // Keep the DC code inside the DAC for 70 kA / 3.
        for i in 0..5 {
            cal.m_dc[i] = 0.05;
            cal.b_dc[i] = 2400.0;
        }
        cal.seal();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);

        let outcome = inj.request(&cal, &mut hw, 1, 70_000.0);
        assert_eq!(outcome, InjectOutcome::Dc);
        assert_eq!(hw.inj.amplitude, 0.0);
        let expected = 0.05 * (70_000.0 / 3.0) + 2400.0;
        assert!((hw.inj.midpoint - expected).abs() < 0.5);
        assert!(!hw.inj.low_current);
    }

    #[test]
    fn invalid_request_while_active_shuts_down() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);

        assert_eq!(inj.request(&cal, &mut hw, 0, 1000.0), InjectOutcome::Sine);
        assert!(hw.inj.active);
        assert_eq!(inj.request(&cal, &mut hw, 0, 0.0), InjectOutcome::Off);
        assert!(!hw.inj.active);
        assert!(!inj.active());
    }

    #[test]
    fn invalid_request_while_idle_is_dropped() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);
        assert_eq!(inj.request(&cal, &mut hw, 9, 100.0), InjectOutcome::Rejected);
        assert_eq!(inj.request(&cal, &mut hw, 0, -5.0), InjectOutcome::Rejected);
        assert!(!hw.inj.active);
    }

    #[test]
    fn uncalibrated_models_cannot_inject() {
        let cal = InjCal::default_block(); // zeroed models
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);
        assert_eq!(inj.request(&cal, &mut hw, 0, 1000.0), InjectOutcome::Rejected);
    }

    #[test]
    fn override_path_rejects_ground_channel() {
        let cal = calibrated();
        let mut hw = SimHardware::new();
        let mut inj = Injector::new(1.0);
        assert_eq!(
            inj.request_override(&cal, &mut hw, 4, 100.0),
            InjectOutcome::Rejected
        );
        assert_eq!(
            inj.request_override(&cal, &mut hw, 2, 100.0),
            InjectOutcome::Sine
        );
    }
}
