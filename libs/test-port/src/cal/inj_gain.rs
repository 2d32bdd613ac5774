//! Signal-injection gain calibration: two-point fit of the linear model
//! mapping a requested RMS primary current to a DAC code.
//!
//! Preconditions (operator procedure, not enforced here): injection
//! offset calibration is valid and no current source is connected to the
//! channel under test.
//!
//! Two fixed drive points are measured: for the sine model amplitudes 100
//! and 1600 around the calibrated midpoint, for the DC model midpoints
//! 2550 and 4000. Each point settles 50 x 200 ms (10 s) before 100
//! one-cycle readings are averaged (first discarded). The slope solves
//! `m = span / (B - A)` with the drive-code span (1500 sine, 1450 DC) and
//! the intercept pins the low drive point: `b = low - m * A`.

use super::{Step, CAL_REPS};
use crate::hw::{Channel, Hardware};
use crate::store::CalRam;

pub const SINE_LOW_AMPLITUDE: f32 = 100.0;
pub const SINE_HIGH_AMPLITUDE: f32 = 1600.0;
pub const SINE_SPAN: f32 = 1500.0;

pub const DC_LOW_MIDPOINT: f32 = 2550.0;
pub const DC_HIGH_MIDPOINT: f32 = 4000.0;
pub const DC_SPAN: f32 = 1450.0;

/// 200 ms periods per settle: 10 seconds.
const SETTLE_PERIODS: u16 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    StartLow,
    SettleLow,
    DiscardLow,
    AccumLow,
    StartHigh,
    SettleHigh,
    DiscardHigh,
    AccumHigh,
    Off,
    Restore,
}

pub struct InjGainCal {
    state: State,
    channel: u8,
    sine: bool,
    settle: u16,
    sum: f32,
    reads: u16,
    low_average: f32,
    failed: bool,
}

impl InjGainCal {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            channel: 0,
            sine: true,
            settle: 0,
            sum: 0.0,
            reads: 0,
            low_average: 0.0,
            failed: false,
        }
    }

    pub fn idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Arm a fit for injection channel 0..=4.
    pub fn start(&mut self, channel: u8, sine: bool) -> bool {
        if channel > 4 {
            return false;
        }
        self.channel = channel;
        self.sine = sine;
        self.failed = false;
        self.state = State::StartLow;
        true
    }

    fn midpoint(&self, cal: &CalRam) -> f32 {
        if self.channel < 4 {
            cal.inj.midpoint_ph
        } else {
            cal.inj.midpoint_gnd
        }
    }

    fn drive(&self, cal: &CalRam, hw: &mut impl Hardware, high: bool) {
        if self.sine {
            let amplitude = if high {
                SINE_HIGH_AMPLITUDE
            } else {
                SINE_LOW_AMPLITUDE
            };
            hw.set_waveform(amplitude, self.midpoint(cal));
        } else {
            let midpoint = if high { DC_HIGH_MIDPOINT } else { DC_LOW_MIDPOINT };
            hw.set_waveform(0.0, midpoint);
        }
    }

    fn measured(&self, hw: &impl Hardware) -> f32 {
        let ch = Channel::from_code(self.channel).unwrap_or(Channel::Ia);
        hw.one_cycle_rms(ch)
    }

    pub fn poll(&mut self, cal: &mut CalRam, hw: &mut impl Hardware) -> Step {
        match self.state {
            State::Idle => Step::Done,
            State::StartLow => {
                hw.set_protection(false);
                self.drive(cal, hw, false);
                // Low-current integrator constant only for the sine drive.
                hw.enable(self.channel, self.sine);
                self.settle = SETTLE_PERIODS;
                self.state = State::SettleLow;
                Step::Busy
            }
            State::SettleLow => {
                if hw.filt200_ready() {
                    self.settle -= 1;
                    if self.settle == 0 {
                        self.state = State::DiscardLow;
                    }
                }
                Step::Busy
            }
            State::DiscardLow => {
                if hw.one_cycle_ready() {
                    self.sum = 0.0;
                    self.reads = 0;
                    self.state = State::AccumLow;
                }
                Step::Busy
            }
            State::AccumLow => {
                if !hw.one_cycle_ready() {
                    return Step::Busy;
                }
                self.sum += self.measured(hw);
                self.reads += 1;
                if self.reads == CAL_REPS {
                    self.low_average = self.sum / CAL_REPS as f32;
                    self.state = State::StartHigh;
                }
                Step::Busy
            }
            State::StartHigh => {
                self.drive(cal, hw, true);
                self.settle = SETTLE_PERIODS;
                self.state = State::SettleHigh;
                Step::Busy
            }
            State::SettleHigh => {
                if hw.filt200_ready() {
                    self.settle -= 1;
                    if self.settle == 0 {
                        self.state = State::DiscardHigh;
                    }
                }
                Step::Busy
            }
            State::DiscardHigh => {
                if hw.one_cycle_ready() {
                    self.sum = 0.0;
                    self.reads = 0;
                    self.state = State::AccumHigh;
                }
                Step::Busy
            }
            State::AccumHigh => {
                if !hw.one_cycle_ready() {
                    return Step::Busy;
                }
                self.sum += self.measured(hw);
                self.reads += 1;
                if self.reads == CAL_REPS {
                    let high_average = self.sum / CAL_REPS as f32;
                    self.solve(cal, high_average);
                    hw.request_disable();
                    self.state = State::Off;
                }
                Step::Busy
            }
            State::Off => {
                if !hw.is_active() {
                    self.state = State::Restore;
                }
                Step::Busy
            }
            State::Restore => {
                if hw.one_cycle_ready() {
                    hw.set_protection(true);
                    self.state = State::Idle;
                    return if self.failed { Step::Failed } else { Step::Done };
                }
                Step::Busy
            }
        }
    }

    fn solve(&mut self, cal: &mut CalRam, high_average: f32) {
        let span = if self.sine { SINE_SPAN } else { DC_SPAN };
        let low = if self.sine {
            SINE_LOW_AMPLITUDE
        } else {
            DC_LOW_MIDPOINT
        };
        let denom = high_average - self.low_average;
        if denom == 0.0 {
            // Flat response: nothing is connected the way it should be.
            self.failed = true;
            return;
        }
        let m = span / denom;
        let b = low - m * self.low_average;
        cal.set_inj_model(self.channel, self.sine, m, b);
    }
}

impl Default for InjGainCal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHardware;
    use crate::store::SensingConfig;

    fn run(engine: &mut InjGainCal, cal: &mut CalRam, hw: &mut SimHardware) -> Step {
        for _ in 0..2_000_000 {
            match engine.poll(cal, hw) {
                Step::Busy => hw.step(1),
                done => return done,
            }
        }
        panic!("injection gain fit did not terminate");
    }

    #[test]
    fn sine_fit_inverts_the_simulated_response() {
        let mut cal = CalRam::new(SensingConfig::default());
        let mut hw = SimHardware::new();
        hw.inj_sine_gain = 40.0; // measured amps per amplitude code

        let mut engine = InjGainCal::new();
        assert!(engine.start(2, true));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Done);

        // A = 4000, B = 64000: m = 1500/60000 = 0.025, b = 100 - 0.025*4000 = 0.
        assert!((cal.inj.m_sine[2] - 0.025).abs() < 1e-6);
        assert!(cal.inj.b_sine[2].abs() < 1e-3);
        assert!(cal.inj.verify());
        assert!(!hw.inj.active);
        assert!(hw.protection_on);
    }

    #[test]
    fn dc_fit_recovers_slope_and_intercept() {
        let mut cal = CalRam::new(SensingConfig::default());
        let mut hw = SimHardware::new();
        // DC response: current = slope * (midpoint - center).
        hw.inj_v_center = 2400.0;
        hw.inj_v_slope = 8.0;

        let mut engine = InjGainCal::new();
        assert!(engine.start(0, false));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Done);

        // m = 1450 / (8 * 1450) = 0.125; b = 2550 - 0.125 * 8 * 150 = 2400.
        assert!((cal.inj.m_dc[0] - 0.125).abs() < 1e-6);
        assert!((cal.inj.b_dc[0] - 2400.0).abs() < 1e-2);
    }

    #[test]
    fn flat_response_fails_without_touching_the_model() {
        let mut cal = CalRam::new(SensingConfig::default());
        let before = cal.inj;
        let mut hw = SimHardware::new();
        hw.inj_sine_gain = 0.0; // nothing measured at either point

        let mut engine = InjGainCal::new();
        assert!(engine.start(1, true));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Failed);
        assert_eq!(cal.inj, before);
        assert!(!hw.inj.active);
    }
}
