//! Signal-injection offset calibration: find the DAC midpoint code where
//! the injected DC component nulls out.
//!
//! The current-vs-midpoint response is a V around the true zero crossing,
//! so a monotonic walk works: drive pure DC at the bottom of the search
//! band, let the integrator path settle, then step the code upward while
//! the 10-reading current average keeps falling. The first rise means the
//! previous code was the minimum; back off one step and persist. If the
//! walk leaves the band without a rise the calibration aborts, injection
//! is still shut down cleanly and the previous value stays in place.
//!
//! Protection is off for the whole run and is restored only after the
//! disable has taken effect and one further aggregation period has
//! confirmed the currents are back at zero.

use super::Step;
use crate::hw::{Channel, Hardware};
use crate::store::CalRam;

/// Bottom of the midpoint search band.
pub const MID_START: f32 = 2375.0;
/// Top of the band; reaching past it fails the search.
pub const MID_MAX: f32 = 2494.0;

/// Aggregation periods for the integrator to settle after enabling.
const SETTLE_FIRST: u16 = 180;
/// Settle after each one-code step.
const SETTLE_STEP: u16 = 60;
/// One-cycle readings averaged per step.
const READS: u8 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Start,
    Settle,
    Accumulate,
    Off,
    Restore,
}

pub struct InjOffsetCal {
    state: State,
    channel: u8,
    midpoint: f32,
    prev: f32,
    have_prev: bool,
    settle: u16,
    sum: f32,
    reads: u8,
    failed: bool,
}

impl InjOffsetCal {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            channel: 0,
            midpoint: MID_START,
            prev: 0.0,
            have_prev: false,
            settle: 0,
            sum: 0.0,
            reads: 0,
            failed: false,
        }
    }

    pub fn idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Arm a search for injection channel 0..=4.
    pub fn start(&mut self, channel: u8) -> bool {
        if channel > 4 {
            return false;
        }
        self.channel = channel;
        self.midpoint = MID_START;
        self.have_prev = false;
        self.failed = false;
        self.state = State::Start;
        true
    }

    fn measured(&self, hw: &impl Hardware) -> f32 {
        let ch = Channel::from_code(self.channel).unwrap_or(Channel::Ia);
        hw.one_cycle_rms(ch)
    }

    pub fn poll(&mut self, cal: &mut CalRam, hw: &mut impl Hardware) -> Step {
        match self.state {
            State::Idle => Step::Done,
            State::Start => {
                hw.set_protection(false);
                hw.set_waveform(0.0, self.midpoint);
                hw.enable(self.channel, false);
                self.settle = SETTLE_FIRST;
                self.state = State::Settle;
                Step::Busy
            }
            State::Settle => {
                if hw.one_cycle_ready() {
                    self.settle -= 1;
                    if self.settle == 0 {
                        self.sum = 0.0;
                        self.reads = 0;
                        self.state = State::Accumulate;
                    }
                }
                Step::Busy
            }
            State::Accumulate => {
                if !hw.one_cycle_ready() {
                    return Step::Busy;
                }
                self.sum += self.measured(hw);
                self.reads += 1;
                if self.reads < READS {
                    return Step::Busy;
                }
                self.decide(cal, hw);
                Step::Busy
            }
            State::Off => {
                // Disable takes effect at the next sample edge; the
                // sampling interrupt is guaranteed live while we run.
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

    fn decide(&mut self, cal: &mut CalRam, hw: &mut impl Hardware) {
        let average = self.sum / READS as f32;
        if !self.have_prev || average < self.prev {
            // Still on the falling side: step the code upward.
            self.prev = average;
            self.have_prev = true;
            self.midpoint += 1.0;
            if self.midpoint > MID_MAX {
                warn!("injection midpoint search left the band");
                self.failed = true;
                hw.request_disable();
                self.state = State::Off;
                return;
            }
            hw.set_waveform(0.0, self.midpoint);
            self.settle = SETTLE_STEP;
            self.state = State::Settle;
        } else {
            // First rise: the previous code was the minimum.
            self.midpoint -= 1.0;
            cal.set_inj_midpoint(self.channel, self.midpoint);
            self.failed = false;
            hw.request_disable();
            self.state = State::Off;
        }
    }
}

impl Default for InjOffsetCal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHardware;
    use crate::store::SensingConfig;

    fn run(engine: &mut InjOffsetCal, cal: &mut CalRam, hw: &mut SimHardware) -> Step {
        for _ in 0..2_000_000 {
            match engine.poll(cal, hw) {
                Step::Busy => hw.step(1),
                done => return done,
            }
        }
        panic!("midpoint search did not terminate");
    }

    #[test]
    fn v_shape_terminates_adjacent_to_minimum() {
        let mut cal = CalRam::new(SensingConfig::default());
        let mut hw = SimHardware::new();
        hw.inj_v_center = 2401.0;

        let mut engine = InjOffsetCal::new();
        assert!(engine.start(0));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Done);

        let found = cal.inj.midpoint_ph;
        assert!(
            (found - hw.inj_v_center).abs() <= 1.0,
            "found {} expected near {}",
            found,
            hw.inj_v_center
        );
        assert!(cal.inj.verify());
        assert!(!hw.inj.active);
        assert!(hw.protection_on);
    }

    #[test]
    fn ground_channel_stores_ground_midpoint() {
        let mut cal = CalRam::new(SensingConfig::default());
        let mut hw = SimHardware::new();
        hw.inj_v_center = 2390.0;

        let mut engine = InjOffsetCal::new();
        assert!(engine.start(4));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Done);
        assert!((cal.inj.midpoint_gnd - 2390.0).abs() <= 1.0);
    }

    #[test]
    fn runaway_search_fails_at_band_edge_and_keeps_old_value() {
        let mut cal = CalRam::new(SensingConfig::default());
        let before = cal.inj;
        let mut hw = SimHardware::new();
        hw.inj_always_decreasing = true;

        let mut engine = InjOffsetCal::new();
        assert!(engine.start(1));
        assert_eq!(run(&mut engine, &mut cal, &mut hw), Step::Failed);
        assert_eq!(cal.inj, before);
        // Injection still shut down cleanly, protection restored.
        assert!(!hw.inj.active);
        assert!(hw.protection_on);
    }

    #[test]
    fn invalid_channel_rejected() {
        let mut engine = InjOffsetCal::new();
        assert!(!engine.start(5));
        assert!(engine.idle());
    }
}
