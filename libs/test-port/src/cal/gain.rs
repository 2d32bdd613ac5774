//! Gain calibration.
//!
//! Single-point linear solve against a known reference signal: assumes
//! offset calibration for the channel is already valid and the transfer
//! function is linear through the origin after offset removal. The AFE
//! path averages the 200 ms filtered aggregate (metering integration
//! time); the ADC paths average the one-cycle aggregate (protection
//! response time). The first fresh aggregate after the path switch is
//! discarded, since it can still hold samples from the previously active
//! path.

use heapless::Vec;

use super::{channel_list, Step, CAL_REPS, GAIN_REF_MAX};
use crate::hw::{CalPath, Channel, Hardware};
use crate::store::CalRam;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Select,
    Discard,
    Accumulate,
}

pub struct GainCal {
    state: State,
    path: CalPath,
    channels: Vec<Channel, 5>,
    reference: f32,
    sums: [f32; 5],
    count: u16,
}

impl GainCal {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            path: CalPath::Afe,
            channels: Vec::new(),
            reference: 0.0,
            sums: [0.0; 5],
            count: 0,
        }
    }

    pub fn idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Arm a run. A non-positive reference, a reference beyond the sanity
    /// bound or an unsupported channel code drops the request.
    pub fn start(&mut self, cal: &CalRam, path: CalPath, code: u8, reference: f32) -> bool {
        if !(reference > 0.0 && reference < GAIN_REF_MAX) {
            return false;
        }
        let Some(channels) = channel_list(cal, path, code) else {
            return false;
        };
        self.path = path;
        self.channels = channels;
        self.reference = reference;
        self.sums = [0.0; 5];
        self.count = 0;
        self.state = State::Select;
        true
    }

    fn fresh(&self, hw: &mut impl Hardware) -> bool {
        match self.path {
            CalPath::Afe => hw.filt200_ready(),
            _ => hw.one_cycle_ready(),
        }
    }

    fn measure(&self, hw: &impl Hardware, ch: Channel) -> f32 {
        match self.path {
            CalPath::Afe => hw.filt200_rms(ch),
            _ => hw.one_cycle_rms(ch),
        }
    }

    pub fn poll(&mut self, cal: &mut CalRam, hw: &mut impl Hardware) -> Step {
        match self.state {
            State::Idle => Step::Done,
            State::Select => {
                hw.select_path(self.path);
                self.state = State::Discard;
                Step::Busy
            }
            State::Discard => {
                if self.fresh(hw) {
                    self.state = State::Accumulate;
                }
                Step::Busy
            }
            State::Accumulate => {
                if !self.fresh(hw) {
                    return Step::Busy;
                }
                for (i, ch) in self.channels.iter().enumerate() {
                    self.sums[i] += self.measure(hw, *ch);
                }
                self.count += 1;
                if self.count < CAL_REPS {
                    return Step::Busy;
                }
                self.finish(cal)
            }
        }
    }

    fn finish(&mut self, cal: &mut CalRam) -> Step {
        self.state = State::Idle;
        for sum in &self.sums[..self.channels.len()] {
            if *sum == 0.0 {
                // A dead channel would divide by zero; back out whole.
                return Step::Failed;
            }
        }
        for (i, ch) in self.channels.iter().enumerate() {
            let average = self.sums[i] / CAL_REPS as f32;
            let old = cal.gain(self.path, *ch).unwrap_or(1.0);
            cal.set_gain(self.path, *ch, old * self.reference / average);
        }
        debug!("gain cal complete, {} channels", self.channels.len());
        Step::Done
    }
}

impl Default for GainCal {
    fn default() -> Self {
        Self::new()
    }
}
