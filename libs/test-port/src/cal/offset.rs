//! Offset calibration.
//!
//! Precondition: the operator has shorted/grounded the channel inputs.
//! The engine zeroes the target offsets, then accumulates the sum of 100
//! one-cycle (80-sample) captures per channel; the sum of a full AC cycle
//! converges to the DC component, so the accumulated total divided by
//! `100 * 80 * gain` is the per-sample offset in primary units. The value
//! is stored un-negated: the scaling equation subtracts it.
//!
//! A >= 30 ms guard separates consecutive captures so every capture sees
//! a fresh sample set after the previous readout.

use heapless::Vec;

use super::{channel_list, Step, CAL_REPS, GUARD_TICKS};
use crate::hw::{CalPath, Channel, Hardware, SAMPLES_PER_CYCLE};
use crate::store::CalRam;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Select,
    Guard,
    Request,
    Capture,
}

pub struct OffsetCal {
    state: State,
    path: CalPath,
    channels: Vec<Channel, 5>,
    sums: [f32; 5],
    reps: u16,
    guard_from: u16,
}

impl OffsetCal {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            path: CalPath::Afe,
            channels: Vec::new(),
            sums: [0.0; 5],
            reps: 0,
            guard_from: 0,
        }
    }

    pub fn idle(&self) -> bool {
        self.state == State::Idle
    }

    /// Arm a run. Zeroes the target offsets. False (and no change) for a
    /// channel code the path or sensing configuration cannot serve.
    pub fn start(&mut self, cal: &mut CalRam, path: CalPath, code: u8) -> bool {
        let Some(channels) = channel_list(cal, path, code) else {
            return false;
        };
        for ch in &channels {
            cal.set_offset(path, *ch, 0.0);
        }
        self.path = path;
        self.channels = channels;
        self.sums = [0.0; 5];
        self.reps = 0;
        self.state = State::Select;
        true
    }

    pub fn poll(&mut self, cal: &mut CalRam, hw: &mut impl Hardware) -> Step {
        match self.state {
            State::Idle => Step::Done,
            State::Select => {
                hw.select_path(self.path);
                self.guard_from = hw.tick10();
                self.state = State::Guard;
                Step::Busy
            }
            State::Guard => {
                if hw.tick10().wrapping_sub(self.guard_from) >= GUARD_TICKS {
                    self.state = State::Request;
                }
                Step::Busy
            }
            State::Request => {
                // Calibration outranks any other capture consumer.
                hw.capture_unlock();
                if hw.capture_request() {
                    self.state = State::Capture;
                }
                // Buffer still busy: retry on the next invocation.
                Step::Busy
            }
            State::Capture => {
                if !hw.capture_done() {
                    return Step::Busy;
                }
                for (i, ch) in self.channels.iter().enumerate() {
                    let cycle = hw.capture_cycle(*ch);
                    let mut total = 0.0f32;
                    for sample in cycle {
                        total += sample;
                    }
                    self.sums[i] += total;
                }
                hw.capture_release();
                self.reps += 1;
                if self.reps < CAL_REPS {
                    self.guard_from = hw.tick10();
                    self.state = State::Guard;
                    return Step::Busy;
                }
                self.finish(cal);
                Step::Done
            }
        }
    }

    fn finish(&mut self, cal: &mut CalRam) {
        let divisor = CAL_REPS as f32 * SAMPLES_PER_CYCLE as f32;
        for (i, ch) in self.channels.iter().enumerate() {
            let gain = cal.gain(self.path, *ch).unwrap_or(1.0);
            cal.set_offset(self.path, *ch, self.sums[i] / (divisor * gain));
        }
        self.state = State::Idle;
        debug!("offset cal complete, {} channels", self.channels.len());
    }
}

impl Default for OffsetCal {
    fn default() -> Self {
        Self::new()
    }
}
