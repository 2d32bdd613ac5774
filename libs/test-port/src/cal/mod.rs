//! Calibration engines.
//!
//! Each engine is an explicit state machine driven by a cooperative
//! `poll()`: a bounded amount of work per call, with every wait expressed
//! as a state that re-checks a ready flag on the next invocation. An
//! engine either runs to completion ([`Step::Done`], constants updated
//! and the block resealed) or backs out ([`Step::Failed`], constants
//! untouched).

pub mod gain;
pub mod inj_gain;
pub mod inj_offset;
pub mod offset;
pub mod phase;

use heapless::Vec;

use crate::hw::{CalPath, Channel};
use crate::store::CalRam;

/// Result of one engine invocation.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// More work pending; call again next cycle.
    Busy,
    /// Calibration complete, constants updated.
    Done,
    /// Calibration backed out; constants unchanged.
    Failed,
}

/// Readings accumulated per constant on the measurement paths.
pub const CAL_REPS: u16 = 100;

/// 10 ms ticks guaranteeing at least two AC half-cycles (>= 30 ms even
/// when the first tick lands immediately after arming).
pub const GUARD_TICKS: u16 = 4;

/// Upper sanity bound for a gain reference, primary units.
pub const GAIN_REF_MAX: f32 = 40_000.0;

/// Aggregate channel code: all line currents (plus neutral and ground
/// where the path provides them) in one run.
pub const CODE_ALL_CURRENTS: u8 = 8;
/// Aggregate channel code: all three phase voltages in one run.
pub const CODE_ALL_VOLTAGES: u8 = 9;

/// Expand a command channel code into the list of channels the run
/// calibrates in lock-step. `None` for combinations the path or the
/// sensing configuration cannot serve.
pub fn channel_list(cal: &CalRam, path: CalPath, code: u8) -> Option<Vec<Channel, 5>> {
    let mut list = Vec::new();
    match code {
        CODE_ALL_CURRENTS => {
            for ch in [Channel::Ia, Channel::Ib, Channel::Ic, Channel::In] {
                list.push(ch).ok()?;
            }
            // Ground source exists on the AFE path only.
            if path == CalPath::Afe && cal.valid_channel(path, Channel::Igsrc) {
                list.push(Channel::Igsrc).ok()?;
            }
        }
        CODE_ALL_VOLTAGES => {
            for ch in [Channel::Van, Channel::Vbn, Channel::Vcn] {
                list.push(ch).ok()?;
            }
        }
        code => {
            let ch = Channel::from_code(code)?;
            if !cal.valid_channel(path, ch) {
                return None;
            }
            list.push(ch).ok()?;
        }
    }
    Some(list)
}
