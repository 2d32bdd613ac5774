//! Simulated hardware and persistent store.
//!
//! Used by the unit tests and by the host-side port simulator to exercise
//! the dispatcher and engines without a breaker on the bench. Every ready
//! flag reports a fresh aggregate on each call, so runs that take seconds
//! on hardware converge in a few thousand polls here.

use crate::hw::{
    CalPath, Channel, InjectionControl, ManufacturingTest, PathControl, ProtectionControl,
    SampleSource, NO_MANUF_TEST, SAMPLES_PER_CYCLE,
};
use crate::store::{BlockKind, CalStore, StoreError, MAX_BLOCK_WORDS};

#[derive(Clone, Copy, Debug, Default)]
pub struct SimInjection {
    pub active: bool,
    pub amplitude: f32,
    pub midpoint: f32,
    pub channel: u8,
    pub low_current: bool,
    pub coil: bool,
}

/// Simulated sampling front end, injection generator and test outputs.
pub struct SimHardware {
    now: u16,
    pub path: CalPath,

    /// Per-channel one-cycle RMS when injection is not driving it.
    pub cycle_rms: [f32; Channel::COUNT],
    /// Per-channel 200 ms filtered RMS.
    pub filt_rms: [f32; Channel::COUNT],
    /// Real power per phase.
    pub power: [f32; 3],
    /// DC bias of each captured sample.
    pub capture_bias: [f32; Channel::COUNT],

    /// Report the capture buffer busy for this many requests.
    pub capture_busy_polls: u8,
    /// Granted captures (one per calibration repetition).
    pub capture_reads: u32,
    capture_requested: bool,
    capture_locked: bool,

    /// When nonzero, one-cycle readings during the very first aggregation
    /// period return this value: stale data from the previous path.
    pub first_cycle_stale: f32,
    cycle_periods: u32,

    pub inj: SimInjection,
    /// Midpoint code of the true injected-current minimum.
    pub inj_v_center: f32,
    /// Amps per DAC code on either side of the minimum.
    pub inj_v_slope: f32,
    /// Residual current at the minimum.
    pub inj_v_floor: f32,
    /// Pathological response: current falls forever as the code rises.
    pub inj_always_decreasing: bool,
    /// Measured amps per sine amplitude code.
    pub inj_sine_gain: f32,

    pub protection_on: bool,
    pub led_image: u16,
    pub relay_image: u16,
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            now: 0,
            path: CalPath::Afe,
            cycle_rms: [0.0; Channel::COUNT],
            filt_rms: [0.0; Channel::COUNT],
            power: [0.0; 3],
            capture_bias: [0.0; Channel::COUNT],
            capture_busy_polls: 0,
            capture_reads: 0,
            capture_requested: false,
            capture_locked: false,
            first_cycle_stale: 0.0,
            cycle_periods: 0,
            inj: SimInjection::default(),
            inj_v_center: 2400.0,
            inj_v_slope: 1.0,
            inj_v_floor: 0.0,
            inj_always_decreasing: false,
            inj_sine_gain: 0.0,
            protection_on: true,
            led_image: NO_MANUF_TEST,
            relay_image: NO_MANUF_TEST,
        }
    }

    /// Advance the 10 ms tick.
    pub fn step(&mut self, ticks: u16) {
        self.now = self.now.wrapping_add(ticks);
    }

    fn injected(&self, ch: Channel) -> bool {
        self.inj.active && Channel::from_code(self.inj.channel) == Some(ch)
    }

    fn injection_current(&self) -> f32 {
        if self.inj.amplitude > 0.0 {
            return self.inj_sine_gain * self.inj.amplitude;
        }
        if self.inj_always_decreasing {
            return 1.0e6 - self.inj.midpoint;
        }
        let distance = libm::fabsf(self.inj.midpoint - self.inj_v_center);
        self.inj_v_floor + self.inj_v_slope * distance
    }
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SimHardware {
    fn tick10(&self) -> u16 {
        self.now
    }

    fn one_cycle_ready(&mut self) -> bool {
        self.cycle_periods += 1;
        true
    }

    fn one_cycle_rms(&self, ch: Channel) -> f32 {
        if self.first_cycle_stale != 0.0 && self.cycle_periods <= 1 {
            return self.first_cycle_stale;
        }
        if self.injected(ch) {
            return self.injection_current();
        }
        self.cycle_rms[ch.index()]
    }

    fn filt200_ready(&mut self) -> bool {
        true
    }

    fn filt200_rms(&self, ch: Channel) -> f32 {
        if self.injected(ch) {
            return self.injection_current();
        }
        self.filt_rms[ch.index()]
    }

    fn power200(&self, phase: usize) -> f32 {
        self.power[phase.min(2)]
    }

    fn capture_unlock(&mut self) {
        self.capture_locked = false;
    }

    fn capture_request(&mut self) -> bool {
        if self.capture_locked {
            return false;
        }
        if self.capture_busy_polls > 0 {
            self.capture_busy_polls -= 1;
            return false;
        }
        self.capture_requested = true;
        self.capture_reads += 1;
        true
    }

    fn capture_done(&mut self) -> bool {
        self.capture_requested
    }

    fn capture_cycle(&self, ch: Channel) -> [f32; SAMPLES_PER_CYCLE] {
        [self.capture_bias[ch.index()]; SAMPLES_PER_CYCLE]
    }

    fn capture_release(&mut self) {
        self.capture_requested = false;
    }
}

impl PathControl for SimHardware {
    fn select_path(&mut self, path: CalPath) {
        self.path = path;
    }
}

impl InjectionControl for SimHardware {
    fn set_waveform(&mut self, amplitude: f32, midpoint: f32) {
        self.inj.amplitude = amplitude;
        self.inj.midpoint = midpoint;
    }

    fn enable(&mut self, channel: u8, low_current: bool) {
        self.inj.channel = channel;
        self.inj.low_current = low_current;
        self.inj.active = true;
    }

    fn request_disable(&mut self) {
        self.inj.active = false;
        self.inj.amplitude = 0.0;
        self.inj.midpoint = 0.0;
    }

    fn is_active(&self) -> bool {
        self.inj.active
    }

    fn set_coil_measurement(&mut self, on: bool) {
        self.inj.coil = on;
    }
}

impl ProtectionControl for SimHardware {
    fn set_protection(&mut self, enabled: bool) {
        self.protection_on = enabled;
    }

    fn protection_enabled(&self) -> bool {
        self.protection_on
    }
}

impl ManufacturingTest for SimHardware {
    fn set_led_image(&mut self, image: u16) {
        self.led_image = image;
    }

    fn set_relay_image(&mut self, image: u16) {
        self.relay_image = image;
    }
}

/// Simulated two-tier store with the request/acknowledge handshake.
pub struct SimStore {
    fast: [[u16; MAX_BLOCK_WORDS]; 4],
    fast_present: [bool; 4],
    fast_pending: [bool; 4],
    fast_write_count: [u32; 4],

    flash: [[u16; MAX_BLOCK_WORDS]; 4],
    flash_present: [bool; 4],
    flash_pending: [bool; 4],
    flash_write_count: [u32; 4],

    /// Accept flash requests but never acknowledge them.
    pub fail_flash: bool,
}

impl SimStore {
    pub fn new() -> Self {
        Self {
            fast: [[0; MAX_BLOCK_WORDS]; 4],
            fast_present: [false; 4],
            fast_pending: [false; 4],
            fast_write_count: [0; 4],
            flash: [[0; MAX_BLOCK_WORDS]; 4],
            flash_present: [false; 4],
            flash_pending: [false; 4],
            flash_write_count: [0; 4],
            fail_flash: false,
        }
    }

    pub fn set_fast(&mut self, kind: BlockKind, words: &[u16]) {
        let k = kind as usize;
        self.fast[k][..words.len()].copy_from_slice(words);
        self.fast_present[k] = true;
    }

    pub fn set_flash(&mut self, kind: BlockKind, words: &[u16]) {
        let k = kind as usize;
        self.flash[k][..words.len()].copy_from_slice(words);
        self.flash_present[k] = true;
    }

    pub fn fast_writes(&self, kind: BlockKind) -> u32 {
        self.fast_write_count[kind as usize]
    }

    pub fn flash_writes(&self, kind: BlockKind) -> u32 {
        self.flash_write_count[kind as usize]
    }
}

impl Default for SimStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalStore for SimStore {
    fn fast_read(&mut self, kind: BlockKind, out: &mut [u16]) -> Result<(), StoreError> {
        let k = kind as usize;
        if !self.fast_present[k] {
            return Err(StoreError::Unavailable);
        }
        let len = out.len().min(MAX_BLOCK_WORDS);
        out[..len].copy_from_slice(&self.fast[k][..len]);
        Ok(())
    }

    fn flash_read(&mut self, kind: BlockKind, out: &mut [u16]) -> Result<(), StoreError> {
        let k = kind as usize;
        if !self.flash_present[k] {
            return Err(StoreError::Unavailable);
        }
        let len = out.len().min(MAX_BLOCK_WORDS);
        out[..len].copy_from_slice(&self.flash[k][..len]);
        Ok(())
    }

    fn fast_request(&mut self, kind: BlockKind, words: &[u16]) -> bool {
        let k = kind as usize;
        if self.fast_pending[k] {
            return false;
        }
        self.fast[k][..words.len()].copy_from_slice(words);
        self.fast_present[k] = true;
        self.fast_pending[k] = true;
        self.fast_write_count[k] += 1;
        true
    }

    fn fast_acked(&mut self, kind: BlockKind) -> bool {
        let k = kind as usize;
        if self.fast_pending[k] {
            self.fast_pending[k] = false;
            return true;
        }
        false
    }

    fn flash_request(&mut self, kind: BlockKind, words: &[u16]) -> bool {
        let k = kind as usize;
        if self.flash_pending[k] {
            return false;
        }
        self.flash[k][..words.len()].copy_from_slice(words);
        self.flash_present[k] = true;
        self.flash_pending[k] = true;
        self.flash_write_count[k] += 1;
        true
    }

    fn flash_acked(&mut self, kind: BlockKind) -> bool {
        let k = kind as usize;
        if self.fail_flash {
            return false;
        }
        if self.flash_pending[k] {
            self.flash_pending[k] = false;
            return true;
        }
        false
    }
}
