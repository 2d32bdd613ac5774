//! Capability traits for the hardware this layer drives.
//!
//! The sampling interrupt, the capture buffer, the injection DAC, the
//! hardware path muxes and the manufacturing-test outputs all live outside
//! this crate; the engines reach them through these traits. Implementations
//! must be non-blocking: every method returns promptly and the "wait"
//! states of the engines poll the ready/active accessors instead.

/// Samples per AC cycle produced by the sampling interrupt.
pub const SAMPLES_PER_CYCLE: usize = 80;

/// Manufacturing-test image meaning "no test active, normal control".
pub const NO_MANUF_TEST: u16 = 0xFFFF;

/// Logical measurement channels.
///
/// Neutral and ground-source currents exist in Rogowski and CT flavors;
/// which calibration slot they use is resolved by the calibration store's
/// sensing configuration, not here.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Ia,
    Ib,
    Ic,
    In,
    Igsrc,
    Van,
    Vbn,
    Vcn,
}

impl Channel {
    pub const COUNT: usize = 8;

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Channel::Ia),
            1 => Some(Channel::Ib),
            2 => Some(Channel::Ic),
            3 => Some(Channel::In),
            4 => Some(Channel::Igsrc),
            5 => Some(Channel::Van),
            6 => Some(Channel::Vbn),
            7 => Some(Channel::Vcn),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_current(self) -> bool {
        matches!(
            self,
            Channel::Ia | Channel::Ib | Channel::Ic | Channel::In | Channel::Igsrc
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Ia => "Ia",
            Channel::Ib => "Ib",
            Channel::Ic => "Ic",
            Channel::In => "In",
            Channel::Igsrc => "Ig",
            Channel::Van => "Van",
            Channel::Vbn => "Vbn",
            Channel::Vcn => "Vcn",
        }
    }
}

/// The three correctable hardware paths.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalPath {
    Afe,
    AdcHigh,
    AdcLow,
}

/// Read-only view of the sampling interrupt's aggregates plus the shared
/// waveform-capture buffer and the 10 ms system tick.
pub trait SampleSource {
    /// Rolling 10 ms tick counter. Wraps; compare with `wrapping_sub`.
    fn tick10(&self) -> u16;

    /// Consume the "new one-cycle aggregate" flag. Returns true at most
    /// once per aggregation period.
    fn one_cycle_ready(&mut self) -> bool;
    /// One-cycle RMS of a channel through the currently selected path.
    fn one_cycle_rms(&self, ch: Channel) -> f32;

    /// Consume the "new 200 ms filtered aggregate" flag.
    fn filt200_ready(&mut self) -> bool;
    /// 200 ms filtered RMS (metering integration time), AFE path.
    fn filt200_rms(&self, ch: Channel) -> f32;

    /// 200 ms real power for phase 0..=2.
    fn power200(&self, phase: usize) -> f32;

    /// Force-release any other consumer's hold on the capture buffer.
    /// Calibration outranks every other capture consumer.
    fn capture_unlock(&mut self);
    /// Request a one-cycle capture. False when the buffer is still busy;
    /// the caller retries on its next invocation.
    fn capture_request(&mut self) -> bool;
    /// True once the requested capture has completed. The capture begins
    /// only while the sampling interrupt runs, which is guaranteed
    /// whenever this code runs.
    fn capture_done(&mut self) -> bool;
    /// The captured cycle for one channel, raw (uncorrected) samples.
    fn capture_cycle(&self, ch: Channel) -> [f32; SAMPLES_PER_CYCLE];
    /// Release the capture buffer for other consumers.
    fn capture_release(&mut self);
}

/// Selects which hardware path feeds the aggregates and the capture.
pub trait PathControl {
    fn select_path(&mut self, path: CalPath);
}

/// The on-board test-signal generator.
///
/// `set_waveform` parameterizes the DAC drive: a cosine of the given
/// amplitude around `midpoint`, or a pure DC level when the amplitude is
/// zero. `enable`/`request_disable` gate the injection muxes; disabling
/// takes effect at the next sample edge, so callers poll `is_active`
/// before reconfiguring channels.
pub trait InjectionControl {
    fn set_waveform(&mut self, amplitude: f32, midpoint: f32);
    /// Turn injection onto a channel (0-3 phases, 4 ground). When
    /// `low_current` is set the integrator constant of the phase channel
    /// is switched to the low-current value for the duration.
    fn enable(&mut self, channel: u8, low_current: bool);
    fn request_disable(&mut self);
    fn is_active(&self) -> bool;
    /// Coil-temperature measurement drive.
    fn set_coil_measurement(&mut self, on: bool);
}

/// Arms or disarms protection processing. Injection calibration turns
/// protection off so synthesized currents cannot cause nuisance trips.
pub trait ProtectionControl {
    fn set_protection(&mut self, enabled: bool);
    fn protection_enabled(&self) -> bool;
}

/// Manufacturing-test outputs. An image of [`NO_MANUF_TEST`] returns the
/// output bank to normal firmware control.
pub trait ManufacturingTest {
    fn set_led_image(&mut self, image: u16);
    fn set_relay_image(&mut self, image: u16);
}

/// Everything the dispatcher and engines need, in one bound.
pub trait Hardware:
    SampleSource + PathControl + InjectionControl + ProtectionControl + ManufacturingTest
{
}

impl<T> Hardware for T where
    T: SampleSource + PathControl + InjectionControl + ProtectionControl + ManufacturingTest
{
}
