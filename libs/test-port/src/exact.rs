//! Execute-action front end.
//!
//! A second, protocol-addressable entry point that drives the same
//! calibration engines as the serial test port, from structured binary
//! records instead of ASCII. Production testers use it for batch
//! calibration: channel code 8 runs all line currents (plus neutral and
//! ground where the path has them) in one pass, code 9 all three phase
//! voltages. In aggregate mode one capture stream feeds parallel
//! accumulators that advance in lock-step, one sample per channel per
//! cycle, so the per-channel solves stay independent.
//!
//! The front end owns its session scratch (engine contexts and persist
//! sequencer) independently of the test port; the dispatcher serializes
//! the two, so only one of them ever holds an engine against the shared
//! calibration RAM at a time.

use heapless::Vec;

use tripunit_protocol::{decode_action, ActionKind, DecodeError};

use crate::cal::gain::GainCal;
use crate::cal::inj_gain::InjGainCal;
use crate::cal::inj_offset::InjOffsetCal;
use crate::cal::offset::OffsetCal;
use crate::cal::Step;
use crate::hw::{CalPath, Hardware};
use crate::store::{BlockKind, CalRam, CalStore, PersistSeq};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Offset,
    Gain,
    InjOffset,
    InjGain,
    LedTest,
    RelayTest,
    WriteCal,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// A prior action is still running.
    Busy,
    /// The record did not decode.
    Decode(DecodeError),
    /// Decoded fine but the engine rejected the parameters.
    Rejected,
}

pub struct ExecuteAction {
    state: State,
    offset: OffsetCal,
    gain: GainCal,
    inj_offset: InjOffsetCal,
    inj_gain: InjGainCal,
    persist: PersistSeq,
    queue: Vec<BlockKind, 4>,
    image: u16,
}

impl ExecuteAction {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            offset: OffsetCal::new(),
            gain: GainCal::new(),
            inj_offset: InjOffsetCal::new(),
            inj_gain: InjGainCal::new(),
            persist: PersistSeq::new(),
            queue: Vec::new(),
            image: 0,
        }
    }

    pub fn busy(&self) -> bool {
        self.state != State::Idle
    }

    /// Accept one execute-action record. `selector` picks the operation,
    /// `msg` is the record body (channel at offset 8, value at offset 9).
    pub fn submit(&mut self, selector: u8, msg: &[u8], cal: &mut CalRam) -> Result<(), SubmitError> {
        if self.busy() {
            return Err(SubmitError::Busy);
        }
        let req = decode_action(selector, msg).map_err(SubmitError::Decode)?;

        let path = match req.kind {
            ActionKind::AfeGain | ActionKind::AfeOffset => CalPath::Afe,
            ActionKind::AdcHighGain | ActionKind::AdcHighOffset => CalPath::AdcHigh,
            ActionKind::AdcLowGain | ActionKind::AdcLowOffset => CalPath::AdcLow,
            _ => CalPath::Afe,
        };

        match req.kind {
            ActionKind::AfeOffset | ActionKind::AdcHighOffset | ActionKind::AdcLowOffset => {
                if !self.offset.start(cal, path, req.channel) {
                    return Err(SubmitError::Rejected);
                }
                self.queue_block(path.block_kind());
                self.state = State::Offset;
            }
            ActionKind::AfeGain | ActionKind::AdcHighGain | ActionKind::AdcLowGain => {
                if !self.gain.start(cal, path, req.channel, req.target) {
                    return Err(SubmitError::Rejected);
                }
                self.queue_block(path.block_kind());
                self.state = State::Gain;
            }
            ActionKind::InjOffset => {
                if !self.inj_offset.start(req.channel) {
                    return Err(SubmitError::Rejected);
                }
                self.queue_block(BlockKind::Inj);
                self.state = State::InjOffset;
            }
            ActionKind::InjGain => {
                if !self.inj_gain.start(req.channel, true) {
                    return Err(SubmitError::Rejected);
                }
                self.queue_block(BlockKind::Inj);
                self.state = State::InjGain;
            }
            ActionKind::WriteCal => {
                self.queue.clear();
                for kind in BlockKind::ALL {
                    let _ = self.queue.push(kind);
                }
                self.state = State::WriteCal;
            }
            ActionKind::LedTest => {
                self.image = req.image;
                self.state = State::LedTest;
            }
            ActionKind::RelayTest => {
                self.image = req.image;
                self.state = State::RelayTest;
            }
        }
        Ok(())
    }

    fn queue_block(&mut self, kind: BlockKind) {
        self.queue.clear();
        let _ = self.queue.push(kind);
    }

    /// One scheduler invocation.
    pub fn tick<H: Hardware, S: CalStore>(&mut self, cal: &mut CalRam, hw: &mut H, store: &mut S) {
        match self.state {
            State::Idle => {}
            State::Offset => match self.offset.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = State::WriteCal,
                Step::Failed => self.finish(),
            },
            State::Gain => match self.gain.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = State::WriteCal,
                Step::Failed => self.finish(),
            },
            State::InjOffset => match self.inj_offset.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = State::WriteCal,
                Step::Failed => self.finish(),
            },
            State::InjGain => match self.inj_gain.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = State::WriteCal,
                Step::Failed => self.finish(),
            },
            State::LedTest => {
                hw.set_led_image(self.image);
                self.finish();
            }
            State::RelayTest => {
                hw.set_relay_image(self.image);
                self.finish();
            }
            State::WriteCal => {
                if !self.persist.idle() {
                    self.persist.poll(cal, store);
                } else if self.queue.is_empty() {
                    self.finish();
                } else {
                    let kind = self.queue.remove(0);
                    self.persist.start(kind);
                }
            }
        }
    }

    fn finish(&mut self) {
        self.queue.clear();
        self.state = State::Idle;
    }
}

impl Default for ExecuteAction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::Channel;
    use crate::sim::{SimHardware, SimStore};
    use crate::store::SensingConfig;
    use tripunit_protocol::{CHANNEL_OFFSET, RECORD_LEN, VALUE_OFFSET};

    fn record(channel: u8, value_16ths: u32) -> [u8; RECORD_LEN] {
        let mut msg = [0u8; RECORD_LEN];
        msg[CHANNEL_OFFSET] = channel;
        msg[VALUE_OFFSET..VALUE_OFFSET + 4].copy_from_slice(&value_16ths.to_le_bytes());
        msg
    }

    struct Bench {
        front: ExecuteAction,
        cal: CalRam,
        hw: SimHardware,
        store: SimStore,
    }

    impl Bench {
        fn new() -> Self {
            Self {
                front: ExecuteAction::new(),
                cal: CalRam::new(SensingConfig::default()),
                hw: SimHardware::new(),
                store: SimStore::new(),
            }
        }

        fn run_to_idle(&mut self) {
            for _ in 0..2_000_000 {
                self.front.tick(&mut self.cal, &mut self.hw, &mut self.store);
                self.hw.step(1);
                if !self.front.busy() {
                    return;
                }
            }
            panic!("execute-action never went idle");
        }
    }

    #[test]
    fn aggregate_offset_keeps_channels_independent() {
        let mut bench = Bench::new();
        for ch in [Channel::Ia, Channel::Ib, Channel::Ic, Channel::In] {
            bench.cal.set_gain(CalPath::AdcHigh, ch, 1.0);
        }
        bench.hw.capture_bias[Channel::Ia.index()] = 0.5;
        bench.hw.capture_bias[Channel::Ib.index()] = 1.5;
        bench.hw.capture_bias[Channel::Ic.index()] = 2.5;
        bench.hw.capture_bias[Channel::In.index()] = 3.5;

        let msg = record(8, 0);
        bench
            .front
            .submit(ActionKind::AdcHighOffset as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();

        let first: [f32; 4] = core::array::from_fn(|i| bench.cal.adc_high.offset[i]);
        assert_eq!(first, [0.5, 1.5, 2.5, 3.5]);

        // Perturb only Ib and rerun: the other channels must not move.
        bench.hw.capture_bias[Channel::Ib.index()] = 7.0;
        let msg = record(8, 0);
        bench
            .front
            .submit(ActionKind::AdcHighOffset as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();

        assert_eq!(bench.cal.adc_high.offset[0], 0.5);
        assert_eq!(bench.cal.adc_high.offset[1], 7.0);
        assert_eq!(bench.cal.adc_high.offset[2], 2.5);
        assert_eq!(bench.cal.adc_high.offset[3], 3.5);
        assert_eq!(bench.store.fast_writes(BlockKind::AdcHigh), 2);
    }

    #[test]
    fn aggregate_gain_over_protocol_value() {
        let mut bench = Bench::new();
        for ch in [Channel::Van, Channel::Vbn, Channel::Vcn] {
            bench.cal.set_gain(CalPath::Afe, ch, 1.0);
        }
        bench.hw.filt_rms[Channel::Van.index()] = 60.0;
        bench.hw.filt_rms[Channel::Vbn.index()] = 120.0;
        bench.hw.filt_rms[Channel::Vcn.index()] = 240.0;

        // Target 120.0 as 1920 sixteenths.
        let msg = record(9, 1920);
        bench
            .front
            .submit(ActionKind::AfeGain as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();

        assert_eq!(bench.cal.gain(CalPath::Afe, Channel::Van).unwrap(), 2.0);
        assert_eq!(bench.cal.gain(CalPath::Afe, Channel::Vbn).unwrap(), 1.0);
        assert_eq!(bench.cal.gain(CalPath::Afe, Channel::Vcn).unwrap(), 0.5);
    }

    #[test]
    fn busy_front_end_rejects_new_requests() {
        let mut bench = Bench::new();
        let msg = record(0, 0);
        bench
            .front
            .submit(ActionKind::AfeOffset as u8, &msg, &mut bench.cal)
            .unwrap();
        assert!(bench.front.busy());
        assert_eq!(
            bench.front.submit(ActionKind::AfeOffset as u8, &msg, &mut bench.cal),
            Err(SubmitError::Busy)
        );
        bench.run_to_idle();
    }

    #[test]
    fn decode_and_parameter_failures_reported() {
        let mut bench = Bench::new();
        let msg = record(0, 0);
        assert!(matches!(
            bench.front.submit(0x7F, &msg, &mut bench.cal),
            Err(SubmitError::Decode(_))
        ));
        // Ground source through an ADC path is not a thing.
        let msg = record(4, 0);
        assert_eq!(
            bench
                .front
                .submit(ActionKind::AdcLowOffset as u8, &msg, &mut bench.cal),
            Err(SubmitError::Rejected)
        );
        assert!(!bench.front.busy());
    }

    #[test]
    fn led_and_relay_tests_latch_images() {
        let mut bench = Bench::new();
        let msg = record(0, 0x5A5A);
        bench
            .front
            .submit(ActionKind::LedTest as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();
        assert_eq!(bench.hw.led_image, 0x5A5A);

        let msg = record(0, 0x00F0);
        bench
            .front
            .submit(ActionKind::RelayTest as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();
        assert_eq!(bench.hw.relay_image, 0x00F0);
    }

    #[test]
    fn write_cal_action_persists_every_block() {
        let mut bench = Bench::new();
        let msg = record(0, 0);
        bench
            .front
            .submit(ActionKind::WriteCal as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();
        for kind in BlockKind::ALL {
            assert_eq!(bench.store.fast_writes(kind), 1, "{:?}", kind);
            assert_eq!(bench.store.flash_writes(kind), 1, "{:?}", kind);
        }
    }

    #[test]
    fn injection_offset_over_protocol() {
        let mut bench = Bench::new();
        bench.hw.inj_v_center = 2399.0;
        let msg = record(2, 0);
        bench
            .front
            .submit(ActionKind::InjOffset as u8, &msg, &mut bench.cal)
            .unwrap();
        bench.run_to_idle();
        assert!((bench.cal.inj.midpoint_ph - 2399.0).abs() <= 1.0);
        assert_eq!(bench.store.fast_writes(BlockKind::Inj), 1);
    }
}
