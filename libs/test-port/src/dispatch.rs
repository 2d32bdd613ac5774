//! Test-port command dispatcher.
//!
//! Top-level state machine for the serial test port. Re-entered on a
//! fixed cadence by the outer scheduler; every call does a bounded amount
//! of work. A session starts at the first line terminator; each command
//! line then selects a two-letter command (case folded by masking bit 5)
//! from a fixed table. Unrecognized codes are silently ignored. A `.` as
//! the first character of any value entry aborts that handler and
//! discards unsaved RAM changes; values already persisted earlier in the
//! same sequence are not rolled back.
//!
//! Handlers that mutate a calibration block funnel through the shared
//! write-calibration states, which run the two-phase persistence (fast
//! store, then flash) to completion before the prompt returns.

use core::fmt::Write;

use crate::cal::gain::GainCal;
use crate::cal::inj_gain::InjGainCal;
use crate::cal::inj_offset::InjOffsetCal;
use crate::cal::offset::OffsetCal;
use crate::cal::phase::PhaseCal;
use crate::cal::Step;
use crate::display::{self, DisplayKind};
use crate::hw::{CalPath, Hardware};
use crate::inject::{InjectOutcome, Injector};
use crate::session::Session;
use crate::store::{BlockKind, CalRam, CalStore, PersistSeq};
use crate::token::{self, Token};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PortState {
    Init,
    Idle,
    Prompt,
    AwaitCommand,
    ParseCommand,
    Offset,
    Gain,
    Phase,
    InjCal,
    InjectStop,
    Modify,
    WriteCal,
    WriteCalWait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    OffsetCal,
    GainCal,
    PhaseCal,
    InjCal,
    InjectTest,
    ModifyCal,
    ExtAction,
    LedTest,
    InjStatus,
    Display(DisplayKind),
}

/// Two-letter command codes, already bit-5 masked (upper case).
const COMMANDS: &[([u8; 2], Command)] = &[
    (*b"OC", Command::OffsetCal),
    (*b"GC", Command::GainCal),
    (*b"PC", Command::PhaseCal),
    (*b"IC", Command::InjCal),
    (*b"IT", Command::InjectTest),
    (*b"MC", Command::ModifyCal),
    (*b"EA", Command::ExtAction),
    (*b"TV", Command::LedTest),
    (*b"TI", Command::InjStatus),
    (*b"DR", Command::Display(DisplayKind::Dr)),
    (*b"DE", Command::Display(DisplayKind::De)),
    (*b"DW", Command::Display(DisplayKind::Dw)),
    (*b"DQ", Command::Display(DisplayKind::Dq)),
    (*b"DM", Command::Display(DisplayKind::Dm)),
    (*b"DA", Command::Display(DisplayKind::Da)),
    (*b"DX", Command::Display(DisplayKind::Dx)),
    (*b"DV", Command::Display(DisplayKind::Dv)),
    (*b"DI", Command::Display(DisplayKind::Di)),
    (*b"DF", Command::Display(DisplayKind::Df)),
    (*b"DN", Command::Display(DisplayKind::Dn)),
    (*b"DJ", Command::Display(DisplayKind::Dj)),
    (*b"DZ", Command::Display(DisplayKind::Dz)),
    (*b"LS", Command::Display(DisplayKind::Ls)),
    (*b"LT", Command::Display(DisplayKind::Lt)),
    (*b"LR", Command::Display(DisplayKind::Lr)),
    (*b"LM", Command::Display(DisplayKind::Lm)),
    (*b"LD", Command::Display(DisplayKind::Ld)),
    (*b"LU", Command::Display(DisplayKind::Lu)),
    (*b"LV", Command::Display(DisplayKind::Lv)),
    (*b"LW", Command::Display(DisplayKind::Lw)),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InjCalKind {
    Offset,
    SineGain,
    DcGain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum McStage {
    Index,
    Value,
}

#[derive(Clone, Copy, Debug)]
struct ModifyCtx {
    kind: BlockKind,
    stage: McStage,
    index: u32,
}

/// The serial test port: session, dispatcher and its engines.
pub struct TestPort {
    state: PortState,
    pub session: Session,
    offset: OffsetCal,
    gain: GainCal,
    phase: PhaseCal,
    inj_offset: InjOffsetCal,
    inj_gain: InjGainCal,
    inj_kind: InjCalKind,
    pub injector: Injector,
    persist: PersistSeq,
    pending_block: BlockKind,
    modify: ModifyCtx,
}

impl TestPort {
    pub fn new(frame_dc_scale: f32) -> Self {
        Self {
            state: PortState::Init,
            session: Session::new(),
            offset: OffsetCal::new(),
            gain: GainCal::new(),
            phase: PhaseCal::new(),
            inj_offset: InjOffsetCal::new(),
            inj_gain: InjGainCal::new(),
            inj_kind: InjCalKind::Offset,
            injector: Injector::new(frame_dc_scale),
            persist: PersistSeq::new(),
            pending_block: BlockKind::Afe,
            modify: ModifyCtx {
                kind: BlockKind::Afe,
                stage: McStage::Index,
                index: 0,
            },
        }
    }

    /// Feed one inbound byte from the transport.
    pub fn push_byte(&mut self, byte: u8) -> bool {
        self.session.push_byte(byte)
    }

    /// True while the port sits at the prompt waiting for a command line.
    pub fn at_prompt(&self) -> bool {
        self.state == PortState::AwaitCommand
    }

    /// True when the port is blocked on operator input (prompt or an
    /// interactive value-entry sub-state) rather than on hardware.
    pub fn needs_input(&self) -> bool {
        matches!(
            self.state,
            PortState::Idle | PortState::AwaitCommand | PortState::Modify
        )
    }

    /// One scheduler invocation: bounded work, state preserved across calls.
    pub fn tick<H: Hardware, S: CalStore>(&mut self, cal: &mut CalRam, hw: &mut H, store: &mut S) {
        match self.state {
            PortState::Init => {
                // Calibration memory must be valid before the port goes
                // interactive; the cascade falls back to flash, then to
                // hard-coded defaults.
                cal.load_all(store);
                info!("test port ready, diag {}", cal.diag);
                self.state = PortState::Idle;
            }
            PortState::Idle => {
                // The first line terminator establishes the session; the
                // line's content is discarded.
                if self.session.take_line() {
                    self.state = PortState::Prompt;
                }
            }
            PortState::Prompt => {
                self.session.puts("\r\n> ");
                self.state = PortState::AwaitCommand;
            }
            PortState::AwaitCommand => {
                if self.session.take_line() {
                    self.state = PortState::ParseCommand;
                }
            }
            PortState::ParseCommand => self.parse_command(cal, hw),
            PortState::Offset => match self.offset.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = PortState::WriteCal,
                Step::Failed => self.state = PortState::Prompt,
            },
            PortState::Gain => match self.gain.poll(cal, hw) {
                Step::Busy => {}
                Step::Done => self.state = PortState::WriteCal,
                Step::Failed => self.state = PortState::Prompt,
            },
            PortState::Phase => match self.phase.poll(hw) {
                Step::Busy => {}
                Step::Done => {
                    let _ = write!(self.session, "\r\nPavg {}", self.phase.result);
                    self.state = PortState::Prompt;
                }
                Step::Failed => self.state = PortState::Prompt,
            },
            PortState::InjCal => {
                let step = match self.inj_kind {
                    InjCalKind::Offset => self.inj_offset.poll(cal, hw),
                    InjCalKind::SineGain | InjCalKind::DcGain => self.inj_gain.poll(cal, hw),
                };
                match step {
                    Step::Busy => {}
                    Step::Done => {
                        self.pending_block = BlockKind::Inj;
                        self.state = PortState::WriteCal;
                    }
                    Step::Failed => self.state = PortState::Prompt,
                }
            }
            PortState::InjectStop => {
                // Wait for the disable to take effect, then one further
                // aggregation period so the currents are provably back at
                // zero before protection re-arms.
                if !hw.is_active() && hw.one_cycle_ready() {
                    hw.set_protection(true);
                    self.state = PortState::Prompt;
                }
            }
            PortState::Modify => self.modify_step(cal),
            PortState::WriteCal => {
                if self.persist.start(self.pending_block) {
                    self.state = PortState::WriteCalWait;
                }
            }
            PortState::WriteCalWait => {
                if self.persist.poll(cal, store) {
                    self.session.puts("\r\nsaved");
                    self.state = PortState::Prompt;
                }
            }
        }
    }

    fn parse_command<H: Hardware>(&mut self, cal: &mut CalRam, hw: &mut H) {
        let Some(first) = self.session.line.pop() else {
            self.state = PortState::Prompt;
            return;
        };
        if first == b'\n' {
            // Empty line: back to the prompt.
            self.state = PortState::Prompt;
            return;
        }
        let Some(second) = self.session.line.pop() else {
            self.state = PortState::Prompt;
            return;
        };
        if second == b'\n' {
            self.state = PortState::Prompt;
            return;
        }
        let code = [first & !0x20, second & !0x20];

        let command = COMMANDS
            .iter()
            .find(|(name, _)| *name == code)
            .map(|(_, cmd)| *cmd);

        match command {
            Some(cmd) => self.enter_command(cmd, cal, hw),
            // Unknown codes are silently ignored. Whatever is left of the
            // line dies with the line buffer.
            None => self.state = PortState::Prompt,
        }
    }

    fn enter_command<H: Hardware>(&mut self, cmd: Command, cal: &mut CalRam, hw: &mut H) {
        // Entered with the prompt as the fallback: handlers that arm
        // successfully overwrite the state themselves.
        self.state = PortState::Prompt;
        match cmd {
            Command::OffsetCal => self.enter_offset(cal),
            Command::GainCal => self.enter_gain(cal),
            Command::PhaseCal => self.enter_phase(),
            Command::InjCal => self.enter_inj_cal(),
            Command::InjectTest => self.enter_inject(cal, hw),
            Command::ModifyCal => self.enter_modify(),
            Command::ExtAction => self.enter_ext_action(cal, hw),
            Command::LedTest => {
                if let Some(image) = self.read_u16() {
                    hw.set_led_image(image);
                }
            }
            Command::InjStatus => {
                display::injection_status(&mut self.session, &self.injector, hw);
            }
            Command::Display(kind) => {
                display::run(kind, &mut self.session, cal, hw);
            }
        }
    }

    /// Read the A/H/L hardware-path selector letter.
    fn path_letter(&mut self) -> Option<CalPath> {
        loop {
            match self.session.line.peek()? {
                b' ' | b'\t' => {
                    self.session.line.pop();
                }
                byte => {
                    self.session.line.pop();
                    return match byte & !0x20 {
                        b'A' => Some(CalPath::Afe),
                        b'H' => Some(CalPath::AdcHigh),
                        b'L' => Some(CalPath::AdcLow),
                        _ => None,
                    };
                }
            }
        }
    }

    fn read_channel_code(&mut self) -> Option<u8> {
        match token::scan(&mut self.session.line) {
            Token::Decimal => Some(token::read_decimal(&mut self.session.line) as u8),
            _ => None,
        }
    }

    fn read_u16(&mut self) -> Option<u16> {
        match token::scan(&mut self.session.line) {
            Token::Decimal => Some(token::read_decimal(&mut self.session.line) as u16),
            Token::Hexadecimal => Some(token::read_hex(&mut self.session.line) as u16),
            _ => None,
        }
    }

    fn read_value(&mut self) -> Option<f32> {
        if token::abort_requested(&self.session.line) {
            return None;
        }
        match token::scan(&mut self.session.line) {
            Token::Decimal => Some(token::read_float(&mut self.session.line)),
            Token::Negative => Some(-token::read_float(&mut self.session.line)),
            Token::Hexadecimal => Some(token::read_hex(&mut self.session.line) as f32),
            _ => None,
        }
    }

    fn enter_offset(&mut self, cal: &mut CalRam) {
        let Some(path) = self.path_letter() else {
            return;
        };
        let Some(code) = self.read_channel_code() else {
            return;
        };
        if self.offset.start(cal, path, code) {
            self.pending_block = path.block_kind();
            self.state = PortState::Offset;
        }
    }

    fn enter_gain(&mut self, cal: &mut CalRam) {
        let Some(path) = self.path_letter() else {
            return;
        };
        let Some(code) = self.read_channel_code() else {
            return;
        };
        let Some(reference) = self.read_value() else {
            return;
        };
        if self.gain.start(cal, path, code, reference) {
            self.pending_block = path.block_kind();
            self.state = PortState::Gain;
        }
    }

    fn enter_phase(&mut self) {
        let Some(code) = self.read_channel_code() else {
            return;
        };
        if self.phase.start(code as usize) {
            self.state = PortState::Phase;
        }
    }

    fn enter_inj_cal(&mut self) {
        let kind = loop {
            let Some(byte) = self.session.line.peek() else {
                return;
            };
            self.session.line.pop();
            match byte {
                b' ' | b'\t' => continue,
                byte => match byte & !0x20 {
                    b'O' => break InjCalKind::Offset,
                    b'S' => break InjCalKind::SineGain,
                    b'D' => break InjCalKind::DcGain,
                    _ => return,
                },
            }
        };
        let Some(channel) = self.read_channel_code() else {
            return;
        };
        let armed = match kind {
            InjCalKind::Offset => self.inj_offset.start(channel),
            InjCalKind::SineGain => self.inj_gain.start(channel, true),
            InjCalKind::DcGain => self.inj_gain.start(channel, false),
        };
        if armed {
            self.inj_kind = kind;
            self.state = PortState::InjCal;
        }
    }

    fn enter_inject<H: Hardware>(&mut self, cal: &CalRam, hw: &mut H) {
        let Some(channel) = self.read_channel_code() else {
            return;
        };
        let Some(amps) = self.read_value() else {
            return;
        };
        match self.injector.request(&cal.inj, hw, channel, amps) {
            InjectOutcome::Sine | InjectOutcome::Dc => {
                // Synthesized current must not trip the breaker.
                hw.set_protection(false);
                let _ = write!(self.session, "\r\ninj {} {}", channel, amps);
            }
            InjectOutcome::Off => {
                self.state = PortState::InjectStop;
            }
            InjectOutcome::Rejected => {}
        }
    }

    fn enter_modify(&mut self) {
        let Some(path) = self.path_letter() else {
            return;
        };
        self.modify = ModifyCtx {
            kind: path.block_kind(),
            stage: McStage::Index,
            index: 0,
        };
        self.session.puts("\r\nindex? ");
        self.state = PortState::Modify;
    }

    fn modify_step(&mut self, cal: &mut CalRam) {
        if !self.session.take_line() {
            return;
        }
        if token::abort_requested(&self.session.line) {
            // Abort discards the unsaved edit; nothing reaches the block.
            self.state = PortState::Prompt;
            return;
        }
        match self.modify.stage {
            McStage::Index => {
                let index = match token::scan(&mut self.session.line) {
                    Token::Decimal => token::read_decimal(&mut self.session.line),
                    _ => {
                        self.state = PortState::Prompt;
                        return;
                    }
                };
                self.modify.index = index;
                self.modify.stage = McStage::Value;
                self.session.puts("\r\nvalue? ");
            }
            McStage::Value => {
                let Some(value) = self.read_value() else {
                    self.state = PortState::Prompt;
                    return;
                };
                if modify_slot(cal, self.modify.kind, self.modify.index, value) {
                    self.pending_block = self.modify.kind;
                    self.state = PortState::WriteCal;
                } else {
                    self.state = PortState::Prompt;
                }
            }
        }
    }

    fn enter_ext_action<H: Hardware>(&mut self, cal: &mut CalRam, hw: &mut H) {
        let Some(selector) = self.session.line.pop() else {
            return;
        };
        match selector & !0x20 {
            b'R' => {
                let Some(code) = self.read_channel_code() else {
                    return;
                };
                let kind = match code {
                    0 => BlockKind::Afe,
                    1 => BlockKind::AdcHigh,
                    2 => BlockKind::AdcLow,
                    3 => BlockKind::Inj,
                    _ => return,
                };
                cal.restore_defaults(kind);
                self.pending_block = kind;
                self.state = PortState::WriteCal;
            }
            b'H' => {
                let Some(code) = self.read_channel_code() else {
                    return;
                };
                hw.set_coil_measurement(code != 0);
            }
            _ => {}
        }
    }
}

/// Raw constant edit used by the MC command: indexes address the gains,
/// then the offsets, then (AFE only) the phase codes of a block.
fn modify_slot(cal: &mut CalRam, kind: BlockKind, index: u32, value: f32) -> bool {
    let index = index as usize;
    match kind {
        BlockKind::Afe => {
            match index {
                0..=9 => cal.afe.gain[index] = value,
                10..=19 => cal.afe.offset[index - 10] = value,
                20..=31 => cal.afe.phase[index - 20] = value as u8,
                _ => return false,
            }
            cal.afe.seal();
        }
        BlockKind::AdcHigh | BlockKind::AdcLow => {
            let adc = if kind == BlockKind::AdcHigh {
                &mut cal.adc_high
            } else {
                &mut cal.adc_low
            };
            match index {
                0..=7 => adc.gain[index] = value,
                8..=15 => adc.offset[index - 8] = value,
                _ => return false,
            }
            adc.seal();
        }
        BlockKind::Inj => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimHardware, SimStore};
    use crate::store::SensingConfig;
    use crate::Channel;

    struct Bench {
        port: TestPort,
        cal: CalRam,
        hw: SimHardware,
        store: SimStore,
    }

    impl Bench {
        fn new() -> Self {
            let mut bench = Self {
                port: TestPort::new(1.0),
                cal: CalRam::new(SensingConfig::default()),
                hw: SimHardware::new(),
                store: SimStore::new(),
            };
            // Establish the session: init, then the first line terminator.
            bench.run(4);
            bench.feed("\n");
            bench.run(8);
            bench
        }

        fn feed(&mut self, text: &str) {
            for byte in text.bytes() {
                assert!(self.port.push_byte(byte), "rx overflow");
            }
        }

        fn run(&mut self, ticks: u32) {
            for _ in 0..ticks {
                self.port.tick(&mut self.cal, &mut self.hw, &mut self.store);
                self.hw.step(1);
            }
        }

        fn run_until_prompt(&mut self) {
            for _ in 0..500_000 {
                self.port.tick(&mut self.cal, &mut self.hw, &mut self.store);
                self.hw.step(1);
                if self.port.state == PortState::AwaitCommand {
                    return;
                }
            }
            panic!("port never returned to the prompt");
        }
    }

    #[test]
    fn oc_command_runs_offset_cal_and_persists_once() {
        let mut bench = Bench::new();
        // Channel A/0 shorted: all-zero capture, unity existing gain.
        bench.cal.set_gain(CalPath::Afe, Channel::Ia, 1.0);
        let fast_before = bench.store.fast_writes(BlockKind::Afe);

        bench.feed("OCA0\n");
        bench.run_until_prompt();

        assert_eq!(bench.cal.afe.offset[0], 0.0);
        assert!(bench.cal.afe.verify());
        assert_eq!(bench.store.fast_writes(BlockKind::Afe), fast_before + 1);
        assert_eq!(bench.store.flash_writes(BlockKind::Afe), 1);
    }

    #[test]
    fn gc_command_solves_gain_ratio_of_one() {
        let mut bench = Bench::new();
        bench.cal.set_gain(CalPath::Afe, Channel::Ia, 2.0);
        bench.hw.filt_rms[Channel::Ia.index()] = 1000.0;

        bench.feed("GCA0 1000.0\n");
        bench.run_until_prompt();

        assert_eq!(bench.cal.gain(CalPath::Afe, Channel::Ia).unwrap(), 2.0);
        assert_eq!(bench.store.fast_writes(BlockKind::Afe), 1);
    }

    #[test]
    fn lower_case_codes_accepted() {
        let mut bench = Bench::new();
        bench.cal.set_gain(CalPath::Afe, Channel::Ia, 2.0);
        bench.hw.filt_rms[Channel::Ia.index()] = 500.0;
        bench.feed("gca0 1000.0\n");
        bench.run_until_prompt();
        assert_eq!(bench.cal.gain(CalPath::Afe, Channel::Ia).unwrap(), 4.0);
    }

    #[test]
    fn unknown_codes_silently_ignored() {
        let mut bench = Bench::new();
        let before = bench.cal.afe;
        bench.feed("QQ whatever\n");
        bench.run_until_prompt();
        assert_eq!(bench.cal.afe, before);
        // And the port still takes the next command.
        bench.feed("DR\n");
        bench.run_until_prompt();
        assert!(!bench.port.session.tx_bytes().is_empty());
    }

    #[test]
    fn gain_abort_key_leaves_blocks_untouched() {
        let mut bench = Bench::new();
        let afe = bench.cal.afe;
        let high = bench.cal.adc_high;
        bench.feed("GCA0 .\n");
        bench.run_until_prompt();
        assert_eq!(bench.cal.afe, afe);
        assert_eq!(bench.cal.adc_high, high);
        assert_eq!(bench.store.fast_writes(BlockKind::Afe), 0);
    }

    #[test]
    fn modify_command_walks_index_value_and_persists() {
        let mut bench = Bench::new();
        bench.feed("MCA\n");
        bench.run(4);
        bench.feed("3\n");
        bench.run(4);
        bench.feed("1.5\n");
        bench.run_until_prompt();

        assert_eq!(bench.cal.afe.gain[3], 1.5);
        assert!(bench.cal.afe.verify());
        assert_eq!(bench.store.fast_writes(BlockKind::Afe), 1);
    }

    #[test]
    fn modify_abort_at_any_entry_leaves_blocks_unchanged() {
        for feed_abort_at in 0..2 {
            let mut bench = Bench::new();
            let before = bench.cal.afe;
            bench.feed("MCA\n");
            bench.run(4);
            if feed_abort_at == 0 {
                bench.feed(".\n");
            } else {
                bench.feed("3\n");
                bench.run(4);
                bench.feed(".\n");
            }
            bench.run_until_prompt();
            assert_eq!(bench.cal.afe, before);
            assert_eq!(bench.store.fast_writes(BlockKind::Afe), 0);
        }
    }

    #[test]
    fn modify_offset_slot_addresses_past_gains() {
        let mut bench = Bench::new();
        bench.feed("MCH\n");
        bench.run(4);
        bench.feed("9\n"); // ADC offset slot 1
        bench.run(4);
        bench.feed("-2.5\n");
        bench.run_until_prompt();
        assert_eq!(bench.cal.adc_high.offset[1], -2.5);
    }

    #[test]
    fn ear_restores_defaults_and_persists() {
        let mut bench = Bench::new();
        bench.cal.set_gain(CalPath::AdcLow, Channel::Ia, 55.0);
        bench.feed("EAR2\n");
        bench.run_until_prompt();
        assert_eq!(
            bench.cal.adc_low,
            tripunit_cal_format::AdcCal::default_low()
        );
        assert_eq!(bench.store.fast_writes(BlockKind::AdcLow), 1);
    }

    #[test]
    fn eah_toggles_coil_measurement() {
        let mut bench = Bench::new();
        bench.feed("EAH1\n");
        bench.run_until_prompt();
        assert!(bench.hw.inj.coil);
        bench.feed("EAH0\n");
        bench.run_until_prompt();
        assert!(!bench.hw.inj.coil);
    }

    #[test]
    fn it_command_drives_and_stops_injection() {
        let mut bench = Bench::new();
        bench.cal.inj.midpoint_ph = 2400.0;
        bench.cal.inj.m_sine = [0.025; 5];
        bench.cal.inj.seal();

        bench.feed("IT0 1000.0\n");
        bench.run_until_prompt();
        assert!(bench.hw.inj.active);
        assert!(!bench.hw.protection_on);

        // Zero current while active: clean shutdown, protection restored.
        bench.feed("IT0 0\n");
        bench.run_until_prompt();
        assert!(!bench.hw.inj.active);
        assert!(bench.hw.protection_on);
    }

    #[test]
    fn ic_offset_command_runs_midpoint_search() {
        let mut bench = Bench::new();
        bench.hw.inj_v_center = 2390.0;
        bench.feed("ICO0\n");
        bench.run_until_prompt();
        assert!((bench.cal.inj.midpoint_ph - 2390.0).abs() <= 1.0);
        assert_eq!(bench.store.fast_writes(BlockKind::Inj), 1);
        assert!(bench.hw.protection_on);
        assert!(!bench.hw.inj.active);
    }

    #[test]
    fn pc_command_reports_power_average() {
        let mut bench = Bench::new();
        bench.hw.power[0] = 71_800.0;
        bench.feed("PC0\n");
        bench.run_until_prompt();
        let tx = bench.port.session.take_tx();
        let text = core::str::from_utf8(&tx).unwrap();
        assert!(text.contains("Pavg 71800"), "{}", text);
    }

    #[test]
    fn tv_sets_led_image_from_hex() {
        let mut bench = Bench::new();
        bench.feed("TV 0x1F\n");
        bench.run_until_prompt();
        assert_eq!(bench.hw.led_image, 0x1F);
    }

    #[test]
    fn invalid_path_or_channel_aborts_silently() {
        let mut bench = Bench::new();
        let before = bench.cal.afe;
        // Ground-source channel is not available through the ADC paths.
        bench.feed("OCH4\n");
        bench.run_until_prompt();
        assert_eq!(bench.cal.afe, before);
        assert_eq!(bench.store.fast_writes(BlockKind::AdcHigh), 0);

        // Reference out of the sanity bound.
        bench.feed("GCA0 50000.0\n");
        bench.run_until_prompt();
        assert_eq!(bench.store.fast_writes(BlockKind::Afe), 0);
    }
}
