//! Calibration constants in RAM and their persistence protocol.
//!
//! [`CalRam`] owns the four working blocks. Every mutation goes through an
//! accessor that reseals the touched block, so the checksum/complement
//! invariant holds at all times. Blocks load through a cascade: the fast
//! (battery-backed) store is authoritative, the flash mirror is used only
//! when the fast copy fails its checksum, and hard-coded defaults back
//! both. A failed tier sets a sticky diagnostic bit for health reporting.
//!
//! Persistence is two-phase and strictly ordered: the fast-store write is
//! requested and acknowledged before the flash write is requested, so
//! after a crash between the phases the fast store is never older than
//! flash.

use tripunit_cal_format::{AdcCal, AfeCal, InjCal};

use crate::hw::{CalPath, Channel};

/// The four persisted block kinds.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Afe = 0,
    AdcHigh = 1,
    AdcLow = 2,
    Inj = 3,
}

impl BlockKind {
    pub const ALL: [BlockKind; 4] = [
        BlockKind::Afe,
        BlockKind::AdcHigh,
        BlockKind::AdcLow,
        BlockKind::Inj,
    ];

    pub fn words(self) -> usize {
        match self {
            BlockKind::Afe => AfeCal::WORDS,
            BlockKind::AdcHigh | BlockKind::AdcLow => AdcCal::WORDS,
            BlockKind::Inj => InjCal::WORDS,
        }
    }
}

impl CalPath {
    pub fn block_kind(self) -> BlockKind {
        match self {
            CalPath::Afe => BlockKind::Afe,
            CalPath::AdcHigh => BlockKind::AdcHigh,
            CalPath::AdcLow => BlockKind::AdcLow,
        }
    }
}

/// Largest block, in halfwords.
pub const MAX_BLOCK_WORDS: usize = AfeCal::WORDS;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    Unavailable,
}

/// The two-tier persistent calibration store, consumed not owned.
///
/// Writes are asynchronous request/acknowledge pairs with a single
/// outstanding request per block kind: `*_request` returns false while a
/// prior request for the same block is still unacknowledged, and
/// `*_acked` reports (and consumes) the completion flag.
pub trait CalStore {
    fn fast_read(&mut self, kind: BlockKind, out: &mut [u16]) -> Result<(), StoreError>;
    fn flash_read(&mut self, kind: BlockKind, out: &mut [u16]) -> Result<(), StoreError>;

    fn fast_request(&mut self, kind: BlockKind, words: &[u16]) -> bool;
    fn fast_acked(&mut self, kind: BlockKind) -> bool;
    fn flash_request(&mut self, kind: BlockKind, words: &[u16]) -> bool;
    fn flash_acked(&mut self, kind: BlockKind) -> bool;
}

/// Sticky diagnostic bits: low nibble fast-store errors, next nibble
/// flash errors, indexed by [`BlockKind`].
pub fn diag_fast_bit(kind: BlockKind) -> u16 {
    1 << (kind as u16)
}

pub fn diag_flash_bit(kind: BlockKind) -> u16 {
    1 << (4 + kind as u16)
}

/// Which sensing technology each configurable channel uses, fixed per
/// unit. Decides whether neutral/ground calibration lands in the Rogowski
/// or the CT slot of the AFE block.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensingConfig {
    pub neutral_rogowski: bool,
    pub ground_rogowski: bool,
    /// False when the unit has no ground-source sensing fitted at all;
    /// ground-channel calibration requests are then rejected.
    pub ground_enabled: bool,
}

impl Default for SensingConfig {
    fn default() -> Self {
        Self {
            neutral_rogowski: true,
            ground_rogowski: false,
            ground_enabled: true,
        }
    }
}

/// Working calibration memory.
pub struct CalRam {
    pub afe: AfeCal,
    pub adc_high: AdcCal,
    pub adc_low: AdcCal,
    pub inj: InjCal,
    /// Sticky load-failure diagnostics, see [`diag_fast_bit`].
    pub diag: u16,
    pub cfg: SensingConfig,
}

impl CalRam {
    pub fn new(cfg: SensingConfig) -> Self {
        Self {
            afe: AfeCal::default_block(),
            adc_high: AdcCal::default_high(),
            adc_low: AdcCal::default_low(),
            inj: InjCal::default_block(),
            diag: 0,
            cfg,
        }
    }

    /// Load every block through the fast -> flash -> defaults cascade.
    pub fn load_all(&mut self, store: &mut impl CalStore) {
        self.load_afe(store);
        self.load_adc(store, BlockKind::AdcHigh);
        self.load_adc(store, BlockKind::AdcLow);
        self.load_inj(store);
    }

    fn load_afe(&mut self, store: &mut impl CalStore) {
        let mut words = [0u16; AfeCal::WORDS];
        if store.fast_read(BlockKind::Afe, &mut words).is_ok() {
            let cal = AfeCal::from_words(&words);
            if cal.verify() {
                self.afe = cal;
                return;
            }
        }
        self.diag |= diag_fast_bit(BlockKind::Afe);
        if store.flash_read(BlockKind::Afe, &mut words).is_ok() {
            let cal = AfeCal::from_words(&words);
            if cal.verify() {
                self.afe = cal;
                return;
            }
        }
        self.diag |= diag_flash_bit(BlockKind::Afe);
        self.afe = AfeCal::default_block();
    }

    fn load_adc(&mut self, store: &mut impl CalStore, kind: BlockKind) {
        let mut words = [0u16; AdcCal::WORDS];
        let default = match kind {
            BlockKind::AdcHigh => AdcCal::default_high,
            _ => AdcCal::default_low,
        };
        if store.fast_read(kind, &mut words).is_ok() {
            let cal = AdcCal::from_words(&words);
            if cal.verify() {
                *self.adc_mut(kind) = cal;
                return;
            }
        }
        self.diag |= diag_fast_bit(kind);
        if store.flash_read(kind, &mut words).is_ok() {
            let cal = AdcCal::from_words(&words);
            if cal.verify() {
                *self.adc_mut(kind) = cal;
                return;
            }
        }
        self.diag |= diag_flash_bit(kind);
        *self.adc_mut(kind) = default();
    }

    fn load_inj(&mut self, store: &mut impl CalStore) {
        let mut words = [0u16; InjCal::WORDS];
        if store.fast_read(BlockKind::Inj, &mut words).is_ok() {
            let cal = InjCal::from_words(&words);
            if cal.verify() {
                self.inj = cal;
                return;
            }
        }
        self.diag |= diag_fast_bit(BlockKind::Inj);
        if store.flash_read(BlockKind::Inj, &mut words).is_ok() {
            let cal = InjCal::from_words(&words);
            if cal.verify() {
                self.inj = cal;
                return;
            }
        }
        self.diag |= diag_flash_bit(BlockKind::Inj);
        self.inj = InjCal::default_block();
    }

    fn adc_mut(&mut self, kind: BlockKind) -> &mut AdcCal {
        match kind {
            BlockKind::AdcHigh => &mut self.adc_high,
            _ => &mut self.adc_low,
        }
    }

    fn adc(&self, path: CalPath) -> &AdcCal {
        match path {
            CalPath::AdcHigh => &self.adc_high,
            _ => &self.adc_low,
        }
    }

    /// AFE block slot for a logical channel under the sensing config.
    ///
    /// Neutral: Rogowski slot 3, CT slot 9. Ground source: CT slot 4,
    /// Rogowski slot 8.
    pub fn afe_slot(&self, ch: Channel) -> Option<usize> {
        match ch {
            Channel::Ia => Some(0),
            Channel::Ib => Some(1),
            Channel::Ic => Some(2),
            Channel::In => Some(if self.cfg.neutral_rogowski { 3 } else { 9 }),
            Channel::Igsrc => {
                if !self.cfg.ground_enabled {
                    None
                } else if self.cfg.ground_rogowski {
                    Some(8)
                } else {
                    Some(4)
                }
            }
            Channel::Van => Some(5),
            Channel::Vbn => Some(6),
            Channel::Vcn => Some(7),
        }
    }

    /// ADC block slot. The ADC paths have no ground-source channel.
    pub fn adc_slot(&self, ch: Channel) -> Option<usize> {
        match ch {
            Channel::Ia => Some(0),
            Channel::Ib => Some(1),
            Channel::Ic => Some(2),
            Channel::In => Some(if self.cfg.neutral_rogowski { 3 } else { 4 }),
            Channel::Igsrc => None,
            Channel::Van => Some(5),
            Channel::Vbn => Some(6),
            Channel::Vcn => Some(7),
        }
    }

    pub fn valid_channel(&self, path: CalPath, ch: Channel) -> bool {
        match path {
            CalPath::Afe => self.afe_slot(ch).is_some(),
            _ => self.adc_slot(ch).is_some(),
        }
    }

    pub fn gain(&self, path: CalPath, ch: Channel) -> Option<f32> {
        match path {
            CalPath::Afe => self.afe_slot(ch).map(|i| self.afe.gain[i]),
            _ => self.adc_slot(ch).map(|i| self.adc(path).gain[i]),
        }
    }

    pub fn offset(&self, path: CalPath, ch: Channel) -> Option<f32> {
        match path {
            CalPath::Afe => self.afe_slot(ch).map(|i| self.afe.offset[i]),
            _ => self.adc_slot(ch).map(|i| self.adc(path).offset[i]),
        }
    }

    /// Set a gain constant; reseals the block. False for an invalid
    /// path/channel combination (nothing written).
    pub fn set_gain(&mut self, path: CalPath, ch: Channel, value: f32) -> bool {
        match path {
            CalPath::Afe => match self.afe_slot(ch) {
                Some(i) => {
                    self.afe.gain[i] = value;
                    self.afe.seal();
                    true
                }
                None => false,
            },
            _ => match self.adc_slot(ch) {
                Some(i) => {
                    let adc = self.adc_mut(path.block_kind());
                    adc.gain[i] = value;
                    adc.seal();
                    true
                }
                None => false,
            },
        }
    }

    /// Set an offset constant; reseals the block.
    pub fn set_offset(&mut self, path: CalPath, ch: Channel, value: f32) -> bool {
        match path {
            CalPath::Afe => match self.afe_slot(ch) {
                Some(i) => {
                    self.afe.offset[i] = value;
                    self.afe.seal();
                    true
                }
                None => false,
            },
            _ => match self.adc_slot(ch) {
                Some(i) => {
                    let adc = self.adc_mut(path.block_kind());
                    adc.offset[i] = value;
                    adc.seal();
                    true
                }
                None => false,
            },
        }
    }

    /// Store a found injection DAC midpoint; reseals the block.
    pub fn set_inj_midpoint(&mut self, channel: u8, midpoint: f32) {
        if channel < 4 {
            self.inj.midpoint_ph = midpoint;
        } else {
            self.inj.midpoint_gnd = midpoint;
        }
        self.inj.seal();
    }

    /// Store an injection linear model; reseals the block.
    pub fn set_inj_model(&mut self, channel: u8, sine: bool, m: f32, b: f32) {
        let i = (channel as usize).min(4);
        if sine {
            self.inj.m_sine[i] = m;
            self.inj.b_sine[i] = b;
        } else {
            self.inj.m_dc[i] = m;
            self.inj.b_dc[i] = b;
        }
        self.inj.seal();
    }

    /// Apply the correction: offset is subtracted from the raw value,
    /// then the gain multiplies.
    pub fn scaled(&self, path: CalPath, ch: Channel, raw: f32) -> Option<f32> {
        let gain = self.gain(path, ch)?;
        let offset = self.offset(path, ch)?;
        Some((raw - offset) * gain)
    }

    /// Restore one block to its hard-coded defaults.
    pub fn restore_defaults(&mut self, kind: BlockKind) {
        match kind {
            BlockKind::Afe => self.afe = AfeCal::default_block(),
            BlockKind::AdcHigh => self.adc_high = AdcCal::default_high(),
            BlockKind::AdcLow => self.adc_low = AdcCal::default_low(),
            BlockKind::Inj => self.inj = InjCal::default_block(),
        }
    }

    /// Serialized halfword image of a block for the store.
    pub fn words(&self, kind: BlockKind) -> ([u16; MAX_BLOCK_WORDS], usize) {
        let mut out = [0u16; MAX_BLOCK_WORDS];
        let len = kind.words();
        match kind {
            BlockKind::Afe => out[..len].copy_from_slice(&self.afe.to_words()),
            BlockKind::AdcHigh => out[..len].copy_from_slice(&self.adc_high.to_words()),
            BlockKind::AdcLow => out[..len].copy_from_slice(&self.adc_low.to_words()),
            BlockKind::Inj => out[..len].copy_from_slice(&self.inj.to_words()),
        }
        (out, len)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PersistState {
    Idle,
    FastRequest,
    FastWait,
    FlashRequest,
    FlashWait,
}

/// The shared write-calibration sequence: fast store first, wait for its
/// acknowledge, then the flash mirror. Never the reverse.
pub struct PersistSeq {
    state: PersistState,
    kind: BlockKind,
}

impl PersistSeq {
    pub fn new() -> Self {
        Self {
            state: PersistState::Idle,
            kind: BlockKind::Afe,
        }
    }

    pub fn idle(&self) -> bool {
        self.state == PersistState::Idle
    }

    /// Begin persisting a block. Ignored (returns false) while a prior
    /// sequence is still in flight.
    pub fn start(&mut self, kind: BlockKind) -> bool {
        if !self.idle() {
            return false;
        }
        self.kind = kind;
        self.state = PersistState::FastRequest;
        true
    }

    /// Advance the sequence. Returns true when the block is fully
    /// persisted (both tiers acknowledged).
    pub fn poll(&mut self, cal: &CalRam, store: &mut impl CalStore) -> bool {
        match self.state {
            PersistState::Idle => true,
            PersistState::FastRequest => {
                let (words, len) = cal.words(self.kind);
                if store.fast_request(self.kind, &words[..len]) {
                    self.state = PersistState::FastWait;
                }
                false
            }
            PersistState::FastWait => {
                if store.fast_acked(self.kind) {
                    self.state = PersistState::FlashRequest;
                }
                false
            }
            PersistState::FlashRequest => {
                let (words, len) = cal.words(self.kind);
                if store.flash_request(self.kind, &words[..len]) {
                    self.state = PersistState::FlashWait;
                }
                false
            }
            PersistState::FlashWait => {
                if store.flash_acked(self.kind) {
                    self.state = PersistState::Idle;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl Default for PersistSeq {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimStore;
    use tripunit_cal_format::{AFE_DEFAULT_IGAIN, INJ_DEFAULT_MIDPOINT};

    fn good_afe_words() -> [u16; AfeCal::WORDS] {
        let mut cal = AfeCal::default_block();
        cal.gain[0] = 7.5;
        cal.seal();
        cal.to_words()
    }

    #[test]
    fn load_prefers_fast_store() {
        let mut store = SimStore::new();
        store.set_fast(BlockKind::Afe, &good_afe_words());

        let mut flash = AfeCal::default_block();
        flash.gain[0] = 99.0;
        flash.seal();
        store.set_flash(BlockKind::Afe, &flash.to_words());

        let mut cal = CalRam::new(SensingConfig::default());
        cal.load_all(&mut store);
        assert_eq!(cal.afe.gain[0], 7.5);
        assert_eq!(cal.diag & diag_fast_bit(BlockKind::Afe), 0);
    }

    #[test]
    fn corrupt_fast_falls_back_to_flash() {
        let mut store = SimStore::new();
        let mut bad = good_afe_words();
        bad[0] ^= 0x5555;
        store.set_fast(BlockKind::Afe, &bad);

        let mut flash = AfeCal::default_block();
        flash.gain[0] = 42.0;
        flash.seal();
        store.set_flash(BlockKind::Afe, &flash.to_words());

        let mut cal = CalRam::new(SensingConfig::default());
        cal.load_all(&mut store);
        assert_eq!(cal.afe.gain[0], 42.0);
        assert_ne!(cal.diag & diag_fast_bit(BlockKind::Afe), 0);
        assert_eq!(cal.diag & diag_flash_bit(BlockKind::Afe), 0);
    }

    #[test]
    fn corrupt_both_tiers_yields_exact_defaults() {
        let mut store = SimStore::new();
        let mut bad = good_afe_words();
        bad[10] = !bad[10];
        store.set_fast(BlockKind::Afe, &bad);
        bad[11] = !bad[11];
        store.set_flash(BlockKind::Afe, &bad);

        let mut cal = CalRam::new(SensingConfig::default());
        cal.load_all(&mut store);
        // Exactly the documented defaults, not a partial mix.
        assert_eq!(cal.afe, AfeCal::default_block());
        assert_eq!(cal.afe.gain[0], AFE_DEFAULT_IGAIN);
        assert_eq!(cal.inj.midpoint_ph, INJ_DEFAULT_MIDPOINT);
        assert_ne!(cal.diag & diag_fast_bit(BlockKind::Afe), 0);
        assert_ne!(cal.diag & diag_flash_bit(BlockKind::Afe), 0);
    }

    #[test]
    fn accessor_mutation_keeps_blocks_sealed() {
        let mut cal = CalRam::new(SensingConfig::default());
        assert!(cal.set_gain(CalPath::Afe, Channel::Ib, 1.25));
        assert!(cal.set_offset(CalPath::AdcLow, Channel::Vcn, -0.5));
        cal.set_inj_midpoint(0, 2381.0);
        cal.set_inj_model(2, true, 0.02, 1.0);
        assert!(cal.afe.verify());
        assert!(cal.adc_low.verify());
        assert!(cal.inj.verify());
    }

    #[test]
    fn sensing_config_routes_neutral_and_ground_slots() {
        let mut cal = CalRam::new(SensingConfig {
            neutral_rogowski: false,
            ground_rogowski: true,
            ground_enabled: true,
        });
        assert_eq!(cal.afe_slot(Channel::In), Some(9));
        assert_eq!(cal.afe_slot(Channel::Igsrc), Some(8));
        assert_eq!(cal.adc_slot(Channel::In), Some(4));
        assert_eq!(cal.adc_slot(Channel::Igsrc), None);

        cal.cfg.ground_enabled = false;
        assert_eq!(cal.afe_slot(Channel::Igsrc), None);
        assert!(!cal.valid_channel(CalPath::Afe, Channel::Igsrc));
    }

    #[test]
    fn persist_writes_fast_before_flash() {
        let mut store = SimStore::new();
        let cal = CalRam::new(SensingConfig::default());
        let mut seq = PersistSeq::new();

        assert!(seq.start(BlockKind::AdcHigh));
        assert!(!seq.start(BlockKind::Afe)); // single outstanding sequence

        // Fast request+ack must complete before any flash request shows up.
        seq.poll(&cal, &mut store);
        assert_eq!(store.fast_writes(BlockKind::AdcHigh), 1);
        assert_eq!(store.flash_writes(BlockKind::AdcHigh), 0);

        let mut done = false;
        for _ in 0..10 {
            if seq.poll(&cal, &mut store) {
                done = true;
                break;
            }
        }
        assert!(done);
        assert_eq!(store.fast_writes(BlockKind::AdcHigh), 1);
        assert_eq!(store.flash_writes(BlockKind::AdcHigh), 1);
        assert!(seq.idle());
    }

    #[test]
    fn fast_store_current_even_when_flash_never_acks() {
        let mut store = SimStore::new();
        store.fail_flash = true;
        let mut cal = CalRam::new(SensingConfig::default());
        cal.set_gain(CalPath::AdcHigh, Channel::Ia, 3.125);
        let mut seq = PersistSeq::new();
        seq.start(BlockKind::AdcHigh);
        for _ in 0..20 {
            seq.poll(&cal, &mut store);
        }
        assert!(!seq.idle()); // stuck waiting on flash

        let mut words = [0u16; AdcCal::WORDS];
        store
            .fast_read(BlockKind::AdcHigh, &mut words)
            .expect("fast copy present");
        let back = AdcCal::from_words(&words);
        assert!(back.verify());
        assert_eq!(back.gain[0], 3.125);
    }
}
