//! Calibration constant blocks for the trip-unit measurement chain.
//!
//! Four block kinds are persisted: the AFE block, two ADC blocks (high and
//! low gain paths) and the signal-injection block. Every block carries a
//! 32-bit word-sum checksum and its one's complement; a block is only
//! usable when `chk` matches the payload sum and `cmp == !chk`. Blocks are
//! stored as contiguous little-endian halfword arrays.
//!
//! This crate is `no_std` and host-testable via the library target.

#![no_std]

#[cfg(test)]
extern crate std;

/// 1/b0 of the 60 Hz digital filter; current gains are expressed through it.
pub const SCALE_FACTOR_B0: f32 = 7.845909572784e-2;

// Magnum Standard Frame, 60 Hz defaults.
pub const AFE_DEFAULT_IGAIN: f32 = 3.57e-3 * SCALE_FACTOR_B0;
pub const AFE_CT_IGAIN: f32 = 1.915e-4;
pub const AFE_DEFAULT_IOFFSET: f32 = 0.0;
pub const AFE_DEFAULT_VGAIN: f32 = 1.797e-4;
pub const AFE_DEFAULT_VOFFSET: f32 = 0.0;
pub const AFE_DEFAULT_PHASE: u8 = 0;

pub const ADC_DEFAULT_IGAIN_HIGH: f32 = 2.64;
pub const ADC_DEFAULT_IGAIN_LOW: f32 = 1.34e2;
pub const ADC_CT_IGAIN: f32 = 1.0;
pub const ADC_DEFAULT_IOFFSET: f32 = 0.0;
pub const ADC_DEFAULT_VGAIN: f32 = 1.127e-1;
pub const ADC_DEFAULT_VOFFSET: f32 = 0.0;

/// Nominal injection DAC midpoint, the center of the offset-search band.
/// Holds only until the first successful injection-offset calibration.
pub const INJ_DEFAULT_MIDPOINT: f32 = 2455.0;

/// Wrapping 32-bit word sum over a little-endian byte image.
///
/// `bytes.len()` must be a multiple of 4; the caller passes the block
/// payload only (checksum and complement excluded).
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut chk = 0u32;
    let mut i = 0;
    while i + 4 <= bytes.len() {
        let w = u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        chk = chk.wrapping_add(w);
        i += 4;
    }
    chk
}

fn put_f32(out: &mut [u8], at: &mut usize, v: f32) {
    out[*at..*at + 4].copy_from_slice(&v.to_le_bytes());
    *at += 4;
}

fn get_f32(bytes: &[u8], at: &mut usize) -> f32 {
    let v = f32::from_le_bytes([bytes[*at], bytes[*at + 1], bytes[*at + 2], bytes[*at + 3]]);
    *at += 4;
    v
}

fn bytes_to_words<const W: usize>(bytes: &[u8]) -> [u16; W] {
    let mut words = [0u16; W];
    for (i, w) in words.iter_mut().enumerate() {
        *w = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
    }
    words
}

fn words_to_bytes(words: &[u16], out: &mut [u8]) {
    for (i, w) in words.iter().enumerate() {
        out[2 * i..2 * i + 2].copy_from_slice(&w.to_le_bytes());
    }
}

/// AFE calibration constants.
///
/// Gain and offset channel map:
///   0 - Ia    1 - Ib    2 - Ic    3 - In (Rogowski)    4 - Igsrc (CT)
///   5 - Van   6 - Vbn   7 - Vcn   8 - Igsrc (Rogowski) 9 - In (CT)
/// Phase compensation codes:
///   60 Hz: 0 - Ia  1 - Ib  2 - Ic  3 - Van  4 - Vbn  5 - Vcn
///   50 Hz: 6 - Ia  7 - Ib  8 - Ic  9 - Van  10 - Vbn 11 - Vcn
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AfeCal {
    pub gain: [f32; 10],
    pub offset: [f32; 10],
    pub phase: [u8; 12],
    pub chk: u32,
    pub cmp: u32,
}

impl AfeCal {
    pub const BYTES: usize = 100;
    pub const WORDS: usize = Self::BYTES / 2;
    const PAYLOAD: usize = Self::BYTES - 8;

    pub fn default_block() -> Self {
        let mut cal = Self {
            gain: [
                AFE_DEFAULT_IGAIN,
                AFE_DEFAULT_IGAIN,
                AFE_DEFAULT_IGAIN,
                AFE_DEFAULT_IGAIN,
                AFE_CT_IGAIN,
                AFE_DEFAULT_VGAIN,
                AFE_DEFAULT_VGAIN,
                AFE_DEFAULT_VGAIN,
                AFE_DEFAULT_IGAIN,
                AFE_CT_IGAIN,
            ],
            offset: [AFE_DEFAULT_IOFFSET; 10],
            phase: [AFE_DEFAULT_PHASE; 12],
            chk: 0,
            cmp: 0,
        };
        for i in 5..8 {
            cal.offset[i] = AFE_DEFAULT_VOFFSET;
        }
        cal.seal();
        cal
    }

    fn payload(&self, out: &mut [u8; Self::PAYLOAD]) {
        let mut at = 0;
        for g in &self.gain {
            put_f32(out, &mut at, *g);
        }
        for o in &self.offset {
            put_f32(out, &mut at, *o);
        }
        out[at..at + 12].copy_from_slice(&self.phase);
    }

    /// Recompute `chk`/`cmp` from the current field values.
    pub fn seal(&mut self) {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk = checksum32(&buf);
        self.cmp = !self.chk;
    }

    /// True when the checksum matches the payload and `cmp == !chk`.
    pub fn verify(&self) -> bool {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk == checksum32(&buf) && self.cmp == !self.chk
    }

    pub fn to_words(&self) -> [u16; Self::WORDS] {
        let mut bytes = [0u8; Self::BYTES];
        {
            let (payload, tail) = bytes.split_at_mut(Self::PAYLOAD);
            self.payload(payload.try_into().unwrap());
            tail[..4].copy_from_slice(&self.chk.to_le_bytes());
            tail[4..].copy_from_slice(&self.cmp.to_le_bytes());
        }
        bytes_to_words(&bytes)
    }

    pub fn from_words(words: &[u16]) -> Self {
        let mut bytes = [0u8; Self::BYTES];
        words_to_bytes(&words[..Self::WORDS], &mut bytes);
        let mut at = 0;
        let mut cal = Self {
            gain: [0.0; 10],
            offset: [0.0; 10],
            phase: [0; 12],
            chk: 0,
            cmp: 0,
        };
        for g in cal.gain.iter_mut() {
            *g = get_f32(&bytes, &mut at);
        }
        for o in cal.offset.iter_mut() {
            *o = get_f32(&bytes, &mut at);
        }
        cal.phase.copy_from_slice(&bytes[at..at + 12]);
        at += 12;
        cal.chk = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        cal.cmp = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        cal
    }
}

/// ADC calibration constants (one instance per gain path).
///
/// Channel map:
///   0 - Ia    1 - Ib    2 - Ic    3 - In (Rogowski)
///   4 - In (CT)    5 - Van    6 - Vbn    7 - Vcn
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdcCal {
    pub gain: [f32; 8],
    pub offset: [f32; 8],
    pub chk: u32,
    pub cmp: u32,
}

impl AdcCal {
    pub const BYTES: usize = 72;
    pub const WORDS: usize = Self::BYTES / 2;
    const PAYLOAD: usize = Self::BYTES - 8;

    pub fn default_block(igain: f32) -> Self {
        let mut cal = Self {
            gain: [
                igain,
                igain,
                igain,
                igain,
                ADC_CT_IGAIN,
                ADC_DEFAULT_VGAIN,
                ADC_DEFAULT_VGAIN,
                ADC_DEFAULT_VGAIN,
            ],
            offset: [ADC_DEFAULT_IOFFSET; 8],
            chk: 0,
            cmp: 0,
        };
        for i in 5..8 {
            cal.offset[i] = ADC_DEFAULT_VOFFSET;
        }
        cal.seal();
        cal
    }

    pub fn default_high() -> Self {
        Self::default_block(ADC_DEFAULT_IGAIN_HIGH)
    }

    pub fn default_low() -> Self {
        Self::default_block(ADC_DEFAULT_IGAIN_LOW)
    }

    fn payload(&self, out: &mut [u8; Self::PAYLOAD]) {
        let mut at = 0;
        for g in &self.gain {
            put_f32(out, &mut at, *g);
        }
        for o in &self.offset {
            put_f32(out, &mut at, *o);
        }
    }

    pub fn seal(&mut self) {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk = checksum32(&buf);
        self.cmp = !self.chk;
    }

    pub fn verify(&self) -> bool {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk == checksum32(&buf) && self.cmp == !self.chk
    }

    pub fn to_words(&self) -> [u16; Self::WORDS] {
        let mut bytes = [0u8; Self::BYTES];
        {
            let (payload, tail) = bytes.split_at_mut(Self::PAYLOAD);
            self.payload(payload.try_into().unwrap());
            tail[..4].copy_from_slice(&self.chk.to_le_bytes());
            tail[4..].copy_from_slice(&self.cmp.to_le_bytes());
        }
        bytes_to_words(&bytes)
    }

    pub fn from_words(words: &[u16]) -> Self {
        let mut bytes = [0u8; Self::BYTES];
        words_to_bytes(&words[..Self::WORDS], &mut bytes);
        let mut at = 0;
        let mut cal = Self {
            gain: [0.0; 8],
            offset: [0.0; 8],
            chk: 0,
            cmp: 0,
        };
        for g in cal.gain.iter_mut() {
            *g = get_f32(&bytes, &mut at);
        }
        for o in cal.offset.iter_mut() {
            *o = get_f32(&bytes, &mut at);
        }
        cal.chk = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        cal.cmp = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        cal
    }
}

/// Signal-injection calibration: DC midpoints plus per-channel linear
/// models mapping a requested primary RMS current to a DAC code.
///
/// Model index: 0 - Ia, 1 - Ib, 2 - Ic, 3 - In, 4 - ground.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InjCal {
    pub midpoint_ph: f32,
    pub midpoint_gnd: f32,
    pub m_dc: [f32; 5],
    pub b_dc: [f32; 5],
    pub m_sine: [f32; 5],
    pub b_sine: [f32; 5],
    pub chk: u32,
    pub cmp: u32,
}

impl InjCal {
    pub const BYTES: usize = 96;
    pub const WORDS: usize = Self::BYTES / 2;
    const PAYLOAD: usize = Self::BYTES - 8;

    /// Uncalibrated defaults: the linear models are zeroed so an
    /// uncalibrated unit can never synthesize a plausible-looking current.
    pub fn default_block() -> Self {
        let mut cal = Self {
            midpoint_ph: INJ_DEFAULT_MIDPOINT,
            midpoint_gnd: INJ_DEFAULT_MIDPOINT,
            m_dc: [0.0; 5],
            b_dc: [0.0; 5],
            m_sine: [0.0; 5],
            b_sine: [0.0; 5],
            chk: 0,
            cmp: 0,
        };
        cal.seal();
        cal
    }

    fn payload(&self, out: &mut [u8; Self::PAYLOAD]) {
        let mut at = 0;
        put_f32(out, &mut at, self.midpoint_ph);
        put_f32(out, &mut at, self.midpoint_gnd);
        for arr in [&self.m_dc, &self.b_dc, &self.m_sine, &self.b_sine] {
            for v in arr {
                put_f32(out, &mut at, *v);
            }
        }
    }

    pub fn seal(&mut self) {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk = checksum32(&buf);
        self.cmp = !self.chk;
    }

    pub fn verify(&self) -> bool {
        let mut buf = [0u8; Self::PAYLOAD];
        self.payload(&mut buf);
        self.chk == checksum32(&buf) && self.cmp == !self.chk
    }

    pub fn to_words(&self) -> [u16; Self::WORDS] {
        let mut bytes = [0u8; Self::BYTES];
        {
            let (payload, tail) = bytes.split_at_mut(Self::PAYLOAD);
            self.payload(payload.try_into().unwrap());
            tail[..4].copy_from_slice(&self.chk.to_le_bytes());
            tail[4..].copy_from_slice(&self.cmp.to_le_bytes());
        }
        bytes_to_words(&bytes)
    }

    pub fn from_words(words: &[u16]) -> Self {
        let mut bytes = [0u8; Self::BYTES];
        words_to_bytes(&words[..Self::WORDS], &mut bytes);
        let mut at = 0;
        let mut cal = Self {
            midpoint_ph: 0.0,
            midpoint_gnd: 0.0,
            m_dc: [0.0; 5],
            b_dc: [0.0; 5],
            m_sine: [0.0; 5],
            b_sine: [0.0; 5],
            chk: 0,
            cmp: 0,
        };
        cal.midpoint_ph = get_f32(&bytes, &mut at);
        cal.midpoint_gnd = get_f32(&bytes, &mut at);
        for arr in [
            &mut cal.m_dc,
            &mut cal.b_dc,
            &mut cal.m_sine,
            &mut cal.b_sine,
        ] {
            for v in arr.iter_mut() {
                *v = get_f32(&bytes, &mut at);
            }
        }
        cal.chk = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
        cal.cmp = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
        cal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afe_seal_establishes_invariant() {
        let mut cal = AfeCal::default_block();
        assert!(cal.verify());
        assert_eq!(cal.cmp, !cal.chk);

        cal.gain[2] = 9.0;
        assert!(!cal.verify());
        cal.seal();
        assert!(cal.verify());
        assert_eq!(cal.cmp, !cal.chk);
    }

    #[test]
    fn adc_and_inj_seal_invariant() {
        let mut high = AdcCal::default_high();
        let mut low = AdcCal::default_low();
        let mut inj = InjCal::default_block();
        assert!(high.verify() && low.verify() && inj.verify());

        high.offset[0] = 1.25;
        low.gain[7] = 0.5;
        inj.m_sine[3] = 0.01;
        assert!(!high.verify() && !low.verify() && !inj.verify());

        high.seal();
        low.seal();
        inj.seal();
        for (chk, cmp) in [
            (high.chk, high.cmp),
            (low.chk, low.cmp),
            (inj.chk, inj.cmp),
        ] {
            assert_eq!(cmp, !chk);
        }
        assert!(high.verify() && low.verify() && inj.verify());
    }

    #[test]
    fn afe_word_roundtrip() {
        let mut cal = AfeCal::default_block();
        cal.gain[0] = 1.5;
        cal.offset[9] = -0.25;
        cal.phase[11] = 201;
        cal.seal();

        let words = cal.to_words();
        assert_eq!(words.len(), AfeCal::WORDS);
        let back = AfeCal::from_words(&words);
        assert_eq!(back, cal);
        assert!(back.verify());
    }

    #[test]
    fn adc_word_roundtrip() {
        let mut cal = AdcCal::default_high();
        cal.gain[4] = 0.875;
        cal.seal();
        let back = AdcCal::from_words(&cal.to_words());
        assert_eq!(back, cal);
    }

    #[test]
    fn inj_word_roundtrip() {
        let mut cal = InjCal::default_block();
        cal.midpoint_ph = 2381.0;
        cal.m_sine = [0.02, 0.021, 0.019, 0.02, 0.05];
        cal.seal();
        let back = InjCal::from_words(&cal.to_words());
        assert_eq!(back, cal);
    }

    #[test]
    fn corrupted_words_fail_verify() {
        let cal = AfeCal::default_block();
        let mut words = cal.to_words();
        words[3] ^= 0x0100;
        assert!(!AfeCal::from_words(&words).verify());

        // A forged checksum without the matching complement still fails.
        let mut forged = cal;
        forged.gain[1] = 2.0;
        let mut buf = [0u8; 92];
        forged.payload(&mut buf);
        forged.chk = checksum32(&buf);
        assert!(!forged.verify());
    }

    #[test]
    fn default_values_exact() {
        let afe = AfeCal::default_block();
        assert_eq!(afe.gain[0], AFE_DEFAULT_IGAIN);
        assert_eq!(afe.gain[4], AFE_CT_IGAIN);
        assert_eq!(afe.gain[5], AFE_DEFAULT_VGAIN);
        assert_eq!(afe.gain[8], AFE_DEFAULT_IGAIN);
        assert_eq!(afe.gain[9], AFE_CT_IGAIN);
        assert_eq!(afe.offset, [0.0; 10]);
        assert_eq!(afe.phase, [AFE_DEFAULT_PHASE; 12]);

        let high = AdcCal::default_high();
        let low = AdcCal::default_low();
        assert_eq!(high.gain[0], ADC_DEFAULT_IGAIN_HIGH);
        assert_eq!(low.gain[0], ADC_DEFAULT_IGAIN_LOW);
        assert_eq!(high.gain[4], ADC_CT_IGAIN);
        assert_eq!(high.gain[5], ADC_DEFAULT_VGAIN);

        let inj = InjCal::default_block();
        assert_eq!(inj.midpoint_ph, INJ_DEFAULT_MIDPOINT);
        assert_eq!(inj.m_sine, [0.0; 5]);
    }
}
