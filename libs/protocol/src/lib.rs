//! Execute-action wire records.
//!
//! The protocol front end receives fixed-offset binary records from the
//! external messaging layer: an action selector byte, the target channel
//! at byte offset 8 and, for the operations that need one, a 32-bit
//! little-endian fixed-point value at offset 9 (sixteenths of a primary
//! unit). LED/relay manufacturing tests reuse the value field's first two
//! bytes as a 16-bit output image.

#![no_std]

#[cfg(test)]
extern crate std;

/// Byte offset of the channel field in an execute-action record.
pub const CHANNEL_OFFSET: usize = 8;
/// Byte offset of the 32-bit fixed-point value field.
pub const VALUE_OFFSET: usize = 9;
/// Minimum record length covering the value field.
pub const RECORD_LEN: usize = VALUE_OFFSET + 4;

/// Fixed-point scale of the value field: sixteenths.
pub const VALUE_SCALE: f32 = 16.0;

/// Aggregate channel code: Ia, Ib, Ic, In and ground in one run.
pub const CHANNEL_ALL_CURRENTS: u8 = 8;
/// Aggregate channel code: Van, Vbn, Vcn in one run.
pub const CHANNEL_ALL_VOLTAGES: u8 = 9;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    AfeGain = 0,
    AfeOffset = 1,
    AdcHighGain = 2,
    AdcHighOffset = 3,
    AdcLowGain = 4,
    AdcLowOffset = 5,
    WriteCal = 6,
    LedTest = 7,
    RelayTest = 8,
    InjOffset = 9,
    InjGain = 10,
}

impl ActionKind {
    /// True for the operations that carry a reference value.
    pub fn wants_value(self) -> bool {
        matches!(
            self,
            ActionKind::AfeGain
                | ActionKind::AdcHighGain
                | ActionKind::AdcLowGain
                | ActionKind::InjGain
        )
    }
}

impl TryFrom<u8> for ActionKind {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ActionKind::AfeGain),
            1 => Ok(ActionKind::AfeOffset),
            2 => Ok(ActionKind::AdcHighGain),
            3 => Ok(ActionKind::AdcHighOffset),
            4 => Ok(ActionKind::AdcLowGain),
            5 => Ok(ActionKind::AdcLowOffset),
            6 => Ok(ActionKind::WriteCal),
            7 => Ok(ActionKind::LedTest),
            8 => Ok(ActionKind::RelayTest),
            9 => Ok(ActionKind::InjOffset),
            10 => Ok(ActionKind::InjGain),
            _ => Err(()),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    TooShort,
    UnknownAction(u8),
}

/// A decoded execute-action request.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub channel: u8,
    /// Reference value in primary units; 0.0 for operations without one.
    pub target: f32,
    /// Raw 16-bit image for the LED/relay manufacturing tests.
    pub image: u16,
}

/// Decode an execute-action record.
///
/// `kind` is the action selector byte from the message envelope; `msg` is
/// the record body with the channel at [`CHANNEL_OFFSET`].
pub fn decode_action(kind: u8, msg: &[u8]) -> Result<ActionRequest, DecodeError> {
    let kind = ActionKind::try_from(kind).map_err(|_| DecodeError::UnknownAction(kind))?;

    if msg.len() < RECORD_LEN {
        return Err(DecodeError::TooShort);
    }

    let channel = msg[CHANNEL_OFFSET];
    let raw = u32::from_le_bytes([
        msg[VALUE_OFFSET],
        msg[VALUE_OFFSET + 1],
        msg[VALUE_OFFSET + 2],
        msg[VALUE_OFFSET + 3],
    ]);
    let target = if kind.wants_value() {
        raw as f32 / VALUE_SCALE
    } else {
        0.0
    };
    let image = u16::from_le_bytes([msg[VALUE_OFFSET], msg[VALUE_OFFSET + 1]]);

    Ok(ActionRequest {
        kind,
        channel,
        target,
        image,
    })
}
