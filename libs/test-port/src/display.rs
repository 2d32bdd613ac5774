//! Read-only diagnostic display handlers.
//!
//! These answer the D* and L* commands with one summary line each. They
//! read the sample aggregates and the calibration state but never mutate
//! anything; the heavy ASCII table formatting of the production console
//! lives with the display processor, not here.

use core::fmt::Write;

use crate::hw::{CalPath, Channel, Hardware};
use crate::inject::Injector;
use crate::session::Session;
use crate::store::CalRam;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayKind {
    /// Real-time one-cycle currents, corrected.
    Dr,
    /// Per-phase real power.
    De,
    /// Raw (uncorrected) one-cycle readings.
    Dw,
    /// Calibration/diagnostic status.
    Dq,
    /// 200 ms metered currents and voltages, corrected.
    Dm,
    /// Alarm capture status.
    Da,
    /// Extended capture status.
    Dx,
    /// Summary event log.
    Dv,
    /// Trip event log.
    Di,
    /// Test trip event log.
    Df,
    /// Alarm event log.
    Dn,
    /// Time-adjustment event log.
    Dj,
    /// Disturbance capture log.
    Dz,
    /// AFE gains.
    Ls,
    /// AFE offsets.
    Lt,
    /// AFE phase codes.
    Lr,
    /// ADC high-gain path gains.
    Lm,
    /// ADC high-gain path offsets.
    Ld,
    /// ADC low-gain path gains.
    Lu,
    /// ADC low-gain path offsets.
    Lv,
    /// Injection calibration.
    Lw,
}

const CURRENTS: [Channel; 5] = [
    Channel::Ia,
    Channel::Ib,
    Channel::Ic,
    Channel::In,
    Channel::Igsrc,
];

const VOLTAGES: [Channel; 3] = [Channel::Van, Channel::Vbn, Channel::Vcn];

pub fn run<H: Hardware>(kind: DisplayKind, session: &mut Session, cal: &CalRam, hw: &H) {
    match kind {
        DisplayKind::Dr => {
            for ch in CURRENTS {
                let value = cal
                    .scaled(CalPath::Afe, ch, hw.one_cycle_rms(ch))
                    .unwrap_or(0.0);
                let _ = write!(session, "\r\n{} {}", ch.label(), value);
            }
        }
        DisplayKind::De => {
            for (i, name) in ["Pa", "Pb", "Pc"].iter().enumerate() {
                let _ = write!(session, "\r\n{} {}", name, hw.power200(i));
            }
        }
        DisplayKind::Dw => {
            for ch in CURRENTS {
                let _ = write!(session, "\r\n{} raw {}", ch.label(), hw.one_cycle_rms(ch));
            }
        }
        DisplayKind::Dq => {
            let _ = write!(session, "\r\ndiag {:#06x}", cal.diag);
            for (name, chk, cmp) in [
                ("afe", cal.afe.chk, cal.afe.cmp),
                ("adch", cal.adc_high.chk, cal.adc_high.cmp),
                ("adcl", cal.adc_low.chk, cal.adc_low.cmp),
                ("inj", cal.inj.chk, cal.inj.cmp),
            ] {
                let ok = cmp == !chk;
                let _ = write!(session, "\r\n{} chk {:#010x} {}", name, chk, ok);
            }
        }
        DisplayKind::Dm => {
            for ch in CURRENTS.iter().chain(VOLTAGES.iter()) {
                let value = cal
                    .scaled(CalPath::Afe, *ch, hw.filt200_rms(*ch))
                    .unwrap_or(0.0);
                let _ = write!(session, "\r\n{} {}", ch.label(), value);
            }
        }
        DisplayKind::Da => {
            let _ = write!(session, "\r\nalarm capture idle, tick {}", hw.tick10());
        }
        DisplayKind::Dx => {
            let _ = write!(session, "\r\next capture idle, tick {}", hw.tick10());
        }
        DisplayKind::Dv
        | DisplayKind::Di
        | DisplayKind::Df
        | DisplayKind::Dn
        | DisplayKind::Dj
        | DisplayKind::Dz => {
            // The event log lives with the event subsystem; the port only
            // reports what it can see from here.
            let name = match kind {
                DisplayKind::Dv => "summary",
                DisplayKind::Di => "trip",
                DisplayKind::Df => "test trip",
                DisplayKind::Dn => "alarm",
                DisplayKind::Dj => "time adj",
                _ => "disturbance",
            };
            let _ = write!(session, "\r\n{} log: external", name);
        }
        DisplayKind::Ls => dump(session, "afe gain", &cal.afe.gain),
        DisplayKind::Lt => dump(session, "afe offset", &cal.afe.offset),
        DisplayKind::Lr => {
            session.puts("\r\nafe phase");
            for code in cal.afe.phase {
                let _ = write!(session, " {}", code);
            }
        }
        DisplayKind::Lm => dump(session, "adch gain", &cal.adc_high.gain),
        DisplayKind::Ld => dump(session, "adch offset", &cal.adc_high.offset),
        DisplayKind::Lu => dump(session, "adcl gain", &cal.adc_low.gain),
        DisplayKind::Lv => dump(session, "adcl offset", &cal.adc_low.offset),
        DisplayKind::Lw => {
            let inj = &cal.inj;
            let _ = write!(
                session,
                "\r\ninj mid {} {}",
                inj.midpoint_ph, inj.midpoint_gnd
            );
            dump(session, "m sine", &inj.m_sine);
            dump(session, "b sine", &inj.b_sine);
            dump(session, "m dc", &inj.m_dc);
            dump(session, "b dc", &inj.b_dc);
        }
    }
}

fn dump(session: &mut Session, name: &str, values: &[f32]) {
    let _ = write!(session, "\r\n{}", name);
    for value in values {
        let _ = write!(session, " {}", value);
    }
}

/// TI: current injection drive state.
pub fn injection_status<H: Hardware>(session: &mut Session, injector: &Injector, hw: &H) {
    let (amplitude, midpoint, channel) = injector.drive();
    let _ = write!(
        session,
        "\r\ninj {} ch {} amp {} mid {} prot {}",
        if injector.active() { "on" } else { "off" },
        channel,
        amplitude,
        midpoint,
        hw.protection_enabled(),
    );
}
