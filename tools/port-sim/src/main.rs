//! Interactive test-port simulator.
//!
//! Wires the test-port dispatcher to stdin/stdout against the simulated
//! sampling front end and calibration store, so the command surface and
//! the calibration flows can be exercised without a breaker on the bench.
//!
//! Lines starting with `!` adjust the simulated hardware; everything else
//! goes to the port verbatim:
//!
//! ```text
//! !current 0 1000      simulated RMS on channel 0 (Ia)
//! !bias 0 0.25         capture DC bias on channel 0
//! !center 2401         injected-current minimum midpoint code
//! !sinegain 40         measured amps per sine amplitude code
//! GCA0 1000.0          a normal test-port command
//! ```

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::Parser;

use tripunit_test_port::sim::{SimHardware, SimStore};
use tripunit_test_port::{CalRam, SensingConfig, TestPort};

/// Test-port simulator for the trip-unit calibration engine.
#[derive(Parser, Debug)]
#[command(name = "port-sim", version)]
struct Cli {
    /// Breaker-frame DC scale factor for the injection driver.
    #[arg(long, default_value_t = 1.0)]
    frame_scale: f32,

    /// Maximum scheduler ticks to run per input line.
    #[arg(long, default_value_t = 2_000_000)]
    max_ticks: u32,

    /// Simulated 200 ms RMS preloaded on every current channel.
    #[arg(long, default_value_t = 0.0)]
    current: f32,

    /// Simulated 200 ms RMS preloaded on every voltage channel.
    #[arg(long, default_value_t = 0.0)]
    voltage: f32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut hw = SimHardware::new();
    for i in 0..5 {
        hw.cycle_rms[i] = cli.current;
        hw.filt_rms[i] = cli.current;
    }
    for i in 5..8 {
        hw.cycle_rms[i] = cli.voltage;
        hw.filt_rms[i] = cli.voltage;
    }

    let mut store = SimStore::new();
    let mut cal = CalRam::new(SensingConfig::default());
    let mut port = TestPort::new(cli.frame_scale);

    // Bring the port out of init and establish the session.
    port.push_byte(b'\n');
    pump(&mut port, &mut cal, &mut hw, &mut store, cli.max_ticks)?;
    flush_output(&mut port)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let trimmed = line.trim();
        if trimmed == "!quit" {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix('!') {
            apply_sim_command(&mut hw, rest)?;
            continue;
        }

        for byte in line.bytes() {
            if !port.push_byte(byte) {
                bail!("command too long for the port's input ring");
            }
        }
        port.push_byte(b'\n');
        pump(&mut port, &mut cal, &mut hw, &mut store, cli.max_ticks)?;
        flush_output(&mut port)?;
    }
    Ok(())
}

fn pump(
    port: &mut TestPort,
    cal: &mut CalRam,
    hw: &mut SimHardware,
    store: &mut SimStore,
    max_ticks: u32,
) -> Result<()> {
    for _ in 0..max_ticks {
        port.tick(cal, hw, store);
        hw.step(1);
        if port.needs_input() && !port.session.rx.contains(b'\n') {
            return Ok(());
        }
    }
    bail!("port did not return to the prompt within {max_ticks} ticks")
}

fn flush_output(port: &mut TestPort) -> Result<()> {
    let bytes = port.session.take_tx();
    let mut stdout = io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

fn apply_sim_command(hw: &mut SimHardware, rest: &str) -> Result<()> {
    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    match verb {
        "current" => {
            let ch: usize = parse(parts.next())?;
            let value: f32 = parse(parts.next())?;
            if ch >= 8 {
                bail!("channel index 0..=7");
            }
            hw.cycle_rms[ch] = value;
            hw.filt_rms[ch] = value;
        }
        "bias" => {
            let ch: usize = parse(parts.next())?;
            let value: f32 = parse(parts.next())?;
            if ch >= 8 {
                bail!("channel index 0..=7");
            }
            hw.capture_bias[ch] = value;
        }
        "center" => hw.inj_v_center = parse(parts.next())?,
        "sinegain" => hw.inj_sine_gain = parse(parts.next())?,
        "power" => {
            let phase: usize = parse(parts.next())?;
            if phase >= 3 {
                bail!("phase index 0..=2");
            }
            hw.power[phase] = parse(parts.next())?;
        }
        other => bail!("unknown sim command {other:?}"),
    }
    Ok(())
}

fn parse<T: core::str::FromStr>(part: Option<&str>) -> Result<T> {
    let part = part.context("missing argument")?;
    part.parse()
        .map_err(|_| anyhow::anyhow!("bad argument {part:?}"))
}
