//! Log sinks for the ranging task: defmt on target, stdout on the host.

use cs_ranging_core::hci::DecodeError;
use cs_ranging_core::procedure::{ConnHandle, PassReport, PoolError};
use cs_ranging_core::ranging::DistanceReport;
use cs_ranging_core::telemetry::{TelemetryEventKind, TelemetryRecord};

use crate::console::ConsoleError;

#[derive(Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

pub fn pass(conn: ConnHandle, report: &PassReport) {
    let consumed = report.consumed.map_or("-", |step| step.label());
    let issued = report.issued.map_or("-", |step| step.label());
    match (report.prompted, report.failed) {
        (_, Some(error)) => emit_pass_failure(conn.raw(), consumed, error.code()),
        (Some(step), None) => emit_prompt(conn.raw(), step.label()),
        (None, None) => emit_pass(conn.raw(), consumed, issued),
    }
}

pub fn distance(report: &DistanceReport) {
    for (index, channel) in report.channels.iter().enumerate() {
        emit_distance(
            report.conn.raw(),
            report.procedure_counter,
            index,
            channel.raw,
            channel.filtered,
        );
    }
}

/// Logs telemetry the pass and distance lines do not already cover.
pub fn telemetry(record: &TelemetryRecord) {
    let level = match record.event {
        TelemetryEventKind::CommandIssued(_)
        | TelemetryEventKind::CommandFailed(_)
        | TelemetryEventKind::StepCompleted(_)
        | TelemetryEventKind::OperatorPrompt(_)
        | TelemetryEventKind::DistanceReported => return,
        event if event.is_fault() => Level::Error,
        event if event.is_warning() => Level::Warn,
        _ => Level::Info,
    };
    emit_telemetry(level, record);
}

pub fn decode_error(error: DecodeError) {
    emit_error("hci", &error);
}

pub fn pool_error(error: PoolError) {
    emit_error("pool", &error);
}

pub fn console_error(error: ConsoleError) {
    emit_error("console", &error);
}

#[cfg(target_os = "none")]
fn emit_pass(conn: u16, consumed: &str, issued: &str) {
    defmt::debug!("ranging:pass conn={} completed={} issued={}", conn, consumed, issued);
}

#[cfg(not(target_os = "none"))]
fn emit_pass(conn: u16, consumed: &str, issued: &str) {
    println!("ranging:pass conn={conn} completed={consumed} issued={issued}");
}

#[cfg(target_os = "none")]
fn emit_prompt(conn: u16, step: &str) {
    defmt::info!("ranging:prompt conn={} waiting for operator: {}", conn, step);
}

#[cfg(not(target_os = "none"))]
fn emit_prompt(conn: u16, step: &str) {
    println!("ranging:prompt conn={conn} waiting for operator: {step}");
}

#[cfg(target_os = "none")]
fn emit_pass_failure(conn: u16, consumed: &str, status: u8) {
    defmt::warn!(
        "ranging:pass conn={} completed={} send failed status={:#x}",
        conn,
        consumed,
        status
    );
}

#[cfg(not(target_os = "none"))]
fn emit_pass_failure(conn: u16, consumed: &str, status: u8) {
    println!("ranging:pass conn={conn} completed={consumed} send failed status=0x{status:02x}");
}

#[cfg(target_os = "none")]
fn emit_distance(conn: u16, counter: u16, channel: usize, raw: f32, filtered: Option<f32>) {
    match filtered {
        Some(meters) => defmt::info!(
            "ranging:distance conn={} procedure={} ch={} raw={}m filtered={}m",
            conn,
            counter,
            channel,
            raw,
            meters
        ),
        None => defmt::info!(
            "ranging:distance conn={} procedure={} ch={} raw={}m",
            conn,
            counter,
            channel,
            raw
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_distance(conn: u16, counter: u16, channel: usize, raw: f32, filtered: Option<f32>) {
    match filtered {
        Some(meters) => println!(
            "ranging:distance conn={conn} procedure={counter} ch={channel} raw={raw:.2}m filtered={meters:.2}m"
        ),
        None => println!("ranging:distance conn={conn} procedure={counter} ch={channel} raw={raw:.2}m"),
    }
}

#[cfg(target_os = "none")]
fn emit_telemetry(level: Level, record: &TelemetryRecord) {
    let record = defmt::Display2Format(record);
    match level {
        Level::Info => defmt::info!("ranging:telemetry {}", record),
        Level::Warn => defmt::warn!("ranging:telemetry {}", record),
        Level::Error => defmt::error!("ranging:telemetry {}", record),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_telemetry(level: Level, record: &TelemetryRecord) {
    let label = match level {
        Level::Info => "info",
        Level::Warn => "warn",
        Level::Error => "error",
    };
    println!("ranging:telemetry {label} {record}");
}

#[cfg(target_os = "none")]
fn emit_error<E: core::fmt::Display>(scope: &str, error: &E) {
    defmt::warn!("ranging:{} {}", scope, defmt::Display2Format(error));
}

#[cfg(not(target_os = "none"))]
fn emit_error<E: core::fmt::Display>(scope: &str, error: &E) {
    println!("ranging:{scope} {error}");
}

#[cfg(target_os = "none")]
pub fn console(text: &str) {
    for line in text.lines() {
        defmt::println!("{}", line);
    }
}

#[cfg(not(target_os = "none"))]
pub fn console(text: &str) {
    for line in text.lines() {
        println!("{line}");
    }
}
