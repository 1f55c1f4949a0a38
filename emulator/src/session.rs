use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use cs_ranging_core::RangingController;
use cs_ranging_core::config::RangingSettings;
use cs_ranging_core::hci::decode_event;
use cs_ranging_core::procedure::{ConnHandle, LinkError, LinkRole, PassReport};
use cs_ranging_core::ranging::DistanceReport;
use cs_ranging_core::repl::catalog::{self, CommandSpec};
use cs_ranging_core::repl::commands::{CommandError, CommandExecutor, CommandOutcome};
use cs_ranging_core::telemetry::EventId;

use crate::peer::{SimEstimator, SimPeer};

/// Upper bound on passes for `run`, well above a full negotiation.
const RUN_PASS_LIMIT: usize = 32;

/// Commands only the emulator understands; the rest come from the shared catalog.
pub const EMULATOR_TOPICS: &[(&str, &str)] = &[
    (
        "connect",
        "connect <conn> [central|peripheral]  - attach a simulated peer that supports ranging",
    ),
    (
        "disconnect",
        "disconnect <conn>                     - drop the link and its configurations",
    ),
    (
        "tick",
        "tick [count]                          - run driver-loop passes",
    ),
    (
        "run",
        "run                                   - run passes until every record is quiet",
    ),
    (
        "measure",
        "measure <conn> <meters>               - simulate one complete procedure",
    ),
    (
        "busy",
        "busy                                  - make the next command fail with link busy",
    ),
    (
        "log",
        "log                                   - print telemetry recorded since the last log",
    ),
];

type Controller = RangingController<SimEstimator>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SettingsProfile {
    Auto,
    Manual,
}

impl SettingsProfile {
    pub fn tag(self) -> &'static str {
        match self {
            SettingsProfile::Auto => "auto",
            SettingsProfile::Manual => "manual",
        }
    }

    pub fn settings(self) -> RangingSettings {
        match self {
            SettingsProfile::Auto => RangingSettings::DEFAULT,
            SettingsProfile::Manual => RangingSettings::manual(),
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else if tag.eq_ignore_ascii_case("manual") {
            Ok(Self::Manual)
        } else {
            Err(format!("Unknown settings profile `{tag}`"))
        }
    }
}

pub struct Session {
    profile: SettingsProfile,
    executor: CommandExecutor<Controller>,
    peer: SimPeer,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    telemetry_cursor: EventId,
}

impl Session {
    pub fn new(profile: SettingsProfile, transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript
            .map(|path| TranscriptLogger::new(path, profile))
            .transpose()?;
        let controller = RangingController::new(profile.settings(), SimEstimator::default());

        Ok(Self {
            profile,
            executor: CommandExecutor::new(controller),
            peer: SimPeer::new(),
            transcript,
            started_at: HostInstant::now(),
            telemetry_cursor: 0,
        })
    }

    pub fn profile(&self) -> SettingsProfile {
        self.profile
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = &mut self.transcript {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = self.dispatch(trimmed);
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn dispatch(&mut self, line: &str) -> Vec<String> {
        let mut words = line.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match keyword.as_str() {
            "help" => self.handle_help(args.first().copied()),
            "connect" => self.handle_connect(&args),
            "disconnect" => self.handle_disconnect(&args),
            "tick" => match args.first().map(|count| count.parse::<usize>()) {
                None => self.run_passes(1, false),
                Some(Ok(count)) => self.run_passes(count, false),
                Some(Err(_)) => vec!["ERR tick expects a pass count".to_string()],
            },
            "run" => self.run_passes(RUN_PASS_LIMIT, true),
            "measure" => self.handle_measure(&args),
            "busy" => {
                self.peer.fail_next(LinkError::Busy);
                vec!["OK next command will fail (link busy)".to_string()]
            }
            "log" => self.drain_telemetry(),
            _ => self.handle_shared(line),
        }
    }

    fn handle_shared(&mut self, line: &str) -> Vec<String> {
        match self.executor.execute(line) {
            Ok(CommandOutcome::Scheduled { conn, step }) => {
                vec![format!("OK {step} scheduled conn={conn}")]
            }
            Ok(CommandOutcome::Status(report)) if report.is_empty() => {
                vec!["no active connections".to_string()]
            }
            Ok(CommandOutcome::Status(report)) => {
                report.iter().map(ToString::to_string).collect()
            }
            Ok(CommandOutcome::Help(spec)) => help_lines(spec),
            Err(CommandError::Parse(err)) => vec![format!("ERR syntax {err}")],
            Err(CommandError::Trigger(err)) => vec![format!("ERR trigger {err}")],
            Err(err @ CommandError::UnknownTopic(_)) => vec![format!("ERR {err}")],
        }
    }

    fn handle_help(&mut self, topic: Option<&str>) -> Vec<String> {
        let Some(topic) = topic else {
            let mut lines = help_lines(None);
            for (_, detail) in EMULATOR_TOPICS {
                lines.push(format!("  {detail}"));
            }
            return lines;
        };

        if let Some((_, detail)) = EMULATOR_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        {
            return vec![(*detail).to_string()];
        }
        self.handle_shared(&format!("help {topic}"))
    }

    fn handle_connect(&mut self, args: &[&str]) -> Vec<String> {
        let Some(conn) = args.first().and_then(|raw| parse_conn(raw)) else {
            return vec!["ERR connect expects a handle 0..=0x0EFF".to_string()];
        };
        let role = match args.get(1) {
            None => LinkRole::Central,
            Some(role) if role.eq_ignore_ascii_case("central") => LinkRole::Central,
            Some(role) if role.eq_ignore_ascii_case("peripheral") => LinkRole::Peripheral,
            Some(other) => return vec![format!("ERR connect unknown role `{other}`")],
        };

        match self.controller_mut().on_ranging_supported(conn, role) {
            Ok(slot) => {
                self.peer.connect(conn);
                vec![format!("OK connect conn={conn} role={role} slot={slot}")]
            }
            Err(err) => vec![format!("ERR connect {err}")],
        }
    }

    fn handle_disconnect(&mut self, args: &[&str]) -> Vec<String> {
        let Some(conn) = args.first().and_then(|raw| parse_conn(raw)) else {
            return vec!["ERR disconnect expects a handle 0..=0x0EFF".to_string()];
        };
        self.peer.disconnect(conn);
        if self.controller_mut().on_disconnect(conn) {
            vec![format!("OK disconnect conn={conn}")]
        } else {
            vec![format!("ERR disconnect no ranging procedure on conn {conn}")]
        }
    }

    fn handle_measure(&mut self, args: &[&str]) -> Vec<String> {
        let conn = args.first().and_then(|raw| parse_conn(raw));
        let meters = args.get(1).and_then(|raw| raw.parse::<f32>().ok());
        let (Some(conn), Some(meters)) = (conn, meters) else {
            return vec!["ERR measure expects <conn> <meters>".to_string()];
        };

        let procedure = match self.peer.queue_procedure(conn, meters) {
            Ok(procedure) => procedure,
            Err(err) => return vec![format!("ERR measure {err}")],
        };

        let mut lines = Vec::new();
        self.deliver_events(&mut lines);
        let report = self.controller_mut().submit_remote(
            conn,
            procedure.procedure_counter,
            &procedure.remote_steps,
        );
        match report {
            Some(report) => lines.extend(describe_report(&report)),
            None => lines.push(format!(
                "procedure {} produced no distance (see `log`)",
                procedure.procedure_counter
            )),
        }
        lines
    }

    fn run_passes(&mut self, limit: usize, until_quiet: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..limit {
            let passes = self.executor.control_mut().tick(&mut self.peer);
            let now = self.executor.control().now();
            lines.extend(self.peer.drain_sent());
            for (conn, report) in &passes {
                lines.push(describe_pass(now, *conn, report));
            }
            let delivered = self.deliver_events(&mut lines);

            let idle = self
                .executor
                .control()
                .pool()
                .records()
                .all(cs_ranging_core::procedure::ProcedureRecord::is_idle);
            if until_quiet && passes.is_empty() && delivered == 0 && idle {
                break;
            }
        }
        if lines.is_empty() {
            lines.push("idle".to_string());
        }
        lines
    }

    /// Decodes and dispatches every queued event packet; returns the count.
    fn deliver_events(&mut self, lines: &mut Vec<String>) -> usize {
        let mut delivered = 0;
        while let Some(packet) = self.peer.pop_event() {
            delivered += 1;
            let controller = self.executor.control_mut();
            match decode_event(&packet) {
                Ok(event) => {
                    lines.push(format!("RX {} conn={}", event.kind(), event.conn()));
                    if let Some(report) = controller.handle_event(&event) {
                        lines.extend(describe_report(&report));
                    }
                }
                Err(err) => lines.push(format!("ERR decode {err}")),
            }
        }
        delivered
    }

    fn drain_telemetry(&mut self) -> Vec<String> {
        let telemetry = self.executor.control().telemetry();
        let lines: Vec<String> = telemetry
            .since(self.telemetry_cursor)
            .map(ToString::to_string)
            .collect();
        self.telemetry_cursor = telemetry.next_event_id();
        if lines.is_empty() {
            vec!["no new telemetry".to_string()]
        } else {
            lines
        }
    }

    fn controller_mut(&mut self) -> &mut Controller {
        self.executor.control_mut()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        let Some(transcript) = &mut self.transcript else {
            return Ok(());
        };
        for line in lines {
            transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn parse_conn(raw: &str) -> Option<ConnHandle> {
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok()?,
        None => raw.parse::<u16>().ok()?,
    };
    ConnHandle::new(value)
}

fn help_lines(spec: Option<&'static CommandSpec>) -> Vec<String> {
    match spec {
        Some(spec) => vec![format!("{}  - {}", spec.usage, spec.summary)],
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            for spec in catalog::commands() {
                lines.push(format!("  {:<37} - {}", spec.usage, spec.summary));
            }
            lines
        }
    }
}

fn describe_pass(now: u32, conn: ConnHandle, report: &PassReport) -> String {
    let mut line = format!("pass {now} conn={conn}");
    if let Some(step) = report.consumed {
        line.push_str(&format!(" completed={step}"));
    }
    if let Some(step) = report.issued {
        line.push_str(&format!(" issued={step}"));
    }
    if let Some(step) = report.prompted {
        line.push_str(&format!(" waiting-for-operator={step}"));
    }
    if let Some(error) = report.failed {
        line.push_str(&format!(" failed=\"{error}\""));
    }
    line
}

fn describe_report(report: &DistanceReport) -> Vec<String> {
    report
        .channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            let filtered = channel
                .filtered
                .map_or_else(|| "pending".to_string(), |meters| format!("{meters:.2}m"));
            format!(
                "DIST conn={} procedure={} channel={index} raw={:.2}m filtered={filtered}",
                report.conn, report.procedure_counter, channel.raw
            )
        })
        .collect()
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, profile: SettingsProfile) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: SettingsProfile) -> io::Result<()> {
        writeln!(
            self.writer,
            "# CS Ranging Emulator transcript ({} negotiation)",
            profile.tag()
        )?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(profile: SettingsProfile) -> Session {
        Session::new(profile, None).expect("session without transcript")
    }

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("no transcript io")
    }

    #[test]
    fn automatic_negotiation_reaches_ranging() {
        let mut session = session(SettingsProfile::Auto);
        assert_eq!(run(&mut session, "connect 7"), ["OK connect conn=7 role=central slot=0"]);
        run(&mut session, "run");

        let status = run(&mut session, "status 7");
        assert_eq!(status.len(), 1);
        assert!(status[0].contains("ranging=on"), "{status:?}");

        let lines = run(&mut session, "measure 7 2.5");
        assert!(
            lines.iter().any(|line| line.starts_with("DIST conn=7 procedure=0")),
            "{lines:?}"
        );
        assert_eq!(session.executor.control().estimator().estimates(), 1);
    }

    #[test]
    fn manual_negotiation_waits_for_operator() {
        let mut session = session(SettingsProfile::Manual);
        run(&mut session, "connect 3");
        let lines = run(&mut session, "run");
        assert!(
            lines
                .iter()
                .any(|line| line.contains("waiting-for-operator=create-config")),
            "{lines:?}"
        );
        assert_eq!(
            run(&mut session, "config 3 id=1"),
            ["OK create-config scheduled conn=3"]
        );
        run(&mut session, "run");
        assert!(
            session
                .executor
                .control()
                .registry()
                .find(parse_conn("3").expect("valid"), 1)
                .is_some()
        );
    }

    #[test]
    fn busy_link_is_reported_and_logged() {
        let mut session = session(SettingsProfile::Auto);
        run(&mut session, "connect 0x0040");
        run(&mut session, "busy");
        let lines = run(&mut session, "tick");
        assert!(lines.iter().any(|line| line.contains("failed=")), "{lines:?}");
        let log = run(&mut session, "log");
        assert!(log.iter().any(|line| line.contains("conn=64")), "{log:?}");
        assert_eq!(run(&mut session, "log"), ["no new telemetry"]);
    }

    #[test]
    fn unknown_input_is_a_syntax_error() {
        let mut session = session(SettingsProfile::Auto);
        let lines = run(&mut session, "reboot now");
        assert!(lines[0].starts_with("ERR syntax"), "{lines:?}");
        assert_eq!(run(&mut session, "disconnect 5").len(), 1);
    }
}
