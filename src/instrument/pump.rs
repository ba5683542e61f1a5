//! Roughing pump controller driver
//!
//! Protocol Overview:
//! - Command: `{type}{code}[ {args}]` + `\r`, type `?` (query) or `!` (control),
//!   code a fixed 4-character register such as `V802`
//! - Reply: `{ack}{code}{fields}` + `\r`, ack `=` for queries and `*` for
//!   controls, fields separated by `;`
//!
//! A reply that does not echo the expected ack and code is reported as a
//! warning and decoded anyway.
//!
//! # Example Usage
//!
//! ```no_run
//! use roughd::adapters::TcpAdapter;
//! use roughd::instrument::PumpDriver;
//! use roughd::observation::ObservationSink;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> roughd::error::RoughResult<()> {
//!     let link = TcpAdapter::new("pump", "rough-pump", 4001, Duration::from_secs(1));
//!     let pump = PumpDriver::new("pump", Arc::new(link), ObservationSink::default());
//!
//!     pump.start().await?;
//!     let status = pump.quick_status().await?;
//!     println!("{} Hz, errors {}", status.speed_hz, status.error_summary);
//!     Ok(())
//! }
//! ```

use super::status_word::{error_summary, status_flags, warning_summary, FlagSummary};
use crate::adapters::Transport;
use crate::error::{RoughError, RoughResult};
use crate::observation::{Event, ObservationSink};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Identification register.
const IDENT: &str = "S801";
/// Run enable.
const RUN: &str = "C802";
/// Standby enable.
const STANDBY: &str = "C803";
/// Standby speed, percent of full speed.
const STANDBY_SPEED: &str = "S805";
/// Speed plus status word, warning and error masks.
const SPEED_STATUS: &str = "V802";
/// Temperatures.
const TEMPERATURES: &str = "V808";

/// Standby speed used when the operator does not give one.
pub const DEFAULT_STANDBY_PERCENT: i32 = 90;

/// Where a lifetime register lands in the two result triples.
struct LifetimeRegister {
    register: u16,
    /// Slot in the elapsed triple, read from reply field 0.
    elapsed_slot: Option<usize>,
    /// Slot in the remaining triple, read from reply field 1.
    remaining_slot: Option<usize>,
}

/// Lifetime registers in the order they must be queried.
const LIFETIME_REGISTERS: [LifetimeRegister; 5] = [
    LifetimeRegister {
        register: 811,
        elapsed_slot: Some(0),
        remaining_slot: None,
    },
    LifetimeRegister {
        register: 810,
        elapsed_slot: Some(1),
        remaining_slot: None,
    },
    LifetimeRegister {
        register: 813,
        elapsed_slot: Some(2),
        remaining_slot: Some(0),
    },
    LifetimeRegister {
        register: 814,
        elapsed_slot: None,
        remaining_slot: Some(1),
    },
    LifetimeRegister {
        register: 815,
        elapsed_slot: None,
        remaining_slot: Some(2),
    },
];

/// Query or control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `?` commands, acknowledged with `=`.
    Query,
    /// `!` commands, acknowledged with `*`.
    Control,
}

impl CommandKind {
    /// Leading character on the wire.
    pub fn prefix(self) -> char {
        match self {
            CommandKind::Query => '?',
            CommandKind::Control => '!',
        }
    }

    /// Leading character of a well-framed reply.
    pub fn ack(self) -> char {
        match self {
            CommandKind::Query => '=',
            CommandKind::Control => '*',
        }
    }
}

/// One pump command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpCommand {
    kind: CommandKind,
    code: String,
    args: Vec<String>,
}

impl PumpCommand {
    /// A `?` command for register `code`.
    pub fn query(code: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Query,
            code: code.into(),
            args: Vec::new(),
        }
    }

    /// A `!` command setting register `code` to `value`.
    pub fn control(code: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            kind: CommandKind::Control,
            code: code.into(),
            args: vec![value.to_string()],
        }
    }

    /// Ack plus code that a correct reply starts with, e.g. `=V802`.
    pub fn expected_ack(&self) -> String {
        format!("{}{}", self.kind.ack(), self.code)
    }
}

impl fmt::Display for PumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.code)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Outcome of checking a reply against its command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// `;`-separated fields after the 5-character header.
    pub fields: Vec<String>,
    /// Header actually received when it did not match.
    pub mismatch: Option<String>,
}

/// Validate the header of `reply` and split its fields.
///
/// The header is the first five characters. Whatever follows is trimmed
/// and split on `;`, whether or not the header matched.
pub fn parse_reply(command: &PumpCommand, reply: &str) -> ParsedReply {
    let expected = command.expected_ack();
    let mismatch = if reply.starts_with(&expected) {
        None
    } else {
        Some(reply.chars().take(5).collect())
    };

    let body = reply.char_indices().nth(5).map_or("", |(i, _)| &reply[i..]);
    let fields = body.trim().split(';').map(str::to_string).collect();

    ParsedReply { fields, mismatch }
}

/// Decimal field `index` of `fields`.
fn dec_field<T: std::str::FromStr>(fields: &[String], index: usize, what: &str) -> RoughResult<T>
where
    T::Err: fmt::Display,
{
    let text = field(fields, index, what)?;
    text.trim()
        .parse::<T>()
        .map_err(|e| RoughError::parse(what, text, e))
}

/// Hex field `index` of `fields`, at most 16 bits.
fn hex16_field(fields: &[String], index: usize, what: &str) -> RoughResult<u16> {
    let text = field(fields, index, what)?;
    u16::from_str_radix(text.trim(), 16).map_err(|e| RoughError::parse(what, text, e))
}

fn field<'a>(fields: &'a [String], index: usize, what: &str) -> RoughResult<&'a str> {
    fields
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| RoughError::parse(what, "", format!("reply has no field {index}")))
}

/// Speed and error mask, from one `?V802`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickStatus {
    /// Rotation speed in Hz.
    pub speed_hz: u32,
    /// Raw 16-bit error mask.
    pub error_mask: u16,
    /// "OK" or the names of the set error bits.
    pub error_summary: FlagSummary,
}

/// The three raw bit fields of `?V802`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStatus {
    /// 32-bit status word.
    pub status_word: u32,
    /// 16-bit warning mask.
    pub warning_mask: u16,
    /// 16-bit error mask.
    pub error_mask: u16,
}

/// Result of [`PumpDriver::speed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedReport {
    /// Rotation speed in Hz.
    pub speed_hz: u32,
    /// Raw bit fields.
    pub status: RawStatus,
    /// Names of the set status word bits.
    pub flags: Vec<&'static str>,
}

/// Elapsed and remaining hour counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PumpLifetimes {
    /// Elapsed operating times.
    pub elapsed: [u32; 3],
    /// Remaining service life estimates.
    pub remaining: [u32; 3],
}

/// Everything [`PumpDriver::status`] collects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    /// Speed and status word.
    pub speed: SpeedReport,
    /// Temperature pair.
    pub temps: [i32; 2],
    /// Hour counters.
    pub lifetimes: PumpLifetimes,
}

/// Driver for the roughing pump controller
///
/// Every operation is one or more complete exchanges over the transport; the
/// driver holds no device state of its own.
#[derive(Clone)]
pub struct PumpDriver {
    name: String,
    transport: Arc<dyn Transport>,
    sink: ObservationSink,
}

impl PumpDriver {
    /// Create a driver reporting observations under `name`.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>, sink: ObservationSink) -> Self {
        Self {
            name: name.into(),
            transport,
            sink,
        }
    }

    /// Observation source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send_text(&self, text: &str) -> RoughResult<String> {
        let raw = self.transport.send(text.as_bytes()).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Send `command` and return the raw reply text.
    async fn send_command(&self, command: &PumpCommand) -> RoughResult<String> {
        self.send_text(&command.to_string()).await
    }

    /// Send `command` and check the reply header. Returns the raw reply and its fields.
    async fn exchange(&self, command: &PumpCommand) -> RoughResult<(String, Vec<String>)> {
        let reply = self.send_command(command).await?;
        let fields = self.check_reply(command, &reply);
        Ok((reply, fields))
    }

    /// Send `command`, check the reply header and split its fields.
    async fn transact(&self, command: &PumpCommand) -> RoughResult<Vec<String>> {
        let (_, fields) = self.exchange(command).await?;
        Ok(fields)
    }

    fn check_reply(&self, command: &PumpCommand, reply: &str) -> Vec<String> {
        let parsed = parse_reply(command, reply);
        if let Some(received) = parsed.mismatch {
            let expected = command.expected_ack();
            warn!(device = %self.name, "reply to {command} starts with {received:?}, expected {expected:?}");
            self.sink.warn(
                &self.name,
                Event::MalformedReply {
                    command: command.to_string(),
                    received,
                    expected,
                },
            );
        }
        parsed.fields
    }

    /// Model, DSP version, PIC version, full speed in RPM.
    pub async fn ident(&self) -> RoughResult<Vec<String>> {
        self.transact(&PumpCommand::query(IDENT)).await
    }

    /// Enable the pump.
    pub async fn start(&self) -> RoughResult<Vec<String>> {
        self.transact(&PumpCommand::control(RUN, 1)).await
    }

    /// Disable the pump.
    pub async fn stop(&self) -> RoughResult<Vec<String>> {
        self.transact(&PumpCommand::control(RUN, 0)).await
    }

    /// Set the standby speed to `percent` of full speed and enter standby.
    ///
    /// The range is enforced by the controller, not here; a rejected speed
    /// shows up as a malformed-reply warning. Returns the raw reply to the
    /// standby enable.
    pub async fn start_standby(&self, percent: i32) -> RoughResult<String> {
        self.transact(&PumpCommand::control(STANDBY_SPEED, percent))
            .await?;
        let (reply, _) = self.exchange(&PumpCommand::control(STANDBY, 1)).await?;
        Ok(reply)
    }

    /// Leave standby and return to full speed. Returns the raw reply.
    pub async fn stop_standby(&self) -> RoughResult<String> {
        let (reply, _) = self.exchange(&PumpCommand::control(STANDBY, 0)).await?;
        Ok(reply)
    }

    async fn speed_fields(&self) -> RoughResult<Vec<String>> {
        self.transact(&PumpCommand::query(SPEED_STATUS)).await
    }

    /// Speed and error mask in one exchange.
    ///
    /// This is what the safety monitor polls, so it emits nothing beyond a
    /// possible malformed-reply warning.
    pub async fn quick_status(&self) -> RoughResult<QuickStatus> {
        let fields = self.speed_fields().await?;
        let speed_hz = dec_field(&fields, 0, "pump speed")?;
        let error_mask = hex16_field(&fields, 4, "pump error mask")?;

        Ok(QuickStatus {
            speed_hz,
            error_mask,
            error_summary: error_summary(error_mask),
        })
    }

    /// Speed plus the full status word breakdown.
    ///
    /// Emits speed and status word observations; warnings and errors are
    /// reported as warnings when any bit is set.
    pub async fn speed(&self) -> RoughResult<SpeedReport> {
        let fields = self.speed_fields().await?;
        let speed_hz: u32 = dec_field(&fields, 0, "pump speed")?;
        let low = hex16_field(&fields, 1, "pump status word")?;
        let high = hex16_field(&fields, 2, "pump status word")?;
        let status = RawStatus {
            status_word: u32::from(low) | (u32::from(high) << 16),
            warning_mask: hex16_field(&fields, 3, "pump warning mask")?,
            error_mask: hex16_field(&fields, 4, "pump error mask")?,
        };

        self.sink.inform(&self.name, Event::PumpSpeed { hz: speed_hz });
        let flags = self.report_status(&status);

        Ok(SpeedReport {
            speed_hz,
            status,
            flags,
        })
    }

    fn report_status(&self, status: &RawStatus) -> Vec<&'static str> {
        let flags = status_flags(status.status_word);
        self.sink.inform(
            &self.name,
            Event::PumpStatus {
                word: status.status_word,
                flags: flags.clone(),
            },
        );

        let warnings = warning_summary(status.warning_mask);
        let event = Event::PumpWarnings {
            mask: status.warning_mask,
            summary: warnings.clone(),
        };
        if warnings.is_ok() {
            self.sink.inform(&self.name, event);
        } else {
            self.sink.warn(&self.name, event);
        }

        let errors = error_summary(status.error_mask);
        let event = Event::PumpErrors {
            mask: status.error_mask,
            summary: errors.clone(),
        };
        if errors.is_ok() {
            self.sink.inform(&self.name, event);
        } else {
            self.sink.warn(&self.name, event);
        }

        flags
    }

    /// The two temperature readings.
    pub async fn pump_temp(&self) -> RoughResult<[i32; 2]> {
        let fields = self.transact(&PumpCommand::query(TEMPERATURES)).await?;
        let temps = [
            dec_field(&fields, 0, "pump temperature")?,
            dec_field(&fields, 1, "pump temperature")?,
        ];
        self.sink.inform(&self.name, Event::PumpTemps { temps });
        Ok(temps)
    }

    /// Elapsed and remaining hour counters, from five queries in fixed order.
    pub async fn pump_lifetimes(&self) -> RoughResult<PumpLifetimes> {
        let mut lifetimes = PumpLifetimes::default();

        for entry in &LIFETIME_REGISTERS {
            let fields = self
                .transact(&PumpCommand::query(format!("V{}", entry.register)))
                .await?;
            if let Some(slot) = entry.elapsed_slot {
                lifetimes.elapsed[slot] = dec_field(&fields, 0, "pump elapsed time")?;
            }
            if let Some(slot) = entry.remaining_slot {
                lifetimes.remaining[slot] = dec_field(&fields, 1, "pump remaining life")?;
            }
        }

        self.sink.inform(
            &self.name,
            Event::PumpTimes {
                hours: lifetimes.elapsed,
            },
        );
        self.sink.inform(
            &self.name,
            Event::PumpLife {
                hours: lifetimes.remaining,
            },
        );
        Ok(lifetimes)
    }

    /// Speed, temperatures and lifetimes in one report.
    pub async fn status(&self) -> RoughResult<PumpReport> {
        let speed = self.speed().await?;
        let temps = self.pump_temp().await?;
        let lifetimes = self.pump_lifetimes().await?;
        Ok(PumpReport {
            speed,
            temps,
            lifetimes,
        })
    }

    /// Send operator text verbatim and return the reply undecoded.
    pub async fn raw_command(&self, text: &str) -> RoughResult<String> {
        self.send_text(text).await
    }
}
