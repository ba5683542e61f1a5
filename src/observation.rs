//! Observation events
//!
//! Every result the daemon wants an operator or the hub to see, whether from a
//! one-shot command or a monitor tick, is an [`Observation`]: a severity, the
//! device it came from, and a structured [`Event`]. Observations are fanned out
//! through an [`ObservationSink`] (a `tokio::sync::broadcast` channel) and
//! mirrored into `tracing` at the matching level.
//!
//! `Display` on [`Event`] renders the keyword=value form the hub expects, e.g.
//! `pumpErrors=0x0000,"OK"`.

use crate::instrument::status_word::FlagSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Kind of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Normal result.
    Info,
    /// Something is off but the operation carried on.
    Warning,
    /// The operation failed.
    Failure,
}

/// Structured payload of an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Free text.
    Text {
        /// Message body.
        text: String,
    },
    /// The reply did not start with the expected acknowledgement.
    MalformedReply {
        /// Command that was sent.
        command: String,
        /// First bytes actually received.
        received: String,
        /// Prefix that was expected.
        expected: String,
    },
    /// Identification fields.
    Ident {
        /// Model, DSP version, PIC version, full speed.
        fields: Vec<String>,
    },
    /// Pump rotation speed.
    PumpSpeed {
        /// Speed in Hz.
        hz: u32,
    },
    /// Decoded 32-bit status word.
    PumpStatus {
        /// Raw word.
        word: u32,
        /// Names of the set bits.
        flags: Vec<&'static str>,
    },
    /// Decoded warning mask.
    PumpWarnings {
        /// Raw mask.
        mask: u16,
        /// "OK" or the set warning names.
        summary: FlagSummary,
    },
    /// Decoded error mask.
    PumpErrors {
        /// Raw mask.
        mask: u16,
        /// "OK" or the set error names.
        summary: FlagSummary,
    },
    /// Pump temperature pair.
    PumpTemps {
        /// Readings in degrees C.
        temps: [i32; 2],
    },
    /// Elapsed operating times.
    PumpTimes {
        /// Hours per counter.
        hours: [u32; 3],
    },
    /// Remaining service life estimates.
    PumpLife {
        /// Hours per counter.
        hours: [u32; 3],
    },
    /// One pressure reading.
    Pressure {
        /// Pressure in gauge units.
        value: f64,
    },
    /// Monitoring session began.
    MonitorStarted {
        /// Effective period.
        #[serde(with = "secs")]
        period: Duration,
    },
    /// Result of one monitor tick.
    MonitorTick {
        /// Pressure reading (9999 when unreadable).
        pressure: f64,
        /// Pump speed in Hz (0 when unreadable).
        speed: u32,
        /// Pump error mask (all ones when unreadable).
        error_mask: u16,
        /// Decoded error mask.
        error_summary: FlagSummary,
        /// Failure that prevented reading the devices.
        #[serde(skip_serializing_if = "Option::is_none")]
        fault: Option<String>,
    },
    /// The monitoring loop ended.
    LoopStopped,
    /// Stop requested without an active loop.
    NoLoopToStop,
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Text { text } => write!(f, "text={text:?}"),
            Event::MalformedReply {
                command,
                received,
                expected,
            } => write!(
                f,
                "text=\"reply to command {command:?} is the unexpected {received:?} (vs {expected:?})\""
            ),
            Event::Ident { fields } => write!(f, "ident={}", fields.join(",")),
            Event::PumpSpeed { hz } => write!(f, "pumpSpeed={hz}"),
            Event::PumpStatus { word, flags } => {
                write!(f, "pumpStatus=0x{word:04x},{:?}", flags.join(", "))
            }
            Event::PumpWarnings { mask, summary } => {
                write!(f, "pumpWarnings=0x{mask:04x},{:?}", summary.to_string())
            }
            Event::PumpErrors { mask, summary } => {
                write!(f, "pumpErrors=0x{mask:04x},{:?}", summary.to_string())
            }
            Event::PumpTemps { temps } => write!(f, "pumpTemps={},{}", temps[0], temps[1]),
            Event::PumpTimes { hours } => {
                write!(f, "pumpTimes={},{},{}", hours[0], hours[1], hours[2])
            }
            Event::PumpLife { hours } => {
                write!(f, "pumpLife={},{},{}", hours[0], hours[1], hours[2])
            }
            Event::Pressure { value } => write!(f, "pressure={value:e}"),
            Event::MonitorStarted { period } => {
                write!(f, "monitorPeriod={}", period.as_secs_f64())
            }
            Event::MonitorTick {
                pressure,
                speed,
                error_mask,
                error_summary,
                fault,
            } => {
                write!(
                    f,
                    "pressure={pressure:e}; pumpSpeed={speed}; pumpErrors=0x{error_mask:04x},{:?}",
                    error_summary.to_string()
                )?;
                if let Some(fault) = fault {
                    write!(f, "; text={fault:?}")?;
                }
                Ok(())
            }
            Event::LoopStopped => write!(f, "text=\"loop stopped\""),
            Event::NoLoopToStop => write!(f, "text=\"no loop to stop\""),
        }
    }
}

/// One emitted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// When it was emitted.
    pub timestamp: DateTime<Utc>,
    /// Device or component name.
    pub source: String,
    /// Event kind.
    pub severity: Severity,
    /// Structured payload.
    #[serde(flatten)]
    pub event: Event,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Info => 'i',
            Severity::Warning => 'w',
            Severity::Failure => 'f',
        };
        write!(f, "{tag} {} {}", self.source, self.event)
    }
}

/// Broadcast fan-out for observations.
///
/// Cloning shares the channel. Emitting without subscribers is fine; the
/// event still reaches the log.
#[derive(Clone, Debug)]
pub struct ObservationSink {
    tx: broadcast::Sender<Observation>,
}

impl Default for ObservationSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ObservationSink {
    /// Create a sink buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every observation emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.tx.subscribe()
    }

    /// Emit an event with the given severity.
    pub fn emit(&self, source: &str, severity: Severity, event: Event) {
        match severity {
            Severity::Info => info!(source = %source, "{event}"),
            Severity::Warning => warn!(source = %source, "{event}"),
            Severity::Failure => error!(source = %source, "{event}"),
        }
        let _ = self.tx.send(Observation {
            timestamp: Utc::now(),
            source: source.to_string(),
            severity,
            event,
        });
    }

    /// Emit an informational event.
    pub fn inform(&self, source: &str, event: Event) {
        self.emit(source, Severity::Info, event);
    }

    /// Emit a warning event.
    pub fn warn(&self, source: &str, event: Event) {
        self.emit(source, Severity::Warning, event);
    }

    /// Emit a failure event.
    pub fn fail(&self, source: &str, event: Event) {
        self.emit(source, Severity::Failure, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let sink = ObservationSink::new(8);
        let mut rx = sink.subscribe();

        sink.inform("pump", Event::PumpSpeed { hz: 150 });
        sink.warn("monitor", Event::NoLoopToStop);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.severity, Severity::Info);
        assert_eq!(first.event, Event::PumpSpeed { hz: 150 });
        let second = rx.recv().await.unwrap();
        assert_eq!(second.severity, Severity::Warning);
        assert_eq!(second.source, "monitor");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let sink = ObservationSink::new(1);
        sink.fail("gauge", Event::LoopStopped);
    }

    #[test]
    fn test_keyword_rendering() {
        let ev = Event::PumpErrors {
            mask: 0,
            summary: FlagSummary::Ok,
        };
        assert_eq!(ev.to_string(), "pumpErrors=0x0000,\"OK\"");

        let ev = Event::PumpTemps { temps: [31, 28] };
        assert_eq!(ev.to_string(), "pumpTemps=31,28");

        let ev = Event::MonitorTick {
            pressure: 1500.0,
            speed: 150,
            error_mask: 0,
            error_summary: FlagSummary::Ok,
            fault: None,
        };
        assert_eq!(
            ev.to_string(),
            "pressure=1.5e3; pumpSpeed=150; pumpErrors=0x0000,\"OK\""
        );
    }

    #[test]
    fn test_json_shape() {
        let sink_obs = Observation {
            timestamp: Utc::now(),
            source: "gauge".into(),
            severity: Severity::Info,
            event: Event::Pressure { value: 0.5 },
        };
        let json = serde_json::to_value(&sink_obs).unwrap();
        assert_eq!(json["severity"], "info");
        assert_eq!(json["event"], "pressure");
        assert_eq!(json["value"], 0.5);
    }
}
