//! Pressure gauge driver
//!
//! The gauge speaks a telegram protocol with its own envelope:
//!
//! ```text
//! AAA  AC  PPP  LL  data...  CCC  \r
//! |    |   |    |            checksum: sum of all preceding bytes mod 256
//! |    |   |    data length in characters
//! |    |   parameter number (740 = pressure)
//! |    action: 00 query, 10 set or reply
//! address
//! ```
//!
//! A query carries the data `=?`. Pressure replies use the `u_expo_new`
//! format `mmmmee`, meaning mmmm/1000 * 10^(ee - 20), in hPa.

use crate::adapters::Transport;
use crate::error::{RoughError, RoughResult};
use crate::observation::{Event, ObservationSink};
use std::sync::Arc;
use tracing::warn;

/// Parameter number of the pressure reading.
pub const PRESSURE_PARAM: u16 = 740;

const ACTION_QUERY: &str = "00";
const ACTION_SET: &str = "10";
const QUERY_DATA: &str = "=?";

/// Address, action, parameter, length.
const HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 3;

/// Checksum over `text`: byte sum mod 256.
pub fn checksum(text: &str) -> u8 {
    text.bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
}

/// Longest data field the two-digit length can describe.
pub const MAX_DATA_LEN: usize = 99;

/// Build a complete telegram (without terminator).
///
/// # Errors
///
/// `RoughError::Protocol` if `data` is longer than [`MAX_DATA_LEN`].
pub fn make_telegram(address: u16, action: &str, param: u16, data: &str) -> RoughResult<String> {
    if data.len() > MAX_DATA_LEN {
        return Err(RoughError::Protocol(format!(
            "gauge telegram data is {} characters, at most {MAX_DATA_LEN} fit",
            data.len()
        )));
    }
    let body = format!("{address:03}{action}{param:03}{:02}{data}", data.len());
    let sum = checksum(&body);
    Ok(format!("{body}{sum:03}"))
}

/// A decoded reply telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeReply {
    /// Responding address.
    pub address: u16,
    /// Parameter the reply is about.
    pub param: u16,
    /// Data field.
    pub payload: String,
    /// False when the transmitted checksum did not match.
    pub checksum_ok: bool,
}

fn digits(text: &str, what: &str) -> RoughResult<u16> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RoughError::Protocol(format!(
            "gauge telegram {what} {text:?} is not numeric"
        )));
    }
    text.parse()
        .map_err(|e| RoughError::Protocol(format!("gauge telegram {what} {text:?}: {e}")))
}

/// Split a raw reply into its envelope fields.
///
/// A wrong checksum is reported in [`GaugeReply::checksum_ok`] rather than
/// rejected; a telegram that is too short or whose length field disagrees
/// with its data is a `Protocol` error.
pub fn parse_telegram(raw: &[u8]) -> RoughResult<GaugeReply> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if !text.is_ascii() {
        return Err(RoughError::Protocol(format!(
            "gauge reply {text:?} is not ASCII"
        )));
    }
    if text.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(RoughError::Protocol(format!(
            "gauge reply {text:?} is shorter than a telegram envelope"
        )));
    }

    let address = digits(&text[0..3], "address")?;
    let param = digits(&text[5..8], "parameter")?;
    let data_len = usize::from(digits(&text[8..10], "length")?);

    let data_end = text.len() - CHECKSUM_LEN;
    if data_end - HEADER_LEN != data_len {
        return Err(RoughError::Protocol(format!(
            "gauge reply {text:?} declares {data_len} data characters, carries {}",
            data_end - HEADER_LEN
        )));
    }

    let sent_sum = digits(&text[data_end..], "checksum")?;
    let checksum_ok = sent_sum == u16::from(checksum(&text[..data_end]));

    Ok(GaugeReply {
        address,
        param,
        payload: text[HEADER_LEN..data_end].to_string(),
        checksum_ok,
    })
}

/// Decode a pressure payload.
///
/// Six digits are read as `u_expo_new`; anything else must be a plain float.
/// Device error words (`NO_DEF`, `_RANGE`, `_LOGIC`) are `Parse` errors.
pub fn parse_pressure(payload: &str) -> RoughResult<f64> {
    let payload = payload.trim();
    if payload.len() == 6 && payload.bytes().all(|b| b.is_ascii_digit()) {
        let mantissa: f64 = payload[..4]
            .parse()
            .map_err(|e| RoughError::parse("gauge pressure", payload, e))?;
        let exponent: i32 = payload[4..]
            .parse()
            .map_err(|e| RoughError::parse("gauge pressure", payload, e))?;
        return Ok(mantissa / 1000.0 * 10f64.powi(exponent - 20));
    }

    payload
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RoughError::parse("gauge pressure", payload, "not a number"))
}

/// Driver for the pressure gauge
#[derive(Clone)]
pub struct GaugeDriver {
    name: String,
    address: u16,
    transport: Arc<dyn Transport>,
    sink: ObservationSink,
}

impl GaugeDriver {
    /// Create a driver for the gauge at bus `address`.
    pub fn new(
        name: impl Into<String>,
        address: u16,
        transport: Arc<dyn Transport>,
        sink: ObservationSink,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            transport,
            sink,
        }
    }

    /// Observation source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pressure query telegram.
    pub fn make_pressure_cmd(&self) -> RoughResult<String> {
        make_telegram(self.address, ACTION_QUERY, PRESSURE_PARAM, QUERY_DATA)
    }

    /// One raw exchange with the gauge.
    pub async fn send_one_command(&self, command: &str) -> RoughResult<Vec<u8>> {
        self.transport.send(command.as_bytes()).await
    }

    /// Strip the envelope from a reply and return its payload.
    pub fn parse_response(&self, raw: &[u8]) -> RoughResult<String> {
        let reply = parse_telegram(raw)?;
        if !reply.checksum_ok {
            warn!(device = %self.name, "bad checksum on {:?}", String::from_utf8_lossy(raw));
            self.sink.warn(
                &self.name,
                Event::Text {
                    text: format!(
                        "bad checksum on reply {:?}",
                        String::from_utf8_lossy(raw).trim()
                    ),
                },
            );
        }
        if reply.address != self.address {
            warn!(device = %self.name, "reply from address {} (expected {})", reply.address, self.address);
        }
        Ok(reply.payload)
    }

    /// Decode a pressure payload.
    pub fn parse_pressure(&self, payload: &str) -> RoughResult<f64> {
        parse_pressure(payload)
    }

    /// One pressure reading.
    pub async fn pressure(&self) -> RoughResult<f64> {
        let command = self.make_pressure_cmd()?;
        let raw = self.send_one_command(&command).await?;
        let payload = self.parse_response(&raw)?;
        self.parse_pressure(&payload)
    }

    /// Query parameter `param` and return its payload.
    pub async fn raw_query(&self, param: u16) -> RoughResult<String> {
        let command = make_telegram(self.address, ACTION_QUERY, param, QUERY_DATA)?;
        let raw = self.send_one_command(&command).await?;
        self.parse_response(&raw)
    }

    /// Set parameter `param` to `value` and return the echoed payload.
    pub async fn raw_set(&self, param: u16, value: &str) -> RoughResult<String> {
        let command = make_telegram(self.address, ACTION_SET, param, value)?;
        let raw = self.send_one_command(&command).await?;
        self.parse_response(&raw)
    }

    /// Send operator text verbatim and return the reply undecoded.
    pub async fn raw_command(&self, text: &str) -> RoughResult<String> {
        let raw = self.send_one_command(text).await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}
