//! Line protocol spoken by the acquisition sketch.
//!
//! Accepted shapes, in priority order:
//! `Voltage: <number>` anywhere in the line, then the first signed decimal
//! anywhere in the line, then the first comma-separated token. An optional
//! `Raw: <uint>` field carries the ADC code.
use once_cell::sync::Lazy;
use regex::Regex;

static VOLTAGE_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Voltage:\s*([+-]?\d*\.?\d+)").expect("static regex"));
static RAW_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Raw:\s*(\d+)").expect("static regex"));
static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]?\d*\.?\d+").expect("static regex"));

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParsedLine {
    pub voltage: f64,
    pub raw: Option<u32>,
}

/// Parses one decoded line. Returns `None` when the line carries no sample.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let voltage = voltage_field(line)
        .or_else(|| first_number(line))
        .or_else(|| first_token(line))?;
    Some(ParsedLine {
        voltage,
        raw: raw_field(line),
    })
}

/// Parses raw bytes from the device. Invalid UTF-8 is treated as a malformed line.
pub fn parse_bytes(bytes: &[u8]) -> Option<ParsedLine> {
    match std::str::from_utf8(bytes) {
        Ok(text) => parse_line(text),
        Err(err) => {
            log::trace!("dropping undecodable line: {err}");
            None
        }
    }
}

fn voltage_field(line: &str) -> Option<f64> {
    let caps = VOLTAGE_FIELD.captures(line)?;
    finite(caps.get(1)?.as_str())
}

fn first_number(line: &str) -> Option<f64> {
    finite(FIRST_NUMBER.find(line)?.as_str())
}

fn first_token(line: &str) -> Option<f64> {
    finite(line.split(',').next()?.trim())
}

fn raw_field(line: &str) -> Option<u32> {
    RAW_FIELD.captures(line)?.get(1)?.as_str().parse().ok()
}

// "inf" and "nan" parse as f64 but are not readings.
fn finite(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
