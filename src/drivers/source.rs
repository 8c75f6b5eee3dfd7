use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};
use std::time::Duration;

use crate::drivers::AcquisitionError;

/// Something that yields raw text lines from the device.
///
/// `Ok(None)` means no complete line arrived within the read timeout.
pub trait LineSource: Send {
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Opens a fresh [`LineSource`] for each acquisition run.
pub trait SourceOpener: Send {
    fn describe(&self) -> String;
    fn open(&self) -> Result<Box<dyn LineSource>, AcquisitionError>;
}

/// Serial port settings for the microcontroller link.
#[derive(Clone, Debug)]
pub struct SerialOpener {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SourceOpener for SerialOpener {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud_rate)
    }

    fn open(&self) -> Result<Box<dyn LineSource>, AcquisitionError> {
        let port = serialport::new(&self.port, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| AcquisitionError::Open {
                port: self.port.clone(),
                source,
            })?;
        Ok(Box::new(SerialLineSource::new(port)))
    }
}

pub struct SerialLineSource {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    pending: Vec<u8>,
}

impl SerialLineSource {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            reader: BufReader::new(port),
            pending: Vec::new(),
        }
    }
}

impl LineSource for SerialLineSource {
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        // A timeout can land mid-line; the partial bytes stay in `pending`
        // and the next call keeps appending to them.
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(_) if self.pending.is_empty() => Ok(None),
            Ok(_) => Ok(Some(std::mem::take(&mut self.pending))),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// In-memory source useful for tests and deterministic playback.
///
/// Once the script is exhausted every read behaves like a timeout.
pub struct ScriptedSource {
    script: VecDeque<io::Result<Option<Vec<u8>>>>,
}

impl ScriptedSource {
    pub fn new(script: impl IntoIterator<Item = io::Result<Option<Vec<u8>>>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(lines.into_iter().map(|l| Ok(Some(l.as_bytes().to_vec()))))
    }
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.script.pop_front() {
            Some(step) => step,
            None => {
                std::thread::sleep(Duration::from_millis(1));
                Ok(None)
            }
        }
    }
}
