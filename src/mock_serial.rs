//! We use this mocking module in unit tests to emulate a serial port and the PSU behind it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::transport::{Connector, SerialConfig};

/// What the mock device does in answer to the next request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Bytes that become readable as one burst.
    Bytes(Vec<u8>),
    /// Nothing comes back.
    Silence,
}

#[derive(Error, Debug)]
pub enum MockSerialError {
    /// Generic simulated error for testing
    #[error("simulated serial error")]
    SimulatedError,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

#[derive(Default)]
struct MockState {
    /// Everything written to the port.
    written: Vec<u8>,
    /// Number of write calls, one per request frame.
    writes: usize,
    /// Scripted answers, consumed one per write.
    replies: VecDeque<MockReply>,
    /// Bytes ready to be read.
    pending: VecDeque<u8>,
    /// While set, pending bytes are hidden from the reader.
    held: bool,
    should_error_on_write: bool,
    should_error_on_read: bool,
}

/// Our mock type used to emulate a serial port.
///
/// Clones share state, so a test can keep a handle after the port has been
/// moved into a transport.
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<MockState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Queue the answer to a future request.
    pub fn push_reply(&self, reply: MockReply) {
        self.state().replies.push_back(reply);
    }

    /// Make bytes readable right now, as if they arrived unsolicited.
    pub fn inject(&self, data: &[u8]) {
        self.state().pending.extend(data.iter().copied());
    }

    /// Get a copy of the data that was written to this mock serial port
    pub fn written_data(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn clear_written_data(&self) {
        self.state().written.clear();
    }

    pub fn write_count(&self) -> usize {
        self.state().writes
    }

    /// Number of scripted replies not yet consumed.
    pub fn replies_left(&self) -> usize {
        self.state().replies.len()
    }

    /// Hide (or reveal) incoming data from the reader.
    pub fn set_held(&self, held: bool) {
        self.state().held = held;
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&self, should_error: bool) {
        self.state().should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&self, should_error: bool) {
        self.state().should_error_on_read = should_error;
    }

    /// Number of live handles sharing this mock, including this one.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.state)
    }

    /// Block until at least `count` requests have been written.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.write_count() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state();
        if state.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        state.written.extend_from_slice(buf);
        state.writes += 1;
        if let Some(MockReply::Bytes(reply)) = state.replies.pop_front() {
            state.pending.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.state().should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state();
        if state.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        if state.held {
            return Ok(0);
        }
        let count = buf.len().min(state.pending.len());
        for (slot, byte) in buf.iter_mut().zip(state.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        let state = self.state();
        if state.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(!state.held && !state.pending.is_empty())
    }
}

/// Hands out clones of one [`MockSerial`], or refuses to open anything.
pub struct MockConnector {
    serial: MockSerial,
    failure: Option<String>,
    opened: Vec<String>,
}

impl MockConnector {
    pub fn new(serial: MockSerial) -> Self {
        Self {
            serial,
            failure: None,
            opened: Vec::new(),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            serial: MockSerial::new(),
            failure: Some(reason.into()),
            opened: Vec::new(),
        }
    }

    /// Port names successfully opened so far.
    pub fn opened(&self) -> &[String] {
        &self.opened
    }
}

impl Connector for MockConnector {
    type Port = MockSerial;
    type Error = String;

    fn open(&mut self, port: &str, _config: &SerialConfig) -> Result<MockSerial, String> {
        if let Some(reason) = &self.failure {
            return Err(reason.clone());
        }
        self.opened.push(port.into());
        Ok(self.serial.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, ReadReady, Write};

    #[test]
    fn test_reply_released_on_write() {
        let mut mock = MockSerial::new();
        mock.push_reply(MockReply::Bytes(vec![0xAB, 0xCD]));
        assert!(!mock.read_ready().unwrap());

        mock.write_all(&[0x01]).unwrap();
        assert!(mock.read_ready().unwrap());

        let mut buffer = [0u8; 8];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], &[0xAB, 0xCD]);
        assert!(!mock.read_ready().unwrap());
        assert_eq!(mock.write_count(), 1);
    }

    #[test]
    fn test_silence_consumes_a_reply() {
        let mut mock = MockSerial::new();
        mock.push_reply(MockReply::Silence);
        mock.push_reply(MockReply::Bytes(vec![0x01]));

        mock.write_all(&[0x01]).unwrap();
        assert!(!mock.read_ready().unwrap());
        mock.write_all(&[0x02]).unwrap();
        assert!(mock.read_ready().unwrap());
        assert_eq!(mock.replies_left(), 0);
    }

    #[test]
    fn test_held_data_is_hidden() {
        let mut mock = MockSerial::new();
        mock.inject(&[0x01, 0x02]);
        mock.set_held(true);
        assert!(!mock.read_ready().unwrap());
        mock.set_held(false);
        assert!(mock.read_ready().unwrap());
    }

    #[test]
    fn test_partial_reads() {
        let mut mock = MockSerial::new();
        mock.inject(b"Hello World");

        let mut buffer1 = [0u8; 5];
        let mut buffer2 = [0u8; 6];
        assert_eq!(mock.read(&mut buffer1).unwrap(), 5);
        assert_eq!(mock.read(&mut buffer2).unwrap(), 6);
        assert_eq!(&buffer1, b"Hello");
        assert_eq!(&buffer2, b" World");
    }

    #[test]
    fn test_clones_share_state() {
        let mock = MockSerial::new();
        let mut port = mock.clone();
        port.write_all(b"test").unwrap();
        assert_eq!(mock.written_data(), b"test");
        mock.clear_written_data();
        assert!(port.written_data().is_empty());
    }

    #[test]
    fn test_handles_track_clones() {
        let mock = MockSerial::new();
        assert_eq!(mock.handles(), 1);
        let port = mock.clone();
        assert_eq!(mock.handles(), 2);
        drop(port);
        assert_eq!(mock.handles(), 1);
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(matches!(
            mock.write(b"test"),
            Err(MockSerialError::SimulatedError)
        ));
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());

        mock.set_write_error(false);
        mock.set_read_error(true);
        let mut buffer = [0u8; 4];
        assert!(mock.read(&mut buffer).is_err());
        assert!(mock.read_ready().is_err());
    }

    #[test]
    fn test_connector() {
        let mut connector = MockConnector::new(MockSerial::new());
        assert!(connector.open("COM3", &SerialConfig::default()).is_ok());
        assert_eq!(connector.opened(), ["COM3".to_string()]);

        let mut connector = MockConnector::failing("no such device");
        assert_eq!(
            connector.open("COM4", &SerialConfig::default()).err(),
            Some("no such device".to_string())
        );
    }
}
