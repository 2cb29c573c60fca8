use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const LINE_TERMINATOR: u8 = b'\n';
const READ_CHUNK: usize = 4096;
const PREVIEW_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for a reply to '{command}', received so far: '{received}'")]
    Timeout { command: String, received: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed block reply to '{command}': {reason} (received '{received}')")]
    MalformedBlock {
        command: String,
        reason: &'static str,
        received: String,
    },

    #[error("Could not resolve {host}:{port}")]
    UnresolvedHost { host: String, port: u16 },
}

/// Short lossy rendering of raw bytes for error messages.
pub(crate) fn preview_bytes(bytes: &[u8]) -> String {
    if bytes.len() > PREVIEW_LEN {
        format!("{}...", String::from_utf8_lossy(&bytes[..PREVIEW_LEN]))
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

/// The three primitives the waveform engine needs from an instrument connection.
///
/// Implementations own the byte stream exclusively. Each call is one complete
/// request/response exchange, so a reply can never be attributed to the wrong
/// command as long as calls are not interleaved.
pub trait ScpiTransport {
    /// Send a command that produces no reply.
    fn write(&mut self, command: &str) -> Result<(), TerminalError>;

    /// Send a query and return the textual reply without its line terminator.
    fn query_text(&mut self, command: &str) -> Result<String, TerminalError>;

    /// Send a query and return the raw reply, including any `#` block header.
    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TerminalError>;
}

impl<T: ScpiTransport + ?Sized> ScpiTransport for Box<T> {
    fn write(&mut self, command: &str) -> Result<(), TerminalError> {
        (**self).write(command)
    }

    fn query_text(&mut self, command: &str) -> Result<String, TerminalError> {
        (**self).query_text(command)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        (**self).query_binary(command)
    }
}

/// Line and block framing on top of any byte stream.
pub struct ScpiTerminal<S> {
    stream: S,
    pending: Vec<u8>,
}

pub type SerialTerminal = ScpiTerminal<Box<dyn SerialPort>>;
pub type TcpTerminal = ScpiTerminal<TcpStream>;

impl SerialTerminal {
    /// Open a serial port and discard whatever is still buffered on it.
    pub fn open_serial(
        path: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, TerminalError> {
        log::debug!("Opening serial port {} at {} baud", path, baud_rate);
        let serial = serialport::new(path, baud_rate).timeout(timeout).open()?;
        serial.clear(serialport::ClearBuffer::All)?;
        Ok(Self::new(serial))
    }
}

impl TcpTerminal {
    /// Open a raw SCPI socket.
    pub fn open_tcp(host: &str, port: u16, timeout: Duration) -> Result<Self, TerminalError> {
        log::debug!("Connecting to {}:{}", host, port);
        let address = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TerminalError::UnresolvedHost {
                host: host.to_string(),
                port,
            })?;

        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> ScpiTerminal<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn send(&mut self, command: &str) -> Result<(), TerminalError> {
        log::debug!("-> {}", command);
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(LINE_TERMINATOR);
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        Ok(())
    }

    fn fill(&mut self, command: &str) -> Result<(), TerminalError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(TerminalError::Io(ErrorKind::UnexpectedEof.into())),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Err(TerminalError::Timeout {
                    command: command.to_string(),
                    received: preview_bytes(&self.pending),
                })
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_line(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        loop {
            if let Some(end) = self.pending.iter().position(|b| *b == LINE_TERMINATOR) {
                return Ok(self.pending.drain(..=end).collect());
            }
            self.fill(command)?;
        }
    }

    fn read_exact_bytes(&mut self, count: usize, command: &str) -> Result<Vec<u8>, TerminalError> {
        while self.pending.len() < count {
            self.fill(command)?;
        }
        Ok(self.pending.drain(..count).collect())
    }

    /// Read one reply that may be an IEEE 488.2 block (`#<d><len><bytes>`).
    ///
    /// The header and the trailing terminator are kept in the returned buffer;
    /// stripping them is the decoder's job.
    fn read_block(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        while self.pending.is_empty() {
            self.fill(command)?;
        }
        if self.pending[0] != b'#' {
            let line = self.read_line(command)?;
            // A headerless reply ends at its first terminator; whatever is
            // already buffered behind it cannot belong to the next reply.
            if !self.pending.is_empty() {
                log::warn!(
                    "Discarding {} bytes after headerless reply to '{}'",
                    self.pending.len(),
                    command
                );
                self.pending.clear();
            }
            return Ok(line);
        }

        let mut reply = self.read_exact_bytes(2, command)?;
        let digit_count = match reply[1] {
            d @ b'0'..=b'9' => usize::from(d - b'0'),
            _ => {
                return Err(TerminalError::MalformedBlock {
                    command: command.to_string(),
                    reason: "digit count is not a decimal digit",
                    received: preview_bytes(&reply),
                })
            }
        };

        // "#0" is an indefinite-length block terminated by the line terminator.
        if digit_count == 0 {
            reply.extend(self.read_line(command)?);
            return Ok(reply);
        }

        let length_digits = self.read_exact_bytes(digit_count, command)?;
        let length = std::str::from_utf8(&length_digits)
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(|| TerminalError::MalformedBlock {
                command: command.to_string(),
                reason: "block length is not a decimal number",
                received: preview_bytes(&length_digits),
            })?;
        reply.extend(length_digits);

        log::trace!("Reading {} byte block for '{}'", length, command);
        reply.extend(self.read_exact_bytes(length, command)?);
        reply.extend(self.read_line(command)?);
        Ok(reply)
    }
}

impl<S: Read + Write> ScpiTransport for ScpiTerminal<S> {
    fn write(&mut self, command: &str) -> Result<(), TerminalError> {
        self.send(command)
    }

    fn query_text(&mut self, command: &str) -> Result<String, TerminalError> {
        self.send(command)?;
        let line = String::from_utf8(self.read_line(command)?)?;
        let reply = line.trim_end_matches(['\r', '\n']).to_string();
        log::debug!("<- {}", reply);
        Ok(reply)
    }

    fn query_binary(&mut self, command: &str) -> Result<Vec<u8>, TerminalError> {
        self.send(command)?;
        let reply = self.read_block(command)?;
        log::debug!("<- {} bytes", reply.len());
        Ok(reply)
    }
}
