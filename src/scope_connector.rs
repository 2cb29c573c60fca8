use crate::acquisition::ResumePolicy;
use crate::scaling::CodeReference;
use crate::scpi_terminal::{ScpiTransport, SerialTerminal, TcpTerminal, TerminalError};
use crate::waveform_request::{PointMode, TransferFormat, DEFAULT_CHANNEL_COUNT};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Raw SCPI socket port used by most LAN instruments.
pub const DEFAULT_SCPI_PORT: u16 = 5025;
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identification prefix of the DSO-X 2024A.
pub const DSOX2024A_IDN_PREFIX: &str = "AGILENT TECHNOLOGIES,DSO-X 2024A";

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    Connection(#[from] TerminalError),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },

    #[error("Unexpected device, identification string was '{identity}'")]
    UnexpectedDevice { identity: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeAddress {
    Tcp { host: String, port: u16 },
    Serial { path: String },
}

impl fmt::Display for ScopeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Serial { path } => f.write_str(path),
        }
    }
}

impl FromStr for ScopeAddress {
    type Err = ConnectorError;

    /// Accepts VISA-style resource strings (`TCPIP0::host::INSTR`,
    /// `TCPIP0::host::5025::SOCKET`, `ASRL/dev/ttyUSB0::INSTR`), `host:port`,
    /// bare host names and serial device paths.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.trim();
        let invalid = |reason| ConnectorError::InvalidAddress {
            address: s.to_string(),
            reason,
        };
        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        let upper = address.to_ascii_uppercase();
        if upper.starts_with("TCPIP") {
            let parts: Vec<&str> = address.split("::").collect();
            return match parts.as_slice() {
                [_, host, instr] if instr.eq_ignore_ascii_case("INSTR") && !host.is_empty() => {
                    Ok(Self::Tcp {
                        host: host.to_string(),
                        port: DEFAULT_SCPI_PORT,
                    })
                }
                [_, host, port, socket]
                    if socket.eq_ignore_ascii_case("SOCKET") && !host.is_empty() =>
                {
                    Ok(Self::Tcp {
                        host: host.to_string(),
                        port: port.parse().map_err(|_| invalid("port is not a number"))?,
                    })
                }
                _ => Err(invalid("unsupported TCPIP resource string")),
            };
        }

        if upper.starts_with("ASRL") {
            let resource = &address[4..];
            let path = resource
                .strip_suffix("::INSTR")
                .or_else(|| resource.strip_suffix("::instr"))
                .unwrap_or(resource);
            if path.is_empty() {
                return Err(invalid("missing serial port"));
            }
            let path = if path.bytes().all(|b| b.is_ascii_digit()) {
                format!("COM{}", path)
            } else {
                path.to_string()
            };
            return Ok(Self::Serial { path });
        }

        let com_port = upper
            .strip_prefix("COM")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if address.starts_with('/') || com_port {
            return Ok(Self::Serial {
                path: address.to_string(),
            });
        }

        if let Some(bracketed) = address.strip_prefix('[') {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            let port = match rest.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid("port is not a number"))?,
                None if rest.is_empty() => DEFAULT_SCPI_PORT,
                None => return Err(invalid("unexpected text after IPv6 address")),
            };
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }
        if address.matches(':').count() > 1 {
            return Err(invalid("IPv6 addresses must be written as [addr] or [addr]:port"));
        }

        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Self::Tcp {
                host: host.to_string(),
                port: port.parse().map_err(|_| invalid("port is not a number"))?,
            }),
            Some(_) => Err(invalid("missing host")),
            None => Ok(Self::Tcp {
                host: address.to_string(),
                port: DEFAULT_SCPI_PORT,
            }),
        }
    }
}

/// Which identification strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// Case-insensitive substring match.
    Contains(String),
    /// Exact, case-sensitive prefix match.
    StartsWith(String),
    /// Accept any device.
    Any,
}

impl IdentityPolicy {
    pub fn contains(token: impl Into<String>) -> Self {
        Self::Contains(token.into())
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Self::StartsWith(prefix.into())
    }

    pub fn any() -> Self {
        Self::Any
    }

    /// Strict match on the DSO-X 2024A identification prefix.
    pub fn dsox2024a() -> Self {
        Self::starts_with(DSOX2024A_IDN_PREFIX)
    }

    pub fn accepts(&self, identity: &str) -> bool {
        match self {
            Self::Contains(token) => identity
                .to_ascii_lowercase()
                .contains(&token.to_ascii_lowercase()),
            Self::StartsWith(prefix) => identity.starts_with(prefix.as_str()),
            Self::Any => true,
        }
    }

    pub fn validate(&self, raw: &str) -> Result<Identity, ConnectorError> {
        if !self.accepts(raw) {
            return Err(ConnectorError::UnexpectedDevice {
                identity: raw.to_string(),
            });
        }
        Ok(Identity::parse(raw))
    }
}

/// Parsed `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
    pub raw: String,
}

impl Identity {
    /// Missing fields are left empty.
    pub fn parse(raw: &str) -> Self {
        let mut fields = raw.trim().splitn(4, ',').map(|field| field.trim().to_string());
        Self {
            manufacturer: fields.next().unwrap_or_default(),
            model: fields.next().unwrap_or_default(),
            serial_number: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
            raw: raw.to_string(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (S/N {}, firmware {})",
            self.manufacturer, self.model, self.serial_number, self.firmware
        )
    }
}

/// Session settings. The identity policy has no default and must be chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub identity: IdentityPolicy,
    pub timeout: Duration,
    pub baud_rate: u32,
    pub channel_count: u8,
    pub transfer: TransferFormat,
    pub point_mode: PointMode,
    pub resume: ResumePolicy,
    pub code_reference: CodeReference,
}

impl ConnectOptions {
    pub fn new(identity: IdentityPolicy) -> Self {
        Self {
            identity,
            timeout: DEFAULT_TIMEOUT,
            baud_rate: DEFAULT_BAUD_RATE,
            channel_count: DEFAULT_CHANNEL_COUNT,
            transfer: TransferFormat::default(),
            point_mode: PointMode::Maximum,
            resume: ResumePolicy::Run,
            code_reference: CodeReference::Zero,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_channel_count(mut self, channel_count: u8) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_transfer(mut self, transfer: TransferFormat) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_point_mode(mut self, point_mode: PointMode) -> Self {
        self.point_mode = point_mode;
        self
    }

    pub fn with_resume(mut self, resume: ResumePolicy) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_code_reference(mut self, code_reference: CodeReference) -> Self {
        self.code_reference = code_reference;
        self
    }
}

pub struct ScopeConnector;

impl ScopeConnector {
    /// Open the byte transport for `address`. No command is sent.
    pub fn open(
        address: &ScopeAddress,
        options: &ConnectOptions,
    ) -> Result<Box<dyn ScpiTransport + Send>, ConnectorError> {
        log::debug!("Opening connection to {}", address);
        let transport: Box<dyn ScpiTransport + Send> = match address {
            ScopeAddress::Tcp { host, port } => {
                Box::new(TcpTerminal::open_tcp(host, *port, options.timeout)?)
            }
            ScopeAddress::Serial { path } => {
                Box::new(SerialTerminal::open_serial(path, options.baud_rate, options.timeout)?)
            }
        };
        Ok(transport)
    }

    /// Query `*IDN?` and check it against `policy`.
    pub fn identify<T: ScpiTransport + ?Sized>(
        transport: &mut T,
        policy: &IdentityPolicy,
    ) -> Result<Identity, ConnectorError> {
        let raw = transport.query_text("*IDN?")?;
        let identity = policy.validate(&raw)?;
        log::debug!("Connected to {}", identity);
        Ok(identity)
    }
}
