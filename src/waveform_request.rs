use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CHANNEL_COUNT: u8 = 4;
pub const MEMORY_SLOTS: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Channel {channel} is out of range, valid channels are 1..={max}")]
    InvalidChannel { channel: u8, max: u8 },

    #[error("Unknown waveform source '{0}'")]
    UnknownSource(String),

    #[error("Point count must be at least 1")]
    InvalidPointCount,
}

/// Waveform data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRef {
    Channel(u8),
    Function,
    Math,
    Memory(u8),
}

impl ChannelRef {
    /// Mnemonic understood by `:WAVeform:SOURce` and `:MEASure`.
    pub fn token(&self) -> String {
        match self {
            Self::Channel(n) => format!("CHAN{}", n),
            Self::Function => "FUNC".to_string(),
            Self::Math => "MATH".to_string(),
            Self::Memory(n) => format!("WMEM{}", n),
        }
    }

    pub fn validate(&self, channel_count: u8) -> Result<(), RequestError> {
        let (index, max) = match self {
            Self::Channel(n) => (*n, channel_count),
            Self::Memory(n) => (*n, MEMORY_SLOTS),
            Self::Function | Self::Math => return Ok(()),
        };
        if (1..=max).contains(&index) {
            Ok(())
        } else {
            Err(RequestError::InvalidChannel {
                channel: index,
                max,
            })
        }
    }
}

impl From<u8> for ChannelRef {
    fn from(channel: u8) -> Self {
        Self::Channel(channel)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for ChannelRef {
    type Err = RequestError;

    /// Accepts `1`, `chan1`, `CHANnel1`, `math`, `func`, `function`, `wmem1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let unknown = || RequestError::UnknownSource(s.to_string());

        if let Ok(channel) = lower.parse::<u8>() {
            return Ok(Self::Channel(channel));
        }
        match lower.as_str() {
            "math" => return Ok(Self::Math),
            "func" | "function" => return Ok(Self::Function),
            _ => {}
        }

        let (prefix, index) = lower
            .find(|c: char| c.is_ascii_digit())
            .map(|at| lower.split_at(at))
            .ok_or_else(unknown)?;
        let index: u8 = index.parse().map_err(|_| unknown())?;
        match prefix {
            "chan" | "channel" => Ok(Self::Channel(index)),
            "wmem" | "wmemory" => Ok(Self::Memory(index)),
            _ => Err(unknown()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Byte,
    Word,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ASC",
            Self::Byte => "BYTE",
            Self::Word => "WORD",
        }
    }

    /// Bytes per sample, `None` for text payloads.
    pub fn element_width(&self) -> Option<usize> {
        match self {
            Self::Ascii => None,
            Self::Byte => Some(1),
            Self::Word => Some(2),
        }
    }

    /// Format code as reported in the first preamble field.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Byte),
            1 => Some(Self::Word),
            4 => Some(Self::Ascii),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    MsbFirst,
    LsbFirst,
}

impl ByteOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MsbFirst => "MSBF",
            Self::LsbFirst => "LSBF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointMode {
    Fixed(u32),
    Maximum,
}

impl PointMode {
    pub fn commands(&self) -> Result<Vec<String>, RequestError> {
        match self {
            Self::Fixed(0) => Err(RequestError::InvalidPointCount),
            Self::Fixed(n) => Ok(vec![format!(":WAV:POIN {}", n)]),
            Self::Maximum => Ok(vec![":WAV:POIN:MODE MAX".to_string()]),
        }
    }
}

/// How the instrument serialises the sample payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFormat {
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
    pub signed: bool,
}

impl Default for TransferFormat {
    fn default() -> Self {
        Self {
            encoding: Encoding::Byte,
            byte_order: ByteOrder::MsbFirst,
            signed: true,
        }
    }
}

impl TransferFormat {
    fn encoding_command(&self) -> String {
        format!(":WAV:FORM {}", self.encoding.as_str())
    }

    fn signed_command(&self) -> String {
        format!(":WAV:UNS {}", if self.signed { "OFF" } else { "ON" })
    }

    fn byte_order_command(&self) -> String {
        format!(":WAV:BYT {}", self.byte_order.as_str())
    }

    /// Full set of commands establishing this format.
    pub fn commands(&self) -> Vec<String> {
        vec![
            self.encoding_command(),
            self.signed_command(),
            self.byte_order_command(),
        ]
    }

    /// Only the commands needed to move from `previous` to this format.
    pub fn commands_since(&self, previous: &Self) -> Vec<String> {
        let mut commands = Vec::new();
        if self.encoding != previous.encoding {
            commands.push(self.encoding_command());
        }
        if self.signed != previous.signed {
            commands.push(self.signed_command());
        }
        if self.byte_order != previous.byte_order {
            commands.push(self.byte_order_command());
        }
        commands
    }
}

/// One trace read. Unset format fields fall back to the session's format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    source: ChannelRef,
    encoding: Option<Encoding>,
    byte_order: Option<ByteOrder>,
    signed: Option<bool>,
    point_mode: Option<PointMode>,
}

impl TraceRequest {
    pub fn new(source: impl Into<ChannelRef>) -> Self {
        Self {
            source: source.into(),
            encoding: None,
            byte_order: None,
            signed: None,
            point_mode: None,
        }
    }

    pub fn channel(channel: u8) -> Self {
        Self::new(ChannelRef::Channel(channel))
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = Some(byte_order);
        self
    }

    pub fn signed(mut self, signed: bool) -> Self {
        self.signed = Some(signed);
        self
    }

    pub fn points(mut self, points: u32) -> Self {
        self.point_mode = Some(PointMode::Fixed(points));
        self
    }

    pub fn maximum_points(mut self) -> Self {
        self.point_mode = Some(PointMode::Maximum);
        self
    }

    pub fn source(&self) -> ChannelRef {
        self.source
    }

    pub fn point_mode(&self) -> Option<PointMode> {
        self.point_mode
    }

    /// Effective format given the one currently configured on the instrument.
    ///
    /// Byte order and signedness mean nothing for text payloads, so an ASCII
    /// request keeps the current values rather than touching them.
    pub fn resolve_format(&self, current: &TransferFormat) -> TransferFormat {
        let encoding = self.encoding.unwrap_or(current.encoding);
        if encoding == Encoding::Ascii {
            return TransferFormat {
                encoding,
                ..*current
            };
        }
        TransferFormat {
            encoding,
            byte_order: self.byte_order.unwrap_or(current.byte_order),
            signed: self.signed.unwrap_or(current.signed),
        }
    }
}

impl From<ChannelRef> for TraceRequest {
    fn from(source: ChannelRef) -> Self {
        Self::new(source)
    }
}

impl From<u8> for TraceRequest {
    fn from(channel: u8) -> Self {
        Self::channel(channel)
    }
}

/// Validated command sequence for one trace read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub commands: Vec<String>,
    pub format: TransferFormat,
}

#[derive(Debug, Clone, Copy)]
pub struct WaveformRequestBuilder {
    channel_count: u8,
}

impl WaveformRequestBuilder {
    pub fn new(channel_count: u8) -> Self {
        Self { channel_count }
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Validate `request` and produce the commands selecting its source and
    /// format. Nothing is sent; an invalid request yields no commands at all.
    pub fn build(
        &self,
        request: &TraceRequest,
        current: &TransferFormat,
    ) -> Result<PreparedRequest, RequestError> {
        self.prepare(request, current, false)
    }

    /// Like [`build`](Self::build), but always emits the full format command
    /// set. Used when the instrument's format is not known for certain.
    pub fn build_resync(
        &self,
        request: &TraceRequest,
        current: &TransferFormat,
    ) -> Result<PreparedRequest, RequestError> {
        self.prepare(request, current, true)
    }

    fn prepare(
        &self,
        request: &TraceRequest,
        current: &TransferFormat,
        full_format: bool,
    ) -> Result<PreparedRequest, RequestError> {
        request.source.validate(self.channel_count)?;

        let format = request.resolve_format(current);
        let mut commands = vec![format!(":WAV:SOUR {}", request.source.token())];
        if full_format {
            commands.extend(format.commands());
        } else {
            commands.extend(format.commands_since(current));
        }
        if let Some(point_mode) = request.point_mode {
            commands.extend(point_mode.commands()?);
        }

        Ok(PreparedRequest { commands, format })
    }
}

impl Default for WaveformRequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_COUNT)
    }
}
