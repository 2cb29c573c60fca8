use crate::acquisition::{AcquisitionController, AcquisitionState};
use crate::measurement::{
    average_voltage_command, parse_measurement, MeasurementError, MeasurementInterval,
};
use crate::preamble::{Preamble, PreambleError};
use crate::sample_decoder::{decode, DecodeError};
use crate::scaling::ScalingEngine;
use crate::scope_connector::{
    ConnectOptions, ConnectorError, Identity, ScopeAddress, ScopeConnector,
};
use crate::scpi_terminal::{ScpiTransport, TerminalError};
use crate::trace::Trace;
use crate::waveform_request::{
    ChannelRef, RequestError, TraceRequest, TransferFormat, WaveformRequestBuilder,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Transport error: {0}")]
    Transport(#[from] TerminalError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Preamble(#[from] PreambleError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("Invalid timebase value {value}, expected a positive number of seconds")]
    InvalidTimebase { value: f64 },

    #[error("Unknown time mode '{0}'")]
    UnknownTimeMode(String),
}

/// Horizontal display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeMode {
    Main,
    Window,
    XY,
    Roll,
}

impl TimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "MAIN",
            Self::Window => "WIND",
            Self::XY => "XY",
            Self::Roll => "ROLL",
        }
    }
}

impl fmt::Display for TimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeMode {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAIN" => Ok(Self::Main),
            "WIND" | "WINDOW" => Ok(Self::Window),
            "XY" => Ok(Self::XY),
            "ROLL" => Ok(Self::Roll),
            _ => Err(ScopeError::UnknownTimeMode(s.to_string())),
        }
    }
}

/// An open session with one instrument.
///
/// The session owns its transport; every method is a blocking
/// request/response exchange. Share a session between threads only behind a
/// lock covering whole calls.
pub struct Scope<T: ScpiTransport = Box<dyn ScpiTransport + Send>> {
    transport: T,
    identity: Identity,
    requests: WaveformRequestBuilder,
    acquisition: AcquisitionController,
    scaling: ScalingEngine,
    transfer: TransferFormat,
    // False once a format change failed part way; the next read resends
    // every format command.
    transfer_synced: bool,
}

impl Scope {
    /// Open `address`, check the instrument's identity and apply the initial
    /// transfer format from `options`.
    pub fn connect(address: &str, options: ConnectOptions) -> Result<Self, ScopeError> {
        let span = tracing::debug_span!("connect", address);
        let _enter = span.enter();

        let address: ScopeAddress = address.parse()?;
        let transport = ScopeConnector::open(&address, &options)?;
        Self::new(transport, options)
    }
}

impl<T: ScpiTransport> Scope<T> {
    /// Start a session over an already open transport.
    pub fn new(mut transport: T, options: ConnectOptions) -> Result<Self, ScopeError> {
        let point_commands = options.point_mode.commands()?;
        let identity = ScopeConnector::identify(&mut transport, &options.identity)?;

        for command in options.transfer.commands().iter().chain(&point_commands) {
            transport.write(command)?;
        }

        Ok(Self {
            transport,
            identity,
            requests: WaveformRequestBuilder::new(options.channel_count),
            acquisition: AcquisitionController::new(options.resume),
            scaling: ScalingEngine::new(options.code_reference),
            transfer: options.transfer,
            transfer_synced: true,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    /// Transfer format the instrument is currently configured for.
    pub fn transfer_format(&self) -> TransferFormat {
        self.transfer
    }

    /// Read one trace.
    ///
    /// The request is validated before anything is sent. Preamble and payload
    /// are read while acquisition is stopped; acquisition is resumed afterwards
    /// according to the session's resume policy, also when the read fails.
    pub fn get_trace(&mut self, request: impl Into<TraceRequest>) -> Result<Trace, ScopeError> {
        let request = request.into();
        let span = tracing::debug_span!("get_trace", source = %request.source());
        let _enter = span.enter();

        let prepared = if self.transfer_synced {
            self.requests.build(&request, &self.transfer)?
        } else {
            self.requests.build_resync(&request, &self.transfer)?
        };
        for command in &prepared.commands {
            if let Err(e) = self.transport.write(command) {
                self.transfer_synced = false;
                return Err(e.into());
            }
        }
        self.transfer = prepared.format;
        self.transfer_synced = true;

        let format = prepared.format;
        let scaling = self.scaling;
        self.acquisition
            .with_frozen_acquisition(&mut self.transport, |transport| -> Result<Trace, ScopeError> {
                let preamble = Preamble::parse(&transport.query_text(":WAV:PRE?")?)?;
                log::debug!(
                    "Preamble: {} points, {}, {:?}",
                    preamble.point_count,
                    preamble.acq_type.as_str(),
                    preamble.format
                );
                let raw = transport.query_binary(":WAV:DATA?")?;
                let samples = decode(&raw, &format, preamble.format)?;
                Ok(scaling.scale(&preamble, samples)?)
            })
    }

    /// Average voltage of `source` over `interval`.
    pub fn measure_average_voltage(
        &mut self,
        source: impl Into<ChannelRef>,
        interval: MeasurementInterval,
    ) -> Result<f64, ScopeError> {
        let source = source.into();
        source.validate(self.requests.channel_count())?;
        let reply = self
            .transport
            .query_text(&average_voltage_command(&source, interval))?;
        Ok(parse_measurement(&reply)?)
    }

    /// Horizontal scale in seconds per division.
    pub fn set_time_per_division(&mut self, seconds: f64) -> Result<(), ScopeError> {
        self.write_timebase(":TIM:SCAL", seconds)
    }

    /// Full horizontal range in seconds.
    pub fn set_total_time(&mut self, seconds: f64) -> Result<(), ScopeError> {
        self.write_timebase(":TIM:RANG", seconds)
    }

    fn write_timebase(&mut self, header: &str, seconds: f64) -> Result<(), ScopeError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(ScopeError::InvalidTimebase { value: seconds });
        }
        self.transport.write(&format!("{} {:E}", header, seconds))?;
        Ok(())
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) -> Result<(), ScopeError> {
        self.transport.write(&format!(":TIM:MODE {}", mode))?;
        Ok(())
    }

    pub fn time_mode(&mut self) -> Result<TimeMode, ScopeError> {
        self.transport.query_text(":TIM:MODE?")?.parse()
    }

    pub fn stop(&mut self) -> Result<(), ScopeError> {
        Ok(self.acquisition.stop(&mut self.transport)?)
    }

    pub fn run(&mut self) -> Result<(), ScopeError> {
        Ok(self.acquisition.run(&mut self.transport)?)
    }

    pub fn single(&mut self) -> Result<(), ScopeError> {
        Ok(self.acquisition.single(&mut self.transport)?)
    }

    /// End the session, leaving the instrument acquiring.
    pub fn close(mut self) -> Result<(), ScopeError> {
        if self.acquisition.state() == AcquisitionState::Stopped {
            self.run()?;
        }
        log::debug!("Closing session with {}", self.identity.model);
        Ok(())
    }

    /// End the session and hand back the transport as is.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::ResumePolicy;
    use crate::loopback::LoopbackTerminal;
    use crate::preamble::AcquisitionType;
    use crate::sample_decoder::{encode_binary, encode_block};
    use crate::scaling::CodeReference;
    use crate::scope_connector::IdentityPolicy;
    use crate::waveform_request::{ByteOrder, Encoding};

    const IDN: &str = "ACME,MODEL-X,SN1,FW1";
    const WORD_PREAMBLE: &str = "+1,+0,+100,+1,+1.0E-6,+0.0,+0,+5.0E-3,+0.0,+0";

    fn options() -> ConnectOptions {
        ConnectOptions::new(IdentityPolicy::contains("MODEL-X"))
    }

    fn scope(terminal: LoopbackTerminal) -> Scope<LoopbackTerminal> {
        let mut scope = Scope::new(terminal, options()).unwrap();
        scope.transport_mut().take_sent();
        scope
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-12, "{} != {}", a, b);
    }

    #[test]
    fn test_session_initialisation() {
        let scope = Scope::new(LoopbackTerminal::new().reply(IDN), options()).unwrap();

        assert_eq!(scope.identity().model, "MODEL-X");
        assert_eq!(
            scope.transport().sent(),
            ["*IDN?", ":WAV:FORM BYTE", ":WAV:UNS OFF", ":WAV:BYT MSBF", ":WAV:POIN:MODE MAX"]
        );
        assert_eq!(scope.acquisition_state(), AcquisitionState::Running);
    }

    #[test]
    fn test_unexpected_device_sends_nothing_else() {
        let terminal = LoopbackTerminal::new().reply("ACME,MODEL-Y,SN1,FW1");
        match Scope::new(terminal, options()) {
            Err(ScopeError::Connector(ConnectorError::UnexpectedDevice { identity })) => {
                assert_eq!(identity, "ACME,MODEL-Y,SN1,FW1");
            }
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("MODEL-Y must be rejected"),
        }
    }

    #[test]
    fn test_word_trace() {
        let payload = encode_block(&[0u8; 200]);
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(WORD_PREAMBLE)
                .reply_bytes(payload),
        );

        let trace = scope
            .get_trace(TraceRequest::channel(1).encoding(Encoding::Word))
            .unwrap();

        assert_eq!(trace.len(), 100);
        for (i, (x, y)) in trace.points().enumerate() {
            assert_close(x, i as f64 * 1e-6);
            assert_eq!(y, 0.0);
        }
        assert_eq!(
            scope.transport().sent(),
            [":WAV:SOUR CHAN1", ":WAV:FORM WORD", ":STOP", ":WAV:PRE?", ":WAV:DATA?", ":RUN"]
        );
        assert_eq!(scope.transfer_format().encoding, Encoding::Word);
        assert_eq!(scope.acquisition_state(), AcquisitionState::Running);
    }

    #[test]
    fn test_format_is_only_sent_when_it_changes() {
        let block = || encode_block(&[0u8; 200]);
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(WORD_PREAMBLE)
                .reply_bytes(block())
                .reply(WORD_PREAMBLE)
                .reply_bytes(block()),
        );

        scope.get_trace(TraceRequest::channel(1).encoding(Encoding::Word)).unwrap();
        scope.transport_mut().take_sent();
        scope.get_trace(2u8).unwrap();

        assert_eq!(
            scope.transport().sent(),
            [":WAV:SOUR CHAN2", ":STOP", ":WAV:PRE?", ":WAV:DATA?", ":RUN"]
        );
    }

    #[test]
    fn test_failed_format_change_resends_full_format() {
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply("+0,+0,+1,+1,+1.0E-6,+0.0,+0,+1.0E-2,+0.0,+0")
                .reply_bytes(encode_block(&[4])),
        );
        scope.transport_mut().push_failure(":WAV:BYT");

        let request = TraceRequest::channel(1)
            .encoding(Encoding::Word)
            .byte_order(ByteOrder::LsbFirst);
        assert!(matches!(
            scope.get_trace(request),
            Err(ScopeError::Transport(TerminalError::Timeout { .. }))
        ));
        assert_eq!(
            scope.transport_mut().take_sent(),
            [":WAV:SOUR CHAN1", ":WAV:FORM WORD", ":WAV:BYT LSBF"]
        );

        scope.transport_mut().clear_failures();
        let trace = scope.get_trace(TraceRequest::channel(1).encoding(Encoding::Byte)).unwrap();

        assert_close(trace.y[0], 0.04);
        assert_eq!(
            scope.transport().sent(),
            [
                ":WAV:SOUR CHAN1",
                ":WAV:FORM BYTE",
                ":WAV:UNS OFF",
                ":WAV:BYT MSBF",
                ":STOP",
                ":WAV:PRE?",
                ":WAV:DATA?",
                ":RUN"
            ]
        );
        assert_eq!(scope.transfer_format(), TransferFormat::default());
    }

    #[test]
    fn test_byte_trace_scaling() {
        let preamble = "+0,+0,+4,+1,+2.0E-6,-4.0E-6,+0,+1.0E-2,+0.5,+0";
        let codes = encode_binary(&[0, 10, -10, 127], &TransferFormat::default());
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(preamble)
                .reply_bytes(encode_block(&codes)),
        );

        let trace = scope.get_trace(ChannelRef::Channel(3)).unwrap();

        assert_close(trace.x[0], -4e-6);
        assert_close(trace.x[3], 2e-6);
        assert_close(trace.y[1], 0.6);
        assert_close(trace.y[2], 0.4);
        assert_close(trace.y[3], 1.77);
    }

    #[test]
    fn test_first_sample_reference() {
        let preamble = "+0,+0,+2,+1,+1.0E-6,+0.0,+0,+1.0E-2,+0.0,+0";
        let codes = encode_binary(&[20, 30], &TransferFormat::default());
        let terminal = LoopbackTerminal::new()
            .reply(IDN)
            .reply(preamble)
            .reply_bytes(encode_block(&codes));
        let options = options().with_code_reference(CodeReference::FirstSample);
        let mut scope = Scope::new(terminal, options).unwrap();

        let trace = scope.get_trace(1u8).unwrap();

        assert_close(trace.y[0], 0.0);
        assert_close(trace.y[1], 0.1);
    }

    #[test]
    fn test_string_source_matches_number() {
        let payload = encode_block(&[0u8; 200]);
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(WORD_PREAMBLE)
                .reply_bytes(payload),
        );

        let source: ChannelRef = "chan1".parse().unwrap();
        scope
            .get_trace(TraceRequest::new(source).encoding(Encoding::Word))
            .unwrap();

        assert_eq!(scope.transport().sent()[0], ":WAV:SOUR CHAN1");
    }

    #[test]
    fn test_ascii_trace() {
        let preamble = "+4,+0,+3,+1,+1.0E-3,+1.0E-3,+0,+1.0E-2,+0.0,+0";
        let payload = encode_block(b"+1.5E-01,-2.0E-01,+3.0E-01");
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(preamble)
                .reply_bytes(payload),
        );

        let trace = scope
            .get_trace(TraceRequest::channel(1).encoding(Encoding::Ascii))
            .unwrap();

        assert_eq!(trace.y, vec![0.15, -0.2, 0.3]);
        assert_close(trace.x[0], 1e-3);
        assert_close(trace.x[2], 3e-3);
        assert_eq!(
            scope.transport().sent(),
            [":WAV:SOUR CHAN1", ":WAV:FORM ASC", ":STOP", ":WAV:PRE?", ":WAV:DATA?", ":RUN"]
        );
    }

    #[test]
    fn test_peak_trace_duplicates_timestamps() {
        let preamble = "+0,+1,+2,+1,+1.0E-6,+0.0,+0,+1.0E-2,+0.0,+0";
        let codes = encode_binary(&[-5, 5, -6, 6], &TransferFormat::default());
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(preamble)
                .reply_bytes(encode_block(&codes)),
        );

        let trace = scope.get_trace(1u8).unwrap();

        assert_eq!(trace.len(), 4);
        assert_eq!(trace.x[0], trace.x[1]);
        assert_eq!(trace.x[2], trace.x[3]);
        assert!(trace.x[2] > trace.x[1]);
        assert_eq!(AcquisitionType::from_code(1), Some(AcquisitionType::Peak));
    }

    #[test]
    fn test_headerless_peak_payload_is_rejected() {
        let preamble = "+0,+1,+1,+1,+1.0E-6,+0.0,+0,+1.0E-2,+0.0,+0";
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(preamble)
                .reply_bytes(b"\xfb\x05\n".to_vec()),
        );

        let result = scope.get_trace(1u8);

        assert!(matches!(
            result,
            Err(ScopeError::Decode(DecodeError::MalformedHeader { .. }))
        ));
        assert_eq!(scope.transport().sent().last().map(String::as_str), Some(":RUN"));
    }

    #[test]
    fn test_malformed_preamble_still_resumes() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN).reply("+0,+0,+100"));

        let result = scope.get_trace(1u8);

        assert!(matches!(result, Err(ScopeError::Preamble(_))));
        assert_eq!(scope.transport().sent().last().map(String::as_str), Some(":RUN"));
        assert_eq!(scope.acquisition_state(), AcquisitionState::Running);
    }

    #[test]
    fn test_truncated_payload_still_resumes() {
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(WORD_PREAMBLE)
                .reply_bytes(b"#800000200\x00\x00".to_vec()),
        );

        let result = scope.get_trace(TraceRequest::channel(1).encoding(Encoding::Word));

        assert!(matches!(
            result,
            Err(ScopeError::Decode(DecodeError::TruncatedPayload { declared: 200, .. }))
        ));
        assert_eq!(scope.transport().sent().last().map(String::as_str), Some(":RUN"));
    }

    #[test]
    fn test_encoding_mismatch() {
        let payload = encode_block(&[0u8; 200]);
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply(WORD_PREAMBLE)
                .reply_bytes(payload),
        );

        let result = scope.get_trace(1u8);

        assert!(matches!(
            result,
            Err(ScopeError::Decode(DecodeError::EncodingMismatch {
                requested: Encoding::Byte,
                reported: Encoding::Word
            }))
        ));
        assert_eq!(scope.acquisition_state(), AcquisitionState::Running);
    }

    #[test]
    fn test_invalid_channel_sends_nothing() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN));

        let result = scope.get_trace(TraceRequest::channel(5).byte_order(ByteOrder::LsbFirst));

        assert!(matches!(
            result,
            Err(ScopeError::Request(RequestError::InvalidChannel { channel: 5, max: 4 }))
        ));
        assert!(scope.transport().sent().is_empty());
        assert_eq!(scope.transfer_format(), TransferFormat::default());
    }

    #[test]
    fn test_leave_stopped_policy() {
        let payload = encode_block(&[0u8; 200]);
        let terminal = LoopbackTerminal::new().reply(IDN).reply(WORD_PREAMBLE).reply_bytes(payload);
        let options = options().with_resume(ResumePolicy::LeaveStopped);
        let mut scope = Scope::new(terminal, options).unwrap();

        scope
            .get_trace(TraceRequest::channel(1).encoding(Encoding::Word))
            .unwrap();

        assert_eq!(scope.acquisition_state(), AcquisitionState::Stopped);
        assert_eq!(scope.transport().sent().last().map(String::as_str), Some(":WAV:DATA?"));
    }

    #[test]
    fn test_measure_average_voltage() {
        let mut scope = scope(
            LoopbackTerminal::new()
                .reply(IDN)
                .reply("+1.25E-01")
                .reply("+9.9E+37"),
        );

        let value = scope
            .measure_average_voltage(1u8, MeasurementInterval::Display)
            .unwrap();
        assert_close(value, 0.125);

        assert!(matches!(
            scope.measure_average_voltage(1u8, MeasurementInterval::Cycle),
            Err(ScopeError::Measurement(MeasurementError::Unavailable { .. }))
        ));
        assert_eq!(
            scope.transport().sent(),
            [":MEAS:VAV? DISP,CHAN1", ":MEAS:VAV? CYCL,CHAN1"]
        );
    }

    #[test]
    fn test_measure_invalid_channel_sends_nothing() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN));
        assert!(scope
            .measure_average_voltage(9u8, MeasurementInterval::Display)
            .is_err());
        assert!(scope.transport().sent().is_empty());
    }

    #[test]
    fn test_timebase_commands() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN));

        scope.set_time_per_division(5e-6).unwrap();
        scope.set_total_time(0.002).unwrap();
        for invalid in [0.0, -1e-3, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                scope.set_time_per_division(invalid),
                Err(ScopeError::InvalidTimebase { .. })
            ));
        }

        assert_eq!(scope.transport().sent(), [":TIM:SCAL 5E-6", ":TIM:RANG 2E-3"]);
    }

    #[test]
    fn test_time_mode() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN).reply("ROLL").reply("WHAT"));

        scope.set_time_mode(TimeMode::Window).unwrap();
        assert_eq!(scope.time_mode().unwrap(), TimeMode::Roll);
        assert!(matches!(scope.time_mode(), Err(ScopeError::UnknownTimeMode(_))));
        assert_eq!(scope.transport().sent(), [":TIM:MODE WIND", ":TIM:MODE?", ":TIM:MODE?"]);
    }

    #[test]
    fn test_close_resumes_a_stopped_instrument() {
        let running = scope(LoopbackTerminal::new().reply(IDN).fail_on(":RUN"));
        assert!(running.close().is_ok());

        let mut stopped = scope(LoopbackTerminal::new().reply(IDN).fail_on(":RUN"));
        stopped.single().unwrap();
        assert!(matches!(stopped.close(), Err(ScopeError::Transport(_))));
    }

    #[test]
    fn test_acquisition_commands() {
        let mut scope = scope(LoopbackTerminal::new().reply(IDN));
        scope.stop().unwrap();
        assert_eq!(scope.acquisition_state(), AcquisitionState::Stopped);
        scope.run().unwrap();
        scope.single().unwrap();

        let terminal = scope.into_transport();
        assert_eq!(terminal.sent(), [":STOP", ":RUN", ":SING"]);
    }
}
