//! # Infiniscope RS
//!
//! A Rust library for retrieving time- and voltage-scaled waveform traces from
//! SCPI oscilloscopes such as the Keysight/Agilent InfiniiVision 2000 X-Series.
//!
//! A trace read selects a source and transfer format, stops acquisition, reads
//! the waveform preamble and the sample payload from the same frozen record,
//! resumes acquisition, and scales the raw codes to seconds and volts.
//!
//! ## Features
//!
//! - **Transports**: raw SCPI sockets (`TCPIP0::host::INSTR`, `host:port`) and
//!   serial ports through `serialport`
//! - **Identity check**: configurable substring or prefix match on `*IDN?`
//! - **Transfer formats**: ASCII, signed or unsigned bytes, and 16 bit words in
//!   either byte order
//! - **Frozen acquisition**: a guard that restarts acquisition on every exit
//!   path, including errors and panics
//! - **DataFrame output**: traces convert to `polars` frames
//!
//! ## Examples
//!
//! ### Reading a trace
//!
//! ```rust,no_run
//! use infiniscope_rs::{ConnectOptions, Encoding, IdentityPolicy, Scope, TraceRequest};
//!
//! let options = ConnectOptions::new(IdentityPolicy::contains("DSO-X"));
//! let mut scope = Scope::connect("TCPIP0::192.168.1.20::INSTR", options)?;
//!
//! let trace = scope.get_trace(TraceRequest::channel(1).encoding(Encoding::Word))?;
//! println!("Captured {} samples", trace.len());
//!
//! let df = trace.to_dataframe()?;
//! println!("{}", df.head(Some(5)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Average voltage
//!
//! ```rust,no_run
//! use infiniscope_rs::{ConnectOptions, IdentityPolicy, MeasurementInterval, Scope};
//!
//! let options = ConnectOptions::new(IdentityPolicy::dsox2024a());
//! let mut scope = Scope::connect("/dev/ttyUSB0", options)?;
//! scope.set_time_per_division(1e-3)?;
//! let volts = scope.measure_average_voltage(1u8, MeasurementInterval::Display)?;
//! println!("Average: {} V", volts);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Without an instrument
//!
//! ```rust
//! use infiniscope_rs::{ConnectOptions, IdentityPolicy, LoopbackTerminal, Scope};
//! use infiniscope_rs::sample_decoder::encode_block;
//!
//! let terminal = LoopbackTerminal::new()
//!     .reply("ACME,MODEL-X,SN1,FW1")
//!     .reply("+0,+0,+3,+1,+1.0E-6,+0.0,+0,+1.0E-2,+0.0,+0")
//!     .reply_bytes(encode_block(&[0, 10, 20]));
//!
//! let mut scope = Scope::new(terminal, ConnectOptions::new(IdentityPolicy::contains("MODEL-X")))?;
//! let trace = scope.get_trace(1u8)?;
//! assert_eq!(trace.len(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Tracy zone covering the rest of the enclosing block when the
/// `cpu-profiling` feature is enabled.
macro_rules! profile_zone {
    ($name:literal) => {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!($name), 0));
    };
}
pub(crate) use profile_zone;

pub mod acquisition;
pub mod fields;
pub mod loopback;
pub mod measurement;
pub mod preamble;
pub mod sample_decoder;
pub mod scaling;
pub mod scope;
pub mod scope_connector;
pub mod scpi_terminal;
pub mod trace;
pub mod waveform_request;

// Re-export commonly used types
pub use acquisition::{
    AcquisitionController, AcquisitionState, FrozenAcquisition, ResumePolicy,
};
pub use loopback::LoopbackTerminal;
pub use measurement::{MeasurementError, MeasurementInterval};
pub use preamble::{AcquisitionType, Preamble, PreambleError, TimeAxisConvention};
pub use sample_decoder::{DecodeError, Samples};
pub use scaling::{CodeReference, ScalingEngine};
pub use scope::{Scope, ScopeError, TimeMode};
pub use scope_connector::{
    ConnectOptions, ConnectorError, Identity, IdentityPolicy, ScopeAddress, ScopeConnector,
};
pub use scpi_terminal::{ScpiTerminal, ScpiTransport, SerialTerminal, TcpTerminal, TerminalError};
pub use trace::Trace;
pub use waveform_request::{
    ByteOrder, ChannelRef, Encoding, PointMode, RequestError, TraceRequest, TransferFormat,
    WaveformRequestBuilder,
};
