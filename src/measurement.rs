use crate::waveform_request::ChannelRef;

/// Reply the instrument gives when a measurement has no valid result.
pub const NO_RESULT_SENTINEL: f64 = 9.9e37;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("Measurement unavailable, instrument replied '{raw}'")]
    Unavailable { raw: String },
}

/// Portion of the record a measurement is taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasurementInterval {
    /// Whole displayed record.
    #[default]
    Display,
    /// Integral number of periods.
    Cycle,
}

impl MeasurementInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Display => "DISP",
            Self::Cycle => "CYCL",
        }
    }
}

pub fn average_voltage_command(source: &ChannelRef, interval: MeasurementInterval) -> String {
    format!(":MEAS:VAV? {},{}", interval.as_str(), source.token())
}

pub fn parse_measurement(raw: &str) -> Result<f64, MeasurementError> {
    let unavailable = || MeasurementError::Unavailable {
        raw: raw.to_string(),
    };
    let value: f64 = raw.trim().parse().map_err(|_| unavailable())?;
    if !value.is_finite() || value.abs() >= NO_RESULT_SENTINEL {
        return Err(unavailable());
    }
    Ok(value)
}
