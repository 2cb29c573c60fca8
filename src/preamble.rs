//! Waveform preamble decoding.
//!
//! The preamble is the ten-field reply to `:WAVeform:PREamble?` describing how
//! the sample payload was encoded and how to scale it:
//!
//! ```text
//! <format>,<type>,<points>,<count>,<xinc>,<xorigin>,<xreference>,<yinc>,<yorigin>,<yreference>
//! ```
//!
//! It is always text, regardless of the payload encoding.

use crate::fields::{parse_field, split_fields, FieldCountError};
use crate::waveform_request::Encoding;
use std::str::FromStr;

const FIELD_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreambleError {
    #[error("Malformed preamble '{raw}': {source}")]
    FieldCount {
        source: FieldCountError,
        raw: String,
    },

    #[error("Malformed preamble '{raw}': unknown format code '{code}'")]
    UnknownFormat { code: String, raw: String },

    #[error("Malformed preamble '{raw}': unknown acquisition type code '{code}'")]
    UnknownAcquisitionType { code: String, raw: String },

    #[error("Malformed preamble '{raw}': field {field} has invalid value '{value}'")]
    InvalidField {
        field: &'static str,
        value: String,
        raw: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionType {
    Normal,
    Peak,
    Average,
    HighResolution,
}

impl AcquisitionType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Peak),
            2 => Some(Self::Average),
            3 => Some(Self::HighResolution),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORM",
            Self::Peak => "PEAK",
            Self::Average => "AVER",
            Self::HighResolution => "HRES",
        }
    }
}

/// How sample positions are turned into timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeAxisConvention {
    /// `x[i] = x_origin + x_increment * (i - x_origin_index)`; spacing is
    /// exactly `x_increment`.
    #[default]
    Affine,
    /// `point_count` evenly spaced values from the first timestamp to one
    /// increment past the last sample. Spacing is
    /// `x_increment * point_count / (point_count - 1)`, so it drifts from the
    /// instrument's sample clock. Kept only to reproduce old traces.
    Linspace,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preamble {
    pub format: Encoding,
    pub acq_type: AcquisitionType,
    pub point_count: u32,
    pub average_count: u32,
    pub x_increment: f64,
    pub x_origin: f64,
    pub x_origin_index: i32,
    pub y_increment: f64,
    pub y_origin: f64,
    pub y_origin_index: i32,
}

impl Preamble {
    pub fn parse(raw: &str) -> Result<Self, PreambleError> {
        let fields: [&str; FIELD_COUNT] =
            split_fields(raw, ',').map_err(|source| PreambleError::FieldCount {
                source,
                raw: raw.to_string(),
            })?;

        let field = |index: usize, name: &'static str| {
            let value = fields[index];
            if value.trim().is_empty() {
                Err(PreambleError::InvalidField {
                    field: name,
                    value: value.to_string(),
                    raw: raw.to_string(),
                })
            } else {
                Ok(value)
            }
        };
        fn typed<T: FromStr>(
            value: &str,
            name: &'static str,
            raw: &str,
        ) -> Result<T, PreambleError> {
            parse_field(value).ok_or_else(|| PreambleError::InvalidField {
                field: name,
                value: value.to_string(),
                raw: raw.to_string(),
            })
        }

        let format_code = field(0, "format")?;
        let format = parse_field(format_code)
            .and_then(Encoding::from_code)
            .ok_or_else(|| PreambleError::UnknownFormat {
                code: format_code.to_string(),
                raw: raw.to_string(),
            })?;

        let type_code = field(1, "type")?;
        let acq_type = parse_field(type_code)
            .and_then(AcquisitionType::from_code)
            .ok_or_else(|| PreambleError::UnknownAcquisitionType {
                code: type_code.to_string(),
                raw: raw.to_string(),
            })?;

        Ok(Self {
            format,
            acq_type,
            point_count: typed(field(2, "points")?, "points", raw)?,
            average_count: typed(field(3, "count")?, "count", raw)?,
            x_increment: typed(field(4, "xincrement")?, "xincrement", raw)?,
            x_origin: typed(field(5, "xorigin")?, "xorigin", raw)?,
            x_origin_index: typed(field(6, "xreference")?, "xreference", raw)?,
            y_increment: typed(field(7, "yincrement")?, "yincrement", raw)?,
            y_origin: typed(field(8, "yorigin")?, "yorigin", raw)?,
            y_origin_index: typed(field(9, "yreference")?, "yreference", raw)?,
        })
    }

    /// Timestamp of the sample at `index`.
    pub fn time_at(&self, index: usize) -> f64 {
        self.x_origin + self.x_increment * (index as f64 - f64::from(self.x_origin_index))
    }

    /// One timestamp per point, constant spacing of `x_increment`.
    pub fn time_axis(&self) -> Vec<f64> {
        self.time_axis_with(TimeAxisConvention::Affine)
    }

    pub fn time_axis_with(&self, convention: TimeAxisConvention) -> Vec<f64> {
        let points = self.point_count as usize;
        match convention {
            TimeAxisConvention::Affine => (0..points).map(|i| self.time_at(i)).collect(),
            TimeAxisConvention::Linspace => {
                let start = self.time_at(0);
                if points < 2 {
                    return vec![start; points];
                }
                let stop = start + self.x_increment * points as f64;
                let step = (stop - start) / (points - 1) as f64;
                (0..points).map(|i| start + step * i as f64).collect()
            }
        }
    }
}

impl FromStr for Preamble {
    type Err = PreambleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
