use crate::preamble::{AcquisitionType, Preamble};
use crate::sample_decoder::{DecodeError, Samples};
use crate::trace::Trace;

/// Which code maps to `y_origin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeReference {
    /// `y = y_origin + y_increment * code`
    #[default]
    Zero,
    /// `y = y_origin + y_increment * (code - code[0])`, i.e. the trace is
    /// shifted so its first sample sits at `y_origin`.
    FirstSample,
    /// `y = y_origin + y_increment * (code - y_origin_index)`, using the
    /// reference code reported in the preamble.
    Preamble,
}

/// Maps raw codes to seconds and volts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalingEngine {
    code_reference: CodeReference,
}

impl ScalingEngine {
    pub fn new(code_reference: CodeReference) -> Self {
        Self { code_reference }
    }

    pub fn code_reference(&self) -> CodeReference {
        self.code_reference
    }

    /// Timestamp index of the sample at `position` in the payload. Peak
    /// detect delivers a (min, max) pair per timestamp.
    pub fn sample_index(acq_type: AcquisitionType, position: usize) -> usize {
        match acq_type {
            AcquisitionType::Peak => position / 2,
            _ => position,
        }
    }

    /// Time axis built from the sample positions of a payload of `count`
    /// samples.
    pub fn time_axis(preamble: &Preamble, count: usize) -> Vec<f64> {
        (0..count)
            .map(|position| preamble.time_at(Self::sample_index(preamble.acq_type, position)))
            .collect()
    }

    pub fn voltages(&self, preamble: &Preamble, codes: &[i32]) -> Vec<f64> {
        crate::profile_zone!("voltages");

        let reference = match self.code_reference {
            CodeReference::Zero => 0.0,
            CodeReference::FirstSample => codes.first().map_or(0.0, |code| f64::from(*code)),
            CodeReference::Preamble => f64::from(preamble.y_origin_index),
        };
        codes
            .iter()
            .map(|code| preamble.y_origin + preamble.y_increment * (f64::from(*code) - reference))
            .collect()
    }

    /// Scale binary codes; the time axis comes from the sample positions.
    pub fn scale_codes(&self, preamble: &Preamble, codes: &[i32]) -> Result<Trace, DecodeError> {
        check_point_count(preamble, codes.len())?;
        Ok(Trace::new(
            Self::time_axis(preamble, codes.len()),
            self.voltages(preamble, codes),
        ))
    }

    /// Attach a time axis to values that are already in volts (text
    /// payloads). Outside peak detect the axis comes straight from the
    /// preamble.
    pub fn scale_values(
        &self,
        preamble: &Preamble,
        values: Vec<f64>,
    ) -> Result<Trace, DecodeError> {
        check_point_count(preamble, values.len())?;
        let x = match preamble.acq_type {
            AcquisitionType::Peak => Self::time_axis(preamble, values.len()),
            _ => preamble.time_axis(),
        };
        Ok(Trace::new(x, values))
    }

    pub fn scale(&self, preamble: &Preamble, samples: Samples) -> Result<Trace, DecodeError> {
        match samples {
            Samples::Values(values) => self.scale_values(preamble, values),
            Samples::Codes(codes) => self.scale_codes(preamble, &codes),
        }
    }
}

/// Peak detect may announce either the number of timestamps or the number of
/// codes, so both are accepted there.
fn check_point_count(preamble: &Preamble, actual: usize) -> Result<(), DecodeError> {
    let expected = preamble.point_count as usize;
    let matches = match preamble.acq_type {
        AcquisitionType::Peak => actual == expected || actual == 2 * expected,
        _ => actual == expected,
    };
    if !matches {
        return Err(DecodeError::PointCountMismatch { expected, actual });
    }
    Ok(())
}
