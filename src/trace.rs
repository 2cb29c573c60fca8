use polars::prelude::*;

pub const TIME_COLUMN_NAME: &str = "time";
pub const VOLTAGE_COLUMN_NAME: &str = "voltage";

/// A decoded, physically scaled waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub x_unit: String,
    pub y_unit: String,
    pub x_label: String,
    pub y_label: String,
}

impl Trace {
    /// Time in seconds against amplitude in volts.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        debug_assert_eq!(x.len(), y.len());
        Self {
            x,
            y,
            x_unit: "s".to_string(),
            y_unit: "V".to_string(),
            x_label: "Time".to_string(),
            y_label: "Voltage".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        df!(
            TIME_COLUMN_NAME => self.x.as_slice(),
            VOLTAGE_COLUMN_NAME => self.y.as_slice()
        )
    }

    pub fn lazy(&self) -> PolarsResult<LazyFrame> {
        Ok(self.to_dataframe()?.lazy())
    }
}
