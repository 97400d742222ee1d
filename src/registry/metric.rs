/// Unit of an exposed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// 0-100.
    Percent,
    Bytes,
    /// Kilobytes per second.
    Bandwidth,
    Microseconds,
    Count,
    /// 1 or 0.
    State,
}

impl Unit {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Bytes => "bytes",
            Self::Bandwidth => "kbps",
            Self::Microseconds => "usecs",
            Self::Count => "count",
            Self::State => "state",
        }
    }
}

/// Conversion applied to a raw upstream value before it is exposed.
///
/// Fixed per metric definition, so every value of a metric name goes through
/// exactly one conversion exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Value is exposed as reported.
    None,
    /// Parts per million to percent (divide by 10 000).
    PpmToPercent,
    /// Mebibytes to bytes.
    MibToBytes,
}

impl Normalization {
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            Self::None => raw,
            Self::PpmToPercent => raw / 10_000.0,
            Self::MibToBytes => raw * 1024.0 * 1024.0,
        }
    }
}

/// Static description of one exposed metric name.
#[derive(Debug, PartialEq)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    /// Label keys, in exposition order. Fixed for the process lifetime.
    pub labels: &'static [&'static str],
    pub unit: Unit,
    pub normalization: Normalization,
}

impl MetricDef {
    /// Builds a sample from a raw upstream value, applying this metric's
    /// normalization.
    pub fn sample<S: AsRef<str>>(&'static self, label_values: &[S], raw: f64) -> MetricSample {
        MetricSample {
            def: self,
            label_values: label_values.iter().map(|v| v.as_ref().to_string()).collect(),
            value: self.normalization.apply(raw),
        }
    }
}

/// One normalized value for a (metric name, label set) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub def: &'static MetricDef,
    /// Values matching `def.labels` positionally.
    pub label_values: Vec<String>,
    pub value: f64,
}

impl MetricSample {
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Returns the value of label `key`, if this metric carries it.
    pub fn label(&self, key: &str) -> Option<&str> {
        label_value(self.def, &self.label_values, key)
    }
}

pub(crate) fn label_value<'a>(def: &MetricDef, values: &'a [String], key: &str) -> Option<&'a str> {
    def.labels
        .iter()
        .position(|k| *k == key)
        .and_then(|i| values.get(i))
        .map(String::as_str)
}
