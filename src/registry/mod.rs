pub mod metric;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::RegistryConfig;

use self::metric::{label_value, MetricDef, MetricSample};

/// Identity of one exposed series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub name: &'static str,
    pub label_values: Vec<String>,
}

#[derive(Debug, Clone)]
struct SeriesEntry {
    def: &'static MetricDef,
    value: f64,
    /// Publisher that last wrote this series.
    source: Arc<str>,
    /// Publish count of `source` when this series was last written.
    source_cycle: u64,
}

/// Immutable, internally consistent set of series visible to readers.
#[derive(Debug, Default)]
pub struct Snapshot {
    series: BTreeMap<SeriesKey, SeriesEntry>,
    generation: u64,
}

/// Outcome of a single [`MetricRegistry::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub accepted: usize,
    pub rejected: usize,
    pub evicted: usize,
    /// Series in the snapshot after the publish.
    pub series: usize,
    pub generation: u64,
}

/// Restricts exposition to VM series, as the `/metrics?vm=&ip=` query does.
#[derive(Debug, Clone, Default)]
pub struct SeriesFilter {
    /// Keep series whose `vm` label equals this name.
    pub vm: Option<String>,
    /// Keep series of VMs that report this IP address.
    pub ip: Option<String>,
}

impl SeriesFilter {
    pub fn is_empty(&self) -> bool {
        self.vm.is_none() && self.ip.is_none()
    }
}

#[derive(Default)]
struct WriterState {
    /// Label keys per metric name, fixed on first publish.
    schemas: HashMap<&'static str, &'static [&'static str]>,
    /// Publish count per source.
    cycles: HashMap<String, u64>,
}

impl WriterState {
    fn next_cycle(&mut self, source: &str) -> u64 {
        let cycle = self.cycles.entry(source.to_string()).or_insert(0);
        *cycle += 1;
        *cycle
    }

    fn check_schema(&mut self, sample: &MetricSample) -> Result<(), &'static str> {
        if sample.label_values.len() != sample.def.labels.len() {
            return Err("label value count does not match label keys");
        }

        match self.schemas.entry(sample.def.name) {
            Entry::Occupied(e) if *e.get() != sample.def.labels => {
                Err("label keys differ from registered schema")
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(sample.def.labels);
                Ok(())
            }
        }
    }
}

/// Last-known value of every (metric name, label set) pair.
///
/// Readers load the current [`Snapshot`] lock-free. Publishers build a new
/// snapshot off to the side and swap it in, so a reader sees either the whole
/// previous publish or the whole new one. Publishes are serialized by a
/// writer lock that readers never touch.
pub struct MetricRegistry {
    current: ArcSwap<Snapshot>,
    writer: Mutex<WriterState>,
    max_stale_cycles: u64,
}

impl MetricRegistry {
    /// Creates an empty registry. Series not refreshed by their source for
    /// more than `max_stale_cycles` publishes are evicted; 0 disables eviction.
    pub fn new(max_stale_cycles: u64) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(WriterState::default()),
            max_stale_cycles,
        }
    }

    pub fn from_config(cfg: &RegistryConfig) -> Self {
        Self::new(cfg.max_stale_cycles)
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Merges `samples` from `source` into a new snapshot and swaps it in.
    ///
    /// Samples overwrite the series they name; series absent from `samples`
    /// keep their previous value until they age out. Within one call the last
    /// sample for a series wins. Samples whose label keys disagree with the
    /// schema registered for their metric name are rejected.
    pub fn publish(&self, source: &str, samples: Vec<MetricSample>) -> PublishReport {
        let mut writer = self.writer.lock();
        let cycle = writer.next_cycle(source);

        let previous = self.current.load_full();
        let mut series = previous.series.clone();
        let source_label: Arc<str> = Arc::from(source);

        let mut accepted = 0;
        let mut rejected = 0;

        for sample in samples {
            if let Err(reason) = writer.check_schema(&sample) {
                warn!(
                    metric = sample.def.name,
                    labels = ?sample.label_values,
                    reason,
                    "rejecting sample",
                );
                rejected += 1;
                continue;
            }

            series.insert(
                SeriesKey {
                    name: sample.def.name,
                    label_values: sample.label_values,
                },
                SeriesEntry {
                    def: sample.def,
                    value: sample.value,
                    source: Arc::clone(&source_label),
                    source_cycle: cycle,
                },
            );
            accepted += 1;
        }

        let before = series.len();
        if self.max_stale_cycles > 0 {
            let max_stale = self.max_stale_cycles;
            series.retain(|_, e| {
                *e.source != *source || cycle.saturating_sub(e.source_cycle) <= max_stale
            });
        }
        let evicted = before - series.len();

        let report = PublishReport {
            accepted,
            rejected,
            evicted,
            series: series.len(),
            generation: previous.generation + 1,
        };

        self.current.store(Arc::new(Snapshot {
            series,
            generation: report.generation,
        }));

        debug!(
            source,
            accepted,
            rejected,
            evicted,
            series = report.series,
            generation = report.generation,
            "published snapshot",
        );

        report
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Snapshot {
    /// Number of publishes that produced this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Looks up the value of one series.
    pub fn get(&self, name: &'static str, label_values: &[&str]) -> Option<f64> {
        let key = SeriesKey {
            name,
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
        };
        self.series.get(&key).map(|e| e.value)
    }

    /// All series of `name`, in label order.
    pub fn series_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = MetricSample> + 'a {
        self.samples().filter(move |s| s.def.name == name)
    }

    /// All series as samples, ordered by name then labels.
    pub fn samples(&self) -> impl Iterator<Item = MetricSample> + '_ {
        self.series.iter().map(|(k, e)| MetricSample {
            def: e.def,
            label_values: k.label_values.clone(),
            value: e.value,
        })
    }

    /// Renders the snapshot in the Prometheus text exposition format.
    pub fn render(&self, filter: &SeriesFilter) -> String {
        let ip_uuids = filter.ip.as_deref().map(|ip| self.uuids_with_ip(ip));

        let mut out = String::with_capacity(self.series.len() * 96);
        let mut current_name: Option<&str> = None;

        for (key, entry) in &self.series {
            if !filter.is_empty() && !matches_filter(entry.def, &key.label_values, filter, ip_uuids.as_ref()) {
                continue;
            }

            if current_name != Some(key.name) {
                let _ = writeln!(out, "# HELP {} {}", key.name, entry.def.help);
                let _ = writeln!(out, "# TYPE {} gauge", key.name);
                current_name = Some(key.name);
            }

            out.push_str(key.name);
            if !entry.def.labels.is_empty() {
                out.push('{');
                for (i, (k, v)) in entry.def.labels.iter().zip(&key.label_values).enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(k);
                    out.push_str("=\"");
                    escape_label_value(&mut out, v);
                    out.push('"');
                }
                out.push('}');
            }
            out.push(' ');
            out.push_str(&format_value(entry.value));
            out.push('\n');
        }

        out
    }

    /// UUIDs of VMs that own a series labelled `ip=<ip>`.
    fn uuids_with_ip(&self, ip: &str) -> HashSet<&str> {
        self.series
            .iter()
            .filter(|(k, e)| label_value(e.def, &k.label_values, "ip") == Some(ip))
            .filter_map(|(k, e)| label_value(e.def, &k.label_values, "uuid"))
            .collect()
    }
}

fn matches_filter(
    def: &MetricDef,
    values: &[String],
    filter: &SeriesFilter,
    ip_uuids: Option<&HashSet<&str>>,
) -> bool {
    let Some(uuid) = label_value(def, values, "uuid") else {
        return false;
    };

    if let Some(vm) = &filter.vm {
        if label_value(def, values, "vm") != Some(vm.as_str()) {
            return false;
        }
    }

    match ip_uuids {
        Some(uuids) => uuids.contains(uuid),
        None => true,
    }
}

fn escape_label_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}
