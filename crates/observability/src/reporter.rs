//! StatsReporter - per-flow telemetry sink
//!
//! Every record is written as one JSON line to stdout and/or a daily rotated
//! file, and its numeric fields are exported as gauges.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, SecondsFormat};
use contracts::{StatsHandler, StatsRecord};
use metrics::Label;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

/// Gauge name prefixes per record kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurements {
    pub stream: String,
    pub input: String,
    pub asi: String,
}

impl Default for Measurements {
    fn default() -> Self {
        Self {
            stream: "srt".to_string(),
            input: "rist_receive".to_string(),
            asi: "dektecasi".to_string(),
        }
    }
}

impl Measurements {
    fn for_record(&self, record: &StatsRecord) -> &str {
        match record {
            StatsRecord::Stream(_) => &self.stream,
            StatsRecord::InputFlow(_) => &self.input,
            StatsRecord::Asi(_) => &self.asi,
        }
    }
}

/// Measurement names shared by every reporter, replaced on telemetry reload
#[derive(Debug, Clone, Default)]
pub struct MeasurementNames(Arc<RwLock<Measurements>>);

impl MeasurementNames {
    pub fn set(&self, measurements: Measurements) {
        *self.0.write() = measurements;
    }

    pub fn get(&self) -> Measurements {
        self.0.read().clone()
    }
}

/// Prometheus-safe gauge name
pub fn metric_name(measurement: &str, field: &str) -> String {
    format!("{measurement}_{field}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// `<base>.<YYYYMMDD>` reopened when the local date changes
struct DailyFile {
    base: PathBuf,
    date: NaiveDate,
    file: File,
}

impl DailyFile {
    fn open(base: &Path, date: NaiveDate) -> Result<Self> {
        let path = dated_path(base, date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open stats file {}", path.display()))?;
        link_current(base, &path);
        Ok(Self {
            base: base.to_path_buf(),
            date,
            file,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let today = Local::now().date_naive();
        if today != self.date {
            *self = Self::open(&self.base, today)?;
        }
        writeln!(self.file, "{line}").context("Failed to write stats line")
    }
}

fn dated_path(base: &Path, date: NaiveDate) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{}", date.format("%Y%m%d")));
    PathBuf::from(name)
}

/// Point `base` at the current dated file
#[cfg(unix)]
fn link_current(base: &Path, target: &Path) {
    let Some(name) = target.file_name() else {
        return;
    };
    let _ = std::fs::remove_file(base);
    if let Err(e) = std::os::unix::fs::symlink(name, base) {
        warn!(link = %base.display(), error = %e, "Failed to link current stats file");
    }
}

#[cfg(not(unix))]
fn link_current(_base: &Path, _target: &Path) {}

#[derive(Serialize)]
struct StatsLine<'a> {
    timestamp: String,
    #[serde(rename = "type")]
    kind: &'static str,
    host: &'a str,
    #[serde(flatten)]
    record: &'a StatsRecord,
}

/// Telemetry sink of one flow
pub struct StatsReporter {
    flow: String,
    stdout: bool,
    file: Option<Mutex<DailyFile>>,
    names: MeasurementNames,
}

impl StatsReporter {
    pub fn new(
        flow: impl Into<String>,
        stdout: bool,
        file: Option<&Path>,
        names: MeasurementNames,
    ) -> Result<Self> {
        let flow = flow.into();
        info!(flow = %flow, stdout, file = ?file, "Setting up stats");
        let file = file
            .map(|base| DailyFile::open(base, Local::now().date_naive()).map(Mutex::new))
            .transpose()?;
        Ok(Self {
            flow,
            stdout,
            file,
            names,
        })
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    /// JSON line for a record: `timestamp`, `type` and `host` first, then the record body
    pub fn format_line(remote_host: &str, record: &StatsRecord) -> String {
        let line = StatsLine {
            timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Millis, false),
            kind: record.kind(),
            host: remote_host,
            record,
        };
        serde_json::to_string(&line).unwrap_or_default()
    }

    fn labels(
        &self,
        remote_host: &str,
        output_identifier: &str,
        local_url: Option<&Url>,
        record: &StatsRecord,
    ) -> Vec<Label> {
        let mut labels = vec![Label::new("flow", self.flow.clone())];
        if !remote_host.is_empty() {
            labels.push(Label::new("remote_host", remote_host.to_string()));
        }
        if let Some(url) = local_url {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{host}:{port}"),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            };
            labels.push(Label::new("local_url", host));
        }
        if !output_identifier.is_empty() {
            labels.push(Label::new("output_identifier", output_identifier.to_string()));
        }
        match record {
            StatsRecord::InputFlow(s) if !s.cname.is_empty() => {
                labels.push(Label::new("cname", s.cname.clone()));
            }
            StatsRecord::Asi(s) => labels.push(Label::new("port", s.port.to_string())),
            _ => {}
        }
        labels
    }
}

impl StatsHandler for StatsReporter {
    fn handle_stats(
        &self,
        remote_host: &str,
        output_identifier: &str,
        local_url: Option<&Url>,
        record: StatsRecord,
    ) {
        if self.stdout || self.file.is_some() {
            let line = Self::format_line(remote_host, &record);
            if self.stdout {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
            }
            if let Some(file) = &self.file {
                if let Err(e) = file.lock().write_line(&line) {
                    warn!(flow = %self.flow, error = %e, "Stats file write failed");
                }
            }
        }

        let measurement = self.names.get().for_record(&record).to_string();
        let labels = self.labels(remote_host, output_identifier, local_url, &record);
        for (field, value) in record.numeric_fields() {
            metrics::gauge!(metric_name(&measurement, field), labels.clone()).set(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AsiStats, InputFlowStats, StreamStats};
    use serde_json::Value;

    fn stream_record() -> StatsRecord {
        StatsRecord::Stream(StreamStats {
            bytes_sent_total: 1316,
            packets_sent_total: 1,
            bytes_sent: 1316,
            packets_sent: 1,
            send_rate_mbps: 1.5,
            rtt_ms: 0.0,
        })
    }

    #[test]
    fn test_metric_name_sanitized() {
        assert_eq!(metric_name("rist-receive", "quality"), "rist_receive_quality");
        assert_eq!(metric_name("srt", "rtt_ms"), "srt_rtt_ms");
    }

    #[test]
    fn test_line_prefix_and_body() {
        let line = StatsReporter::format_line("10.0.0.1", &stream_record());
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "stream");
        assert_eq!(value["host"], "10.0.0.1");
        assert_eq!(value["bytes_sent_total"], 1316);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
        // prefix keys come first
        assert!(line.starts_with("{\"timestamp\""));
    }

    #[test]
    fn test_file_sink_appends_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("stats.json");
        let reporter =
            StatsReporter::new("flow-a", false, Some(&base), MeasurementNames::default()).unwrap();

        reporter.handle_stats("", "", None, stream_record());
        reporter.handle_stats(
            "",
            "asi-out",
            None,
            StatsRecord::Asi(AsiStats {
                port: 1,
                fifo_bytes: 10,
                bytes_written_total: 100,
                bytes_written: 50,
            }),
        );

        let dated = dated_path(&base, Local::now().date_naive());
        let content = std::fs::read_to_string(dated).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"type\":\"asi\""));
    }

    #[test]
    fn test_labels_carry_context() {
        let reporter = StatsReporter::new("flow-a", false, None, MeasurementNames::default()).unwrap();
        let url = Url::parse("srt://0.0.0.0:9000?passphrase=REDACTED").unwrap();
        let record = StatsRecord::InputFlow(InputFlowStats {
            cname: "cam1".into(),
            ..InputFlowStats::default()
        });
        let labels = reporter.labels("1.2.3.4", "main", Some(&url), &record);
        let pairs: Vec<_> = labels.iter().map(|l| (l.key(), l.value())).collect();
        assert!(pairs.contains(&("flow", "flow-a")));
        assert!(pairs.contains(&("remote_host", "1.2.3.4")));
        assert!(pairs.contains(&("local_url", "0.0.0.0:9000")));
        assert!(pairs.contains(&("output_identifier", "main")));
        assert!(pairs.contains(&("cname", "cam1")));
    }

    #[test]
    fn test_measurement_names_shared() {
        let names = MeasurementNames::default();
        let clone = names.clone();
        names.set(Measurements {
            stream: "stream_out".into(),
            ..Measurements::default()
        });
        assert_eq!(clone.get().stream, "stream_out");
        assert_eq!(clone.get().for_record(&stream_record()), "stream_out");
    }
}
