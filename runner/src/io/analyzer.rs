//! Workload output analysis.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::core::types::{AppInfo, ExecResult, ExperimentOutcome, Workload};
use crate::io::config::Settings;

/// Turns raw workload output into the outcome's note.
pub trait OutputAnalyzer {
    fn analyze(
        &self,
        exec: &ExecResult,
        outcome: &mut ExperimentOutcome,
        app: &AppInfo,
        settings: &Settings,
    ) -> Result<()>;
}

/// Checks the app's expected-output pattern and summarizes benchmark output.
pub struct PatternAnalyzer;

static NETPIPE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+:\s+(\d+)\s+bytes\s+\d+\s+times\s+-->\s+([0-9.]+)\s+Mbps").unwrap()
});

static IMB_BENCHMARK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s*Benchmarking\s+(\S+)").unwrap());

impl OutputAnalyzer for PatternAnalyzer {
    fn analyze(
        &self,
        exec: &ExecResult,
        outcome: &mut ExperimentOutcome,
        app: &AppInfo,
        settings: &Settings,
    ) -> Result<()> {
        if let Some(pattern) = &app.expected_output {
            let re = Regex::new(pattern)
                .with_context(|| format!("invalid expected_output pattern for {}", app.name))?;
            if !re.is_match(&exec.stdout) {
                bail!("output of {} does not match '{pattern}'", app.name);
            }
        }

        outcome.note = match settings.workload() {
            Workload::Imb => imb_note(&exec.stdout)?,
            Workload::NetPipe => netpipe_note(&exec.stdout)?,
            Workload::Init => format!(
                "{} completed ({} lines of output)",
                app.name,
                exec.stdout.lines().count()
            ),
        };
        Ok(())
    }
}

fn netpipe_note(stdout: &str) -> Result<String> {
    let mut best: Option<(u64, f64)> = None;
    for caps in NETPIPE_LINE.captures_iter(stdout) {
        let bytes: u64 = caps[1].parse().context("parse NetPIPE message size")?;
        let mbps: f64 = caps[2].parse().context("parse NetPIPE bandwidth")?;
        if best.is_none_or(|(_, current)| mbps > current) {
            best = Some((bytes, mbps));
        }
    }
    match best {
        Some((bytes, mbps)) => Ok(format!("max bandwidth {mbps} Mbps at {bytes} bytes")),
        None => bail!("no NetPIPE measurements in output"),
    }
}

fn imb_note(stdout: &str) -> Result<String> {
    let names: Vec<&str> = IMB_BENCHMARK
        .captures_iter(stdout)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if names.is_empty() {
        bail!("no IMB benchmarks in output");
    }
    Ok(format!("IMB benchmarks: {}", names.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(expected: Option<&str>) -> AppInfo {
        AppInfo {
            name: "init-test".to_string(),
            bin_path: "/opt/app/init-test".to_string(),
            source: String::new(),
            expected_output: expected.map(str::to_string),
        }
    }

    fn analyze(stdout: &str, app: &AppInfo, settings: &Settings) -> Result<ExperimentOutcome> {
        let mut outcome = ExperimentOutcome::default();
        PatternAnalyzer.analyze(&ExecResult::ok(stdout, ""), &mut outcome, app, settings)?;
        Ok(outcome)
    }

    #[test]
    fn init_note_counts_lines() {
        let outcome = analyze("rank 0\nrank 1\n", &app(None), &Settings::default()).expect("ok");
        assert_eq!(outcome.note, "init-test completed (2 lines of output)");
    }

    #[test]
    fn expected_output_must_match() {
        let app = app(Some(r"Hello from rank \d+"));
        assert!(analyze("Hello from rank 0\n", &app, &Settings::default()).is_ok());
        let err = analyze("Segmentation fault\n", &app, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn netpipe_reports_peak_bandwidth() {
        let mut settings = Settings::default();
        settings.workload.netpipe = true;
        let stdout = "  0:       1 bytes   2364 times -->      0.19 Mbps in      40.31 usec\n\
                      1:       2 bytes   2480 times -->      0.38 Mbps in      40.40 usec\n\
                      2:    1024 bytes   1200 times -->    812.50 Mbps in      10.02 usec\n";
        let outcome = analyze(stdout, &app(None), &settings).expect("ok");
        assert_eq!(outcome.note, "max bandwidth 812.5 Mbps at 1024 bytes");
    }

    #[test]
    fn netpipe_without_measurements_fails() {
        let mut settings = Settings::default();
        settings.workload.netpipe = true;
        assert!(analyze("nothing here", &app(None), &settings).is_err());
    }

    #[test]
    fn imb_lists_benchmarks() {
        let mut settings = Settings::default();
        settings.workload.imb = true;
        settings.workload.netpipe = true;
        let stdout = "# Benchmarking PingPong\n#bytes #repetitions\n# Benchmarking Allreduce\n";
        let outcome = analyze(stdout, &app(None), &settings).expect("ok");
        assert_eq!(outcome.note, "IMB benchmarks: PingPong, Allreduce");
    }
}
