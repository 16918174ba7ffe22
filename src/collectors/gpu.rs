//! GPU facts from `nvidia-smi`.
//!
//! The tool is located once at startup. Every query runs it as a child
//! process with `kill_on_drop`, so aborting the query task on timeout also
//! kills the process.

use crate::error::ProbeError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub const TOOL_NAME: &str = "nvidia-smi";

pub const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=name,utilization.gpu,memory.total,memory.used",
    "--format=csv,noheader,nounits",
];

#[cfg(target_os = "windows")]
const DRIVER_STORE: &str = r"C:\Windows\System32\DriverStore\FileRepository";

/// One parsed report row. Memory is in GiB, converted from the tool's MiB.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuRow {
    pub model: String,
    pub usage_percent: f64,
    pub memory_total_gb: f64,
    pub memory_used_gb: f64,
    pub memory_usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuTool {
    path: PathBuf,
}

impl GpuTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Searches the executable search path, then the Windows driver store.
    pub fn discover() -> Option<Self> {
        Self::discover_in(std::env::var_os("PATH"))
    }

    pub fn discover_in(search_path: Option<impl AsRef<OsStr>>) -> Option<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Ok(path) = which::which_in(TOOL_NAME, search_path, cwd) {
            return Some(Self::new(path));
        }
        discover_in_driver_store().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs the fixed query and parses its rows. Dropping the returned future
    /// kills the child process.
    pub async fn query(&self) -> Result<Vec<GpuRow>, ProbeError> {
        let output = Command::new(&self.path)
            .args(QUERY_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ProbeError::failed("gpu", format!("failed to run {}: {err}", self.path.display())))?;

        if !output.status.success() {
            return Err(ProbeError::failed(
                "gpu",
                format!("{} exited with {}", self.path.display(), output.status),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_rows(&text))
    }
}

#[cfg(target_os = "windows")]
fn discover_in_driver_store() -> Option<PathBuf> {
    let entries = std::fs::read_dir(DRIVER_STORE).ok()?;
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.to_ascii_lowercase().starts_with("nvdm"))
        })
        .collect();
    dirs.sort();
    dirs.into_iter()
        .map(|d| d.join("nvidia-smi.exe"))
        .find(|exe| exe.is_file())
}

#[cfg(not(target_os = "windows"))]
fn discover_in_driver_store() -> Option<PathBuf> {
    None
}

/// Parses `name, utilization, memory.total, memory.used` rows. Rows with
/// fewer than four fields are skipped; unreadable numbers count as zero.
pub fn parse_rows(text: &str) -> Vec<GpuRow> {
    text.trim()
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 4 {
                debug!(line, "skipping malformed GPU row");
                return None;
            }
            let memory_total_gb = parse_number(fields[2]) / 1024.0;
            let memory_used_gb = parse_number(fields[3]) / 1024.0;
            let memory_usage_percent = if memory_total_gb > 0.0 {
                memory_used_gb / memory_total_gb * 100.0
            } else {
                0.0
            };
            Some(GpuRow {
                model: fields[0].to_string(),
                usage_percent: parse_number(fields[1]),
                memory_total_gb,
                memory_used_gb,
                memory_usage_percent,
            })
        })
        .collect()
}

fn parse_number(input: &str) -> f64 {
    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_row() {
        let rows = parse_rows("RTX X, 10, 8192, 4096\n");
        assert_eq!(
            rows,
            vec![GpuRow {
                model: "RTX X".to_string(),
                usage_percent: 10.0,
                memory_total_gb: 8.0,
                memory_used_gb: 4.0,
                memory_usage_percent: 50.0,
            }]
        );
    }

    #[test]
    fn skips_short_rows_and_keeps_the_rest() {
        let rows = parse_rows("garbage line\nA100, 5, 40960, 1024\nB, 1, 2\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model, "A100");
        assert_eq!(rows[0].memory_total_gb, 40.0);
    }

    #[test]
    fn zero_total_memory_gives_zero_percent() {
        let rows = parse_rows("Ghost, [N/A], 0, 512");
        assert_eq!(rows[0].usage_percent, 0.0);
        assert_eq!(rows[0].memory_total_gb, 0.0);
        assert_eq!(rows[0].memory_usage_percent, 0.0);
    }

    #[test]
    fn empty_output_has_no_rows() {
        assert!(parse_rows("").is_empty());
        assert!(parse_rows("\n\n").is_empty());
    }

    #[test]
    fn discovery_fails_on_empty_search_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GpuTool::discover_in(Some(dir.path())).is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, Instant};

        pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn discovers_tool_on_search_path() {
            let dir = tempfile::tempdir().unwrap();
            let expected = script(dir.path(), TOOL_NAME, "exit 0");
            let tool = GpuTool::discover_in(Some(dir.path())).expect("tool on path");
            assert_eq!(tool.path(), expected.as_path());
        }

        #[tokio::test]
        async fn query_runs_tool_and_parses_output() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(
                dir.path(),
                TOOL_NAME,
                "echo 'RTX X, 10, 8192, 4096'\necho 'RTX Y, 90, 16384, 16384'",
            );
            let rows = GpuTool::new(path).query().await.unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[1].memory_usage_percent, 100.0);
        }

        #[tokio::test]
        async fn failing_tool_is_a_probe_failure() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), TOOL_NAME, "exit 9");
            let err = GpuTool::new(path).query().await.unwrap_err();
            assert!(matches!(err, ProbeError::Failed { .. }));
        }

        #[tokio::test]
        async fn dropped_query_kills_the_child() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("finished");
            let path = script(
                dir.path(),
                TOOL_NAME,
                &format!("sleep 1\ntouch {}", marker.display()),
            );
            let tool = GpuTool::new(path);
            let start = Instant::now();
            let out = tokio::time::timeout(Duration::from_millis(100), tool.query()).await;
            assert!(out.is_err());
            assert!(start.elapsed() < Duration::from_millis(900));
            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(!marker.exists());
        }
    }
}
