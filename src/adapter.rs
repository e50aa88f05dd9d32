//! Simulator adapter (§4.K): invokes an external hydrologic simulator as a
//! child process per particle, in its own scratch directory, under a
//! wall-clock timeout.
//!
//! Grounded on the subprocess-lifecycle shape of an async sensor-source
//! adapter found elsewhere in the example pack, adapted to a blocking,
//! thread-based model since the rest of this engine has no async runtime:
//! a dedicated reader thread drains the child's stdout while the calling
//! thread blocks on a channel with `recv_timeout`, killing the child and
//! returning `ModelError::Timeout` if the budget is exceeded. Stdout itself
//! carries no protocol — the child reports through files under its scratch
//! directory's `output/` — but the reader thread is kept exactly as before
//! since it's what lets the timeout path `kill()` the child without ever
//! sharing the `Child` handle across threads.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::error::ModelError;
use crate::model::{ForecastSample, ModelResult, ModelRunner};
use crate::vector::StateVector;

pub struct SimulatorAdapter {
    /// Path to the external simulator executable.
    pub executable: PathBuf,
    /// Root directory under which a fresh scratch directory is created for
    /// each particle invocation.
    pub scratch_root: PathBuf,
    pub timeout: Duration,
    /// Counts top-level invocations so each one's scratch directories are
    /// keyed by `(call, index)`, never reused across the run.
    call_seq: AtomicU64,
}

impl SimulatorAdapter {
    pub fn new(executable: impl Into<PathBuf>, scratch_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        SimulatorAdapter {
            executable: executable.into(),
            scratch_root: scratch_root.into(),
            timeout,
            call_seq: AtomicU64::new(0),
        }
    }

    fn scratch_dir(&self, call_id: u64, index: usize) -> Result<PathBuf, ModelError> {
        let dir = self
            .scratch_root
            .join(format!("call-{call_id}"))
            .join(format!("particle-{index}"));
        std::fs::create_dir_all(&dir).map_err(|source| ModelError::ScratchDir { index, source })?;
        Ok(dir)
    }

    /// Writes the particle's state as the simulator's config file and
    /// returns its path, to be passed as the child's command-line argument.
    fn write_state(&self, dir: &Path, index: usize, state: &StateVector) -> Result<PathBuf, ModelError> {
        let path = dir.join("state.txt");
        let body: String = state
            .as_slice()
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&path, body).map_err(|source| ModelError::ScratchDir { index, source })?;
        Ok(path)
    }

    /// Runs the child as `exec <config_file>` and waits for it to exit,
    /// under `self.timeout`. The child's stdout carries no information we
    /// read (output comes from files written under `dir/output/`); the
    /// reader thread just gives the calling thread an EOF-triggered
    /// completion signal without ever moving `Child` itself across threads.
    fn invoke(&self, index: usize, dir: &Path, config_file: &Path) -> Result<(), ModelError> {
        let mut child = Command::new(&self.executable)
            .arg(config_file)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ModelError::Spawn { index, source })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let (tx, rx) = bounded::<()>(1);
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = tx.send(());
        });

        match rx.recv_timeout(self.timeout) {
            Ok(()) => {
                let status = child.wait().map_err(|source| ModelError::Spawn { index, source })?;
                if !status.success() {
                    return Err(ModelError::NonZeroExit {
                        index,
                        status: status.code().unwrap_or(-1),
                    });
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(ModelError::Timeout {
                    index,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(ModelError::NonZeroExit { index, status: -1 }),
        }
    }

    /// Reads and parses the child's two output files, zipping them into one
    /// row per simulated step.
    fn read_output(&self, index: usize, dir: &Path) -> Result<Vec<BTreeMap<String, f64>>, ModelError> {
        let flow_path = dir.join("output").join("Stream.Flow");
        let agg_path = dir.join("output").join("Aggregated.Values");
        let flow_text = std::fs::read_to_string(&flow_path).map_err(|e| ModelError::OutputParse {
            index,
            reason: format!("failed to read {}: {e}", flow_path.display()),
        })?;
        let agg_text = std::fs::read_to_string(&agg_path).map_err(|e| ModelError::OutputParse {
            index,
            reason: format!("failed to read {}: {e}", agg_path.display()),
        })?;
        let discharges = parse_stream_flow(&flow_text);
        let aggregates = parse_aggregated_values(&agg_text);
        Ok(build_rows(&discharges, &aggregates))
    }
}

/// Parses `output/Stream.Flow`: whitespace-separated columns, column 5
/// (1-indexed) is discharge in m³/h, converted to L/s by dividing by 3.6.
/// Stops at the first row that doesn't have a parseable column 5, rather
/// than skipping it — a partial file means the child only got partway
/// through before whatever truncated it.
fn parse_stream_flow(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let value = fields.get(4).and_then(|f| f.parse::<f64>().ok());
        match value {
            Some(v) => out.push(v / 3.6),
            None => break,
        }
    }
    out
}

/// Parses `output/Aggregated.Values`: whitespace-separated columns, column
/// 9 is evaporation and columns 31-33 are SM1/SM2/SM3 (all 1-indexed).
/// Same stop-at-first-failure semantics as `parse_stream_flow`.
fn parse_aggregated_values(text: &str) -> Vec<(f64, f64, f64, f64)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let row = fields
            .get(8)
            .zip(fields.get(30))
            .zip(fields.get(31))
            .zip(fields.get(32))
            .and_then(|(((ev, sm1), sm2), sm3)| {
                Some((
                    ev.parse::<f64>().ok()?,
                    sm1.parse::<f64>().ok()?,
                    sm2.parse::<f64>().ok()?,
                    sm3.parse::<f64>().ok()?,
                ))
            });
        match row {
            Some(r) => out.push(r),
            None => break,
        }
    }
    out
}

fn build_rows(discharges: &[f64], aggregates: &[(f64, f64, f64, f64)]) -> Vec<BTreeMap<String, f64>> {
    let n = discharges.len().min(aggregates.len());
    (0..n)
        .map(|i| {
            let mut row = BTreeMap::new();
            row.insert("Discharge".to_string(), discharges[i]);
            row.insert("Evaporation".to_string(), aggregates[i].0);
            row.insert("SM1".to_string(), aggregates[i].1);
            row.insert("SM2".to_string(), aggregates[i].2);
            row.insert("SM3".to_string(), aggregates[i].3);
            row
        })
        .collect()
}

impl ModelRunner for SimulatorAdapter {
    fn run_model(&self, index: usize, state: &StateVector) -> Result<ModelResult, ModelError> {
        let call_id = self.call_seq.fetch_add(1, Ordering::Relaxed);
        let dir = self.scratch_dir(call_id, index)?;
        let config_file = self.write_state(&dir, index, state)?;
        self.invoke(index, &dir, &config_file)?;
        let mut rows = self.read_output(index, &dir)?;
        let row = if rows.is_empty() {
            return Err(ModelError::OutputParse {
                index,
                reason: "no output rows produced".to_string(),
            });
        } else {
            rows.remove(0)
        };
        let next_state = row
            .get("Discharge")
            .map(|&d| StateVector::new(vec![d]))
            .unwrap_or_else(|| state.clone());
        Ok(ModelResult {
            state: next_state,
            output: row,
        })
    }

    fn run_window(
        &self,
        index: usize,
        state: &StateVector,
        horizon_secs: i64,
        step_secs: i64,
    ) -> Result<Vec<ForecastSample>, ModelError> {
        let call_id = self.call_seq.fetch_add(1, Ordering::Relaxed);
        let dir = self.scratch_dir(call_id, index)?;
        let config_file = self.write_state(&dir, index, state)?;
        self.invoke(index, &dir, &config_file)?;
        let rows = self.read_output(index, &dir)?;
        let max_steps = if step_secs > 0 {
            (horizon_secs / step_secs) as usize + 1
        } else {
            rows.len()
        };
        Ok(rows
            .into_iter()
            .take(max_steps)
            .enumerate()
            .map(|(i, output)| ForecastSample {
                offset_secs: i as i64 * step_secs,
                output,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake_simulator.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{body}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
        }
        path
    }

    const AGGREGATED_ROW: &str =
        "1 2 3 4 5 6 7 8 1.5 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 0.1 0.2 0.3";

    fn output_writing_script() -> String {
        format!("mkdir -p output && echo '1 2 3 4 36.0' > output/Stream.Flow && echo '{AGGREGATED_ROW}' > output/Aggregated.Values")
    }

    #[test]
    fn parses_stream_flow_column_five_and_converts_units() {
        let discharges = parse_stream_flow("1 2 3 4 36.0\n");
        assert_eq!(discharges, vec![10.0]);
    }

    #[test]
    fn parses_aggregated_values_columns() {
        let rows = parse_aggregated_values(&format!("{AGGREGATED_ROW}\n"));
        assert_eq!(rows, vec![(1.5, 0.1, 0.2, 0.3)]);
    }

    #[test]
    fn stops_at_first_unparsable_row() {
        let text = "1 2 3 4 36.0\nnot enough cols\n1 2 3 4 10.0\n";
        assert_eq!(parse_stream_flow(text).len(), 1);
    }

    #[test]
    fn runs_a_real_child_process_and_reads_file_output() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(root.path(), &output_writing_script());
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_secs(5));
        let result = adapter.run_model(0, &StateVector::new(vec![1.0])).unwrap();
        assert_eq!(result.output["Discharge"], 10.0);
        assert_eq!(result.output["Evaporation"], 1.5);
        assert_eq!(result.output["SM1"], 0.1);
        assert_eq!(result.output["SM2"], 0.2);
        assert_eq!(result.output["SM3"], 0.3);
    }

    #[test]
    fn passes_the_state_file_as_a_command_line_argument() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(
            root.path(),
            &format!("{} && cp \"$1\" output/received_arg.txt", output_writing_script()),
        );
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_secs(5));
        adapter.run_model(0, &StateVector::new(vec![1.0])).unwrap();
        let received = std::fs::read_dir(root.path().join("scratch"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path()
            .join("particle-0")
            .join("output")
            .join("received_arg.txt");
        assert!(received.exists());
    }

    #[test]
    fn successive_calls_use_distinct_scratch_directories() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(root.path(), &output_writing_script());
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_secs(5));
        adapter.run_model(0, &StateVector::new(vec![1.0])).unwrap();
        adapter.run_model(0, &StateVector::new(vec![1.0])).unwrap();
        let calls: Vec<_> = std::fs::read_dir(root.path().join("scratch")).unwrap().collect();
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn kills_a_child_that_exceeds_its_timeout() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(root.path(), "sleep 5");
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_millis(200));
        let result = adapter.run_model(0, &StateVector::new(vec![1.0]));
        assert!(matches!(result, Err(ModelError::Timeout { .. })));
    }

    #[test]
    fn nonzero_exit_status_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(root.path(), "exit 3");
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_secs(5));
        let result = adapter.run_model(0, &StateVector::new(vec![1.0]));
        assert!(matches!(result, Err(ModelError::NonZeroExit { status: 3, .. })));
    }

    #[test]
    fn missing_output_files_report_a_parse_error() {
        let root = tempfile::tempdir().unwrap();
        let script = write_script(root.path(), "true");
        let adapter = SimulatorAdapter::new(script, root.path().join("scratch"), Duration::from_secs(5));
        let result = adapter.run_model(0, &StateVector::new(vec![1.0]));
        assert!(matches!(result, Err(ModelError::OutputParse { .. })));
    }
}
