//! GPU memory inventory via `nvidia-smi`.

use std::process::Command;

use common::GpuRecord;

use crate::error::ProbeError;

const QUERY_ARGS: [&str; 2] = [
    "--query-gpu=index,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

/// Source of per-device memory records.
pub trait GpuProbe: Send + Sync {
    fn query(&self) -> Result<Vec<GpuRecord>, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: String,
}

impl NvidiaSmiProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn query(&self) -> Result<Vec<GpuRecord>, ProbeError> {
        let output = Command::new(&self.program)
            .args(QUERY_ARGS)
            .output()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                program: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_query_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `index, used, total` lines. One bad line fails the whole probe.
pub fn parse_query_output(stdout: &str) -> Result<Vec<GpuRecord>, ProbeError> {
    stdout.trim().lines().map(parse_line).collect()
}

fn parse_line(line: &str) -> Result<GpuRecord, ProbeError> {
    let parse_err = |reason: String| ProbeError::Parse {
        line: line.to_string(),
        reason,
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [index, used, total] = fields[..] else {
        return Err(parse_err(format!("expected 3 fields, got {}", fields.len())));
    };

    let megabytes = |field: &str, what: &str| {
        field
            .parse::<i64>()
            .map_err(|e| parse_err(format!("{} {:?}: {}", what, field, e)))
    };

    Ok(GpuRecord {
        gpu: index.to_string(),
        memory_used_MB: megabytes(used, "memory.used")?,
        memory_total_MB: megabytes(total, "memory.total")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_gpus() {
        let stdout = "0, 1024, 16384\n1, 0, 24576\n";
        let records = parse_query_output(stdout).unwrap();

        assert_eq!(
            records,
            vec![
                GpuRecord {
                    gpu: "0".to_string(),
                    memory_used_MB: 1024,
                    memory_total_MB: 16384,
                },
                GpuRecord {
                    gpu: "1".to_string(),
                    memory_used_MB: 0,
                    memory_total_MB: 24576,
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_query_output("").unwrap().is_empty());
        assert!(parse_query_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_fails_whole_probe() {
        let err = parse_query_output("0, 1024, 16384\n1, [N/A], 24576\n").unwrap_err();
        assert!(matches!(err, ProbeError::Parse { .. }));
        assert!(err.to_string().contains("memory.used"));

        let err = parse_query_output("0, 1024").unwrap_err();
        assert!(err.to_string().contains("expected 3 fields"));
    }

    #[test]
    fn test_missing_tool() {
        let probe = NvidiaSmiProbe::new("/nonexistent/nvidia-smi-for-tests");
        let err = probe.query().unwrap_err();

        assert!(matches!(err, ProbeError::Spawn { .. }));
        assert!(err.to_string().contains("nvidia-smi-for-tests"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit() {
        // `false` ignores its arguments and exits 1
        let err = NvidiaSmiProbe::new("false").query().unwrap_err();
        assert!(matches!(err, ProbeError::ExitStatus { .. }));
    }
}
