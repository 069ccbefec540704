use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the machine and process an execution ran in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub hostname: String,
    pub user: String,
    pub process_id: u32,
    pub os: String,
    pub arch: String,
    pub working_directory: String,
    pub cpu_count: usize,
    pub package_version: String,
    pub captured_at: DateTime<Utc>,
}

/// Source of [`EnvironmentSummary`] values.
pub trait EnvironmentProvider: Send + Sync {
    fn summary(&self) -> EnvironmentSummary;
}

/// Reads the summary from the running process and OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
    fn summary(&self) -> EnvironmentSummary {
        EnvironmentSummary {
            hostname: hostname(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            process_id: std::process::id(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            working_directory: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            cpu_count: std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            captured_at: Utc::now(),
        }
    }
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_summary_describes_this_process() {
        let summary = SystemEnvironment.summary();
        assert_eq!(summary.process_id, std::process::id());
        assert_eq!(summary.os, std::env::consts::OS);
        assert!(summary.cpu_count >= 1);
        assert!(!summary.hostname.is_empty());
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = SystemEnvironment.summary();
        let json = serde_json::to_string(&summary).unwrap();
        let parsed: EnvironmentSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, summary);
    }
}
