use core::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use error_stack::Report;
use error_stack::ResultExt;
use tempfile::NamedTempFile;
use tracing::debug;

use super::layer::Layer;
use super::layer::Plan;

#[derive(Debug, derive_more::Display)]
pub enum WorkloadError {
    #[display("Cannot connect to Pebble in container {container}")]
    Unreachable { container: String },
    #[display("pebble {command} failed: {message}")]
    Command { command: String, message: String },
    #[display("Unexpected output from pebble {command}: {message}")]
    Output { command: String, message: String },
}

impl Error for WorkloadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInfo {
    pub name: String,
    pub state: CheckState,
    pub failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    /// `active`, `inactive`, `backoff` or `error`.
    pub current: String,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        self.current == "active"
    }
}

/// The service manager of one workload container.
pub trait Workload: Send + Sync {
    fn container(&self) -> &str;

    fn can_connect(&self) -> bool;

    fn plan(&self) -> Result<Plan, Report<WorkloadError>>;

    /// Writes `content` to `path` inside the container, creating parents.
    fn push(&self, path: &str, content: &str) -> Result<(), Report<WorkloadError>>;

    /// Adds `layer` under `label`, replacing a layer with the same label.
    fn add_layer(&self, label: &str, layer: &Layer) -> Result<(), Report<WorkloadError>>;

    /// Starts, restarts or stops services to match the plan.
    fn replan(&self) -> Result<(), Report<WorkloadError>>;

    fn services(&self, names: &[&str]) -> Result<Vec<ServiceStatus>, Report<WorkloadError>>;

    fn check_statuses(&self, names: &[&str]) -> Result<Vec<CheckInfo>, Report<WorkloadError>>;
}

/// [`Workload`] driven through the `pebble` client binary.
pub struct PebbleCli {
    container: String,
    binary: PathBuf,
    socket: PathBuf,
}

impl PebbleCli {
    pub fn new(container: impl Into<String>, binary: PathBuf, socket: PathBuf) -> Self {
        Self {
            container: container.into(),
            binary,
            socket,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, Report<WorkloadError>> {
        let command = args.first().copied().unwrap_or_default().to_string();
        debug!(container = %self.container, ?args, "running pebble");

        let output = Command::new(&self.binary)
            .args(args)
            .env("PEBBLE_SOCKET", &self.socket)
            .output()
            .change_context_lazy(|| WorkloadError::Command {
                command: command.clone(),
                message: format!("failed to execute {}", self.binary.display()),
            })?;

        if !output.status.success() {
            return Err(Report::new(WorkloadError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn temp_file(&self, command: &str, content: &str) -> Result<NamedTempFile, Report<WorkloadError>> {
        let failed = || WorkloadError::Command {
            command: command.to_string(),
            message: "failed to stage local file".to_string(),
        };
        let mut file = NamedTempFile::new().change_context_lazy(failed)?;
        file.write_all(content.as_bytes())
            .change_context_lazy(failed)?;
        file.flush().change_context_lazy(failed)?;
        Ok(file)
    }
}

impl Workload for PebbleCli {
    fn container(&self) -> &str {
        &self.container
    }

    fn can_connect(&self) -> bool {
        self.socket.exists() && self.run(&["version"]).is_ok()
    }

    fn plan(&self) -> Result<Plan, Report<WorkloadError>> {
        let output = self.run(&["plan"])?;
        if output.trim().is_empty() || output.trim() == "{}" {
            return Ok(Plan::default());
        }
        serde_yaml::from_str(&output).change_context(WorkloadError::Output {
            command: "plan".to_string(),
            message: "not a valid plan".to_string(),
        })
    }

    fn push(&self, path: &str, content: &str) -> Result<(), Report<WorkloadError>> {
        let file = self.temp_file("push", content)?;
        let local = file.path().to_string_lossy().into_owned();
        self.run(&["push", "-p", &local, path])?;
        Ok(())
    }

    fn add_layer(&self, label: &str, layer: &Layer) -> Result<(), Report<WorkloadError>> {
        let yaml = serde_yaml::to_string(layer).change_context(WorkloadError::Output {
            command: "add".to_string(),
            message: "cannot serialize layer".to_string(),
        })?;
        let file = self.temp_file("add", &yaml)?;
        let local = file.path().to_string_lossy().into_owned();
        self.run(&["add", "--combine", label, &local])?;
        Ok(())
    }

    fn replan(&self) -> Result<(), Report<WorkloadError>> {
        self.run(&["replan"])?;
        Ok(())
    }

    fn services(&self, names: &[&str]) -> Result<Vec<ServiceStatus>, Report<WorkloadError>> {
        let mut args = vec!["services"];
        args.extend_from_slice(names);
        let output = self.run(&args)?;
        Ok(parse_services(&output))
    }

    fn check_statuses(&self, names: &[&str]) -> Result<Vec<CheckInfo>, Report<WorkloadError>> {
        let mut args = vec!["checks"];
        args.extend_from_slice(names);
        let output = self.run(&args)?;
        parse_checks(&output)
    }
}

/// Parses the `Service  Startup  Current  Since` table.
fn parse_services(output: &str) -> Vec<ServiceStatus> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let name = columns.next()?;
            let _startup = columns.next()?;
            let current = columns.next()?;
            Some(ServiceStatus {
                name: name.to_string(),
                current: current.to_string(),
            })
        })
        .collect()
}

/// Parses the `Check  Level  Status  Failures  Change` table.
fn parse_checks(output: &str) -> Result<Vec<CheckInfo>, Report<WorkloadError>> {
    let malformed = |line: &str| {
        Report::new(WorkloadError::Output {
            command: "checks".to_string(),
            message: format!("malformed line: {line}"),
        })
    };

    let mut checks = Vec::new();
    for line in output.lines().skip(1).filter(|line| !line.trim().is_empty()) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let [name, _level, status, failures, ..] = columns.as_slice() else {
            return Err(malformed(line));
        };
        let state = match *status {
            "up" => CheckState::Up,
            "down" => CheckState::Down,
            _ => return Err(malformed(line)),
        };
        // Failures render as `3/5` (count/threshold) in recent releases.
        let count = failures.split('/').next().unwrap_or(failures);
        let failures = count.parse().map_err(|_| malformed(line))?;
        checks.push(CheckInfo {
            name: name.to_string(),
            state,
            failures,
        });
    }
    Ok(checks)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn parses_check_table() {
        let output = "Check                Level  Status  Failures  Change\n\
                      katib-db-manager-up  alive  down    5/5       12\n\
                      other                -      up      0/3       -\n";

        let checks = parse_checks(output).expect("checks");

        assert_eq!(
            checks,
            vec![
                CheckInfo {
                    name: "katib-db-manager-up".to_string(),
                    state: CheckState::Down,
                    failures: 5,
                },
                CheckInfo {
                    name: "other".to_string(),
                    state: CheckState::Up,
                    failures: 0,
                },
            ]
        );
    }

    #[test]
    fn rejects_unknown_check_status() {
        let output = "Check  Level  Status  Failures  Change\nx  alive  sideways  0  -\n";
        assert!(parse_checks(output).is_err());
    }

    #[test]
    fn parses_service_table() {
        let output = "Service     Startup  Current  Since\n\
                      katib-ui    enabled  active   today at 10:00 UTC\n\
                      sidecar     disabled inactive -\n";

        let services = parse_services(output);

        assert_eq!(services.len(), 2);
        assert!(services[0].is_running());
        assert!(!services[1].is_running());
    }
}
