//! Gateway backed by the `gcloud` CLI
//!
//! Every call runs one `gcloud compute ...` command with `--format=json` and
//! maps the JSON resource onto the normalized model. Non-zero exits are
//! classified from stderr into transient and fatal gateway errors.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;
use serde_json::Value;

use instance_ops_model::{
    InstanceRecord, InstanceStatus, InstanceTimestamps, OperationKind, OperationRecord,
    OperationStatus, OperationTimestamps,
};

use super::{GatewayError, GatewayResult, ProviderGateway};

/// Environment variable gcloud reads a credential file override from
const CREDENTIAL_FILE_ENV: &str = "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE";

/// gcloud gateway configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcloudConfig {
    /// Path or name of the gcloud binary
    pub binary: String,
    /// Project override (default: gcloud's active project)
    pub project: Option<String>,
    /// Service account key file
    pub credentials_file: Option<PathBuf>,
}

impl Default for GcloudConfig {
    fn default() -> Self {
        Self {
            binary: "gcloud".to_string(),
            project: None,
            credentials_file: None,
        }
    }
}

pub struct GcloudGateway {
    config: GcloudConfig,
}

impl GcloudGateway {
    pub fn new(config: GcloudConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = vec!["compute".to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        if let Some(ref project) = self.config.project {
            full.push(format!("--project={}", project));
        }
        full.push("--format=json".to_string());
        full.push("--quiet".to_string());
        full
    }

    fn run(&self, args: &[&str]) -> GatewayResult<Value> {
        let args = self.build_args(args);
        tracing::debug!(binary = %self.config.binary, args = ?args, "running provider client");

        let mut command = Command::new(&self.config.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref path) = self.config.credentials_file {
            command.env(CREDENTIAL_FILE_ENV, path);
        }

        let output = command
            .output()
            .map_err(|e| GatewayError::Client(format!("failed to spawn {}: {}", self.config.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::InvalidResponse(format!("invalid JSON from gcloud: {}", e)))
    }

    fn issue(&self, verb: &str, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        let zone_arg = format!("--zone={}", zone);
        let value = self.run(&["instances", verb, name, &zone_arg, "--async"])?;
        parse_operation(first_resource(value)?, zone)
    }
}

impl ProviderGateway for GcloudGateway {
    fn start_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        self.issue("start", zone, name)
    }

    fn stop_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        self.issue("stop", zone, name)
    }

    fn get_operation(&self, zone: &str, handle: &str) -> GatewayResult<OperationRecord> {
        let zone_arg = format!("--zone={}", zone);
        let value = self.run(&["operations", "describe", handle, &zone_arg])?;
        parse_operation(value, zone)
    }

    fn get_instance_status(&self, zone: &str, name: &str) -> GatewayResult<InstanceStatus> {
        let zone_arg = format!("--zone={}", zone);
        let value = self.run(&["instances", "describe", name, &zone_arg])?;
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidResponse("instance has no status".to_string()))?;
        status
            .parse()
            .map_err(|e| GatewayError::InvalidResponse(format!("{}", e)))
    }

    fn list_instances(&self) -> GatewayResult<BTreeMap<String, Vec<InstanceRecord>>> {
        let value = self.run(&["instances", "list"])?;
        parse_instance_list(value)
    }

    fn instance_operations(
        &self,
        zone: &str,
        name: &str,
        statuses: &[OperationStatus],
    ) -> GatewayResult<Vec<OperationRecord>> {
        let zone_arg = format!("--zones={}", zone);
        let filter_arg = format!("--filter=targetLink~/zones/{}/instances/{}$", zone, name);
        let value = self.run(&["operations", "list", &zone_arg, &filter_arg])?;
        parse_operation_list(value, zone, statuses)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOperation {
    name: String,
    operation_type: String,
    status: String,
    insert_time: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    target_link: Option<String>,
    #[serde(default)]
    error: Option<RawOperationError>,
}

#[derive(Debug, Deserialize)]
struct RawOperationError {
    #[serde(default)]
    errors: Vec<RawErrorItem>,
}

#[derive(Debug, Deserialize)]
struct RawErrorItem {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstance {
    name: String,
    status: String,
    zone: String,
    machine_type: String,
    creation_timestamp: String,
    #[serde(default)]
    deletion_timestamp: Option<String>,
    #[serde(default)]
    last_start_timestamp: Option<String>,
    #[serde(default)]
    last_stop_timestamp: Option<String>,
}

/// `--async` returns a list with one operation per instance
fn first_resource(value: Value) -> GatewayResult<Value> {
    match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(GatewayError::InvalidResponse("empty operation list".to_string()));
            }
            Ok(items.swap_remove(0))
        }
        other => Ok(other),
    }
}

/// Last path segment of a resource URL
fn last_segment(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

fn parse_operation(value: Value, zone: &str) -> GatewayResult<OperationRecord> {
    let raw: RawOperation = serde_json::from_value(value)
        .map_err(|e| GatewayError::InvalidResponse(format!("malformed operation: {}", e)))?;

    let kind: OperationKind = raw
        .operation_type
        .parse()
        .map_err(|e| GatewayError::InvalidResponse(format!("{}", e)))?;
    let status: OperationStatus = raw
        .status
        .parse()
        .map_err(|e| GatewayError::InvalidResponse(format!("{}", e)))?;

    let error = raw.error.and_then(|err| {
        let parts: Vec<String> = err
            .errors
            .into_iter()
            .map(|item| match (item.code, item.message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (Some(code), None) => code,
                (None, Some(message)) => message,
                (None, None) => "unknown error".to_string(),
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    });

    Ok(OperationRecord {
        name: raw.name,
        kind,
        status,
        zone: zone.to_string(),
        target: raw.target_link.as_deref().map(|l| last_segment(l).to_string()),
        error,
        timestamps: OperationTimestamps {
            insert_time: raw.insert_time,
            start_time: raw.start_time,
            end_time: raw.end_time,
        },
    })
}

/// Keep start/stop operations with a matching status; other types are
/// not ours to track
fn parse_operation_list(
    value: Value,
    zone: &str,
    statuses: &[OperationStatus],
) -> GatewayResult<Vec<OperationRecord>> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(GatewayError::InvalidResponse(format!(
                "expected operation list, got {}",
                other
            )))
        }
    };

    let mut operations = Vec::new();
    for item in items {
        let supported = item
            .get("operationType")
            .and_then(Value::as_str)
            .map(|t| t.parse::<OperationKind>().is_ok())
            .unwrap_or(false);
        if !supported {
            continue;
        }
        let operation = parse_operation(item, zone)?;
        if statuses.is_empty() || statuses.contains(&operation.status) {
            operations.push(operation);
        }
    }
    Ok(operations)
}

fn parse_instance_list(value: Value) -> GatewayResult<BTreeMap<String, Vec<InstanceRecord>>> {
    let raw: Vec<RawInstance> = serde_json::from_value(value)
        .map_err(|e| GatewayError::InvalidResponse(format!("malformed instance list: {}", e)))?;

    let mut by_zone: BTreeMap<String, Vec<InstanceRecord>> = BTreeMap::new();
    for instance in raw {
        let status: InstanceStatus = instance
            .status
            .parse()
            .map_err(|e| GatewayError::InvalidResponse(format!("{}", e)))?;
        let zone = last_segment(&instance.zone).to_string();
        let record = InstanceRecord {
            name: instance.name,
            status,
            zone: zone.clone(),
            machine_type: last_segment(&instance.machine_type).to_string(),
            timestamps: InstanceTimestamps {
                creation: instance.creation_timestamp,
                deletion: instance.deletion_timestamp,
                last_start: instance.last_start_timestamp,
                last_stop: instance.last_stop_timestamp,
            },
        };
        by_zone.entry(zone).or_default().push(record);
    }
    Ok(by_zone)
}

/// Map gcloud's stderr onto a gateway error
fn classify_stderr(stderr: &str) -> GatewayError {
    let lower = stderr.to_lowercase();
    let summary = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("gcloud failed")
        .to_string();

    if ["permission", "unauthenticated", "forbidden", "reauthentication", "credentials"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        GatewayError::Unauthorized(summary)
    } else if lower.contains("was not found") || lower.contains("notfound") || lower.contains("not_found") {
        GatewayError::NotFound(summary)
    } else if lower.contains("ratelimitexceeded") || lower.contains("rate limit") {
        GatewayError::RateLimited
    } else if lower.contains("timed out") || lower.contains("deadline exceeded") {
        GatewayError::Timeout
    } else if lower.contains("invalid value") || lower.contains("invalid argument") {
        GatewayError::InvalidRequest(summary)
    } else {
        GatewayError::Unavailable(summary)
    }
}
