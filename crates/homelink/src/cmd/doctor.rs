use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub async fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        loopback_bind_check().await,
        name_resolution_check().await,
        protocol_defaults_check(),
    ];

    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput { checks, overall };
    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

async fn loopback_bind_check() -> CheckResult {
    match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            let detail = match listener.local_addr() {
                Ok(addr) => format!("bound ephemeral {addr}"),
                Err(_) => "bound ephemeral loopback port".to_string(),
            };
            CheckResult {
                name: "loopback_bind".to_string(),
                status: CheckStatus::Pass,
                detail,
            }
        }
        Err(err) => CheckResult {
            name: "loopback_bind".to_string(),
            status: CheckStatus::Fail,
            detail: format!("loopback bind failed: {err}"),
        },
    }
}

async fn name_resolution_check() -> CheckResult {
    match tokio::net::lookup_host("localhost:0").await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => CheckResult {
                name: "name_resolution".to_string(),
                status: CheckStatus::Pass,
                detail: format!("localhost resolves to {}", addr.ip()),
            },
            None => CheckResult {
                name: "name_resolution".to_string(),
                status: CheckStatus::Fail,
                detail: "localhost resolved to no addresses".to_string(),
            },
        },
        Err(err) => CheckResult {
            name: "name_resolution".to_string(),
            status: CheckStatus::Fail,
            detail: format!("localhost resolution failed: {err}"),
        },
    }
}

fn protocol_defaults_check() -> CheckResult {
    CheckResult {
        name: "protocol_defaults".to_string(),
        status: CheckStatus::Info,
        detail: format!(
            "keep-alive {:?}, preamble 1 byte, max frame {} bytes",
            homelink_transport::config::DEFAULT_KEEP_ALIVE,
            homelink_frame::DEFAULT_MAX_FRAME_LEN
        ),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("homelink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<20} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}
