//! Health probes for the upstream services.
//!
//! `GET /api/health` and `docchat health` report on the Ollama runtime and
//! the Chroma vector database. Both probes run concurrently and never fail;
//! an unreachable service is reported in the body.

use axum::http::StatusCode;
use serde::Serialize;

use crate::chroma::chroma_health;
use crate::config::Config;
use crate::ollama::ollama_health;

/// Probe status for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Result of probing one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    /// Installed model names (Ollama only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceHealth {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            models: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            models: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// JSON body of `GET /api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub ollama: ServiceHealth,
    pub chromadb: ServiceHealth,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl HealthReport {
    pub fn from_probes(ollama: ServiceHealth, chromadb: ServiceHealth) -> Self {
        let healthy = ollama.is_ok() && chromadb.is_ok();
        Self {
            status: if healthy {
                HealthStatus::Ok
            } else {
                HealthStatus::Error
            },
            ollama,
            chromadb,
            status_code: if healthy {
                StatusCode::OK.as_u16()
            } else {
                StatusCode::SERVICE_UNAVAILABLE.as_u16()
            },
        }
    }
}

/// Probe both upstream services concurrently.
pub async fn check_health(config: &Config) -> HealthReport {
    let (ollama, chromadb) = tokio::join!(
        ollama_health(&config.ollama),
        chroma_health(&config.chroma)
    );
    HealthReport::from_probes(ollama, chromadb)
}

/// `docchat health`: print the health report as JSON.
pub async fn run_health(config: &Config) -> anyhow::Result<()> {
    let report = check_health(config).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.status != HealthStatus::Ok {
        anyhow::bail!("one or more services are unhealthy");
    }
    Ok(())
}
