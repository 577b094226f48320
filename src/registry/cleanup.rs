//! Artifact retention
//!
//! Keeps the newest `retention_count` artifacts per region plus every
//! artifact the registry marks active. Everything else in the artifact
//! directory is moved to the archive directory.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::Registry;
use crate::config::RegistryConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::artifacts::parse_artifact_file_name;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub kept: usize,
    pub archived: Vec<String>,
    pub failed: Vec<String>,
}

struct Artifact {
    name: String,
    path: PathBuf,
    region_id: Option<String>,
    trained_at: Option<DateTime<Utc>>,
}

pub fn cleanup_artifacts(config: &RegistryConfig) -> PipelineResult<CleanupReport> {
    let active = active_references(&config.registry_path())?;
    let artifacts = scan(&config.artifacts_dir())?;

    let mut report = CleanupReport {
        scanned: artifacts.len(),
        ..Default::default()
    };

    let (known, unknown): (Vec<_>, Vec<_>) = artifacts.into_iter().partition(|a| a.region_id.is_some());

    let mut to_move = Vec::new();
    for (region_id, group) in &known
        .into_iter()
        .sorted_by(|a, b| (&a.region_id, b.trained_at, &b.name).cmp(&(&b.region_id, a.trained_at, &a.name)))
        .chunk_by(|a| a.region_id.clone())
    {
        for (rank, artifact) in group.enumerate() {
            if rank < config.retention_count || active.contains(&artifact.name) {
                report.kept += 1;
            } else {
                info!(region_id = ?region_id, artifact = %artifact.name, "Artifact outside retention window");
                to_move.push(artifact);
            }
        }
    }
    for artifact in unknown {
        if active.contains(&artifact.name) {
            report.kept += 1;
        } else {
            warn!(artifact = %artifact.name, "Unrecognised artifact name");
            to_move.push(artifact);
        }
    }

    if to_move.is_empty() {
        info!("No artifacts to clean up");
        return Ok(report);
    }

    let archive = config.archive_dir();
    std::fs::create_dir_all(&archive)?;
    for artifact in to_move {
        match std::fs::rename(&artifact.path, archive.join(&artifact.name)) {
            Ok(()) => report.archived.push(artifact.name),
            Err(e) => {
                error!(artifact = %artifact.name, error = %e, "Failed to archive artifact");
                report.failed.push(artifact.name);
            }
        }
    }

    info!(
        scanned = report.scanned,
        kept = report.kept,
        archived = report.archived.len(),
        failed = report.failed.len(),
        "Artifact cleanup finished"
    );
    Ok(report)
}

/// A missing registry protects nothing; an unreadable one aborts.
fn active_references(path: &Path) -> PipelineResult<HashSet<String>> {
    match Registry::load(path) {
        Ok(registry) => Ok(registry.active().map(|e| e.artifact_reference.clone()).collect()),
        Err(PipelineError::RegistryMissing(path)) => {
            error!(path = %path.display(), "Registry not found, no artifact is protected");
            Ok(HashSet::new())
        }
        Err(e) => Err(e),
    }
}

fn scan(dir: &Path) -> PipelineResult<Vec<Artifact>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".bin") {
            continue;
        }
        let (region_id, trained_at) = match parse_artifact_file_name(&name) {
            Some((region, at)) => (Some(region), Some(at)),
            None => (None, None),
        };
        artifacts.push(Artifact {
            path: entry.path(),
            name,
            region_id,
            trained_at,
        });
    }
    Ok(artifacts)
}
