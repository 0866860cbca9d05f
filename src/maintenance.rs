//! 运维批处理操作，均可重复执行

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use walkdir::WalkDir;

use mediaflow_core::MediaflowResult;
use mediaflow_domain::ProjectRepository;

const SECONDS_PER_DAY: u64 = 86_400;

/// 单个上传根目录的清理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub root: String,
    pub removed: usize,
}

/// 删除超过 `max_age_days` 天且没有被任何资源引用的上传文件
pub async fn purge_uploads(
    projects: &dyn ProjectRepository,
    roots: &[String],
    max_age_days: u64,
) -> MediaflowResult<Vec<PurgeReport>> {
    purge_uploads_at(projects, roots, max_age_days, SystemTime::now()).await
}

pub async fn purge_uploads_at(
    projects: &dyn ProjectRepository,
    roots: &[String],
    max_age_days: u64,
    now: SystemTime,
) -> MediaflowResult<Vec<PurgeReport>> {
    let referenced = projects.referenced_paths().await?;
    let cutoff = now
        .checked_sub(Duration::from_secs(SECONDS_PER_DAY * max_age_days))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut reports = Vec::with_capacity(roots.len());
    for root in roots {
        let mut removed = 0;
        for path in stale_files(root, cutoff, &referenced) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("删除 {} 失败: {}", path.display(), e),
            }
        }
        info!("从 {} 删除了 {} 个超过 {} 天的文件", root, removed, max_age_days);
        reports.push(PurgeReport {
            root: root.clone(),
            removed,
        });
    }
    Ok(reports)
}

fn stale_files(root: &str, cutoff: SystemTime, referenced: &HashSet<String>) -> Vec<PathBuf> {
    let mut stale = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("遍历 {} 出错: {}", root, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => modified,
            _ => continue,
        };
        if modified >= cutoff {
            continue;
        }
        if referenced.contains(entry.path().to_string_lossy().as_ref()) {
            continue;
        }
        stale.push(entry.into_path());
    }
    stale
}

/// 重新统计每个项目的文件数与总大小
///
/// 文件数变化或 `force` 时才写回，返回写回的项目数。
pub async fn update_project_totals(
    projects: &dyn ProjectRepository,
    force: bool,
) -> MediaflowResult<usize> {
    let mut updated = 0;
    for project in projects.find_all().await? {
        let totals = projects.compute_totals(project.id).await?;
        if totals.num_files == project.num_files && !force {
            continue;
        }
        info!(
            "更新项目 {}: 文件数 {}，大小 {}",
            project.name, totals.num_files, totals.size
        );
        projects.update_totals(project.id, totals).await?;
        updated += 1;
    }
    Ok(updated)
}
