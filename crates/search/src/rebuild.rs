use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{
    BulkReport, Document, DocumentOp, EntityCategory, EntityRepository, EntityTypeRepository,
};

use crate::indexer::DocumentIndexer;

/// 重建索引的分段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildSection {
    Index,
    Mappings,
    Media,
    Localizations,
    States,
    Treeleaves,
}

impl RebuildSection {
    pub const ALL: [RebuildSection; 6] = [
        RebuildSection::Index,
        RebuildSection::Mappings,
        RebuildSection::Media,
        RebuildSection::Localizations,
        RebuildSection::States,
        RebuildSection::Treeleaves,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildSection::Index => "index",
            RebuildSection::Mappings => "mappings",
            RebuildSection::Media => "media",
            RebuildSection::Localizations => "localizations",
            RebuildSection::States => "states",
            RebuildSection::Treeleaves => "treeleaves",
        }
    }

    fn category(&self) -> Option<EntityCategory> {
        match self {
            RebuildSection::Media => Some(EntityCategory::Media),
            RebuildSection::Localizations => Some(EntityCategory::Localization),
            RebuildSection::States => Some(EntityCategory::State),
            RebuildSection::Treeleaves => Some(EntityCategory::Leaf),
            RebuildSection::Index | RebuildSection::Mappings => None,
        }
    }
}

impl fmt::Display for RebuildSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebuildSection {
    type Err = MediaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| MediaflowError::validation(format!("未知的重建分段: {s}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    pub documents: usize,
    /// 构建失败的实体数
    pub skipped: usize,
    pub report: BulkReport,
}

/// 按分段重建项目索引，可重复执行
pub struct IndexRebuilder {
    indexer: Arc<DocumentIndexer>,
    entity_types: Arc<dyn EntityTypeRepository>,
    entities: Arc<dyn EntityRepository>,
}

impl IndexRebuilder {
    pub fn new(
        indexer: Arc<DocumentIndexer>,
        entity_types: Arc<dyn EntityTypeRepository>,
        entities: Arc<dyn EntityRepository>,
    ) -> Self {
        Self {
            indexer,
            entity_types,
            entities,
        }
    }

    pub async fn rebuild(
        &self,
        project: i64,
        section: RebuildSection,
    ) -> MediaflowResult<RebuildSummary> {
        info!("开始重建项目 {} 的索引分段 {}", project, section);

        let summary = match section {
            RebuildSection::Index => {
                self.indexer.create_index(project).await?;
                RebuildSummary::default()
            }
            RebuildSection::Mappings => {
                for entity_type in self.entity_types.find_by_project(project).await? {
                    self.indexer.create_mapping(entity_type.id).await?;
                }
                RebuildSummary::default()
            }
            _ => {
                let Some(category) = section.category() else {
                    return Ok(RebuildSummary::default());
                };
                self.reindex(project, category).await?
            }
        };

        info!(
            "项目 {} 分段 {} 重建完成，文档 {}，失败 {}，跳过实体 {}",
            project,
            section,
            summary.documents,
            summary.report.failures.len(),
            summary.skipped
        );
        Ok(summary)
    }

    async fn reindex(
        &self,
        project: i64,
        category: EntityCategory,
    ) -> MediaflowResult<RebuildSummary> {
        let chunk_size = self.indexer.bulk_chunk_size();
        let mut summary = RebuildSummary::default();
        let mut buffer: Vec<Document> = Vec::with_capacity(chunk_size);

        for entity in self.entities.find_by_project(project, category).await? {
            match self.indexer.build(&entity, DocumentOp::Index).await {
                Ok(documents) => buffer.extend(documents),
                Err(e) => {
                    warn!("实体 {} 构建文档失败: {}", entity.document_id(), e);
                    summary.skipped += 1;
                    continue;
                }
            }
            if buffer.len() >= chunk_size {
                summary.documents += buffer.len();
                summary
                    .report
                    .merge(self.indexer.bulk_index(project, &buffer).await?);
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            summary.documents += buffer.len();
            summary
                .report
                .merge(self.indexer.bulk_index(project, &buffer).await?);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_parse() {
        for section in RebuildSection::ALL {
            assert_eq!(section.as_str().parse::<RebuildSection>().unwrap(), section);
        }
        assert!("everything".parse::<RebuildSection>().is_err());
    }
}
