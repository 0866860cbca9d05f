//! 媒体、标注、状态、树节点实体
//!
//! 各类实体共享 [`EntityBase`]，以封闭枚举 [`Entity`] 表示。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::AttributeValue;
use crate::entity_type::{EntityCategory, EntityKind};

/// 所有实体共有的字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBase {
    pub id: i64,
    /// 项目被删除后为空
    pub project: Option<i64>,
    /// 实体类型ID
    pub meta: i64,
    pub kind: EntityKind,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl EntityBase {
    pub fn new(id: i64, project: i64, meta: i64, kind: EntityKind) -> Self {
        Self {
            id,
            project: Some(project),
            meta,
            kind,
            attributes: BTreeMap::new(),
        }
    }
}

/// 对媒体的引用，用于构造父文档ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: i64,
    pub kind: EntityKind,
}

impl MediaRef {
    pub fn new(id: i64, kind: EntityKind) -> Self {
        Self { id, kind }
    }

    pub fn document_id(&self) -> String {
        format!("{}_{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFileRole {
    Archival,
    Streaming,
    Original,
    File,
    Thumbnail,
    ThumbnailGif,
}

/// 媒体的一个物理文件；文件不存在时 `size` 为空
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFile {
    pub role: MediaFileRole,
    pub path: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub base: EntityBase,
    pub name: String,
    pub md5: String,
    pub gid: Option<String>,
    pub uid: Option<String>,
    pub section: Option<String>,
    pub num_frames: Option<i64>,
    pub fps: Option<f64>,
    #[serde(default)]
    pub files: Vec<MediaFile>,
}

impl Media {
    /// 返回 (总大小, 下载大小)
    ///
    /// 下载大小依次取第一个存在的归档、流媒体、原始、普通文件。
    pub fn file_sizes(&self) -> (u64, Option<u64>) {
        let total = self.files.iter().filter_map(|f| f.size).sum();
        let download = [
            MediaFileRole::Archival,
            MediaFileRole::Streaming,
            MediaFileRole::Original,
            MediaFileRole::File,
        ]
        .iter()
        .find_map(|role| {
            self.files
                .iter()
                .filter(|f| f.role == *role)
                .find_map(|f| f.size)
        });
        (total, download)
    }

    /// 视频时长（秒），非视频或缺少帧信息时为0
    pub fn duration(&self) -> f64 {
        match (self.base.kind, self.num_frames, self.fps) {
            (EntityKind::Video, Some(frames), Some(fps)) if fps > 0.0 => frames as f64 / fps,
            _ => 0.0,
        }
    }
}

/// 标注与状态共有的修改审计字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFields {
    pub version: Option<i64>,
    pub modified: Option<bool>,
    pub modified_datetime: DateTime<Utc>,
    pub modified_by: Option<String>,
}

impl Default for AuditFields {
    fn default() -> Self {
        Self {
            version: None,
            modified: None,
            modified_datetime: Utc::now(),
            modified_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Shape {
    Box { width: f64, height: f64 },
    Line { u: f64, v: f64 },
    Dot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Localization {
    pub base: EntityBase,
    pub media: MediaRef,
    pub audit: AuditFields,
    pub user: i64,
    pub email: String,
    pub frame: i64,
    pub x: f64,
    pub y: f64,
    pub thumbnail_image: Option<i64>,
    pub shape: Shape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationKind {
    Media,
    Localization,
    Frame,
}

/// 状态与媒体、标注或帧的关联，自身不带属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub kind: AssociationKind,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub localizations: Vec<i64>,
    pub frame: Option<i64>,
    /// 从视频中提取出的图像
    pub extracted: Option<MediaRef>,
}

impl Association {
    /// 去重后的关联媒体，保持首次出现的顺序
    pub fn distinct_media(&self) -> Vec<MediaRef> {
        let mut seen = std::collections::HashSet::new();
        self.media
            .iter()
            .filter(|m| seen.insert(**m))
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub base: EntityBase,
    pub association: Association,
    pub audit: AuditFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub base: EntityBase,
    pub name: String,
    pub parent: Option<i64>,
    /// 物化路径，由父链推导
    pub path: String,
}

impl Leaf {
    pub fn depth(&self) -> usize {
        crate::leaf_path::depth(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum Entity {
    Media(Media),
    Localization(Localization),
    State(State),
    Leaf(Leaf),
}

impl Entity {
    pub fn base(&self) -> &EntityBase {
        match self {
            Entity::Media(m) => &m.base,
            Entity::Localization(l) => &l.base,
            Entity::State(s) => &s.base,
            Entity::Leaf(l) => &l.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut EntityBase {
        match self {
            Entity::Media(m) => &mut m.base,
            Entity::Localization(l) => &mut l.base,
            Entity::State(s) => &mut s.base,
            Entity::Leaf(l) => &mut l.base,
        }
    }

    pub fn id(&self) -> i64 {
        self.base().id
    }

    pub fn project(&self) -> Option<i64> {
        self.base().project
    }

    pub fn kind(&self) -> EntityKind {
        self.base().kind
    }

    pub fn category(&self) -> EntityCategory {
        match self {
            Entity::Media(_) => EntityCategory::Media,
            Entity::Localization(_) => EntityCategory::Localization,
            Entity::State(_) => EntityCategory::State,
            Entity::Leaf(_) => EntityCategory::Leaf,
        }
    }

    /// 主文档ID `{dtype}_{id}`
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.kind(), self.id())
    }
}
