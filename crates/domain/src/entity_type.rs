use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use mediaflow_core::{MediaflowError, MediaflowResult};

use crate::attribute::{AttributeType, AttributeValue, SECTION_ATTRIBUTE};

/// 实体类型的具体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Image,
    Video,
    Multi,
    Box,
    Line,
    Dot,
    State,
    Leaf,
}

/// 实体大类，决定文档结构字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCategory {
    Media,
    Localization,
    State,
    Leaf,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Image => "image",
            EntityKind::Video => "video",
            EntityKind::Multi => "multi",
            EntityKind::Box => "box",
            EntityKind::Line => "line",
            EntityKind::Dot => "dot",
            EntityKind::State => "state",
            EntityKind::Leaf => "leaf",
        }
    }

    pub fn category(&self) -> EntityCategory {
        match self {
            EntityKind::Image | EntityKind::Video | EntityKind::Multi => EntityCategory::Media,
            EntityKind::Box | EntityKind::Line | EntityKind::Dot => EntityCategory::Localization,
            EntityKind::State => EntityCategory::State,
            EntityKind::Leaf => EntityCategory::Leaf,
        }
    }
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Media => "media",
            EntityCategory::Localization => "localization",
            EntityCategory::State => "state",
            EntityCategory::Leaf => "leaf",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 实体类型（媒体类型、标注类型、状态类型、树节点类型）
///
/// `attribute_ids` 保存属性名到稳定标识的映射。标识在重命名和类型变更时保持不变，
/// 删除属性后丢弃。`retired_aliases` 记录重命名前的旧名称，旧文档仍可按旧名查询。
/// `version` 用于乐观并发控制，每次持久化修改后递增。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: i64,
    pub project: i64,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub attribute_types: Vec<AttributeType>,
    #[serde(default)]
    pub attribute_ids: BTreeMap<String, Uuid>,
    #[serde(default)]
    pub retired_aliases: BTreeMap<String, Uuid>,
    #[serde(default)]
    pub version: i64,
}

impl EntityType {
    pub fn new(id: i64, project: i64, name: &str, kind: EntityKind) -> Self {
        Self {
            id,
            project,
            name: name.to_string(),
            kind,
            attribute_types: Vec::new(),
            attribute_ids: BTreeMap::new(),
            retired_aliases: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeType> {
        self.attribute_types.iter().find(|a| a.name == name)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeType> {
        self.attribute_types.iter_mut().find(|a| a.name == name)
    }

    pub fn identifier(&self, name: &str) -> Option<Uuid> {
        self.attribute_ids.get(name).copied()
    }

    /// 属性名唯一性检查
    pub fn validate(&self) -> MediaflowResult<()> {
        let mut seen = std::collections::HashSet::new();
        for attribute in &self.attribute_types {
            attribute.validate()?;
            if !seen.insert(attribute.name.as_str()) {
                return Err(MediaflowError::validation(format!(
                    "实体类型 {} 中属性名 {} 重复",
                    self.name, attribute.name
                )));
            }
        }
        Ok(())
    }

    /// 校验并转换原始属性值
    ///
    /// 键必须是已声明的属性名，分组属性除外。
    pub fn validate_attributes(
        &self,
        raw: &serde_json::Map<String, Value>,
    ) -> MediaflowResult<BTreeMap<String, AttributeValue>> {
        let mut converted = BTreeMap::new();
        for (name, value) in raw {
            if name == SECTION_ATTRIBUTE {
                continue;
            }
            let attribute = self.attribute(name).ok_or_else(|| {
                MediaflowError::validation(format!(
                    "属性 {name} 未在实体类型 {} 中声明",
                    self.name
                ))
            })?;
            converted.insert(name.clone(), AttributeValue::convert(attribute, value)?);
        }
        Ok(converted)
    }

    /// 校验已带类型的属性值与声明一致
    pub fn check_values(&self, values: &BTreeMap<String, AttributeValue>) -> MediaflowResult<()> {
        for (name, value) in values {
            let attribute = self.attribute(name).ok_or_else(|| {
                MediaflowError::validation(format!(
                    "属性 {name} 未在实体类型 {} 中声明",
                    self.name
                ))
            })?;
            if attribute.dtype != value.dtype() {
                return Err(MediaflowError::validation(format!(
                    "属性 {name} 声明为 {}，实际取值为 {}",
                    attribute.dtype,
                    value.dtype()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Dtype;
    use serde_json::json;

    fn fish_type() -> EntityType {
        let mut entity_type = EntityType::new(3, 1, "Fish", EntityKind::Box);
        entity_type.attribute_types = vec![
            AttributeType::new("species", Dtype::Enum).with_choices(&["cod", "haddock"]),
            AttributeType::new("length", Dtype::Float),
        ];
        entity_type
    }

    #[test]
    fn test_validate_attributes_rejects_unknown_keys() {
        let entity_type = fish_type();
        let raw = json!({"species": "cod", "weight": 3});
        let err = entity_type
            .validate_attributes(raw.as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, MediaflowError::Validation(_)));
    }

    #[test]
    fn test_validate_attributes_skips_section() {
        let entity_type = fish_type();
        let raw = json!({"species": "cod", "length": "12.5", SECTION_ATTRIBUTE: "Survey A"});
        let values = entity_type
            .validate_attributes(raw.as_object().unwrap())
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["length"], AttributeValue::Float(12.5));
    }

    #[test]
    fn test_check_values_dtype_mismatch() {
        let entity_type = fish_type();
        let mut values = BTreeMap::new();
        values.insert("length".to_string(), AttributeValue::Int(3));
        assert!(entity_type.check_values(&values).is_err());
    }

    #[test]
    fn test_duplicate_attribute_names_rejected() {
        let mut entity_type = fish_type();
        entity_type
            .attribute_types
            .push(AttributeType::new("length", Dtype::Int));
        assert!(entity_type.validate().is_err());
    }

    #[test]
    fn test_kind_category() {
        assert_eq!(EntityKind::Video.category(), EntityCategory::Media);
        assert_eq!(EntityKind::Line.category(), EntityCategory::Localization);
        assert_eq!(EntityKind::Leaf.to_string(), "leaf");
    }
}
