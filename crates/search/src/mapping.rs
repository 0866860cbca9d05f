//! 索引设置与字段映射

use serde_json::{json, Map, Value};
use tracing::warn;

use mediaflow_domain::EntityType;

use crate::projection::{field_name, primary, projections};
use crate::schema_registry::resolve;

/// 所有实体共用的结构字段
pub const STRUCTURAL_FIELDS: &[&str] = &[
    "_media_relation",
    "_exact_name",
    "_md5",
    "_meta",
    "_dtype",
    "tator_user_sections",
    "_exact_treeleaf_name",
    "tator_treeleaf_name",
    "_treeleaf_depth",
    "_treeleaf_path",
    "_annotation_version",
    "_modified",
    "_modified_datetime",
    "_modified_by",
    "_postgres_id",
    "_download_size",
    "_total_size",
    "_duration",
    "_gid",
    "_uid",
    "filename",
    "_user",
    "_email",
    "_frame",
    "_x",
    "_y",
    "_width",
    "_height",
    "_u",
    "_v",
    "_thumbnail_image",
];

/// 建索引请求体：单分片、一个副本、小写归一化器，以及父子关联字段
pub fn index_body() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 1,
            "analysis": {
                "normalizer": {
                    "lower_normalizer": {
                        "type": "custom",
                        "char_filter": [],
                        "filter": ["lowercase", "asciifolding"],
                    },
                },
            },
        },
        "mappings": {
            "properties": {
                "_media_relation": {
                    "type": "join",
                    "relations": {"media": "annotation"},
                },
                "_exact_name": {"type": "keyword", "normalizer": "lower_normalizer"},
                "_md5": {"type": "keyword"},
                "_meta": {"type": "integer"},
                "_dtype": {"type": "keyword"},
                "tator_user_sections": {"type": "keyword"},
            }
        },
    })
}

/// 在已有索引上补充的结构字段映射
pub fn structural_properties() -> Value {
    json!({
        "_exact_treeleaf_name": {"type": "keyword"},
        "tator_treeleaf_name": {"type": "text"},
        "_treeleaf_depth": {"type": "integer"},
        "_treeleaf_path": {"type": "text"},
        "_annotation_version": {"type": "integer"},
        "_modified": {"type": "boolean"},
        "_modified_datetime": {"type": "date"},
        "_modified_by": {"type": "keyword"},
        "_postgres_id": {"type": "long"},
        "_download_size": {"type": "long"},
        "_total_size": {"type": "long"},
        "_duration": {"type": "float"},
        "_gid": {"type": "keyword"},
        "_uid": {"type": "keyword"},
        "filename": {"type": "keyword", "normalizer": "lower_normalizer"},
    })
}

/// 实体类型的属性映射
///
/// 每个标识映射其数据类型的全部投影；当前名称和旧别名都作为 `alias`
/// 字段指向主投影。与结构字段同名的别名会被跳过。
pub fn attribute_properties(entity_type: &EntityType) -> Value {
    let mut properties = Map::new();

    for (name, identifier) in &entity_type.attribute_ids {
        let Some(attribute) = entity_type.attribute(name) else {
            continue;
        };
        for storage in projections(attribute.dtype) {
            properties.insert(field_name(identifier, *storage), storage.mapping());
        }
    }

    let aliases = entity_type
        .attribute_ids
        .keys()
        .chain(entity_type.retired_aliases.keys());
    for alias in aliases {
        if STRUCTURAL_FIELDS.contains(&alias.as_str()) {
            warn!(
                "实体类型 {} 的属性名 {} 与结构字段冲突，跳过别名映射",
                entity_type.name, alias
            );
            continue;
        }
        if let Some((identifier, dtype)) = resolve(entity_type, alias) {
            properties.insert(
                alias.clone(),
                json!({"type": "alias", "path": field_name(&identifier, primary(dtype))}),
            );
        }
    }

    Value::Object(properties)
}
