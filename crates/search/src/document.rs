//! 实体到搜索文档的投影
//!
//! 构建是纯函数：结构字段按实体类别计算，属性值一律经由稳定标识写入投影字段，
//! 不使用属性名。

use serde_json::{json, Map, Value};

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{
    AttributeValue, Document, DocumentOp, Dtype, Entity, EntityBase, EntityType, Leaf,
    Localization, Media, MediaRef, Shape, State, AuditFields, SECTION_ATTRIBUTE,
};

use crate::projection::{field_name, primary, project_value};
use crate::query::duplicate_id;
use crate::schema_registry::resolve;

/// 所有文档固定使用的路由值，父子文档必须落在同一分片
pub const ROUTING: &str = "1";

/// 为实体构建一个或多个文档
///
/// 状态按每个不同的关联媒体（以及提取出的图像）各生成一个文档，第 k 个重复文档
/// 的ID为 `base + (k << 448)`。
pub fn build_document(
    entity: &Entity,
    entity_type: &EntityType,
    op: DocumentOp,
) -> MediaflowResult<Vec<Document>> {
    let base = entity.base();
    if base.meta != entity_type.id {
        return Err(MediaflowError::validation(format!(
            "实体 {} 的类型 {} 与给定实体类型 {} 不一致",
            entity.document_id(),
            base.meta,
            entity_type.id
        )));
    }

    let mut source = common_fields(base);
    attribute_fields(base, entity_type, &mut source)?;

    match entity {
        Entity::Media(media) => media_fields(media, &mut source),
        Entity::Localization(localization) => localization_fields(localization, &mut source),
        Entity::State(state) => return state_documents(state, source, op),
        Entity::Leaf(leaf) => leaf_fields(leaf, &mut source),
    }

    Ok(vec![Document {
        id: entity.document_id(),
        routing: ROUTING.to_string(),
        op,
        source,
    }])
}

fn common_fields(base: &EntityBase) -> Map<String, Value> {
    let mut source = Map::new();
    source.insert("_meta".to_string(), json!(base.meta));
    source.insert("_dtype".to_string(), json!(base.kind.as_str()));
    source.insert("_postgres_id".to_string(), json!(base.id));
    source
}

fn attribute_fields(
    base: &EntityBase,
    entity_type: &EntityType,
    source: &mut Map<String, Value>,
) -> MediaflowResult<()> {
    for (name, value) in &base.attributes {
        if name == SECTION_ATTRIBUTE {
            continue;
        }
        let (identifier, _) = resolve(entity_type, name).ok_or_else(|| {
            MediaflowError::validation(format!(
                "属性 {name} 在实体类型 {} 中没有存储标识",
                entity_type.name
            ))
        })?;
        for (storage, projected) in project_value(value) {
            source.insert(field_name(&identifier, storage), projected);
        }
    }
    Ok(())
}

fn media_fields(media: &Media, source: &mut Map<String, Value>) {
    let (total_size, download_size) = media.file_sizes();
    source.insert("_media_relation".to_string(), json!("media"));
    source.insert("filename".to_string(), json!(media.name));
    source.insert("_exact_name".to_string(), json!(media.name));
    source.insert("_md5".to_string(), json!(media.md5));
    source.insert("_gid".to_string(), json!(media.gid));
    source.insert("_uid".to_string(), json!(media.uid));
    source.insert("_total_size".to_string(), json!(total_size));
    if let Some(download_size) = download_size {
        source.insert("_download_size".to_string(), json!(download_size));
    }
    source.insert("_duration".to_string(), json!(media.duration()));
    if let Some(section) = &media.section {
        source.insert(SECTION_ATTRIBUTE.to_string(), json!(section));
    }
}

fn audit_fields(audit: &AuditFields, source: &mut Map<String, Value>) {
    source.insert("_annotation_version".to_string(), json!(audit.version));
    source.insert("_modified".to_string(), json!(audit.modified));
    source.insert(
        "_modified_datetime".to_string(),
        json!(audit.modified_datetime.to_rfc3339()),
    );
    source.insert("_modified_by".to_string(), json!(audit.modified_by));
}

fn child_of(parent: &MediaRef) -> Value {
    json!({"name": "annotation", "parent": parent.document_id()})
}

fn localization_fields(localization: &Localization, source: &mut Map<String, Value>) {
    source.insert("_media_relation".to_string(), child_of(&localization.media));
    audit_fields(&localization.audit, source);
    source.insert("_user".to_string(), json!(localization.user));
    source.insert("_email".to_string(), json!(localization.email));
    source.insert("_frame".to_string(), json!(localization.frame));
    source.insert("_x".to_string(), json!(localization.x));
    source.insert("_y".to_string(), json!(localization.y));
    source.insert(
        "_thumbnail_image".to_string(),
        json!(localization.thumbnail_image),
    );
    match localization.shape {
        Shape::Box { width, height } => {
            source.insert("_width".to_string(), json!(width));
            source.insert("_height".to_string(), json!(height));
        }
        Shape::Line { u, v } => {
            source.insert("_u".to_string(), json!(u));
            source.insert("_v".to_string(), json!(v));
        }
        Shape::Dot => {}
    }
}

fn state_documents(
    state: &State,
    mut source: Map<String, Value>,
    op: DocumentOp,
) -> MediaflowResult<Vec<Document>> {
    audit_fields(&state.audit, &mut source);

    let mut parents = state.association.distinct_media();
    if let Some(extracted) = state.association.extracted {
        if !parents.contains(&extracted) {
            parents.push(extracted);
        }
    }

    let base = &state.base;
    if parents.is_empty() {
        return Ok(vec![Document {
            id: format!("{}_{}", base.kind, base.id),
            routing: ROUTING.to_string(),
            op,
            source,
        }]);
    }

    parents
        .iter()
        .enumerate()
        .map(|(index, parent)| {
            let numeric_id = duplicate_id(base.id, index)?;
            let mut source = source.clone();
            source.insert("_media_relation".to_string(), child_of(parent));
            Ok(Document {
                id: format!("{}_{}", base.kind, numeric_id),
                routing: ROUTING.to_string(),
                op,
                source,
            })
        })
        .collect()
}

fn leaf_fields(leaf: &Leaf, source: &mut Map<String, Value>) {
    source.insert("_exact_treeleaf_name".to_string(), json!(leaf.name));
    source.insert("tator_treeleaf_name".to_string(), json!(leaf.name));
    source.insert("_treeleaf_depth".to_string(), json!(leaf.depth()));
    source.insert("_treeleaf_path".to_string(), json!(leaf.path));
}

/// 按当前名称或旧别名从文档中读出属性值
///
/// 读取当前数据类型的主投影；文档中没有该字段时返回 `None`。
pub fn read_attribute(
    source: &Map<String, Value>,
    entity_type: &EntityType,
    name: &str,
) -> MediaflowResult<Option<AttributeValue>> {
    let (identifier, dtype) = resolve(entity_type, name)
        .ok_or_else(|| MediaflowError::not_found("属性", name))?;
    let Some(raw) = source.get(&field_name(&identifier, primary(dtype))) else {
        return Ok(None);
    };
    let Some(attribute) = entity_type
        .attribute_types
        .iter()
        .find(|a| entity_type.identifier(&a.name) == Some(identifier))
    else {
        return Ok(None);
    };

    let raw = match (dtype, raw) {
        // 主投影是 "lat,lon"，转换接受经度在前的数组
        (Dtype::Geopos, Value::String(s)) => {
            let (lat, lon) = s
                .split_once(',')
                .ok_or_else(|| MediaflowError::document_store(format!("坐标字段格式错误: {s}")))?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| MediaflowError::document_store(format!("坐标字段格式错误: {s}")))
            };
            json!([parse(lon)?, parse(lat)?])
        }
        _ => raw.clone(),
    };

    AttributeValue::convert(attribute, &raw).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mediaflow_domain::{
        Association, AssociationKind, AttributeType, EntityKind, GeoPoint,
    };
    use uuid::Uuid;

    fn box_type() -> EntityType {
        let mut entity_type = EntityType::new(3, 1, "Fish", EntityKind::Box);
        entity_type
            .attribute_types
            .push(AttributeType::new("species", Dtype::String));
        entity_type
            .attribute_types
            .push(AttributeType::new("where", Dtype::Geopos));
        entity_type
            .attribute_ids
            .insert("species".to_string(), Uuid::new_v4());
        entity_type
            .attribute_ids
            .insert("where".to_string(), Uuid::new_v4());
        entity_type
    }

    fn localization() -> Localization {
        let mut base = EntityBase::new(40, 1, 3, EntityKind::Box);
        base.attributes.insert(
            "species".to_string(),
            AttributeValue::String("cod".to_string()),
        );
        base.attributes.insert(
            "where".to_string(),
            AttributeValue::Geopos(GeoPoint { lat: 10.0, lon: 20.0 }),
        );
        Localization {
            base,
            media: MediaRef::new(7, EntityKind::Video),
            audit: AuditFields {
                version: Some(2),
                modified: Some(true),
                modified_datetime: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
                modified_by: Some("alice".to_string()),
            },
            user: 9,
            email: "alice@example.com".to_string(),
            frame: 12,
            x: 0.1,
            y: 0.2,
            thumbnail_image: None,
            shape: Shape::Box {
                width: 0.3,
                height: 0.4,
            },
        }
    }

    #[test]
    fn test_localization_document() {
        let entity_type = box_type();
        let entity = Entity::Localization(localization());
        let docs = build_document(&entity, &entity_type, DocumentOp::Index).unwrap();
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert_eq!(doc.id, "box_40");
        assert_eq!(doc.routing, "1");
        assert_eq!(doc.source["_media_relation"]["parent"], "video_7");
        assert_eq!(doc.source["_width"], json!(0.3));
        assert!(doc.source.get("_u").is_none());
        assert!(doc.source.get("species").is_none());

        let geo = field_name(&entity_type.identifier("where").unwrap(), crate::projection::StorageType::GeoPoint);
        assert_eq!(doc.source[&geo], json!("10,20"));
    }

    #[test]
    fn test_read_attribute_round_trip() {
        let entity_type = box_type();
        let entity = Entity::Localization(localization());
        let docs = build_document(&entity, &entity_type, DocumentOp::Index).unwrap();

        for (name, stored) in &entity.base().attributes {
            let read = read_attribute(&docs[0].source, &entity_type, name).unwrap();
            assert_eq!(read.as_ref(), Some(stored), "{name}");
        }
    }

    #[test]
    fn test_unmapped_attribute_is_rejected() {
        let mut entity_type = box_type();
        entity_type.attribute_ids.remove("species");
        let entity = Entity::Localization(localization());
        let err = build_document(&entity, &entity_type, DocumentOp::Index).unwrap_err();
        assert!(matches!(err, MediaflowError::Validation(_)));
    }

    #[test]
    fn test_state_without_media_has_single_document() {
        let entity_type = EntityType::new(5, 1, "Activity", EntityKind::State);
        let state = State {
            base: EntityBase::new(11, 1, 5, EntityKind::State),
            association: Association {
                kind: AssociationKind::Frame,
                media: vec![],
                localizations: vec![],
                frame: Some(3),
                extracted: None,
            },
            audit: AuditFields::default(),
        };
        let docs = build_document(&Entity::State(state), &entity_type, DocumentOp::Create).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "state_11");
        assert_eq!(docs[0].op, DocumentOp::Create);
        assert!(docs[0].source.get("_media_relation").is_none());
    }

    #[test]
    fn test_meta_mismatch_is_rejected() {
        let entity_type = EntityType::new(99, 1, "Other", EntityKind::Box);
        let entity = Entity::Localization(localization());
        assert!(build_document(&entity, &entity_type, DocumentOp::Index).is_err());
    }
}
