use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::{AttributeType, AttributeValue, Dtype, EntityType, EntityTypeRepository};

const DEFAULT_MAX_RETRIES: usize = 16;

/// 允许的类型变更：相同类型（仅改样式），或放宽到已维护投影的类型
pub fn is_mutation_allowed(from: Dtype, to: Dtype) -> bool {
    use Dtype::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Bool | Int | Float, Enum | String)
            | (Enum, String)
            | (String, Enum)
            | (Datetime | Geopos, String | Enum)
    )
}

/// 属性模式注册表
///
/// 维护每个实体类型的属性声明及其稳定标识。所有修改都基于实体类型版本号做
/// 乐观并发控制，冲突时重新读取并重试。
pub struct SchemaRegistry {
    repository: Arc<dyn EntityTypeRepository>,
    max_retries: usize,
}

impl SchemaRegistry {
    pub fn new(repository: Arc<dyn EntityTypeRepository>) -> Self {
        Self {
            repository,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub async fn entity_type(&self, id: i64) -> MediaflowResult<EntityType> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| MediaflowError::not_found("实体类型", id.to_string()))
    }

    /// 读取-修改-比较写入循环
    ///
    /// `mutate` 返回 `Ok(None)` 表示无需写入，直接返回当前实体类型。
    async fn update_with<F>(&self, id: i64, mut mutate: F) -> MediaflowResult<EntityType>
    where
        F: FnMut(&mut EntityType) -> MediaflowResult<Option<()>> + Send,
    {
        for attempt in 1..=self.max_retries {
            let mut entity_type = self.entity_type(id).await?;
            let expected_version = entity_type.version;

            if mutate(&mut entity_type)?.is_none() {
                return Ok(entity_type);
            }

            if self
                .repository
                .compare_and_swap(&entity_type, expected_version)
                .await?
            {
                entity_type.version = expected_version + 1;
                return Ok(entity_type);
            }

            debug!(
                "实体类型 {} 版本 {} 写入冲突，第 {} 次重试",
                id, expected_version, attempt
            );
        }

        warn!("实体类型 {} 并发修改重试次数耗尽", id);
        Err(MediaflowError::Conflict(format!(
            "实体类型 {id} 并发修改冲突，已重试 {} 次",
            self.max_retries
        )))
    }

    /// 返回属性已有的稳定标识，不存在时生成并持久化
    ///
    /// 并发首次使用同一属性名时只会有一个标识写入成功，其余调用方在重试时读到它。
    pub async fn register_or_get_identifier(
        &self,
        entity_type_id: i64,
        attribute_name: &str,
    ) -> MediaflowResult<Uuid> {
        let entity_type = self
            .update_with(entity_type_id, |entity_type| {
                if entity_type.attribute_ids.contains_key(attribute_name) {
                    return Ok(None);
                }
                if entity_type.attribute(attribute_name).is_none() {
                    return Err(MediaflowError::not_found("属性", attribute_name));
                }
                entity_type
                    .attribute_ids
                    .insert(attribute_name.to_string(), Uuid::new_v4());
                Ok(Some(()))
            })
            .await?;

        entity_type
            .identifier(attribute_name)
            .ok_or_else(|| MediaflowError::internal(format!("属性 {attribute_name} 标识丢失")))
    }

    /// 确保实体类型的全部属性都已有标识
    pub async fn ensure_identifiers(&self, entity_type_id: i64) -> MediaflowResult<EntityType> {
        self.update_with(entity_type_id, |entity_type| {
            let missing: Vec<String> = entity_type
                .attribute_types
                .iter()
                .filter(|a| !entity_type.attribute_ids.contains_key(&a.name))
                .map(|a| a.name.clone())
                .collect();
            if missing.is_empty() {
                return Ok(None);
            }
            for name in missing {
                entity_type.attribute_ids.insert(name, Uuid::new_v4());
            }
            Ok(Some(()))
        })
        .await
    }

    /// 新增属性声明并生成标识
    pub async fn add_attribute(
        &self,
        entity_type_id: i64,
        attribute: AttributeType,
    ) -> MediaflowResult<EntityType> {
        attribute.validate()?;

        let updated = self
            .update_with(entity_type_id, |entity_type| {
                if entity_type.attribute(&attribute.name).is_some() {
                    return Err(MediaflowError::validation(format!(
                        "属性 {} 已存在于实体类型 {}",
                        attribute.name, entity_type.name
                    )));
                }
                reject_retired_alias(entity_type, &attribute.name, None)?;
                entity_type.attribute_types.push(attribute.clone());
                entity_type
                    .attribute_ids
                    .insert(attribute.name.clone(), Uuid::new_v4());
                Ok(Some(()))
            })
            .await?;

        info!(
            "实体类型 {} 新增属性 {} ({})",
            entity_type_id, attribute.name, attribute.dtype
        );
        Ok(updated)
    }

    /// 重命名属性，保留稳定标识，旧名称作为别名继续可查询
    pub async fn rename(
        &self,
        entity_type_id: i64,
        old_name: &str,
        new_name: &str,
    ) -> MediaflowResult<EntityType> {
        if new_name.trim().is_empty() {
            return Err(MediaflowError::validation("属性名不能为空"));
        }

        let updated = self
            .update_with(entity_type_id, |entity_type| {
                if entity_type.attribute(old_name).is_none() {
                    return Err(MediaflowError::not_found("属性", old_name));
                }
                if old_name == new_name {
                    return Ok(None);
                }
                if entity_type.attribute(new_name).is_some() {
                    return Err(MediaflowError::validation(format!(
                        "属性 {new_name} 已存在于实体类型 {}",
                        entity_type.name
                    )));
                }

                let current = entity_type.identifier(old_name);
                reject_retired_alias(entity_type, new_name, current)?;

                let identifier = entity_type
                    .attribute_ids
                    .remove(old_name)
                    .unwrap_or_else(Uuid::new_v4);
                if let Some(attribute) = entity_type.attribute_mut(old_name) {
                    attribute.name = new_name.to_string();
                }
                entity_type
                    .attribute_ids
                    .insert(new_name.to_string(), identifier);
                entity_type.retired_aliases.remove(new_name);
                entity_type
                    .retired_aliases
                    .insert(old_name.to_string(), identifier);
                Ok(Some(()))
            })
            .await?;

        info!(
            "实体类型 {} 属性 {} 重命名为 {}",
            entity_type_id, old_name, new_name
        );
        Ok(updated)
    }

    /// 变更属性类型，只允许放宽
    pub async fn mutate_type(
        &self,
        entity_type_id: i64,
        name: &str,
        new_dtype: Dtype,
        new_style: Option<&str>,
    ) -> MediaflowResult<EntityType> {
        self.mutate_type_with_choices(entity_type_id, name, new_dtype, new_style, None)
            .await
    }

    /// 变更属性类型，目标为枚举时可同时给出可选值
    pub async fn mutate_type_with_choices(
        &self,
        entity_type_id: i64,
        name: &str,
        new_dtype: Dtype,
        new_style: Option<&str>,
        choices: Option<Vec<String>>,
    ) -> MediaflowResult<EntityType> {
        let updated = self
            .update_with(entity_type_id, |entity_type| {
                let attribute = entity_type
                    .attribute_mut(name)
                    .ok_or_else(|| MediaflowError::not_found("属性", name))?;

                let current = attribute.dtype;
                if !is_mutation_allowed(current, new_dtype) {
                    return Err(MediaflowError::invalid_mutation(name, current, new_dtype));
                }

                let mut mutated = attribute.clone();
                mutated.dtype = new_dtype;
                mutated.style = new_style.map(str::to_string);
                if let Some(choices) = &choices {
                    mutated.choices = choices.clone();
                }
                if new_dtype != Dtype::Enum {
                    mutated.choices.clear();
                }
                if !matches!(new_dtype, Dtype::Int | Dtype::Float) {
                    mutated.minimum = None;
                    mutated.maximum = None;
                }
                if let Some(default) = mutated.default.clone() {
                    if AttributeValue::convert(&mutated, &default).is_err() {
                        mutated.default = None;
                    }
                }
                mutated.validate()?;

                *attribute = mutated;
                Ok(Some(()))
            })
            .await?;

        info!(
            "实体类型 {} 属性 {} 类型变更为 {}",
            entity_type_id, name, new_dtype
        );
        Ok(updated)
    }

    /// 删除属性声明并丢弃其标识，已写入的文档不做处理
    pub async fn delete_attribute(
        &self,
        entity_type_id: i64,
        name: &str,
    ) -> MediaflowResult<EntityType> {
        let updated = self
            .update_with(entity_type_id, |entity_type| {
                let position = entity_type
                    .attribute_types
                    .iter()
                    .position(|a| a.name == name)
                    .ok_or_else(|| MediaflowError::not_found("属性", name))?;
                entity_type.attribute_types.remove(position);
                if let Some(identifier) = entity_type.attribute_ids.remove(name) {
                    entity_type.retired_aliases.retain(|_, id| *id != identifier);
                }
                Ok(Some(()))
            })
            .await?;

        info!("实体类型 {} 删除属性 {}", entity_type_id, name);
        Ok(updated)
    }
}

/// 旧别名仍指向已有文档中的字段，只有改回原属性自己的旧名才允许复用
fn reject_retired_alias(
    entity_type: &EntityType,
    name: &str,
    owner: Option<Uuid>,
) -> MediaflowResult<()> {
    match entity_type.retired_aliases.get(name) {
        Some(identifier) if Some(*identifier) != owner => Err(MediaflowError::validation(format!(
            "属性名 {name} 是实体类型 {} 中已重命名属性的旧名称",
            entity_type.name
        ))),
        _ => Ok(()),
    }
}

/// 按当前名称或旧别名解析属性的标识与当前类型
pub fn resolve(entity_type: &EntityType, name: &str) -> Option<(Uuid, Dtype)> {
    if let Some(identifier) = entity_type.identifier(name) {
        return entity_type.attribute(name).map(|a| (identifier, a.dtype));
    }
    let identifier = *entity_type.retired_aliases.get(name)?;
    let current_name = entity_type
        .attribute_ids
        .iter()
        .find(|(_, id)| **id == identifier)
        .map(|(n, _)| n)?;
    entity_type
        .attribute(current_name)
        .map(|a| (identifier, a.dtype))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_table() {
        use Dtype::*;
        assert!(is_mutation_allowed(Int, String));
        assert!(is_mutation_allowed(Bool, Enum));
        assert!(is_mutation_allowed(Enum, String));
        assert!(is_mutation_allowed(String, Enum));
        assert!(is_mutation_allowed(Datetime, String));
        assert!(is_mutation_allowed(Geopos, Enum));
        assert!(is_mutation_allowed(Float, Float));

        assert!(!is_mutation_allowed(String, Int));
        assert!(!is_mutation_allowed(Int, Float));
        assert!(!is_mutation_allowed(Enum, Bool));
        assert!(!is_mutation_allowed(Datetime, Int));
        assert!(!is_mutation_allowed(String, Geopos));
    }

    #[test]
    fn test_every_allowed_mutation_has_projection() {
        for from in Dtype::ALL {
            for to in Dtype::ALL {
                if is_mutation_allowed(from, to) {
                    assert!(
                        crate::projection::is_projection_available(from, to),
                        "{from} -> {to}"
                    );
                }
            }
        }
    }
}
