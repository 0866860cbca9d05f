//! 文档ID编码与查询结果去重
//!
//! 同一实体的重复文档ID为 `base + (k << 448)`，查询结果按低 448 位还原实体ID。

use std::collections::HashSet;
use std::hash::Hash;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

use mediaflow_core::{MediaflowError, MediaflowResult};

pub const ID_BITS: usize = 448;

/// 每个实体最多的重复文档数（不含主文档）
pub const MAX_DUPLICATES: usize = 255;

fn id_mask() -> BigUint {
    (BigUint::one() << ID_BITS) - BigUint::one()
}

/// 第 `index` 个文档的数值ID，`index` 为0时即实体ID本身
pub fn duplicate_id(base: i64, index: usize) -> MediaflowResult<BigUint> {
    let base = u64::try_from(base)
        .map_err(|_| MediaflowError::validation(format!("实体ID {base} 不能为负数")))?;
    if index > MAX_DUPLICATES {
        return Err(MediaflowError::validation(format!(
            "实体 {base} 的重复文档数超过上限 {MAX_DUPLICATES}"
        )));
    }
    Ok(BigUint::from(base) + (BigUint::from(index) << ID_BITS))
}

/// 拆分 `{dtype}_{n}` 形式的文档ID
pub fn parse_document_id(id: &str) -> MediaflowResult<(&str, BigUint)> {
    let (dtype, number) = id
        .split_once('_')
        .ok_or_else(|| MediaflowError::document_store(format!("无法解析文档ID: {id}")))?;
    let number = number
        .parse::<BigUint>()
        .map_err(|_| MediaflowError::document_store(format!("无法解析文档ID: {id}")))?;
    Ok((dtype, number))
}

/// 文档ID对应的实体ID
pub fn base_id(id: &str) -> MediaflowResult<i64> {
    let (_, number) = parse_document_id(id)?;
    (number & id_mask())
        .to_i64()
        .ok_or_else(|| MediaflowError::document_store(format!("文档ID {id} 超出实体ID范围")))
}

/// 去重并保持首次出现的顺序
pub fn drop_dupes<T, I>(ids: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// 跨分页累积实体ID，全局去重
#[derive(Debug, Default)]
pub struct IdCollector {
    seen: HashSet<i64>,
    ids: Vec<i64>,
}

impl IdCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入一页文档ID，返回新增的实体数
    pub fn extend(&mut self, document_ids: &[String]) -> MediaflowResult<usize> {
        let before = self.ids.len();
        for document_id in document_ids {
            let id = base_id(document_id)?;
            if self.seen.insert(id) {
                self.ids.push(id);
            }
        }
        Ok(self.ids.len() - before)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_ids(self) -> Vec<i64> {
        self.ids
    }
}
