//! 属性值到底层存储字段类型的投影
//!
//! 每个属性在文档中同时维护其数据类型对应的全部投影字段，字段名为
//! `{标识}_{存储类型}`。放宽类型时只需把别名指向已有的投影，无需回填。

use std::fmt;

use serde_json::{json, Value};
use uuid::Uuid;

use mediaflow_domain::{AttributeValue, Dtype};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Boolean,
    Long,
    Double,
    Text,
    Keyword,
    Date,
    GeoPoint,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Boolean => "boolean",
            StorageType::Long => "long",
            StorageType::Double => "double",
            StorageType::Text => "text",
            StorageType::Keyword => "keyword",
            StorageType::Date => "date",
            StorageType::GeoPoint => "geo_point",
        }
    }

    /// 映射定义
    pub fn mapping(&self) -> Value {
        json!({ "type": self.as_str() })
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 每种数据类型同时维护的投影
pub fn projections(dtype: Dtype) -> &'static [StorageType] {
    use StorageType::*;
    match dtype {
        Dtype::Bool | Dtype::Int | Dtype::Float => &[Boolean, Long, Double, Text, Keyword],
        Dtype::Enum | Dtype::String => &[Text, Keyword],
        Dtype::Datetime => &[Date, Text, Keyword],
        Dtype::Geopos => &[GeoPoint, Text, Keyword],
    }
}

/// 数据类型的主投影，属性别名指向它
pub fn primary(dtype: Dtype) -> StorageType {
    match dtype {
        Dtype::Bool => StorageType::Boolean,
        Dtype::Int => StorageType::Long,
        Dtype::Float => StorageType::Double,
        Dtype::Enum | Dtype::String => StorageType::Keyword,
        Dtype::Datetime => StorageType::Date,
        Dtype::Geopos => StorageType::GeoPoint,
    }
}

pub fn field_name(identifier: &Uuid, storage: StorageType) -> String {
    format!("{}_{}", identifier, storage)
}

/// 计算一个取值在其数据类型全部投影上的值
///
/// 坐标统一写成纬度在前的 `"lat,lon"` 字符串。
pub fn project_value(value: &AttributeValue) -> Vec<(StorageType, Value)> {
    let dtype = value.dtype();
    projections(dtype)
        .iter()
        .map(|storage| (*storage, projected(value, *storage)))
        .collect()
}

fn projected(value: &AttributeValue, storage: StorageType) -> Value {
    let as_text = || match value {
        AttributeValue::Bool(b) => b.to_string(),
        AttributeValue::Int(i) => i.to_string(),
        AttributeValue::Float(f) => f.to_string(),
        AttributeValue::Enum(s) | AttributeValue::String(s) => s.clone(),
        AttributeValue::Datetime(dt) => dt.to_rfc3339(),
        AttributeValue::Geopos(p) => p.to_lat_lon_string(),
    };

    match (storage, value) {
        (StorageType::Boolean, AttributeValue::Bool(b)) => json!(b),
        (StorageType::Boolean, AttributeValue::Int(i)) => json!(*i != 0),
        (StorageType::Boolean, AttributeValue::Float(f)) => json!(*f != 0.0),
        (StorageType::Long, AttributeValue::Bool(b)) => json!(i64::from(*b)),
        (StorageType::Long, AttributeValue::Int(i)) => json!(i),
        (StorageType::Long, AttributeValue::Float(f)) => json!(f.trunc() as i64),
        (StorageType::Double, AttributeValue::Bool(b)) => json!(if *b { 1.0 } else { 0.0 }),
        (StorageType::Double, AttributeValue::Int(i)) => json!(*i as f64),
        (StorageType::Double, AttributeValue::Float(f)) => json!(f),
        _ => Value::String(as_text()),
    }
}

/// 目标类型的主投影是否已由当前类型维护
pub fn is_projection_available(from: Dtype, to: Dtype) -> bool {
    projections(from).contains(&primary(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_domain::GeoPoint;

    #[test]
    fn test_int_keeps_all_scalar_projections() {
        let values = project_value(&AttributeValue::Int(3));
        assert_eq!(
            values,
            vec![
                (StorageType::Boolean, json!(true)),
                (StorageType::Long, json!(3)),
                (StorageType::Double, json!(3.0)),
                (StorageType::Text, json!("3")),
                (StorageType::Keyword, json!("3")),
            ]
        );
    }

    #[test]
    fn test_geopos_projection_is_lat_first() {
        let value = AttributeValue::Geopos(GeoPoint {
            lat: 41.5,
            lon: -70.25,
        });
        let values = project_value(&value);
        assert_eq!(values[0], (StorageType::GeoPoint, json!("41.5,-70.25")));
    }

    #[test]
    fn test_widening_targets_have_projections() {
        for from in [Dtype::Bool, Dtype::Int, Dtype::Float, Dtype::Datetime, Dtype::Geopos] {
            assert!(is_projection_available(from, Dtype::String));
            assert!(is_projection_available(from, Dtype::Enum));
        }
        assert!(!is_projection_available(Dtype::String, Dtype::Int));
    }

    #[test]
    fn test_field_name() {
        let id = Uuid::nil();
        assert_eq!(
            field_name(&id, StorageType::GeoPoint),
            "00000000-0000-0000-0000-000000000000_geo_point"
        );
    }
}
