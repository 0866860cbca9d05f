//! 用户自定义属性的类型声明与取值

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mediaflow_core::{MediaflowError, MediaflowResult};

/// 内置的分组属性，不需要在实体类型上声明
pub const SECTION_ATTRIBUTE: &str = "tator_user_sections";

/// 属性数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    Int,
    Float,
    Enum,
    String,
    Datetime,
    Geopos,
}

impl Dtype {
    pub const ALL: [Dtype; 7] = [
        Dtype::Bool,
        Dtype::Int,
        Dtype::Float,
        Dtype::Enum,
        Dtype::String,
        Dtype::Datetime,
        Dtype::Geopos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int => "int",
            Dtype::Float => "float",
            Dtype::Enum => "enum",
            Dtype::String => "string",
            Dtype::Datetime => "datetime",
            Dtype::Geopos => "geopos",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = MediaflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dtype::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| MediaflowError::validation(format!("未知的属性类型: {s}")))
    }
}

/// 实体类型上声明的一个属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeType {
    pub name: String,
    pub dtype: Dtype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AttributeType {
    pub fn new(name: &str, dtype: Dtype) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            style: None,
            choices: Vec::new(),
            minimum: None,
            maximum: None,
            default: None,
        }
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.choices = choices.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.style = Some(style.to_string());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// 声明本身是否自洽
    pub fn validate(&self) -> MediaflowResult<()> {
        if self.name.trim().is_empty() {
            return Err(MediaflowError::validation("属性名不能为空"));
        }
        if self.name == SECTION_ATTRIBUTE {
            return Err(MediaflowError::validation(format!(
                "属性名 {SECTION_ATTRIBUTE} 为系统保留"
            )));
        }
        if self.dtype == Dtype::Enum && self.choices.is_empty() {
            return Err(MediaflowError::validation(format!(
                "枚举属性 {} 必须声明可选值",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(MediaflowError::validation(format!(
                    "属性 {} 的最小值 {min} 大于最大值 {max}",
                    self.name
                )));
            }
        }
        if let Some(default) = &self.default {
            AttributeValue::convert(self, default)?;
        }
        Ok(())
    }
}

/// 地理坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> MediaflowResult<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(MediaflowError::validation(format!(
                "纬度 {lat} 超出范围 [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(MediaflowError::validation(format!(
                "经度 {lon} 超出范围 [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// 文档存储的字符串约定为纬度在前
    pub fn to_lat_lon_string(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }
}

/// 经过类型校验的属性值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
    String(String),
    Datetime(DateTime<Utc>),
    Geopos(GeoPoint),
}

impl AttributeValue {
    pub fn dtype(&self) -> Dtype {
        match self {
            AttributeValue::Bool(_) => Dtype::Bool,
            AttributeValue::Int(_) => Dtype::Int,
            AttributeValue::Float(_) => Dtype::Float,
            AttributeValue::Enum(_) => Dtype::Enum,
            AttributeValue::String(_) => Dtype::String,
            AttributeValue::Datetime(_) => Dtype::Datetime,
            AttributeValue::Geopos(_) => Dtype::Geopos,
        }
    }

    /// 按属性声明把原始 JSON 值转换为带类型的值
    ///
    /// 坐标接受 `[lon, lat]` 数组或 `"lat_lon"` 字符串。
    pub fn convert(attribute: &AttributeType, raw: &Value) -> MediaflowResult<Self> {
        let name = &attribute.name;
        let invalid = |reason: &str| {
            MediaflowError::validation(format!(
                "属性 {name} ({}) 的取值 {raw} 无效: {reason}",
                attribute.dtype
            ))
        };

        let value = match attribute.dtype {
            Dtype::Bool => match raw {
                Value::Bool(b) => AttributeValue::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => AttributeValue::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => {
                    AttributeValue::Bool(false)
                }
                _ => return Err(invalid("需要布尔值")),
            },
            Dtype::Int => {
                let parsed = match raw {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| invalid("需要整数"))?;
                check_range(attribute, parsed as f64)?;
                AttributeValue::Int(parsed)
            }
            Dtype::Float => {
                let parsed = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|f| f.is_finite())
                .ok_or_else(|| invalid("需要浮点数"))?;
                check_range(attribute, parsed)?;
                AttributeValue::Float(parsed)
            }
            Dtype::Enum => match raw {
                Value::String(s) if attribute.choices.contains(s) => {
                    AttributeValue::Enum(s.clone())
                }
                _ => {
                    return Err(invalid(&format!(
                        "可选值为 {:?}",
                        attribute.choices
                    )))
                }
            },
            Dtype::String => match raw {
                Value::String(s) => AttributeValue::String(s.clone()),
                Value::Number(n) => AttributeValue::String(n.to_string()),
                Value::Bool(b) => AttributeValue::String(b.to_string()),
                _ => return Err(invalid("需要字符串")),
            },
            Dtype::Datetime => match raw {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| AttributeValue::Datetime(dt.with_timezone(&Utc)))
                    .map_err(|_| invalid("需要 RFC 3339 时间"))?,
                _ => return Err(invalid("需要 RFC 3339 时间")),
            },
            Dtype::Geopos => {
                let (lat, lon) = match raw {
                    Value::Array(items) if items.len() == 2 => {
                        let lon = items[0].as_f64().ok_or_else(|| invalid("经度需要数值"))?;
                        let lat = items[1].as_f64().ok_or_else(|| invalid("纬度需要数值"))?;
                        (lat, lon)
                    }
                    Value::String(s) => {
                        let (lat, lon) = s
                            .split_once('_')
                            .ok_or_else(|| invalid("需要以下划线分隔的纬度和经度"))?;
                        let lat = lat.trim().parse::<f64>().map_err(|_| invalid("纬度需要数值"))?;
                        let lon = lon.trim().parse::<f64>().map_err(|_| invalid("经度需要数值"))?;
                        (lat, lon)
                    }
                    _ => return Err(invalid("需要 [经度, 纬度] 数组或 \"纬度_经度\" 字符串")),
                };
                AttributeValue::Geopos(GeoPoint::new(lat, lon).map_err(|e| invalid(&e.to_string()))?)
            }
        };

        Ok(value)
    }

    /// 原始 JSON 表示，坐标按经度在前的数组输出
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(i) => Value::from(*i),
            AttributeValue::Float(f) => Value::from(*f),
            AttributeValue::Enum(s) | AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Datetime(dt) => Value::String(dt.to_rfc3339()),
            AttributeValue::Geopos(p) => Value::Array(vec![Value::from(p.lon), Value::from(p.lat)]),
        }
    }
}

fn check_range(attribute: &AttributeType, value: f64) -> MediaflowResult<()> {
    if let Some(min) = attribute.minimum {
        if value < min {
            return Err(MediaflowError::validation(format!(
                "{value} 小于属性 {} 的最小值 {min}",
                attribute.name
            )));
        }
    }
    if let Some(max) = attribute.maximum {
        if value > max {
            return Err(MediaflowError::validation(format!(
                "{value} 大于属性 {} 的最大值 {max}",
                attribute.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_bool_accepts_strings() {
        let attr = AttributeType::new("reviewed", Dtype::Bool);
        assert_eq!(
            AttributeValue::convert(&attr, &json!("TRUE")).unwrap(),
            AttributeValue::Bool(true)
        );
        assert_eq!(
            AttributeValue::convert(&attr, &json!(false)).unwrap(),
            AttributeValue::Bool(false)
        );
        assert!(AttributeValue::convert(&attr, &json!("yes")).is_err());
    }

    #[test]
    fn test_convert_int_respects_bounds() {
        let attr = AttributeType::new("count", Dtype::Int).with_range(Some(0.0), Some(10.0));
        assert_eq!(
            AttributeValue::convert(&attr, &json!("7")).unwrap(),
            AttributeValue::Int(7)
        );
        assert!(AttributeValue::convert(&attr, &json!(11)).is_err());
        assert!(AttributeValue::convert(&attr, &json!(-1)).is_err());
        assert!(AttributeValue::convert(&attr, &json!(1.5)).is_err());
    }

    #[test]
    fn test_convert_enum_requires_choice() {
        let attr = AttributeType::new("species", Dtype::Enum).with_choices(&["cod", "haddock"]);
        assert!(AttributeValue::convert(&attr, &json!("cod")).is_ok());
        assert!(AttributeValue::convert(&attr, &json!("salmon")).is_err());
    }

    #[test]
    fn test_convert_geopos_forms() {
        let attr = AttributeType::new("location", Dtype::Geopos);
        let from_array = AttributeValue::convert(&attr, &json!([-70.5, 41.25])).unwrap();
        let from_string = AttributeValue::convert(&attr, &json!("41.25_-70.5")).unwrap();
        assert_eq!(from_array, from_string);
        assert_eq!(
            from_array,
            AttributeValue::Geopos(GeoPoint {
                lat: 41.25,
                lon: -70.5
            })
        );
        assert!(AttributeValue::convert(&attr, &json!("95_10")).is_err());
        assert!(AttributeValue::convert(&attr, &json!("41.25")).is_err());
    }

    #[test]
    fn test_convert_datetime() {
        let attr = AttributeType::new("captured", Dtype::Datetime);
        let value = AttributeValue::convert(&attr, &json!("2021-03-04T05:06:07Z")).unwrap();
        assert_eq!(value.dtype(), Dtype::Datetime);
        assert!(AttributeValue::convert(&attr, &json!("yesterday")).is_err());
    }

    #[test]
    fn test_attribute_type_validation() {
        assert!(AttributeType::new("species", Dtype::Enum).validate().is_err());
        assert!(AttributeType::new(SECTION_ATTRIBUTE, Dtype::String)
            .validate()
            .is_err());
        assert!(AttributeType::new("count", Dtype::Int)
            .with_default(json!("abc"))
            .validate()
            .is_err());
        assert!(AttributeType::new("count", Dtype::Int)
            .with_default(json!(3))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_value_serde_is_tagged() {
        let value = AttributeValue::Int(4);
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"dtype": "int", "value": 4}));
        assert_eq!("geopos".parse::<Dtype>().unwrap(), Dtype::Geopos);
    }
}
