//! `withParam` 动态展开
//!
//! 上游任务输出一个 JSON 数组，每个元素生成一个子任务；空数组生成零个子任务。

use std::collections::BTreeMap;

use serde_json::Value;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::DagTask;

use crate::parameters::substitute;

fn item_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 按输出参数内容展开任务，返回每个子任务解析后的实参
pub fn expand(task: &DagTask, output: &str) -> MediaflowResult<Vec<BTreeMap<String, String>>> {
    let items: Vec<Value> = serde_json::from_str(output).map_err(|e| {
        MediaflowError::validation(format!("任务 {} 的展开参数不是 JSON 数组: {e}", task.name))
    })?;

    items
        .iter()
        .map(|item| {
            task.arguments
                .parameters
                .iter()
                .map(|parameter| {
                    let raw = parameter.value.as_deref().unwrap_or_default();
                    let value = substitute(raw, |expression| bind_item(expression, item, task))?;
                    Ok((parameter.name.clone(), value))
                })
                .collect()
        })
        .collect()
}

fn bind_item(expression: &str, item: &Value, task: &DagTask) -> MediaflowResult<Option<String>> {
    if expression == "item" {
        return Ok(Some(item_text(item)));
    }
    let Some(key) = expression.strip_prefix("item.") else {
        return Ok(None);
    };
    item.get(key).map(item_text).map(Some).ok_or_else(|| {
        MediaflowError::validation(format!("任务 {} 的展开元素缺少字段 {key}", task.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_domain::workflow::Arguments;

    fn transcode_task() -> DagTask {
        DagTask::new("transcode-task-0", "transcode-pipeline")
            .with_arguments(Arguments::from_pairs([
                ("original", "{{item.dirname}}/{{item.name}}"),
                ("entity_type", "{{item.entity_type}}"),
                ("url", "None"),
            ]))
            .fan_out_over("{{tasks.unpack-task.outputs.parameters.videos-0}}")
    }

    #[test]
    fn test_empty_packet_expands_to_nothing() {
        assert!(expand(&transcode_task(), "[]").unwrap().is_empty());
    }

    #[test]
    fn test_each_item_becomes_a_child() {
        let output = r#"[
            {"dirname": "/work/a", "name": "dive.mp4", "entity_type": 3},
            {"dirname": "/work/b", "name": "{{item.name}}.mov", "entity_type": 3}
        ]"#;
        let children = expand(&transcode_task(), output).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0]["original"], "/work/a/dive.mp4");
        assert_eq!(children[0]["entity_type"], "3");
        assert_eq!(children[1]["original"], "/work/b/{{item.name}}.mov");
        assert_eq!(children[1]["url"], "None");
    }

    #[test]
    fn test_missing_item_field_is_rejected() {
        let err = expand(&transcode_task(), r#"[{"name": "x"}]"#).unwrap_err();
        assert!(matches!(err, MediaflowError::Validation(_)));
    }

    #[test]
    fn test_non_array_output_is_rejected() {
        assert!(expand(&transcode_task(), "{}").is_err());
    }
}
