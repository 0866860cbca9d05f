//! 工作流参数绑定
//!
//! 占位符 `{{namespace.name}}` 只在装配时解析一次。替换进来的值按不透明字符串
//! 处理，即使其中含有占位符语法也不会再次展开。

use std::collections::BTreeMap;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::Arguments;

pub const WORKFLOW_PARAMETERS: &str = "workflow.parameters.";

/// 文本中的占位符表达式（不含花括号）
pub fn placeholders(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        found.push(after[..end].trim());
        rest = &after[end + 2..];
    }
    found
}

/// 单遍替换
///
/// `lookup` 返回 `None` 的占位符原样保留，交给执行后端解析。
pub fn substitute<F>(text: &str, mut lookup: F) -> MediaflowResult<String>
where
    F: FnMut(&str) -> MediaflowResult<Option<String>>,
{
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            output.push_str(&rest[start..]);
            return Ok(output);
        };
        let expression = after[..end].trim();
        match lookup(expression)? {
            Some(value) => output.push_str(&value),
            None => {
                output.push_str("{{");
                output.push_str(&after[..end]);
                output.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

/// 以全局参数为上下文的绑定器
#[derive(Debug, Clone)]
pub struct ParameterBinder {
    globals: BTreeMap<String, String>,
}

impl ParameterBinder {
    pub fn new(globals: &Arguments) -> Self {
        Self {
            globals: globals
                .parameters
                .iter()
                .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
                .collect(),
        }
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// 解析 `workflow.parameters.*`；未声明的全局参数是校验错误
    pub fn bind(&self, text: &str) -> MediaflowResult<String> {
        substitute(text, |expression| {
            let Some(name) = expression.strip_prefix(WORKFLOW_PARAMETERS) else {
                return Ok(None);
            };
            self.globals
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| MediaflowError::validation(format!("未声明的工作流参数: {name}")))
        })
    }

    /// 把任务实参解析为扁平的名称到取值映射
    pub fn resolve(&self, arguments: &Arguments) -> MediaflowResult<BTreeMap<String, String>> {
        arguments
            .parameters
            .iter()
            .map(|p| {
                let value = p.value.as_deref().unwrap_or_default();
                Ok((p.name.clone(), self.bind(value)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder() -> ParameterBinder {
        ParameterBinder::new(&Arguments::from_pairs([
            ("host", "https://media.example.com"),
            ("token", "secret"),
            ("upload_name", "{{workflow.parameters.token}}.mp4"),
        ]))
    }

    #[test]
    fn test_binds_workflow_parameters() {
        let bound = binder()
            .bind("--host {{workflow.parameters.host}} --token {{ workflow.parameters.token }}")
            .unwrap();
        assert_eq!(bound, "--host https://media.example.com --token secret");
    }

    #[test]
    fn test_templated_values_stay_opaque() {
        let bound = binder().bind("{{workflow.parameters.upload_name}}").unwrap();
        assert_eq!(bound, "{{workflow.parameters.token}}.mp4");
    }

    #[test]
    fn test_other_namespaces_are_left_for_the_backend() {
        let text = "{{inputs.parameters.original}} {{item.name}} {{workflow.status}}";
        assert_eq!(binder().bind(text).unwrap(), text);
    }

    #[test]
    fn test_undeclared_parameter_is_rejected() {
        let err = binder().bind("{{workflow.parameters.missing}}").unwrap_err();
        assert!(matches!(err, MediaflowError::Validation(_)));
    }

    #[test]
    fn test_resolve_flattens_arguments() {
        let args = Arguments::from_pairs([("url", "{{workflow.parameters.host}}/files/1")]);
        let resolved = binder().resolve(&args).unwrap();
        assert_eq!(resolved["url"], "https://media.example.com/files/1");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("{{tasks.a.outputs.parameters.b}}/{{item.c}}{{unterminated"),
            vec!["tasks.a.outputs.parameters.b", "item.c"]
        );
    }
}
