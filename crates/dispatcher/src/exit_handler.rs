//! 退出处理器求值
//!
//! 执行后端在工作流到达终态后运行 `onExit` 模板，按 `when` 条件选择步骤。这里按同样的
//! 规则求值，用于在提交前确认失败与成功两个分支恰好只有一个会触发。

use std::fmt;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::{TemplateBody, WorkflowManifest, WorkflowStep};
use mediaflow_domain::{ProgressContext, ProgressEvent, ProgressState};

/// 后端上报的工作流终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Succeeded,
    Failed,
    Error,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 3] = [
        WorkflowStatus::Succeeded,
        WorkflowStatus::Failed,
        WorkflowStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Succeeded => "Succeeded",
            WorkflowStatus::Failed => "Failed",
            WorkflowStatus::Error => "Error",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 求值 `{{workflow.status}} == Succeeded` 形式的条件；没有条件的步骤总是执行
pub fn evaluate_when(when: Option<&str>, status: WorkflowStatus) -> MediaflowResult<bool> {
    let Some(expression) = when else {
        return Ok(true);
    };
    let resolved = expression.replace("{{workflow.status}}", status.as_str());
    let (lhs, rhs, equal) = if let Some((lhs, rhs)) = resolved.split_once("!=") {
        (lhs, rhs, false)
    } else if let Some((lhs, rhs)) = resolved.split_once("==") {
        (lhs, rhs, true)
    } else {
        return Err(MediaflowError::validation(format!(
            "无法解析的步骤条件: {expression}"
        )));
    };
    Ok((lhs.trim() == rhs.trim()) == equal)
}

/// 给定终态下退出处理器实际执行的步骤
pub fn fired_steps(
    manifest: &WorkflowManifest,
    status: WorkflowStatus,
) -> MediaflowResult<Vec<&WorkflowStep>> {
    let Some(on_exit) = &manifest.spec.on_exit else {
        return Ok(Vec::new());
    };
    let handler = manifest
        .template(on_exit)
        .ok_or_else(|| MediaflowError::not_found("模板", on_exit.clone()))?;
    let TemplateBody::Steps(groups) = &handler.body else {
        return Err(MediaflowError::validation(format!(
            "退出处理器 {on_exit} 必须由步骤组成"
        )));
    };

    let mut fired = Vec::new();
    for step in groups.iter().flatten() {
        if evaluate_when(step.when.as_deref(), status)? {
            fired.push(step);
        }
    }
    Ok(fired)
}

/// 每种终态都恰好触发一个步骤
pub fn verify_exclusive(manifest: &WorkflowManifest) -> MediaflowResult<()> {
    for status in WorkflowStatus::ALL {
        let fired = fired_steps(manifest, status)?;
        if fired.len() != 1 {
            return Err(MediaflowError::validation(format!(
                "终态 {status} 触发了 {} 个退出步骤",
                fired.len()
            )));
        }
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn step_field<'a>(
    step: &'a WorkflowStep,
    container_args: &'a [String],
    name: &str,
) -> MediaflowResult<&'a str> {
    step.arguments
        .get(name)
        .or_else(|| flag_value(container_args, &format!("--{name}")))
        .ok_or_else(|| MediaflowError::validation(format!("退出步骤 {} 缺少 {name}", step.name)))
}

fn parse_state(state: &str) -> MediaflowResult<ProgressState> {
    match state {
        "started" => Ok(ProgressState::Started),
        "failed" => Ok(ProgressState::Failed),
        "finished" => Ok(ProgressState::Finished),
        other => Err(MediaflowError::validation(format!("未知的进度状态: {other}"))),
    }
}

/// 终态下退出处理器发出的进度事件
///
/// 取值优先来自步骤实参，其次来自步骤模板容器的 `--state`/`--message`/`--progress` 参数。
pub fn progress_events(
    manifest: &WorkflowManifest,
    status: WorkflowStatus,
    correlation: &ProgressContext,
) -> MediaflowResult<Vec<ProgressEvent>> {
    fired_steps(manifest, status)?
        .into_iter()
        .map(|step| {
            let container_args = manifest
                .template(&step.template)
                .and_then(|t| t.container())
                .map(|c| c.args.as_slice())
                .unwrap_or_default();
            let field = |name: &str| step_field(step, container_args, name);
            let progress = field("progress")?.parse::<u8>().map_err(|e| {
                MediaflowError::validation(format!("退出步骤 {} 的进度无效: {e}", step.name))
            })?;
            ProgressEvent::new(
                parse_state(field("state")?)?,
                field("message")?,
                progress,
                correlation.clone(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_when() {
        let not_succeeded = Some("{{workflow.status}} != Succeeded");
        assert!(!evaluate_when(not_succeeded, WorkflowStatus::Succeeded).unwrap());
        assert!(evaluate_when(not_succeeded, WorkflowStatus::Failed).unwrap());
        assert!(evaluate_when(not_succeeded, WorkflowStatus::Error).unwrap());

        let succeeded = Some("{{workflow.status}} == Succeeded");
        assert!(evaluate_when(succeeded, WorkflowStatus::Succeeded).unwrap());
        assert!(!evaluate_when(succeeded, WorkflowStatus::Error).unwrap());

        assert!(evaluate_when(None, WorkflowStatus::Failed).unwrap());
        assert!(evaluate_when(Some("{{workflow.status}}"), WorkflowStatus::Failed).is_err());
    }

    #[test]
    fn test_flag_value() {
        let args: Vec<String> = ["--state", "failed", "--progress"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "--state"), Some("failed"));
        assert_eq!(flag_value(&args, "--progress"), None);
    }
}
