use std::collections::{BTreeMap, HashSet, VecDeque};

use tracing::debug;

use mediaflow_core::{MediaflowError, MediaflowResult};
use mediaflow_domain::workflow::{
    Arguments, DagTask, DagTemplate, Template, TemplateBody, WorkflowManifest,
};

use crate::parameters::{placeholders, ParameterBinder};

/// 提交前的工作流清单校验
///
/// 检查模板引用、DAG 依赖、动态展开的数据来源以及全局参数引用，任何一项不满足都拒绝提交。
pub struct DependencyChecker<'a> {
    manifest: &'a WorkflowManifest,
    templates: BTreeMap<&'a str, &'a Template>,
    binder: ParameterBinder,
}

/// `tasks.X.outputs.parameters.Y` 形式的引用
fn task_output_reference(expression: &str) -> Option<(&str, &str)> {
    let rest = expression.strip_prefix("tasks.")?;
    let (task, parameter) = rest.split_once(".outputs.parameters.")?;
    Some((task, parameter))
}

/// Kahn 算法；边由节点指向其依赖，存在未处理节点即有环
fn topological_sort_cycle_detection(graph: &BTreeMap<&str, Vec<&str>>) -> Vec<String> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut queue = VecDeque::new();
    for &node in graph.keys() {
        in_degree.entry(node).or_insert(0);
    }

    for dependencies in graph.values() {
        for &dep in dependencies {
            *in_degree.entry(dep).or_insert(0) += 1;
        }
    }
    for (&node, &degree) in &in_degree {
        if degree == 0 {
            queue.push_back(node);
        }
    }

    while let Some(node) = queue.pop_front() {
        if let Some(dependencies) = graph.get(node) {
            for &dep in dependencies {
                if let Some(degree) = in_degree.get_mut(dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }
    in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(node, _)| node.to_string())
        .collect()
}

impl<'a> DependencyChecker<'a> {
    pub fn new(manifest: &'a WorkflowManifest) -> Self {
        Self {
            manifest,
            templates: manifest
                .spec
                .templates
                .iter()
                .map(|t| (t.name.as_str(), t))
                .collect(),
            binder: ParameterBinder::new(&manifest.spec.arguments),
        }
    }

    /// 校验整个清单
    pub fn validate(manifest: &WorkflowManifest) -> MediaflowResult<()> {
        let checker = DependencyChecker::new(manifest);
        checker.validate_templates()?;
        checker.validate_template_graph()?;
        for template in &manifest.spec.templates {
            checker.validate_outputs(template)?;
            checker.validate_parameter_references(template)?;
            match &template.body {
                TemplateBody::Dag(dag) => checker.validate_dag(template, dag)?,
                TemplateBody::Steps(groups) => {
                    for step in groups.iter().flatten() {
                        checker.validate_arguments(
                            &template.name,
                            &step.name,
                            &step.template,
                            &step.arguments,
                        )?;
                    }
                }
                TemplateBody::Container(_) | TemplateBody::Script(_) => {}
            }
        }
        debug!(
            "工作流清单校验通过，共 {} 个模板",
            manifest.spec.templates.len()
        );
        Ok(())
    }

    fn template(&self, name: &str, referrer: &str) -> MediaflowResult<&'a Template> {
        self.templates.get(name).copied().ok_or_else(|| {
            MediaflowError::validation(format!("{referrer} 引用了不存在的模板 {name}"))
        })
    }

    fn validate_templates(&self) -> MediaflowResult<()> {
        if self.templates.len() != self.manifest.spec.templates.len() {
            return Err(MediaflowError::validation("模板名称重复"));
        }
        if self.manifest.spec.entrypoint.is_empty() {
            return Err(MediaflowError::validation("工作流缺少入口模板"));
        }
        self.template(&self.manifest.spec.entrypoint, "entrypoint")?;
        if let Some(on_exit) = &self.manifest.spec.on_exit {
            self.template(on_exit, "onExit")?;
        }
        for template in &self.manifest.spec.templates {
            for referenced in template.referenced_templates() {
                self.template(referenced, &template.name)?;
            }
        }
        Ok(())
    }

    fn validate_template_graph(&self) -> MediaflowResult<()> {
        let graph: BTreeMap<&str, Vec<&str>> = self
            .manifest
            .spec
            .templates
            .iter()
            .map(|t| (t.name.as_str(), t.referenced_templates()))
            .collect();
        let cyclic = topological_sort_cycle_detection(&graph);
        if !cyclic.is_empty() {
            return Err(MediaflowError::CircularDependency(format!(
                "模板相互引用: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_outputs(&self, template: &Template) -> MediaflowResult<()> {
        let Some(outputs) = &template.outputs else {
            return Ok(());
        };
        for output in &outputs.parameters {
            let bound = output
                .value_from
                .as_ref()
                .is_some_and(|from| !from.path.is_empty());
            if !bound {
                return Err(MediaflowError::validation(format!(
                    "模板 {} 的输出参数 {} 未绑定文件路径",
                    template.name, output.name
                )));
            }
        }
        Ok(())
    }

    /// 容器命令、任务实参与步骤实参中的全局参数都必须已声明
    fn validate_parameter_references(&self, template: &Template) -> MediaflowResult<()> {
        match &template.body {
            TemplateBody::Container(container) | TemplateBody::Script(container) => {
                for text in container.command.iter().chain(&container.args) {
                    self.binder.bind(text)?;
                }
            }
            TemplateBody::Dag(dag) => {
                for task in &dag.tasks {
                    self.binder.resolve(&task.arguments)?;
                }
            }
            TemplateBody::Steps(groups) => {
                for step in groups.iter().flatten() {
                    self.binder.resolve(&step.arguments)?;
                }
            }
        }
        Ok(())
    }

    /// 被引用模板中没有默认值的输入必须由实参提供
    fn validate_arguments(
        &self,
        owner: &str,
        node: &str,
        template_name: &str,
        arguments: &Arguments,
    ) -> MediaflowResult<()> {
        let template = self.template(template_name, node)?;
        let missing: Vec<&str> = template
            .inputs
            .iter()
            .flat_map(|io| io.parameters.iter())
            .filter(|p| p.value.is_none() && arguments.get(&p.name).is_none())
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(MediaflowError::validation(format!(
                "{owner}/{node} 缺少模板 {template_name} 的输入参数: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_dag(&self, owner: &Template, dag: &DagTemplate) -> MediaflowResult<()> {
        let tasks: BTreeMap<&str, &DagTask> =
            dag.tasks.iter().map(|t| (t.name.as_str(), t)).collect();
        if tasks.len() != dag.tasks.len() {
            return Err(MediaflowError::validation(format!(
                "DAG {} 中任务名称重复",
                owner.name
            )));
        }

        let mut graph: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for task in &dag.tasks {
            for dependency in &task.dependencies {
                if !tasks.contains_key(dependency.as_str()) {
                    return Err(MediaflowError::validation(format!(
                        "DAG {} 的任务 {} 依赖不存在的任务 {}",
                        owner.name, task.name, dependency
                    )));
                }
            }
            graph.insert(
                task.name.as_str(),
                task.dependencies.iter().map(String::as_str).collect(),
            );
        }

        let cyclic = topological_sort_cycle_detection(&graph);
        if !cyclic.is_empty() {
            return Err(MediaflowError::CircularDependency(format!(
                "DAG {} 存在循环依赖: {}",
                owner.name,
                cyclic.join(", ")
            )));
        }

        for task in &dag.tasks {
            self.validate_arguments(&owner.name, &task.name, &task.template, &task.arguments)?;

            let upstream = Self::upstream_of(&graph, &task.name);
            let with_param = task.with_param.iter().map(|expr| ("withParam", expr.as_str()));
            let arguments = task
                .arguments
                .parameters
                .iter()
                .filter_map(|p| p.value.as_deref().map(|v| (p.name.as_str(), v)));
            for (field, text) in with_param.chain(arguments) {
                for expression in placeholders(text) {
                    let Some((producer, output)) = task_output_reference(expression) else {
                        continue;
                    };
                    if !upstream.contains(producer) {
                        return Err(MediaflowError::validation(format!(
                            "任务 {} 的 {field} 读取 {producer} 的输出，但未声明对其依赖",
                            task.name
                        )));
                    }
                    self.require_output(&tasks, producer, output, &task.name)?;
                }
            }
        }
        Ok(())
    }

    fn require_output(
        &self,
        tasks: &BTreeMap<&str, &DagTask>,
        producer: &str,
        parameter: &str,
        consumer: &str,
    ) -> MediaflowResult<()> {
        let producer_task = tasks.get(producer).ok_or_else(|| {
            MediaflowError::validation(format!("任务 {consumer} 引用了不存在的任务 {producer}"))
        })?;
        let template = self.template(&producer_task.template, producer)?;
        if template.output(parameter).is_none() {
            return Err(MediaflowError::validation(format!(
                "任务 {consumer} 读取的输出 {parameter} 未在模板 {} 中声明",
                template.name
            )));
        }
        Ok(())
    }

    /// 传递上游任务（BFS）
    fn upstream_of<'g>(graph: &BTreeMap<&'g str, Vec<&'g str>>, task: &str) -> HashSet<&'g str> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&str> = graph.get(task).into_iter().flatten().copied().collect();
        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                if let Some(dependencies) = graph.get(current) {
                    queue.extend(dependencies.iter().copied());
                }
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_detection() {
        let mut graph = BTreeMap::new();
        graph.insert("a", vec!["b"]);
        graph.insert("b", vec!["c"]);
        graph.insert("c", vec![]);
        assert!(topological_sort_cycle_detection(&graph).is_empty());

        graph.insert("c", vec!["a"]);
        assert_eq!(topological_sort_cycle_detection(&graph), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_task_output_reference() {
        assert_eq!(
            task_output_reference("tasks.unpack-task.outputs.parameters.videos-3"),
            Some(("unpack-task", "videos-3"))
        );
        assert_eq!(task_output_reference("item.name"), None);
    }
}
