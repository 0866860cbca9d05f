//! 树节点物化路径
//!
//! 路径由父链推导：根节点以项目名开头，各段以 `.` 连接。

use std::collections::{BTreeMap, HashSet};

use mediaflow_core::{MediaflowError, MediaflowResult};

use crate::entities::Leaf;

/// 路径段中不允许出现的字符统一替换为下划线
pub fn sanitize_segment(name: &str) -> String {
    name.replace([' ', '-', '(', ')'], "_")
}

pub fn compute_path(name: &str, parent_path: Option<&str>, project_name: &str) -> String {
    let segment = sanitize_segment(name);
    match parent_path {
        Some(parent) => format!("{parent}.{segment}"),
        None => format!("{}.{segment}", sanitize_segment(project_name)),
    }
}

pub fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.split('.').count()
    }
}

/// 路径上的每一段，用于缓存失效
pub fn ancestors(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// 一个项目内的全部树节点，负责在改名或移动后重算路径
#[derive(Debug, Clone)]
pub struct LeafTree {
    project_name: String,
    leaves: BTreeMap<i64, Leaf>,
}

impl LeafTree {
    pub fn new(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            leaves: BTreeMap::new(),
        }
    }

    /// 以已持久化的节点构建，沿用存储的路径
    pub fn from_stored(project_name: &str, leaves: impl IntoIterator<Item = Leaf>) -> Self {
        Self {
            project_name: project_name.to_string(),
            leaves: leaves.into_iter().map(|l| (l.base.id, l)).collect(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&Leaf> {
        self.leaves.get(&id)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.leaves.values()
    }

    /// 插入新节点，路径由父节点推导
    pub fn insert(&mut self, mut leaf: Leaf) -> MediaflowResult<Leaf> {
        if self.leaves.contains_key(&leaf.base.id) {
            return Err(MediaflowError::Conflict(format!(
                "树节点 {} 已存在",
                leaf.base.id
            )));
        }
        let parent_path = self.parent_path(leaf.parent)?;
        leaf.path = compute_path(&leaf.name, parent_path.as_deref(), &self.project_name);
        self.ensure_unique(&leaf.path, &HashSet::from([leaf.base.id]))?;
        self.leaves.insert(leaf.base.id, leaf.clone());
        Ok(leaf)
    }

    /// 修改节点名称或父节点，返回路径发生变化的所有节点（含子孙）
    pub fn update(
        &mut self,
        id: i64,
        name: Option<&str>,
        parent: Option<Option<i64>>,
    ) -> MediaflowResult<Vec<Leaf>> {
        let current = self
            .leaves
            .get(&id)
            .cloned()
            .ok_or_else(|| MediaflowError::not_found("树节点", id.to_string()))?;

        let new_name = name.map(str::to_string).unwrap_or(current.name.clone());
        let new_parent = parent.unwrap_or(current.parent);

        let subtree = self.subtree(id);
        if let Some(p) = new_parent {
            if subtree.contains(&p) {
                return Err(MediaflowError::validation(format!(
                    "树节点 {id} 不能移动到自身或其子孙 {p} 之下"
                )));
            }
        }

        let mut staged = self.leaves.clone();
        if let Some(leaf) = staged.get_mut(&id) {
            leaf.name = new_name;
            leaf.parent = new_parent;
        }

        // 按深度优先顺序重算，父节点先于子节点
        let mut changed = Vec::new();
        for node in self.ordered_subtree(id) {
            let (name, parent) = match staged.get(&node) {
                Some(leaf) => (leaf.name.clone(), leaf.parent),
                None => continue,
            };
            let parent_path = match parent {
                Some(p) => Some(
                    staged
                        .get(&p)
                        .map(|l| l.path.clone())
                        .ok_or_else(|| MediaflowError::not_found("树节点", p.to_string()))?,
                ),
                None => None,
            };
            let path = compute_path(&name, parent_path.as_deref(), &self.project_name);
            if let Some(leaf) = staged.get_mut(&node) {
                leaf.path = path;
                changed.push(leaf.clone());
            }
        }

        let mut paths = HashSet::new();
        for leaf in staged.values() {
            if !paths.insert(leaf.path.as_str()) {
                return Err(MediaflowError::Conflict(format!(
                    "树节点路径 {} 已存在",
                    leaf.path
                )));
            }
        }

        self.leaves = staged;
        Ok(changed)
    }

    /// 删除节点，子节点的父引用置空并重算路径
    pub fn remove(&mut self, id: i64) -> MediaflowResult<Vec<Leaf>> {
        if self.leaves.remove(&id).is_none() {
            return Err(MediaflowError::not_found("树节点", id.to_string()));
        }
        let orphans: Vec<i64> = self
            .leaves
            .values()
            .filter(|l| l.parent == Some(id))
            .map(|l| l.base.id)
            .collect();
        let mut changed = Vec::new();
        for orphan in orphans {
            changed.extend(self.update(orphan, None, Some(None))?);
        }
        Ok(changed)
    }

    fn parent_path(&self, parent: Option<i64>) -> MediaflowResult<Option<String>> {
        match parent {
            Some(p) => self
                .leaves
                .get(&p)
                .map(|l| Some(l.path.clone()))
                .ok_or_else(|| MediaflowError::not_found("树节点", p.to_string())),
            None => Ok(None),
        }
    }

    fn ensure_unique(&self, path: &str, exclude: &HashSet<i64>) -> MediaflowResult<()> {
        let taken = self
            .leaves
            .values()
            .any(|l| !exclude.contains(&l.base.id) && l.path == path);
        if taken {
            return Err(MediaflowError::Conflict(format!("树节点路径 {path} 已存在")));
        }
        Ok(())
    }

    fn subtree(&self, root: i64) -> HashSet<i64> {
        self.ordered_subtree(root).into_iter().collect()
    }

    fn ordered_subtree(&self, root: i64) -> Vec<i64> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            order.push(node);
            for child in self.leaves.values().filter(|l| l.parent == Some(node)) {
                stack.push(child.base.id);
            }
        }
        order
    }
}
