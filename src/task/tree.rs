use crate::task::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Composite task: an ordered set of children run sequentially or in parallel.
///
/// Children are taken by value on append, so a tree can never contain itself
/// or one of its ancestors. Once built, a tree is handed to [`TaskTree::do_all`]
/// once and discarded.
pub struct TaskTree {
    mode: ExecutionMode,
    children: Vec<Arc<dyn Task>>,
    label: Option<String>,
    plan_mode: bool,
}

impl TaskTree {
    /// Create a new empty task tree
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            children: Vec::new(),
            label: None,
            plan_mode: false,
        }
    }

    pub fn sequential() -> Self {
        Self::new(ExecutionMode::Sequential)
    }

    pub fn parallel() -> Self {
        Self::new(ExecutionMode::Parallel)
    }

    /// Name shown in the plan instead of the generated summary
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// In plan mode the tree renders with a `(plan)` prefix and runs nothing
    pub fn with_plan_mode(mut self, plan_mode: bool) -> Self {
        self.plan_mode = plan_mode;
        self
    }

    pub fn set_plan_mode(&mut self, plan_mode: bool) {
        self.plan_mode = plan_mode;
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn is_plan_mode(&self) -> bool {
        self.plan_mode
    }

    /// Add a task as the next child
    pub fn append<T: Task + 'static>(&mut self, task: T) {
        self.children.push(Arc::new(task));
    }

    pub fn append_boxed(&mut self, task: Box<dyn Task>) {
        self.children.push(Arc::from(task));
    }

    pub fn append_all<T, I>(&mut self, tasks: I)
    where
        T: Task + 'static,
        I: IntoIterator<Item = T>,
    {
        for task in tasks {
            self.append(task);
        }
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn children(&self) -> &[Arc<dyn Task>] {
        &self.children
    }

    /// Generated one-line summary, e.g. `3 parallel tasks`
    pub fn summary(&self) -> String {
        self.heading(false)
    }

    /// Label if one was given, generated summary otherwise
    pub fn title(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.summary(),
        }
    }

    fn heading(&self, nested: bool) -> String {
        if self.is_empty() {
            return "no tasks".to_string();
        }
        let noun = if nested { "sub-task" } else { "task" };
        let plural = if self.len() == 1 { "" } else { "s" };
        let counted = format!("{} {} {}{}", self.len(), self.mode, noun, plural);
        match &self.label {
            Some(label) => format!("{} ({})", label, counted),
            None => counted,
        }
    }

    fn plan_lines(&self, nested: bool) -> Vec<String> {
        if self.is_empty() {
            return vec![self.heading(nested)];
        }

        let mut lines = vec![format!("{}: {{", self.heading(nested))];
        for child in &self.children {
            let mut child_lines = match child.as_tree() {
                Some(tree) => tree.plan_lines(true),
                None => child
                    .describe()
                    .trim_end()
                    .lines()
                    .map(str::to_owned)
                    .collect(),
            };
            if child_lines.is_empty() {
                child_lines.push(String::new());
            }
            if let Some(last) = child_lines.last_mut() {
                last.push(',');
            }
            lines.extend(child_lines.into_iter().map(|line| format!("{}{}", INDENT, line)));
        }
        lines.push("}".to_string());
        lines
    }
}

#[async_trait]
impl Task for TaskTree {
    /// Render the nested plan; never executes anything
    fn describe(&self) -> String {
        let plan = self.plan_lines(false).join("\n");
        if self.plan_mode {
            format!("(plan) {}", plan)
        } else {
            plan
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        let failures = self.do_all().await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TaskError::Aggregate {
                task: self.title(),
                total: self.len(),
                failures,
            })
        }
    }

    fn as_tree(&self) -> Option<&TaskTree> {
        Some(self)
    }
}

impl std::fmt::Debug for TaskTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTree")
            .field("mode", &self.mode)
            .field("label", &self.label)
            .field("plan_mode", &self.plan_mode)
            .field("children", &self.children.len())
            .finish()
    }
}
