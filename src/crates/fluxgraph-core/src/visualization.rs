//! Graph visualization: DOT/Graphviz, Mermaid, and ASCII rendering (spec §9
//! supplement, grounded on the teacher's `visualization.rs`).

use crate::dataflow::TaskGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Mermaid,
    Ascii,
}

#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    pub title: Option<String>,
    pub include_status: bool,
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self { format: VisualizationFormat::Dot, title: None, include_status: false }
    }
    pub fn mermaid() -> Self {
        Self { format: VisualizationFormat::Mermaid, title: None, include_status: false }
    }
    pub fn ascii() -> Self {
        Self { format: VisualizationFormat::Ascii, title: None, include_status: false }
    }
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
    pub fn with_status(mut self) -> Self {
        self.include_status = true;
        self
    }
}

pub fn visualize(graph: &TaskGraph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => render_dot(graph, options),
        VisualizationFormat::Mermaid => render_mermaid(graph, options),
        VisualizationFormat::Ascii => render_ascii(graph),
    }
}

fn label_for(graph: &TaskGraph, id: uuid::Uuid, options: &VisualizationOptions) -> String {
    let task = graph.task(id);
    let title = task
        .and_then(|t| t.def.config.title.clone())
        .unwrap_or_else(|| id.to_string());
    if options.include_status {
        if let Some(task) = task {
            return format!("{title}\\n[{:?}]", task.status);
        }
    }
    title
}

fn render_dot(graph: &TaskGraph, options: &VisualizationOptions) -> String {
    let mut out = String::from("digraph G {\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("  label=\"{title}\";\n"));
    }
    for task in graph.tasks() {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\"];\n",
            task.id(),
            label_for(graph, task.id(), options)
        ));
    }
    for df in graph.dataflows() {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}->{}\"];\n",
            df.source.task_id, df.target.task_id, df.source.port, df.target.port
        ));
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(graph: &TaskGraph, options: &VisualizationOptions) -> String {
    let mut out = String::from("graph TD\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("  %% {title}\n"));
    }
    for task in graph.tasks() {
        out.push_str(&format!(
            "  n{}[\"{}\"]\n",
            task.id().simple(),
            label_for(graph, task.id(), options)
        ));
    }
    for df in graph.dataflows() {
        out.push_str(&format!(
            "  n{} -->|{}->{}| n{}\n",
            df.source.task_id.simple(),
            df.source.port,
            df.target.port,
            df.target.task_id.simple()
        ));
    }
    out
}

fn render_ascii(graph: &TaskGraph) -> String {
    let Some(order) = graph.topological_order() else {
        return "<cyclic graph>".to_string();
    };
    if order.is_empty() {
        return "<empty graph>".to_string();
    }
    order
        .iter()
        .map(|id| {
            let title = graph
                .task(*id)
                .and_then(|t| t.def.config.title.clone())
                .unwrap_or_else(|| id.to_string());
            format!("[{title}]")
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}
