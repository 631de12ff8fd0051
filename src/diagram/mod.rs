//! SVG diagram of a subflow's tasks.
//!
//! The left group stacks `order.sequence` top to bottom with an arrow from
//! each displayed task to the next. The right group holds `order.whenever`
//! without edges or background. Rendering is a pure function of the status
//! document, the title map and the options.

pub mod titles;

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Deserialize;

use crate::status::{SubflowStatus, Task, TaskStatus};
use crate::util::{html_escape, relative_path, to_link};

pub use titles::{notebook_title, resolve_titles, Titles};

const NODE_WIDTH: u32 = 240;
const NODE_HEIGHT: u32 = 44;
const ROW_GAP: u32 = 28;
const PADDING: u32 = 16;
const GROUP_GAP: u32 = 40;

const ICON_LOCK: &str = "\u{1F512}";
const ICON_DONE: &str = "\u{2705}";
const ICON_LOADING: &str = "\u{23F3}";
const ICON_REPEAT: &str = "\u{1F501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    /// Inactive tasks are hidden.
    #[default]
    Filtered,
    /// Inactive tasks are drawn with a dotted border.
    Full,
}

#[derive(Debug, Clone)]
pub struct DiagramOptions {
    pub view: View,
    /// Directory the links are made relative to.
    pub current_dir: PathBuf,
    /// Directory holding the subflow's working task notebooks.
    pub task_dir: PathBuf,
}

struct Node<'a> {
    task: &'a Task,
    title: &'a str,
    x: u32,
    y: u32,
}

/// Render `sf` as a standalone SVG document.
pub fn render_svg(sf: &SubflowStatus, titles: &Titles, options: &DiagramOptions) -> String {
    let left = place(sf, &sf.order.sequence, titles, options.view, PADDING * 2);
    let right_x = PADDING * 2 + NODE_WIDTH + PADDING * 2 + GROUP_GAP;
    let right = place(sf, &sf.order.whenever, titles, options.view, right_x);

    let rows = left.len().max(right.len()).max(1) as u32;
    let group_height = rows * NODE_HEIGHT + (rows - 1) * ROW_GAP + PADDING * 2;
    let width = right_x + NODE_WIDTH + PADDING;
    let height = group_height + PADDING * 2;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="14">"#,
        w = width,
        h = height
    );
    svg.push_str(
        r##"<defs><marker id="arrow" viewBox="0 0 10 10" refX="10" refY="5" markerWidth="8" markerHeight="8" orient="auto-start-reverse"><path d="M 0 0 L 10 5 L 0 10 z" fill="#555"/></marker></defs>"##,
    );

    svg.push_str(r#"<g class="sequence">"#);
    let _ = write!(
        svg,
        r##"<rect x="{}" y="{}" width="{}" height="{}" rx="10" fill="#f3f6fa" stroke="#c9d3e0"/>"##,
        PADDING,
        PADDING,
        NODE_WIDTH + PADDING * 2,
        group_height
    );
    for pair in left.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        let x = from.x + NODE_WIDTH / 2;
        let _ = write!(
            svg,
            r##"<line class="edge" x1="{x}" y1="{}" x2="{x}" y2="{}" stroke="#555" marker-end="url(#arrow)"/>"##,
            from.y + NODE_HEIGHT,
            to.y,
            x = x
        );
    }
    for node in &left {
        draw_node(&mut svg, node, options);
    }
    svg.push_str("</g>");

    svg.push_str(r#"<g class="whenever">"#);
    for node in &right {
        draw_node(&mut svg, node, options);
    }
    svg.push_str("</g></svg>");
    svg
}

fn place<'a>(
    sf: &'a SubflowStatus,
    ids: &[String],
    titles: &'a Titles,
    view: View,
    x: u32,
) -> Vec<Node<'a>> {
    ids.iter()
        .filter_map(|id| sf.task(id))
        .filter(|task| view == View::Full || task.active)
        .enumerate()
        .map(|(row, task)| Node {
            task,
            title: titles
                .get(&task.id)
                .map(String::as_str)
                .unwrap_or(&task.name),
            x,
            y: PADDING * 2 + row as u32 * (NODE_HEIGHT + ROW_GAP),
        })
        .collect()
}

fn draw_node(svg: &mut String, node: &Node<'_>, options: &DiagramOptions) {
    let task = node.task;
    let (icon, fill, text_fill) = match task.status {
        TaskStatus::Unfeasible => (Some(ICON_LOCK), "#e0e0e0", "#888888"),
        TaskStatus::Done => (Some(ICON_DONE), "#e3f4e1", "#222222"),
        TaskStatus::Doing => (Some(ICON_LOADING), "#fff4d6", "#222222"),
        TaskStatus::Unexecuted => (None, "#ffffff", "#222222"),
    };
    let dash = if task.active {
        ""
    } else {
        r#" stroke-dasharray="4 3""#
    };

    let mut label = String::new();
    if let Some(icon) = icon {
        label.push_str(icon);
        label.push(' ');
    }
    label.push_str(node.title);
    if task.is_multiple {
        label.push(' ');
        label.push_str(ICON_REPEAT);
    }

    let href = link(task, options);
    if let Some(href) = &href {
        let _ = write!(svg, r#"<a href="{}">"#, html_escape(href));
    }
    let _ = write!(
        svg,
        r##"<g class="task task-{}" id="task-{}"><rect x="{}" y="{}" width="{}" height="{}" rx="6" fill="{}" stroke="#555"{}/><text x="{}" y="{}" fill="{}" dominant-baseline="middle">{}</text></g>"##,
        task.status.as_str(),
        html_escape(&task.id),
        node.x,
        node.y,
        NODE_WIDTH,
        NODE_HEIGHT,
        fill,
        dash,
        node.x + 12,
        node.y + NODE_HEIGHT / 2,
        text_fill,
        html_escape(&label)
    );
    if href.is_some() {
        svg.push_str("</a>");
    }
}

/// Link to the task's working notebook; locked and inactive tasks have none.
fn link(task: &Task, options: &DiagramOptions) -> Option<String> {
    if task.status == TaskStatus::Unfeasible || !task.active {
        return None;
    }
    let target = options.task_dir.join(format!("{}.ipynb", task.name));
    let rel = to_link(&relative_path(&options.current_dir, &target));
    Some(if task.status == TaskStatus::Done {
        format!("{}?reset=1", rel)
    } else {
        rel
    })
}
