//! Task titles taken from the first markdown heading of each notebook.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::layout::{Layout, SubflowKey};
use crate::status::SubflowStatus;
use crate::subflow::find_task_template;

/// Task id → display title.
pub type Titles = BTreeMap<String, String>;

/// First `# ` heading of a notebook's markdown cells.
pub fn notebook_title(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let notebook: Value = serde_json::from_str(&text).ok()?;
    let cells = notebook.get("cells")?.as_array()?;

    cells
        .iter()
        .filter(|c| c.get("cell_type").and_then(Value::as_str) == Some("markdown"))
        .filter_map(|c| cell_source(c.get("source")?))
        .flat_map(|src| {
            src.lines()
                .map(str::trim)
                .filter_map(|l| l.strip_prefix("# "))
                .map(|t| t.trim().to_string())
                .collect::<Vec<_>>()
        })
        .find(|t| !t.is_empty())
}

fn cell_source(source: &Value) -> Option<String> {
    match source {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(parts.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

/// Resolve a title for every task of `sf`.
///
/// The working copy is preferred; inactive tasks have none, so the template
/// is read instead. Tasks without a readable heading fall back to their name.
pub fn resolve_titles(layout: &Layout, key: SubflowKey<'_>, sf: &SubflowStatus) -> Titles {
    let base_task_dir = layout.base_task_dir();
    sf.tasks
        .iter()
        .map(|task| {
            let working = layout.task_notebook(key, &task.name);
            let title = notebook_title(&working)
                .or_else(|| {
                    find_task_template(&base_task_dir, &task.name)
                        .and_then(|p| notebook_title(&p))
                })
                .unwrap_or_else(|| task.name.clone());
            (task.id.clone(), title)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subflow::prepare_subflow;
    use crate::testutil::Workspace;

    #[test]
    fn heading_from_string_or_array_source() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a.ipynb");
        std::fs::write(
            &path,
            r###"{"cells":[{"cell_type":"code","source":"# not me"},
                {"cell_type":"markdown","source":"intro\n# Real title\n"}]}"###,
        )
        .unwrap();
        assert_eq!(notebook_title(&path).as_deref(), Some("Real title"));

        std::fs::write(
            &path,
            r###"{"cells":[{"cell_type":"markdown","source":["## Sub\n","# Top\n"]}]}"###,
        )
        .unwrap();
        assert_eq!(notebook_title(&path).as_deref(), Some("Top"));
    }

    #[test]
    fn unreadable_notebook_has_no_title() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(notebook_title(&temp.path().join("missing.ipynb")), None);
    }

    #[test]
    fn titles_fall_back_to_templates_for_inactive_tasks() {
        let ws = Workspace::new();
        let key = SubflowKey::new(2, "experiment", "sf-1");
        let mut activation = crate::govsheet::Activation::new();
        activation.insert("upload".into(), false);
        let sf = prepare_subflow(&ws.store, key, "Exp", Some(&activation)).unwrap();

        let titles = resolve_titles(ws.layout(), key, &sf);
        assert_eq!(titles["collect"], "Collect data");
        assert_eq!(titles["upload"], "Upload to cloud storage");
    }
}
