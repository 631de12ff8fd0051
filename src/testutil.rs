//! Temporary research workspaces for tests.

use serde_json::{json, Value};
use tempfile::TempDir;

use crate::layout::{Layout, ReservedFile, SUBFLOW_NAME_PLACEHOLDER};
use crate::status::{StatusStore, DEFAULT_PHASES};

/// A workspace with a template bundle per phase, task notebooks and a task
/// mapping keyed on `dmp.storage`.
pub struct Workspace {
    pub temp: TempDir,
    pub store: StatusStore,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = Layout::new(temp.path());
        for phase in DEFAULT_PHASES {
            write_phase_templates(&layout, phase);
        }
        write_notebook(&layout, "plan/plan_dmp", "Plan the data management");
        write_notebook(&layout, "common/collect", "Collect data");
        write_notebook(&layout, "dmp/upload_data", "Upload to cloud storage");
        write_notebook(&layout, "dmp/archive_data", "Archive locally");
        write_value(&layout.task_mapping(), &task_mapping());

        let store = StatusStore::new(layout);
        store.init_research_flow(&DEFAULT_PHASES).expect("init research flow");
        Self { temp, store }
    }

    pub fn layout(&self) -> &Layout {
        self.store.layout()
    }

    pub fn preparation_id(&self) -> String {
        let rf = self.store.read_rf().expect("read rf");
        rf.preparation().expect("preparation phase").sub_flows[0].id.clone()
    }
}

pub fn task_mapping() -> Value {
    json!({
        "dmp": {
            "storage": [
                { "value": "cloud", "display": ["upload"], "hide": ["archive"] },
                { "value": "local", "display": ["archive"], "hide": ["upload"] }
            ]
        }
    })
}

pub fn sheet(storage: &str) -> Value {
    json!({ "dmp": { "storage": storage } })
}

pub fn sheet_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "dmp": {
                "type": "object",
                "properties": { "storage": { "enum": ["cloud", "local"] } }
            }
        }
    })
}

fn write_phase_templates(layout: &Layout, phase: &str) {
    std::fs::create_dir_all(layout.base_subflow_dir(phase)).expect("template dir");
    let menu = json!({
        "cells": [{
            "cell_type": "markdown",
            "metadata": {},
            "source": [format!("# {}\n", SUBFLOW_NAME_PLACEHOLDER)]
        }],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5
    });
    write_value(&layout.base_template(phase, ReservedFile::Menu), &menu);
    write_value(
        &layout.base_template(phase, ReservedFile::Property),
        &json!({ "phase": phase }),
    );
    write_value(
        &layout.base_template(phase, ReservedFile::Status),
        &status_template(phase),
    );
}

fn status_template(phase: &str) -> Value {
    if phase == DEFAULT_PHASES[0] {
        return json!({
            "is_completed": false,
            "order": { "sequence": ["plan_dmp"], "whenever": [] },
            "tasks": [task_json("plan_dmp", "plan_dmp", true, &[])]
        });
    }
    json!({
        "is_completed": false,
        "order": { "sequence": ["collect", "upload"], "whenever": ["archive"] },
        "tasks": [
            task_json("collect", "collect", true, &[]),
            task_json("upload", "upload_data", false, &["collect"]),
            task_json("archive", "archive_data", false, &["collect"])
        ]
    })
}

fn task_json(id: &str, name: &str, required: bool, deps: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "is_multiple": false,
        "is_required": required,
        "completed_count": 0,
        "dependent_task_ids": deps,
        "status": if deps.is_empty() { "unexecuted" } else { "unfeasible" },
        "execution_environments": [],
        "disabled": false,
        "active": true
    })
}

fn write_notebook(layout: &Layout, rel: &str, title: &str) {
    let path = layout.base_task_dir().join(format!("{}.ipynb", rel));
    let notebook = json!({
        "cells": [{
            "cell_type": "markdown",
            "metadata": {},
            "source": [format!("# {}\n", title), "Details.\n"]
        }],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5
    });
    write_value(&path, &notebook);
}

fn write_value(path: &std::path::Path, value: &Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("parent dir");
    }
    let text = serde_json::to_string_pretty(value).expect("serialize");
    std::fs::write(path, text).expect("write fixture");
}
