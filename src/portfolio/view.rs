//! Plan view renderer. `render_plan_view` is pure (no filesystem access);
//! `write_plan_view` persists its output, skipping the write when the
//! content already matches what's on disk so the zero-write read path holds
//! for an unchanged plan.

use crate::atomic::{write_atomic, WriteScope};
use crate::canon;
use crate::error::CoreResult;
use crate::layout::Layout;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct PlanView {
    pub json: Value,
    pub markdown: String,
}

/// Pure transform from a plan package's JSON content to view content.
pub fn render_plan_view(plan_id: &str, plan: &Value, quality: Option<&Value>) -> PlanView {
    let universe = plan.get("universe").cloned().unwrap_or(Value::Array(vec![]));
    let weights = plan.get("weights").cloned().unwrap_or(Value::Object(Default::default()));

    let json_view = json!({
        "plan_id": plan_id,
        "universe": universe,
        "weights": weights,
        "quality": quality,
    });

    let mut md = format!("# Portfolio Plan `{plan_id}`\n\n");
    md.push_str("| candidate_id | weight |\n|---|---|\n");
    if let Some(weights_obj) = weights.as_object() {
        let mut rows: Vec<(&String, &Value)> = weights_obj.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        for (id, w) in rows {
            md.push_str(&format!("| {id} | {w} |\n"));
        }
    }
    if let Some(q) = quality {
        md.push_str(&format!("\nGrade: {}\n", q.get("grade").cloned().unwrap_or(Value::Null)));
    }

    PlanView { json: json_view, markdown: md }
}

fn write_if_changed_bytes(scope: &WriteScope, name: &str, bytes: &[u8]) -> CoreResult<()> {
    let path = scope.root_dir().join(name);
    if path.exists() {
        let existing = std::fs::read(&path)?;
        if existing == bytes {
            return Ok(());
        }
    }
    write_atomic(scope, name, bytes)?;
    Ok(())
}

fn write_if_changed_json(scope: &WriteScope, name: &str, value: &Value) -> CoreResult<()> {
    write_if_changed_bytes(scope, name, &canon::to_canonical_bytes(value))
}

pub fn write_plan_view(layout: &Layout, plan_id: &str, view: &PlanView) -> CoreResult<()> {
    let dir = layout.plan_dir(plan_id);
    let scope = WriteScope::exact(
        &dir,
        &["plan_view.json", "plan_view.md", "plan_view_checksums.json", "plan_view_manifest.json"],
    );

    write_if_changed_json(&scope, "plan_view.json", &view.json)?;
    write_if_changed_bytes(&scope, "plan_view.md", view.markdown.as_bytes())?;

    let checksums_value = json!({
        "plan_view.json": canon::sha256_hex(&canon::to_canonical_bytes(&view.json)),
        "plan_view.md": canon::sha256_hex(view.markdown.as_bytes()),
    });
    write_if_changed_json(&scope, "plan_view_checksums.json", &checksums_value)?;

    let mut manifest_value = json!({ "plan_id": plan_id, "files": checksums_value });
    canon::stamp_self_hash(&mut manifest_value, "manifest_sha256")?;
    write_if_changed_json(&scope, "plan_view_manifest.json", &manifest_value)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_pure_and_deterministic() {
        let plan = json!({"universe": ["c1"], "weights": {"c1": 1.0}});
        let v1 = render_plan_view("p1", &plan, None);
        let v2 = render_plan_view("p1", &plan, None);
        assert_eq!(v1.json, v2.json);
        assert_eq!(v1.markdown, v2.markdown);
        assert!(v1.markdown.contains("c1"));
    }
}
