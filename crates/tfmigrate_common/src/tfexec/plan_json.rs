//! Structured projection of `terraform show -json` plan output.
//!
//! Only the shapes the classifier relies on are typed (`resource_changes`,
//! `output_changes`, and each change's `actions`/`before`/`after`); the
//! before/after payloads stay dynamic `serde_json::Value`s so the model
//! survives plan format-version bumps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute names that count as "tags" for the tag-only update heuristic.
///
/// These are the AWS-style conventions; providers with other tag-key naming
/// will not be recognized as tag-only.
const TAG_FIELDS: [&str; 6] = [
    "tags",
    "tags_all",
    "tag",
    "user_tags",
    "system_tags",
    "default_tags",
];

/// A terraform plan in JSON format (format version 1.x).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanJson {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
    #[serde(default)]
    pub output_changes: BTreeMap<String, OutputChange>,
}

/// A planned change to one resource instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChange {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub module_address: Option<String>,
    #[serde(default)]
    pub mode: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub index: Option<Value>,
    #[serde(default)]
    pub deposed: Option<String>,
    #[serde(default)]
    pub action_reason: Option<String>,
    #[serde(default)]
    pub change: Change,
}

/// A planned change to one output value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputChange {
    #[serde(default)]
    pub change: Change,
}

/// The action list and before/after payloads of a change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
}

impl Change {
    /// `actions == ["no-op"]` means terraform plans to do nothing.
    pub fn is_no_op(&self) -> bool {
        self.actions.len() == 1 && self.actions[0] == "no-op"
    }

    fn is_exactly(&self, action: &str) -> bool {
        self.actions.len() == 1 && self.actions[0] == action
    }
}

impl PlanJson {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Any resource change whose actions are not exactly `["no-op"]`.
    pub fn has_changes(&self) -> bool {
        self.resource_changes.iter().any(|rc| !rc.change.is_no_op())
    }

    /// Output changes present, and no resource changes at all.
    pub fn has_only_output_changes(&self) -> bool {
        !self.output_changes.is_empty() && !self.has_changes()
    }

    /// Every non-no-op resource change is exactly `["create"]`.
    pub fn has_only_create_actions(&self) -> bool {
        self.resource_changes
            .iter()
            .filter(|rc| !rc.change.is_no_op())
            .all(|rc| rc.change.is_exactly("create"))
    }

    /// Every non-no-op resource change is a create, or an update that only
    /// touches tag attributes. These are the changes that cannot damage real
    /// resources when permitted on the destination side of a move.
    pub fn has_only_safe_actions(&self) -> bool {
        self.resource_changes
            .iter()
            .filter(|rc| !rc.change.is_no_op())
            .all(|rc| {
                rc.change.is_exactly("create")
                    || (rc.change.is_exactly("update") && is_tag_only_change(rc))
            })
    }

    /// Human-readable report of every non-no-op resource change, with a
    /// per-change ACCEPTED/REJECTED status under the given acceptance rules.
    /// The rendering is for the log only; the decision never depends on it.
    pub fn render_resource_changes(&self, allow_create: bool, state_label: &str) -> String {
        let changes: Vec<&ResourceChange> = self
            .resource_changes
            .iter()
            .filter(|rc| !rc.change.is_no_op())
            .collect();
        if changes.is_empty() {
            return "no resource changes detected".to_string();
        }

        let mut out = String::new();
        for (i, rc) in changes.iter().enumerate() {
            let status = if rc.change.is_exactly("create") {
                if allow_create {
                    "ACCEPTED".to_string()
                } else {
                    format!("REJECTED (create not allowed in {state_label} state)")
                }
            } else if rc.change.is_exactly("update") && is_tag_only_change(rc) {
                "ACCEPTED (tag-only change)".to_string()
            } else if allow_create {
                format!("REJECTED (non-safe action in {state_label} state)")
            } else {
                format!("REJECTED (unexpected change in {state_label} state)")
            };

            out.push_str(&format!("resource #{}: {}\n", i + 1, rc.address));
            out.push_str(&format!("  type: {}  mode: {}\n", rc.resource_type, rc.mode));
            out.push_str(&format!("  actions: [{}]\n", rc.change.actions.join(", ")));
            out.push_str(&format!("  status: {status}\n"));
            if let Some(index) = &rc.index {
                out.push_str(&format!("  index: {index}\n"));
            }
            if let Some(reason) = &rc.action_reason {
                out.push_str(&format!("  reason: {reason}\n"));
            }
            if rc.change.before != rc.change.after {
                out.push_str("  changes:\n");
                out.push_str(&indent(&render_value_diff(&rc.change.before, &rc.change.after), "    "));
            }
        }
        out.trim_end().to_string()
    }

    /// Human-readable report of output changes.
    pub fn render_output_changes(&self) -> String {
        if self.output_changes.is_empty() {
            return "no output changes detected".to_string();
        }
        let mut out = String::new();
        for (name, oc) in &self.output_changes {
            out.push_str(&format!(
                "output {}: actions: [{}]\n",
                name,
                oc.change.actions.join(", ")
            ));
            if oc.change.before != oc.change.after {
                out.push_str(&indent(&render_value_diff(&oc.change.before, &oc.change.after), "  "));
            }
        }
        out.trim_end().to_string()
    }
}

/// True when the difference between before and after is confined to tag
/// attributes. Both sides must be mappings; added and removed keys count as
/// differences; value comparison is structural deep equality.
fn is_tag_only_change(rc: &ResourceChange) -> bool {
    let (Some(before), Some(after)) = (rc.change.before.as_object(), rc.change.after.as_object())
    else {
        return false;
    };

    for (key, before_val) in before {
        let differs = match after.get(key) {
            Some(after_val) => before_val != after_val,
            None => true,
        };
        if differs && !TAG_FIELDS.contains(&key.as_str()) {
            return false;
        }
    }

    for key in after.keys() {
        if !before.contains_key(key) && !TAG_FIELDS.contains(&key.as_str()) {
            return false;
        }
    }

    true
}

/// Structural diff of two JSON values: a per-key listing when both sides are
/// objects, a plain before/after rendering otherwise.
fn render_value_diff(before: &Value, after: &Value) -> String {
    match (before.as_object(), after.as_object()) {
        (Some(before), Some(after)) => {
            let mut out = String::new();
            for (key, b) in before {
                match after.get(key) {
                    Some(a) if a == b => {}
                    Some(a) => {
                        out.push_str(&format!("~ {key}: {} => {}\n", compact(b), compact(a)));
                    }
                    None => out.push_str(&format!("- {key}: {}\n", compact(b))),
                }
            }
            for (key, a) in after {
                if !before.contains_key(key) {
                    out.push_str(&format!("+ {key}: {}\n", compact(a)));
                }
            }
            out
        }
        _ => format!("- {}\n+ {}\n", compact(before), compact(after)),
    }
}

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

fn indent(text: &str, prefix: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}
