use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::protocol::FimpMessage;

pub enum MessageLogMode {
    /// Every fetched tree is written in full.
    Full,
    /// The first tree in full, then only the JSON paths that changed.
    Diffed,
}

/// NDJSON trace of everything crossing the adapter's two boundaries.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_tree: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_tree: None,
        })
    }

    pub fn log_inbound(&mut self, topic: &str, msg: &FimpMessage) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "in",
            "topic": topic,
            "type": msg.msg_type,
            "serv": msg.serv,
            "val": msg.val,
        });
        self.write_line(&entry);
    }

    pub fn log_outbound(&mut self, topic: &str, msg: &FimpMessage) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "out",
            "topic": topic,
            "type": msg.msg_type,
            "serv": msg.serv,
            "val": msg.val,
            "corid": msg.corid,
        });
        self.write_line(&entry);
    }

    pub fn log_fetch_error(&mut self, error: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "poll",
            "error": error,
        });
        self.write_line(&entry);
    }

    pub fn log_tree(&mut self, tree: &Value) {
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "poll",
                    "body": tree,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                let entry = match &self.previous_tree {
                    None => json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "poll",
                        "full": true,
                        "body": tree,
                    }),
                    Some(prev) => {
                        let mut changes = Vec::new();
                        diff_json(prev, tree, "", &mut changes);
                        let change_entries: Vec<Value> = changes
                            .iter()
                            .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                            .collect();
                        json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "poll",
                            "changes": change_entries,
                        })
                    }
                };
                self.write_line(&entry);
                self.previous_tree = Some(tree.clone());
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write message log entry: {e}");
        }
    }
}

/// Collect `(path, old, new)` for every leaf that differs. Arrays are
/// addressed by index.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    let join = |key: &str| {
        if path_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{path_prefix}.{key}")
        }
    };
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join(key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None if curr_val.is_object() => {
                        diff_json(&Value::Object(Map::new()), curr_val, &path, changes)
                    }
                    None => changes.push((path, Value::Null, curr_val.clone())),
                }
            }
        }
        (Value::Array(prev_arr), Value::Array(curr_arr)) if prev_arr.len() == curr_arr.len() => {
            for (i, (prev_val, curr_val)) in prev_arr.iter().zip(curr_arr).enumerate() {
                diff_json(prev_val, curr_val, &join(&i.to_string()), changes);
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}
