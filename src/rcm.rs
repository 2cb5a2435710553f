//! Risk-and-control matrix (RCM) input format and its flattening into
//! indexable items.
//!
//! An RCM file is a JSON array of processes. Each process lists one or
//! more standard groups, and each group carries standards (with their
//! requirements), controls, and risks:
//!
//! ```json
//! [{
//!   "process_name": "Access Management",
//!   "list_standards": [{
//!     "standard": [{ "name": "...", "description": "...",
//!                    "requirements": [{ "name": "...", "description": "..." }] }],
//!     "controls": [{ "name": "...", "description": "...", "standard_id": "..." }],
//!     "risks":    [{ "name": "...", "description": "...", "control_id": "..." }]
//!   }]
//! }]
//! ```

use anyhow::{Context, Result};
use gap_harness_core::models::Collection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub process_name: String,
    #[serde(default)]
    pub list_standards: Vec<StandardGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardGroup {
    #[serde(default)]
    pub standard: Vec<Standard>,
    #[serde(default)]
    pub controls: Vec<Control>,
    #[serde(default)]
    pub risks: Vec<Risk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<NamedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_id: Option<String>,
}

/// One row destined for the `items` table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexItem {
    pub id: String,
    pub collection: Collection,
    pub name: String,
    /// Text that is embedded and matched against queries.
    pub document: String,
    /// Returned with each hit; standards use it in their fact text.
    pub description: String,
    pub metadata: Map<String, Value>,
}

pub fn load_rcm(path: &Path) -> Result<Vec<Process>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read RCM file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse RCM file: {}", path.display()))
}

/// `PREFIX_pp_nnn`
fn item_id(prefix: &str, process_index: usize, item_index: usize) -> String {
    format!("{}_{:02}_{:03}", prefix, process_index, item_index)
}

fn metadata(pairs: &[(&str, Option<&str>)]) -> Map<String, Value> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), json!(v))))
        .collect()
}

/// Flatten processes into items across all five collections.
///
/// Item counters run per process across all of its standard groups, so
/// ids stay unique when a process has several groups or standards.
pub fn flatten(processes: &[Process]) -> Vec<IndexItem> {
    let mut items = Vec::new();

    for (p, process) in processes.iter().enumerate() {
        let process_id = item_id("PROC", p, 0);
        items.push(IndexItem {
            id: process_id.clone(),
            collection: Collection::Processes,
            name: process.process_name.clone(),
            document: process.process_name.clone(),
            description: process.process_name.clone(),
            metadata: metadata(&[("description", Some(process.process_name.as_str()))]),
        });

        let (mut s, mut r, mut c, mut k) = (0, 0, 0, 0);
        for group in &process.list_standards {
            for standard in &group.standard {
                let standard_id = item_id("STD", p, s);
                s += 1;
                items.push(IndexItem {
                    id: standard_id.clone(),
                    collection: Collection::Standards,
                    name: standard.name.clone(),
                    document: standard.name.clone(),
                    description: standard.description.clone(),
                    metadata: metadata(&[
                        ("process_id", Some(process_id.as_str())),
                        ("description", Some(standard.description.as_str())),
                        ("source_id", standard.id.as_deref()),
                    ]),
                });

                for requirement in &standard.requirements {
                    items.push(IndexItem {
                        id: item_id("REQ", p, r),
                        collection: Collection::Requirements,
                        name: requirement.name.clone(),
                        document: requirement.description.clone(),
                        description: String::new(),
                        metadata: metadata(&[
                            ("standard_id", Some(standard_id.as_str())),
                            ("process_id", Some(process_id.as_str())),
                            ("name", Some(requirement.name.as_str())),
                            ("source_id", requirement.id.as_deref()),
                        ]),
                    });
                    r += 1;
                }
            }

            for control in &group.controls {
                items.push(IndexItem {
                    id: item_id("CTRL", p, c),
                    collection: Collection::Controls,
                    name: control.name.clone(),
                    document: control.description.clone(),
                    description: String::new(),
                    metadata: metadata(&[
                        ("standard_id", control.standard_id.as_deref()),
                        ("process_id", Some(process_id.as_str())),
                        ("name", Some(control.name.as_str())),
                        ("source_id", control.id.as_deref()),
                    ]),
                });
                c += 1;
            }

            for risk in &group.risks {
                items.push(IndexItem {
                    id: item_id("RISK", p, k),
                    collection: Collection::Risks,
                    name: risk.name.clone(),
                    document: risk.description.clone(),
                    description: String::new(),
                    metadata: metadata(&[
                        ("control_id", risk.control_id.as_deref()),
                        ("process_id", Some(process_id.as_str())),
                        ("name", Some(risk.name.as_str())),
                        ("source_id", risk.id.as_deref()),
                    ]),
                });
                k += 1;
            }
        }
    }

    items
}
