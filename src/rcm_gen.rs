//! Synthetic risk-and-control matrices (`gap rcm generate`).
//!
//! Two model stages: a business description becomes a list of processes,
//! then each process becomes one RCM body (standards with requirements,
//! controls, risks). The output is the file `gap index` reads.

use std::path::Path;

use anyhow::{bail, Context, Result};
use gap_harness_core::error::ModelInvocationError;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::ChatClient;
use crate::rcm::{Process, StandardGroup};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessSummary {
    pub name: String,
    pub description: String,
}

#[derive(Deserialize)]
struct ProcessList {
    processes: Vec<ProcessSummary>,
}

#[derive(Deserialize)]
struct GeneratedRcm {
    list_standards: Vec<StandardGroup>,
}

const PROCESS_SYSTEM_PROMPT: &str = "You are an expert business analyst with extensive knowledge of \
     various industries and business processes. Your task is to analyze the given business context \
     and identify the most relevant business processes.";

const RCM_SYSTEM_PROMPT: &str = "You are an expert auditor with extensive knowledge of risk management \
     and compliance. Given a process name, analyze the process thoroughly: its scope, objectives, and \
     potential impact on the organization. Identify the industry standards, regulations, and practices \
     that apply to it, and the risks, vulnerabilities, and control points within it. Produce a realistic \
     Risk Control Matrix (RCM) that reflects the process accurately, gives actionable insight for risk \
     mitigation, aligns with regulatory requirements, and keeps standards, controls, and risks logically \
     connected.";

fn process_prompt(business_context: &str) -> String {
    format!(
        "As an expert business analyst, generate a comprehensive list of business processes based on \
         the following business context:\n\n{}\n\n\
         For each process:\n\
         1. Provide a clear, concise name for the process.\n\
         2. Include a brief description of the process and its importance to the business.\n\n\
         Generate 5-10 key processes that are most relevant to the given business context.",
        business_context.trim()
    )
}

fn rcm_prompt(process_name: &str) -> String {
    format!(
        "As an expert auditor, generate a comprehensive and detailed Risk Control Matrix (RCM) for the \
         process: {name}.\n\n\
         1. Standard:\n\
         - Provide 2-3 relevant industry standards or regulatory frameworks.\n\
         - Include a detailed description of the purpose and applicability of each.\n\
         - Assign a unique ID following the format STD-XXXX.\n\
         - For each standard, provide 2-3 specific requirements with a unique ID (REQ-XXXX), a name, \
         and a description of the requirement, its key principles, and why it matters to the process.\n\n\
         2. Controls:\n\
         - Develop 2-3 specific, measurable controls that address key aspects of the process.\n\
         - For each control give a clear, actionable description, how it mitigates risks, and the \
         frequency of implementation or monitoring.\n\
         - Assign a unique ID following the format CTRL-XXXX and reference the standard it belongs to.\n\n\
         3. Risks:\n\
         - Identify 2-3 significant risks for the process.\n\
         - For each risk describe the potential impact on the organization, how it relates to the \
         associated control, and the consequences if not addressed.\n\
         - Assign a unique ID following the format RSK-XXXX and reference the control that addresses it.\n\n\
         Ensure all elements are logically connected and provide a cohesive framework for managing risks \
         within the {name} process. Use industry-specific terminology where applicable.",
        name = process_name
    )
}

/// Strict object schema: every property is required.
fn object_schema(properties: Value) -> Value {
    let required: Vec<Value> = properties
        .as_object()
        .map(|props| props.keys().map(|k| json!(k)).collect())
        .unwrap_or_default();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn text(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn array_of(description: &str, items: Value) -> Value {
    json!({ "type": "array", "description": description, "items": items })
}

pub fn process_list_schema() -> Value {
    object_schema(json!({
        "processes": array_of(
            "List of business processes",
            object_schema(json!({
                "name": text("The name of the business process"),
                "description": text("A brief description of the business process"),
            })),
        ),
    }))
}

pub fn rcm_schema() -> Value {
    let requirement = object_schema(json!({
        "id": text("The ID of the standard requirement"),
        "name": text("The name of the standard requirement"),
        "description": text("The description of the standard requirement, including the key principles and why they are important to the process"),
    }));
    let standard = object_schema(json!({
        "id": text("The ID of the standard"),
        "name": text("The name of the standard"),
        "description": text("The description of the standard, including the purpose and applicability, and the key principles and requirements"),
        "requirements": array_of("The standard requirements that belong to the standard", requirement),
    }));
    let control = object_schema(json!({
        "id": text("The ID of the control"),
        "name": text("The name of the control"),
        "description": text("The description of the control, including the frequency of implementation or monitoring, and how it mitigates risks"),
        "standard_id": text("The ID of the standard that the control belongs to"),
    }));
    let risk = object_schema(json!({
        "id": text("The ID of the risk"),
        "name": text("The name of the risk"),
        "description": text("The description of the risk, including the potential impact on the organization and the consequences if not addressed"),
        "control_id": text("The ID of the control that addresses the risk"),
    }));
    let group = object_schema(json!({
        "standard": array_of("The standards that apply to the process", standard),
        "controls": array_of("The controls that belong to the standards", control),
        "risks": array_of("The risks that the controls address", risk),
    }));

    object_schema(json!({
        "process_name": text("The name of the process"),
        "list_standards": array_of("The risk control matrices for the process", group),
    }))
}

pub async fn generate_process_list(
    client: &ChatClient,
    business_context: &str,
) -> Result<Vec<ProcessSummary>, ModelInvocationError> {
    let list: ProcessList = client
        .complete_json(
            PROCESS_SYSTEM_PROMPT,
            &process_prompt(business_context),
            "ProcessList",
            &process_list_schema(),
        )
        .await?;
    Ok(list
        .processes
        .into_iter()
        .filter(|p| !p.name.trim().is_empty())
        .collect())
}

/// RCM body for one process. The process name is kept as requested, not
/// as echoed back by the model.
pub async fn generate_process_rcm(
    client: &ChatClient,
    process_name: &str,
) -> Result<Process, ModelInvocationError> {
    let generated: GeneratedRcm = client
        .complete_json(RCM_SYSTEM_PROMPT, &rcm_prompt(process_name), "BodyRCMs", &rcm_schema())
        .await?;
    Ok(Process {
        process_name: process_name.to_string(),
        list_standards: generated.list_standards,
    })
}

/// One RCM per process, in order. A failed generation keeps the process
/// with no standards.
pub async fn generate_all(client: &ChatClient, processes: &[ProcessSummary]) -> Vec<Process> {
    let mut out = Vec::with_capacity(processes.len());
    for (i, summary) in processes.iter().enumerate() {
        match generate_process_rcm(client, &summary.name).await {
            Ok(process) => {
                info!(
                    process = %summary.name,
                    n = i + 1,
                    total = processes.len(),
                    "rcm generated"
                );
                out.push(process);
            }
            Err(e) => {
                warn!(process = %summary.name, error = %e, "rcm generation failed");
                out.push(Process {
                    process_name: summary.name.clone(),
                    list_standards: Vec::new(),
                });
            }
        }
    }
    out
}

/// `--context` accepts either a file path or the description itself.
pub fn business_context(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    let text = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read business context: {}", path.display()))?
    } else {
        arg.to_string()
    };
    if text.trim().is_empty() {
        bail!("Business context is empty");
    }
    Ok(text)
}

#[derive(Debug, Default, PartialEq)]
struct RcmCounts {
    standards: usize,
    requirements: usize,
    controls: usize,
    risks: usize,
}

fn counts(processes: &[Process]) -> RcmCounts {
    let mut c = RcmCounts::default();
    for group in processes.iter().flat_map(|p| &p.list_standards) {
        c.standards += group.standard.len();
        c.requirements += group.standard.iter().map(|s| s.requirements.len()).sum::<usize>();
        c.controls += group.controls.len();
        c.risks += group.risks.len();
    }
    c
}

pub async fn run_generate(config: &Config, context: &str, output: Option<&Path>) -> Result<()> {
    let Some(client) = ChatClient::from_config(&config.model)? else {
        bail!("Model provider is disabled. Set [model] provider in config.");
    };
    let business_context = business_context(context)?;
    let output = output.unwrap_or(&config.inputs.rcm);

    let summaries = generate_process_list(&client, &business_context)
        .await
        .context("Process list generation failed")?;
    if summaries.is_empty() {
        bail!("The model returned no business processes");
    }
    info!(processes = summaries.len(), "process list generated");

    let processes = generate_all(&client, &summaries).await;
    let json = serde_json::to_string_pretty(&processes)?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write RCM file: {}", output.display()))?;

    let c = counts(&processes);
    let empty = processes.iter().filter(|p| p.list_standards.is_empty()).count();
    println!("rcm generate ({})", client.model());
    println!("  processes: {}", processes.len());
    println!("  standards: {}", c.standards);
    println!("  requirements: {}", c.requirements);
    println!("  controls: {}", c.controls);
    println!("  risks: {}", c.risks);
    if empty > 0 {
        println!("  failed processes: {}", empty);
    }
    println!("  saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::rcm::{flatten, load_rcm};
    use gap_harness_core::models::Collection;
    use tempfile::TempDir;

    const BODY: &str = r#"{
      "process_name": "echoed by the model",
      "list_standards": [{
        "standard": [{
          "id": "STD-0001", "name": "ISO 27001", "description": "Information security management",
          "requirements": [
            { "id": "REQ-0001", "name": "Access policy", "description": "Maintain an access control policy" }
          ]
        }],
        "controls": [
          { "id": "CTRL-0001", "name": "Quarterly review", "description": "Review access quarterly", "standard_id": "STD-0001" }
        ],
        "risks": [
          { "id": "RSK-0001", "name": "Privilege creep", "description": "Users keep access they no longer need", "control_id": "CTRL-0001" }
        ]
      }]
    }"#;

    fn all_objects_are_strict(schema: &Value) {
        if schema["type"] == "object" {
            assert_eq!(schema["additionalProperties"], json!(false));
            let props: Vec<&String> = schema["properties"].as_object().unwrap().keys().collect();
            let required: Vec<&str> = schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap())
                .collect();
            assert_eq!(props.len(), required.len());
            for (_, child) in schema["properties"].as_object().unwrap() {
                all_objects_are_strict(child);
            }
        }
        if schema["type"] == "array" {
            all_objects_are_strict(&schema["items"]);
        }
    }

    #[test]
    fn schemas_are_strict_all_the_way_down() {
        all_objects_are_strict(&process_list_schema());
        all_objects_are_strict(&rcm_schema());
        assert_eq!(
            rcm_schema()["properties"]["list_standards"]["items"]["properties"]["risks"]["items"]
                ["required"],
            json!(["control_id", "description", "id", "name"])
        );
    }

    #[test]
    fn generated_body_flattens_into_the_index() {
        let generated: GeneratedRcm = serde_json::from_str(BODY).unwrap();
        let process = Process {
            process_name: "Access Management".into(),
            list_standards: generated.list_standards,
        };
        let items = flatten(&[process]);
        assert_eq!(items.len(), 5);
        let control = items.iter().find(|i| i.collection == Collection::Controls).unwrap();
        assert_eq!(control.document, "Review access quarterly");
        assert_eq!(control.metadata["standard_id"], json!("STD-0001"));
    }

    #[test]
    fn written_file_round_trips_through_load_rcm() {
        let dir = TempDir::new().unwrap();
        let generated: GeneratedRcm = serde_json::from_str(BODY).unwrap();
        let processes = vec![
            Process {
                process_name: "Access Management".into(),
                list_standards: generated.list_standards,
            },
            Process {
                process_name: "Vendor Risk".into(),
                list_standards: vec![],
            },
        ];
        let path = dir.path().join("rcm_output.json");
        std::fs::write(&path, serde_json::to_string_pretty(&processes).unwrap()).unwrap();

        let loaded = load_rcm(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].list_standards[0].risks[0].control_id.as_deref(), Some("CTRL-0001"));
        assert!(loaded[1].list_standards.is_empty());
        assert_eq!(
            counts(&loaded),
            RcmCounts {
                standards: 1,
                requirements: 1,
                controls: 1,
                risks: 1
            }
        );
    }

    #[test]
    fn process_list_parses() {
        let raw = r#"{"processes":[{"name":"Campaign Analytics","description":"Measure ROI"},{"name":" ","description":""}]}"#;
        let list: ProcessList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.processes.len(), 2);
        assert_eq!(list.processes[0].name, "Campaign Analytics");
    }

    #[test]
    fn context_reads_file_or_takes_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("business.txt");
        std::fs::write(&path, "A startup selling ad optimisation").unwrap();
        assert_eq!(
            business_context(path.to_str().unwrap()).unwrap(),
            "A startup selling ad optimisation"
        );
        assert_eq!(business_context("A regional bank").unwrap(), "A regional bank");
        assert!(business_context("   ").is_err());
    }

    #[test]
    fn prompts_carry_their_inputs() {
        assert!(process_prompt("  ByteBoost sells AI marketing  ").contains("\n\nByteBoost sells AI marketing\n\n"));
        assert!(rcm_prompt("Payroll").contains("for the process: Payroll."));
    }

    #[tokio::test]
    async fn failed_generation_keeps_process_without_standards() {
        let config = ModelConfig {
            provider: "ollama".into(),
            url: Some("http://127.0.0.1:9".into()),
            max_retries: 0,
            timeout_secs: 1,
            ..Default::default()
        };
        let client = ChatClient::from_config(&config).unwrap().unwrap();
        let summaries = vec![ProcessSummary {
            name: "Payroll".into(),
            description: "Pay staff".into(),
        }];
        let processes = generate_all(&client, &summaries).await;
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].process_name, "Payroll");
        assert!(processes[0].list_standards.is_empty());
    }
}
