//! Deterministic extraction of structured task data from tracker payloads.
//!
//! The tracker exposes a task as a list of typed custom fields. Field names
//! map by exact lookup; missing or malformed fields fall back to defaults
//! and never abort the run. The parser also owns prompt construction: the
//! prompt skeleton that enters the pipeline is a pure function of the
//! parsed record.

use serde_json::Value;

use crate::types::TaskType;

/// One file attached through a files-type custom field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// Structured task record extracted from the tracker's custom fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedTask {
    pub task_type: TaskType,

    pub main_text: Option<String>,
    pub secondary_text: Option<String>,
    pub font: Option<String>,
    pub style_direction: Option<String>,
    pub extra_notes: Option<String>,
    pub brand_website: Option<String>,

    /// Requested output aspect-ratio tags, in selection order.
    pub dimensions: Vec<String>,

    pub logo: Vec<Attachment>,
    pub main_image: Vec<Attachment>,
    pub reference_images: Vec<Attachment>,
    pub additional_images: Vec<Attachment>,
}

impl ParsedTask {
    /// Every image in order: main, additional, reference. Used for the
    /// enhancer's context.
    pub fn all_images(&self) -> Vec<Attachment> {
        let mut all = self.main_image.clone();
        all.extend(self.additional_images.iter().cloned());
        all.extend(self.reference_images.iter().cloned());
        all
    }

    /// Images fed to the image-editing gateway. Reference images are
    /// excluded by contract: they guide the enhancer, never the generator.
    pub fn generation_images(&self) -> Vec<Attachment> {
        let mut images = self.main_image.clone();
        images.extend(self.additional_images.iter().cloned());
        images
    }
}

/// Custom-field parser and prompt builder.
#[derive(Clone, Copy, Debug, Default)]
pub struct TaskParser;

impl TaskParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw task envelope. Never fails: malformed payloads produce a
    /// best-effort `Edit` task and a warning.
    pub fn parse(&self, task: &Value) -> ParsedTask {
        let Some(fields) = task.get("custom_fields").and_then(Value::as_array) else {
            tracing::warn!("task payload carried no custom fields, defaulting to an edit task");
            return ParsedTask::default();
        };

        let field = |name: &str| -> Option<&Value> {
            fields
                .iter()
                .find(|f| f.get("name").and_then(Value::as_str) == Some(name))
        };

        let parsed = ParsedTask {
            task_type: parse_dropdown(field("Task Type")),
            main_text: parse_text(field("Main Text")),
            secondary_text: parse_text(field("Secondary Text")),
            font: parse_text(field("Font")),
            style_direction: parse_text(field("Style Direction")),
            extra_notes: parse_text(field("Extra Notes")),
            brand_website: parse_text(field("Brand Website")),
            dimensions: parse_labels(field("Dimensions")),
            logo: parse_attachments(field("Logo")),
            main_image: parse_attachments(field("Main Image")),
            reference_images: parse_attachments(field("Reference Images")),
            additional_images: parse_attachments(field("Additional Images")),
        };

        tracing::info!(
            task_type = parsed.task_type.as_str(),
            dimensions = ?parsed.dimensions,
            main_images = parsed.main_image.len(),
            references = parsed.reference_images.len(),
            "task parsed"
        );
        parsed
    }

    /// Build the prompt skeleton that enters the pipeline.
    pub fn build_prompt(&self, parsed: &ParsedTask) -> String {
        match parsed.task_type {
            TaskType::Edit => build_edit_prompt(parsed),
            TaskType::Creative => build_creative_prompt(parsed),
        }
    }
}

fn build_edit_prompt(parsed: &ParsedTask) -> String {
    let mut parts = Vec::new();
    match &parsed.extra_notes {
        Some(notes) if !notes.is_empty() => parts.push(notes.clone()),
        _ => parts.push("Edit this image as requested.".to_string()),
    }
    if let Some(text) = &parsed.main_text {
        parts.push(format!("Text to add/change: {text}"));
    }
    parts.join("\n")
}

fn build_creative_prompt(parsed: &ParsedTask) -> String {
    let mut parts = Vec::new();
    if parsed.dimensions.is_empty() {
        parts.push("Create a marketing graphic.".to_string());
    } else {
        parts.push(format!(
            "Create marketing graphics in these dimensions: {}",
            parsed.dimensions.join(", ")
        ));
    }
    if let Some(text) = &parsed.main_text {
        parts.push(format!("\nPrimary text: \"{text}\""));
    }
    if let Some(text) = &parsed.secondary_text {
        parts.push(format!("Secondary text: \"{text}\""));
    }
    if let Some(font) = &parsed.font {
        parts.push(format!("\nFont: {font}"));
    }
    if let Some(style) = &parsed.style_direction {
        parts.push(format!("\nStyle direction: {style}"));
    }
    if let Some(notes) = &parsed.extra_notes {
        parts.push(format!("\nAdditional instructions: {notes}"));
    }
    if !parsed.reference_images.is_empty() {
        parts.push("\nReference images provided for style/layout guidance.".to_string());
    }
    parts.join("\n")
}

/// Dropdown values are either an index into `type_config.options` or the
/// id of an option.
fn parse_dropdown(field: Option<&Value>) -> TaskType {
    let Some(field) = field else {
        return TaskType::Edit;
    };
    let options = field
        .pointer("/type_config/options")
        .and_then(Value::as_array);
    let name = match (field.get("value"), options) {
        (Some(Value::Number(index)), Some(options)) => index
            .as_u64()
            .and_then(|i| options.get(i as usize))
            .and_then(|o| o.get("name"))
            .and_then(Value::as_str),
        (Some(Value::String(id)), Some(options)) => options
            .iter()
            .find(|o| o.get("id").and_then(Value::as_str) == Some(id.as_str()))
            .and_then(|o| o.get("name"))
            .and_then(Value::as_str),
        _ => None,
    };
    match name {
        Some(name) if name.eq_ignore_ascii_case("creative") => TaskType::Creative,
        _ => TaskType::Edit,
    }
}

fn parse_text(field: Option<&Value>) -> Option<String> {
    let value = field?.get("value")?.as_str()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Multi-select labels: value is a list of option ids mapped through
/// `type_config.options` to their labels. Unknown ids are dropped.
fn parse_labels(field: Option<&Value>) -> Vec<String> {
    let Some(field) = field else {
        return vec![];
    };
    let Some(selected) = field.get("value").and_then(Value::as_array) else {
        return vec![];
    };
    let options = field
        .pointer("/type_config/options")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    selected
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|id| {
            options
                .iter()
                .find(|o| o.get("id").and_then(Value::as_str) == Some(id))
                .and_then(|o| o.get("label"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect()
}

fn parse_attachments(field: Option<&Value>) -> Vec<Attachment> {
    let Some(entries) = field.and_then(|f| f.get("value")).and_then(Value::as_array) else {
        return vec![];
    };
    entries
        .iter()
        .filter_map(|entry| {
            let url = entry.get("url").and_then(Value::as_str)?;
            Some(Attachment {
                url: url.to_string(),
                filename: entry
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("image.png")
                    .to_string(),
            })
        })
        .collect()
}
