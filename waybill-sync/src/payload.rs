//! Outbound multi-part payload.
//!
//! Scalars become flat text parts, groups and lists become JSON text under
//! their own key, and pending files become binary parts named after their
//! field. Files already stored by the backend are left out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use waybill::{
    Attachment, FieldId, FieldKind, FieldValue, Form, FormType, Members, PendingFile,
};

/// One part of a multi-part submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum Part {
    /// Flat key/value pair
    Text { name: String, value: String },
    /// Structured value encoded as JSON text
    Json { name: String, value: String },
    /// Local file to upload
    File { name: String, file: PendingFile },
}

impl Part {
    pub fn name(&self) -> &str {
        match self {
            Part::Text { name, .. } | Part::Json { name, .. } | Part::File { name, .. } => name,
        }
    }
}

/// Everything sent to create or update a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub form_type: FormType,
    /// Set for updates
    pub record_id: Option<String>,
    pub parts: Vec<Part>,
    /// File fields whose stored attachment was deleted before this update
    pub deleted_attachments: Vec<FieldId>,
}

impl SubmissionPayload {
    /// Assemble the payload from the current form values.
    pub fn assemble(form: &Form, deleted_attachments: Vec<FieldId>) -> Self {
        let mut parts = Vec::new();

        for spec in form.schema().fields() {
            let name = spec.id.to_string();
            match form.get(spec.id.as_str()) {
                FieldValue::File(Attachment::Pending(file)) => parts.push(Part::File {
                    name,
                    file: file.clone(),
                }),
                FieldValue::File(Attachment::Stored(_)) => {}
                value @ (FieldValue::Group(_) | FieldValue::List(_)) => parts.push(Part::Json {
                    name,
                    value: plain_json(value).to_string(),
                }),
                FieldValue::Blank if spec.kind == FieldKind::File => {}
                FieldValue::Blank if spec.kind == FieldKind::Group => parts.push(Part::Json {
                    name,
                    value: "{}".to_string(),
                }),
                FieldValue::Blank if spec.kind == FieldKind::List => parts.push(Part::Json {
                    name,
                    value: "[]".to_string(),
                }),
                value => parts.push(Part::Text {
                    name,
                    value: value.scalar_text().unwrap_or_default(),
                }),
            }
        }

        Self {
            form_type: form.form_type().clone(),
            record_id: form.record_id().map(str::to_string),
            parts,
            deleted_attachments,
        }
    }

    pub fn is_update(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.name() == name)
    }

    /// Value of a text part.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.part(name)? {
            Part::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Decoded value of a JSON part.
    pub fn json(&self, name: &str) -> Option<Value> {
        match self.part(name)? {
            Part::Json { value, .. } => serde_json::from_str(value).ok(),
            _ => None,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &PendingFile)> {
        self.parts.iter().filter_map(|p| match p {
            Part::File { name, file } => Some((name.as_str(), file)),
            _ => None,
        })
    }
}

/// Untagged JSON for structured values, as the backend stores them.
fn plain_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Blank => Value::Null,
        FieldValue::Number(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        FieldValue::Flag(flag) => Value::Bool(*flag),
        FieldValue::File(Attachment::Stored(file)) => Value::String(file.url.clone()),
        FieldValue::Group(members) => members_json(members),
        FieldValue::List(entries) => Value::Array(entries.iter().map(members_json).collect()),
        scalar => scalar.scalar_text().map_or(Value::Null, Value::String),
    }
}

fn members_json(members: &Members) -> Value {
    Value::Object(
        members
            .iter()
            .map(|(key, value)| (key.clone(), plain_json(value)))
            .collect::<Map<String, Value>>(),
    )
}
