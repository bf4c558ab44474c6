//! # Subtask Model
//!
//! A subtask is one stage of a task: a closed [`SubtaskKind`], the declared
//! [`InputSource`], and free-form parameters that each handler parses into its
//! own typed parameter struct.

use crate::error::{PipelineError, PipelineResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage kinds. Adding a kind forces every exhaustive match in the
/// handler registry to be extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubtaskKind {
    Occurrences,
    Observations,
    Labels,
    Addresses,
    Emails,
    PivotTables,
    PlantList,
    StewardshipReport,
    FileSync,
    Upload,
    Determinations,
    Download,
}

impl SubtaskKind {
    pub const ALL: [SubtaskKind; 12] = [
        SubtaskKind::Occurrences,
        SubtaskKind::Observations,
        SubtaskKind::Labels,
        SubtaskKind::Addresses,
        SubtaskKind::Emails,
        SubtaskKind::PivotTables,
        SubtaskKind::PlantList,
        SubtaskKind::StewardshipReport,
        SubtaskKind::FileSync,
        SubtaskKind::Upload,
        SubtaskKind::Determinations,
        SubtaskKind::Download,
    ];

    /// Wire name used in task documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occurrences => "occurrences",
            Self::Observations => "observations",
            Self::Labels => "labels",
            Self::Addresses => "addresses",
            Self::Emails => "emails",
            Self::PivotTables => "pivotTables",
            Self::PlantList => "plantList",
            Self::StewardshipReport => "stewardshipReport",
            Self::FileSync => "fileSync",
            Self::Upload => "upload",
            Self::Determinations => "determinations",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubtaskKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PipelineError::validation(format!("Unknown subtask type: {s}")))
    }
}

/// Where a subtask reads its input from.
///
/// Serialized as the raw token: `"upload"`, `"selection"`, or
/// `"<subtaskIndex>_<outputType>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum InputSource {
    /// The file uploaded with the task, if any
    #[default]
    Upload,
    /// The subtask's own filter/projection against the live dataset
    Selection,
    /// An output recorded by an earlier subtask
    Output { index: usize, output_type: String },
    /// A token that matches none of the forms above
    Unrecognized(String),
}

impl From<String> for InputSource {
    fn from(token: String) -> Self {
        match token.as_str() {
            "upload" | "" => InputSource::Upload,
            "selection" => InputSource::Selection,
            _ => match token.split_once('_') {
                Some((index, output_type)) if !output_type.is_empty() => {
                    match index.parse::<usize>() {
                        Ok(index) => InputSource::Output {
                            index,
                            output_type: output_type.to_string(),
                        },
                        Err(_) => InputSource::Unrecognized(token),
                    }
                }
                _ => InputSource::Unrecognized(token),
            },
        }
    }
}

impl From<InputSource> for String {
    fn from(source: InputSource) -> Self {
        match source {
            InputSource::Upload => "upload".to_string(),
            InputSource::Selection => "selection".to_string(),
            InputSource::Output { index, output_type } => format!("{index}_{output_type}"),
            InputSource::Unrecognized(token) => token,
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// One stage of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    #[serde(rename = "type")]
    pub kind: SubtaskKind,
    #[serde(default)]
    pub input: InputSource,
    /// Type-specific parameters (date ranges, flags, selection filter...)
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Subtask {
    pub fn new(kind: SubtaskKind, input: InputSource) -> Self {
        Self {
            kind,
            input,
            params: Map::new(),
        }
    }

    /// Builder helper for tests and fixtures
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn bool_param(&self, key: &str) -> bool {
        self.params
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Parse the parameters into a handler-specific struct
    pub fn params_as<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            PipelineError::validation(format!("Invalid parameters for {} subtask: {e}", self.kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_token_parsing() {
        assert_eq!(InputSource::from("upload".to_string()), InputSource::Upload);
        assert_eq!(
            InputSource::from("selection".to_string()),
            InputSource::Selection
        );
        assert_eq!(
            InputSource::from("0_occurrences".to_string()),
            InputSource::Output {
                index: 0,
                output_type: "occurrences".to_string()
            }
        );
        assert_eq!(
            InputSource::from("2_labelExclusions".to_string()),
            InputSource::Output {
                index: 2,
                output_type: "labelExclusions".to_string()
            }
        );
        assert!(matches!(
            InputSource::from("x_occurrences".to_string()),
            InputSource::Unrecognized(_)
        ));
        assert!(matches!(
            InputSource::from("3_".to_string()),
            InputSource::Unrecognized(_)
        ));
    }

    #[test]
    fn test_subtask_document_shape() {
        let subtask: Subtask = serde_json::from_value(json!({
            "type": "upload",
            "input": "upload",
            "replace": true,
            "insert": false
        }))
        .unwrap();
        assert_eq!(subtask.kind, SubtaskKind::Upload);
        assert!(subtask.bool_param("replace"));
        assert!(!subtask.bool_param("insert"));
        assert!(!subtask.bool_param("missing"));

        let value = serde_json::to_value(&subtask).unwrap();
        assert_eq!(value["type"], "upload");
        assert_eq!(value["input"], "upload");
        assert_eq!(value["replace"], true);
    }

    #[test]
    fn test_missing_input_defaults_to_upload() {
        let subtask: Subtask = serde_json::from_value(json!({"type": "observations"})).unwrap();
        assert_eq!(subtask.input, InputSource::Upload);
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in SubtaskKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<SubtaskKind>().unwrap(), kind);
        }
    }
}
