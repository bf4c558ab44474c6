//! # Output References
//!
//! Durable pointers to generated artifacts. Every output type is produced by
//! exactly one subtask kind, which is what lets a later subtask name an input
//! as `"<index>_<outputType>"`.

use super::subtask::SubtaskKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Artifact types, one producer kind each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputType {
    Occurrences,
    Duplicates,
    Observations,
    Labels,
    LabelExclusions,
    Addresses,
    Emails,
    PivotTables,
    PlantList,
    StewardshipReport,
    Sync,
    Determinations,
    Download,
}

impl OutputType {
    pub const ALL: [OutputType; 13] = [
        OutputType::Occurrences,
        OutputType::Duplicates,
        OutputType::Observations,
        OutputType::Labels,
        OutputType::LabelExclusions,
        OutputType::Addresses,
        OutputType::Emails,
        OutputType::PivotTables,
        OutputType::PlantList,
        OutputType::StewardshipReport,
        OutputType::Sync,
        OutputType::Determinations,
        OutputType::Download,
    ];

    /// Type tag used in file names and in the `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occurrences => "occurrences",
            Self::Duplicates => "duplicates",
            Self::Observations => "observations",
            Self::Labels => "labels",
            Self::LabelExclusions => "labelExclusions",
            Self::Addresses => "addresses",
            Self::Emails => "emails",
            Self::PivotTables => "pivotTables",
            Self::PlantList => "plantList",
            Self::StewardshipReport => "stewardshipReport",
            Self::Sync => "sync",
            Self::Determinations => "determinations",
            Self::Download => "download",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// The only subtask kind that produces this type
    pub fn producer(&self) -> SubtaskKind {
        match self {
            Self::Occurrences | Self::Duplicates => SubtaskKind::Occurrences,
            Self::Observations => SubtaskKind::Observations,
            Self::Labels | Self::LabelExclusions => SubtaskKind::Labels,
            Self::Addresses => SubtaskKind::Addresses,
            Self::Emails => SubtaskKind::Emails,
            Self::PivotTables => SubtaskKind::PivotTables,
            Self::PlantList => SubtaskKind::PlantList,
            Self::StewardshipReport => SubtaskKind::StewardshipReport,
            Self::Sync => SubtaskKind::FileSync,
            Self::Determinations => SubtaskKind::Determinations,
            Self::Download => SubtaskKind::Download,
        }
    }

    /// Output directory, also the second path segment of the public URI
    pub fn category(&self) -> &'static str {
        match self {
            Self::Occurrences | Self::Duplicates => "occurrences",
            Self::Observations => "observations",
            Self::Labels | Self::LabelExclusions => "labels",
            Self::Addresses => "addresses",
            Self::Emails => "emails",
            Self::PivotTables => "pivots",
            Self::PlantList => "plants",
            Self::StewardshipReport => "reports",
            Self::Sync => "sync",
            Self::Determinations => "determinations",
            Self::Download => "downloads",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Labels => "pdf",
            _ => "csv",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to one generated artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputReference {
    pub uri: String,
    pub file_name: String,
    #[serde(rename = "type")]
    pub output_type: OutputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

/// Outputs registered by one executed subtask
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskOutputs {
    #[serde(rename = "type")]
    pub kind: SubtaskKind,
    #[serde(default)]
    pub outputs: Vec<OutputReference>,
}

impl SubtaskOutputs {
    pub fn new(kind: SubtaskKind, outputs: Vec<OutputReference>) -> Self {
        Self { kind, outputs }
    }

    /// First output of the given type tag (no subtype preference)
    pub fn find(&self, output_type: &str) -> Option<&OutputReference> {
        self.outputs
            .iter()
            .find(|o| o.output_type.as_str() == output_type && o.subtype.is_none())
            .or_else(|| {
                self.outputs
                    .iter()
                    .find(|o| o.output_type.as_str() == output_type)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_type_has_single_producer() {
        for output_type in OutputType::ALL {
            let producer = output_type.producer();
            assert_eq!(OutputType::parse(output_type.as_str()), Some(output_type));
            assert!(!output_type.category().is_empty(), "{producer}");
        }
    }

    #[test]
    fn test_reference_serialization() {
        let reference = OutputReference {
            uri: "/api/labels/labels_warnings_t1.pdf".to_string(),
            file_name: "labels_warnings_t1.pdf".to_string(),
            output_type: OutputType::Labels,
            subtype: Some("warnings".to_string()),
        };
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["fileName"], "labels_warnings_t1.pdf");
        assert_eq!(value["type"], "labels");
        assert_eq!(value["subtype"], "warnings");
    }

    #[test]
    fn test_find_prefers_primary_artifact() {
        let entry: SubtaskOutputs = serde_json::from_value(json!({
            "type": "labels",
            "outputs": [
                {"uri": "/api/labels/w.pdf", "fileName": "w.pdf", "type": "labels", "subtype": "warnings"},
                {"uri": "/api/labels/l.pdf", "fileName": "l.pdf", "type": "labels"}
            ]
        }))
        .unwrap();
        assert_eq!(entry.find("labels").unwrap().file_name, "l.pdf");
        assert!(entry.find("occurrences").is_none());
    }
}
