use serde::{Deserialize, Serialize};

use crate::session::content::ContentStore;
use crate::session::types::{Channel, Document};
use crate::text::clean_text;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AngleExport {
    pub title: String,
    pub content: String,
}

/// Payload for the single-document export endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub paper_title: String,
    pub angles: Vec<AngleExport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchExportRequest {
    pub papers: Vec<ExportRequest>,
}

/// Where the server put the generated file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportArtifact {
    #[serde(default)]
    pub file_path: String,
    pub filename: String,
    pub download_url: String,
}

impl ExportRequest {
    /// Build the export for one document from its accumulated text.
    ///
    /// Angles with no text are left out; preamble is stripped from the rest.
    pub fn from_document(doc: &Document, content: &ContentStore) -> Self {
        let angles = doc
            .angles
            .iter()
            .filter_map(|angle| {
                let text = content.get(&doc.id, &Channel::angle(&angle.name));
                if text.trim().is_empty() {
                    return None;
                }
                Some(AngleExport {
                    title: angle.name.clone(),
                    content: clean_text(text).to_string(),
                })
            })
            .collect();
        let final_report = Some(content.get(&doc.id, &Channel::Final))
            .filter(|t| !t.trim().is_empty())
            .map(|t| clean_text(t).to_string());
        Self {
            paper_title: doc.title.clone(),
            angles,
            final_report,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty() && self.final_report.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_document() {
        let doc = Document::new("d1".into(), "paper.pdf", &["A", "B", "C"]);
        let mut content = ContentStore::new();
        content.append("d1", &Channel::angle("A"), "Sure, here is\n## A body");
        content.append("d1", &Channel::angle("C"), "C body");
        content.append("d1", &Channel::angle_reasoning("B"), "thinking only");

        let req = ExportRequest::from_document(&doc, &content);
        assert_eq!(req.paper_title, "paper");
        assert_eq!(
            req.angles,
            vec![
                AngleExport {
                    title: "A".into(),
                    content: "## A body".into()
                },
                AngleExport {
                    title: "C".into(),
                    content: "C body".into()
                },
            ]
        );
        assert_eq!(req.final_report, None);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("final_report").is_none());
    }

    #[test]
    fn test_final_report_included() {
        let doc = Document::new("d1".into(), "paper.pdf", &["A"]);
        let mut content = ContentStore::new();
        content.append("d1", &Channel::Final, "Overall: solid");
        let req = ExportRequest::from_document(&doc, &content);
        assert!(!req.is_empty());
        assert_eq!(req.final_report.as_deref(), Some("Overall: solid"));
    }
}
