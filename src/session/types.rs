use serde::{Deserialize, Serialize};

/// Opaque document identifier, minted at submission time.
pub type DocId = String;

/// Document lifecycle. `Analyzing` is the in-progress sentinel that a
/// restored session turns into `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Analyzing,
    Done,
    Error,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleStatus {
    Pending,
    Streaming,
    Done,
    Error,
}

impl AngleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// One analytical angle of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AngleState {
    pub name: String,
    pub status: AngleStatus,
    /// Epoch millis of the first content byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

impl AngleState {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AngleStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the angle failed. Timestamps are discarded.
    pub fn fail(&mut self) {
        self.status = AngleStatus::Error;
        self.started_at = None;
        self.ended_at = None;
    }

    /// Wall time between first byte and completion, when both are known.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end >= start => {
                Some(chrono::Duration::milliseconds(end - start))
            }
            _ => None,
        }
    }
}

/// One submitted document and the structural state of its analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    /// File name as submitted.
    pub display_name: String,
    /// File stem until the server reports a parsed title.
    pub title: String,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Angles in configured order.
    pub angles: Vec<AngleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Characters of document text the server analyzed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_char_count: Option<u64>,
}

impl Document {
    /// A pending document with every angle pre-seeded, so the display is
    /// stable before the first byte arrives.
    pub fn new<S: AsRef<str>>(id: DocId, display_name: &str, angle_names: &[S]) -> Self {
        let title = std::path::Path::new(display_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| display_name.to_string());
        Self {
            id,
            display_name: display_name.to_string(),
            title,
            status: DocumentStatus::Pending,
            error_message: None,
            angles: angle_names
                .iter()
                .map(|n| AngleState::pending(n.as_ref()))
                .collect(),
            started_at: None,
            ended_at: None,
            text_char_count: None,
        }
    }

    pub fn angle(&self, name: &str) -> Option<&AngleState> {
        self.angles.iter().find(|a| a.name == name)
    }

    pub fn angle_mut(&mut self, name: &str) -> Option<&mut AngleState> {
        self.angles.iter_mut().find(|a| a.name == name)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal failure: the document and every open angle end in `Error`.
    pub fn fail(&mut self, message: impl Into<String>, now: i64) {
        for angle in self.angles.iter_mut().filter(|a| !a.is_terminal()) {
            angle.fail();
        }
        self.status = DocumentStatus::Error;
        self.error_message = Some(message.into());
        self.ended_at = Some(now);
    }

    pub fn finished_angles(&self) -> usize {
        self.angles.iter().filter(|a| a.is_terminal()).count()
    }
}

/// Mint a document id from its bytes, batch position and submission time.
pub fn document_id(content: &[u8], index: usize, submitted_at: i64) -> DocId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content);
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(&submitted_at.to_le_bytes());
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// A content bucket for one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Angle(String),
    AngleReasoning(String),
    Final,
    FinalReasoning,
}

impl Channel {
    pub fn angle(name: &str) -> Self {
        Self::Angle(name.to_string())
    }

    pub fn angle_reasoning(name: &str) -> Self {
        Self::AngleReasoning(name.to_string())
    }

    /// Store key for this channel of `doc_id`.
    ///
    /// The channel kind comes before any angle name, so no title can land
    /// on another channel's key.
    pub fn key(&self, doc_id: &str) -> String {
        match self {
            Self::Angle(name) => format!("{}/angle/{}", doc_id, name),
            Self::AngleReasoning(name) => format!("{}/reasoning/{}", doc_id, name),
            Self::Final => format!("{}/final", doc_id),
            Self::FinalReasoning => format!("{}/final-reasoning", doc_id),
        }
    }
}
