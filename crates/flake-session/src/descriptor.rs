use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Rollback => "rollback",
        }
    }
}

/// Session description exchanged during negotiation.
///
/// The serialized form is the JSON object `{"type": "...", "sdp": "..."}`, which is
/// what the broker speaks and what is shown to the operator in manual-exchange mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn serialize(&self) -> String {
        // Two plain string fields cannot fail to encode.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(DescriptorError::Empty);
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Parses a blob and insists it is an answer.
    pub fn parse_answer(text: &str) -> Result<Self, DescriptorError> {
        let description = Self::parse(text)?;
        if description.kind != SdpKind::Answer {
            return Err(DescriptorError::UnexpectedKind {
                expected: SdpKind::Answer.as_str(),
                actual: description.kind.as_str(),
            });
        }
        Ok(description)
    }
}
