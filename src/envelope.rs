use serde::{Deserialize, Serialize};

/// Label reported when the detector found nothing.
pub const NO_OBJECT_LABEL: &str = "No object detected";

/// Canonical analysis result: the encoded image, every unique label in
/// detection order and the primary label (`labels[0]` or [`NO_OBJECT_LABEL`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub image: String,
    pub label: String,
    pub labels: Vec<String>,
}

impl ResultEnvelope {
    pub fn new(image: String, labels: Vec<String>) -> Self {
        let label = labels
            .first()
            .cloned()
            .unwrap_or_else(|| NO_OBJECT_LABEL.to_string());
        Self {
            image,
            label,
            labels,
        }
    }

    pub fn detected(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// Response shapes served to consumers of the older endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    #[default]
    Canonical,
    /// `{ "image", "results": [{ "label" }] }`
    Results,
    /// `{ "image", "label" }`
    Label,
    /// `{ "image", "name" }`
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsEnvelope {
    pub image: String,
    pub results: Vec<LabelEntry>,
}

impl From<&ResultEnvelope> for ResultsEnvelope {
    fn from(envelope: &ResultEnvelope) -> Self {
        let results = if envelope.labels.is_empty() {
            vec![LabelEntry {
                label: NO_OBJECT_LABEL.to_string(),
            }]
        } else {
            envelope
                .labels
                .iter()
                .map(|label| LabelEntry {
                    label: label.clone(),
                })
                .collect()
        };
        Self {
            image: envelope.image.clone(),
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEnvelope {
    pub image: String,
    pub label: String,
}

impl From<&ResultEnvelope> for LabelEnvelope {
    fn from(envelope: &ResultEnvelope) -> Self {
        Self {
            image: envelope.image.clone(),
            label: envelope.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEnvelope {
    pub image: String,
    pub name: String,
}

impl From<&ResultEnvelope> for NameEnvelope {
    fn from(envelope: &ResultEnvelope) -> Self {
        Self {
            image: envelope.image.clone(),
            name: envelope.label.clone(),
        }
    }
}

impl ResultEnvelope {
    pub fn to_json(&self, format: EnvelopeFormat) -> Result<serde_json::Value, serde_json::Error> {
        match format {
            EnvelopeFormat::Canonical => serde_json::to_value(self),
            EnvelopeFormat::Results => serde_json::to_value(ResultsEnvelope::from(self)),
            EnvelopeFormat::Label => serde_json::to_value(LabelEnvelope::from(self)),
            EnvelopeFormat::Name => serde_json::to_value(NameEnvelope::from(self)),
        }
    }
}
