use serde::{Deserialize, Serialize};

use crate::models::PhotoRef;

/// Platform-agnostic message content. The shim decides how to render it
/// (embed, plain text, attachment gallery); the core only fills in the parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub title: Option<String>,
    pub body: String,
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<PhotoRef>,
}

impl OutboundMessage {
    /// Plain text message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            title: None,
            body: body.into(),
            footer: None,
            photos: Vec::new(),
        }
    }

    /// Titled message (rendered as an embed by the shim).
    pub fn embed(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: body.into(),
            footer: None,
            photos: Vec::new(),
        }
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn with_photos(mut self, photos: Vec<PhotoRef>) -> Self {
        self.photos = photos;
        self
    }
}
