use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Scroll,
    Click,
    Pointer,
    Key,
    Touch,
    Visibility,
}

impl SampleKind {
    /// Whether this kind resets the idle clock. Visibility changes never do.
    pub fn is_interaction(&self) -> bool {
        !matches!(self, SampleKind::Visibility)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Scroll => "scroll",
            SampleKind::Click => "click",
            SampleKind::Pointer => "pointer",
            SampleKind::Key => "key",
            SampleKind::Touch => "touch",
            SampleKind::Visibility => "visibility",
        }
    }
}

/// Kind-specific data. Fields not relevant to a kind stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplePayload {
    /// Horizontal pointer position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    /// Scroll offset for scroll samples, vertical position for pointer samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Page visibility after a visibility change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionSample {
    pub timestamp_ms: u64,
    pub kind: SampleKind,
    #[serde(default)]
    pub payload: SamplePayload,
}

impl InteractionSample {
    pub fn scroll(timestamp_ms: u64, offset_y: f64) -> Self {
        Self {
            timestamp_ms,
            kind: SampleKind::Scroll,
            payload: SamplePayload {
                y: Some(offset_y),
                ..SamplePayload::default()
            },
        }
    }

    pub fn pointer(timestamp_ms: u64, x: f64, y: f64) -> Self {
        Self {
            timestamp_ms,
            kind: SampleKind::Pointer,
            payload: SamplePayload {
                x: Some(x),
                y: Some(y),
                visible: None,
            },
        }
    }

    pub fn click(timestamp_ms: u64) -> Self {
        Self::bare(timestamp_ms, SampleKind::Click)
    }

    pub fn key(timestamp_ms: u64) -> Self {
        Self::bare(timestamp_ms, SampleKind::Key)
    }

    pub fn touch(timestamp_ms: u64) -> Self {
        Self::bare(timestamp_ms, SampleKind::Touch)
    }

    pub fn visibility(timestamp_ms: u64, visible: bool) -> Self {
        Self {
            timestamp_ms,
            kind: SampleKind::Visibility,
            payload: SamplePayload {
                visible: Some(visible),
                ..SamplePayload::default()
            },
        }
    }

    fn bare(timestamp_ms: u64, kind: SampleKind) -> Self {
        Self {
            timestamp_ms,
            kind,
            payload: SamplePayload::default(),
        }
    }
}
