use serde::{Deserialize, Serialize};

use crate::dom::ElementHandle;

/// Options the host passes to its viewport-visibility observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverOptions {
    /// Grow the viewport by this much on every side
    pub root_margin_px: u32,
    pub threshold: f64,
}

/// One element's visibility as reported by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityEntry {
    pub element: ElementHandle,
    pub is_intersecting: bool,
    pub intersection_ratio: f64,
}

impl VisibilityEntry {
    pub fn visible(element: ElementHandle) -> Self {
        Self {
            element,
            is_intersecting: true,
            intersection_ratio: 1.0,
        }
    }

    pub fn hidden(element: ElementHandle) -> Self {
        Self {
            element,
            is_intersecting: false,
            intersection_ratio: 0.0,
        }
    }

    pub fn is_visible(&self, threshold: f64) -> bool {
        self.is_intersecting && self.intersection_ratio >= threshold
    }
}
