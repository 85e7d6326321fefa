//! Safety checks that run before any physical action.
//!
//! Both checks are pure and synchronous. Adapters call them in the request
//! path so an unsafe action is rejected before a device is even touched.

use helm_config::{Region, SafetyConfig};
use helm_core::ToolError;

/// Validates positions and text payloads produced by the model.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    /// Screen size; `None` when the surface reports no fixed bounds.
    bounds: Option<(i64, i64)>,
    /// Lowercased deny-list.
    denied: Vec<String>,
    regions: Vec<Region>,
}

impl SafetyValidator {
    pub fn new(width: u32, height: u32, config: &SafetyConfig) -> Self {
        Self {
            bounds: Some((i64::from(width), i64::from(height))),
            denied: config
                .denied_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            regions: config.sensitive_regions.clone(),
        }
    }

    /// Validator for touch surfaces: the deny-list applies, positions only
    /// have to be non-negative.
    pub fn for_touch(config: &SafetyConfig) -> Self {
        Self {
            bounds: None,
            regions: vec![],
            ..Self::new(0, 0, config)
        }
    }

    /// Reject coordinates outside `[0, width) x [0, height)` or inside a
    /// sensitive region.
    pub fn validate_position(&self, x: i64, y: i64) -> Result<(), ToolError> {
        if x < 0 || y < 0 {
            return Err(ToolError::Unsafe(format!(
                "position ({x}, {y}) is out of screen bounds"
            )));
        }
        if let Some((width, height)) = self.bounds
            && (x >= width || y >= height)
        {
            return Err(ToolError::Unsafe(format!(
                "position ({x}, {y}) is out of screen bounds {width}x{height}"
            )));
        }
        if let Some(r) = self.regions.iter().find(|r| r.contains(x, y)) {
            return Err(ToolError::Unsafe(format!(
                "position ({x}, {y}) is inside a sensitive region at ({}, {}) {}x{}",
                r.x, r.y, r.width, r.height
            )));
        }
        Ok(())
    }

    /// Reject text containing any denied pattern. Plain case-insensitive
    /// substring match, no tokenizing: "address" trips "dd".
    pub fn validate_text(&self, text: &str) -> Result<(), ToolError> {
        let lowered = text.to_lowercase();
        match self.denied.iter().find(|p| lowered.contains(p.as_str())) {
            Some(p) => Err(ToolError::Unsafe(format!(
                "dangerous pattern detected: '{p}'"
            ))),
            None => Ok(()),
        }
    }

    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.bounds
    }
}
