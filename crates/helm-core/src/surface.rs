use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A device category the agent can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    /// The local desktop OS (mouse, keyboard, screen capture).
    Desktop,
    /// A mobile device or simulator driven through an automation server.
    Mobile,
}

impl Surface {
    pub const ALL: [Surface; 2] = [Surface::Desktop, Surface::Mobile];

    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Desktop => "desktop",
            Surface::Mobile => "mobile",
        }
    }

    /// Transient surfaces hold their connection only for the duration of a
    /// single scoped operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Surface::Mobile)
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Surface {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" | "mac" => Ok(Surface::Desktop),
            "mobile" | "ios" => Ok(Surface::Mobile),
            other => Err(format!("unknown surface '{other}'")),
        }
    }
}
