use serde::{Deserialize, Serialize};

/// Cost/quality class used to pick the model serving a structured request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    #[default]
    Balanced,
    Best,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::Best => "best",
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" | "cheap" => Ok(ModelTier::Fast),
            "balanced" | "default" => Ok(ModelTier::Balanced),
            "best" | "quality" => Ok(ModelTier::Best),
            _ => Err(format!("Unknown model tier: {}", s)),
        }
    }
}
