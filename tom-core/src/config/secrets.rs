//! Secrets configuration loaded from environment variables only.

use std::env;

/// Secrets loaded exclusively from environment variables.
///
/// These are sensitive values that should never be written to disk
/// or committed to version control.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// LLM API key (env: TOM_LLM_API_KEY, falling back to OPENAI_API_KEY)
    pub llm_api_key: Option<String>,
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Secret {0} is set but empty")]
    EmptySecret(&'static str),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Loads a `.env` file first if present. A missing key is not an error:
    /// local OpenAI-compatible servers usually run without one.
    pub fn from_env() -> Result<Self, SecretsError> {
        let _ = dotenvy::dotenv();

        Self::from_env_inner()
    }

    pub(crate) fn from_env_inner() -> Result<Self, SecretsError> {
        let llm_api_key = match env::var("TOM_LLM_API_KEY") {
            Ok(value) if value.trim().is_empty() => {
                return Err(SecretsError::EmptySecret("TOM_LLM_API_KEY"));
            }
            Ok(value) => Some(value),
            Err(_) => env::var("OPENAI_API_KEY")
                .ok()
                .filter(|value| !value.trim().is_empty()),
        };

        Ok(Self { llm_api_key })
    }

    /// Whether an API key is available for the LLM provider.
    pub fn has_llm_key(&self) -> bool {
        self.llm_api_key.is_some()
    }
}
