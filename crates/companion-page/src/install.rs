//! Deferred "add to home screen" prompt.

/// Outcome of showing the install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallChoice {
    Accepted,
    Dismissed,
}

/// The platform's install prompt, held until the user presses the install button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPrompt {
    /// Platforms the prompt offers, as reported by the platform.
    pub platforms: Vec<String>,
}

impl InstallPrompt {
    pub fn new<I, S>(platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            platforms: platforms.into_iter().map(Into::into).collect(),
        }
    }
}
