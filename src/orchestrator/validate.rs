//! Local input checks run before the engine is contacted.

use crate::engine::ProbeEngine;
use crate::model::{ProbeKind, ProbeParams};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("please enter a {0}")]
    Empty(&'static str),

    #[error("enter only the domain name without a scheme (e.g. google.com)")]
    SchemePrefix,

    #[error("enter only the domain name, '{0}' is not allowed (e.g. google.com)")]
    DisallowedChar(char),

    #[error("'{0}' is not a valid domain name")]
    MalformedDomain(String),

    #[error("please enter a valid image name (e.g. ubuntu:latest)")]
    InvalidImageName,

    #[error("image name validation failed: {0}")]
    ValidatorFailed(String),
}

/// Validate `params` for `kind`. The registry kind asks the engine; the other kinds are
/// checked locally.
pub async fn validate_target<E: ProbeEngine>(
    engine: &E,
    kind: ProbeKind,
    params: &ProbeParams,
) -> Result<(), ValidationError> {
    let target = params.target.trim();
    if target.is_empty() {
        return Err(ValidationError::Empty(kind.target_label()));
    }
    match kind {
        ProbeKind::ResolverReachability => validate_domain(target),
        // Scheme and reachability are the engine's call; it rejects at start.
        ProbeKind::DownloadThroughput => Ok(()),
        ProbeKind::RegistryThroughput => match engine.validate(kind, params).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ValidationError::InvalidImageName),
            Err(e) => Err(ValidationError::ValidatorFailed(e.to_string())),
        },
    }
}

pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.contains("://") {
        return Err(ValidationError::SchemePrefix);
    }
    if let Some(c) = domain.chars().find(|c| matches!(c, '/' | '?' | '#')) {
        return Err(ValidationError::DisallowedChar(c));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::MalformedDomain(domain.to_string()));
    }
    Ok(())
}
