use serde::Serialize;
use tickvault_core::{EnvelopeError, ProviderStatus};

use super::CommandResult;
use crate::service::Service;

#[derive(Debug, Serialize)]
struct StatusResponse {
    providers: Vec<ProviderStatus>,
}

pub fn run(service: &Service) -> Result<CommandResult, EnvelopeError> {
    let providers = service.pipeline().provider_status();
    let count = providers.len();
    let mut result = CommandResult::new(&StatusResponse { providers }, count)?;
    let unavailable = service
        .pipeline()
        .providers()
        .iter()
        .filter(|provider| !provider.is_available())
        .map(|provider| provider.name().to_string())
        .collect::<Vec<_>>();
    if !unavailable.is_empty() {
        result = result.with_warning(format!("not configured: {}", unavailable.join(", ")));
    }
    Ok(result)
}
