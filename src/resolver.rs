//! Provider resolution for `owner/name` shorthand.
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::provider::{is_shorthand, Provider, ProviderApi, RepoRef};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Candidate {
    pub provider: Provider,
    pub id: String,
    pub canonical_url: String,
}

/// Probe every provider for `input`. Full URLs and anything that is not plain
/// `owner/name` yield no candidates. Probe failures only drop that provider.
#[instrument(skip(api))]
pub async fn resolve_candidates(api: &dyn ProviderApi, input: &str) -> Vec<Candidate> {
    let input = input.trim();
    if !is_shorthand(input) {
        return Vec::new();
    }
    let Some((owner, name)) = input.split_once('/') else {
        return Vec::new();
    };

    let probes = Provider::ALL.iter().map(|provider| {
        let target = RepoRef::new(*provider, owner, name);
        async move {
            let outcome = api.probe(&target).await;
            (target, outcome)
        }
    });

    join_all(probes)
        .await
        .into_iter()
        .filter_map(|(target, outcome)| match outcome {
            Ok(status) if (200..300).contains(&status) => Some(Candidate {
                provider: target.provider,
                id: target.id(),
                canonical_url: target.web_url(),
            }),
            Ok(status) => {
                debug!(provider = %target.provider, status, "repository not found on provider");
                None
            }
            Err(err) => {
                debug!(provider = %target.provider, error = %err, "provider probe failed");
                None
            }
        })
        .collect()
}
