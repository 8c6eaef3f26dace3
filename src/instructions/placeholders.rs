//! Runtime values behind the placeholders scripts hold during interpretation

use super::{Collaborators, InstructionError};
use crate::context::Context;
use crate::types::ServiceId;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\{\{kurtosis:(?P<service>[A-Za-z0-9][A-Za-z0-9._-]*)(?::(?P<fact>[^{}:]+))?\.(?P<kind>ip_address|fact)\}\}",
    )
    .expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Reference {
    IpAddress(ServiceId),
    Fact(ServiceId, String),
}

fn reference(caps: &Captures<'_>) -> Option<Reference> {
    let service = ServiceId::new(&caps["service"]);
    match (&caps["kind"], caps.name("fact")) {
        ("ip_address", None) => Some(Reference::IpAddress(service)),
        ("fact", Some(fact)) => Some(Reference::Fact(service, fact.as_str().to_string())),
        _ => None,
    }
}

/// Replaces every service address and fact placeholder in `text`.
/// Anything that only looks like a placeholder is left untouched.
pub(crate) async fn resolve(
    ctx: &Context,
    collaborators: &Collaborators,
    text: &str,
) -> Result<String, InstructionError> {
    let mut values: HashMap<Reference, String> = HashMap::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(reference) = reference(&caps) else {
            continue;
        };
        if values.contains_key(&reference) {
            continue;
        }
        let value = match &reference {
            Reference::IpAddress(service_id) => {
                ctx.run(collaborators.network.get_service_ip(service_id))
                    .await??
            }
            Reference::Fact(service_id, fact_name) => {
                ctx.run(collaborators.facts.wait_for_fact(service_id, fact_name))
                    .await??
            }
        };
        values.insert(reference, value);
    }
    if values.is_empty() {
        return Ok(text.to_string());
    }

    Ok(PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            reference(caps)
                .and_then(|reference| values.get(&reference).cloned())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned())
}

pub(crate) async fn resolve_all(
    ctx: &Context,
    collaborators: &Collaborators,
    texts: &[String],
) -> Result<Vec<String>, InstructionError> {
    let mut resolved = Vec::with_capacity(texts.len());
    for text in texts {
        resolved.push(resolve(ctx, collaborators, text).await?);
    }
    Ok(resolved)
}
