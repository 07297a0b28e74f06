//! Endpoint map built from the discovery response.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::Operation;
use crate::common::ClientError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolEntry {
    protocol_id: String,
    protocol_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DiscoveryResult {
    protocol_list: Vec<ProtocolEntry>,
}

/// Immutable protocol id to endpoint URL map.
///
/// Refreshing means building a new registry and swapping it in whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolRegistry {
    endpoints: HashMap<String, String>,
}

impl ProtocolRegistry {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self { endpoints }
    }

    /// Build from the `result` payload of a successful discovery call.
    pub fn from_discovery(result: Value) -> Result<Self, ClientError> {
        let parsed: DiscoveryResult = serde_json::from_value(result)
            .map_err(|e| ClientError::InvalidResponse(format!("protocol list: {e}")))?;

        let mut endpoints = HashMap::with_capacity(parsed.protocol_list.len());
        for entry in parsed.protocol_list {
            if let Some(previous) = endpoints.insert(entry.protocol_id.clone(), entry.protocol_url) {
                tracing::warn!(
                    protocol_id = %entry.protocol_id,
                    previous = %previous,
                    "duplicate protocol id in discovery response, keeping the later url"
                );
            }
        }

        if endpoints.is_empty() {
            return Err(ClientError::InvalidResponse(
                "discovery returned an empty protocol list".to_string(),
            ));
        }

        Ok(Self { endpoints })
    }

    pub fn resolve(&self, operation: Operation) -> Result<&str, ClientError> {
        self.endpoints
            .get(operation.pid())
            .map(String::as_str)
            .ok_or_else(|| ClientError::UnknownOperation(operation.to_string()))
    }

    /// Resolve by operation name or raw protocol id.
    pub fn resolve_id(&self, id: &str) -> Result<&str, ClientError> {
        if let Some(url) = self.endpoints.get(id) {
            return Ok(url);
        }
        let operation: Operation = id.parse()?;
        self.resolve(operation)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Operations the server did not advertise.
    pub fn missing_operations(&self) -> Vec<Operation> {
        Operation::ALL
            .iter()
            .copied()
            .filter(|op| !self.endpoints.contains_key(op.pid()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn discovered() -> ProtocolRegistry {
        ProtocolRegistry::from_discovery(json!({
            "protocolList": [
                {"protocolId": "P076", "protocolUrl": "http://gw/login"},
                {"protocolId": "P079", "protocolUrl": "http://gw/chat/send"},
            ]
        }))
        .expect("valid discovery")
    }

    #[test]
    fn resolves_advertised_operations() {
        let registry = discovered();
        assert_eq!(registry.resolve(Operation::Login).unwrap(), "http://gw/login");
        assert_eq!(registry.resolve_id("P079").unwrap(), "http://gw/chat/send");
        assert_eq!(registry.resolve_id("ChatSend").unwrap(), "http://gw/chat/send");
    }

    #[test]
    fn miss_is_unknown_operation() {
        let registry = discovered();
        assert!(matches!(
            registry.resolve(Operation::MainCount),
            Err(ClientError::UnknownOperation(_))
        ));
        assert!(matches!(
            registry.resolve_id("UnknownId"),
            Err(ClientError::UnknownOperation(_))
        ));
    }

    #[test]
    fn empty_protocol_list_is_rejected() {
        let err = ProtocolRegistry::from_discovery(json!({"protocolList": []})).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn reports_unadvertised_operations() {
        let registry = discovered();
        let missing = registry.missing_operations();
        assert!(missing.contains(&Operation::MainCount));
        assert!(!missing.contains(&Operation::Login));
        assert_eq!(missing.len(), Operation::ALL.len() - 2);
    }
}
