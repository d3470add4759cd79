use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// First message a server sends over the data channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub server_id: String,
    pub server_version: String,
    pub schema_version: u32,
    pub min_supported_schema_version: u32,
    /// Server runs as an add-on of a host platform.
    #[serde(default)]
    pub addon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ServerDescriptor {
    /// Parse an untrusted data-channel payload.
    pub fn parse(payload: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(payload).context("payload is not valid JSON")?;
        if !value.is_object() {
            anyhow::bail!("payload is not a JSON object");
        }
        let mut descriptor: ServerDescriptor =
            serde_json::from_value(value).context("payload is not a server descriptor")?;
        if descriptor.server_id.trim().is_empty() {
            anyhow::bail!("server_id is empty");
        }
        if descriptor.server_version.trim().is_empty() {
            anyhow::bail!("server_version is empty");
        }
        if descriptor
            .name
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            descriptor.name = None;
        }
        Ok(descriptor)
    }

    /// Name to show for this server, generated from the id when the server
    /// did not send one.
    pub fn display_name(&self, product: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} Server {}", product, self.server_id),
        }
    }
}
