//! Capability discovery.
//!
//! The peer's operations are fetched once per session with `tools/list` and
//! never written by hand here, so whatever the peer exposes on this run is
//! what the decision engine is offered. An optional static resource (e.g. a
//! map summary) is read alongside; losing it only costs context.

use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::policy::OperationSpec;
use crate::rpc::client::ProtocolClient;
use crate::rpc::mcp::OperationDescriptor;
use crate::Result;

/// Operations and static context discovered at session start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityCatalog {
    operations: Vec<OperationDescriptor>,
    summary: Option<String>,
}

impl CapabilityCatalog {
    /// Discover the peer's operations and read `summary_uri` if given.
    ///
    /// # Errors
    ///
    /// Any error from `tools/list`. A failed summary read is logged and
    /// leaves [`summary`](Self::summary) empty.
    pub async fn fetch<W, R>(
        client: &mut ProtocolClient<W, R>,
        summary_uri: Option<&str>,
    ) -> Result<Self>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let operations = client.list_tools().await?;
        let catalog = Self::from_descriptors(operations);

        info!(
            count = catalog.operations.len(),
            "loaded operations from peer"
        );
        for op in &catalog.operations {
            info!(operation = op.name, description = op.description, "operation available");
        }

        let summary = match summary_uri {
            Some(uri) => match client.read_resource(uri).await {
                Ok(text) => {
                    info!(uri, bytes = text.len(), "static resource loaded");
                    Some(text)
                }
                Err(err) => {
                    warn!(uri, %err, "could not load static resource");
                    None
                }
            },
            None => None,
        };

        Ok(Self { summary, ..catalog })
    }

    /// Build a catalog from descriptors; a repeated name keeps its first
    /// occurrence.
    #[must_use]
    pub fn from_descriptors(descriptors: Vec<OperationDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let operations = descriptors
            .into_iter()
            .filter(|op| {
                let fresh = seen.insert(op.name.clone());
                if !fresh {
                    warn!(operation = op.name, "duplicate operation name ignored");
                }
                fresh
            })
            .collect();

        Self {
            operations,
            summary: None,
        }
    }

    /// Descriptors as fetched.
    #[must_use]
    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    /// Content of the static resource, if it was read.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Whether the peer exposes an operation called `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.iter().any(|op| op.name == name)
    }

    /// Operations in the shape the decision engine consumes. Name,
    /// description and schema are carried over verbatim.
    #[must_use]
    pub fn adapted(&self) -> Vec<OperationSpec> {
        self.operations
            .iter()
            .map(|op| OperationSpec {
                name: op.name.clone(),
                description: op.description.clone(),
                parameters: op.input_schema.clone(),
            })
            .collect()
    }
}
