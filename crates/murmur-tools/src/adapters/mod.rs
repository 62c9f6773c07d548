// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The four tool integration kinds behind one statically-dispatched surface.

pub mod executable;
pub mod http;
pub mod native;
pub mod subprocess;

use serde_json::Value;

use crate::contracts::{
    validate_required_fields, ExecResult, ExecutionContext, HealthStatus, ToolKind, ToolMetadata,
};

pub use executable::ExecutableAdapter;
pub use http::{HttpAdapter, HttpAuth};
pub use native::NativeAdapter;
pub use subprocess::SubprocessRpcAdapter;

/// A loaded tool.  Matching on the variant is exhaustive: adding a fifth
/// kind breaks compilation at every dispatch site instead of silently
/// falling through a trait object.
pub enum ToolInstance {
    Native(NativeAdapter),
    SubprocessRpc(SubprocessRpcAdapter),
    Executable(ExecutableAdapter),
    Http(HttpAdapter),
}

impl ToolInstance {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInstance::Native(_) => ToolKind::Native,
            ToolInstance::SubprocessRpc(_) => ToolKind::SubprocessRpc,
            ToolInstance::Executable(_) => ToolKind::Executable,
            ToolInstance::Http(_) => ToolKind::Http,
        }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        match self {
            ToolInstance::Native(a) => a.metadata(),
            ToolInstance::SubprocessRpc(a) => a.metadata(),
            ToolInstance::Executable(a) => a.metadata(),
            ToolInstance::Http(a) => a.metadata(),
        }
    }

    pub async fn execute(
        &self,
        capability: &str,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> ExecResult {
        match self {
            ToolInstance::Native(a) => a.execute(capability, input, ctx).await,
            ToolInstance::SubprocessRpc(a) => a.execute(capability, input, ctx).await,
            ToolInstance::Executable(a) => a.execute(capability, input, ctx).await,
            ToolInstance::Http(a) => a.execute(capability, input, ctx).await,
        }
    }

    pub async fn health_check(&self) -> HealthStatus {
        match self {
            ToolInstance::Native(a) => a.health_check().await,
            ToolInstance::SubprocessRpc(a) => a.health_check().await,
            ToolInstance::Executable(a) => a.health_check().await,
            ToolInstance::Http(a) => a.health_check().await,
        }
    }

    /// Validate input against the declared capability schema.  Uniform
    /// across kinds: capability existence plus required fields.
    pub fn validate_input(&self, capability: &str, input: &Value) -> Vec<String> {
        validate_required_fields(self.metadata(), capability, input)
    }

    /// Release external resources.  Only subprocess-backed tools hold any.
    pub async fn stop(&self) {
        if let ToolInstance::SubprocessRpc(a) = self {
            a.stop().await;
        }
    }
}
