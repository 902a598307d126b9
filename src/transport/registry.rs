//! Transport tag → binding map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use crate::lifecycle::{HookError, LifecycleError, Supervisor};
use crate::transport::error::TransportError;
use crate::transport::{HandlerTarget, TransportBinding};

/// Registry of the transports this process can serve on.
#[derive(Default)]
pub struct TransportRegistry {
    bindings: RwLock<HashMap<String, Arc<dyn TransportBinding>>>,
    serving: Mutex<Option<CancellationToken>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the binding for `tag`.
    pub fn register<B>(&self, tag: impl Into<String>, binding: B)
    where
        B: TransportBinding + 'static,
    {
        let tag = tag.into();
        let replaced = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.clone(), Arc::new(binding))
            .is_some();
        tracing::debug!(transport = %tag, replaced, "Transport registered");
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Serve on the transport registered under `tag` until it returns.
    ///
    /// Fails with `UnsupportedTransport` without serving anything when the
    /// tag is unknown. Errors from the binding are returned unchanged.
    pub async fn start(
        &self,
        ctx: CancellationToken,
        tag: &str,
        target: HandlerTarget,
    ) -> Result<(), TransportError> {
        let binding = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
            .ok_or_else(|| TransportError::UnsupportedTransport(tag.to_string()))?;

        let serve_ctx = ctx.child_token();
        *self.serving.lock().unwrap_or_else(PoisonError::into_inner) = Some(serve_ctx.clone());

        tracing::info!(transport = %tag, "Transport serving");
        let result = binding.serve(serve_ctx, target).await;

        self.serving.lock().unwrap_or_else(PoisonError::into_inner).take();
        match &result {
            Ok(()) => tracing::info!(transport = %tag, "Transport finished"),
            Err(e) => tracing::error!(transport = %tag, error = %e, "Transport failed"),
        }
        result
    }

    /// Cancel the transport currently serving, if any.
    pub fn shutdown(&self) {
        if let Some(token) = self.serving.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            token.cancel();
        }
    }

    /// Supervisor named "transport": starting fails if `selected` is not
    /// registered; stopping cancels the serving transport.
    pub fn supervisor(self: &Arc<Self>, selected: impl Into<String>) -> Result<Supervisor, LifecycleError> {
        let selected = selected.into();
        let supervisor = Supervisor::new("transport");

        let registry = self.clone();
        supervisor.on_start(move |_ctx| {
            let outcome = if registry.contains(&selected) {
                tracing::info!(transport = %selected, available = ?registry.tags(), "Transport selected");
                Ok(())
            } else {
                Err(HookError::from(TransportError::UnsupportedTransport(selected.clone())))
            };
            async move { outcome }
        })?;

        let registry = self.clone();
        supervisor.on_stop(move |_ctx| {
            registry.shutdown();
            async { Ok::<(), HookError>(()) }
        })?;

        Ok(supervisor)
    }
}
