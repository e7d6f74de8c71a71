//! Backend registry
//!
//! The only place that enumerates backends: adding one touches this map
//! plus a new executor implementation, nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Backend, Executor, ExecutorError, ExecutorResult};

/// Maps backend tags to executor instances, built once at process start
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Backend, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.backend(), executor);
    }

    /// Resolve the executor for a backend
    pub fn get(&self, backend: Backend) -> ExecutorResult<Arc<dyn Executor>> {
        self.executors
            .get(&backend)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownBackend(backend.as_str().to_string()))
    }

    /// All registered executors, for prepare/remove fan-out
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Executor>> {
        self.executors.values()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Function;
    use crate::executor::{ExecutionOutput, InvocationMetrics};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct FakeExecutor(Backend);

    #[async_trait]
    impl Executor for FakeExecutor {
        fn backend(&self) -> Backend {
            self.0
        }

        async fn prepare(&self, _function: &Function) -> ExecutorResult<()> {
            Ok(())
        }

        async fn execute(
            &self,
            _function: &Function,
            event: Value,
            _timeout: Duration,
        ) -> ExecutorResult<ExecutionOutput> {
            Ok(ExecutionOutput {
                result: event,
                metrics: InvocationMetrics::default(),
            })
        }

        async fn remove(&self, _function: &Function) {}
    }

    #[test]
    fn test_lookup() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(FakeExecutor(Backend::Standard)));

        assert!(registry.get(Backend::Standard).is_ok());

        let err = match registry.get(Backend::Sandbox) {
            Err(err) => err,
            Ok(_) => panic!("expected UnknownBackend error"),
        };
        assert!(matches!(err, ExecutorError::UnknownBackend(tag) if tag == "sandbox"));
    }

    #[test]
    fn test_backend_tag_parsing() {
        assert_eq!(Backend::parse("standard"), Some(Backend::Standard));
        assert_eq!(Backend::parse("sandbox"), Some(Backend::Sandbox));
        assert_eq!(Backend::parse("firecracker"), None);
    }

    #[test]
    fn test_all_iterates_registered() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(FakeExecutor(Backend::Standard)));
        registry.register(Arc::new(FakeExecutor(Backend::Sandbox)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.all().count(), 2);
    }
}
