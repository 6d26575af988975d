//! Maps operation types to their processors.

use std::collections::HashMap;
use std::sync::Arc;

use cf_av::ToolRegistry;
use cf_core::{Error, OperationType, Result};

use crate::processor::Processor;
use crate::processors::{
    AudioOverlayProcessor, JoinProcessor, SubtitlesProcessor, TextOverlayProcessor,
    VideoOverlayProcessor,
};

/// Registry of processors keyed by the operation they implement.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<OperationType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in processor.
    pub fn with_defaults(tools: Arc<ToolRegistry>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JoinProcessor::new(tools.clone())));
        registry.register(Arc::new(AudioOverlayProcessor::new(tools.clone())));
        registry.register(Arc::new(TextOverlayProcessor::new(tools.clone())));
        registry.register(Arc::new(SubtitlesProcessor::new(tools.clone())));
        registry.register(Arc::new(VideoOverlayProcessor::new(tools)));
        registry
    }

    /// Register a processor, replacing any previous one for the same operation.
    pub fn register(&mut self, processor: Arc<dyn Processor>) -> &mut Self {
        let op = processor.operation();
        if self.processors.insert(op, processor).is_some() {
            tracing::debug!(operation = %op, "Replaced registered processor");
        }
        self
    }

    /// Look up the processor for `op`.
    pub fn resolve(&self, op: OperationType) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(&op)
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!("no processor registered for operation '{op}'"))
            })
    }

    /// Validate one step without executing it.
    pub fn validate(
        &self,
        op: OperationType,
        config: &serde_json::Value,
        inputs: &[String],
    ) -> Result<()> {
        self.resolve(op)?.validate(config, inputs)
    }

    /// Registered operation types, in a stable order.
    pub fn operations(&self) -> Vec<OperationType> {
        let mut ops: Vec<_> = self.processors.keys().copied().collect();
        ops.sort_by_key(|op| op.as_str());
        ops
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}
