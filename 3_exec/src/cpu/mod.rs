//! CPU backend: plain host memory, synchronous kernels.

mod conv;

pub use conv::CpuConv;

use crate::{Backend, CpuConfig, ExecError, OperatorEntry, Registry};
use mem::{Element, Tensor};
use nn::Arg;
use std::sync::LazyLock;

/// State shared by every CPU operator call of one engine.
#[derive(Clone, Default, Debug)]
pub struct CpuContext {
    config: CpuConfig,
}

impl CpuContext {
    pub fn new(config: CpuConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn empty_tensor<T: Element>(&self, dims: impl Into<Vec<usize>>) -> Tensor {
        Tensor::zeros::<T>(dims)
    }
}

/// An operator the CPU backend can execute.
///
/// `run` is asynchronous only so that CPU operators compose with the other
/// backends; implementations complete without awaiting.
#[async_trait::async_trait]
pub trait CpuOperator: Send + Sync {
    fn initialize(&mut self, args: Option<&Arg>) -> Result<(), ExecError>;

    async fn run(&self, ctx: &CpuContext, inputs: &[&Tensor]) -> Result<Vec<Tensor>, ExecError>;
}

pub fn op_entries() -> Vec<OperatorEntry<dyn CpuOperator>> {
    conv::op_entries()
}

/// Every CPU operator, collected on first use.
pub fn registry() -> &'static Registry<dyn CpuOperator> {
    static REGISTRY: LazyLock<Registry<dyn CpuOperator>> = LazyLock::new(|| {
        let registry = Registry::new(op_entries());
        debug_assert!(registry.entries().iter().all(|e| e.backend == Backend::Cpu));
        registry
    });
    &REGISTRY
}

#[cfg(test)]
mod test_conv;
