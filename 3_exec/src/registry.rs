//! Static operator tables.

use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Backend {
    Cpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

pub struct OperatorEntry<Op: ?Sized> {
    pub op_type: &'static str,
    pub backend: Backend,
    /// Oldest opset whose semantics the implementation satisfies.
    pub opset_min: u32,
    pub factory: fn() -> Box<Op>,
}

pub struct Registry<Op: ?Sized> {
    entries: Vec<OperatorEntry<Op>>,
}

impl<Op: ?Sized> Registry<Op> {
    pub fn new(entries: impl IntoIterator<Item = OperatorEntry<Op>>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> &[OperatorEntry<Op>] {
        &self.entries
    }

    /// Finds the newest implementation usable under `opset`.
    pub fn lookup(&self, op_type: &str, backend: Backend, opset: u32) -> Option<&OperatorEntry<Op>> {
        self.entries
            .iter()
            .filter(|e| e.op_type == op_type && e.backend == backend && e.opset_min <= opset)
            .max_by_key(|e| e.opset_min)
    }

    pub fn create(&self, op_type: &str, backend: Backend, opset: u32) -> Option<Box<Op>> {
        self.lookup(op_type, backend, opset).map(|e| (e.factory)())
    }
}
