use crate::context::ActionContext;
use kestrel_common::KestrelConfig;
use kestrel_hypervisor::MemoryHypervisor;
use std::sync::Arc;

/// Context for a powered-on `alice/box1` in a fresh [`MemoryHypervisor`]
pub(crate) fn test_context() -> (Arc<MemoryHypervisor>, ActionContext) {
    test_context_with(KestrelConfig::default())
}

pub(crate) fn test_context_with(config: KestrelConfig) -> (Arc<MemoryHypervisor>, ActionContext) {
    let hv = Arc::new(MemoryHypervisor::new());
    let vm = hv.add_vm("alice", "box1", None).unwrap();
    let ctx = ActionContext::new(hv.clone(), hv.clone(), Arc::new(config), vm);
    (hv, ctx)
}
