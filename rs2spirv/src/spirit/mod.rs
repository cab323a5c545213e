//! Post-link fixup passes over the assembled binary word stream.
pub mod builtin;
pub mod global_alloc;
pub mod transformer;

pub use builtin::BuiltinLowering;
pub use global_alloc::GlobalAllocLowering;
pub use transformer::{BinaryModule, BinaryPass, PassQueue, Transformer};

/// The fixup passes the pipeline runs after assembly, in order.
pub fn default_fixup_queue() -> PassQueue {
    let mut queue = PassQueue::new();
    queue.append(Box::new(GlobalAllocLowering::new()));
    queue.append(Box::new(BuiltinLowering::new()));
    queue
}
