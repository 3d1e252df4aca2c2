mod apply_loop;

pub use apply_loop::ApplyLoop;
pub use apply_loop::ApplyLoopError;
pub use apply_loop::SnapshotPolicy;
