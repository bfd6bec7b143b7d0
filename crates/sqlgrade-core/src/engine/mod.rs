pub mod cancel;
pub mod grader;
pub mod pool;
pub mod state;

pub use cancel::{CancelHandle, CancelSignal};
pub use grader::Grader;
pub use pool::WorkerPool;
