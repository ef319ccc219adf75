pub mod process;
pub mod state;
pub mod status;

pub use process::{OutboundReceiver, ProcessManager, ProcessProxy};
pub use state::{Worker, WorkerSnapshot};
pub use status::WorkerStatus;
