pub mod frame;
pub mod task_msg;

pub use frame::{Body, Header, HEADER_FRAME_SIZE};
pub use task_msg::{Fragment, ScanTableInfo, TaskMsg};
