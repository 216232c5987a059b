//! Domain types for PoolLab: tasks, results and log events.

pub mod event;
pub mod ids;
pub mod result;
pub mod task;

pub use event::{EventKind, LogEvent, MAX_EVENT_DATA_CHARS};
pub use ids::{ResultId, TaskId};
pub use result::{ResultRecord, ResultType};
pub use task::{
    ComboRange, RequestError, SearchPlan, Task, TaskMode, TaskRequest, TaskStatus,
    TransitionError, ValidatedRequest, DEFAULT_TOP_N,
};
