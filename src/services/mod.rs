//! Shared services: parsing, ranking, scheduling, queues and hand-off

pub mod job_queue;
pub mod logging;
pub mod notifications;
pub mod quality;
pub mod queues;
pub mod release_parser;
pub mod scheduler;
pub mod selector;
pub mod snatch;

pub use job_queue::{JobPriority, JobQueue, QueueItem, TargetLocks};
pub use quality::Quality;
pub use scheduler::{JobContext, ScheduleSpec, ScheduledJob, Scheduler};
pub use selector::{RankedResult, ReleaseSelector};
