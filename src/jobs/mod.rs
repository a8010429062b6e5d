//! Search policies and housekeeping jobs
//!
//! Each job decides what to search for and when; the actual searching goes
//! through the shared [`SearchPipeline`].

pub mod backlog;
pub mod daily_search;
pub mod proper_finder;
pub mod search;
pub mod show_updater;

pub use backlog::BacklogSearcher;
pub use daily_search::DailySearcher;
pub use proper_finder::ProperFinder;
pub use search::{ManualResults, ManualSearchResults, SearchPipeline, SearchReport};
pub use show_updater::{ShowUpdater, SubtitleFinder};
