pub mod location_sync;
pub mod planner;
pub mod poller;
pub mod routing;
pub mod snapshots;
