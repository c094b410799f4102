pub mod audit;
pub mod config;
pub mod extract;
pub mod paths;
pub mod reconcile;
pub mod scan;
pub mod store;
pub mod table;
pub mod trigger;
pub mod util;
pub mod vcs;
pub mod warn;
pub mod watcher;
