pub mod config;
pub mod decay;
pub mod endpoint;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod supervisor;
pub mod transport;
pub mod view;
pub mod watcher;
