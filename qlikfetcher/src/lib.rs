pub mod client;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod flows;
pub mod mapper;
pub mod models;
pub mod params;
pub mod protocol;

pub use crate::config::EngineConfig;
pub use crate::correlation::{CorrelationError, ReplyCorrelation};
pub use crate::engine::EngineSession;
pub use crate::fetcher::{FetchResponse, QlikFetcher};
pub use crate::params::{FetchMode, FetcherParams, MasterItemsParams, SheetsParams};
