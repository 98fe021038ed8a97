//! Orchestration services

pub mod backend_client;
pub mod dispatcher;
pub mod executor;
pub mod identity;
pub mod ingestor;
pub mod media;
pub mod registry;
pub mod search;
pub mod task_view;

pub use backend_client::{BackendClient, BackendClientError};
pub use dispatcher::TaskDispatcher;
pub use executor::TaskExecutor;
pub use identity::IdentityResolver;
pub use ingestor::{CompletionIngestor, TaskResultReport};
pub use media::MediaService;
pub use registry::BackendRegistry;
pub use search::{SearchFanout, SearchFilters};
