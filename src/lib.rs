pub mod error;
pub mod fetch;
pub mod models;
pub mod parser;
pub mod resolver;
pub mod schema;
pub mod stitcher;
pub mod validator;

pub use error::{ErrorKind, ResolveError, Result, VastError};
pub use fetch::{AsyncFetcher, CachedFetcher, Fetcher, HttpFetcher};
pub use models::{Document, Node, NodeId, Tree};
pub use resolver::{
    AbortHandle, ChainState, ChainStatus, PartialChain, ResolveOptions, ResolveTask, ResolvedAd,
    Resolver, Source, Trackers,
};
pub use schema::{Schema, SchemaRule, SchemaVersion};
pub use validator::{ValidationError, Validator, ValidatorOptions, validate};

/// Resolve a chain with default options, blocking on every fetch
pub fn resolve_sync(source: impl Into<Source>, fetcher: &dyn Fetcher) -> std::result::Result<ResolvedAd, ResolveError> {
    Resolver::default().resolve_sync(source, fetcher)
}

pub mod async_api {
    use crate::error::ResolveError;
    use crate::fetch::{AsyncFetcher, HttpFetcher};
    use crate::resolver::{ResolveOptions, ResolvedAd, Resolver, Source};

    /// Fetch `input` (locator or XML text) and follow its wrapper chain over HTTP
    pub async fn resolve(input: &str, options: ResolveOptions) -> Result<ResolvedAd, ResolveError> {
        Resolver::new(options)
            .resolve_async(Source::detect(input), &HttpFetcher::new())
            .await
    }

    /// Resolve with a caller-provided fetch capability
    pub async fn resolve_with(
        source: impl Into<Source>,
        options: ResolveOptions,
        fetcher: &dyn AsyncFetcher,
    ) -> Result<ResolvedAd, ResolveError> {
        Resolver::new(options).resolve_async(source, fetcher).await
    }
}
