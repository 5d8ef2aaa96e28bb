//! Fetch resolution: requests, fetchers, the shared cache pipeline and the registry.

pub mod context;
pub mod fetcher;
pub mod host;
pub mod kinds;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod url;

pub use context::{FetchEnv, FetchEnvBuilder, RequestContext};
pub use fetcher::{FetchResult, FetchState, Fetcher};
pub use host::{
    ConfigValues, ImageTransformer, MarkupRenderer, NamespaceSlotResolver, RenderScope,
    SlotResolver, SourceFiles, StaticConfigValues, TargetSize,
};
pub use pipeline::CachedOutput;
pub use registry::{FetcherFactory, FetcherRegistry};
pub use request::FetchRequest;
pub use resolver::{DriveKind, DriveSpec, DriveTable, ResolvedSource};
