//! Domain types: identities, request parameters and the fetch error taxonomy.

pub mod error;
pub mod identity;
pub mod params;

pub use error::{FetchError, FetchErrorKind};
pub use identity::{Drive, ResourceIdentity, Revision, WikiPath};
pub use params::{CacheMode, RequestParameters};
