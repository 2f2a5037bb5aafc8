//! Fetch, transform and lookup services.

pub mod fetcher;
pub mod lookup;
pub mod transform;

// Re-export for convenience
pub use fetcher::{FetchOptions, HttpTransport, RetryingFetcher, Transport};
pub use lookup::{CachedLookup, Lookup};
pub use transform::{
    CrewMatch, CrewPattern, TransformOutcome, extract_crew, extract_crew_tag, transform,
    transform_at, transform_batch,
};
