pub mod loader;

pub use loader::{
    CacheKey, CacheStats, CacheStore, ImageDecoder, InFlightRegistry, LifecycleCallbacks,
    LoadEvent, LoadOutcome, LoaderError, LoaderSettings, PicLoader, RenderTarget, RequestConfig,
    SettingsManager,
};
