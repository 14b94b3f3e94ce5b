use bevy::tasks::BoxedFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::assets::source::Source;
use crate::error::LoadError;

/// "Give me the bytes at this location."
///
/// `timeout` bounds blocking transfers so they give up together with the
/// load that asked for them.
pub trait SourceFetcher: Send + Sync + 'static {
    fn fetch<'a>(
        &'a self,
        location: &'a str,
        timeout: Option<Duration>,
    ) -> BoxedFuture<'a, Result<Vec<u8>, LoadError>>;
}

/// Everything a loader needs to read its asset and the resources it references.
#[derive(Clone)]
pub struct LoadRequest {
    source: Source,
    fetcher: Arc<dyn SourceFetcher>,
    timeout: Option<Duration>,
}

impl LoadRequest {
    pub fn new(source: Source, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            source,
            fetcher,
            timeout: None,
        }
    }

    /// Limit every fetch to `secs`; zero leaves fetches unbounded.
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout = (secs > 0.0).then(|| Duration::from_secs_f64(secs));
        self
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Bytes of the primary asset.
    pub async fn bytes(&self) -> Result<Vec<u8>, LoadError> {
        match &self.source {
            Source::Bytes { data, .. } => Ok(data.to_vec()),
            Source::Url(location) => self.fetcher.fetch(location, self.timeout).await,
        }
    }

    /// Bytes of a resource referenced relative to the primary asset.
    pub async fn fetch_relative(&self, uri: &str) -> Result<Vec<u8>, LoadError> {
        let location = self.source.resolve_relative(uri);
        self.fetcher.fetch(&location, self.timeout).await
    }

    /// Bytes at an already resolved location.
    pub async fn fetch(&self, location: &str) -> Result<Vec<u8>, LoadError> {
        self.fetcher.fetch(location, self.timeout).await
    }
}

/// Fetcher for the current platform: the filesystem and HTTP on native
/// builds, `window.fetch` in the browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformFetcher;

impl SourceFetcher for PlatformFetcher {
    fn fetch<'a>(
        &'a self,
        location: &'a str,
        timeout: Option<Duration>,
    ) -> BoxedFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move { fetch_platform(location, timeout).await })
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn fetch_platform(location: &str, timeout: Option<Duration>) -> Result<Vec<u8>, LoadError> {
    use std::io::Read;

    if location.starts_with("http://") || location.starts_with("https://") {
        let mut agent = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            agent = agent.timeout(timeout);
        }
        let response = agent
            .build()
            .get(location)
            .call()
            .map_err(|e| LoadError::fetch(location, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| LoadError::fetch(location, e))?;
        return Ok(bytes);
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    std::fs::read(path).map_err(|e| LoadError::fetch(location, e))
}

// The browser owns request lifetimes; a timed out load simply drops the future.
#[cfg(target_arch = "wasm32")]
async fn fetch_platform(location: &str, _timeout: Option<Duration>) -> Result<Vec<u8>, LoadError> {
    use wasm_bindgen::JsCast;
    use wasm_bindgen_futures::JsFuture;

    let window =
        web_sys::window().ok_or_else(|| LoadError::fetch(location, "window not available"))?;

    let response = JsFuture::from(window.fetch_with_str(location))
        .await
        .map_err(|e| LoadError::fetch(location, format!("{e:?}")))?;
    let response: web_sys::Response = response
        .dyn_into()
        .map_err(|_| LoadError::fetch(location, "fetch did not return a Response"))?;

    if !response.ok() {
        return Err(LoadError::fetch(
            location,
            format!("HTTP {}", response.status()),
        ));
    }

    let buffer = response
        .array_buffer()
        .map_err(|e| LoadError::fetch(location, format!("{e:?}")))?;
    let buffer = JsFuture::from(buffer)
        .await
        .map_err(|e| LoadError::fetch(location, format!("{e:?}")))?;

    Ok(js_sys::Uint8Array::new(&buffer).to_vec())
}

/// Fetcher serving a fixed set of named files. Used for assets that were
/// handed over as bytes and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    files: HashMap<String, Arc<[u8]>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, location: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(location, bytes);
        self
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.files.insert(location.into(), bytes.into());
    }
}

impl SourceFetcher for MemoryFetcher {
    fn fetch<'a>(
        &'a self,
        location: &'a str,
        _timeout: Option<Duration>,
    ) -> BoxedFuture<'a, Result<Vec<u8>, LoadError>> {
        Box::pin(async move {
            self.files
                .get(location)
                .map(|bytes| bytes.to_vec())
                .ok_or_else(|| LoadError::fetch(location, "not found"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::tasks::block_on;

    #[test]
    fn in_memory_sources_skip_the_fetcher() {
        let request = LoadRequest::new(
            Source::bytes("cube.ply", vec![1u8, 2, 3]),
            Arc::new(MemoryFetcher::new()),
        );
        assert_eq!(block_on(request.bytes()), Ok(vec![1, 2, 3]));
    }

    #[test]
    fn relative_fetches_resolve_against_the_source() {
        let fetcher = MemoryFetcher::new().with_file("models/scene.bin", vec![9u8]);
        let request = LoadRequest::new(Source::url("models/scene.gltf"), Arc::new(fetcher));
        assert_eq!(block_on(request.fetch_relative("scene.bin")), Ok(vec![9]));
        assert!(matches!(
            block_on(request.fetch_relative("missing.bin")),
            Err(LoadError::Fetch { .. })
        ));
    }

    #[test]
    fn platform_fetcher_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asset.bin");
        std::fs::write(&path, b"abc").unwrap();

        let location = path.to_string_lossy().to_string();
        assert_eq!(
            block_on(PlatformFetcher.fetch(&location, None)),
            Ok(b"abc".to_vec())
        );
        assert!(block_on(PlatformFetcher.fetch("/definitely/not/here.ply", None)).is_err());
    }

    #[derive(Default)]
    struct TimeoutRecorder(std::sync::Mutex<Vec<Option<Duration>>>);

    impl SourceFetcher for TimeoutRecorder {
        fn fetch<'a>(
            &'a self,
            _location: &'a str,
            timeout: Option<Duration>,
        ) -> BoxedFuture<'a, Result<Vec<u8>, LoadError>> {
            Box::pin(async move {
                self.0.lock().unwrap().push(timeout);
                Ok(Vec::new())
            })
        }
    }

    #[test]
    fn request_timeout_reaches_every_fetch() {
        let recorder = Arc::new(TimeoutRecorder::default());
        let bounded = LoadRequest::new(Source::url("models/scene.gltf"), recorder.clone())
            .with_timeout(30.0);
        block_on(bounded.bytes()).unwrap();
        block_on(bounded.fetch_relative("scene.bin")).unwrap();

        let unbounded =
            LoadRequest::new(Source::url("models/scene.gltf"), recorder.clone()).with_timeout(0.0);
        block_on(unbounded.bytes()).unwrap();

        let thirty = Some(Duration::from_secs(30));
        assert_eq!(*recorder.0.lock().unwrap(), vec![thirty, thirty, None]);
    }
}
