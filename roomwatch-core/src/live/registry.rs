use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use url::Url;

use super::{CachedLive, DirectLive, InfoCache, InitializingLive, Live, LiveId, LiveOptions, SourceError};

const RESOLVE_ATTEMPTS: u32 = 3;

/// Builds sources for one platform
pub trait SourceBuilder: Send + Sync {
    fn build(&self, url: Url, options: LiveOptions) -> Result<Arc<dyn Live>, SourceError>;
}

struct DirectBuilder;

impl SourceBuilder for DirectBuilder {
    fn build(&self, url: Url, options: LiveOptions) -> Result<Arc<dyn Live>, SourceError> {
        Ok(Arc::new(DirectLive::new(url, options)?))
    }
}

/// Maps platform hosts to their builders. Hosts without a builder are
/// handled as direct stream urls.
pub struct SourceRegistry {
    builders: HashMap<String, Arc<dyn SourceBuilder>>,
    fallback: Arc<dyn SourceBuilder>,
    retry_delay: Duration,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
            fallback: Arc::new(DirectBuilder),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Delay between the resolve attempts made by [`SourceRegistry::create`]
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn register(&mut self, host: impl Into<String>, builder: Arc<dyn SourceBuilder>) {
        self.builders.insert(host.into(), builder);
    }

    fn builder_for(&self, url: &Url) -> &Arc<dyn SourceBuilder> {
        url.host_str()
            .and_then(|host| self.builders.get(host))
            .unwrap_or(&self.fallback)
    }

    /// Build the source for `url` and resolve it.
    ///
    /// The source is wrapped so its info lands in `cache`. When it does not
    /// answer after a few attempts it is parked behind an
    /// [`InitializingLive`] placeholder that the watcher keeps retrying.
    pub async fn create(
        &self,
        url: Url,
        cache: &InfoCache,
        options: LiveOptions,
    ) -> Result<Arc<dyn Live>, SourceError> {
        let inner = self.builder_for(&url).build(url.clone(), options.clone())?;
        let live: Arc<dyn Live> = Arc::new(CachedLive::new(inner, cache.clone()));

        for attempt in 1..=RESOLVE_ATTEMPTS {
            match live.get_info().await {
                Ok(info) => {
                    if let Some(custom_id) = &info.custom_live_id {
                        live.set_live_id_by_string(custom_id);
                    }
                    debug!(url = %url, room_id = %live.live_id(), "Room source resolved");
                    return Ok(live);
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Failed to resolve room source");
                    if attempt < RESOLVE_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let placeholder: Arc<dyn Live> = Arc::new(CachedLive::new(
            Arc::new(InitializingLive::new(live, url, options)),
            cache.clone(),
        ));
        // Seed the cache so the placeholder shows up with its url as name.
        let _ = placeholder.get_info().await;
        Ok(placeholder)
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Every room source known to the process, keyed by id
#[derive(Default)]
pub struct RoomTable {
    rooms: DashMap<LiveId, Arc<dyn Live>>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a room with the same id is already present
    pub fn insert(&self, live: Arc<dyn Live>) -> bool {
        match self.rooms.entry(live.live_id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(live);
                true
            }
        }
    }

    /// Insert or overwrite
    pub fn upsert(&self, live: Arc<dyn Live>) {
        self.rooms.insert(live.live_id(), live);
    }

    #[must_use]
    pub fn get(&self, id: &LiveId) -> Option<Arc<dyn Live>> {
        self.rooms.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &LiveId) -> Option<Arc<dyn Live>> {
        self.rooms.remove(id).map(|(_, live)| live)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Live>> {
        self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::MockLive;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_create_resolves_direct_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cache = InfoCache::new();
        let url = Url::parse(&format!("{}/live/a.flv", server.uri())).unwrap();
        let live = SourceRegistry::new()
            .create(url.clone(), &cache, LiveOptions::default())
            .await
            .unwrap();

        assert_eq!(live.live_id(), LiveId::from_url(&url));
        assert!(live.initializing_origin().is_none());
        assert!(cache.get(&live.live_id()).unwrap().status);
    }

    #[tokio::test]
    async fn test_create_falls_back_to_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let cache = InfoCache::new();
        let url = Url::parse(&format!("{}/live/b.flv", server.uri())).unwrap();
        let live = SourceRegistry::new()
            .with_retry_delay(Duration::from_millis(10))
            .create(url.clone(), &cache, LiveOptions::default())
            .await
            .unwrap();

        assert!(live.initializing_origin().is_some());
        let cached = cache.get(&live.live_id()).unwrap();
        assert!(cached.initializing);
        assert_eq!(cached.room_name, url.to_string());
    }

    struct FixedBuilder;

    impl SourceBuilder for FixedBuilder {
        fn build(&self, _url: Url, _options: LiveOptions) -> Result<Arc<dyn Live>, SourceError> {
            let mut mock = MockLive::new();
            mock.expect_live_id()
                .return_const(LiveId::from_string("fixed"));
            mock.expect_set_live_id_by_string()
                .withf(|value: &str| value == "custom")
                .times(1)
                .return_const(());
            mock.expect_get_info().returning(|| {
                Ok(crate::live::Info {
                    custom_live_id: Some("custom".to_string()),
                    ..Default::default()
                })
            });
            Ok(Arc::new(mock))
        }
    }

    #[tokio::test]
    async fn test_registered_builder_applies_custom_id() {
        let mut registry = SourceRegistry::new();
        registry.register("platform.example.com", Arc::new(FixedBuilder));

        let cache = InfoCache::new();
        let url = Url::parse("https://platform.example.com/room/1").unwrap();
        let live = registry
            .create(url, &cache, LiveOptions::default())
            .await
            .unwrap();

        assert_eq!(live.live_id(), LiveId::from_string("fixed"));
    }

    #[test]
    fn test_room_table_rejects_duplicates() {
        let table = RoomTable::new();
        let make = || {
            let mut mock = MockLive::new();
            mock.expect_live_id().return_const(LiveId::from_string("a"));
            Arc::new(mock) as Arc<dyn Live>
        };

        assert!(table.insert(make()));
        assert!(!table.insert(make()));
        assert_eq!(table.len(), 1);
        assert!(table.remove(&LiveId::from_string("a")).is_some());
        assert!(table.is_empty());
    }
}
