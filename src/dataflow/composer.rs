use crate::cache::{CacheKey, MessageCache, Resolved};
use crate::generator::{
    build_prompt, context_fingerprint, fallback_message, finalize_message, Generator, OfferDirectory, ProfileDirectory,
};
use crate::geo::PoiMatch;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resolves the notification text for a fired (entity, POI) pair through the
/// shared single-flight cache.
#[derive(Clone)]
pub struct MessageComposer {
    cache: Arc<MessageCache>,
    generator: Arc<dyn Generator>,
    profiles: Arc<ProfileDirectory>,
    offers: Arc<OfferDirectory>,
}

impl MessageComposer {
    pub fn new(cache: Arc<MessageCache>, generator: Arc<dyn Generator>, profiles: Arc<ProfileDirectory>) -> Self {
        Self {
            cache,
            generator,
            profiles,
            offers: Arc::new(OfferDirectory::default()),
        }
    }

    pub fn with_offers(mut self, offers: Arc<OfferDirectory>) -> Self {
        self.offers = offers;
        self
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    /// Offer validity is judged on the UTC day of `event_time_ms`.
    pub async fn compose(&self, entity_id: &str, matched: &PoiMatch, event_time_ms: i64) -> Resolved {
        let profile = self.profiles.get(entity_id);
        let day = DateTime::from_timestamp_millis(event_time_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();
        let offer = self.offers.best_for(matched.poi.poi_id, profile, day);
        let fingerprint = context_fingerprint(profile, &matched.poi, offer);
        let key = CacheKey::new(entity_id, matched.poi.poi_id, &fingerprint);
        let prompt = build_prompt(profile, &matched.poi, matched.distance_m, offer);
        let generator = Arc::clone(&self.generator);

        self.cache
            .get_or_generate(
                &key,
                || fallback_message(&matched.poi.name),
                || async move {
                    generator
                        .generate(&prompt)
                        .await
                        .map(|raw| finalize_message(&raw, &prompt.poi_name))
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MessageSource};
    use crate::generator::{GenerationError, Offer, Prompt, UserProfile};
    use crate::geo::{GeoPoint, PointOfInterest};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    // 2026-10-18T10:00:00Z
    const NOW_MS: i64 = 1_792_317_600_000;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
            Ok(format!("Come visit [shop] for {}", prompt.category))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl Generator for BrokenGenerator {
        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            Err(GenerationError::Empty)
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn matched() -> PoiMatch {
        PoiMatch {
            poi: PointOfInterest {
                poi_id: 4,
                name: "Pasticceria Marchesi".to_string(),
                category: "bakery".to_string(),
                location: GeoPoint::new(45.4650, 9.1870),
            },
            distance_m: 25.0,
        }
    }

    fn composer(generator: Arc<dyn Generator>) -> MessageComposer {
        let mut profiles = HashMap::new();
        profiles.insert(
            "user_1".to_string(),
            UserProfile {
                age: Some(41),
                profession: Some("Chef".to_string()),
                interests: vec!["pastry".to_string()],
            },
        );
        MessageComposer::new(
            Arc::new(MessageCache::new(CacheSettings {
                ttl: Duration::from_secs(60),
                max_entries: 10,
                generation_timeout: Duration::from_secs(1),
            })),
            generator,
            Arc::new(ProfileDirectory::new(profiles)),
        )
    }

    #[tokio::test]
    async fn test_compose_generates_then_caches() {
        let composer = composer(Arc::new(EchoGenerator));

        let first = composer.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(first.source, MessageSource::Generated);
        assert_eq!(first.text, "Come visit Pasticceria Marchesi for bakery");

        let second = composer.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(second.source, MessageSource::Cached);
        assert_eq!(second.text, first.text);

        // Another entity has its own key
        let other = composer.compose("user_2", &matched(), NOW_MS).await;
        assert_eq!(other.source, MessageSource::Generated);
    }

    #[tokio::test]
    async fn test_compose_falls_back_on_generator_error() {
        let composer = composer(Arc::new(BrokenGenerator));
        let resolved = composer.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(resolved.source, MessageSource::Fallback);
        assert_eq!(resolved.text, "Discover Pasticceria Marchesi just a few steps away!");
    }

    struct PromptEcho;

    #[async_trait]
    impl Generator for PromptEcho {
        async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
            let discount = prompt
                .text
                .lines()
                .find(|line| line.starts_with("- Discount:"))
                .unwrap_or("no offer");
            Ok(discount.to_string())
        }

        fn name(&self) -> &str {
            "prompt-echo"
        }
    }

    fn pastry_offer(offer_id: u64, discount_percent: u8) -> Offer {
        Offer {
            offer_id,
            poi_id: 4,
            discount_percent,
            description: "Panettone tasting".to_string(),
            valid_from: None,
            valid_until: None,
            is_active: true,
            max_uses: None,
            current_uses: 0,
            min_age: None,
            max_age: None,
            target_interests: vec!["pastry".to_string()],
        }
    }

    #[tokio::test]
    async fn test_offer_reaches_prompt_and_splits_cache() {
        let plain = composer(Arc::new(PromptEcho));
        let without = plain.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(without.text, "no offer");

        let cache = Arc::clone(plain.cache());
        let with_offer = MessageComposer::new(cache, Arc::new(PromptEcho), Arc::clone(&plain.profiles))
            .with_offers(Arc::new(OfferDirectory::new(vec![pastry_offer(1, 20)])));
        let first = with_offer.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(first.source, MessageSource::Generated);
        assert_eq!(first.text, "- Discount: 20%");

        // Same offer, same cache entry
        let again = with_offer.compose("user_1", &matched(), NOW_MS).await;
        assert_eq!(again.source, MessageSource::Cached);

        // user_2 has no pastry interest, so the targeted offer does not apply
        let other = with_offer.compose("user_2", &matched(), NOW_MS).await;
        assert_eq!(other.text, "no offer");
    }
}
