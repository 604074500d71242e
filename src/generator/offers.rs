use super::prompt::UserProfile;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// A shop promotion attached to a POI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: u64,
    pub poi_id: u64,
    pub discount_percent: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub current_uses: u32,
    #[serde(default)]
    pub min_age: Option<u32>,
    #[serde(default)]
    pub max_age: Option<u32>,
    /// Interests the offer is aimed at; empty means everyone
    #[serde(default)]
    pub target_interests: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl Offer {
    /// Internal consistency of the record itself.
    pub fn is_well_formed(&self) -> bool {
        if self.discount_percent > 100 {
            return false;
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from > until {
                return false;
            }
        }
        if let (Some(min), Some(max)) = (self.min_age, self.max_age) {
            if min > max {
                return false;
            }
        }
        true
    }

    /// Active, inside its date window and not used up on `day`.
    pub fn is_available_on(&self, day: NaiveDate) -> bool {
        if !self.is_active {
            return false;
        }
        if self.valid_from.is_some_and(|from| day < from) {
            return false;
        }
        if self.valid_until.is_some_and(|until| day > until) {
            return false;
        }
        self.remaining_uses() != Some(0)
    }

    /// Age and interest targeting. An age limit excludes users of unknown age.
    pub fn applies_to(&self, profile: &UserProfile) -> bool {
        if self.min_age.is_some() || self.max_age.is_some() {
            let Some(age) = profile.age else {
                return false;
            };
            if self.min_age.is_some_and(|min| age < min) || self.max_age.is_some_and(|max| age > max) {
                return false;
            }
        }
        if self.target_interests.is_empty() {
            return true;
        }
        profile.interests.iter().any(|interest| {
            let interest = interest.trim().to_lowercase();
            self.target_interests
                .iter()
                .any(|target| target.trim().to_lowercase() == interest)
        })
    }

    pub fn is_targeted(&self) -> bool {
        self.min_age.is_some() || self.max_age.is_some() || !self.target_interests.is_empty()
    }

    /// `None` when the offer has no usage cap.
    pub fn remaining_uses(&self) -> Option<u32> {
        self.max_uses.map(|max| max.saturating_sub(self.current_uses))
    }
}

/// Offers keyed by POI id, loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct OfferDirectory {
    offers: HashMap<u64, Vec<Offer>>,
}

impl OfferDirectory {
    /// Malformed offers are dropped with a warning.
    pub fn new(offers: Vec<Offer>) -> Self {
        let mut by_poi: HashMap<u64, Vec<Offer>> = HashMap::new();
        for offer in offers {
            if !offer.is_well_formed() {
                warn!(offer_id = offer.offer_id, poi_id = offer.poi_id, "Skipping malformed offer");
                continue;
            }
            by_poi.entry(offer.poi_id).or_default().push(offer);
        }
        Self { offers: by_poi }
    }

    /// Load a JSON array of offers.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read offers file {}", path.display()))?;
        let offers: Vec<Offer> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse offers file {}", path.display()))?;
        let directory = Self::new(offers);
        info!(offers = directory.len(), path = %path.display(), "Loaded offers");
        Ok(directory)
    }

    /// Best offer at `poi_id` for this user on `day`.
    ///
    /// Targeted offers the user qualifies for win over general ones, then the
    /// highest discount, then the earliest expiry, then the lowest id.
    pub fn best_for(&self, poi_id: u64, profile: &UserProfile, day: NaiveDate) -> Option<&Offer> {
        self.offers
            .get(&poi_id)?
            .iter()
            .filter(|offer| offer.is_available_on(day) && offer.applies_to(profile))
            .min_by(|a, b| {
                b.is_targeted()
                    .cmp(&a.is_targeted())
                    .then(b.discount_percent.cmp(&a.discount_percent))
                    .then(a.valid_until.unwrap_or(NaiveDate::MAX).cmp(&b.valid_until.unwrap_or(NaiveDate::MAX)))
                    .then(a.offer_id.cmp(&b.offer_id))
            })
    }

    pub fn len(&self) -> usize {
        self.offers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}
