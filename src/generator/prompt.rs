use super::offers::Offer;
use crate::geo::PointOfInterest;
use anyhow::{Context, Result};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

/// Personal context attached to a tracked entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub age: Option<u32>,
    pub profession: Option<String>,
    pub interests: Vec<String>,
}

/// Profiles keyed by entity id, loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct ProfileDirectory {
    profiles: HashMap<String, UserProfile>,
    anonymous: UserProfile,
}

impl ProfileDirectory {
    pub fn new(profiles: HashMap<String, UserProfile>) -> Self {
        Self {
            profiles,
            anonymous: UserProfile::default(),
        }
    }

    /// Load a JSON object `{"entity_id": {"age": .., "profession": .., "interests": [..]}}`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profiles file {}", path.display()))?;
        let profiles: HashMap<String, UserProfile> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse profiles file {}", path.display()))?;
        info!(profiles = profiles.len(), path = %path.display(), "Loaded user profiles");
        Ok(Self::new(profiles))
    }

    /// Profile for `entity_id`; unknown entities get the anonymous profile.
    pub fn get(&self, entity_id: &str) -> &UserProfile {
        self.profiles.get(entity_id).unwrap_or(&self.anonymous)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub poi_name: String,
    pub category: String,
}

fn offer_section(offer: Option<&Offer>) -> String {
    let Some(offer) = offer else {
        return "Offer: no special offer right now, but the shop is worth a visit.".to_string();
    };
    let remaining = match offer.remaining_uses() {
        None => "unlimited".to_string(),
        Some(n) if n <= 5 => format!("{} left, almost gone!", n),
        Some(n) => format!("{} left", n),
    };
    let valid_until = offer
        .valid_until
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "until further notice".to_string());
    format!(
        "Special offer:\n\
         - Discount: {}%\n\
         - Details: {}\n\
         - Valid until: {}\n\
         - Remaining uses: {}",
        offer.discount_percent, offer.description, valid_until, remaining
    )
}

pub fn build_prompt(
    profile: &UserProfile,
    poi: &PointOfInterest,
    distance_m: f64,
    offer: Option<&Offer>,
) -> Prompt {
    let age = profile
        .age
        .map(|a| a.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let profession = profile.profession.as_deref().unwrap_or("N/A");
    let interests = if profile.interests.is_empty() {
        "N/A".to_string()
    } else {
        profile.interests.join(", ")
    };

    let text = format!(
        "You are an advertising system writing a short, engaging notification to bring a passer-by into a shop.\n\
         \n\
         User:\n\
         - Age: {age}\n\
         - Profession: {profession}\n\
         - Interests: {interests}\n\
         \n\
         Shop:\n\
         - Name: {name}\n\
         - Category: {category}\n\
         - Distance: {distance:.0} m\n\
         \n\
         {offer}\n\
         \n\
         Rules:\n\
         - The user is a few metres from the shop.\n\
         - If there is a discount, mention the percentage.\n\
         - At most 40 words, friendly and personal.\n\
         - Use the shop's real name, no placeholders.\n\
         \n\
         Write the notification:",
        age = age,
        profession = profession,
        interests = interests,
        name = poi.name,
        category = poi.category,
        distance = distance_m,
        offer = offer_section(offer),
    );

    Prompt {
        text,
        poi_name: poi.name.clone(),
        category: poi.category.clone(),
    }
}

/// Short digest of everything that changes the generated text for a user.
///
/// Interests are normalised (trimmed, lowercased, sorted) so reordering them
/// does not split the cache. A different offer starts a new generation.
pub fn context_fingerprint(profile: &UserProfile, poi: &PointOfInterest, offer: Option<&Offer>) -> String {
    let mut interests: Vec<String> = profile
        .interests
        .iter()
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty())
        .collect();
    interests.sort();
    interests.dedup();

    let mut hasher = blake3::Hasher::new();
    hasher.update(profile.age.map(|a| a.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(
        profile
            .profession
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(interests.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(poi.category.to_lowercase().as_bytes());
    hasher.update(b"|");
    if let Some(offer) = offer {
        hasher.update(format!("{}:{}", offer.offer_id, offer.discount_percent).as_bytes());
    }

    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}

const BRACKET_PLACEHOLDER: &str = r"\[[^\]]*\]";

fn bracket_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BRACKET_PLACEHOLDER).expect("placeholder pattern is a valid regex"))
}

/// Replace leftover template tokens with the shop name and tidy whitespace.
pub fn finalize_message(raw: &str, poi_name: &str) -> String {
    let replaced = raw.replace("{shop_name}", poi_name).replace("{name}", poi_name);
    let replaced = bracket_placeholder()
        .replace_all(&replaced, NoExpand(poi_name))
        .into_owned();
    let trimmed = replaced.trim().trim_matches('"').trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use chrono::NaiveDate;
    use std::io::Write;

    fn poi() -> PointOfInterest {
        PointOfInterest {
            poi_id: 11,
            name: "Libreria Hoepli".to_string(),
            category: "bookshop".to_string(),
            location: GeoPoint::new(45.4668, 9.1905),
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            age: Some(34),
            profession: Some("Architect".to_string()),
            interests: vec!["design".to_string(), "history".to_string()],
        }
    }

    #[test]
    fn test_prompt_includes_user_and_shop() {
        let prompt = build_prompt(&profile(), &poi(), 42.4, None);
        assert!(prompt.text.contains("- Age: 34"));
        assert!(prompt.text.contains("- Interests: design, history"));
        assert!(prompt.text.contains("- Name: Libreria Hoepli"));
        assert!(prompt.text.contains("- Distance: 42 m"));
        assert_eq!(prompt.poi_name, "Libreria Hoepli");
    }

    #[test]
    fn test_prompt_for_anonymous_profile() {
        let prompt = build_prompt(&UserProfile::default(), &poi(), 10.0, None);
        assert!(prompt.text.contains("- Age: N/A"));
        assert!(prompt.text.contains("- Profession: N/A"));
        assert!(prompt.text.contains("Offer: no special offer right now"));
    }

    fn offer(offer_id: u64, discount_percent: u8) -> Offer {
        Offer {
            offer_id,
            poi_id: 11,
            discount_percent,
            description: "Signed first editions".to_string(),
            valid_from: None,
            valid_until: NaiveDate::from_ymd_opt(2026, 10, 31),
            is_active: true,
            max_uses: Some(40),
            current_uses: 37,
            min_age: None,
            max_age: None,
            target_interests: Vec::new(),
        }
    }

    #[test]
    fn test_prompt_includes_offer() {
        let prompt = build_prompt(&profile(), &poi(), 30.0, Some(&offer(5, 25)));
        assert!(prompt.text.contains("- Discount: 25%"));
        assert!(prompt.text.contains("- Details: Signed first editions"));
        assert!(prompt.text.contains("- Valid until: 2026-10-31"));
        assert!(prompt.text.contains("- Remaining uses: 3 left, almost gone!"));
    }

    #[test]
    fn test_fingerprint_changes_with_offer() {
        let a = profile();
        let none = context_fingerprint(&a, &poi(), None);
        let first = context_fingerprint(&a, &poi(), Some(&offer(5, 25)));
        assert_ne!(none, first);
        assert_ne!(first, context_fingerprint(&a, &poi(), Some(&offer(6, 25))));
        assert_ne!(first, context_fingerprint(&a, &poi(), Some(&offer(5, 30))));

        // Usage counts alone do not split the cache
        let mut used = offer(5, 25);
        used.current_uses = 1;
        assert_eq!(first, context_fingerprint(&a, &poi(), Some(&used)));
    }

    #[test]
    fn test_fingerprint_ignores_interest_order_and_case() {
        let a = profile();
        let mut b = profile();
        b.interests = vec!["History ".to_string(), "design".to_string()];
        assert_eq!(context_fingerprint(&a, &poi(), None), context_fingerprint(&b, &poi(), None));
        assert_eq!(context_fingerprint(&a, &poi(), None).len(), 16);
    }

    #[test]
    fn test_fingerprint_changes_with_context() {
        let a = profile();
        let mut older = profile();
        older.age = Some(60);
        assert_ne!(context_fingerprint(&a, &poi(), None), context_fingerprint(&older, &poi(), None));

        let mut cafe = poi();
        cafe.category = "cafe".to_string();
        assert_ne!(context_fingerprint(&a, &poi(), None), context_fingerprint(&a, &cafe, None));
    }

    #[test]
    fn test_placeholder_pattern() {
        let re = bracket_placeholder();
        assert!(re.is_match("[Shop Name]"));
        assert!(re.is_match("[]"));
        assert!(!re.is_match("no brackets here"));
    }

    #[test]
    fn test_finalize_replaces_placeholders() {
        assert_eq!(
            finalize_message("Visit [Shop Name] today!", "Cova"),
            "Visit Cova today!"
        );
        assert_eq!(
            finalize_message("  \"{shop_name} has a new arrival for {name} fans\"  ", "Cova"),
            "Cova has a new arrival for Cova fans"
        );
        assert_eq!(finalize_message("Plain   text\nhere", "Cova"), "Plain text here");
    }

    #[test]
    fn test_directory_load_and_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"user_1": {{"age": 29, "profession": "Nurse", "interests": ["running"]}}, "user_2": {{}}}}"#
        )
        .unwrap();

        let directory = ProfileDirectory::load(file.path()).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get("user_1").age, Some(29));
        assert_eq!(directory.get("user_2"), &UserProfile::default());
        assert_eq!(directory.get("nobody"), &UserProfile::default());
    }
}
