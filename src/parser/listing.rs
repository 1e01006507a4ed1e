use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Nested object holding the currently selected variant (size, shade...).
const VARIANT_KEY: &str = "currentSku";

/// Top-level keys that mark a candidate as product-like.
pub const IDENTITY_KEYS: &[&str] = &["brandName", "productId", "displayName"];

pub const LISTING_HEADERS: &[&str] = &[
    "productId",
    "displayName",
    "brandName",
    "imageAltText",
    "isLimitedEdition",
    "isNew",
    "listPrice",
    "heroImage",
    "targetUrl",
    "rating",
    "reviews",
    "localHeroImage",
];

/// Columns consulted, in order, to rebuild a row's identity when resuming.
pub const LISTING_KEY_COLUMNS: &[&str] = &["productId", "targetUrl", "displayName"];

pub fn is_product_like(fields: &Map<String, Value>) -> bool {
    IDENTITY_KEYS.iter().any(|k| fields.contains_key(*k))
}

/// Boolean whose absence is kept distinct from `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriState {
    True,
    False,
    #[default]
    Unknown,
}

impl TriState {
    fn from_value(value: &Value) -> TriState {
        let truthy = match value {
            Value::Null => return TriState::Unknown,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "false" | "0" | "" => false,
                _ => true,
            },
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        };
        if truthy {
            TriState::True
        } else {
            TriState::False
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriState::True => "True",
            TriState::False => "False",
            TriState::Unknown => "",
        }
    }
}

impl Serialize for TriState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One normalized listing entry. Field order matches `LISTING_HEADERS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub product_id: String,
    pub display_name: String,
    pub brand_name: String,
    pub image_alt_text: String,
    pub is_limited_edition: TriState,
    pub is_new: TriState,
    pub list_price: String,
    /// As found on the page; may be site-relative.
    pub hero_image: String,
    pub target_url: String,
    pub rating: String,
    pub reviews: String,
    /// Filled after the hero image is cached.
    pub local_hero_image: String,
}

impl ListingRecord {
    /// productId, else targetUrl, else displayName. Empty means no identity.
    pub fn dedup_key(&self) -> &str {
        [&self.product_id, &self.target_url, &self.display_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Clone, Copy)]
enum Level {
    Variant,
    Top,
}

use Level::{Top, Variant};

/// Ordered (level, alias) lookups for one canonical field.
type Chain = &'static [(Level, &'static str)];

const PRODUCT_ID: Chain = &[(Variant, "productId"), (Top, "productId"), (Top, "skuId")];
const DISPLAY_NAME: Chain = &[(Variant, "displayName"), (Top, "displayName")];
const BRAND_NAME: Chain = &[(Variant, "brandName"), (Top, "brandName")];
const IMAGE_ALT_TEXT: Chain = &[
    (Variant, "imageAltText"),
    (Variant, "altImage"),
    (Top, "imageAltText"),
    (Top, "altImage"),
];
const IS_LIMITED_EDITION: Chain = &[(Variant, "isLimitedEdition"), (Top, "isLimitedEdition")];
const IS_NEW: Chain = &[(Variant, "isNew"), (Top, "isNew")];
const LIST_PRICE: Chain = &[(Variant, "listPrice"), (Top, "listPrice")];
const HERO_IMAGE: Chain = &[
    (Variant, "heroImage"),
    (Variant, "image"),
    (Variant, "mainImage"),
    (Top, "heroImage"),
    (Top, "image"),
    (Top, "mainImage"),
];
const TARGET_URL: Chain = &[(Variant, "targetUrl"), (Top, "targetUrl"), (Top, "productUrl")];
const RATING: Chain = &[(Variant, "rating"), (Top, "rating")];
const REVIEWS: Chain = &[(Variant, "reviews"), (Top, "reviews")];

struct Product<'a> {
    top: &'a Map<String, Value>,
    variant: Option<&'a Map<String, Value>>,
}

impl<'a> Product<'a> {
    fn new(top: &'a Map<String, Value>) -> Self {
        let variant = top.get(VARIANT_KEY).and_then(Value::as_object);
        Product { top, variant }
    }

    fn get(&self, level: Level, key: &str) -> Option<&'a Value> {
        match level {
            Variant => self.variant?.get(key),
            Top => self.top.get(key),
        }
    }

    /// First non-null, non-empty scalar along the chain, as text.
    fn text(&self, chain: Chain) -> Option<String> {
        chain.iter().find_map(|&(level, key)| match self.get(level, key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First non-null value along the chain, coerced to a boolean.
    fn flag(&self, chain: Chain) -> TriState {
        chain
            .iter()
            .filter_map(|&(level, key)| self.get(level, key))
            .find(|v| !v.is_null())
            .map(TriState::from_value)
            .unwrap_or_default()
    }
}

pub fn normalize(fields: &Map<String, Value>) -> ListingRecord {
    let p = Product::new(fields);
    let brand_name = p.text(BRAND_NAME).unwrap_or_default();
    // Unnamed entries are titled "<brand> ".
    let display_name = p.text(DISPLAY_NAME).unwrap_or_else(|| {
        if brand_name.is_empty() {
            String::new()
        } else {
            format!("{} ", brand_name)
        }
    });

    ListingRecord {
        product_id: p.text(PRODUCT_ID).unwrap_or_default(),
        display_name,
        brand_name,
        image_alt_text: p.text(IMAGE_ALT_TEXT).unwrap_or_default(),
        is_limited_edition: p.flag(IS_LIMITED_EDITION),
        is_new: p.flag(IS_NEW),
        list_price: p.text(LIST_PRICE).unwrap_or_default(),
        hero_image: p.text(HERO_IMAGE).unwrap_or_default(),
        target_url: p.text(TARGET_URL).unwrap_or_default(),
        rating: p.text(RATING).unwrap_or_default(),
        reviews: p.text(REVIEWS).unwrap_or_default(),
        local_hero_image: String::new(),
    }
}
