use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::scanner::JsonScanner;

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d+[.,]?\d*").unwrap());
static REVIEWS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d,]+)\s+reviews").unwrap());

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TWITTER_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="twitter:title"]"#).unwrap());
static OG_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static RATING_META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[itemprop="ratingValue"]"#).unwrap());
static REVIEW_COUNT_META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[itemprop="reviewCount"]"#).unwrap());

const IMG_SRC_ATTRS: &[&str] = &["src", "data-src", "data-ec-src"];

/// Fields recovered from one product detail page. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductPage {
    pub name: Option<String>,
    pub price: Option<String>,
    pub star_rating: Option<f64>,
    pub review_count: Option<u64>,
    /// Ordered, without duplicates.
    pub image_urls: Vec<String>,
}

/// Structured data first, then meta tags, then loose page text.
pub fn parse(html: &str, page_url: &str) -> ProductPage {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let mut page = ProductPage::default();

    for script in doc.select(&LD_JSON) {
        let text: String = script.text().collect();
        for item in ld_json_items(&text) {
            if is_product(&item) {
                apply_ld_product(&mut page, &item);
            }
        }
    }

    if page.name.is_none() {
        page.name = meta_content(&doc, &OG_TITLE).or_else(|| meta_content(&doc, &TWITTER_TITLE));
    }

    if page.image_urls.is_empty() {
        let og = meta_content(&doc, &OG_IMAGE);
        let gallery = doc.select(&IMG).filter_map(|img| {
            let el = img.value();
            let src = IMG_SRC_ATTRS.iter().find_map(|a| el.attr(a).filter(|s| !s.is_empty()))?;
            if src.contains("placeholder") {
                return None;
            }
            Some(resolve(base.as_ref(), src))
        });
        page.image_urls.extend(og.into_iter().chain(gallery));
    }

    if page.price.is_none() {
        page.price = doc
            .root_element()
            .text()
            .find_map(|t| PRICE_RE.find(t).map(|m| m.as_str().to_string()));
    }

    if page.star_rating.is_none() {
        page.star_rating = meta_content(&doc, &RATING_META).and_then(|c| c.parse().ok());
    }

    if page.review_count.is_none() {
        page.review_count = meta_content(&doc, &REVIEW_COUNT_META).and_then(|c| parse_count(&c));
    }
    if page.review_count.is_none() {
        let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
        page.review_count = REVIEWS_RE
            .captures(&text)
            .and_then(|c| parse_count(&c[1]));
    }

    page.image_urls = dedup_urls(std::mem::take(&mut page.image_urls));
    page
}

/// Objects in one JSON-LD block. Strict parse first; on failure the block is
/// scanned for embedded objects. Arrays and `@graph` containers are flattened.
fn ld_json_items(text: &str) -> Vec<Value> {
    let roots: Vec<Value> = match serde_json::from_str::<Value>(text) {
        Ok(v) => vec![v],
        Err(_) => JsonScanner::new(text)
            .objects()
            .map(|c| Value::Object(c.fields))
            .collect(),
    };

    let mut items = Vec::new();
    for root in roots {
        match root {
            Value::Array(arr) => items.extend(arr),
            other => {
                if let Some(graph) = other.get("@graph").and_then(Value::as_array) {
                    items.extend(graph.iter().cloned());
                }
                items.push(other);
            }
        }
    }
    items
}

fn is_product(item: &Value) -> bool {
    match item.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("product"),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| t.eq_ignore_ascii_case("product")),
        _ => false,
    }
}

fn apply_ld_product(page: &mut ProductPage, item: &Value) {
    if page.name.is_none() {
        page.name = item.get("name").and_then(scalar_text);
    }

    let offer_price = match item.get("offers") {
        Some(Value::Array(offers)) => offers.first().and_then(|o| o.get("price")),
        Some(offer) => offer.get("price"),
        None => None,
    };
    if let Some(price) = offer_price.and_then(scalar_text) {
        page.price = Some(price);
    }

    if let Some(agg) = item.get("aggregateRating") {
        if let Some(r) = agg.get("ratingValue").and_then(as_f64) {
            page.star_rating = Some(r);
        }
        if let Some(n) = agg.get("reviewCount").and_then(as_u64) {
            page.review_count = Some(n);
        }
    }

    match item.get("image") {
        Some(Value::Array(imgs)) => page
            .image_urls
            .extend(imgs.iter().filter_map(scalar_text)),
        Some(img) => page.image_urls.extend(scalar_text(img)),
        None => {}
    }
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .find_map(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

fn parse_count(s: &str) -> Option<u64> {
    s.trim().replace(',', "").parse().ok()
}

fn resolve(base: Option<&Url>, raw: &str) -> String {
    base.and_then(|b| b.join(raw).ok())
        .map(String::from)
        .unwrap_or_else(|| raw.to_string())
}

fn dedup_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .collect()
}
