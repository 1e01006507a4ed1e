use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static PRODUCT_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/product/|/shop/)[^/?#]+").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Account and cart pages that share the product URL shape.
const EXCLUDED: &[&str] = &["signin", "favorites", "register", "checkout"];

/// Absolute product page URLs linked from a listing page, query stripped,
/// first occurrence order.
pub fn product_links(html: &str, origin: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let base = Url::parse(origin).ok();
    let mut seen = HashSet::new();

    doc.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| PRODUCT_HREF_RE.is_match(href))
        .filter_map(|href| match &base {
            Some(b) => b.join(href).ok().map(String::from),
            None => Some(href.to_string()),
        })
        .filter(|url| !EXCLUDED.iter().any(|x| url.contains(x)))
        .map(|url| match url.split_once('?') {
            Some((head, _)) => head.to_string(),
            None => url,
        })
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
