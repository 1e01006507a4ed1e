pub mod links;
pub mod listing;
pub mod product_page;
pub mod scanner;

use tracing::debug;

use listing::ListingRecord;
use scanner::{JsonScanner, ScanCounts};

/// Scan → filter → normalize over one listing page, lazily.
pub struct ListingExtractor<'a> {
    scanner: JsonScanner<'a>,
    pub scan: ScanCounts,
    pub product_like: usize,
}

impl<'a> ListingExtractor<'a> {
    pub fn new(html: &'a str) -> Self {
        ListingExtractor {
            scanner: JsonScanner::new(html),
            scan: ScanCounts::default(),
            product_like: 0,
        }
    }
}

impl Iterator for ListingExtractor<'_> {
    type Item = ListingRecord;

    fn next(&mut self) -> Option<ListingRecord> {
        for outcome in self.scanner.by_ref() {
            self.scan.record(&outcome);
            match outcome {
                Ok(candidate) if listing::is_product_like(&candidate.fields) => {
                    self.product_like += 1;
                    debug!("Product object at {}..{}", candidate.span.start, candidate.span.end);
                    return Some(listing::normalize(&candidate.fields));
                }
                Ok(_) => {}
                Err(e) => debug!("{}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_page_end_to_end() {
        let html = r#"<script>
            window.__STATE__ = {"config":{"locale":"en"}};
            var products = [{"productId":"P1","brandName":"Acme","displayName":"Rose","currentSku":{"listPrice":"$10","isNew":true}},
                            {"productId":"P2","displayName":"Oud","heroImage":"/img/p2.jpg"}];
            var broken = {notJson: 1};
        </script>"#;
        let mut ex = ListingExtractor::new(html);
        let records: Vec<_> = ex.by_ref().collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].product_id, "P1");
        assert_eq!(records[0].list_price, "$10");
        assert_eq!(records[1].hero_image, "/img/p2.jpg");
        assert_eq!(ex.scan, ScanCounts { objects: 3, malformed: 1 });
        assert_eq!(ex.product_like, 2);
    }
}
