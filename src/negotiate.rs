//! Quality-value content negotiation.
//!
//! Implements the weighted matching of
//! [RFC 7231 §5.3](https://tools.ietf.org/html/rfc7231#section-5.3)
//! as a pure function over two header-style value lists: what the
//! client accepts and what the server offers.

/// One entry of a comma-separated list with an optional `q` parameter.
#[derive(Clone, Debug, PartialEq)]
struct QualityItem {
    /// The value with its non-`q` parameters, `q` stripped.
    item: String,
    quality: f32,
}

fn parse_item(s: &str) -> Option<QualityItem> {
    let mut item = String::new();
    let mut quality = 1.0f32;
    for (i, part) in s.split(';').enumerate() {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if i > 0 && (part.starts_with("q=") || part.starts_with("Q=")) {
            let q: f32 = part[2..].trim().parse().ok()?;
            if !(0.0..=1.0).contains(&q) {
                return None;
            }
            quality = q;
        } else {
            if !item.is_empty() {
                item.push(';');
            }
            item.push_str(part);
        }
    }
    if item.is_empty() {
        return None;
    }
    Some(QualityItem { item, quality })
}

fn parse_list(s: &str) -> Vec<QualityItem> {
    s.split(',')
        .filter_map(parse_item)
        .collect()
}

/// Media-range matching: `*`, `*/*` and `type/*` act as wildcards,
/// everything else compares case-insensitively with parameters
/// ignored on the client side.
fn matches(offer: &str, want: &str) -> bool {
    let offer_base = offer.split(';').next().unwrap_or("").trim();
    let want_base = want.split(';').next().unwrap_or("").trim();
    if want_base == "*" || want_base == "*/*" {
        return true;
    }
    if offer_base.eq_ignore_ascii_case(want_base) {
        return true;
    }
    if let Some(want_type) = want_base.strip_suffix("/*") {
        if let Some(slash) = offer_base.find('/') {
            return offer_base[..slash].eq_ignore_ascii_case(want_type);
        }
    }
    false
}

/// Picks the best server offer for a client preference header.
///
/// Both arguments are comma-separated lists with optional q-values.
/// An empty client header accepts anything, so the server's own
/// preference decides. The chosen value is the offer text with its
/// `q` parameter removed; `None` means nothing was acceptable.
pub fn negotiate(client: &str, offers: &str) -> Option<String> {
    let offers = parse_list(offers);
    let accepts = if client.trim().is_empty() {
        vec![QualityItem {
            item: "*".to_owned(),
            quality: 1.0,
        }]
    } else {
        parse_list(client)
    };

    let mut best: Option<(&QualityItem, f32)> = None;
    for offer in &offers {
        let client_q = accepts
            .iter()
            .filter(|want| matches(&offer.item, &want.item))
            .map(|want| want.quality)
            .fold(None, |acc: Option<f32>, q| {
                Some(acc.map_or(q, |a| a.max(q)))
            });
        let effective = match client_q {
            Some(q) => q * offer.quality,
            None => continue,
        };
        if effective <= 0.0 {
            continue;
        }
        // Strictly-greater keeps the earliest offer on ties, so the
        // server's listed order breaks them.
        if best.map_or(true, |(_, b)| effective > b) {
            best = Some((offer, effective));
        }
    }
    best.map(|(offer, _)| offer.item.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quality() {
        let items = parse_list("text/plain, application/json;q=0.9");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item, "text/plain");
        assert_eq!(items[0].quality, 1.0);
        assert_eq!(items[1].item, "application/json");
        assert_eq!(items[1].quality, 0.9);
    }

    #[test]
    fn keeps_non_q_parameters() {
        let items = parse_list("text/html;level=1;q=0.5");
        assert_eq!(items[0].item, "text/html;level=1");
        assert_eq!(items[0].quality, 0.5);
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(parse_item("text/plain;q=1.5").is_none());
        assert!(parse_item("text/plain;q=-1").is_none());
    }

    #[test]
    fn exact_match_wins() {
        assert_eq!(
            negotiate("application/json", "text/plain, application/json;q=0.9"),
            Some("application/json".to_owned())
        );
    }

    #[test]
    fn no_overlap_fails() {
        assert_eq!(
            negotiate("application/foo", "text/plain, application/json;q=0.9"),
            None
        );
    }

    #[test]
    fn empty_client_prefers_server_order() {
        assert_eq!(
            negotiate("", "text/plain, application/json;q=0.9"),
            Some("text/plain".to_owned())
        );
    }

    #[test]
    fn wildcards() {
        assert_eq!(
            negotiate("*/*", "application/json"),
            Some("application/json".to_owned())
        );
        assert_eq!(
            negotiate("text/*", "application/json, text/html;q=0.1"),
            Some("text/html".to_owned())
        );
        assert_eq!(negotiate("*", "utf-8"), Some("utf-8".to_owned()));
    }

    #[test]
    fn client_quality_weights_offers() {
        assert_eq!(
            negotiate(
                "text/plain;q=0.4, application/json",
                "text/plain, application/json;q=0.9"
            ),
            Some("application/json".to_owned())
        );
    }

    #[test]
    fn zero_quality_excludes() {
        assert_eq!(negotiate("text/plain;q=0", "text/plain"), None);
    }

    #[test]
    fn ties_keep_server_order() {
        assert_eq!(
            negotiate("*/*", "text/markdown, text/plain"),
            Some("text/markdown".to_owned())
        );
    }

    #[test]
    fn case_insensitive_media_types() {
        assert_eq!(
            negotiate("Application/JSON", "application/json"),
            Some("application/json".to_owned())
        );
    }
}
