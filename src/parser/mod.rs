pub mod classify;
pub mod clean;
pub mod rules;

use crate::model::Record;
use rules::first_match;

/// Markup → record. Every field resolves through its own fallback chain and
/// defaults to `None`; malformed markup never fails the call.
pub fn extract(markup: &str, source_url: &str) -> Record {
    Record {
        id: rules::detail_id(source_url),
        source_url: source_url.to_string(),
        headline: first_match(rules::HEADLINE, markup),
        company: first_match(rules::COMPANY, markup),
        description: first_match(rules::DESCRIPTION, markup),
        image_url: first_match(rules::IMAGE_URL, markup),
        image_alt: first_match(rules::IMAGE_ALT, markup),
        target_url: first_match(rules::TARGET_URL, markup),
        logo_url: first_match(rules::LOGO_URL, markup),
        format: first_match(rules::FORMAT, markup),
        call_to_action: first_match(rules::CALL_TO_ACTION, markup),
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_URL: &str = "https://www.linkedin.com/ad-library/detail/612345678";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn single_image_ad() {
        let r = extract(&fixture("single_image_ad"), DETAIL_URL);
        assert_eq!(r.id.as_deref(), Some("612345678"));
        assert_eq!(r.headline.as_deref(), Some("Ship reports 3x faster"));
        assert_eq!(r.company.as_deref(), Some("Northwind Analytics"));
        assert_eq!(
            r.description.as_deref(),
            Some("Dashboards your whole team will \"actually\" read.\n\nStart a free trial & see why.")
        );
        assert_eq!(
            r.image_url.as_deref(),
            Some("https://media.licdn.com/dms/image/D4E10AQ/feedshare-image.png?e=1&v=beta&t=abc")
        );
        assert_eq!(r.image_alt.as_deref(), Some("Analyst looking at a dashboard"));
        assert_eq!(
            r.target_url.as_deref(),
            Some("https://northwind.example/trial?utm_source=li&utm_medium=ad")
        );
        assert_eq!(
            r.logo_url.as_deref(),
            Some("https://media.licdn.com/dms/image/C4D0BAQ/company-logo_100_100/0?e=2&v=beta")
        );
        assert_eq!(r.format.as_deref(), Some("Single Image Ad"));
        assert_eq!(r.call_to_action.as_deref(), Some("Learn more"));
    }

    #[test]
    fn alternate_markup_uses_fallbacks() {
        let r = extract(&fixture("alternate_markup"), DETAIL_URL);
        assert_eq!(r.headline.as_deref(), Some("Hiring engineers in Berlin"));
        assert_eq!(r.company.as_deref(), Some("Contoso GmbH"));
        assert_eq!(r.image_url, None);
        assert_eq!(r.image_alt.as_deref(), Some("Office in Berlin"));
        assert_eq!(r.target_url.as_deref(), Some("https://contoso.example/jobs"));
        assert_eq!(r.logo_url.as_deref(), Some("https://media.licdn.com/logo/contoso.svg"));
        assert_eq!(r.format.as_deref(), Some("Carousel Ad"));
        assert_eq!(r.call_to_action, None);
    }

    #[test]
    fn video_ad_keeps_format() {
        let r = extract(&fixture("video_ad"), DETAIL_URL);
        assert_eq!(r.format.as_deref(), Some("Video Ad"));
        assert!(r.headline.is_some());
        assert!(classify::is_non_processable(&r));
    }

    #[test]
    fn comments_and_angle_brackets_in_attributes() {
        let r = extract(&fixture("tricky_markup"), DETAIL_URL);
        assert_eq!(r.headline.as_deref(), Some("Spring sale is on"));
        assert_eq!(r.company.as_deref(), Some("Tailspin Toys"));
        assert_eq!(
            r.image_url.as_deref(),
            Some("https://media.licdn.com/dms/image/sale.webp")
        );
        assert_eq!(r.image_alt.as_deref(), Some("Save 20% -> today"));
        assert_eq!(r.target_url.as_deref(), Some("https://tailspin.example/sale"));
        assert_eq!(r.format.as_deref(), Some("Spotlight Ad"));
        assert!(!classify::is_non_processable(&r));
    }

    #[test]
    fn garbage_markup_yields_empty_record() {
        let r = extract("<<<div class=\"x\"><p>unclosed <a href=", "https://example.com/nothing");
        assert_eq!(r.id, None);
        assert_eq!(r.source_url, "https://example.com/nothing");
        assert!(r.headline.is_none() && r.company.is_none() && r.description.is_none());
        assert!(r.image_url.is_none() && r.logo_url.is_none() && r.format.is_none());
    }

    #[test]
    fn extraction_is_idempotent() {
        let markup = fixture("single_image_ad");
        let a = extract(&markup, DETAIL_URL);
        let b = extract(&markup, DETAIL_URL);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn long_company_is_cut_to_100() {
        let name = "Z".repeat(150);
        let markup = format!(
            r#"<a data-tracking-control-name="ad_library_ad_preview_advertiser">{name}</a>"#
        );
        let r = extract(&markup, DETAIL_URL);
        assert_eq!(r.company, Some("Z".repeat(100)));
    }
}
