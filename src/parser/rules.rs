//! Per-field recognizers. Each field owns an ordered chain of independent rules;
//! the first rule yielding a non-empty value wins and later rules are not consulted.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::clean::{clean_field, clean_url, cut_see_more, truncate_company};

/// A pure `markup -> value` recognizer.
pub type Rule = fn(&str) -> Option<String>;

static DETAIL_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/detail/(\d+)").unwrap());

static HEADLINE_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[class*="sponsored-content-headline"]"#).unwrap());
static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());
static LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static ADVERTISER_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"a[data-tracking-control-name="ad_library_ad_preview_advertiser"]"#).unwrap()
});
static LABELLED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[aria-label]").unwrap());
static COMPANY_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/company/"]"#).unwrap());
static DYNAMIC_IMAGE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"img[class*="ad-preview__dynamic-dimensions-image"]"#).unwrap()
});
static WITH_ALT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[alt]").unwrap());
static CONTENT_IMAGE_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[data-tracking-control-name="ad_library_ad_preview_content_image"][href]"#)
        .unwrap()
});
static HEADLINE_CONTENT_LINK: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[data-tracking-control-name="ad_library_ad_preview_headline_content"][href]"#)
        .unwrap()
});
static COMMENTARY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[class*="commentary__content"]"#).unwrap());
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static IMAGE_WITH_ALT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[alt]").unwrap());
static DETAIL_CTA: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[data-tracking-control-name="ad_library_ad_detail_cta"]"#).unwrap()
});

const ORG_LABEL_PREFIX: &str = "View organization page for ";
const LOGO_ALT: &str = "advertiser logo";

/// Closed vocabulary of placement labels, in match priority order.
pub const FORMATS: &[&str] = &[
    "Single Image Ad",
    "Carousel Ad",
    "Video Ad",
    "Document Ad",
    "Text Ad",
    "Spotlight Ad",
    "Follower Ad",
    "Message Ad",
    "Conversation Ad",
    "Event Ad",
    "Job Ad",
];

pub const HEADLINE: &[Rule] = &[headline_heading, headline_link];
pub const COMPANY: &[Rule] = &[company_advertiser_link, company_org_label, company_bare_link];
pub const IMAGE_URL: &[Rule] = &[image_delayed_url];
pub const IMAGE_ALT: &[Rule] = &[image_alt_marker, image_alt_any];
pub const TARGET_URL: &[Rule] = &[target_content_image, target_headline_content];
pub const DESCRIPTION: &[Rule] = &[description_commentary];
pub const LOGO_URL: &[Rule] = &[logo_delayed_url, logo_src];
pub const FORMAT: &[Rule] = &[format_label];
pub const CALL_TO_ACTION: &[Rule] = &[cta_text];

/// Try each rule in order; first non-empty result wins.
pub fn first_match(rules: &[Rule], markup: &str) -> Option<String> {
    rules
        .iter()
        .find_map(|rule| rule(markup).filter(|v| !v.is_empty()))
}

pub fn detail_id(url: &str) -> Option<String> {
    DETAIL_ID_RE.captures(url).map(|c| c[1].to_string())
}

/// Parse once and hand the document to `read`.
fn parsed(markup: &str, read: impl FnOnce(&Html) -> Option<String>) -> Option<String> {
    let doc = Html::parse_document(markup);
    read(&doc)
}

fn text_of(el: ElementRef<'_>) -> Option<String> {
    clean_field(&el.text().collect::<String>())
}

fn attr_of(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value().attr(name).and_then(clean_url)
}

// ── headline ──

fn headline_heading(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let block = doc.select(&HEADLINE_BLOCK).next()?;
        block.select(&HEADING).next().and_then(text_of)
    })
}

fn headline_link(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let block = doc.select(&HEADLINE_BLOCK).next()?;
        block.select(&LINK).next().and_then(text_of)
    })
}

// ── company ──

fn company_advertiser_link(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        doc.select(&ADVERTISER_LINK)
            .next()
            .and_then(text_of)
            .map(truncate_company)
    })
}

fn company_org_label(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        doc.select(&LABELLED)
            .filter_map(|el| el.value().attr("aria-label"))
            .find_map(|label| label.strip_prefix(ORG_LABEL_PREFIX))
            .and_then(clean_field)
            .map(truncate_company)
    })
}

fn company_bare_link(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        doc.select(&COMPANY_LINK)
            .next()
            .and_then(text_of)
            .map(truncate_company)
    })
}

// ── image ──

fn image_delayed_url(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let img = doc.select(&DYNAMIC_IMAGE).next()?;
        attr_of(img, "data-delayed-url")
    })
}

fn image_alt_marker(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let img = doc.select(&DYNAMIC_IMAGE).next()?;
        img.value().attr("alt").and_then(clean_field)
    })
}

fn image_alt_any(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        doc.select(&WITH_ALT)
            .filter_map(|el| el.value().attr("alt"))
            .filter(|alt| !alt.trim().eq_ignore_ascii_case(LOGO_ALT))
            .find_map(clean_field)
    })
}

// ── target ──

fn target_content_image(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let link = doc.select(&CONTENT_IMAGE_LINK).next()?;
        attr_of(link, "href")
    })
}

fn target_headline_content(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let link = doc.select(&HEADLINE_CONTENT_LINK).next()?;
        attr_of(link, "href")
    })
}

// ── description ──

fn description_commentary(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let block = doc.select(&COMMENTARY).next()?;
        let paragraph = if block.value().name() == "p" {
            block
        } else {
            block.select(&PARAGRAPH).next().unwrap_or(block)
        };
        text_of(paragraph)
            .map(cut_see_more)
            .filter(|d| !d.is_empty())
    })
}

// ── logo ──

fn logo_image(doc: &Html) -> Option<ElementRef<'_>> {
    doc.select(&IMAGE_WITH_ALT).find(|img| {
        img.value()
            .attr("alt")
            .is_some_and(|a| a.trim().eq_ignore_ascii_case(LOGO_ALT))
    })
}

fn logo_delayed_url(markup: &str) -> Option<String> {
    parsed(markup, |doc| attr_of(logo_image(doc)?, "data-delayed-url"))
}

fn logo_src(markup: &str) -> Option<String> {
    parsed(markup, |doc| attr_of(logo_image(doc)?, "src"))
}

// ── format ──

/// First vocabulary label present in the rendered text. Comments and attributes are ignored.
fn format_label(markup: &str) -> Option<String> {
    parsed(markup, |doc| {
        let text: String = doc.root_element().text().collect();
        FORMATS
            .iter()
            .copied()
            .find(|&label| text.contains(label))
            .map(str::to_string)
    })
}

// ── call to action ──

fn cta_text(markup: &str) -> Option<String> {
    parsed(markup, |doc| doc.select(&DETAIL_CTA).next().and_then(text_of))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_respects_order() {
        fn none(_: &str) -> Option<String> {
            None
        }
        fn empty(_: &str) -> Option<String> {
            Some(String::new())
        }
        fn second(_: &str) -> Option<String> {
            Some("second".into())
        }
        fn third(_: &str) -> Option<String> {
            Some("third".into())
        }
        assert_eq!(
            first_match(&[none, empty, second, third], "").as_deref(),
            Some("second")
        );
        assert_eq!(first_match(&[none], ""), None);
    }

    #[test]
    fn detail_id_from_url() {
        assert_eq!(
            detail_id("https://www.linkedin.com/ad-library/detail/123456?trk=x").as_deref(),
            Some("123456")
        );
        assert_eq!(detail_id("https://www.linkedin.com/ad-library/search"), None);
    }

    #[test]
    fn headline_prefers_heading_over_link() {
        let html = r#"<div class="sponsored-content-headline mt-1">
            <a href="/x">Link text</a><h2 class="text-sm">  Heading <b>text</b> </h2></div>"#;
        assert_eq!(first_match(HEADLINE, html).as_deref(), Some("Heading text"));
    }

    #[test]
    fn headline_falls_back_to_link() {
        let html = r#"<div class="sponsored-content-headline"><a href="/x">Link &amp; text</a></div>"#;
        assert_eq!(first_match(HEADLINE, html).as_deref(), Some("Link & text"));
    }

    #[test]
    fn headline_outside_block_is_ignored() {
        let html = "<h2>Not sponsored</h2>";
        assert_eq!(first_match(HEADLINE, html), None);
    }

    #[test]
    fn commented_out_block_is_not_a_headline() {
        let html = r#"<!-- <div class="sponsored-content-headline"><h2>Old</h2></div> -->
            <div class="sponsored-content-headline"><h2>Current</h2></div>"#;
        assert_eq!(first_match(HEADLINE, html).as_deref(), Some("Current"));
    }

    #[test]
    fn company_rule_one_reads_nested_text() {
        let html = r#"<a data-tracking-control-name="ad_library_ad_preview_advertiser" href="/company/acme">
            <span class="sr-only">Acme <i>Corp</i></span></a>"#;
        assert_eq!(first_match(COMPANY, html).as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn company_rule_two_from_aria_label() {
        let html = r#"<div aria-label="View organization page for Globex &amp; Co"></div>"#;
        assert_eq!(first_match(COMPANY, html).as_deref(), Some("Globex & Co"));
    }

    #[test]
    fn company_rule_three_bare_link() {
        let html = r#"<a href="https://www.linkedin.com/company/initech">Initech</a>"#;
        assert_eq!(first_match(COMPANY, html).as_deref(), Some("Initech"));
    }

    #[test]
    fn company_missing_everywhere() {
        assert_eq!(first_match(COMPANY, "<p>nothing here</p>"), None);
    }

    #[test]
    fn company_rule_three_truncates() {
        let name = "b".repeat(150);
        let html = format!(r#"<a href="/company/long">{name}</a>"#);
        assert_eq!(first_match(COMPANY, &html), Some("b".repeat(100)));
    }

    #[test]
    fn image_alt_either_attribute_order() {
        let a = r#"<img class="ad-preview__dynamic-dimensions-image" alt="Team photo" data-delayed-url="u">"#;
        let b = r#"<img alt="Team photo" data-delayed-url="u" class="ad-preview__dynamic-dimensions-image">"#;
        assert_eq!(first_match(IMAGE_ALT, a).as_deref(), Some("Team photo"));
        assert_eq!(first_match(IMAGE_ALT, b).as_deref(), Some("Team photo"));
    }

    #[test]
    fn angle_bracket_inside_attribute_value() {
        let html = r#"<img class="ad-preview__dynamic-dimensions-image" alt="Save 20% -> today" data-delayed-url="https://m/img.png">"#;
        assert_eq!(first_match(IMAGE_URL, html).as_deref(), Some("https://m/img.png"));
        assert_eq!(first_match(IMAGE_ALT, html).as_deref(), Some("Save 20% -> today"));
    }

    #[test]
    fn image_alt_fallback_skips_logo() {
        let html = r#"<img alt="advertiser logo" src="l"><img alt="" src="e"><img alt="Product shot" src="p">"#;
        assert_eq!(first_match(IMAGE_ALT, html).as_deref(), Some("Product shot"));
    }

    #[test]
    fn target_url_fallback_and_decoding() {
        let html = r#"<a data-tracking-control-name="ad_library_ad_preview_headline_content"
            href="https://acme.com/?utm=1&amp;b=2">x</a>"#;
        assert_eq!(
            first_match(TARGET_URL, html).as_deref(),
            Some("https://acme.com/?utm=1&b=2")
        );
    }

    #[test]
    fn logo_prefers_delayed_url_then_src() {
        let delayed = r#"<img src="https://s/logo" alt="advertiser logo" data-delayed-url="https://d/logo">"#;
        let plain = r#"<img alt="Advertiser logo" src="https://s/logo">"#;
        assert_eq!(first_match(LOGO_URL, delayed).as_deref(), Some("https://d/logo"));
        assert_eq!(first_match(LOGO_URL, plain).as_deref(), Some("https://s/logo"));
    }

    #[test]
    fn description_first_paragraph_without_see_more() {
        let html = r#"<div class="commentary__content"><p>Grow faster.<br>
            Try it today.…<button>See more</button> secret</p><p>second</p></div>"#;
        assert_eq!(
            first_match(DESCRIPTION, html).as_deref(),
            Some("Grow faster.\n            Try it today.…")
        );
    }

    #[test]
    fn format_follows_vocabulary_order() {
        let html = "<span>Video Ad</span> ... <span>Carousel Ad</span>";
        assert_eq!(first_match(FORMAT, html).as_deref(), Some("Carousel Ad"));
        assert_eq!(first_match(FORMAT, "<span>Banner</span>"), None);
    }

    #[test]
    fn format_ignores_comments_and_attributes() {
        let html = r#"<!-- Video Ad --><span title="Video Ad">Text Ad</span>"#;
        assert_eq!(first_match(FORMAT, html).as_deref(), Some("Text Ad"));
    }

    #[test]
    fn cta_button_text() {
        let html = r#"<button data-tracking-control-name="ad_library_ad_detail_cta" class="btn">
            Learn more</button>"#;
        assert_eq!(first_match(CALL_TO_ACTION, html).as_deref(), Some("Learn more"));
    }
}
