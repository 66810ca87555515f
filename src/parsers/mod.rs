//! Page parsers
//!
//! Pure functions turning fetched HTML into structured data. The
//! orchestration layers never touch HTML themselves; they call these and
//! interpret the returned warnings. Selectors are intentionally tolerant:
//! a page that fails to match yields an empty result plus a warning, never
//! an error.

use crate::records::{DescriptionMeta, ShippingOption};
use scraper::{Html, Selector};
use std::collections::HashMap;

/// Warnings surfaced by the parsers, persisted alongside records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseWarning {
    NoDescription,
    NoShippingBlocks,
    LabelMissing,
    DuplicateOption,
    Truncated,
}

impl ParseWarning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDescription => "no_description",
            Self::NoShippingBlocks => "no_shipping_blocks",
            Self::LabelMissing => "label_missing",
            Self::DuplicateOption => "duplicate_option",
            Self::Truncated => "truncated",
        }
    }
}

/// Result of parsing an item page for its description
#[derive(Debug, Clone)]
pub struct ParsedDescription {
    pub text: Option<String>,
    pub meta: Option<DescriptionMeta>,
    pub warnings: Vec<ParseWarning>,
}

/// Seller profile fields extracted from a profile page
#[derive(Debug, Clone, Default)]
pub struct SellerMeta {
    pub image_url: Option<String>,
    pub online: Option<bool>,
    pub joined: Option<String>,
}

/// Byte-capped fetches cut pages short; a missing closing tag is the
/// signal that the cap was hit before the page ended.
fn looks_truncated(html: &str) -> bool {
    !html.trim_end().to_ascii_lowercase().ends_with("</html>")
}

fn select_text(document: &Html, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Extracts the item description from an item page
pub fn parse_description(html: &str) -> ParsedDescription {
    let document = Html::parse_document(html);
    let mut warnings = Vec::new();

    if looks_truncated(html) {
        warnings.push(ParseWarning::Truncated);
    }

    let text = select_text(
        &document,
        &["div.item-description", "#description", "section.description"],
    );

    let meta = match &text {
        Some(t) => Some(DescriptionMeta {
            chars: t.chars().count(),
            truncated: warnings.contains(&ParseWarning::Truncated),
        }),
        None => {
            warnings.push(ParseWarning::NoDescription);
            None
        }
    };

    ParsedDescription {
        text,
        meta,
        warnings,
    }
}

/// Extracts shipping options from an item page
///
/// Blocks without a label are skipped with a warning; duplicate
/// label/destination pairs are collapsed with a warning.
pub fn parse_shipping(html: &str) -> (Vec<ShippingOption>, Vec<ParseWarning>) {
    let document = Html::parse_document(html);
    let mut options = Vec::new();
    let mut warnings = Vec::new();

    let Ok(block_selector) = Selector::parse("div.shipping-option, li.shipping-option") else {
        return (options, warnings);
    };

    let mut seen_blocks = false;
    for block in document.select(&block_selector) {
        seen_blocks = true;
        let fragment = Html::parse_fragment(&block.html());

        let label = select_text(&fragment, &[".label", ".shipping-label"]);
        let Some(label) = label else {
            warnings.push(ParseWarning::LabelMissing);
            continue;
        };

        let option = ShippingOption {
            label,
            price: select_text(&fragment, &[".price"]),
            currency: select_text(&fragment, &[".currency"]),
            destination: select_text(&fragment, &[".destination"]),
        };

        let duplicate = options.iter().any(|existing: &ShippingOption| {
            existing.label == option.label && existing.destination == option.destination
        });
        if duplicate {
            if !warnings.contains(&ParseWarning::DuplicateOption) {
                warnings.push(ParseWarning::DuplicateOption);
            }
            continue;
        }
        options.push(option);
    }

    if !seen_blocks {
        warnings.push(ParseWarning::NoShippingBlocks);
    }
    if looks_truncated(html) && !warnings.contains(&ParseWarning::Truncated) {
        warnings.push(ParseWarning::Truncated);
    }

    (options, warnings)
}

/// Extracts the seller manifesto text from a profile page
pub fn parse_manifesto(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    select_text(&document, &["div.seller-manifesto", "#manifesto"])
}

/// Extracts structured seller fields from a profile page
pub fn parse_seller_meta(html: &str) -> SellerMeta {
    let document = Html::parse_document(html);

    let image_url = Selector::parse("img.seller-avatar[src]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("src"))
                .map(|s| s.to_string())
        });

    let online = select_text(&document, &[".seller-status"]).map(|status| {
        let status = status.to_ascii_lowercase();
        status.contains("online") && !status.contains("offline")
    });

    let joined = select_text(&document, &[".seller-joined", ".member-since"])
        .map(|t| strip_prefix_label(&t));

    SellerMeta {
        image_url,
        online,
        joined,
    }
}

/// Generic text-scan fallback for online/joined status
///
/// Used when the structured extractor finds nothing; scans the page text
/// for the status phrases the site renders in several templates.
pub fn scan_seller_meta_text(html: &str) -> SellerMeta {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<String>();

    let online = if text.contains("Currently online") || text.contains("Online now") {
        Some(true)
    } else if text.contains("Last seen") || text.contains("Currently offline") {
        Some(false)
    } else {
        None
    };

    let joined = ["Member since", "Joined"]
        .iter()
        .find_map(|marker| {
            text.split(marker).nth(1).map(|rest| {
                rest.trim_start_matches([':', ' '])
                    .split(['\n', '.', ','])
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_string()
            })
        })
        .filter(|s| !s.is_empty());

    SellerMeta {
        image_url: None,
        online,
        joined,
    }
}

/// Extracts hidden form tokens from a page
pub fn parse_form_tokens(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    let mut tokens = HashMap::new();

    if let Ok(selector) = Selector::parse("input[type='hidden'][name][value]") {
        for input in document.select(&selector) {
            if let (Some(name), Some(value)) =
                (input.value().attr("name"), input.value().attr("value"))
            {
                tokens.insert(name.to_string(), value.to_string());
            }
        }
    }

    tokens
}

fn strip_prefix_label(text: &str) -> String {
    text.split(':').next_back().unwrap_or(text).trim().to_string()
}
