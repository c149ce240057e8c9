//! Site profiles: the injected bundle that specialises the engine for one
//! target portal version.
//!
//! A profile carries everything site-specific — locator table, state markers,
//! extraction rules, entry URLs — so the session logic itself stays generic.
//! Supporting a portal redesign means writing a new profile, not a new
//! session type.

use crate::classifier::StateMarkers;
use crate::extract::{ExtractionRule, Extractor};
use crate::locator::{Candidate, Locator, LocatorTable, Region};

/// Semantic target names used by the built-in workflows.
pub mod targets {
    pub const EMAIL_INPUT: &str = "email input";
    pub const PASSWORD_INPUT: &str = "password input";
    pub const LOGIN_SUBMIT: &str = "login submit";
    pub const LOGIN_ENTRY: &str = "login entry";
    pub const LIST_SEARCH: &str = "list search";
    pub const PROPERTY_NAME_INPUT: &str = "property name input";
    pub const SEARCH_SUBMIT: &str = "search submit";
    pub const RESULT_DETAIL_LINK: &str = "result detail link";
}

/// Everything the engine needs to know about one target site.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub name: &'static str,
    pub login_url: String,
    pub top_url: String,
    /// URL fragment identifying the portal top page.
    pub top_path: String,
    pub locators: LocatorTable,
    pub markers: StateMarkers,
    pub rules: Vec<ExtractionRule>,
    /// Literal substrings a result card is expected to contain.
    pub card_expected: Vec<String>,
    /// Minimum substring hits before a container counts as a card.
    pub card_min_score: u32,
    /// Ancestor-walk depth cap for card discovery.
    pub card_max_depth: usize,
}

impl SiteProfile {
    /// Profile for the supported rental-listing portal.
    pub fn rental_portal() -> Self {
        let mut locators = LocatorTable::new();

        locators.insert(Locator::new(
            targets::EMAIL_INPUT,
            vec![
                Candidate::selector("input[type='email']"),
                Candidate::selector("input[name='email']"),
                Candidate::selector("input[id*='email']"),
                Candidate::attr_pattern("input", "placeholder", "mail|メール"),
            ],
        ));

        locators.insert(Locator::new(
            targets::PASSWORD_INPUT,
            vec![
                Candidate::selector("input[type='password']"),
                Candidate::selector("input[name='password']"),
                Candidate::selector("input[id*='password']"),
                Candidate::attr_pattern("input", "placeholder", "password|パスワード"),
            ],
        ));

        locators.insert(Locator::new(
            targets::LOGIN_SUBMIT,
            vec![
                Candidate::selector("button[type='submit']"),
                Candidate::selector("input[type='submit']"),
                Candidate::text("button", "ログイン"),
                Candidate::text("button", "Login"),
                Candidate::selector(".login-btn"),
                Candidate::selector(".submit-btn"),
                Candidate::confirm_key(),
            ],
        ));

        locators.insert(Locator::new(
            targets::LOGIN_ENTRY,
            vec![
                Candidate::selector("a[href*='login']"),
                Candidate::selector("a[href*='sign_in']"),
                Candidate::text("a, button", "ログイン"),
                Candidate::text("a, button", "Login"),
                Candidate::selector(".login-btn"),
                Candidate::selector(".signin-btn"),
            ],
        ));

        locators.insert(Locator::new(
            targets::LIST_SEARCH,
            vec![
                Candidate::text("a, button", "リスト検索"),
                Candidate::text("[class*='rental'] a", "検索"),
                Candidate::selector("a[href*='/properties'], a[href*='/search']"),
                Candidate::selector("#rental-search"),
            ],
        ));

        locators.insert(Locator::new(
            targets::PROPERTY_NAME_INPUT,
            vec![
                Candidate::selector("input[placeholder*='物件名']"),
                Candidate::selector("input[placeholder*='カナ検索']"),
                Candidate::attr_pattern("input", "name", "property|building"),
                Candidate::selector(".search-form input[type='text']"),
                Candidate::selector("#property_name, #building_name"),
            ],
        ));

        // The portal places condition-save and clear buttons next to the
        // search control; the reject terms keep them out of reach.
        let search_rejects = &["条件", "削除", "保存", "クリア"];
        locators.insert(Locator::new(
            targets::SEARCH_SUBMIT,
            vec![
                Candidate::text_rejecting(
                    "button, input[type='submit']",
                    "検索",
                    search_rejects,
                ),
                Candidate::geometry("button", Region::BottomRight, Some("検索"), search_rejects),
                Candidate::confirm_key(),
            ],
        ));

        locators.insert(Locator::new(
            targets::RESULT_DETAIL_LINK,
            vec![Candidate::selector("a[href*='/rent_rooms/']")],
        ));

        let markers = StateMarkers {
            email_input_selector:
                "input[type='email'], input[name='email'], input[id*='email']".to_string(),
            password_input_selector:
                "input[type='password'], input[name='password'], input[id*='password']".to_string(),
            company_select_selector: "#company_id_select, select[name='company_id']".to_string(),
            result_anchor_selector: "a[href*='/rent_rooms/']".to_string(),
            no_results_phrases: vec![
                "検索結果がありませんでした".to_string(),
                "該当する物件がありません".to_string(),
                "見つかりませんでした".to_string(),
                "ご希望の条件に一致する検索結果がありませんでした".to_string(),
            ],
            status_marker: "募集中".to_string(),
            overlay_min_width: 200.0,
            overlay_min_height: 150.0,
            overlay_z_threshold: 10,
            body_text_limit: 30_000,
        };

        let rules = vec![
            ExtractionRule::new(
                "property_name",
                vec![
                    labeled(&["物件名"]),
                    class_token("property-name"),
                    class_token("building"),
                ],
            ),
            ExtractionRule::new("room_number", vec![labeled(&["部屋番号"])]),
            ExtractionRule::new(
                "rent",
                vec![
                    labeled(&["賃料"]),
                    class_token("rent"),
                    pattern(r"\d+(?:\.\d+)?\s*万円"),
                ],
            ),
            ExtractionRule::new("management_fee", vec![labeled(&["管理費", "共益費"])]),
            ExtractionRule::new(
                "deposit",
                vec![labeled(&["敷金"]), pattern(r"敷金[：:\s]*(\d+(?:\.\d+)?\s*万円)")],
            ),
            ExtractionRule::new(
                "key_money",
                vec![labeled(&["礼金"]), pattern(r"礼金[：:\s]*(\d+(?:\.\d+)?\s*万円)")],
            ),
            ExtractionRule::new(
                "layout",
                vec![
                    labeled(&["間取り"]),
                    class_token("layout"),
                    pattern(r"\d+S?[LDK]+|ワンルーム"),
                ],
            ),
            ExtractionRule::new(
                "area",
                vec![
                    labeled(&["専有面積", "面積"]),
                    class_token("area"),
                    pattern(r"\d+(?:\.\d+)?\s*(?:㎡|m²)"),
                ],
            ),
            ExtractionRule::new("floor", vec![labeled(&["階数", "階"]), pattern(r"\d+階")]),
            ExtractionRule::new("built", vec![labeled(&["築年月", "竣工年月"])]),
            ExtractionRule::new(
                "available_from",
                vec![labeled(&["入居可能時期", "入居可能日"])],
            ),
            ExtractionRule::new(
                "management_company",
                vec![labeled(&["管理会社"]), class_token("management")],
            ),
            ExtractionRule::new("address", vec![labeled(&["所在地"])]),
        ];

        SiteProfile {
            name: "rental-portal",
            login_url: "https://itandi-accounts.com/".to_string(),
            top_url: "https://itandibb.com/top".to_string(),
            top_path: "/top".to_string(),
            locators,
            markers,
            rules,
            card_expected: vec![
                "万円".to_string(),
                "募集中".to_string(),
                "LDK".to_string(),
                "詳細".to_string(),
                "部屋番号".to_string(),
                "内見".to_string(),
            ],
            card_min_score: 3,
            card_max_depth: 15,
        }
    }

    pub fn locator(&self, name: &str) -> Option<&Locator> {
        self.locators.get(name)
    }
}

fn labeled(labels: &[&str]) -> Extractor {
    Extractor::LabeledCell {
        labels: labels.iter().map(|label| label.to_string()).collect(),
    }
}

fn class_token(token: &str) -> Extractor {
    Extractor::ClassToken {
        token: token.to_string(),
    }
}

fn pattern(pattern: &str) -> Extractor {
    Extractor::TextPattern {
        pattern: pattern.to_string(),
    }
}
