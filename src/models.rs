use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Declares a closed set of form options that travel over the wire as their
/// Japanese labels.
macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labelled_enum!(
    /// Product category requested by the client.
    ProductType {
        Toner => "化粧水",
        Cream => "クリーム",
        Serum => "美容液",
        Cleanser => "クレンザー",
        Sunscreen => "日焼け止め",
    }
);

labelled_enum!(
    SkinType {
        Oily => "脂性肌",
        Dry => "乾燥肌",
        Combination => "混合肌",
        Sensitive => "敏感肌",
        Normal => "普通肌",
    }
);

labelled_enum!(
    Effect {
        Moisturizing => "保湿",
        AntiAging => "エイジングケア",
        Brightening => "美白",
        AcneCare => "ニキビケア",
        Soothing => "鎮静",
        UvProtection => "UVカット",
    }
);

labelled_enum!(
    Texture {
        Light => "さっぱり",
        Rich => "しっとり",
        Gel => "ジェル状",
        Watery => "ウォータリー",
    }
);

labelled_enum!(
    /// Follow-up a client can request for a generated formulation.
    InquiryAction {
        Consult => "相談",
        SampleRequest => "サンプル依頼",
        DetailedQuote => "詳細見積もり",
    }
);

impl InquiryAction {
    /// Heading of the contact form opened for this action.
    pub fn title(self) -> &'static str {
        match self {
            InquiryAction::Consult => "ご相談フォーム",
            InquiryAction::SampleRequest => "サンプル作成依頼",
            InquiryAction::DetailedQuote => "詳細お見積もり依頼",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("required field `{0}` is empty")]
    Blank(&'static str),
    #[error("`{0}` is not a valid email address")]
    InvalidEmail(String),
}

/// Client requirements submitted from the request form.
///
/// Values are never edited in place: every form change produces a new request
/// through the `with_*` / `toggle_*` helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulationRequest {
    pub product_name: String,
    pub email: String,
    pub concept: String,
    pub product_type: ProductType,
    #[serde(default)]
    pub skin_types: BTreeSet<SkinType>,
    #[serde(default)]
    pub effects: BTreeSet<Effect>,
    #[serde(default)]
    pub featured_ingredients: Vec<String>,
    #[serde(default)]
    pub include_ingredients: String,
    #[serde(default)]
    pub exclude_ingredients: String,
    pub texture: Texture,
}

impl Default for FormulationRequest {
    fn default() -> Self {
        Self {
            product_name: "エイジングケア美容液".to_string(),
            email: String::new(),
            concept: "最先端のペプチド技術と自然由来の成分を融合させた、次世代のエイジングケア体験を提供する美容液。".to_string(),
            product_type: ProductType::Serum,
            skin_types: [SkinType::Dry, SkinType::Normal].into_iter().collect(),
            effects: [Effect::AntiAging, Effect::Moisturizing].into_iter().collect(),
            featured_ingredients: Vec::new(),
            include_ingredients: "レチノール, ヒアルロン酸".to_string(),
            exclude_ingredients: "パラベン, 鉱物油".to_string(),
            texture: Texture::Light,
        }
    }
}

impl FormulationRequest {
    pub fn with_product_name(self, product_name: impl Into<String>) -> Self {
        Self { product_name: product_name.into(), ..self }
    }

    pub fn with_email(self, email: impl Into<String>) -> Self {
        Self { email: email.into(), ..self }
    }

    pub fn with_product_type(self, product_type: ProductType) -> Self {
        Self { product_type, ..self }
    }

    pub fn with_texture(self, texture: Texture) -> Self {
        Self { texture, ..self }
    }

    pub fn with_featured_ingredients(self, featured_ingredients: Vec<String>) -> Self {
        Self { featured_ingredients, ..self }
    }

    pub fn with_include_ingredients(self, include_ingredients: impl Into<String>) -> Self {
        Self { include_ingredients: include_ingredients.into(), ..self }
    }

    pub fn with_exclude_ingredients(self, exclude_ingredients: impl Into<String>) -> Self {
        Self { exclude_ingredients: exclude_ingredients.into(), ..self }
    }

    /// Checkbox semantics: adds the skin type if absent, removes it otherwise.
    pub fn toggle_skin_type(self, skin_type: SkinType) -> Self {
        let mut skin_types = self.skin_types.clone();
        if !skin_types.remove(&skin_type) {
            skin_types.insert(skin_type);
        }
        Self { skin_types, ..self }
    }

    pub fn toggle_effect(self, effect: Effect) -> Self {
        let mut effects = self.effects.clone();
        if !effects.remove(&effect) {
            effects.insert(effect);
        }
        Self { effects, ..self }
    }

    /// Checks the fields the request form marks as required.
    pub fn validate(&self) -> Result<(), RequestError> {
        require("productName", &self.product_name)?;
        require("concept", &self.concept)?;
        require("email", &self.email)?;
        check_email(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    pub percentage: f64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub phase_name: String,
    pub ingredients: Vec<Ingredient>,
}

impl Phase {
    /// Sum of the ingredient percentages. Not guaranteed to be 100.
    pub fn total_percentage(&self) -> f64 {
        self.ingredients.iter().map(|i| i.percentage).sum()
    }
}

/// Formulation proposal returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formulation {
    pub product_name: String,
    pub product_type: String,
    pub concept: String,
    pub suitability: String,
    pub estimated_cost: String, // e.g. "¥500〜¥800 / 100g"
    pub moq: String,            // e.g. "3,000個から"
    pub phases: Vec<Phase>,
    pub instructions: Vec<String>,
    pub notes: String,
}

impl Formulation {
    pub fn ingredient_count(&self) -> usize {
        self.phases.iter().map(|p| p.ingredients.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryDetails {
    pub company_name: String,
    pub contact_name: String,
    pub email: String,
    #[serde(default)]
    pub message: String,
}

impl InquiryDetails {
    /// Message the contact form is pre-filled with.
    pub fn default_message(action: InquiryAction, product_name: &str) -> String {
        format!("製品名「{product_name}」について、{action}を希望します。")
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        require("companyName", &self.company_name)?;
        require("contactName", &self.contact_name)?;
        require("email", &self.email)?;
        check_email(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFormulation {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub output: Formulation,
}

impl SavedFormulation {
    pub fn new(output: Formulation) -> Self {
        Self { id: Uuid::new_v4(), created_at: Utc::now(), output }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), RequestError> {
    if value.trim().is_empty() {
        return Err(RequestError::Blank(field));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), RequestError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid { Ok(()) } else { Err(RequestError::InvalidEmail(email.to_string())) }
}
