//! Static field registry.
//!
//! Every generatable field is declared here with its scheduling order,
//! prerequisite fields, criticality, and output shape. The registry is
//! fixed at compile time; the field-selection policy filters it by
//! generation mode and per-batch feature flags. Third-party extension
//! means adding an entry here, not hooking a runtime filter.

use serde::{Deserialize, Serialize};

/// How a field's raw AI output is sanitized into a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseKind {
    PlainText,
    CommaList,
    BulletedList,
    NumberedList,
    FaqPairs,
    ProsCons,
}

/// The catalog of generatable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    FocusKeyword,
    Title,
    ShortDescription,
    FullDescription,
    MetaDescription,
    Tags,
    Faq,
    KeyFeatures,
    ProsCons,
    BuyingGuide,
    ImageMetadata,
}

impl FieldKind {
    pub const ALL: [FieldKind; 11] = [
        FieldKind::FocusKeyword,
        FieldKind::Title,
        FieldKind::ShortDescription,
        FieldKind::FullDescription,
        FieldKind::MetaDescription,
        FieldKind::Tags,
        FieldKind::Faq,
        FieldKind::KeyFeatures,
        FieldKind::ProsCons,
        FieldKind::BuyingGuide,
        FieldKind::ImageMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::FocusKeyword => "focus_keyword",
            FieldKind::Title => "title",
            FieldKind::ShortDescription => "short_description",
            FieldKind::FullDescription => "full_description",
            FieldKind::MetaDescription => "meta_description",
            FieldKind::Tags => "tags",
            FieldKind::Faq => "faq",
            FieldKind::KeyFeatures => "key_features",
            FieldKind::ProsCons => "pros_cons",
            FieldKind::BuyingGuide => "buying_guide",
            FieldKind::ImageMetadata => "image_metadata",
        }
    }

    pub fn parse(name: &str) -> Option<FieldKind> {
        FieldKind::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Static scheduling priority within one content item. Lower runs
    /// first; dependency filtering happens on top of this sort.
    pub fn order(&self) -> i32 {
        match self {
            FieldKind::FocusKeyword => 10,
            FieldKind::Title => 20,
            FieldKind::ShortDescription => 30,
            FieldKind::FullDescription => 40,
            FieldKind::MetaDescription => 50,
            FieldKind::Tags => 60,
            FieldKind::Faq => 70,
            FieldKind::KeyFeatures => 80,
            FieldKind::ProsCons => 90,
            FieldKind::BuyingGuide => 100,
            FieldKind::ImageMetadata => 110,
        }
    }

    /// Fields that must be `completed` for the same (batch, item)
    /// before this field may start.
    pub fn prerequisites(&self) -> &'static [FieldKind] {
        match self {
            FieldKind::FocusKeyword => &[],
            FieldKind::Title => &[FieldKind::FocusKeyword],
            FieldKind::ShortDescription => &[FieldKind::FocusKeyword, FieldKind::Title],
            FieldKind::FullDescription => &[FieldKind::FocusKeyword, FieldKind::Title],
            FieldKind::MetaDescription => &[FieldKind::FocusKeyword],
            FieldKind::Tags => &[FieldKind::FocusKeyword],
            FieldKind::Faq => &[FieldKind::Title],
            FieldKind::KeyFeatures => &[FieldKind::Title],
            FieldKind::ProsCons => &[FieldKind::Title],
            FieldKind::BuyingGuide => &[FieldKind::Title],
            FieldKind::ImageMetadata => &[FieldKind::FocusKeyword, FieldKind::Title],
        }
    }

    /// A critical field's permanent failure invalidates the rest of the
    /// item's generation.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            FieldKind::FocusKeyword
                | FieldKind::Title
                | FieldKind::ShortDescription
                | FieldKind::FullDescription
        )
    }

    pub fn parse_kind(&self) -> ParseKind {
        match self {
            FieldKind::FocusKeyword
            | FieldKind::Title
            | FieldKind::ShortDescription
            | FieldKind::FullDescription
            | FieldKind::MetaDescription => ParseKind::PlainText,
            FieldKind::Tags => ParseKind::CommaList,
            FieldKind::Faq => ParseKind::FaqPairs,
            FieldKind::KeyFeatures => ParseKind::BulletedList,
            FieldKind::ProsCons => ParseKind::ProsCons,
            FieldKind::BuyingGuide => ParseKind::NumberedList,
            FieldKind::ImageMetadata => ParseKind::PlainText,
        }
    }

    /// Whether the field requires an AI call. `image_metadata` is a
    /// deterministic rewrite from already-generated values.
    pub fn uses_ai(&self) -> bool {
        !matches!(self, FieldKind::ImageMetadata)
    }
}

/// What a batch is generating for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Seo,
    AiSearch,
    #[default]
    Both,
}

/// Per-batch toggles for the optional fields.
///
/// The critical SEO core (focus keyword, title, descriptions) is not
/// toggleable; disabling it would leave dependents unschedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub meta_description: bool,
    pub tags: bool,
    pub faq: bool,
    pub key_features: bool,
    pub pros_cons: bool,
    pub buying_guide: bool,
    pub image_metadata: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            meta_description: true,
            tags: true,
            faq: true,
            key_features: true,
            pros_cons: true,
            buying_guide: true,
            image_metadata: true,
        }
    }
}

impl FeatureFlags {
    fn enables(&self, field: FieldKind) -> bool {
        match field {
            FieldKind::MetaDescription => self.meta_description,
            FieldKind::Tags => self.tags,
            FieldKind::Faq => self.faq,
            FieldKind::KeyFeatures => self.key_features,
            FieldKind::ProsCons => self.pros_cons,
            FieldKind::BuyingGuide => self.buying_guide,
            FieldKind::ImageMetadata => self.image_metadata,
            // Critical core fields are always on.
            _ => true,
        }
    }
}

fn in_mode(field: FieldKind, mode: GenerationMode) -> bool {
    let seo = matches!(
        field,
        FieldKind::FocusKeyword
            | FieldKind::Title
            | FieldKind::ShortDescription
            | FieldKind::FullDescription
            | FieldKind::MetaDescription
            | FieldKind::Tags
            | FieldKind::ImageMetadata
    );

    match mode {
        GenerationMode::Seo => seo,
        GenerationMode::AiSearch => {
            // AI-search answers still need the keyword/title chain the
            // answer fields depend on.
            !seo || matches!(field, FieldKind::FocusKeyword | FieldKind::Title)
        }
        GenerationMode::Both => true,
    }
}

/// The field-selection policy: which jobs a batch creates.
///
/// Returns fields sorted by scheduling order. Disabled or out-of-mode
/// fields simply produce no jobs.
pub fn select_fields(mode: GenerationMode, flags: &FeatureFlags) -> Vec<FieldKind> {
    let mut fields: Vec<FieldKind> = FieldKind::ALL
        .into_iter()
        .filter(|f| in_mode(*f, mode) && flags.enables(*f))
        .collect();

    fields.sort_by_key(|f| f.order());
    fields
}
