//! Prompt assembly.
//!
//! Templates come from the batch (user-edited) or fall back to the
//! built-in defaults. Placeholders are substituted from the content
//! item and from sibling jobs that already completed, so later fields
//! build on generated values rather than the originals.

use std::collections::HashMap;

use serde_json::Value;

use crate::kernel::content::ContentItem;

use super::fields::FieldKind;
use super::models::StyleModifiers;
use super::parse::value_as_list;

/// Everything placeholder substitution can draw from.
pub struct PromptContext<'a> {
    pub item: &'a ContentItem,
    /// Parsed results of the item's completed sibling jobs.
    pub results: &'a HashMap<FieldKind, Value>,
}

impl PromptContext<'_> {
    fn result_text(&self, field: FieldKind) -> Option<&str> {
        self.results.get(&field).and_then(|v| v.as_str())
    }

    /// Generated value when available, original item value otherwise.
    fn resolve(&self, placeholder: &str) -> Option<String> {
        match placeholder {
            "product_name" => Some(self.item.title.clone()),
            "product_description" => {
                if self.item.description.is_empty() {
                    Some(self.item.short_description.clone())
                } else {
                    Some(self.item.description.clone())
                }
            }
            "focus_keyword" => Some(
                self.result_text(FieldKind::FocusKeyword)
                    .unwrap_or_default()
                    .to_string(),
            ),
            "title" => Some(
                self.result_text(FieldKind::Title)
                    .unwrap_or(&self.item.title)
                    .to_string(),
            ),
            "short_description" => Some(
                self.result_text(FieldKind::ShortDescription)
                    .unwrap_or(&self.item.short_description)
                    .to_string(),
            ),
            "tags" => {
                let tags = self
                    .results
                    .get(&FieldKind::Tags)
                    .map(value_as_list)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| self.item.tags.clone());
                Some(tags.join(", "))
            }
            _ => None,
        }
    }
}

/// Replace known `{placeholder}` tokens. Unknown tokens are left
/// untouched so a typo in a custom template is visible in the output.
pub fn substitute_placeholders(template: &str, ctx: &PromptContext<'_>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match ctx.resolve(name) {
                    Some(value) => output.push_str(&value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    output.push_str(rest);
    output
}

/// Append the batch's style modifiers as extra instructions.
pub fn apply_style(prompt: &mut String, style: &StyleModifiers) {
    if let Some(tone) = style.tone.as_deref().filter(|t| !t.is_empty()) {
        prompt.push_str(&format!("\nWrite in a {tone} tone."));
    }
    if let Some(audience) = style.audience.as_deref().filter(|a| !a.is_empty()) {
        prompt.push_str(&format!("\nThe target audience is: {audience}."));
    }
    if let Some(max_words) = style.max_words {
        prompt.push_str(&format!("\nKeep the response under {max_words} words."));
    }
}

/// Build the final prompt for one job.
pub fn assemble_prompt(template: &str, ctx: &PromptContext<'_>, style: &StyleModifiers) -> String {
    let mut prompt = substitute_placeholders(template, ctx);
    apply_style(&mut prompt, style);
    prompt
}

/// Built-in template used when the batch carries no override for the
/// field.
pub fn default_template(field: FieldKind) -> &'static str {
    match field {
        FieldKind::FocusKeyword => {
            "Suggest the single best SEO focus keyphrase for this product. \
             Respond with the keyphrase only, no explanation.\n\n\
             Product: {product_name}\nDescription: {product_description}"
        }
        FieldKind::Title => {
            "Write an SEO-optimized product title (50-60 characters) that \
             includes the focus keyword \"{focus_keyword}\". Respond with the \
             title only.\n\nProduct: {product_name}\nDescription: {product_description}"
        }
        FieldKind::ShortDescription => {
            "Write a short product description (2-3 sentences) for \"{title}\" \
             that naturally uses the focus keyword \"{focus_keyword}\".\n\n\
             Source material: {product_description}"
        }
        FieldKind::FullDescription => {
            "Write a detailed product description (3-5 paragraphs) for \
             \"{title}\". Use the focus keyword \"{focus_keyword}\" naturally \
             and cover features, materials, and use cases.\n\n\
             Source material: {product_description}"
        }
        FieldKind::MetaDescription => {
            "Write an SEO meta description (under 155 characters) for \
             \"{title}\" that includes \"{focus_keyword}\" and invites a click. \
             Respond with the meta description only."
        }
        FieldKind::Tags => {
            "Suggest 5-8 product tags for \"{title}\" as a comma-separated \
             list. Include \"{focus_keyword}\" if appropriate.\n\n\
             Description: {short_description}"
        }
        FieldKind::Faq => {
            "Write 4-6 frequently asked questions and answers about \
             \"{title}\". Format each as \"Q: ...\" on one line and \
             \"A: ...\" on the next.\n\nProduct details: {product_description}"
        }
        FieldKind::KeyFeatures => {
            "List the key features of \"{title}\" as a bulleted list, one \
             feature per line starting with \"-\".\n\n\
             Product details: {product_description}"
        }
        FieldKind::ProsCons => {
            "List the pros and cons of \"{title}\". Use a \"Pros:\" heading \
             followed by bulleted items, then a \"Cons:\" heading followed by \
             bulleted items.\n\nProduct details: {product_description}"
        }
        FieldKind::BuyingGuide => {
            "Write a short buying guide for \"{title}\" as a numbered list of \
             4-6 points a shopper should consider.\n\n\
             Product details: {product_description}"
        }
        // Deterministic field; never prompted.
        FieldKind::ImageMetadata => "",
    }
}
