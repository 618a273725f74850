//! Prompt catalog: document-type keys, templates and request construction.
//!
//! A [`PromptCatalog`] is an explicit value owned by the orchestrator, not a
//! global table. Session overrides live in the catalog instance and vanish
//! with it; two catalogs never observe each other's overrides.
//!
//! ## Request Layout
//!
//! Generation requests carry exactly two messages:
//! 1. **Instructions** — the active template's instruction text
//! 2. **User message** — built from the document text and auxiliary
//!    parameters, with the optional tone and call-to-action lines appended
//!
//! Refinement requests carry three: instructions, the previous description
//! as an assistant turn, and the operator's improvement instructions.

use crate::config::DescriberConfig;
use crate::prompts::{
    BMW_INSTRUCTIONS, EXPERIMENTAL_INSTRUCTIONS, MINI_INSTRUCTIONS, USED_INSTRUCTIONS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default model for every built-in template.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default completion budget for every built-in template.
pub const DEFAULT_MAX_TOKENS: usize = 1000;
/// Default sampling temperature for every built-in template.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Selects which prompt template describes a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentTypeKey {
    /// New MINI invoices.
    Mini,
    /// New BMW invoices.
    Bmw,
    /// Used vehicles of any brand; the only type that uses mileage.
    Used,
    /// Experimental narrator voice.
    Experimental,
    /// Caller-registered type, stored upper-case.
    Custom(String),
}

impl DocumentTypeKey {
    /// The four keys with built-in templates.
    pub const BUILT_IN: [DocumentTypeKey; 4] = [
        DocumentTypeKey::Mini,
        DocumentTypeKey::Bmw,
        DocumentTypeKey::Used,
        DocumentTypeKey::Experimental,
    ];

    /// Key for a caller-defined type, normalised the way names parse.
    pub fn custom(name: &str) -> Self {
        let Ok(key) = name.parse::<DocumentTypeKey>();
        key
    }

    /// The same key with a `Custom` name upper-cased and trimmed.
    pub fn normalized(self) -> Self {
        match self {
            DocumentTypeKey::Custom(name) => Self::custom(&name),
            other => other,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DocumentTypeKey::Mini => "MINI",
            DocumentTypeKey::Bmw => "BMW",
            DocumentTypeKey::Used => "USED",
            DocumentTypeKey::Experimental => "DEEPSEEK",
            DocumentTypeKey::Custom(name) => name,
        }
    }
}

impl fmt::Display for DocumentTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentTypeKey {
    type Err = Infallible;

    /// Case-insensitive. Unrecognised names become [`DocumentTypeKey::Custom`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Ok(match upper.as_str() {
            "MINI" => DocumentTypeKey::Mini,
            "BMW" => DocumentTypeKey::Bmw,
            "USED" => DocumentTypeKey::Used,
            "DEEPSEEK" | "EXPERIMENTAL" => DocumentTypeKey::Experimental,
            _ => DocumentTypeKey::Custom(upper),
        })
    }
}

/// Chat role of a request message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Role used for the instruction message.
    ///
    /// The `o1` model family rejects `system` messages, so instructions are
    /// sent as a user turn for those models.
    pub fn for_instructions(model: &str) -> Role {
        if model.starts_with("o1") {
            Role::User
        } else {
            Role::System
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A fully-built request for the generation endpoint.
///
/// Serialises to the chat-completions JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Optional free-text fields supplied by the operator for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryParams {
    /// Odometer reading; only the USED template uses it.
    pub mileage: Option<String>,
    /// Tone descriptor, e.g. "upbeat, family-friendly".
    pub tone: Option<String>,
    /// Call-to-action phrase to end the copy with.
    pub call_to_action: Option<String>,
}

impl AuxiliaryParams {
    pub fn mileage(mut self, mileage: impl Into<String>) -> Self {
        self.mileage = Some(mileage.into());
        self
    }

    pub fn tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }

    pub fn call_to_action(mut self, cta: impl Into<String>) -> Self {
        self.call_to_action = Some(cta.into());
        self
    }
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Builds the user message from document text and auxiliary parameters.
pub type UserMessageFn = Arc<dyn Fn(&str, &AuxiliaryParams) -> String + Send + Sync>;

/// Instructions, user-message builder and sampling parameters for one type.
#[derive(Clone)]
pub struct PromptTemplate {
    pub system_instructions: String,
    build_user_message: UserMessageFn,
    pub model_name: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl fmt::Debug for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptTemplate")
            .field("system_instructions", &self.system_instructions)
            .field("build_user_message", &"<fn>")
            .field("model_name", &self.model_name)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl PromptTemplate {
    /// Template with the default model, token budget and temperature.
    pub fn new(
        instructions: impl Into<String>,
        build_user_message: impl Fn(&str, &AuxiliaryParams) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            system_instructions: instructions.into(),
            build_user_message: Arc::new(build_user_message),
            model_name: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// Template whose user message names `label` and ignores auxiliary fields.
    pub fn labelled(instructions: impl Into<String>, label: &str) -> Self {
        let label = label.to_string();
        Self::new(instructions, move |text, _| {
            format!("Please process the following {label} document data:\n\n{text}")
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Same template with different instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = instructions.into();
        self
    }

    /// Run the builder; tone and call-to-action are appended, one per line,
    /// only when non-blank.
    pub fn user_message(&self, document_text: &str, aux: &AuxiliaryParams) -> String {
        let mut content = (self.build_user_message)(document_text, aux);
        if let Some(tone) = non_blank(&aux.tone) {
            content.push_str(&format!("\nTone: {tone}"));
        }
        if let Some(cta) = non_blank(&aux.call_to_action) {
            content.push_str(&format!("\nCall to action: {cta}"));
        }
        content
    }

    fn instruction_message(&self) -> Message {
        Message::new(
            Role::for_instructions(&self.model_name),
            self.system_instructions.clone(),
        )
    }
}

fn used_user_message(text: &str, aux: &AuxiliaryParams) -> String {
    match non_blank(&aux.mileage) {
        Some(m) => format!(
            "Please process the following used car document data\nMileage: {m}:\n\n{text}"
        ),
        None => format!("Please process the following used car document data:\n\n{text}"),
    }
}

/// Maps document-type keys to templates, with per-session overrides.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    templates: HashMap<DocumentTypeKey, PromptTemplate>,
    overrides: HashMap<DocumentTypeKey, String>,
    fallback: DocumentTypeKey,
    model_override: Option<String>,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self::built_in()
    }
}

impl PromptCatalog {
    /// The four built-in templates, falling back to MINI.
    pub fn built_in() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            DocumentTypeKey::Mini,
            PromptTemplate::labelled(MINI_INSTRUCTIONS, "MINI"),
        );
        templates.insert(
            DocumentTypeKey::Bmw,
            PromptTemplate::labelled(BMW_INSTRUCTIONS, "BMW"),
        );
        templates.insert(
            DocumentTypeKey::Used,
            PromptTemplate::new(USED_INSTRUCTIONS, used_user_message),
        );
        templates.insert(
            DocumentTypeKey::Experimental,
            PromptTemplate::labelled(EXPERIMENTAL_INSTRUCTIONS, "DeepSeek"),
        );
        Self {
            templates,
            overrides: HashMap::new(),
            fallback: DocumentTypeKey::Mini,
            model_override: None,
        }
    }

    /// Built-in templates with the config's fallback key and model override.
    pub fn from_config(config: &DescriberConfig) -> Self {
        let mut catalog = Self::built_in();
        if catalog.templates.contains_key(&config.default_type) {
            catalog.fallback = config.default_type.clone();
        }
        catalog.model_override = config.model.clone();
        catalog
    }

    /// Add or replace the template for `key`.
    ///
    /// `Custom` names are upper-cased so the key matches what `--type`
    /// parses to.
    pub fn register(&mut self, key: DocumentTypeKey, template: PromptTemplate) {
        self.templates.insert(key.normalized(), template);
    }

    /// Registered keys, sorted by name.
    pub fn keys(&self) -> Vec<DocumentTypeKey> {
        let mut keys: Vec<_> = self.templates.keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    /// `key` if it has a template, otherwise the fallback key.
    pub fn resolve_key<'a>(&'a self, key: &'a DocumentTypeKey) -> &'a DocumentTypeKey {
        if self.templates.contains_key(key) {
            key
        } else {
            &self.fallback
        }
    }

    /// The effective template for `key`: session override first, then the
    /// registered default, then the fallback key's template.
    pub fn template(&self, key: &DocumentTypeKey) -> PromptTemplate {
        let resolved = self.resolve_key(key);
        let mut template = self
            .templates
            .get(resolved)
            .cloned()
            .unwrap_or_else(|| PromptTemplate::labelled(MINI_INSTRUCTIONS, "MINI"));
        if let Some(instructions) = self.overrides.get(key) {
            template.system_instructions = instructions.clone();
        }
        if let Some(ref model) = self.model_override {
            template.model_name = model.clone();
        }
        template
    }

    /// Replace `key`'s instructions for the rest of this catalog's lifetime.
    ///
    /// Returns the new effective template. Other keys are unaffected.
    pub fn set_override(
        &mut self,
        key: DocumentTypeKey,
        instructions: impl Into<String>,
    ) -> PromptTemplate {
        let key = key.normalized();
        self.overrides.insert(key.clone(), instructions.into());
        self.template(&key)
    }

    /// Consuming form of [`Self::set_override`].
    pub fn with_override(mut self, key: DocumentTypeKey, instructions: impl Into<String>) -> Self {
        self.set_override(key, instructions);
        self
    }

    /// Drop `key`'s override, restoring the registered instructions.
    pub fn clear_override(&mut self, key: &DocumentTypeKey) {
        self.overrides.remove(key);
    }

    pub fn has_override(&self, key: &DocumentTypeKey) -> bool {
        self.overrides.contains_key(key)
    }

    /// Build the two-message generation request for one invoice group.
    pub fn build_request(
        &self,
        document_text: &str,
        key: &DocumentTypeKey,
        aux: &AuxiliaryParams,
    ) -> GenerationRequest {
        let template = self.template(key);
        GenerationRequest {
            messages: vec![
                template.instruction_message(),
                Message::new(Role::User, template.user_message(document_text, aux)),
            ],
            model: template.model_name,
            max_tokens: template.max_tokens,
            temperature: template.temperature,
        }
    }

    /// Build the three-message request that revises `previous_text`.
    pub fn build_refinement_request(
        &self,
        previous_text: &str,
        instructions: &str,
        key: &DocumentTypeKey,
    ) -> GenerationRequest {
        let template = self.template(key);
        GenerationRequest {
            messages: vec![
                template.instruction_message(),
                Message::new(Role::Assistant, previous_text),
                Message::new(Role::User, instructions),
            ],
            model: template.model_name,
            max_tokens: template.max_tokens,
            temperature: template.temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_has_instructions_then_user_message() {
        let catalog = PromptCatalog::built_in();
        let req = catalog.build_request(
            "Page 1:\nVehicle Inquiry",
            &DocumentTypeKey::Bmw,
            &AuxiliaryParams::default(),
        );
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[0].content, BMW_INSTRUCTIONS);
        assert_eq!(req.messages[1].role, Role::User);
        assert!(req.messages[1].content.contains("BMW document data"));
        assert!(req.messages[1].content.ends_with("Page 1:\nVehicle Inquiry"));
        assert_eq!(req.model, DEFAULT_MODEL);
        assert_eq!(req.max_tokens, 1000);
        assert_eq!(req.temperature, 0.7);
    }

    #[test]
    fn used_includes_mileage_mini_ignores_it() {
        let catalog = PromptCatalog::built_in();
        let aux = AuxiliaryParams::default().mileage("45000");

        let used = catalog.build_request("doc", &DocumentTypeKey::Used, &aux);
        assert!(used.messages[1].content.contains("45000"));

        let mini = catalog.build_request("doc", &DocumentTypeKey::Mini, &aux);
        assert!(!mini.messages[1].content.contains("45000"));
    }

    #[test]
    fn blank_mileage_is_omitted() {
        let catalog = PromptCatalog::built_in();
        let aux = AuxiliaryParams::default().mileage("   ");
        let used = catalog.build_request("doc", &DocumentTypeKey::Used, &aux);
        assert!(!used.messages[1].content.contains("Mileage"));
    }

    #[test]
    fn tone_and_cta_appended_on_own_lines() {
        let catalog = PromptCatalog::built_in();
        let aux = AuxiliaryParams::default()
            .tone("warm")
            .call_to_action("Book a test drive today");
        let req = catalog.build_request("doc", &DocumentTypeKey::Mini, &aux);
        let user = &req.messages[1].content;
        assert!(user.contains("\nTone: warm"));
        assert!(user.ends_with("\nCall to action: Book a test drive today"));
        // Instructions are never touched by auxiliary fields.
        assert_eq!(req.messages[0].content, MINI_INSTRUCTIONS);
    }

    #[test]
    fn empty_aux_fields_add_nothing() {
        let catalog = PromptCatalog::built_in();
        let aux = AuxiliaryParams::default().tone("").call_to_action("  ");
        let req = catalog.build_request("doc", &DocumentTypeKey::Mini, &aux);
        assert!(!req.messages[1].content.contains("Tone:"));
        assert!(!req.messages[1].content.contains("Call to action:"));
    }

    #[test]
    fn unknown_key_falls_back_to_mini() {
        let catalog = PromptCatalog::built_in();
        let key: DocumentTypeKey = "audi".parse().unwrap();
        assert_eq!(key, DocumentTypeKey::Custom("AUDI".into()));
        assert_eq!(catalog.resolve_key(&key), &DocumentTypeKey::Mini);
        let req = catalog.build_request("doc", &key, &AuxiliaryParams::default());
        assert_eq!(req.messages[0].content, MINI_INSTRUCTIONS);
    }

    #[test]
    fn override_affects_only_its_key() {
        let mut catalog = PromptCatalog::built_in();
        let effective = catalog.set_override(DocumentTypeKey::Bmw, "Be brief.");
        assert_eq!(effective.system_instructions, "Be brief.");

        let bmw = catalog.build_request("doc", &DocumentTypeKey::Bmw, &AuxiliaryParams::default());
        assert_eq!(bmw.messages[0].content, "Be brief.");
        let mini =
            catalog.build_request("doc", &DocumentTypeKey::Mini, &AuxiliaryParams::default());
        assert_eq!(mini.messages[0].content, MINI_INSTRUCTIONS);

        catalog.clear_override(&DocumentTypeKey::Bmw);
        assert_eq!(
            catalog.template(&DocumentTypeKey::Bmw).system_instructions,
            BMW_INSTRUCTIONS
        );
    }

    #[test]
    fn override_on_clone_does_not_leak() {
        let base = PromptCatalog::built_in();
        let tweaked = base.clone().with_override(DocumentTypeKey::Mini, "Shout.");
        assert!(tweaked.has_override(&DocumentTypeKey::Mini));
        assert!(!base.has_override(&DocumentTypeKey::Mini));
    }

    #[test]
    fn registered_custom_key_is_used() {
        let mut catalog = PromptCatalog::built_in();
        let key = DocumentTypeKey::Custom("VAN".into());
        catalog.register(
            key.clone(),
            PromptTemplate::labelled("Describe vans.", "van").with_max_tokens(300),
        );
        let req = catalog.build_request("doc", &key, &AuxiliaryParams::default());
        assert_eq!(req.messages[0].content, "Describe vans.");
        assert_eq!(req.max_tokens, 300);
        assert!(catalog.keys().contains(&key));
    }

    #[test]
    fn lower_case_registration_matches_parsed_key() {
        let mut catalog = PromptCatalog::built_in();
        catalog.register(
            DocumentTypeKey::Custom("van".into()),
            PromptTemplate::labelled("Describe vans.", "van"),
        );
        let parsed: DocumentTypeKey = "van".parse().unwrap();
        assert_eq!(parsed, DocumentTypeKey::custom(" Van "));
        assert_eq!(catalog.resolve_key(&parsed), &parsed);
        let req = catalog.build_request("doc", &parsed, &AuxiliaryParams::default());
        assert_eq!(req.messages[0].content, "Describe vans.");
    }

    #[test]
    fn o1_models_receive_instructions_as_user() {
        let mut config = DescriberConfig::default();
        config.model = Some("o1-mini".into());
        let catalog = PromptCatalog::from_config(&config);
        let req = catalog.build_request("doc", &DocumentTypeKey::Mini, &AuxiliaryParams::default());
        assert_eq!(req.model, "o1-mini");
        assert_eq!(req.messages[0].role, Role::User);
    }

    #[test]
    fn refinement_request_has_three_turns() {
        let catalog = PromptCatalog::built_in();
        let req =
            catalog.build_refinement_request("Old copy", "Mention the sunroof", &DocumentTypeKey::Mini);
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User]);
        assert_eq!(req.messages[1].content, "Old copy");
        assert_eq!(req.messages[2].content, "Mention the sunroof");
    }

    #[test]
    fn request_serialises_to_chat_completions_shape() {
        let catalog = PromptCatalog::built_in();
        let req = catalog.build_request("doc", &DocumentTypeKey::Mini, &AuxiliaryParams::default());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 1000);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
    }
}
