use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Email,
    FirstName,
    LastName,
    Tel,
    Password,
    Address,
    City,
    State,
    Zip,
    Country,
    Captcha,
    Honeypot,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub selector: String,
    pub name: String,
    pub field_type: String,
    pub autocomplete: Option<String>,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub visible: bool,
    pub required: bool,
    pub detected_type: FieldType,
}

struct TypeRule {
    field_type: FieldType,
    patterns: &'static [&'static str],
}

fn name_patterns() -> &'static [TypeRule] {
    // Order matters: first matching rule wins.
    static RULES: &[TypeRule] = &[
        TypeRule { field_type: FieldType::Email, patterns: &["email", "e-mail"] },
        TypeRule { field_type: FieldType::FirstName, patterns: &["first.?name", "given.?name", "fname"] },
        TypeRule { field_type: FieldType::LastName, patterns: &["last.?name", "family.?name", "lname", "surname"] },
        TypeRule { field_type: FieldType::Tel, patterns: &["phone", "tel", "mobile"] },
        TypeRule { field_type: FieldType::Password, patterns: &["password", "passwd", "pwd"] },
        TypeRule { field_type: FieldType::Address, patterns: &["address", "street"] },
        TypeRule { field_type: FieldType::City, patterns: &["city", "town"] },
        TypeRule { field_type: FieldType::State, patterns: &["state", "province"] },
        TypeRule { field_type: FieldType::Zip, patterns: &["zip", "postal"] },
        TypeRule { field_type: FieldType::Country, patterns: &["country"] },
        TypeRule { field_type: FieldType::Captcha, patterns: &["captcha", "recaptcha", "hcaptcha"] },
    ];
    RULES
}

fn honeypot_name_pattern() -> Regex {
    Regex::new(r"(?i)^(hp_|honeypot|do.?not.?fill|winnie|bot.?field)").unwrap()
}

/// Resolves `detectedType` by the first matching rule: native `type`
/// attribute, then `autocomplete` token, then a regex over
/// `name|id|placeholder|label`.
pub fn detect_field_type(
    native_type: &str,
    autocomplete: Option<&str>,
    name_id_placeholder_label: &str,
) -> FieldType {
    match native_type {
        "email" => return FieldType::Email,
        "tel" => return FieldType::Tel,
        "password" => return FieldType::Password,
        _ => {}
    }
    if let Some(ac) = autocomplete {
        match ac {
            "email" => return FieldType::Email,
            "given-name" => return FieldType::FirstName,
            "family-name" => return FieldType::LastName,
            "tel" => return FieldType::Tel,
            "street-address" => return FieldType::Address,
            "postal-code" => return FieldType::Zip,
            "country" | "country-name" => return FieldType::Country,
            _ => {}
        }
    }
    let haystack = name_id_placeholder_label;
    for rule in name_patterns() {
        for pattern in rule.patterns {
            if Regex::new(&format!("(?i){pattern}")).unwrap().is_match(haystack) {
                return rule.field_type;
            }
        }
    }
    if honeypot_name_pattern().is_match(haystack) {
        return FieldType::Honeypot;
    }
    FieldType::Unknown
}

pub fn is_honeypot(field: &FormField) -> bool {
    field.detected_type == FieldType::Honeypot
        || !field.visible
        || honeypot_name_pattern().is_match(&field.name)
}

pub fn is_captcha(field: &FormField) -> bool {
    field.detected_type == FieldType::Captcha
}

#[derive(Debug, Clone, Serialize)]
pub struct FillOutcome {
    pub selector: String,
    pub filled: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillOptions {
    #[serde(default = "default_respect_honeypots")]
    pub respect_honeypots: bool,
    #[serde(default = "default_skip_captchas")]
    pub skip_captchas: bool,
    #[serde(default)]
    pub submit: bool,
}

fn default_respect_honeypots() -> bool {
    true
}
fn default_skip_captchas() -> bool {
    true
}

fn alias_table() -> &'static HashMap<&'static str, &'static str> {
    use std::sync::OnceLock;
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert("email", "email_address");
        m.insert("email_address", "email");
        m.insert("tel", "phone");
        m.insert("phone", "tel");
        m.insert("zip", "postal_code");
        m.insert("postal_code", "zip");
        m
    })
}

fn detected_type_key(t: FieldType) -> &'static str {
    match t {
        FieldType::Email => "email",
        FieldType::FirstName => "first_name",
        FieldType::LastName => "last_name",
        FieldType::Tel => "tel",
        FieldType::Password => "password",
        FieldType::Address => "address",
        FieldType::City => "city",
        FieldType::State => "state",
        FieldType::Zip => "zip",
        FieldType::Country => "country",
        FieldType::Captcha => "captcha",
        FieldType::Honeypot => "honeypot",
        FieldType::Unknown => "unknown",
    }
}

fn resolve_value<'a>(field: &FormField, data: &'a HashMap<String, String>) -> Option<&'a str> {
    if let Some(v) = data.get(&field.name) {
        return Some(v);
    }
    if let Some(v) = data.get(&field.selector) {
        return Some(v);
    }
    let key = detected_type_key(field.detected_type);
    if let Some(v) = data.get(key) {
        return Some(v);
    }
    if let Some(alias) = alias_table().get(key) {
        if let Some(v) = data.get(*alias) {
            return Some(v);
        }
    }
    None
}

/// Fills a set of analyzed fields against a data map, honoring honeypot
/// and CAPTCHA policy before attempting any field.
pub fn plan_fill(
    fields: &[FormField],
    data: &HashMap<String, String>,
    options: &FillOptions,
) -> Result<Vec<FillOutcome>> {
    if options.skip_captchas && fields.iter().any(is_captcha) {
        return Err(Error::CaptchaDetected);
    }

    let mut outcomes = Vec::with_capacity(fields.len());
    for field in fields {
        if options.respect_honeypots && is_honeypot(field) {
            outcomes.push(FillOutcome {
                selector: field.selector.clone(),
                filled: false,
                reason: Some("honeypot".to_string()),
            });
            continue;
        }
        match resolve_value(field, data) {
            Some(_) => outcomes.push(FillOutcome { selector: field.selector.clone(), filled: true, reason: None }),
            None => outcomes.push(FillOutcome {
                selector: field.selector.clone(),
                filled: false,
                reason: Some("No data provided".to_string()),
            }),
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, detected: FieldType, visible: bool) -> FormField {
        FormField {
            selector: format!("#{name}"),
            name: name.to_string(),
            field_type: "text".to_string(),
            autocomplete: None,
            label: None,
            placeholder: None,
            visible,
            required: false,
            detected_type: detected,
        }
    }

    #[test]
    fn native_type_wins_over_name_heuristics() {
        let detected = detect_field_type("email", None, "some_weird_name");
        assert_eq!(detected, FieldType::Email);
    }

    #[test]
    fn autocomplete_token_resolves_given_name() {
        let detected = detect_field_type("text", Some("given-name"), "f1");
        assert_eq!(detected, FieldType::FirstName);
    }

    #[test]
    fn invisible_field_is_honeypot_regardless_of_detected_type() {
        let f = field("email", FieldType::Email, false);
        assert!(is_honeypot(&f));
    }

    #[test]
    fn skip_captchas_fails_fast() {
        let fields = vec![field("captcha_token", FieldType::Captcha, true)];
        let data = HashMap::new();
        let options = FillOptions { respect_honeypots: true, skip_captchas: true, submit: false };
        let result = plan_fill(&fields, &data, &options);
        assert!(matches!(result, Err(Error::CaptchaDetected)));
    }

    #[test]
    fn alias_resolves_email_address_to_email_field() {
        let fields = vec![field("email", FieldType::Email, true)];
        let mut data = HashMap::new();
        data.insert("email_address".to_string(), "a@b.com".to_string());
        let outcomes = plan_fill(&fields, &data, &FillOptions { respect_honeypots: true, skip_captchas: true, submit: false }).unwrap();
        assert!(outcomes[0].filled);
    }

    #[test]
    fn missing_value_is_skipped_with_reason() {
        let fields = vec![field("zip", FieldType::Zip, true)];
        let data = HashMap::new();
        let outcomes = plan_fill(&fields, &data, &FillOptions { respect_honeypots: true, skip_captchas: true, submit: false }).unwrap();
        assert!(!outcomes[0].filled);
        assert_eq!(outcomes[0].reason.as_deref(), Some("No data provided"));
    }
}
