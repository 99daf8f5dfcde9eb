//! Raw transport identifier → canonical contact key.
//!
//! WhatsApp hands out several encodings for one human: `<digits>@s.whatsapp.net`,
//! `<digits>@c.us`, linked IDs (`<digits>@lid`) and device-qualified forms
//! (`<digits>:12@s.whatsapp.net`). Everything that resolves to the same
//! national number is the same contact.

use regex::Regex;

use crate::state::Platform;

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CanonicalIdentity {
    pub key: String,
    pub display_form: String,
    pub is_opaque: bool,
}

/// Whether the transport suffix denotes a phone address. A bare number counts;
/// linked IDs, groups and anything else do not.
fn is_phone_transport(raw: &str) -> bool {
    match raw.trim().split_once('@') {
        None => true,
        Some((_, server)) => matches!(
            server.to_ascii_lowercase().as_str(),
            "s.whatsapp.net" | "c.us"
        ),
    }
}

/// Mobile numbering plan used to recognise dialable numbers.
#[derive(Clone, Debug)]
pub struct NumberPlan {
    country_code: String,
    national_prefix: String,
    subscriber_len: usize,
    subscriber_pattern: String,
    subscriber: Regex,
}

impl NumberPlan {
    pub fn new(
        country_code: &str,
        national_prefix: &str,
        subscriber_pattern: &str,
        subscriber_len: usize,
    ) -> Result<Self, regex::Error> {
        let subscriber = Regex::new(&format!("^(?:{subscriber_pattern})$"))?;
        Ok(Self {
            country_code: country_code.to_string(),
            national_prefix: national_prefix.to_string(),
            subscriber_len,
            subscriber_pattern: subscriber_pattern.to_string(),
            subscriber,
        })
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn national_prefix(&self) -> &str {
        &self.national_prefix
    }

    pub fn subscriber_pattern(&self) -> &str {
        &self.subscriber_pattern
    }

    pub fn subscriber_len(&self) -> usize {
        self.subscriber_len
    }

    fn international_len(&self) -> usize {
        self.country_code.len() + self.subscriber_len
    }

    fn national_len(&self) -> usize {
        self.national_prefix.len() + self.subscriber_len
    }

    fn national(&self, subscriber: &str) -> String {
        format!("{}{}", self.national_prefix, subscriber)
    }

    fn is_subscriber(&self, digits: &str) -> bool {
        digits.len() == self.subscriber_len && self.subscriber.is_match(digits)
    }

    fn from_international(&self, digits: &str) -> Option<String> {
        if digits.len() != self.international_len() {
            return None;
        }
        let sub = digits.strip_prefix(self.country_code.as_str())?;
        self.is_subscriber(sub).then(|| self.national(sub))
    }

    fn from_national(&self, digits: &str) -> Option<String> {
        if digits.len() != self.national_len() {
            return None;
        }
        let sub = digits.strip_prefix(self.national_prefix.as_str())?;
        self.is_subscriber(sub).then(|| self.national(sub))
    }

    /// National key back to the international digits a transport routes on.
    fn to_international(&self, national: &str) -> Option<String> {
        self.from_national(national)?;
        let sub = national.strip_prefix(self.national_prefix.as_str())?;
        Some(format!("{}{}", self.country_code, sub))
    }

    /// Whole-string match in any of the plan's three spellings.
    fn exact(&self, digits: &str) -> Option<String> {
        self.from_international(digits)
            .or_else(|| self.from_national(digits))
            .or_else(|| self.is_subscriber(digits).then(|| self.national(digits)))
    }

    /// International form glued to the front or the back of extra digits.
    fn at_edges(&self, digits: &str) -> Option<String> {
        let n = self.international_len();
        if digits.len() <= n {
            return None;
        }
        self.from_international(&digits[..n])
            .or_else(|| self.from_international(&digits[digits.len() - n..]))
    }

    /// Slide fixed-size windows across an over-long digit string.
    fn scan(&self, digits: &str) -> Option<String> {
        windows(digits, self.international_len())
            .find_map(|w| self.from_international(w))
            .or_else(|| windows(digits, self.national_len()).find_map(|w| self.from_national(w)))
    }
}

fn windows(digits: &str, len: usize) -> impl Iterator<Item = &str> {
    let count = if len == 0 || digits.len() < len {
        0
    } else {
        digits.len() - len + 1
    };
    (0..count).map(move |i| &digits[i..i + len])
}

#[derive(Clone, Debug)]
pub struct Canonicalizer {
    plan: NumberPlan,
    max_phone_len: usize,
    opaque_key_len: usize,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        let plan = NumberPlan::new("20", "0", r"1[0125]\d{8}", 10)
            .expect("default subscriber pattern is valid");
        Self::new(plan, 15, 20)
    }
}

impl Canonicalizer {
    pub fn new(plan: NumberPlan, max_phone_len: usize, opaque_key_len: usize) -> Self {
        Self {
            plan,
            max_phone_len,
            opaque_key_len: opaque_key_len.max(1),
        }
    }

    pub fn plan(&self) -> &NumberPlan {
        &self.plan
    }

    pub fn max_phone_len(&self) -> usize {
        self.max_phone_len
    }

    pub fn opaque_key_len(&self) -> usize {
        self.opaque_key_len
    }

    pub fn canonicalize(&self, raw: &str) -> CanonicalIdentity {
        let user = user_part(raw);
        let digits: String = user.chars().filter(char::is_ascii_digit).collect();

        if digits.is_empty() {
            let key = user.trim().to_ascii_lowercase();
            return CanonicalIdentity {
                display_form: key.clone(),
                key,
                is_opaque: true,
            };
        }

        if let Some(national) = self.plan.exact(&digits) {
            return dialable(national);
        }

        if digits.len() <= self.max_phone_len {
            if let Some(national) = self.plan.at_edges(&digits) {
                return dialable(national);
            }
            // Foreign or short numbers: keep as typed.
            return dialable(digits);
        }

        if let Some(national) = self.plan.scan(&digits) {
            return dialable(national);
        }

        let cut = digits.len().saturating_sub(self.opaque_key_len);
        CanonicalIdentity {
            key: digits[cut..].to_string(),
            display_form: digits,
            is_opaque: true,
        }
    }

    pub fn canonicalize_for(&self, platform: Platform, raw: &str) -> CanonicalIdentity {
        match platform {
            Platform::WhatsApp | Platform::Telegram => self.canonicalize(raw),
            Platform::LiveChat => {
                let key = raw.trim().to_ascii_lowercase();
                CanonicalIdentity {
                    display_form: key.clone(),
                    key,
                    is_opaque: false,
                }
            }
        }
    }

    /// A raw identifier someone could actually dial.
    pub fn is_dialable(&self, platform: Platform, raw: &str) -> bool {
        if platform == Platform::LiveChat {
            return false;
        }
        is_phone_transport(raw) && !self.canonicalize(raw).is_opaque
    }

    /// The identifier to address the backend with when all we know is the key.
    pub fn remote_form(&self, platform: Platform, key: &str) -> String {
        match platform {
            Platform::LiveChat => key.to_string(),
            Platform::WhatsApp | Platform::Telegram => self
                .plan
                .to_international(key)
                .unwrap_or_else(|| key.to_string()),
        }
    }

    /// Opaque keys too long to be a phone number are transport noise, not contacts.
    pub fn is_noise(&self, key: &str, is_opaque: bool) -> bool {
        is_opaque && key.len() > self.max_phone_len
    }
}

fn dialable(key: String) -> CanonicalIdentity {
    CanonicalIdentity {
        display_form: key.clone(),
        key,
        is_opaque: false,
    }
}

fn user_part(raw: &str) -> &str {
    let raw = raw.trim();
    let user = raw.split_once('@').map_or(raw, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon() -> Canonicalizer {
        Canonicalizer::default()
    }

    #[test]
    fn phone_and_linked_forms_share_a_key() {
        let c = canon();
        let phone = c.canonicalize("201001234567@s.whatsapp.net");
        let linked = c.canonicalize("201001234567@lid");
        assert_eq!(phone.key, "01001234567");
        assert_eq!(linked.key, "01001234567");
        assert!(!phone.is_opaque);
        assert!(c.is_dialable(Platform::WhatsApp, "201001234567@s.whatsapp.net"));
        assert!(!c.is_dialable(Platform::WhatsApp, "201001234567@lid"));
        assert!(!c.is_dialable(Platform::WhatsApp, "201001234567@g.us"));
        assert!(c.is_dialable(Platform::WhatsApp, "201001234567"));
    }

    #[test]
    fn national_and_subscriber_spellings_normalize() {
        let c = canon();
        assert_eq!(c.canonicalize("01001234567").key, "01001234567");
        assert_eq!(c.canonicalize("+20 100 123 4567").key, "01001234567");
        assert_eq!(c.canonicalize("1001234567").key, "01001234567");
        assert_eq!(c.canonicalize("201001234567:7@s.whatsapp.net").key, "01001234567");
    }

    #[test]
    fn international_form_at_either_edge_is_recovered() {
        let c = canon();
        assert_eq!(c.canonicalize("2010012345679").key, "01001234567");
        assert_eq!(c.canonicalize("9201001234567").key, "01001234567");
    }

    #[test]
    fn long_ids_are_scanned_for_embedded_numbers() {
        let c = canon();
        let id = c.canonicalize("9999201551234567000@lid");
        assert_eq!(id.key, "01551234567");
        assert!(!id.is_opaque);
    }

    #[test]
    fn unrecoverable_long_ids_fall_back_to_suffix() {
        let c = Canonicalizer::new(NumberPlan::new("20", "0", r"1[0125]\d{8}", 10).unwrap(), 15, 12);
        let id = c.canonicalize("98765432109876543@lid");
        assert!(id.is_opaque);
        assert_eq!(id.key, "432109876543");
        assert_eq!(id.display_form, "98765432109876543");
    }

    #[test]
    fn seventeen_digit_opaque_id_is_noise() {
        let c = canon();
        let id = c.canonicalize("98765432109876543@lid");
        assert!(id.is_opaque);
        assert_eq!(id.key, "98765432109876543");
        assert!(c.is_noise(&id.key, id.is_opaque));
    }

    #[test]
    fn foreign_numbers_are_kept_verbatim() {
        let c = canon();
        let id = c.canonicalize("14155552671@s.whatsapp.net");
        assert_eq!(id.key, "14155552671");
        assert!(!id.is_opaque);
    }

    #[test]
    fn digitless_ids_key_on_user_part() {
        let c = canon();
        let id = c.canonicalize("  Support-Bot@lid ");
        assert_eq!(id.key, "support-bot");
        assert!(id.is_opaque);
        assert!(!c.is_noise(&id.key, id.is_opaque));
    }

    #[test]
    fn livechat_ids_are_not_phone_parsed() {
        let c = canon();
        let id = c.canonicalize_for(Platform::LiveChat, "Visitor-201001234567");
        assert_eq!(id.key, "visitor-201001234567");
        assert!(!c.is_dialable(Platform::LiveChat, "Visitor-201001234567"));
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let c = canon();
        for raw in [
            "201001234567@s.whatsapp.net",
            "201001234567@lid",
            "01001234567",
            "2010012345679",
            "9999201551234567000@lid",
            "98765432109876543@lid",
            "123456789012345678901234@lid",
            "14155552671",
            "Support-Bot@lid",
            "42",
        ] {
            let once = c.canonicalize(raw);
            let twice = c.canonicalize(&once.display_form);
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn remote_form_restores_international_digits() {
        let c = canon();
        assert_eq!(c.remote_form(Platform::WhatsApp, "01001234567"), "201001234567");
        assert_eq!(c.remote_form(Platform::WhatsApp, "14155552671"), "14155552671");
        assert_eq!(c.remote_form(Platform::LiveChat, "visitor-9"), "visitor-9");
    }
}
