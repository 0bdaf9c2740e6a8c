//! Chat prompt construction for short spoken answers.
//!
//! The reply is spoken aloud and shown in a small caption, so the system
//! message always carries a hard length rule derived from the answer clamp.

// ---------------------------------------------------------------------------
// Fixed rules
// ---------------------------------------------------------------------------

const SPOKEN_RULES: &str = "\
Rules:
1. Reply in the language the user spoke.
2. One or two short sentences. No lists, no markdown, no emoji.
3. If the user is only checking that you can hear them, answer brightly and briefly.";

// ---------------------------------------------------------------------------
// PromptBuilder
// ---------------------------------------------------------------------------

/// Builds `(system_msg, user_msg)` pairs for chat-completion APIs.
///
/// ```rust
/// use tap_talk::llm::PromptBuilder;
///
/// let builder = PromptBuilder::new("You are a desk robot.", 120);
/// let (system, user) = builder.build_chat("can you hear me?");
/// assert!(system.starts_with("You are a desk robot."));
/// assert!(system.contains("120"));
/// assert_eq!(user, "can you hear me?");
/// ```
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
    max_answer_bytes: usize,
}

impl PromptBuilder {
    pub fn new(persona: &str, max_answer_bytes: usize) -> Self {
        Self {
            persona: persona.trim().to_string(),
            max_answer_bytes,
        }
    }

    pub fn build_chat(&self, user_text: &str) -> (String, String) {
        let mut system = String::with_capacity(self.persona.len() + SPOKEN_RULES.len() + 64);
        if !self.persona.is_empty() {
            system.push_str(&self.persona);
            system.push_str("\n\n");
        }
        system.push_str(SPOKEN_RULES);
        system.push_str(&format!(
            "\n4. Keep the whole reply under {} bytes.",
            self.max_answer_bytes
        ));

        (system, user_text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_persona_yields_rules_only() {
        let (system, _) = PromptBuilder::new("   ", 80).build_chat("hi");
        assert!(system.starts_with("Rules:"));
        assert!(system.contains("under 80 bytes"));
    }

    #[test]
    fn user_text_is_trimmed() {
        let (_, user) = PromptBuilder::new("p", 80).build_chat("  hello \n");
        assert_eq!(user, "hello");
    }

    #[test]
    fn rules_forbid_lists() {
        let (system, _) = PromptBuilder::new("p", 120).build_chat("x");
        assert!(system.contains("No lists"));
    }
}
