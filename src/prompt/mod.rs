//! Text heuristics for assistant messages.
//!
//! Only the last paragraph of an assistant message is inspected: agents tend
//! to end a turn with the question or request they need answered, and earlier
//! paragraphs routinely quote prior prompts.
//!
//! Both agents ask in conversational prose ("Should I ...", "Let me know
//! ..."), so the solicitation and approval sets are shared. Codex also offers
//! explicit choices ("Reply with ...", "Pick one of ..."), which only its
//! patterns recognize.

use std::sync::LazyLock;

use regex::Regex;

use crate::agent::AgentKind;
use crate::signal::{Confidence, IdleReason};

/// What an assistant message appears to be asking of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextHint {
    pub reason: IdleReason,
    pub confidence: Confidence,
    /// Name of the heuristic that fired.
    pub matched: &'static str,
}

static APPROVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:allow this action|approve|waiting for (?:your )?approval|needs? (?:your )?approval|requires? (?:your )?approval|grant (?:me )?permission|permission to)\b",
    )
    .unwrap()
});

static GRANTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:approved|already approved|permission (?:was )?granted|you(?:'ve| have) (?:approved|allowed)|thanks for approving)\b",
    )
    .unwrap()
});

static SOLICIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:can you|could you|would you|shall i|should i|do you want|would you like|let me know|please confirm)\b",
    )
    .unwrap()
});

static CODEX_CHOICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:reply with|respond with|choose one of|pick one(?: of)?|select one of|which option)\b",
    )
    .unwrap()
});

static PARAGRAPH_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n").unwrap());

/// Compiled solicitation patterns for one agent.
pub struct PromptPatterns {
    /// Agent-specific choice phrasing, checked after the shared set.
    choice: Option<(&'static Regex, &'static str)>,
}

impl PromptPatterns {
    pub fn claude_code() -> Self {
        Self { choice: None }
    }

    pub fn codex_cli() -> Self {
        Self {
            choice: Some((&*CODEX_CHOICE_RE, "codex_choice")),
        }
    }

    pub fn for_agent(agent: AgentKind) -> Self {
        match agent {
            AgentKind::Claude => Self::claude_code(),
            AgentKind::Codex => Self::codex_cli(),
        }
    }

    /// Inspect the last paragraph of `text`. Approval wins over input.
    pub fn detect(&self, text: &str) -> Option<TextHint> {
        let para = last_paragraph(text)?;

        if approval_likely(para) {
            return Some(TextHint {
                reason: IdleReason::WaitingForApproval,
                confidence: Confidence::Medium,
                matched: "approval_request",
            });
        }
        if ends_with_question(para) {
            return Some(TextHint {
                reason: IdleReason::WaitingForInput,
                confidence: Confidence::Medium,
                matched: "trailing_question",
            });
        }
        if SOLICIT_RE.is_match(para) {
            return Some(TextHint {
                reason: IdleReason::WaitingForInput,
                confidence: Confidence::Low,
                matched: "solicitation",
            });
        }
        let (choice, name) = self.choice?;
        choice.is_match(para).then_some(TextHint {
            reason: IdleReason::WaitingForInput,
            confidence: Confidence::Low,
            matched: name,
        })
    }
}

/// Last non-blank paragraph, trimmed.
pub fn last_paragraph(text: &str) -> Option<&str> {
    PARAGRAPH_BREAK_RE
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .last()
}

fn approval_likely(para: &str) -> bool {
    APPROVAL_RE.is_match(para) && !GRANTED_RE.is_match(para)
}

fn ends_with_question(para: &str) -> bool {
    para.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '`' | '"' | ')' | '\''))
        .ends_with('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── paragraph splitting ──

    #[test]
    fn last_paragraph_skips_trailing_blank_lines() {
        let text = "First part.\n\nSecond part\nstill second.\n\n  \n";
        assert_eq!(last_paragraph(text), Some("Second part\nstill second."));
    }

    #[test]
    fn last_paragraph_of_blank_text_is_none() {
        assert_eq!(last_paragraph("  \n\n\t\n"), None);
    }

    // ── input heuristics ──

    #[test]
    fn trailing_question_is_input() {
        let p = PromptPatterns::claude_code();
        let hint = p.detect("Done with the schema.\n\nShould I proceed with the migration?").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForInput);
        assert_eq!(hint.confidence, Confidence::Medium);
    }

    #[test]
    fn question_wrapped_in_markdown_still_counts() {
        let p = PromptPatterns::codex_cli();
        let hint = p.detect("**Want me to keep going?**").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForInput);
    }

    #[test]
    fn question_in_earlier_paragraph_is_ignored() {
        let p = PromptPatterns::claude_code();
        assert!(p.detect("Why did it fail?\n\nThe lockfile was stale. Fixed.").is_none());
    }

    #[test]
    fn solicitation_without_question_mark() {
        let p = PromptPatterns::claude_code();
        let hint = p.detect("Let me know which branch to target.").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForInput);
        assert_eq!(hint.confidence, Confidence::Low);
        assert_eq!(hint.matched, "solicitation");
    }

    #[test]
    fn solicitation_phrases_apply_to_codex() {
        let p = PromptPatterns::codex_cli();
        for text in [
            "Migration written.\n\nWould you like me to run it now.",
            "Let me know which branch to target.",
            "Shall I push the branch",
        ] {
            let hint = p.detect(text).unwrap();
            assert_eq!(hint.reason, IdleReason::WaitingForInput, "{text}");
            assert_eq!(hint.matched, "solicitation", "{text}");
        }
    }

    #[test]
    fn codex_choice_phrase() {
        let p = PromptPatterns::codex_cli();
        let hint = p.detect("Reply with 1 or 2.").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForInput);
        assert_eq!(hint.matched, "codex_choice");
    }

    #[test]
    fn claude_does_not_use_codex_phrases() {
        let p = PromptPatterns::claude_code();
        assert!(p.detect("Reply with 1 or 2.").is_none());
    }

    // ── approval heuristics ──

    #[test]
    fn approval_request_beats_question() {
        let p = PromptPatterns::claude_code();
        let hint = p.detect("I need permission to write to /etc/hosts. Do you approve?").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForApproval);
    }

    #[test]
    fn granted_phrase_suppresses_approval() {
        let p = PromptPatterns::codex_cli();
        assert!(p.detect("Thanks for approving. Permission was granted and the file is written.").is_none());
    }

    #[test]
    fn waiting_for_approval_phrase() {
        let p = PromptPatterns::codex_cli();
        let hint = p.detect("The command is waiting for your approval.").unwrap();
        assert_eq!(hint.reason, IdleReason::WaitingForApproval);
    }

    #[test]
    fn plain_statement_has_no_hint() {
        let p = PromptPatterns::claude_code();
        assert!(p.detect("All 42 tests pass.").is_none());
    }
}
