//! Classification of user replies during clarification.
//!
//! Both the loop engine and the sub-agent orchestrator need to recognise a
//! user who cannot or will not answer. They share this single classifier so
//! the two call sites never disagree about what counts as a skip.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Replies longer than this are always treated as answers.
pub const MAX_CLASSIFIED_WORDS: usize = 12;

/// What the user meant by a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseIntent {
    /// Carries information to record
    Answer,
    /// "don't know", "skip", "just proceed"...
    Skip,
    /// Wants to throw the session away and start over
    Reset,
}

/// Skip commands only count when they are the whole reply.
static SKIP_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:please\s+|just\s+|let'?s\s+)?(?:skip(?:\s+(?:this|that|it)(?:\s+one)?)?|pass|none|n/a|idk|whatever|proceed|go\s+ahead|move\s+on)(?:\s+please)?[.!]*$",
    )
    .expect("invalid regex")
});

/// Multi-word admissions of not knowing, matched anywhere in a short reply.
static SKIP_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:don'?t\s+know|no\s+idea|not\s+sure|no\s+clue|can'?t\s+say|doesn'?t\s+matter)\b",
    )
    .expect("invalid regex")
});

static RESET_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:please\s+)?(?:let'?s\s+)?(?:reset|start\s+over|restart|start\s+again)(?:\s+please)?[.!]*$",
    )
    .expect("invalid regex")
});

static ACKNOWLEDGEMENT: LazyLock<Regex> = LazyLock::new(|| {
    let ack = r"(?:yes|yep|yeah|yup|ok|okay|sure|correct|right|exactly|perfect|great|confirmed?|lgtm|sounds\s+(?:good|great|right)|looks\s+(?:good|great|right)|that'?s\s+(?:it|right|correct|perfect)|go\s+ahead|do\s+it|ship\s+it|thanks|thank\s+you|please)";
    Regex::new(&format!(r"(?i)^{ack}(?:[\s,.!]+{ack})*[.!]*$")).expect("invalid regex")
});

fn normalize(text: &str) -> String {
    text.trim().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Classify a user reply.
pub fn classify_response(text: &str) -> ResponseIntent {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return ResponseIntent::Skip;
    }
    if normalized.split_whitespace().count() > MAX_CLASSIFIED_WORDS {
        return ResponseIntent::Answer;
    }

    if RESET_COMMAND.is_match(&normalized) {
        ResponseIntent::Reset
    } else if SKIP_COMMAND.is_match(&normalized) || SKIP_PHRASE.is_match(&normalized) {
        ResponseIntent::Skip
    } else {
        ResponseIntent::Answer
    }
}

/// A reply that only confirms what was already said ("yes", "looks good").
pub fn is_acknowledgement(text: &str) -> bool {
    ACKNOWLEDGEMENT.is_match(&normalize(text))
}

/// Shorthand for `classify_response(text) == ResponseIntent::Skip`.
pub fn is_skip(text: &str) -> bool {
    classify_response(text) == ResponseIntent::Skip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_phrases() {
        for reply in [
            "skip",
            "Skip!",
            "I don't know",
            "dont know",
            "I don\u{2019}t know, really",
            "no idea",
            "Not sure.",
            "idk",
            "whatever",
            "it doesn't matter",
            "let's move on",
            "just proceed",
            "go ahead",
            "n/a",
            "None",
            "pass",
        ] {
            assert_eq!(classify_response(reply), ResponseIntent::Skip, "{reply}");
        }
    }

    #[test]
    fn test_reset_phrases() {
        assert_eq!(classify_response("reset"), ResponseIntent::Reset);
        assert_eq!(classify_response("let's start over"), ResponseIntent::Reset);
        assert_eq!(classify_response("Restart please"), ResponseIntent::Reset);
    }

    #[test]
    fn test_reset_word_inside_an_answer() {
        for reply in [
            "The worker must restart itself after a crash",
            "Add a password reset flow",
            "Users can start over from any step",
        ] {
            assert_eq!(classify_response(reply), ResponseIntent::Answer, "{reply}");
        }
    }

    #[test]
    fn test_skip_word_inside_an_answer() {
        for reply in [
            "It must pass a PCI compliance audit",
            "None of the pages need a login",
            "Whatever runs on a Raspberry Pi 4",
            "Skip the onboarding screens for returning users",
            "Proceed to checkout without an account",
        ] {
            assert_eq!(classify_response(reply), ResponseIntent::Answer, "{reply}");
        }
    }

    #[test]
    fn test_acknowledgements() {
        for reply in ["yes", "Looks good!", "go ahead", "yes, thanks", "OK, sounds good."] {
            assert!(is_acknowledgement(reply), "{reply}");
        }
        for reply in ["yes, and it needs dark mode", "Also add rate limiting", ""] {
            assert!(!is_acknowledgement(reply), "{reply}");
        }
    }

    #[test]
    fn test_answers_are_answers() {
        for reply in [
            "A mobile app for tracking my running workouts",
            "It should run on iOS and Android",
            "I need a password manager",
            "Compassionate tone for the copy",
        ] {
            assert_eq!(classify_response(reply), ResponseIntent::Answer, "{reply}");
        }
    }

    #[test]
    fn test_long_reply_containing_phrase_is_an_answer() {
        let reply = "I'm not sure about the platform yet but it must sync data between my laptop and phone";
        assert_eq!(classify_response(reply), ResponseIntent::Answer);
    }

    #[test]
    fn test_empty_reply_is_a_skip() {
        assert!(is_skip("   "));
    }
}
