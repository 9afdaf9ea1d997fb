//! Rule-based reply policy.
//!
//! Keyword rules checked in order; the first match wins. Single keywords must
//! match a whole word ("hi" does not fire on "this"), prefixes match the start
//! of a word ("thank" fires on "thanked") and phrases match anywhere.

use crate::services::ResponsePolicy;
use chrono::Local;

const EMPTY_REPLY: &str = "I didn't catch that. Could you repeat?";

enum Reply {
    Fixed(&'static str),
    CurrentTime,
    CurrentDate,
}

struct Rule {
    words: &'static [&'static str],
    prefixes: &'static [&'static str],
    phrases: &'static [&'static str],
    reply: Reply,
}

const RULES: &[Rule] = &[
    Rule {
        words: &["hello", "hi", "hey"],
        prefixes: &[],
        phrases: &[],
        reply: Reply::Fixed("Hello! How can I help you today?"),
    },
    Rule {
        words: &["time"],
        prefixes: &[],
        phrases: &[],
        reply: Reply::CurrentTime,
    },
    Rule {
        words: &["date", "today"],
        prefixes: &[],
        phrases: &[],
        reply: Reply::CurrentDate,
    },
    Rule {
        words: &["weather"],
        prefixes: &[],
        phrases: &[],
        reply: Reply::Fixed("I don't have access to weather data yet, but I can hear you clearly!"),
    },
    Rule {
        words: &[],
        prefixes: &[],
        phrases: &["your name", "who are you"],
        reply: Reply::Fixed("I'm a voice assistant built from scratch using WebSockets!"),
    },
    Rule {
        words: &["help"],
        prefixes: &[],
        phrases: &[],
        reply: Reply::Fixed(
            "I can respond to greetings, tell you the time and date, or just repeat what you say!",
        ),
    },
    Rule {
        words: &[],
        prefixes: &["thank"],
        phrases: &[],
        reply: Reply::Fixed("You're welcome!"),
    },
    Rule {
        words: &["bye", "goodbye"],
        prefixes: &[],
        phrases: &["see you"],
        reply: Reply::Fixed("Goodbye! Have a great day!"),
    },
];

#[derive(Debug, Clone, Default)]
pub struct RuleBasedPolicy;

impl RuleBasedPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl ResponsePolicy for RuleBasedPolicy {
    fn respond(&self, user_text: &str) -> String {
        let trimmed = user_text.trim();
        if trimmed.is_empty() {
            return EMPTY_REPLY.to_string();
        }

        let lower = trimmed.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        let matched = RULES.iter().find(|rule| {
            rule.words.iter().any(|w| words.contains(w))
                || rule.prefixes.iter().any(|p| words.iter().any(|w| w.starts_with(*p)))
                || rule.phrases.iter().any(|p| lower.contains(p))
        });

        match matched.map(|rule| &rule.reply) {
            Some(Reply::Fixed(text)) => text.to_string(),
            Some(Reply::CurrentTime) => {
                format!("The current time is {}.", Local::now().format("%I:%M %p"))
            }
            Some(Reply::CurrentDate) => {
                format!("Today is {}.", Local::now().format("%B %d, %Y"))
            }
            None => format!("You said: {}", trimmed),
        }
    }
}
