//! Suggested learning topics.
//!
//! Before the first message the chat offers a short list of questions a
//! new student is likely to ask. Picking one sends it as if typed.

use serde::Serialize;

/// A suggested question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaqTopic {
    pub id: &'static str,
    pub category: &'static str,
    pub question: &'static str,
    pub keywords: &'static [&'static str],
}

impl FaqTopic {
    /// Number of this topic's keywords found in `text`.
    fn hits(&self, text: &str) -> usize {
        self.keywords.iter().filter(|k| text.contains(*k)).count()
    }
}

const KOREAN_LEARNING: &[FaqTopic] = &[
    FaqTopic {
        id: "grammar-help",
        category: "문법",
        question: "한국어 문법이 어려워요",
        keywords: &["문법", "어려운", "도움"],
    },
    FaqTopic {
        id: "pronunciation",
        category: "발음",
        question: "발음을 연습하고 싶어요",
        keywords: &["발음", "연습", "말하기"],
    },
    FaqTopic {
        id: "daily-conversation",
        category: "회화",
        question: "일상 대화를 배우고 싶어요",
        keywords: &["대화", "일상", "회화"],
    },
    FaqTopic {
        id: "korean-culture",
        category: "문화",
        question: "한국 문화가 궁금해요",
        keywords: &["문화", "한국", "생활"],
    },
];

/// Read-only list of suggested topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaqCatalog {
    topics: &'static [FaqTopic],
}

impl Default for FaqCatalog {
    fn default() -> Self {
        Self::korean_learning()
    }
}

impl FaqCatalog {
    /// The language school's four starter topics.
    #[must_use]
    pub fn korean_learning() -> Self {
        Self {
            topics: KOREAN_LEARNING,
        }
    }

    #[must_use]
    pub fn from_static(topics: &'static [FaqTopic]) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &'static [FaqTopic] {
        self.topics
    }

    pub fn find(&self, id: &str) -> Option<&'static FaqTopic> {
        self.topics.iter().find(|t| t.id == id)
    }

    /// Topics with at least one keyword in `text`, most hits first.
    ///
    /// Ties keep catalog order.
    pub fn matching(&self, text: &str) -> Vec<&'static FaqTopic> {
        let mut scored: Vec<(usize, &'static FaqTopic)> = self
            .topics
            .iter()
            .map(|t| (t.hits(text), t))
            .filter(|(hits, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, t)| t).collect()
    }
}
