use serde::{Deserialize, Serialize};

/// Generated content of a single response (or of one stream element).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Struct representing the token usage for a chat call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// The number of input ("prompt") tokens used in a given request.
    pub input_tokens: u64,
    /// The number of output ("completion") tokens used in a given request.
    pub output_tokens: u64,
    /// Always `input_tokens + output_tokens`.
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Combines usage reported in several stream events. Providers report cumulative counts, so
    /// the latest non-zero value of each counter wins.
    pub fn merge(self, latest: Usage) -> Usage {
        let pick = |previous: u64, latest: u64| if latest != 0 { latest } else { previous };
        Usage::new(
            pick(self.input_tokens, latest.input_tokens),
            pick(self.output_tokens, latest.output_tokens),
        )
    }
}

/// Provider metadata attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub id: Option<String>,
    pub model: Option<String>,
    pub finish_reasons: Vec<String>,
    pub usage: Option<Usage>,
}

/// The outcome of a chat call, or one element of a streamed call.
///
/// Stream elements that only carry metadata (for instance the terminal one) have no `result`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub result: Option<Generation>,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    pub fn new(result: Option<Generation>, metadata: ResponseMetadata) -> Self {
        Self { result, metadata }
    }

    /// The generated text, when this response carries any.
    pub fn text(&self) -> Option<&str> {
        self.result.as_ref().map(|generation| generation.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
    }

    #[test]
    fn usage_merge_keeps_latest_non_zero() {
        let start = Usage::new(25, 1);
        let delta = Usage::new(0, 15);
        assert_eq!(start.merge(delta), Usage::new(25, 15));
    }

    #[test]
    fn text_of_metadata_only_response_is_none() {
        assert_eq!(ChatResponse::default().text(), None);
        let response = ChatResponse::new(Some(Generation::new("hi")), Default::default());
        assert_eq!(response.text(), Some("hi"));
    }
}
