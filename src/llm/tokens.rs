use tracing::warn;

use crate::config::LlmProvider;
use crate::error::{CoreError, Result};

/// Limit applied when the model is not in the table.
pub const FALLBACK_TOKEN_LIMIT: usize = 100_000;

/// Maximum prompt size accepted by a model, by model name. Most-specific
/// prefix wins.
pub fn model_token_limit(model: &str) -> usize {
    const LIMITS: &[(&str, usize)] = &[
        ("gemini-1.5-pro", 2_097_152),
        ("gemini-1.5", 1_048_576),
        ("gemini-pro", 32_760),
        ("gpt-4o-mini", 128_000),
        ("gpt-4o", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4", 8_192),
        ("gpt-3.5-turbo", 16_385),
        ("claude-3", 200_000),
    ];

    LIMITS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, limit)| *limit)
        .unwrap_or(FALLBACK_TOKEN_LIMIT)
}

/// Counts prompt tokens: provider-native counting where available (tiktoken
/// for the OpenAI family), otherwise a character-per-token approximation of
/// `ceil(len / 4)`.
pub fn count_tokens(provider: LlmProvider, model: &str, prompt: &str) -> usize {
    match provider {
        LlmProvider::OpenAi => tiktoken_rs::get_bpe_from_model(model)
            .map(|bpe| bpe.encode_with_special_tokens(prompt).len())
            .unwrap_or_else(|_| approximate_tokens(prompt)),
        LlmProvider::Gemini | LlmProvider::Anthropic => approximate_tokens(prompt),
    }
}

fn approximate_tokens(prompt: &str) -> usize {
    prompt.len().div_ceil(4)
}

/// Pre-flight prompt-size check. Fails `PromptTooLarge` before any upstream
/// request is issued; warns when the prompt crosses 80% of the limit.
pub fn validate_prompt_size(provider: LlmProvider, model: &str, prompt: &str) -> Result<usize> {
    let tokens = count_tokens(provider, model, prompt);
    let limit = model_token_limit(model);

    if tokens > limit {
        return Err(CoreError::PromptTooLarge {
            tokens,
            model: model.to_string(),
            limit,
        });
    }
    if tokens * 5 > limit * 4 {
        warn!(tokens, limit, model, "prompt exceeds 80% of the model's token limit");
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_resolve_most_specific_first() {
        assert_eq!(model_token_limit("gemini-1.5-pro"), 2_097_152);
        assert_eq!(model_token_limit("gemini-1.5-flash"), 1_048_576);
        assert_eq!(model_token_limit("gemini-pro"), 32_760);
        assert_eq!(model_token_limit("gpt-4o-mini"), 128_000);
        assert_eq!(model_token_limit("gpt-4o"), 128_000);
        assert_eq!(model_token_limit("gpt-4"), 8_192);
        assert_eq!(model_token_limit("gpt-3.5-turbo"), 16_385);
        assert_eq!(model_token_limit("claude-3-5-sonnet-20240620"), 200_000);
        assert_eq!(model_token_limit("mystery-model"), FALLBACK_TOKEN_LIMIT);
    }

    #[test]
    fn approximation_rounds_up() {
        assert_eq!(
            count_tokens(LlmProvider::Gemini, "gemini-pro", "abcde"),
            2
        );
        assert_eq!(count_tokens(LlmProvider::Gemini, "gemini-pro", ""), 0);
    }

    #[test]
    fn oversized_prompt_rejected_with_exact_message() {
        let prompt = "a".repeat(135_000);

        let err =
            validate_prompt_size(LlmProvider::Gemini, "gemini-pro", &prompt).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Prompt too large: 33750 tokens exceeds gemini-pro limit of 32760 tokens"
        );
    }

    #[test]
    fn prompt_within_limit_passes() {
        let prompt = "a".repeat(1000);

        let tokens =
            validate_prompt_size(LlmProvider::Gemini, "gemini-pro", &prompt).unwrap();
        assert_eq!(tokens, 250);
    }
}
