//! Scrub secret-like tokens from provider error bodies and truncate them before
//! they end up in error messages or logs.

const MAX_API_ERROR_CHARS: usize = 200;
const MAX_RESPONSE_TEXT_CHARS: usize = 2000;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Redact `sk-` style API keys and echoed `Bearer` tokens.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 2] = ["sk-", "Bearer "];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            // A bare prefix is not a token; keep scanning after it.
            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Cut `input` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        None => input.to_string(),
        Some((end, _)) => format!("{}...", &input[..end]),
    }
}

/// Scrub secrets and truncate provider error text.
pub fn sanitize_api_error(input: &str) -> String {
    truncate_chars(&scrub_secret_patterns(input), MAX_API_ERROR_CHARS)
}

/// Scrub secrets from a whole provider response body, keeping far more of it
/// than [`sanitize_api_error`] so long parameter lists survive in logs.
pub fn sanitize_response_text(input: &str) -> String {
    truncate_chars(&scrub_secret_patterns(input), MAX_RESPONSE_TEXT_CHARS)
}
