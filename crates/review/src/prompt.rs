//! Reviewer prompt

/// Build the review prompt for `code` written in `language`.
///
/// The model is told to answer with bare JSON matching `ReviewResult`; the
/// parser still copes when it wraps the answer in a code fence anyway.
pub fn build_prompt(language: &str, code: &str) -> String {
    format!(
        r#"You are an expert code reviewer. Analyze the following {language} code and provide a comprehensive review.

CODE:
```{language}
{code}
```

IMPORTANT: Respond with ONLY valid JSON. No markdown code blocks, no extra text. The improvedCode field should contain the raw code as a string (escape newlines as \n, escape quotes as \").

{{
  "summary": "Brief overall assessment (2-3 sentences)",
  "score": <number 1-10>,
  "bugs": [{{"line": "N/A or number", "severity": "critical|high|medium|low", "description": "...", "fix": "..."}}],
  "optimizations": [{{"type": "performance|readability|maintainability|best-practice", "description": "...", "suggestion": "..."}}],
  "security": [{{"severity": "critical|high|medium|low", "vulnerability": "...", "description": "...", "fix": "..."}}],
  "improvedCode": "improved code as escaped string with \n for newlines",
  "positives": ["good thing 1", "good thing 2"]
}}"#
    )
}
