use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::stdlib;
use crate::tokenizer::{tokenize, TokenType};

#[derive(Clone)]
pub struct REPLPrompt;

impl Prompt for REPLPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Borrowed("gokid")
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed(">> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed(" .. ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

/// Keeps the editor in multiline mode while brackets are open or a string
/// literal is unterminated.
pub struct REPLValidator;

impl Validator for REPLValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        if line.trim_end().is_empty() {
            return ValidationResult::Complete;
        }

        let mut delimiters = Vec::new();
        let mut in_string = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' => in_string = !in_string,
                _ if in_string => continue,

                '/' if chars.peek() == Some(&'/') => {
                    // Skip the comment up to the end of its line
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }

                '{' | '(' | '[' => delimiters.push(c),
                '}' | ')' | ']' => {
                    let open = match c {
                        '}' => '{',
                        ')' => '(',
                        _ => '[',
                    };
                    // A mismatched closer is a syntax error the parser will report
                    if delimiters.pop() != Some(open) {
                        return ValidationResult::Complete;
                    }
                }

                _ => {}
            }
        }

        if in_string || !delimiters.is_empty() {
            ValidationResult::Incomplete
        } else {
            ValidationResult::Complete
        }
    }
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static BUILTIN_COLOR: Color = Color::Cyan;
pub static ILLEGAL_COLOR: Color = Color::Red;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;

pub struct SyntaxHighlighter;

impl SyntaxHighlighter {
    fn color_of(token_type: TokenType, literal: &str) -> Color {
        match token_type {
            TokenType::Int | TokenType::Float | TokenType::String => LITERAL_COLOR,
            TokenType::Illegal => ILLEGAL_COLOR,
            TokenType::Ident if stdlib::names().any(|name| name == literal) => BUILTIN_COLOR,
            TokenType::Ident | TokenType::Eof => DEFAULT_COLOR,
            t if t.is_keyword() => KEYWORD_COLOR,
            _ => OPERATOR_COLOR,
        }
    }
}

impl Highlighter for SyntaxHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();
        let mut remaining = line;

        for token in tokenize(line) {
            let token_str = match token.token_type {
                TokenType::String => format!("\"{}\"", token.literal),
                _ => token.literal.to_string(),
            };

            if let Some(pos) = remaining.find(&token_str) {
                if pos > 0 {
                    styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining[..pos].to_string()));
                }

                let color = Self::color_of(token.token_type, token.literal);
                styled_text.push((Style::new().fg(color), token_str.clone()));
                remaining = &remaining[pos + token_str.len()..];
            }
        }

        if !remaining.is_empty() {
            styled_text.push((Style::new().fg(DEFAULT_COLOR), remaining.to_string()));
        }

        styled_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_complete(line: &str) -> bool {
        matches!(REPLValidator.validate(line), ValidationResult::Complete)
    }

    #[test]
    fn test_validator_balanced_input() {
        assert!(is_complete(""));
        assert!(is_complete("let x = 5;"));
        assert!(is_complete("let f = fn(a) { [a, (a + 1)] };"));
        assert!(is_complete("let s = \"{ not a brace\";"));
        assert!(is_complete("let x = 1; // trailing { comment"));
    }

    #[test]
    fn test_validator_open_input() {
        assert!(!is_complete("let f = fn(a) {"));
        assert!(!is_complete("let a = [1, 2,"));
        assert!(!is_complete("print(\"unterminated"));
        assert!(!is_complete("if (x) {\n  let y = 1;\n"));
    }

    #[test]
    fn test_validator_mismatched_closer_is_complete() {
        assert!(is_complete("let a = (1]"));
    }

    #[test]
    fn test_highlighter_preserves_text() {
        let line = "let greeting = \"hi\"; // say hello\nprint(greeting, 42 ** 2)";
        let styled = SyntaxHighlighter.highlight(line, 0);
        let rendered: String = styled.buffer.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(rendered, line);
    }

    #[test]
    fn test_highlighter_colors() {
        let styled = SyntaxHighlighter.highlight("let x = len(\"ab\")", 0);
        let colored: Vec<(Option<Color>, &str)> = styled
            .buffer
            .iter()
            .map(|(style, text)| (style.foreground, text.as_str()))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();
        assert_eq!(
            colored,
            vec![
                (Some(KEYWORD_COLOR), "let"),
                (Some(DEFAULT_COLOR), "x"),
                (Some(OPERATOR_COLOR), "="),
                (Some(BUILTIN_COLOR), "len"),
                (Some(OPERATOR_COLOR), "("),
                (Some(LITERAL_COLOR), "\"ab\""),
                (Some(OPERATOR_COLOR), ")"),
            ]
        );
    }
}
