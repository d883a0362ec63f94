//! Comment and whitespace stripping for stylesheets and scripts.
//!
//! This is string substitution, not parsing. It sits behind [`Minifier`] so a
//! parser-based implementation can replace it without touching callers.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

pub trait Minifier: Send + Sync {
    fn minify_css(&self, source: &str) -> String;
    fn minify_js(&self, source: &str) -> String;
}

static CSS_COMMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"/\*[^*]*\*+([^/*][^*]*\*+)*/").ok());
static CSS_PUNCTUATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*([{};:,>])\s*").ok());
static JS_LINE_COMMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?m)(^|[^:\\'"])//[^\n]*"#).ok());
static JS_PUNCTUATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*([{}();])\s*").ok());
static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// Replace every match of `pattern`, or leave the input alone if it failed to compile.
fn substitute<'a>(pattern: &LazyLock<Option<Regex>>, input: &'a str, with: &str) -> Cow<'a, str> {
    match pattern.as_ref() {
        Some(regex) => regex.replace_all(input, with),
        None => Cow::Borrowed(input),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegexMinifier;

impl Minifier for RegexMinifier {
    fn minify_css(&self, source: &str) -> String {
        let stripped = substitute(&CSS_COMMENT, source, "");
        let collapsed = substitute(&WHITESPACE, &stripped, " ");
        let tightened = substitute(&CSS_PUNCTUATION, &collapsed, "$1");
        tightened.replace(";}", "}").trim().to_string()
    }

    fn minify_js(&self, source: &str) -> String {
        let stripped = substitute(&CSS_COMMENT, source, "");
        let stripped = substitute(&JS_LINE_COMMENT, &stripped, "$1");
        let collapsed = substitute(&WHITESPACE, &stripped, " ");
        substitute(&JS_PUNCTUATION, &collapsed, "$1")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_loses_comments_and_padding() {
        let source = "/* header */\nbody {\n  color : red ;\n  margin: 0 auto;\n}\n\na > b , i { x: y }\n";
        assert_eq!(
            RegexMinifier.minify_css(source),
            "body{color:red;margin:0 auto}a>b,i{x:y}"
        );
    }

    #[test]
    fn css_keeps_multi_star_comments_balanced() {
        let source = "/*** banner ***/ p { a: b } /* x */";
        assert_eq!(RegexMinifier.minify_css(source), "p{a:b}");
    }

    #[test]
    fn js_strips_comments_but_keeps_urls() {
        let source = "// setup\nvar url = \"https://example.com\"; /* block */\nfunction f ( a ) {\n  return a; // done\n}\n";
        assert_eq!(
            RegexMinifier.minify_js(source),
            "var url = \"https://example.com\";function f(a){return a;}"
        );
    }
}
