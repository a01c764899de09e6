//! Supported languages and tree-sitter grammar registry.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported source language. Every language gets its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
}

impl Lang {
    pub const ALL: [Lang; 5] = [
        Lang::Rust,
        Lang::Python,
        Lang::JavaScript,
        Lang::TypeScript,
        Lang::Go,
    ];

    /// Identifier used in collection names, payloads and state file names.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// Tree-sitter grammar for this language. `.tsx` files need [`Lang::grammar_for`].
    #[must_use]
    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Grammar for a concrete file, picking the TSX dialect by extension.
    #[must_use]
    pub fn grammar_for(self, path: &Path) -> tree_sitter::Language {
        if self == Self::TypeScript && path.extension().is_some_and(|e| e == "tsx") {
            return tree_sitter_typescript::LANGUAGE_TSX.into();
        }
        self.grammar()
    }

    /// Node kinds holding comments that can serve as doc text.
    #[must_use]
    pub fn comment_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["line_comment", "block_comment"],
            Self::Python | Self::JavaScript | Self::TypeScript | Self::Go => &["comment"],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rust" | "rs" => Ok(Self::Rust),
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "go" | "golang" => Ok(Self::Go),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Documentation files are indexed into every language collection of the workspace.
#[must_use]
pub fn is_documentation(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "md")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_py_variants() {
        assert_eq!(detect_language(Path::new("script.py")), Some(Lang::Python));
        assert_eq!(detect_language(Path::new("stubs.pyi")), Some(Lang::Python));
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::JavaScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "tsx", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::TypeScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn markdown_is_documentation() {
        assert!(is_documentation(Path::new("docs/guide.md")));
        assert!(!is_documentation(Path::new("src/lib.rs")));
    }

    #[test]
    fn parse_round_trips_ids() {
        for lang in Lang::ALL {
            assert_eq!(lang.id().parse::<Lang>().unwrap(), lang);
        }
        assert_eq!("golang".parse::<Lang>().unwrap(), Lang::Go);
        assert!("cobol".parse::<Lang>().is_err());
    }

    #[test]
    fn every_grammar_parses_trivial_source() {
        let samples = [
            (Lang::Rust, "fn main() {}"),
            (Lang::Python, "def main():\n    pass\n"),
            (Lang::JavaScript, "function main() {}"),
            (Lang::TypeScript, "function main(): void {}"),
            (Lang::Go, "package main\nfunc main() {}\n"),
        ];
        for (lang, src) in samples {
            let mut parser = tree_sitter::Parser::new();
            parser.set_language(&lang.grammar()).unwrap();
            let tree = parser.parse(src, None).unwrap();
            assert!(!tree.root_node().has_error(), "{lang} failed to parse");
        }
    }

    #[test]
    fn tsx_uses_tsx_grammar() {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&Lang::TypeScript.grammar_for(Path::new("App.tsx")))
            .unwrap();
        let tree = parser
            .parse("const App = () => <div>hi</div>;", None)
            .unwrap();
        assert!(!tree.root_node().has_error());
    }
}
