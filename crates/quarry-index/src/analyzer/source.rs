//! Entity extraction from source files via tree-sitter.

use std::path::Path;

use tree_sitter::{Node, Parser};

use super::{ChunkSource, SemanticChunk};
use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// How a node participates in chunking.
#[derive(Debug, Clone, Copy)]
enum Role {
    /// A chunk of its own with the given kind.
    Entity(&'static str),
    /// A chunk whose `body` holds nested entities.
    Container(&'static str),
    /// No chunk; nested entities in `body` get this node's scope name.
    Scope,
    /// Export or decorator around the real definition in the named field.
    Wrapper(&'static str),
}

fn classify(lang: Lang, kind: &str) -> Option<Role> {
    let role = match (lang, kind) {
        (Lang::Rust, "function_item" | "function_signature_item") => Role::Entity("function"),
        (Lang::Rust, "struct_item") => Role::Entity("struct"),
        (Lang::Rust, "enum_item") => Role::Entity("enum"),
        (Lang::Rust, "union_item") => Role::Entity("union"),
        (Lang::Rust, "type_item") => Role::Entity("type"),
        (Lang::Rust, "const_item") => Role::Entity("const"),
        (Lang::Rust, "static_item") => Role::Entity("static"),
        (Lang::Rust, "macro_definition") => Role::Entity("macro"),
        (Lang::Rust, "trait_item") => Role::Container("trait"),
        (Lang::Rust, "impl_item" | "mod_item") => Role::Scope,

        (Lang::Python, "function_definition") => Role::Entity("function"),
        (Lang::Python, "class_definition") => Role::Container("class"),
        (Lang::Python, "decorated_definition") => Role::Wrapper("definition"),

        (
            Lang::JavaScript | Lang::TypeScript,
            "function_declaration" | "generator_function_declaration" | "lexical_declaration",
        ) => Role::Entity("function"),
        (Lang::JavaScript | Lang::TypeScript, "method_definition") => Role::Entity("method"),
        (Lang::JavaScript | Lang::TypeScript, "class_declaration")
        | (Lang::TypeScript, "abstract_class_declaration") => Role::Container("class"),
        (Lang::JavaScript | Lang::TypeScript, "export_statement") => Role::Wrapper("declaration"),
        (Lang::TypeScript, "interface_declaration") => Role::Entity("interface"),
        (Lang::TypeScript, "type_alias_declaration") => Role::Entity("type"),
        (Lang::TypeScript, "enum_declaration") => Role::Entity("enum"),

        (Lang::Go, "function_declaration") => Role::Entity("function"),
        (Lang::Go, "method_declaration") => Role::Entity("method"),
        (Lang::Go, "type_declaration") => Role::Entity("type"),
        _ => return None,
    };
    Some(role)
}

struct Ctx<'a> {
    source: &'a str,
    lang: Lang,
    file_path: &'a str,
    package: String,
}

impl Ctx<'_> {
    fn text(&self, node: Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }
}

/// Parse `source` and split it into entity chunks.
///
/// A file without recognizable entities yields one file-level chunk unless blank.
pub(crate) fn extract_entities(lang: Lang, path: &Path, source: &str) -> Result<Vec<SemanticChunk>> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar_for(path))
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {}", path.display())))?;
    let root = tree.root_node();

    let file_path = path.to_string_lossy();
    let ctx = Ctx {
        source,
        lang,
        file_path: &file_path,
        package: package_name(lang, path, source, root),
    };

    let mut chunks = Vec::new();
    collect(&ctx, root, None, &mut chunks);

    if chunks.is_empty() && !source.trim().is_empty() {
        let name = path
            .file_stem()
            .map_or_else(|| "file".to_string(), |s| s.to_string_lossy().into_owned());
        chunks.push(SemanticChunk {
            file_path: ctx.file_path.to_string(),
            start_line: 1,
            end_line: source.lines().count().max(1),
            name,
            kind: "file".into(),
            signature: String::new(),
            docstring: String::new(),
            code: source.to_string(),
            package: ctx.package.clone(),
            parent: None,
            language: lang,
            source: ChunkSource::Code,
        });
    }
    Ok(chunks)
}

fn named_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.named_child(i))
}

fn collect(ctx: &Ctx<'_>, parent: Node<'_>, scope: Option<&str>, out: &mut Vec<SemanticChunk>) {
    for child in named_children(parent) {
        visit(ctx, child, child, scope, out);
    }
}

/// `span` is the outermost node (export or decorator included); `node` is the definition.
fn visit(
    ctx: &Ctx<'_>,
    span: Node<'_>,
    node: Node<'_>,
    scope: Option<&str>,
    out: &mut Vec<SemanticChunk>,
) {
    let Some(role) = classify(ctx.lang, node.kind()) else {
        return;
    };
    match role {
        Role::Wrapper(field) => {
            if let Some(inner) = node.child_by_field_name(field) {
                visit(ctx, span, inner, scope, out);
            }
        }
        Role::Scope => {
            let name = scope_name(ctx, node);
            if let Some(body) = node.child_by_field_name("body") {
                collect(ctx, body, name.as_deref().or(scope), out);
            }
        }
        Role::Entity(kind) => {
            if let Some(chunk) = entity_chunk(ctx, span, node, kind, scope) {
                out.push(chunk);
            }
        }
        Role::Container(kind) => {
            let Some(mut chunk) = entity_chunk(ctx, span, node, kind, scope) else {
                return;
            };
            let mut members = Vec::new();
            if let Some(body) = node.child_by_field_name("body") {
                collect(ctx, body, Some(&chunk.name), &mut members);
            }
            if !members.is_empty() {
                chunk.code.clone_from(&chunk.signature);
            }
            out.push(chunk);
            out.append(&mut members);
        }
    }
}

fn entity_chunk(
    ctx: &Ctx<'_>,
    span: Node<'_>,
    node: Node<'_>,
    kind: &'static str,
    scope: Option<&str>,
) -> Option<SemanticChunk> {
    let (name, kind) = match (ctx.lang, node.kind()) {
        (Lang::JavaScript | Lang::TypeScript, "lexical_declaration") => {
            (function_binding_name(ctx, node)?, kind)
        }
        (Lang::Go, "type_declaration") => go_type_spec(ctx, node)?,
        _ => (
            node.child_by_field_name("name")
                .map(|n| ctx.text(n).to_string())?,
            kind,
        ),
    };
    let kind = if kind == "function" && scope.is_some() {
        "method"
    } else {
        kind
    };
    let parent = match (ctx.lang, node.kind()) {
        (Lang::Go, "method_declaration") => go_receiver_type(ctx, node),
        _ => scope.map(ToString::to_string),
    };

    Some(SemanticChunk {
        file_path: ctx.file_path.to_string(),
        start_line: span.start_position().row + 1,
        end_line: span.end_position().row + 1,
        name,
        kind: kind.to_string(),
        signature: signature(ctx, node),
        docstring: docstring(ctx, span, node),
        code: ctx.text(span).to_string(),
        package: ctx.package.clone(),
        parent,
        language: ctx.lang,
        source: ChunkSource::Code,
    })
}

/// Declaration header up to the body, whitespace-collapsed.
fn signature(ctx: &Ctx<'_>, node: Node<'_>) -> String {
    let text = ctx.text(node);
    let header = match node.child_by_field_name("body") {
        Some(body) if body.start_byte() > node.start_byte() => {
            &ctx.source[node.start_byte()..body.start_byte()]
        }
        _ => text.lines().next().unwrap_or_default(),
    };
    let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches('{')
        .trim_end_matches(':')
        .trim_end()
        .to_string()
}

fn docstring(ctx: &Ctx<'_>, span: Node<'_>, node: Node<'_>) -> String {
    if ctx.lang == Lang::Python
        && let Some(doc) = python_docstring(ctx, node)
    {
        return doc;
    }
    leading_comments(ctx, span)
}

/// Contiguous comments directly above `span`, skipping Rust attributes.
fn leading_comments(ctx: &Ctx<'_>, span: Node<'_>) -> String {
    let comment_kinds = ctx.lang.comment_kinds();
    let mut lines: Vec<String> = Vec::new();
    let mut row = span.start_position().row;
    let mut prev = span.prev_named_sibling();

    while let Some(node) = prev {
        if node.kind() == "attribute_item" {
            row = node.start_position().row;
        } else if comment_kinds.contains(&node.kind()) && node.end_position().row + 1 >= row {
            let text = ctx.text(node);
            if ctx.lang == Lang::Rust && text.starts_with("//!") {
                break;
            }
            lines.push(clean_comment(text));
            row = node.start_position().row;
        } else {
            break;
        }
        prev = node.prev_named_sibling();
    }

    lines.reverse();
    lines.join("\n").trim().to_string()
}

fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = line
                .strip_prefix("///")
                .or_else(|| line.strip_prefix("//"))
                .or_else(|| line.strip_prefix("/**"))
                .or_else(|| line.strip_prefix("/*"))
                .or_else(|| line.strip_prefix('#'))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line).trim();
            line.strip_prefix('*').unwrap_or(line).trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn python_docstring(ctx: &Ctx<'_>, node: Node<'_>) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = ctx.text(string);
    let raw = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let doc = raw
        .trim_start_matches("\"\"\"")
        .trim_start_matches("'''")
        .trim_end_matches("\"\"\"")
        .trim_end_matches("'''")
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    Some(doc.to_string())
}

fn scope_name(ctx: &Ctx<'_>, node: Node<'_>) -> Option<String> {
    let target = node
        .child_by_field_name("type")
        .or_else(|| node.child_by_field_name("name"))?;
    let text = ctx.text(target);
    Some(text.split('<').next().unwrap_or(text).trim().to_string())
}

/// `const handler = () => {}` and friends. Plain value bindings are not entities.
fn function_binding_name(ctx: &Ctx<'_>, node: Node<'_>) -> Option<String> {
    named_children(node)
        .filter(|d| d.kind() == "variable_declarator")
        .find(|d| {
            d.child_by_field_name("value").is_some_and(|v| {
                matches!(
                    v.kind(),
                    "arrow_function" | "function_expression" | "function" | "generator_function"
                )
            })
        })
        .and_then(|d| d.child_by_field_name("name"))
        .map(|n| ctx.text(n).to_string())
}

fn go_type_spec(ctx: &Ctx<'_>, node: Node<'_>) -> Option<(String, &'static str)> {
    let spec = named_children(node).find(|c| matches!(c.kind(), "type_spec" | "type_alias"))?;
    let name = ctx.text(spec.child_by_field_name("name")?).to_string();
    let kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
        Some("struct_type") => "struct",
        Some("interface_type") => "interface",
        _ => "type",
    };
    Some((name, kind))
}

fn go_receiver_type(ctx: &Ctx<'_>, node: Node<'_>) -> Option<String> {
    let receiver = ctx.text(node.child_by_field_name("receiver")?);
    let inner = receiver.trim_matches(|c| c == '(' || c == ')');
    let ty = inner.split_whitespace().last()?.trim_start_matches('*');
    Some(ty.split('[').next().unwrap_or(ty).to_string())
}

fn package_name(lang: Lang, path: &Path, source: &str, root: Node<'_>) -> String {
    match lang {
        Lang::Go => named_children(root)
            .find(|c| c.kind() == "package_clause")
            .and_then(|c| c.named_child(0))
            .map(|n| source[n.byte_range()].to_string())
            .unwrap_or_default(),
        Lang::Rust => rust_module_path(path),
        Lang::Python => python_module_path(path),
        Lang::JavaScript | Lang::TypeScript => file_stem(path),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `crate::a::b` for `.../src/a/b.rs`; `lib.rs`, `main.rs` and `mod.rs` name their directory.
fn rust_module_path(path: &Path) -> String {
    let components: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let Some(src) = components.iter().rposition(|c| c == "src") else {
        return file_stem(path);
    };
    let mut parts: Vec<String> = components[src + 1..].to_vec();
    if let Some(last) = parts.pop() {
        let stem = last.strip_suffix(".rs").unwrap_or(&last).to_string();
        if !matches!(stem.as_str(), "lib" | "main" | "mod") {
            parts.push(stem);
        }
    }
    std::iter::once("crate".to_string())
        .chain(parts)
        .collect::<Vec<_>>()
        .join("::")
}

/// Dotted path through every enclosing directory that has an `__init__.py`.
fn python_module_path(path: &Path) -> String {
    let mut parts = Vec::new();
    let stem = file_stem(path);
    if stem != "__init__" {
        parts.push(stem);
    }
    let mut dir = path.parent();
    while let Some(d) = dir {
        if !d.join("__init__.py").exists() {
            break;
        }
        if let Some(name) = d.file_name() {
            parts.push(name.to_string_lossy().into_owned());
        }
        dir = d.parent();
    }
    parts.reverse();
    parts.join(".")
}
