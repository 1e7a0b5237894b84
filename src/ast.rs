//! Declarative per-language profiles used by the chunker (C1) to find
//! chunk-worthy node boundaries. Grounded on the tree-sitter query
//! machinery this codebase already used for symbol inspection, narrowed to
//! just the boundary-finding half (no skeleton/body-pruning).

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

/// One AST-located definition: a byte span plus the chunk type and name
/// the chunker should tag it with.
#[derive(Debug, Clone)]
pub struct AstSpan {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_type: &'static str,
    pub name: Option<String>,
}

pub trait LanguageDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn extensions(&self) -> &'static [&'static str];
    fn language(&self) -> Language;
    fn spans(&self, source: &[u8], root: Node) -> Vec<AstSpan>;
}

fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Run a query capturing a `@def` node (the chunk span) and an optional
/// `@name` node, tagging every match with `chunk_type`.
fn run_def_query(source: &[u8], root: Node, language: &Language, query_src: &str, chunk_type: &'static str) -> Vec<AstSpan> {
    let Ok(query) = Query::new(language, query_src) else {
        return vec![];
    };
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();

    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut def_node: Option<Node> = None;
        let mut name_node: Option<Node> = None;
        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "def" => def_node = Some(cap.node),
                "name" => name_node = Some(cap.node),
                _ => {}
            }
        }
        let Some(def) = def_node else { continue };
        out.push(AstSpan {
            start_byte: def.start_byte(),
            end_byte: def.end_byte(),
            start_line: def.start_position().row as u32 + 1,
            end_line: def.end_position().row as u32 + 1,
            chunk_type,
            name: name_node.map(|n| node_text(source, n).trim().to_string()).filter(|s| !s.is_empty()),
        });
    }
    out
}

struct RustDriver;
impl LanguageDriver for RustDriver {
    fn name(&self) -> &'static str {
        "rust"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }
    fn language(&self) -> Language {
        tree_sitter_rust::language()
    }
    fn spans(&self, source: &[u8], root: Node) -> Vec<AstSpan> {
        let lang = self.language();
        let mut out = Vec::new();
        out.extend(run_def_query(source, root, &lang, r#"(function_item name: (identifier) @name) @def"#, "function"));
        out.extend(run_def_query(source, root, &lang, r#"(struct_item name: (type_identifier) @name) @def"#, "class"));
        out.extend(run_def_query(source, root, &lang, r#"(enum_item name: (type_identifier) @name) @def"#, "enum"));
        out.extend(run_def_query(source, root, &lang, r#"(trait_item name: (type_identifier) @name) @def"#, "interface"));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(impl_item (function_item name: (identifier) @name) @def)"#,
            "method",
        ));
        out.extend(run_def_query(source, root, &lang, r#"(mod_item name: (identifier) @name) @def"#, "module"));
        out.extend(run_def_query(source, root, &lang, r#"(use_declaration) @def"#, "import"));
        out
    }
}

struct TypeScriptDriver;
impl LanguageDriver for TypeScriptDriver {
    fn name(&self) -> &'static str {
        "typescript"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx", "mjs", "cjs"]
    }
    fn language(&self) -> Language {
        tree_sitter_typescript::language_typescript()
    }
    fn spans(&self, source: &[u8], root: Node) -> Vec<AstSpan> {
        let lang = self.language();
        let mut out = Vec::new();
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(function_declaration name: (identifier) @name) @def"#,
            "function",
        ));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def"#,
            "function",
        ));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(class_declaration name: (type_identifier) @name) @def"#,
            "class",
        ));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(interface_declaration name: (type_identifier) @name) @def"#,
            "interface",
        ));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(method_definition name: (property_identifier) @name) @def"#,
            "method",
        ));
        out.extend(run_def_query(source, root, &lang, r#"(import_statement) @def"#, "import"));
        out
    }
}

struct TsxDriver(TypeScriptDriver);
impl LanguageDriver for TsxDriver {
    fn name(&self) -> &'static str {
        "tsx"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }
    fn language(&self) -> Language {
        tree_sitter_typescript::language_tsx()
    }
    fn spans(&self, source: &[u8], root: Node) -> Vec<AstSpan> {
        self.0.spans(source, root)
    }
}

struct PythonDriver;
impl LanguageDriver for PythonDriver {
    fn name(&self) -> &'static str {
        "python"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }
    fn language(&self) -> Language {
        tree_sitter_python::language()
    }
    fn spans(&self, source: &[u8], root: Node) -> Vec<AstSpan> {
        let lang = self.language();
        let mut out = Vec::new();
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(function_definition name: (identifier) @name) @def"#,
            "function",
        ));
        out.extend(run_def_query(
            source,
            root,
            &lang,
            r#"(class_definition name: (identifier) @name) @def"#,
            "class",
        ));
        out.extend(run_def_query(source, root, &lang, r#"(import_statement) @def"#, "import"));
        out.extend(run_def_query(source, root, &lang, r#"(import_from_statement) @def"#, "import"));
        out
    }
}

pub struct LanguageRegistry {
    drivers: Vec<Box<dyn LanguageDriver>>,
    by_ext: HashMap<&'static str, usize>,
}

impl LanguageRegistry {
    pub fn driver_for_path(&self, path: &Path) -> Option<&dyn LanguageDriver> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        if ext == "tsx" {
            return self.drivers.iter().find(|d| d.name() == "tsx").map(|d| d.as_ref());
        }
        self.by_ext.get(ext.as_str()).and_then(|&i| self.drivers.get(i)).map(|d| d.as_ref())
    }
}

pub fn language_registry() -> &'static LanguageRegistry {
    static REG: OnceLock<LanguageRegistry> = OnceLock::new();
    REG.get_or_init(|| {
        let drivers: Vec<Box<dyn LanguageDriver>> = vec![
            Box::new(RustDriver),
            Box::new(TypeScriptDriver),
            Box::new(TsxDriver(TypeScriptDriver)),
            Box::new(PythonDriver),
        ];
        let mut by_ext = HashMap::new();
        for (idx, d) in drivers.iter().enumerate() {
            for ext in d.extensions() {
                by_ext.insert(*ext, idx);
            }
        }
        LanguageRegistry { drivers, by_ext }
    })
}

/// Parse `source` for `path`'s language and return AST-located chunk spans,
/// sorted by start byte. Returns an empty vec for unsupported extensions or
/// on any parse failure — callers fall back to generic line-window chunking.
pub fn extract_spans(path: &Path, source: &str) -> Vec<AstSpan> {
    let Some(driver) = language_registry().driver_for_path(path) else {
        return vec![];
    };
    let language = driver.language();
    let mut parser = Parser::new();
    if parser.set_language(&language).is_err() {
        return vec![];
    }
    let Some(tree) = parser.parse(source, None) else {
        return vec![];
    };
    let mut spans = driver.spans(source.as_bytes(), tree.root_node());
    spans.sort_by_key(|s| s.start_byte);
    spans
}

/// Best-effort language label by extension, used for chunk metadata and
/// the Markdown `docs` branch of the chunker (Markdown has no tree-sitter
/// driver here; it is chunked structurally, see `chunker::chunk_markdown`).
pub fn language_for_path(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "py" => "python",
        "md" | "markdown" => "markdown",
        other => other,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rust_driver_finds_functions_and_structs() {
        let src = "fn foo() {}\nstruct Bar { x: i32 }\n";
        let spans = extract_spans(&PathBuf::from("a.rs"), src);
        assert!(spans.iter().any(|s| s.chunk_type == "function" && s.name.as_deref() == Some("foo")));
        assert!(spans.iter().any(|s| s.chunk_type == "class" && s.name.as_deref() == Some("Bar")));
    }

    #[test]
    fn unsupported_extension_yields_no_spans() {
        let spans = extract_spans(&PathBuf::from("a.unknownlang"), "whatever");
        assert!(spans.is_empty());
    }

    #[test]
    fn python_driver_finds_def_and_class() {
        let src = "def foo():\n    pass\n\nclass Bar:\n    pass\n";
        let spans = extract_spans(&PathBuf::from("a.py"), src);
        assert!(spans.iter().any(|s| s.chunk_type == "function" && s.name.as_deref() == Some("foo")));
        assert!(spans.iter().any(|s| s.chunk_type == "class" && s.name.as_deref() == Some("Bar")));
    }
}
