//! Built-in script evaluator.
//!
//! A small line-oriented module language whose values are JSON literals.
//! One statement per line, `;` optional, `//` comments.
//!
//! async-static modules use `import` / `export`:
//!
//! ```text
//! import { a, b as c } from "./dep.mjs"
//! import * as ns from "shared"
//! export const answer = 42
//! export { c as renamed }
//! export * from "./more.mjs"
//! ```
//!
//! eager-sync modules use `require` / `module.exports`:
//!
//! ```text
//! const dep = require("./dep.cjs").member
//! module.exports = { "ready": true }
//! exports.dep = dep
//! ```
//!
//! Both accept `const|let|var name = EXPR` and `throw EXPR`, where `EXPR` is a
//! JSON literal, a binding path (`name.member`) or, in eager-sync modules, a
//! `require` call.

use super::{EvalScope, EvaluationError, ImportKind, ImportRequest, ModuleAnalysis, ModuleEvaluator};
use crate::format::ModuleFormat;
use crate::id::ResourceIdentifier;
use crate::interop::Namespace;
use crate::registry::{Binding, BindingCell};
use serde_json::Value;
use std::collections::HashMap;

/// Evaluator for the built-in script language.
#[derive(Debug, Clone, Default)]
pub struct ScriptEvaluator {
    _private: (),
}

impl ScriptEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl ModuleEvaluator for ScriptEvaluator {
    fn name(&self) -> &'static str {
        "script"
    }

    fn analyze(
        &self,
        _id: &ResourceIdentifier,
        source: &str,
        format: ModuleFormat,
    ) -> Result<ModuleAnalysis, EvaluationError> {
        let lines = parse(source, format)?;
        let mut analysis = ModuleAnalysis::default();

        for line in &lines {
            for (specifier, kind) in line.statement.requests() {
                analysis.imports.push(ImportRequest {
                    specifier: specifier.to_string(),
                    kind,
                    line: line.number,
                });
            }
            if format == ModuleFormat::EagerSync {
                continue;
            }
            let names: Vec<&str> = match &line.statement {
                Statement::ExportDecl { name, .. } => vec![name.as_str()],
                Statement::ExportDefault(_) => vec!["default"],
                Statement::ExportNamed { names, .. } => names.iter().map(|(_, e)| e.as_str()).collect(),
                _ => Vec::new(),
            };
            for name in names {
                if !analysis.exports.iter().any(|e| e == name) {
                    analysis.exports.push(name.to_string());
                }
            }
        }

        Ok(analysis)
    }

    fn evaluate(
        &self,
        id: &ResourceIdentifier,
        source: &str,
        format: ModuleFormat,
        scope: &mut EvalScope<'_>,
    ) -> Result<(), EvaluationError> {
        let lines = parse(source, format)?;
        let mut locals = Locals::default();

        if format == ModuleFormat::AsyncStatic {
            link(&lines, scope, &mut locals)?;
        }
        for line in &lines {
            execute(line, format, scope, &mut locals)?;
        }

        tracing::trace!(%id, statements = lines.len(), "script evaluated");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Path { root: String, members: Vec<String> },
    Require { specifier: String, members: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
    Import {
        specifier: String,
        default: Option<String>,
        /// `(imported, local)`
        named: Vec<(String, String)>,
        namespace: Option<String>,
    },
    ExportDecl { name: String, expr: Expr },
    ExportDefault(Expr),
    ExportNamed {
        /// `(local or imported, exported)`
        names: Vec<(String, String)>,
        from: Option<String>,
    },
    ExportAll { from: String },
    Declare { name: String, expr: Expr },
    ModuleExports(Expr),
    ExportsMember { name: String, expr: Expr },
    Expression(Expr),
    Throw(Expr),
}

impl Statement {
    fn expr(&self) -> Option<&Expr> {
        match self {
            Self::ExportDecl { expr, .. }
            | Self::Declare { expr, .. }
            | Self::ExportsMember { expr, .. }
            | Self::ExportDefault(expr)
            | Self::ModuleExports(expr)
            | Self::Expression(expr)
            | Self::Throw(expr) => Some(expr),
            _ => None,
        }
    }

    fn is_module_syntax(&self) -> bool {
        matches!(
            self,
            Self::Import { .. }
                | Self::ExportDecl { .. }
                | Self::ExportDefault(_)
                | Self::ExportNamed { .. }
                | Self::ExportAll { .. }
        )
    }

    fn is_eager_syntax(&self) -> bool {
        matches!(self, Self::ModuleExports(_) | Self::ExportsMember { .. })
            || matches!(self.expr(), Some(Expr::Require { .. }))
    }

    fn requests(&self) -> Vec<(&str, ImportKind)> {
        match self {
            Self::Import { specifier, .. } => vec![(specifier.as_str(), ImportKind::Static)],
            Self::ExportNamed { from: Some(from), .. } | Self::ExportAll { from } => {
                vec![(from.as_str(), ImportKind::Static)]
            }
            _ => match self.expr() {
                Some(Expr::Require { specifier, .. }) => vec![(specifier.as_str(), ImportKind::Require)],
                _ => Vec::new(),
            },
        }
    }
}

#[derive(Debug)]
struct Line {
    number: usize,
    statement: Statement,
}

fn parse(source: &str, format: ModuleFormat) -> Result<Vec<Line>, EvaluationError> {
    let mut lines = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;
        let text = strip_comment(raw).trim();
        let text = text.strip_suffix(';').unwrap_or(text).trim_end();
        if text.is_empty() {
            continue;
        }

        let statement = Cursor::new(text)
            .statement()
            .map_err(|message| EvaluationError::syntax(number, message))?;

        match format {
            ModuleFormat::AsyncStatic if statement.is_eager_syntax() => {
                return Err(EvaluationError::syntax(
                    number,
                    "require and module.exports are not available in an async-static module",
                ));
            }
            ModuleFormat::EagerSync if statement.is_module_syntax() => {
                return Err(EvaluationError::syntax(
                    number,
                    "import and export are not available in an eager-sync module",
                ));
            }
            _ => {}
        }

        lines.push(Line { number, statement });
    }

    Ok(lines)
}

/// Cut a `//` comment, ignoring slashes inside string literals.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            quote = Some(b);
        } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
            return &line[..i];
        }
    }

    line
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

type ParseResult<T> = Result<T, String>;

struct Cursor<'s> {
    text: &'s str,
    pos: usize,
}

impl<'s> Cursor<'s> {
    fn new(text: &'s str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'s str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> ParseResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(format!("expected '{c}'{}", self.found()))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with(keyword) && !rest[keyword.len()..].starts_with(is_ident_char) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn found(&self) -> String {
        match self.rest().trim_start() {
            "" => " at end of line".to_string(),
            rest => format!(" near '{}'", rest.chars().take(16).collect::<String>()),
        }
    }

    fn end(&mut self) -> ParseResult<()> {
        self.skip_ws();
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(format!("unexpected input{}", self.found()))
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with(is_ident_start) {
            return Err(format!("expected a name{}", self.found()));
        }
        let end = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        self.pos += end;
        Ok(rest[..end].to_string())
    }

    fn string(&mut self) -> ParseResult<String> {
        self.skip_ws();
        let rest = self.rest();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            return Err(format!("expected a string{}", self.found()));
        };
        let body = &rest[1..];
        let end = body
            .find(quote)
            .ok_or_else(|| "unterminated string".to_string())?;
        self.pos += end + 2;
        Ok(body[..end].to_string())
    }

    fn declaration(&mut self) -> bool {
        self.eat_keyword("const") || self.eat_keyword("let") || self.eat_keyword("var")
    }

    fn statement(&mut self) -> ParseResult<Statement> {
        let statement = if self.eat_keyword("import") {
            self.import()?
        } else if self.eat_keyword("export") {
            self.export()?
        } else if self.declaration() {
            let (name, expr) = self.binding()?;
            Statement::Declare { name, expr }
        } else if self.eat_keyword("throw") {
            Statement::Throw(self.expr()?)
        } else if let Some(assignment) = self.exports_assignment()? {
            assignment
        } else {
            Statement::Expression(self.expr()?)
        };
        self.end()?;
        Ok(statement)
    }

    fn binding(&mut self) -> ParseResult<(String, Expr)> {
        let name = self.ident()?;
        self.expect('=')?;
        Ok((name, self.expr()?))
    }

    /// `module.exports = X`, `module.exports.n = X` or `exports.n = X`.
    fn exports_assignment(&mut self) -> ParseResult<Option<Statement>> {
        let start = self.pos;
        let member = if self.eat_keyword("module") {
            if !(self.eat('.') && self.eat_keyword("exports")) {
                self.pos = start;
                return Ok(None);
            }
            if self.eat('.') {
                Some(self.ident()?)
            } else {
                None
            }
        } else if self.eat_keyword("exports") {
            self.expect('.')?;
            Some(self.ident()?)
        } else {
            return Ok(None);
        };

        self.expect('=')?;
        let expr = self.expr()?;
        Ok(Some(match member {
            Some(name) => Statement::ExportsMember { name, expr },
            None => Statement::ModuleExports(expr),
        }))
    }

    fn import(&mut self) -> ParseResult<Statement> {
        if matches!(self.peek(), Some('"' | '\'')) {
            return Ok(Statement::Import {
                specifier: self.string()?,
                default: None,
                named: Vec::new(),
                namespace: None,
            });
        }

        let mut default = None;
        let mut named = Vec::new();
        let mut namespace = None;

        let clause = if matches!(self.peek(), Some('{' | '*')) {
            true
        } else {
            default = Some(self.ident()?);
            self.eat(',')
        };
        if clause {
            if self.eat('*') {
                if !self.eat_keyword("as") {
                    return Err(format!("expected 'as'{}", self.found()));
                }
                namespace = Some(self.ident()?);
            } else {
                named = self.name_list()?;
            }
        }

        if !self.eat_keyword("from") {
            return Err(format!("expected 'from'{}", self.found()));
        }
        Ok(Statement::Import {
            specifier: self.string()?,
            default,
            named,
            namespace,
        })
    }

    fn export(&mut self) -> ParseResult<Statement> {
        if self.declaration() {
            let (name, expr) = self.binding()?;
            return Ok(Statement::ExportDecl { name, expr });
        }
        if self.eat_keyword("default") {
            return Ok(Statement::ExportDefault(self.expr()?));
        }
        if self.eat('*') {
            if !self.eat_keyword("from") {
                return Err(format!("expected 'from'{}", self.found()));
            }
            return Ok(Statement::ExportAll {
                from: self.string()?,
            });
        }

        let names = self.name_list()?;
        let from = if self.eat_keyword("from") {
            Some(self.string()?)
        } else {
            None
        };
        Ok(Statement::ExportNamed { names, from })
    }

    /// `{ a, b as c }`
    fn name_list(&mut self) -> ParseResult<Vec<(String, String)>> {
        self.expect('{')?;
        let mut names = Vec::new();
        loop {
            if self.eat('}') {
                return Ok(names);
            }
            let name = self.ident()?;
            let alias = if self.eat_keyword("as") {
                self.ident()?
            } else {
                name.clone()
            };
            names.push((name, alias));
            if !self.eat(',') {
                self.expect('}')?;
                return Ok(names);
            }
        }
    }

    fn members(&mut self) -> ParseResult<Vec<String>> {
        let mut members = Vec::new();
        while self.eat('.') {
            members.push(self.ident()?);
        }
        Ok(members)
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.skip_ws();
        let start = self.pos;

        if self.eat_keyword("require") {
            self.expect('(')?;
            let specifier = self.string()?;
            self.expect(')')?;
            let members = self.members()?;
            return Ok(Expr::Require { specifier, members });
        }

        if self.rest().starts_with(is_ident_start) {
            let root = self.ident()?;
            if !matches!(root.as_str(), "true" | "false" | "null") {
                let members = self.members()?;
                return Ok(Expr::Path { root, members });
            }
            self.pos = start;
        }

        let literal = self.rest().trim_end();
        let value = serde_json::from_str(literal).map_err(|e| format!("invalid literal: {e}"))?;
        self.pos = self.text.len();
        Ok(Expr::Literal(value))
    }
}

enum Local {
    Cell(BindingCell),
    Namespace(Namespace),
}

#[derive(Default)]
struct Locals(HashMap<String, Local>);

impl Locals {
    fn declare(&mut self, line: usize, name: &str, local: Local) -> Result<(), EvaluationError> {
        if self.0.contains_key(name) {
            return Err(EvaluationError::syntax(line, format!("'{name}' is declared twice")));
        }
        self.0.insert(name.to_string(), local);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Local> {
        self.0.get(name)
    }
}

/// Bind imports and declarations, then wire up re-exports. Runs before any
/// statement executes.
fn link(lines: &[Line], scope: &EvalScope<'_>, locals: &mut Locals) -> Result<(), EvaluationError> {
    for line in lines {
        match &line.statement {
            Statement::Import {
                specifier,
                default,
                named,
                namespace,
            } => {
                if let Some(local) = default {
                    let cell = scope.import_binding(specifier, "default")?;
                    locals.declare(line.number, local, Local::Cell(cell))?;
                }
                for (imported, local) in named {
                    let cell = scope.import_binding(specifier, imported)?;
                    locals.declare(line.number, local, Local::Cell(cell))?;
                }
                if let Some(local) = namespace {
                    let ns = scope.import_namespace(specifier)?;
                    locals.declare(line.number, local, Local::Namespace(ns))?;
                }
            }
            Statement::ExportDecl { name, .. } => {
                locals.declare(line.number, name, Local::Cell(scope.export_cell(name)))?;
            }
            Statement::Declare { name, .. } => {
                locals.declare(line.number, name, Local::Cell(BindingCell::new()))?;
            }
            _ => {}
        }
    }

    for line in lines {
        match &line.statement {
            Statement::ExportNamed { names, from: None } => {
                for (local, exported) in names {
                    match locals.get(local) {
                        Some(Local::Cell(cell)) => scope.export_forward(exported, cell),
                        Some(Local::Namespace(ns)) => scope.export_value(exported, ns.to_value()),
                        None => {
                            return Err(EvaluationError::UndefinedName {
                                name: local.clone(),
                            })
                        }
                    }
                }
            }
            Statement::ExportNamed {
                names,
                from: Some(from),
            } => {
                for (imported, exported) in names {
                    let cell = scope.import_binding(from, imported)?;
                    scope.export_forward(exported, &cell);
                }
            }
            Statement::ExportAll { from } => scope.export_all_from(from)?,
            _ => {}
        }
    }

    Ok(())
}

fn execute(
    line: &Line,
    format: ModuleFormat,
    scope: &EvalScope<'_>,
    locals: &mut Locals,
) -> Result<(), EvaluationError> {
    match &line.statement {
        Statement::Declare { name, expr } => {
            let value = eval(expr, scope, locals)?;
            let hoisted = match locals.get(name) {
                Some(Local::Cell(cell)) if format == ModuleFormat::AsyncStatic => Some(cell.clone()),
                _ => None,
            };
            match hoisted {
                Some(cell) => cell.set(value),
                None => {
                    let cell = BindingCell::initialized(value);
                    locals.declare(line.number, name, Local::Cell(cell))?;
                }
            }
        }
        Statement::ExportDecl { name, expr } => {
            let value = eval(expr, scope, locals)?;
            scope.export_value(name, value);
        }
        Statement::ExportDefault(expr) => {
            let value = eval(expr, scope, locals)?;
            scope.export_value("default", value);
        }
        Statement::ModuleExports(expr) => {
            let value = eval(expr, scope, locals)?;
            scope.set_module_exports(value);
        }
        Statement::ExportsMember { name, expr } => {
            let value = eval(expr, scope, locals)?;
            scope.set_export_member(name, value)?;
        }
        Statement::Expression(expr) => {
            eval(expr, scope, locals)?;
        }
        Statement::Throw(expr) => {
            return Err(EvaluationError::Thrown(eval(expr, scope, locals)?));
        }
        Statement::Import { .. } | Statement::ExportNamed { .. } | Statement::ExportAll { .. } => {}
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &EvalScope<'_>, locals: &Locals) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Require { specifier, members } => Ok(member(scope.require(specifier)?, members)),
        Expr::Path { root, members } => match locals.get(root) {
            None => Err(EvaluationError::UndefinedName { name: root.clone() }),
            Some(Local::Cell(cell)) => {
                let value = cell.get().value().ok_or_else(|| EvaluationError::UninitializedBinding {
                    name: root.clone(),
                })?;
                Ok(member(value, members))
            }
            Some(Local::Namespace(ns)) => {
                let Some((name, rest)) = members.split_first() else {
                    return Ok(ns.to_value());
                };
                match ns.get(name) {
                    None => Err(EvaluationError::MissingExport {
                        module: ns.id().clone(),
                        name: name.clone(),
                    }),
                    Some(Binding::Uninitialized) => Err(EvaluationError::UninitializedBinding {
                        name: format!("{root}.{name}"),
                    }),
                    Some(Binding::Initialized(value)) => Ok(member(value, rest)),
                }
            }
        },
    }
}

/// Member access; a missing member reads as `null`.
fn member(mut value: Value, members: &[String]) -> Value {
    for name in members {
        value = match value {
            Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analyze(source: &str, format: ModuleFormat) -> Result<ModuleAnalysis, EvaluationError> {
        ScriptEvaluator::new().analyze(&ResourceIdentifier::builtin("test"), source, format)
    }

    #[test]
    fn test_parse_import_forms() {
        let lines = parse(
            r#"
            import "./side.mjs";
            import d from "a"
            import { x, y as z } from 'b'
            import d2, { w } from "c"
            import * as ns from "d"
            import d3, * as ns2 from "e"
            "#,
            ModuleFormat::AsyncStatic,
        )
        .unwrap();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0].number, 2);
        assert_eq!(
            lines[2].statement,
            Statement::Import {
                specifier: "b".into(),
                default: None,
                named: vec![("x".into(), "x".into()), ("y".into(), "z".into())],
                namespace: None,
            }
        );
        assert_eq!(
            lines[5].statement,
            Statement::Import {
                specifier: "e".into(),
                default: Some("d3".into()),
                named: Vec::new(),
                namespace: Some("ns2".into()),
            }
        );
    }

    #[test]
    fn test_analysis_lists_imports_and_exports() {
        let analysis = analyze(
            r#"
            import { a } from "./a.mjs"
            export const one = 1
            export default { "k": [1, 2] }
            export { a as renamed }
            export { b } from "./b.mjs"
            export * from "./c.mjs"
            "#,
            ModuleFormat::AsyncStatic,
        )
        .unwrap();

        assert_eq!(analysis.specifiers(), vec!["./a.mjs", "./b.mjs", "./c.mjs"]);
        assert_eq!(analysis.exports, vec!["one", "default", "renamed", "b"]);
    }

    #[test]
    fn test_eager_sync_requests() {
        let analysis = analyze(
            "const dep = require(\"./dep.cjs\").inner.value\nrequire(\"./side.cjs\")\nmodule.exports.dep = dep",
            ModuleFormat::EagerSync,
        )
        .unwrap();

        let kinds: Vec<_> = analysis.imports.iter().map(|i| (i.specifier.as_str(), i.kind, i.line)).collect();
        assert_eq!(
            kinds,
            vec![("./dep.cjs", ImportKind::Require, 1), ("./side.cjs", ImportKind::Require, 2)]
        );
        assert!(analysis.exports.is_empty());
    }

    #[test]
    fn test_format_misuse_is_syntax_error() {
        let err = analyze("const x = 1\nmodule.exports = x", ModuleFormat::AsyncStatic).unwrap_err();
        assert!(matches!(err, EvaluationError::Syntax { line: 2, .. }));

        let err = analyze("export const x = 1", ModuleFormat::EagerSync).unwrap_err();
        assert!(matches!(err, EvaluationError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_comments_respect_strings() {
        let lines = parse(
            "export const url = \"http://example.com\" // trailing\n// whole line",
            ModuleFormat::AsyncStatic,
        )
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].statement,
            Statement::ExportDecl {
                name: "url".into(),
                expr: Expr::Literal(json!("http://example.com")),
            }
        );
    }

    #[test]
    fn test_expressions() {
        let expr = |text: &str| Cursor::new(text).expr().unwrap();
        assert_eq!(expr("null"), Expr::Literal(Value::Null));
        assert_eq!(expr("-1.5"), Expr::Literal(json!(-1.5)));
        assert_eq!(
            expr("config.db.host"),
            Expr::Path {
                root: "config".into(),
                members: vec!["db".into(), "host".into()],
            }
        );
        assert_eq!(member(json!({"a": {"b": 2}}), &["a".into(), "b".into()]), json!(2));
        assert_eq!(member(json!(1), &["a".into()]), Value::Null);
    }

    #[test]
    fn test_syntax_errors_name_the_line() {
        let err = analyze("const ok = 1\nimport { a from \"x\"", ModuleFormat::AsyncStatic).unwrap_err();
        match err {
            EvaluationError::Syntax { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("expected"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(analyze("const = 1", ModuleFormat::EagerSync).is_err());
        assert!(analyze("export const x = {", ModuleFormat::AsyncStatic).is_err());
    }
}
