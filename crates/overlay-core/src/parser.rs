//! Parser for directories of declarative resource files.
//!
//! Understands the block syntax used by Terraform-style configuration:
//!
//! ```text
//! resource "azurerm_linux_virtual_machine" "web" {
//!   name                = "vm-web-01"
//!   resource_group_name = azurerm_resource_group.rg.name
//!   tags = { correlation_id = "ex1-web" }
//!   os_disk { caching = "ReadWrite" }
//! }
//!
//! azurerm_subnet "dmz" { name = "snet-dmz", address_prefixes = ["10.0.1.0/24"] }
//! ```
//!
//! Literal values become JSON values. Anything that needs evaluation
//! (references, function calls, operators) is kept verbatim as a
//! `"${...}"` string, the same convention Terraform's JSON syntax uses.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use crate::error::{OverlayError, OverlayResult};
use crate::model::{Attributes, ParsedResource};

/// File extension of declaration files.
pub const DECLARATION_EXTENSION: &str = "tf";

/// Top-level block types that never declare a resource.
const NON_RESOURCE_BLOCKS: &[&str] = &[
    "terraform", "provider", "variable", "output", "locals", "module", "data", "import", "moved",
];

/// Options controlling file discovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Descend into subdirectories (hidden directories are always skipped).
    pub recursive: bool,
}

/// Reads declaration files and produces [`ParsedResource`] records.
#[derive(Debug, Clone, Default)]
pub struct ConfigParser {
    options: ParseOptions,
}

impl ConfigParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    /// Parse every declaration file in `directory`.
    ///
    /// Files are read in lexical path order. An empty directory yields an
    /// empty list; the first syntax error aborts with its `file:line`.
    pub fn parse(&self, directory: &Path) -> OverlayResult<Vec<ParsedResource>> {
        let mut files = Vec::new();
        collect_files(directory, self.options.recursive, &mut files)?;
        files.sort();

        let mut resources = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();

        for path in &files {
            let label = path
                .strip_prefix(directory)
                .unwrap_or(path)
                .display()
                .to_string();
            let source = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => {
                    OverlayError::parse(&label, 1, "file is not valid UTF-8")
                }
                _ => OverlayError::Io(e),
            })?;

            let parsed = parse_str(&source, &label)?;
            debug!(file = %label, resources = parsed.len(), "Parsed declaration file");

            for resource in parsed {
                if let Some(first) = seen.get(resource.address()) {
                    return Err(OverlayError::parse(
                        resource.source_file(),
                        resource.source_line(),
                        format!(
                            "duplicate resource '{}' (first declared at {})",
                            resource.address(),
                            first
                        ),
                    ));
                }
                seen.insert(resource.address().to_string(), resource.source_location());
                resources.push(resource);
            }
        }

        info!(
            directory = %directory.display(),
            files = files.len(),
            resources = resources.len(),
            "Parsed resource declarations"
        );
        Ok(resources)
    }
}

/// Parse one file's contents; `file` labels diagnostics and source locations.
pub fn parse_str(source: &str, file: &str) -> OverlayResult<Vec<ParsedResource>> {
    Cursor::new(source, file).parse_file()
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> OverlayResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');

        if file_type.is_dir() {
            if recursive && !hidden {
                collect_files(&path, recursive, out)?;
            }
        } else if file_type.is_file()
            && path.extension().is_some_and(|ext| ext == DECLARATION_EXTENSION)
        {
            out.push(path);
        }
    }
    Ok(())
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Character cursor with line tracking.
struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    file: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(source: &str, file: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            file,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> OverlayError {
        OverlayError::parse(self.file, self.line, message)
    }

    fn error_at(&self, line: usize, message: impl Into<String>) -> OverlayError {
        OverlayError::parse(self.file, line, message)
    }

    /// Skip whitespace and comments; newlines only when `newlines` is set.
    fn skip_trivia(&mut self, newlines: bool) -> OverlayResult<()> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' if newlines => {
                    self.bump();
                }
                '#' => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('/') => self.skip_line_comment(),
                '/' if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self) -> OverlayResult<()> {
        let start = self.line;
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error_at(start, "unterminated block comment")),
            }
        }
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn parse_file(&mut self) -> OverlayResult<Vec<ParsedResource>> {
        let mut resources = Vec::new();

        loop {
            self.skip_trivia(true)?;
            let Some(c) = self.peek() else { break };
            if !is_ident_start(c) {
                return Err(self.error(format!("unexpected character '{}', expected a block", c)));
            }

            let line = self.line;
            let block_type = self.ident();
            let labels = self.block_labels(&block_type)?;
            let body = self.parse_body(line)?;

            if NON_RESOURCE_BLOCKS.contains(&block_type.as_str()) {
                continue;
            }

            let (kind, local_name) = match (block_type.as_str(), labels.as_slice()) {
                ("resource", [kind, name]) => (kind.clone(), name.clone()),
                ("resource", _) => {
                    return Err(self.error_at(
                        line,
                        "resource block requires a type label and a name label",
                    ));
                }
                (_, [name]) => (block_type.clone(), name.clone()),
                (_, _) => {
                    return Err(self.error_at(
                        line,
                        format!("block '{}' requires exactly one name label", block_type),
                    ));
                }
            };

            resources.push(ParsedResource::new(kind, local_name, body, self.file, line));
        }

        Ok(resources)
    }

    /// Read block labels up to and including the opening brace.
    fn block_labels(&mut self, block_type: &str) -> OverlayResult<Vec<String>> {
        let mut labels = Vec::new();
        loop {
            self.skip_trivia(false)?;
            match self.peek() {
                Some('{') => {
                    self.bump();
                    return Ok(labels);
                }
                Some('"') => {
                    let line = self.line;
                    labels.push(self.string_literal(line)?);
                }
                Some(c) if is_ident_start(c) => labels.push(self.ident()),
                Some(c) => {
                    return Err(self.error(format!(
                        "expected '{{' after block '{}', found '{}'",
                        block_type,
                        c.escape_default()
                    )));
                }
                None => {
                    return Err(self.error(format!(
                        "unexpected end of file in block '{}' header",
                        block_type
                    )));
                }
            }
        }
    }

    /// Parse a block body after its `{`, consuming the closing `}`.
    fn parse_body(&mut self, open_line: usize) -> OverlayResult<Attributes> {
        let mut attrs = Attributes::new();
        let mut attribute_keys: HashSet<String> = HashSet::new();

        loop {
            self.skip_trivia(true)?;
            match self.peek() {
                None => {
                    return Err(
                        self.error_at(open_line, "unexpected end of file, block is not closed")
                    )
                }
                Some('}') => {
                    self.bump();
                    return Ok(attrs);
                }
                Some(',') => {
                    self.bump();
                }
                Some(c) if is_ident_start(c) => {
                    let line = self.line;
                    let key = self.ident();
                    self.skip_trivia(false)?;

                    match self.peek() {
                        Some('=') if self.peek_at(1) != Some('=') => {
                            self.bump();
                            self.skip_trivia(false)?;
                            let value = self.parse_value()?;
                            self.expect_separator()?;
                            if attrs.contains_key(&key) {
                                return Err(self.error_at(
                                    line,
                                    format!("duplicate attribute '{}'", key),
                                ));
                            }
                            attribute_keys.insert(key.clone());
                            attrs.insert(key, value);
                        }
                        Some('{') | Some('"') => {
                            if attribute_keys.contains(&key) {
                                return Err(self.error_at(
                                    line,
                                    format!(
                                        "'{}' is defined as both an attribute and a block",
                                        key
                                    ),
                                ));
                            }
                            let labels = self.block_labels(&key)?;
                            let body = self.parse_body(line)?;
                            let mut value = Value::Object(body.into_iter().collect());
                            for label in labels.into_iter().rev() {
                                let mut wrapped = Map::new();
                                wrapped.insert(label, value);
                                value = Value::Object(wrapped);
                            }
                            insert_block(&mut attrs, key, value);
                        }
                        _ => {
                            return Err(self.error(format!("expected '=' or '{{' after '{}'", key)));
                        }
                    }
                }
                Some(c) => {
                    return Err(self.error(format!(
                        "unexpected character '{}' in block body",
                        c.escape_default()
                    )));
                }
            }
        }
    }

    /// After an attribute value: only a newline, comma, comment or closing brace may follow.
    fn expect_separator(&mut self) -> OverlayResult<()> {
        self.skip_trivia(false)?;
        match self.peek() {
            None | Some('\n') | Some(',') | Some('}') => Ok(()),
            Some(c) => Err(self.error(format!(
                "unexpected '{}' after attribute value",
                c.escape_default()
            ))),
        }
    }

    fn at_value_end(&mut self) -> OverlayResult<bool> {
        let saved = (self.pos, self.line);
        self.skip_trivia(false)?;
        let end = matches!(self.peek(), None | Some('\n') | Some(',') | Some('}') | Some(']'));
        (self.pos, self.line) = saved;
        Ok(end)
    }

    fn parse_value(&mut self) -> OverlayResult<Value> {
        let line = self.line;
        match self.peek() {
            None | Some('\n') => Err(self.error("expected a value")),
            Some('"') => {
                let saved = (self.pos, self.line);
                let text = self.string_literal(line)?;
                if self.at_value_end()? {
                    Ok(Value::String(text))
                } else {
                    (self.pos, self.line) = saved;
                    self.expression()
                }
            }
            Some('<') if self.peek_at(1) == Some('<') => self.heredoc(),
            Some('[') => self.list(),
            Some('{') => self.map(),
            Some(_) => self.expression(),
        }
    }

    fn list(&mut self) -> OverlayResult<Value> {
        let open_line = self.line;
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_trivia(true)?;
            match self.peek() {
                None => return Err(self.error_at(open_line, "unterminated list")),
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                Some(',') => {
                    self.bump();
                }
                Some(_) => {
                    items.push(self.parse_value()?);
                    self.skip_trivia(true)?;
                    match self.peek() {
                        Some(',') | Some(']') => {}
                        None => return Err(self.error_at(open_line, "unterminated list")),
                        Some(c) => {
                            return Err(self.error(format!(
                                "expected ',' or ']' in list, found '{}'",
                                c.escape_default()
                            )));
                        }
                    }
                }
            }
        }
    }

    fn map(&mut self) -> OverlayResult<Value> {
        let open_line = self.line;
        self.bump();
        let mut entries = Map::new();
        loop {
            self.skip_trivia(true)?;
            let key = match self.peek() {
                None => return Err(self.error_at(open_line, "unterminated map")),
                Some('}') => {
                    self.bump();
                    return Ok(Value::Object(entries));
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some('"') => {
                    let line = self.line;
                    self.string_literal(line)?
                }
                Some(c) if is_ident_start(c) => self.ident(),
                Some(c) => {
                    return Err(
                        self.error(format!("unexpected '{}' in map key", c.escape_default()))
                    )
                }
            };

            self.skip_trivia(false)?;
            match self.peek() {
                Some('=') | Some(':') => {
                    self.bump();
                }
                _ => return Err(self.error(format!("expected '=' or ':' after map key '{}'", key))),
            }
            self.skip_trivia(false)?;
            let value = self.parse_value()?;
            entries.insert(key, value);
        }
    }

    fn heredoc(&mut self) -> OverlayResult<Value> {
        let start = self.line;
        self.bump();
        self.bump();
        let indented = self.peek() == Some('-');
        if indented {
            self.bump();
        }
        let marker = self.ident();
        if marker.is_empty() {
            return Err(self.error("expected heredoc marker after '<<'"));
        }
        self.skip_trivia(false)?;
        if self.bump() != Some('\n') {
            return Err(self.error("heredoc marker must end the line"));
        }

        let mut lines: Vec<String> = Vec::new();
        loop {
            if self.peek().is_none() {
                return Err(self.error_at(
                    start,
                    format!("unterminated heredoc, missing '{}'", marker),
                ));
            }
            let mut current = String::new();
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                current.push(c);
                self.bump();
            }
            if current.trim() == marker {
                break;
            }
            self.bump();
            lines.push(current);
        }

        if indented {
            let indent = lines
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.len() - l.trim_start().len())
                .min()
                .unwrap_or(0);
            for line in &mut lines {
                *line = line.chars().skip(indent).collect();
            }
        }

        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        Ok(Value::String(text))
    }

    /// Decode a quoted string; template sequences are kept verbatim.
    fn string_literal(&mut self, line: usize) -> OverlayResult<String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error_at(line, "unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(c) => {
                            return Err(self.error(format!("invalid escape sequence '\\{}'", c)))
                        }
                        None => return Err(self.error_at(line, "unterminated string")),
                    };
                    out.push(escaped);
                }
                Some(c @ ('$' | '%')) if self.peek() == Some('{') => {
                    out.push(c);
                    self.template_raw(&mut out, line)?;
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// Copy a `{ ... }` template body verbatim, including nested strings.
    fn template_raw(&mut self, out: &mut String, line: usize) -> OverlayResult<()> {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => return Err(self.error_at(line, "unterminated template sequence")),
                Some('"') => self.quoted_raw(out, line)?,
                Some(c) => {
                    self.bump();
                    out.push(c);
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Copy a quoted string verbatim, quotes and escapes included.
    fn quoted_raw(&mut self, out: &mut String, line: usize) -> OverlayResult<()> {
        self.bump();
        out.push('"');
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error_at(line, "unterminated string")),
                Some('"') => {
                    out.push('"');
                    return Ok(());
                }
                Some('\\') => {
                    out.push('\\');
                    match self.bump() {
                        Some(c) => out.push(c),
                        None => return Err(self.error_at(line, "unterminated string")),
                    }
                }
                Some(c @ ('$' | '%')) if self.peek() == Some('{') => {
                    out.push(c);
                    self.template_raw(out, line)?;
                }
                Some(c) => out.push(c),
            }
        }
    }

    /// Capture an expression up to the end of the value and classify it.
    fn expression(&mut self) -> OverlayResult<Value> {
        let start = self.line;
        let mut raw = String::new();
        let mut closers: Vec<char> = Vec::new();

        while let Some(c) = self.peek() {
            if closers.is_empty() {
                if matches!(c, '\n' | ',' | '}' | ']' | ')' | '#') {
                    break;
                }
                if c == '/' && matches!(self.peek_at(1), Some('/') | Some('*')) {
                    break;
                }
            }
            match c {
                '"' => {
                    self.quoted_raw(&mut raw, start)?;
                    continue;
                }
                '(' => closers.push(')'),
                '[' => closers.push(']'),
                '{' => closers.push('}'),
                ')' | ']' | '}' => {
                    if closers.pop() != Some(c) {
                        return Err(self.error(format!("unbalanced '{}' in expression", c)));
                    }
                }
                _ => {}
            }
            raw.push(c);
            self.bump();
        }

        if !closers.is_empty() {
            return Err(self.error_at(start, "unterminated expression"));
        }

        let text = raw.trim();
        if text.is_empty() {
            return Err(self.error("expected a value"));
        }
        Ok(classify_expression(text))
    }
}

/// Turn literal expression text into a JSON value, or wrap it as `${...}`.
fn classify_expression(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }
    if text.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')) {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(format!("${{{}}}", text))
}

/// Repeated nested blocks accumulate into a list.
fn insert_block(attrs: &mut Attributes, key: String, value: Value) {
    match attrs.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            attrs.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(src: &str) -> Vec<ParsedResource> {
        parse_str(src, "main.tf").unwrap()
    }

    fn parse_err(src: &str) -> (usize, String) {
        match parse_str(src, "main.tf").unwrap_err() {
            OverlayError::Parse { file, line, message } => {
                assert_eq!(file, "main.tf");
                (line, message)
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_terraform_resource_block() {
        let src = r#"
# network for the exercise
resource "azurerm_virtual_network" "core" {
  name          = "vnet-core"
  address_space = ["10.0.0.0/16"]
  location      = "westeurope"
}
"#;
        let resources = parse(src);
        assert_eq!(resources.len(), 1);
        let vnet = &resources[0];
        assert_eq!(vnet.kind(), "azurerm_virtual_network");
        assert_eq!(vnet.local_name(), "core");
        assert_eq!(vnet.address(), "azurerm_virtual_network.core");
        assert_eq!(vnet.source_line(), 3);
        assert_eq!(vnet.properties()["address_space"], json!(["10.0.0.0/16"]));
    }

    #[test]
    fn test_short_block_form_with_commas() {
        let resources =
            parse(r#"azurerm_subnet "dmz" { name = "snet-dmz", count = 2, enabled = true }"#);
        assert_eq!(resources.len(), 1);
        let subnet = &resources[0];
        assert_eq!(subnet.kind(), "azurerm_subnet");
        assert_eq!(subnet.properties()["name"], json!("snet-dmz"));
        assert_eq!(subnet.properties()["count"], json!(2));
        assert_eq!(subnet.properties()["enabled"], json!(true));
    }

    #[test]
    fn test_references_and_functions_are_kept_as_expressions() {
        let src = r#"
resource "azurerm_network_interface" "nic" {
  resource_group_name = azurerm_resource_group.rg.name
  location            = lookup(var.locations, "primary", "westeurope")
  name                = "${var.prefix}-nic"
}
"#;
        let nic = &parse(src)[0];
        assert_eq!(
            nic.properties()["resource_group_name"],
            json!("${azurerm_resource_group.rg.name}")
        );
        assert_eq!(
            nic.properties()["location"],
            json!("${lookup(var.locations, \"primary\", \"westeurope\")}")
        );
        assert_eq!(nic.properties()["name"], json!("${var.prefix}-nic"));
    }

    #[test]
    fn test_nested_and_repeated_blocks() {
        let src = r#"
resource "azurerm_network_security_group" "nsg" {
  name = "nsg-dmz"
  security_rule {
    name     = "ssh"
    priority = 100
  }
  security_rule {
    name     = "rdp"
    priority = 110
  }
  tags = {
    correlation_id = "ex1-nsg"
    "cost-center"  : "lab"
  }
}
"#;
        let nsg = &parse(src)[0];
        let rules = nsg.properties()["security_rule"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1]["name"], json!("rdp"));
        assert_eq!(nsg.tag("correlation_id"), Some("ex1-nsg"));
        assert_eq!(nsg.properties()["tags"]["cost-center"], json!("lab"));
    }

    #[test]
    fn test_labelled_nested_block_is_wrapped() {
        let src = r#"
resource "azurerm_linux_virtual_machine" "web" {
  name = "web"
  dynamic "network_interface" {
    content = "nic"
  }
}
"#;
        let vm = &parse(src)[0];
        assert_eq!(vm.properties()["dynamic"]["network_interface"]["content"], json!("nic"));
    }

    #[test]
    fn test_non_resource_blocks_are_skipped() {
        let src = r#"
terraform {
  required_providers {
    azurerm = { source = "hashicorp/azurerm" }
  }
}
provider "azurerm" {
  features {}
}
variable "prefix" { default = "ex1" }
data "azurerm_client_config" "current" {}
resource "azurerm_resource_group" "rg" { name = "rg-ex1" }
"#;
        let resources = parse(src);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].address(), "azurerm_resource_group.rg");
        assert_eq!(resources[0].source_line(), 12);
    }

    #[test]
    fn test_heredoc_and_comments() {
        let src = concat!(
            "resource \"azurerm_linux_virtual_machine\" \"web\" {\n",
            "  /* multi\n     line */\n",
            "  custom_data = <<-EOT\n    #!/bin/bash\n    echo hi\n  EOT\n",
            "  size = \"Standard_B1s\" // trailing\n",
            "}\n",
        );
        let vm = &parse(src)[0];
        assert_eq!(vm.properties()["custom_data"], json!("#!/bin/bash\necho hi\n"));
        assert_eq!(vm.properties()["size"], json!("Standard_B1s"));
    }

    #[test]
    fn test_multiline_expression() {
        let src = concat!(
            "resource \"azurerm_storage_account\" \"logs\" {\n",
            "  tags = merge(var.tags, {\n    role = \"logs\"\n  })\n",
            "  replicas = 3\n",
            "}\n",
        );
        let sa = &parse(src)[0];
        assert!(sa.properties()["tags"].as_str().unwrap().starts_with("${merge(var.tags, {"));
        assert_eq!(sa.properties()["replicas"], json!(3));
    }

    #[test]
    fn test_unterminated_string_reports_line() {
        let (line, message) =
            parse_err("resource \"azurerm_subnet\" \"a\" {\n  name = \"oops\n}\n");
        assert_eq!(line, 2);
        assert!(message.contains("unterminated string"));
    }

    #[test]
    fn test_unclosed_block_reports_opening_line() {
        let (line, message) =
            parse_err("\n\nresource \"azurerm_subnet\" \"a\" {\n  name = \"x\"\n");
        assert_eq!(line, 3);
        assert!(message.contains("not closed"));
    }

    #[test]
    fn test_missing_equals() {
        let (line, message) = parse_err("resource \"azurerm_subnet\" \"a\" {\n  name \"x\" 3\n}\n");
        assert_eq!(line, 2);
        assert!(message.contains("expected '{'"));
    }

    #[test]
    fn test_duplicate_attribute() {
        let (line, message) =
            parse_err("azurerm_subnet \"a\" {\n  name = \"x\"\n  name = \"y\"\n}\n");
        assert_eq!(line, 3);
        assert!(message.contains("duplicate attribute 'name'"));
    }

    #[test]
    fn test_resource_needs_two_labels() {
        let (line, message) = parse_err("resource \"azurerm_subnet\" {\n}\n");
        assert_eq!(line, 1);
        assert!(message.contains("type label and a name label"));
    }

    #[test]
    fn test_parse_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.tf"), "azurerm_subnet \"b\" { name = \"b\" }\n").unwrap();
        let first = "azurerm_subnet \"a\" { name = \"a\" }\nazurerm_subnet \"c\" {}\n";
        std::fs::write(dir.path().join("a.tf"), first).unwrap();
        std::fs::write(dir.path().join("notes.md"), "resource \"x\" \"y\" {}").unwrap();
        std::fs::create_dir(dir.path().join("modules")).unwrap();
        std::fs::write(dir.path().join("modules/m.tf"), "azurerm_subnet \"m\" {}\n").unwrap();

        let parser = ConfigParser::default();
        let resources = parser.parse(dir.path()).unwrap();
        let addresses: Vec<&str> = resources.iter().map(|r| r.address()).collect();
        assert_eq!(addresses, vec!["azurerm_subnet.a", "azurerm_subnet.c", "azurerm_subnet.b"]);
        assert_eq!(resources[1].source_location(), "a.tf:2");

        let recursive = ConfigParser::new(ParseOptions { recursive: true });
        assert_eq!(recursive.parse(dir.path()).unwrap().len(), 4);
    }

    #[test]
    fn test_empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigParser::default().parse(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_address_across_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tf"), "azurerm_subnet \"dmz\" {}\n").unwrap();
        let second = "\nresource \"azurerm_subnet\" \"dmz\" {}\n";
        std::fs::write(dir.path().join("b.tf"), second).unwrap();

        match ConfigParser::default().parse(dir.path()).unwrap_err() {
            OverlayError::Parse { file, line, message } => {
                assert_eq!(file, "b.tf");
                assert_eq!(line, 2);
                assert!(message.contains("first declared at a.tf:1"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
