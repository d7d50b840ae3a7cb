//! The C6T preprocessor.
//!
//! A deliberately small facility: object-like macros and a
//! single-depth include, applied line by line. Only sources whose very
//! first character is `#` are preprocessed at all; everything else
//! passes through untouched. Every directive line is replaced by a
//! blank line so the cooked text keeps the original line numbering,
//! and included files are bracketed with `@` markers so the tokenizer
//! can suspend line counting across them.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::Diagnostics;

/// Strip `/* ... */` comments from `text`.
///
/// Comments do not nest; an unterminated comment removes the rest of
/// the text.
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"/*") {
            i += 2;
            let mut end = bytes.len();
            let mut search = i;
            while let Some(found) = memchr::memchr(b'*', &bytes[search..]) {
                let at = search + found;
                if bytes.get(at + 1) == Some(&b'/') {
                    end = at + 2;
                    break;
                }
                search = at + 1;
            }
            i = end;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

/// The macro table: replacement text keyed by name, kept sorted
/// longest name first so substitution always prefers the longest
/// match. Names of equal length stay in definition order.
#[derive(Debug, Default)]
struct Macros {
    table: Vec<(String, String)>,
}

impl Macros {
    fn contains(&self, name: &str) -> bool {
        self.table.iter().any(|(key, _)| key == name)
    }

    fn define(&mut self, name: String, replacement: String) {
        let at = self
            .table
            .iter()
            .position(|(key, _)| key.len() < name.len())
            .unwrap_or(self.table.len());
        self.table.insert(at, (name, replacement));
    }

    /// Substitute macros anywhere in `line`, longest key first.
    fn replace(&self, line: &str) -> String {
        if self.table.is_empty() {
            return line.to_string();
        }
        let bytes = line.as_bytes();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;
        'scan: while i < bytes.len() {
            for (key, value) in &self.table {
                if bytes[i..].starts_with(key.as_bytes()) {
                    out.push_str(value);
                    i += key.len();
                    continue 'scan;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }
}

/// Returns lines from a source, with support for singular-depth
/// includes. Bare `@` entries mark include boundaries.
struct Includer {
    lines: VecDeque<String>,
    in_include: bool,
}

impl Includer {
    fn new(source: &str) -> Self {
        Includer {
            lines: source.split_inclusive('\n').map(str::to_string).collect(),
            in_include: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line = self.lines.pop_front()?;
        if line == "@" {
            self.in_include = !self.in_include;
        }
        Some(line)
    }

    /// Splice the named file in at the front of the line queue.
    fn include(&mut self, line: usize, filename: &str, diags: &mut Diagnostics) {
        if self.in_include {
            diags.error(line, "includes only support one depth");
            return;
        }
        let text = match fs::read_to_string(Path::new(filename)) {
            Ok(text) => text,
            Err(_) => {
                diags.error(line, format!("unable to open file \"{}\"", filename));
                return;
            }
        };
        let mut spliced: VecDeque<String> = VecDeque::new();
        spliced.push_back("@".to_string());
        spliced.extend(text.split_inclusive('\n').map(str::to_string));
        spliced.push_back("@".to_string());
        spliced.append(&mut self.lines);
        self.lines = spliced;
    }
}

/// Preprocess `source`, returning the cooked text and any diagnostics.
///
/// Preprocessing only runs when the first character of the source is
/// `#`; this is a quirk of the dialect and is preserved.
pub fn preprocess(source: &str) -> (String, Diagnostics) {
    let mut diags = Diagnostics::new();
    if !source.starts_with('#') {
        return (source.to_string(), diags);
    }

    let mut macros = Macros::default();
    let mut lines = Includer::new(source);
    let mut out = String::with_capacity(source.len());
    let mut cur_line = 0usize;
    let mut count_lines = true;

    while let Some(line) = lines.next_line() {
        if line == "@" {
            count_lines = !count_lines;
        }
        if count_lines {
            cur_line += line.matches('\n').count();
        }
        if let Some(directive) = line.strip_prefix('#') {
            out.push('\n');
            let directive = directive.trim();
            if let Some(rest) = directive.strip_prefix("define") {
                let mut fields = rest.trim().splitn(2, char::is_whitespace);
                let name = fields.next().unwrap_or("");
                let replacement = fields.next();
                let (name, replacement) = match replacement {
                    Some(replacement) if !name.is_empty() => (name, replacement),
                    _ => {
                        diags.error(cur_line, "bad define");
                        continue;
                    }
                };
                if macros.contains(name) {
                    diags.error(cur_line, format!("macro {} already defined", name));
                } else {
                    let body = format!(" {} ", strip_comments(replacement));
                    macros.define(name.to_string(), body);
                }
            } else if let Some(rest) = directive.strip_prefix("include") {
                match include_path(rest) {
                    Some(path) => lines.include(cur_line, path, &mut diags),
                    None => diags.error(cur_line, "bad include"),
                }
            }
        } else {
            out.push_str(&macros.replace(&line));
        }
    }
    (out, diags)
}

/// Parse the quoted path of an `include` directive. Nothing but
/// whitespace may follow the closing quote.
fn include_path(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    let (path, tail) = rest.split_at(end);
    if !tail[1..].trim().is_empty() {
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gated_on_first_character() {
        let source = "int x;\n#define A 1\n";
        let (out, diags) = preprocess(source);
        assert_eq!(out, source);
        assert!(diags.is_empty());
    }

    #[test]
    fn strip_comments_basic() {
        assert_eq!(strip_comments("a /* b */ c"), "a  c");
        assert_eq!(strip_comments("a /* open"), "a ");
        assert_eq!(strip_comments("/*x*/y/*z*/"), "y");
    }

    #[test]
    fn define_and_replace() {
        let (out, diags) = preprocess("#define N 12\nint a[N];\n");
        assert!(diags.is_empty());
        assert_eq!(out, "\nint a[ 12 ];\n");
    }

    #[test]
    fn longest_key_wins() {
        let (out, diags) = preprocess("#define AB 1\n#define ABC 2\nABC AB\n");
        assert!(diags.is_empty());
        assert_eq!(out, "\n\n 2   1 \n");
    }

    #[test]
    fn substitution_is_textual() {
        // Occurrences inside longer identifiers are replaced too; this
        // matches the dialect.
        let (out, _) = preprocess("#define N 3\nint xN;\n");
        assert_eq!(out, "\nint x 3 ;\n");
    }

    #[test]
    fn redefinition_is_diagnosed() {
        let (out, diags) = preprocess("#define A 1\n#define A 2\nA\n");
        assert_eq!(diags.count(), 1);
        // The first definition stays in force.
        assert_eq!(out, "\n\n 1 \n");
    }

    #[test]
    fn bad_define_is_diagnosed() {
        let (_, diags) = preprocess("#define\nx;\n");
        assert_eq!(diags.count(), 1);
        let (_, diags) = preprocess("#define A\nx;\n");
        assert_eq!(diags.count(), 1);
    }

    #[test]
    fn bad_include_is_diagnosed() {
        let (_, diags) = preprocess("#include nope\n");
        assert_eq!(diags.count(), 1);
    }

    #[test]
    fn directive_lines_become_blank() {
        let (out, _) = preprocess("#define A 1\nx;\ny;\n");
        // Line 2 of the output is still "x;".
        assert_eq!(out.lines().nth(1), Some("x;"));
        assert_eq!(out.lines().nth(2), Some("y;"));
    }

    #[test]
    fn include_brackets_with_markers() {
        let dir = std::env::temp_dir();
        let path = dir.join("c6t_preproc_test_inc.h");
        std::fs::write(&path, "int foo;\n").unwrap();
        let source = format!("#include \"{}\"\nbar;\n", path.display());
        let (out, diags) = preprocess(&source);
        assert!(diags.is_empty(), "{:?}", diags.iter().collect::<Vec<_>>());
        assert_eq!(out, "\n@int foo;\n@bar;\n");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn idempotent() {
        let (once, _) = preprocess("#define A 1\nA;\n");
        let (twice, _) = preprocess(&once);
        assert_eq!(once, twice);
    }
}
