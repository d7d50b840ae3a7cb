//! The C6T front-end: recursive-descent parsing and IR emission.
//!
//! Three cooperating sub-parsers handle specifiers ([`spec`]),
//! expressions ([`expr`]) and statements ([`stmt`]), all sharing one
//! [`Parser`] state object: the tokenizer, the symbol and tag tables,
//! the emitted-IR buffer, the generated-label counter, and the
//! break/continue/switch stacks.
//!
//! The output of [`compile`] is stack-machine IR as text, consumed by
//! the [`crate::codegen`] backend.

use indexmap::IndexMap;
use log::debug;

use crate::lex::{Tok, Token, Tokenizer};
use crate::Diagnostics;

pub mod emit;
pub mod expr;
pub mod spec;
pub mod stmt;
mod symtab;

pub use emit::{Output, Segment};
pub use expr::{LeafValue, Node};
pub use symtab::{Storage, SymVal, Symbol};

/// How many register variables a function may use; the rest demote to
/// automatic storage.
pub const REGVARS: i32 = 3;

/// Stack offset of the first parameter from the frame pointer: the
/// saved frame pointer and register cells below it total 8 bytes, then
/// the return address.
pub const PARAM_OFFSET: i32 = 10;

/// A state container for the current parse.
pub struct Parser<'a> {
    pub lex: Tokenizer<'a>,
    pub symtab: IndexMap<String, Symbol>,
    pub tagtab: IndexMap<String, Symbol>,
    pub out: Output,
    pub diags: Diagnostics,
    /// Deferred string-literal pool, label to bytes.
    pub strings: IndexMap<String, Vec<u8>>,
    next_static: usize,
    pub brk_stack: Vec<String>,
    pub cont_stack: Vec<String>,
    pub case_stack: Vec<IndexMap<u16, String>>,
    pub default_stack: Vec<Option<String>>,
    /// True while parsing a function body.
    pub local_scope: bool,
    /// File-scope symbols shadowed by locals, restored at function end.
    shadowed: Vec<Symbol>,
    /// Next automatic-variable offset (descends from 0).
    pub auto_offset: i32,
    /// Register variables allocated in the current function.
    pub reg_count: i32,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lex: Tokenizer::new(source),
            symtab: IndexMap::new(),
            tagtab: IndexMap::new(),
            out: Output::new(),
            diags: Diagnostics::new(),
            strings: IndexMap::new(),
            next_static: 0,
            brk_stack: Vec::new(),
            cont_stack: Vec::new(),
            case_stack: Vec::new(),
            default_stack: Vec::new(),
            local_scope: false,
            shadowed: Vec::new(),
            auto_offset: 0,
            reg_count: 0,
        }
    }

    /// The current input line number.
    pub fn cur_line(&self) -> usize {
        self.lex.cur_line()
    }

    pub fn next(&mut self) -> Token {
        self.lex.next_token()
    }

    pub fn unsee(&mut self, token: Token) {
        self.lex.unsee(token);
    }

    pub fn peek(&mut self) -> Token {
        self.lex.peek()
    }

    /// If the next token equals `want`, consume and return it.
    pub fn match_tok(&mut self, want: &Tok) -> Option<Token> {
        self.lex.match_tok(want)
    }

    /// If the next token satisfies `want`, consume and return it.
    pub fn match_with(&mut self, want: impl Fn(&Tok) -> bool) -> Option<Token> {
        self.lex.match_with(want)
    }

    /// Try each operator in `table`; on a match return its line number
    /// and the associated node label.
    pub fn match_any(&mut self, table: &[(Tok, &'static str)]) -> Option<(usize, &'static str)> {
        for (tok, label) in table {
            if let Some(token) = self.match_tok(tok) {
                return Some((token.line, label));
            }
        }
        None
    }

    /// Require `want` next; diagnose `missing <what>` if absent.
    pub fn need(&mut self, want: &Tok, what: &str) -> bool {
        if self.match_tok(want).is_some() {
            true
        } else {
            self.error(format!("missing '{}'", what));
            false
        }
    }

    /// Require an identifier next, returning it with its line.
    pub fn need_name(&mut self, msg: &str) -> Option<(String, usize)> {
        let token = self.next();
        match token.tok {
            Tok::Name(name) => Some((name, token.line)),
            _ => {
                self.error(msg.to_string());
                self.unsee(token);
                None
            }
        }
    }

    /// Report an error at the current line.
    pub fn error(&mut self, message: impl Into<String>) {
        let line = self.cur_line();
        self.diags.error(line, message);
    }

    /// Report an error at the given line.
    pub fn error_at(&mut self, line: usize, message: impl Into<String>) {
        self.diags.error(line, message);
    }

    /// Report an error, then skip ahead to a statement boundary: past
    /// the next `;`, or up to (not consuming) a brace or end of input.
    pub fn errskip(&mut self, message: impl Into<String>) {
        self.error(message);
        loop {
            let token = self.next();
            match token.tok {
                Tok::Semi | Tok::Eof => return,
                Tok::LBrace | Tok::RBrace => {
                    self.unsee(token);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Diagnose and report true if the input is exhausted.
    pub fn eoferror(&mut self) -> bool {
        if self.peek().tok == Tok::Eof {
            self.error("unexpected end of file");
            true
        } else {
            false
        }
    }

    pub fn at_eof(&mut self) -> bool {
        self.peek().tok == Tok::Eof
    }

    /// Return a fresh generated static label.
    pub fn next_static(&mut self) -> String {
        self.next_static += 1;
        format!("L{}", self.next_static)
    }

    /// Intern a string literal, returning its pool label.
    pub fn intern_string(&mut self, bytes: Vec<u8>) -> String {
        let label = self.next_static();
        self.strings.insert(label.clone(), bytes);
        label
    }

    /// Define `symbol`, diagnosing a redefinition. A local may shadow
    /// a file-scope name; the shadowed entry is restored when locals
    /// are swept.
    pub fn define(&mut self, symbol: Symbol) {
        if let Some(old) = self.symtab.get(&symbol.name) {
            if old.local == symbol.local {
                self.error(format!("redefined symbol {}", symbol.name));
                return;
            }
            if !old.local && symbol.local {
                let shadowed = old.clone();
                self.shadowed.push(shadowed);
            }
        }
        self.symtab.insert(symbol.name.clone(), symbol);
    }

    /// Sweep function-local symbols at function end, diagnosing any
    /// still-undefined goto labels and restoring shadowed file-scope
    /// entries.
    pub fn clear_locals(&mut self) {
        let mut undefined = Vec::new();
        self.symtab.retain(|name, symbol| {
            if symbol.local {
                if symbol.undefined {
                    undefined.push(name.clone());
                }
                false
            } else {
                true
            }
        });
        for symbol in self.shadowed.drain(..) {
            self.symtab.insert(symbol.name.clone(), symbol);
        }
        for name in undefined {
            self.error(format!("undefined label {}", name));
        }
    }

    /// An opaque progress marker for loop-protection.
    fn mark(&self) -> usize {
        self.lex.mark()
    }
}

/// The result of compiling one source file to IR.
pub struct CompileResult {
    /// The IR text.
    pub ir: String,
    /// Front-end and lexical diagnostics, in report order.
    pub diags: Diagnostics,
}

/// Compile cooked source text to stack-machine IR.
pub fn compile(source: &str) -> CompileResult {
    let mut parser = Parser::new(source);
    while !parser.at_eof() {
        let before = parser.mark();
        spec::extdef(&mut parser);
        if parser.mark() == before {
            parser.error("bad external definition");
            parser.next();
        }
    }
    emit::flush_strings(&mut parser);

    let Parser {
        lex, mut diags, out, ..
    } = parser;
    diags.absorb(lex.diags);
    diags.sort_by_line();
    let ir = out.finish();
    debug!("front-end produced {} bytes of IR", ir.len());
    CompileResult { ir, diags }
}
