//! The code-generation backend.
//!
//! The backend consumes the front-end's IR text, reassembling each
//! expression tree from a running node stack: a node line pops its
//! fixed child count (an arity table keyed by label; `call` is
//! variadic with its argument count inline) and pushes itself. Bare
//! commands drive the target code generator directly; label lines
//! define labels in the current output segment.
//!
//! Instruction selection is template-driven: see [`Scheme`] for the
//! JSON-declared template set and [`i8080`] for the Intel 8080
//! evaluation strategy.

use core::fmt;

use log::trace;

mod i8080;
mod node;
mod template;

pub use i8080::Codegen8080;
pub use node::{N80Value, Node80};
pub use template::{RegClass, Scheme, SchemeError, Template};

/// An error from IR parsing or code generation.
#[derive(Debug)]
pub struct CodegenError {
    /// IR line number the error was noticed on.
    pub line: usize,
    /// Error message.
    pub message: String,
}

impl CodegenError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        CodegenError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.message)
    }
}

impl std::error::Error for CodegenError {}

/// The result type used within the backend.
pub type Result<T> = core::result::Result<T, CodegenError>;

/// A single atom from the IR text: an integer, a float, or a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Num(i64),
    Float(f64),
    Name(String),
}

impl Atom {
    pub fn num(&self) -> Option<i64> {
        match self {
            Atom::Num(value) => Some(*value),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Atom::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Num(value) => write!(f, "{}", value),
            Atom::Float(value) => write!(f, "{}", value),
            Atom::Name(name) => f.write_str(name),
        }
    }
}

/// A labelled IR node's inline value.
#[derive(Debug, Clone, PartialEq)]
pub enum IrValue {
    None,
    One(Atom),
    Many(Vec<Atom>),
}

impl IrValue {
    fn from_args(mut args: Vec<Atom>) -> Self {
        match args.len() {
            0 => IrValue::None,
            1 => IrValue::One(args.remove(0)),
            _ => IrValue::Many(args),
        }
    }

    pub fn num(&self) -> Option<i64> {
        match self {
            IrValue::One(atom) => atom.num(),
            _ => None,
        }
    }
}

/// A labelled IR node, its children reconstructed from the stack.
#[derive(Debug, Clone)]
pub struct IrNode {
    pub label: String,
    pub kids: Vec<IrNode>,
    pub value: IrValue,
}

/// A bare IR command with its arguments.
#[derive(Debug, Clone)]
pub struct Command {
    pub cmd: String,
    pub args: Vec<Atom>,
}

/// One parsed element of the IR stream.
#[derive(Debug, Clone)]
pub enum IrElem {
    Node(IrNode),
    Command(Command),
    Label(String),
}

/// Fixed child count per node label; `None` means the label is a
/// command. `call` is handled separately: its count rides its value.
fn arity(label: &str) -> Option<usize> {
    Some(match label {
        "con" | "extern" | "auto" | "register" => 0,
        "load" | "cload" | "neg" | "compl" | "lognot" | "log" | "toflt" | "toint" | "fneg" => 1,
        "store" | "cstore" | "add" | "sub" | "mult" | "div" | "mod" | "and" | "or" | "eor"
        | "lshift" | "rshift" | "equ" | "nequ" | "less" | "great" | "lequ" | "gequ" | "uless"
        | "ugreat" | "ulequ" | "ugequ" | "comma" | "logand" | "logor" | "fadd" | "fsub"
        | "fmult" | "fdiv" | "fstore" | "fcmp" | "fequ" | "fnequ" | "fless" | "fgreat"
        | "flequ" | "fgequ" | "postinc" | "postdec" | "preinc" | "predec" | "cpostinc"
        | "cpostdec" | "cpreinc" | "cpredec" | "asnadd" | "asnsub" | "asnmult" | "asndiv"
        | "asnmod" | "asnlshift" | "asnrshift" | "asnand" | "asneor" | "asnor" | "casnadd"
        | "casnsub" | "casnmult" | "casndiv" | "casnmod" | "casnlshift" | "casnrshift"
        | "casnand" | "casneor" | "casnor" => 2,
        "cond" => 3,
        _ => return None,
    })
}

/// Parses the IR text representation.
pub struct IrParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> IrParser<'a> {
    pub fn new(source: &'a str) -> Self {
        IrParser {
            src: source.as_bytes(),
            pos: 0,
        }
    }

    /// Current input line number, for error reports.
    pub fn line(&self) -> usize {
        1 + memchr::memchr_iter(b'\n', &self.src[..self.pos]).count()
    }

    /// Skip spaces, tabs and `;` comments, not newlines. Reports
    /// whether anything was skipped.
    fn skipws(&mut self) -> bool {
        let start = self.pos;
        while let Some(&byte) = self.src.get(self.pos) {
            match byte {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b';' => {
                    let rest = &self.src[self.pos..];
                    match memchr::memchr(b'\n', rest) {
                        Some(at) => self.pos += at,
                        None => self.pos = self.src.len(),
                    }
                }
                _ => break,
            }
        }
        self.pos != start
    }

    /// Skip whitespace including newlines.
    fn skipws_nl(&mut self) {
        loop {
            self.skipws();
            match self.src.get(self.pos) {
                Some(b'\n') => self.pos += 1,
                _ => return,
            }
        }
    }

    /// If `text` comes next, consume it.
    fn match_lit(&mut self, text: &str) -> bool {
        self.skipws();
        if self.src[self.pos..].starts_with(text.as_bytes()) {
            self.pos += text.len();
            true
        } else {
            false
        }
    }

    /// Remove the next atom from the source.
    fn atom(&mut self) -> Result<Atom> {
        self.skipws();
        let start = self.pos;
        while let Some(&byte) = self.src.get(self.pos) {
            if byte.is_ascii_whitespace() || byte == b',' || byte == b':' {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(CodegenError::new(self.line(), "missing atom"));
        }
        let text = core::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| CodegenError::new(self.line(), "bad atom encoding"))?;
        if let Ok(num) = text.parse::<i64>() {
            return Ok(Atom::Num(num));
        }
        if let Ok(num) = text.parse::<f64>() {
            return Ok(Atom::Float(num));
        }
        Ok(Atom::Name(text.to_string()))
    }

    /// Parse the next element, or `None` at end of input.
    pub fn next_elem(&mut self) -> Result<Option<IrElem>> {
        self.skipws_nl();
        if self.pos >= self.src.len() {
            return Ok(None);
        }
        let atom = self.atom()?;
        if self.match_lit(":") {
            return Ok(Some(IrElem::Label(atom.to_string())));
        }
        let mut args = Vec::new();
        if !self.match_lit("\n") && self.pos < self.src.len() {
            args.push(self.atom()?);
            while self.match_lit(",") {
                args.push(self.atom()?);
            }
        }
        let label = atom.to_string();
        if arity(&label).is_some() || label == "call" {
            return Ok(Some(IrElem::Node(IrNode {
                label,
                kids: Vec::new(),
                value: IrValue::from_args(args),
            })));
        }
        Ok(Some(IrElem::Command(Command { cmd: label, args })))
    }
}

/// Lower IR text to 8080 assembly using the given template scheme.
pub fn generate(ir: &str, scheme: &Scheme) -> Result<String> {
    let mut gen = Codegen8080::new(scheme);
    let mut parser = IrParser::new(ir);
    let mut stack: Vec<IrNode> = Vec::new();

    while let Some(elem) = parser.next_elem()? {
        let line = parser.line();
        match elem {
            IrElem::Node(mut node) => {
                let count = if node.label == "call" {
                    let argc = node
                        .value
                        .num()
                        .ok_or_else(|| CodegenError::new(line, "call without argument count"))?;
                    argc as usize + 1
                } else {
                    arity(&node.label).unwrap_or(0)
                };
                if count > stack.len() {
                    return Err(CodegenError::new(
                        line,
                        format!("not enough nodes for {}", node.label),
                    ));
                }
                let at = stack.len() - count;
                node.kids.extend(stack.drain(at..));
                stack.push(node);
            }
            IrElem::Label(lab) => gen.deflabel(&lab),
            IrElem::Command(command) => {
                trace!("IR command {} at line {}", command.cmd, line);
                gen.command(&command, &mut stack, line)?;
            }
        }
    }
    Ok(gen.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elems(source: &str) -> Vec<IrElem> {
        let mut parser = IrParser::new(source);
        let mut out = Vec::new();
        while let Some(elem) = parser.next_elem().unwrap() {
            out.push(elem);
        }
        out
    }

    #[test]
    fn parses_nodes_commands_labels() {
        let parsed = elems("L1:\tcon 3\n\teval\n");
        assert_eq!(parsed.len(), 3);
        assert!(matches!(&parsed[0], IrElem::Label(lab) if lab == "L1"));
        assert!(
            matches!(&parsed[1], IrElem::Node(node) if node.label == "con"
                && node.value.num() == Some(3))
        );
        assert!(matches!(&parsed[2], IrElem::Command(cmd) if cmd.cmd == "eval"));
    }

    #[test]
    fn negative_atoms_parse_as_numbers() {
        let parsed = elems("\tauto -4\n");
        match &parsed[0] {
            IrElem::Node(node) => assert_eq!(node.value.num(), Some(-4)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comma_separated_args() {
        let parsed = elems("\t.dw 5,L10\n");
        match &parsed[0] {
            IrElem::Command(cmd) => {
                assert_eq!(cmd.cmd, ".dw");
                assert_eq!(cmd.args.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comments_are_skipped() {
        let parsed = elems("\tcon 1 ; a constant\n");
        assert_eq!(parsed.len(), 1);
    }
}
