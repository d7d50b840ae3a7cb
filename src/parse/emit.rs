//! IR text emission.
//!
//! The front-end's output is a plain text stream of stack-machine IR.
//! Expression trees are serialised depth-first, children before their
//! parent's own line, so the backend can rebuild them by popping a
//! running node stack. Segment directives are emitted lazily through a
//! current-segment cookie; string literals are deferred to a pool that
//! is flushed after the last external definition.
//!
//! Value emission follows the machine model: integers and pointers are
//! 16-bit values, characters load and store through `cload`/`cstore`,
//! and floating values are represented by the address of their 8-byte
//! cell, with the `f`-prefixed operators lowering to runtime calls in
//! the backend.

use crate::types::TypeElem;

use super::expr::{LeafValue, Node};
use super::symtab::Storage;
use super::Parser;

/// The four logical output sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Text,
    Data,
    Strings,
    Bss,
}

impl Segment {
    fn directive(self) -> &'static str {
        match self {
            Segment::Text => ".text",
            Segment::Data => ".data",
            Segment::Strings => ".string",
            Segment::Bss => ".bss",
        }
    }
}

/// The growing IR text, with a cookie tracking the segment last
/// switched to so redundant directives are not emitted.
#[derive(Debug, Default)]
pub struct Output {
    text: String,
    cur_seg: Option<Segment>,
}

impl Output {
    pub fn new() -> Self {
        Output::default()
    }

    /// Append one instruction line.
    pub fn asm(&mut self, line: impl AsRef<str>) {
        self.text.push('\t');
        self.text.push_str(line.as_ref());
        self.text.push('\n');
    }

    /// Define a label at the current position.
    pub fn deflab(&mut self, name: &str) {
        self.text.push_str(name);
        self.text.push(':');
    }

    /// Switch to `seg` if not already there.
    pub fn goseg(&mut self, seg: Segment) {
        if self.cur_seg != Some(seg) {
            self.cur_seg = Some(seg);
            self.asm(seg.directive());
        }
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// Serialise `node` and follow it with the bare command `cmd`
/// (`eval`, `brz label`, and the like).
pub fn asmexpr_cmd(parser: &mut Parser, node: &Node, cmd: &str) {
    emit_value(parser, node);
    parser.out.asm(cmd);
}

/// Serialise `node` for its value.
pub fn asmexpr(parser: &mut Parser, node: &Node) {
    emit_value(parser, node);
}

/// True for types whose "value" is already an address: arrays,
/// functions, and floating cells.
fn no_load(ty: &[TypeElem]) -> bool {
    matches!(
        ty.first(),
        Some(TypeElem::Array(_)) | Some(TypeElem::Func)
    ) || ty.first().is_some_and(|elem| elem.is_floating())
}

fn load_op(ty: &[TypeElem]) -> &'static str {
    if ty.first() == Some(&TypeElem::Char) {
        "cload"
    } else {
        "load"
    }
}

/// Emit the addition of a member offset to the address on the stack.
fn emit_offset(parser: &mut Parser, offset: u16) {
    if offset != 0 {
        parser.out.asm(format!("con {}", offset));
        parser.out.asm("add");
    }
}

/// Serialise `node` as an address.
fn emit_addr(parser: &mut Parser, node: &Node) {
    match node.label {
        "name" => {
            let LeafValue::Sym(symbol) = &node.value else {
                parser.error_at(node.line, "bad name node");
                return;
            };
            let line = match symbol.storage {
                Storage::Auto => format!("auto {}", symbol.num().unwrap_or(0)),
                Storage::Register => format!("register {}", symbol.num().unwrap_or(0)),
                Storage::Extern => format!("extern _{}", symbol.name),
                Storage::Static => format!("extern {}", symbol.label().unwrap_or("L0")),
                _ => {
                    parser.error_at(node.line, format!("bad storage class for {}", symbol.name));
                    return;
                }
            };
            parser.out.asm(line);
        }
        "deref" => emit_value(parser, &node.kids[0]),
        "dot" => {
            emit_addr(parser, &node.kids[0]);
            let offset = member_offset(&node.kids[1]);
            emit_offset(parser, offset);
        }
        "arrow" => {
            emit_value(parser, &node.kids[0]);
            let offset = member_offset(&node.kids[1]);
            emit_offset(parser, offset);
        }
        // The lvalue diagnostic was already issued when the node was
        // built; emit the value so the stack stays balanced.
        _ => emit_value(parser, node),
    }
}

fn member_offset(member: &Node) -> u16 {
    match member.value {
        LeafValue::Con(offset) => offset,
        _ => 0,
    }
}

/// The float spelling of a comparison, when its operands are floating.
fn float_compare(label: &str) -> Option<&'static str> {
    Some(match label {
        "equ" => "fequ",
        "nequ" => "fnequ",
        "less" => "fless",
        "great" => "fgreat",
        "lequ" => "flequ",
        "gequ" => "fgequ",
        _ => return None,
    })
}

/// Serialise `node` as a value.
fn emit_value(parser: &mut Parser, node: &Node) {
    match node.label {
        "con" => {
            let value = node.con_value().unwrap_or(0);
            parser.out.asm(format!("con {}", value));
        }
        "fcon" => {
            let LeafValue::FCon(value) = node.value else {
                return;
            };
            let label = parser.intern_string(value.to_le_bytes().to_vec());
            parser.out.asm(format!("extern {}", label));
        }
        "string" => {
            let LeafValue::Str(bytes) = &node.value else {
                return;
            };
            let label = parser.intern_string(bytes.clone());
            parser.out.asm(format!("extern {}", label));
        }
        "name" | "dot" | "arrow" => {
            emit_addr(parser, node);
            if !no_load(&node.ty) {
                parser.out.asm(load_op(&node.ty));
            }
        }
        "deref" => {
            emit_value(parser, &node.kids[0]);
            if !no_load(&node.ty) {
                parser.out.asm(load_op(&node.ty));
            }
        }
        "addr" => emit_addr(parser, &node.kids[0]),
        "assign" => {
            if let Some(TypeElem::Struct(_)) = node.ty.first() {
                parser.error_at(node.line, "bad structure operation");
                return;
            }
            emit_addr(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            if node.ty[0].is_floating() {
                parser.out.asm("fstore");
            } else if node.ty[0] == TypeElem::Char {
                parser.out.asm("cstore");
            } else {
                parser.out.asm("store");
            }
        }
        label if label.starts_with("asn") => {
            emit_addr(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            if node.ty[0] == TypeElem::Char {
                parser.out.asm(format!("c{}", label));
            } else {
                parser.out.asm(label);
            }
        }
        "preinc" | "postinc" | "predec" | "postdec" => {
            emit_addr(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            if node.ty[0] == TypeElem::Char {
                parser.out.asm(format!("c{}", node.label));
            } else {
                parser.out.asm(node.label);
            }
        }
        "call" => {
            for arg in &node.kids[1..] {
                emit_value(parser, arg);
            }
            emit_value(parser, &node.kids[0]);
            parser.out.asm(format!("call {}", node.kids.len() - 1));
        }
        "add" | "sub" | "mult" | "div" if node.ty[0].is_floating() => {
            emit_value(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            parser.out.asm(format!("f{}", node.label));
        }
        "neg" if node.ty[0].is_floating() => {
            emit_value(parser, &node.kids[0]);
            parser.out.asm("fneg");
        }
        label if float_compare(label).is_some() && node.kids[0].ty[0].is_floating() => {
            emit_value(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            parser.out.asm(float_compare(label).unwrap());
        }
        "cond" => {
            emit_value(parser, &node.kids[0]);
            emit_value(parser, &node.kids[1]);
            emit_value(parser, &node.kids[2]);
            parser.out.asm("cond");
        }
        _ => {
            for kid in &node.kids {
                emit_value(parser, kid);
            }
            parser.out.asm(node.label);
        }
    }
}

/// Flush the deferred string pool into the string section.
pub fn flush_strings(parser: &mut Parser) {
    if parser.strings.is_empty() {
        return;
    }
    parser.out.goseg(Segment::Strings);
    let pool = core::mem::take(&mut parser.strings);
    for (label, bytes) in &pool {
        parser.out.deflab(label);
        for row in bytes.chunks(12) {
            let line = row
                .iter()
                .map(|byte| byte.to_string())
                .collect::<Vec<_>>()
                .join(",");
            parser.out.asm(format!(".dc {}", line));
        }
    }
}
