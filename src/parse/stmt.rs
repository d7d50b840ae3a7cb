//! Statement parsing.
//!
//! Dispatched on the leading token. Structured statements allocate
//! fresh generated labels and push them on the break/continue stacks;
//! `switch` additionally collects its case table for the dispatch
//! helper emitted after the body.

use indexmap::IndexMap;

use crate::lex::Tok;
use crate::types::TypeElem;

use super::emit::{self, Segment};
use super::expr::{conexpr, expression, Node};
use super::symtab::{Storage, SymVal, Symbol};
use super::Parser;

/// Process a single statement recursively. `ret_floating` carries the
/// enclosing function's return-type class for `return` conversion.
pub fn statement(parser: &mut Parser, ret_floating: bool) {
    parser.out.goseg(Segment::Text);
    let token = parser.next();
    match token.tok {
        Tok::Name(name) => {
            if parser.match_tok(&Tok::Colon).is_some() {
                addgoto(parser, &name);
                statement(parser, ret_floating);
            } else {
                parser.unsee(crate::lex::Token {
                    tok: Tok::Name(name),
                    line: token.line,
                });
                doexpr(parser);
            }
        }
        Tok::If => {
            let lab_false = parser.next_static();
            parenexpr(parser, &lab_false);
            statement(parser, ret_floating);
            if parser.match_tok(&Tok::Else).is_some() {
                let lab_true = parser.next_static();
                parser.out.asm(format!("jmp {}", lab_true));
                parser.out.deflab(&lab_false);
                statement(parser, ret_floating);
                parser.out.deflab(&lab_true);
            } else {
                parser.out.deflab(&lab_false);
            }
        }
        Tok::While => {
            let cont = parser.next_static();
            let brk = parser.next_static();
            parser.cont_stack.push(cont.clone());
            parser.brk_stack.push(brk.clone());
            parser.out.deflab(&cont);
            parenexpr(parser, &brk);
            statement(parser, ret_floating);
            parser.out.asm(format!("jmp {}", cont));
            parser.out.deflab(&brk);
            parser.cont_stack.pop();
            parser.brk_stack.pop();
        }
        Tok::Do => {
            let top = parser.next_static();
            let cont = parser.next_static();
            let brk = parser.next_static();
            parser.cont_stack.push(cont.clone());
            parser.brk_stack.push(brk.clone());

            parser.out.deflab(&top);
            statement(parser, ret_floating);
            parser.need(&Tok::While, "while");
            parser.out.deflab(&cont);
            parenexpr(parser, &brk);
            parser.need(&Tok::Semi, ";");
            parser.out.asm(format!("jmp {}", top));
            parser.out.deflab(&brk);

            parser.brk_stack.pop();
            parser.cont_stack.pop();
        }
        Tok::For => {
            let top = parser.next_static();
            let brk = parser.next_static();
            let cont = parser.next_static();
            parser.brk_stack.push(brk.clone());
            parser.cont_stack.push(cont.clone());

            parser.need(&Tok::LParen, "(");
            if parser.match_tok(&Tok::Semi).is_none() {
                let init = expression(parser, true);
                emit::asmexpr_cmd(parser, &init, "eval");
                parser.need(&Tok::Semi, ";");
            }
            parser.out.deflab(&top);
            if parser.match_tok(&Tok::Semi).is_none() {
                let test = expression(parser, true);
                emit::asmexpr(parser, &test);
                parser.out.asm(format!("brz {}", brk));
                parser.need(&Tok::Semi, ";");
            }
            let update = if parser.match_tok(&Tok::RParen).is_some() {
                // No update part: continue jumps straight to the top.
                *parser.cont_stack.last_mut().unwrap() = top.clone();
                None
            } else {
                let update = expression(parser, true);
                parser.need(&Tok::RParen, ")");
                Some(update)
            };

            statement(parser, ret_floating);
            if let Some(update) = update {
                let cont = parser.cont_stack.last().unwrap().clone();
                parser.out.deflab(&cont);
                emit::asmexpr_cmd(parser, &update, "eval");
            }
            parser.out.asm(format!("jmp {}", top));
            parser.out.deflab(&brk);

            parser.cont_stack.pop();
            parser.brk_stack.pop();
        }
        Tok::Switch => {
            let brk = parser.next_static();
            parser.brk_stack.push(brk.clone());
            parser.case_stack.push(IndexMap::new());
            parser.default_stack.push(None);

            let dispatch = parser.next_static();

            parser.need(&Tok::LParen, "(");
            let value = expression(parser, true);
            parser.need(&Tok::RParen, ")");

            parser.out.asm(format!("jmp {}", dispatch));

            statement(parser, ret_floating);

            parser.out.deflab(&dispatch);
            let cases = parser.case_stack.pop().unwrap();
            let default = parser.default_stack.pop().unwrap();
            doswitch(parser, &value, &cases, default);

            parser.out.deflab(&brk);
            parser.brk_stack.pop();
        }
        Tok::Case => {
            let con = conexpr(parser, true, 1);
            parser.need(&Tok::Colon, ":");
            if parser.case_stack.is_empty() {
                parser.error("case outside of switch");
            } else {
                let label = parser.next_static();
                let dup = parser.case_stack.last().unwrap().contains_key(&con);
                if dup {
                    parser.error(format!("redefined case {}", con));
                }
                parser.case_stack.last_mut().unwrap().insert(con, label.clone());
                parser.out.deflab(&label);
            }
            statement(parser, ret_floating);
        }
        Tok::Default => {
            parser.need(&Tok::Colon, ":");
            if parser.default_stack.is_empty() {
                parser.error("default outside of switch");
            } else if parser.default_stack.last().unwrap().is_some() {
                parser.error("multiple defaults");
            } else {
                let label = parser.next_static();
                *parser.default_stack.last_mut().unwrap() = Some(label.clone());
                parser.out.deflab(&label);
            }
            statement(parser, ret_floating);
        }
        Tok::Break => {
            parser.need(&Tok::Semi, ";");
            match parser.brk_stack.last() {
                Some(label) => {
                    let line = format!("jmp {}", label);
                    parser.out.asm(line);
                }
                None => parser.error("nothing to break to"),
            }
        }
        Tok::Continue => {
            parser.need(&Tok::Semi, ";");
            match parser.cont_stack.last() {
                Some(label) => {
                    let line = format!("jmp {}", label);
                    parser.out.asm(line);
                }
                None => parser.error("nothing to continue to"),
            }
        }
        Tok::Return => {
            if parser.match_tok(&Tok::Semi).is_some() {
                parser.out.asm("retnull");
            } else {
                parser.need(&Tok::LParen, "(");
                let value = expression(parser, true);
                parser.need(&Tok::RParen, ")");
                parser.need(&Tok::Semi, ";");
                emit::asmexpr(parser, &value);
                let floating = value.ty[0].is_floating();
                if ret_floating && !floating {
                    parser.out.asm("toflt");
                }
                if !ret_floating && floating {
                    parser.out.asm("toint");
                }
                parser
                    .out
                    .asm(if ret_floating { "fret" } else { "ret" });
            }
        }
        Tok::Goto => {
            let target = expression(parser, true);
            parser.need(&Tok::Semi, ";");
            emit::asmexpr_cmd(parser, &target, "ijmp");
        }
        Tok::Semi => {}
        Tok::LBrace => {
            while parser.match_tok(&Tok::RBrace).is_none() {
                if parser.eoferror() {
                    return;
                }
                statement(parser, ret_floating);
            }
        }
        _ => {
            parser.unsee(token);
            doexpr(parser);
        }
    }
}

/// Evaluate a parenthesised expression and branch to `label` when it
/// is false.
fn parenexpr(parser: &mut Parser, label: &str) {
    parser.need(&Tok::LParen, "(");
    let node = expression(parser, true);
    parser.need(&Tok::RParen, ")");
    emit::asmexpr(parser, &node);
    parser.out.asm(format!("brz {}", label));
}

/// An expression statement: evaluate and drop the result.
fn doexpr(parser: &mut Parser) {
    let node = expression(parser, true);
    emit::asmexpr_cmd(parser, &node, "eval");
    parser.need(&Tok::Semi, ";");
}

/// Define a goto label: a zero-length static array symbol whose
/// address is a code pointer.
fn addgoto(parser: &mut Parser, name: &str) {
    if !parser.symtab.contains_key(name) {
        let label = parser.next_static();
        let sym = Symbol::new(
            name,
            Storage::Static,
            vec![TypeElem::Array(1), TypeElem::Int],
        )
        .with_val(SymVal::Label(label))
        .local();
        parser.symtab.insert(name.to_string(), sym);
    }
    let symbol = parser.symtab.get(name).unwrap().clone();
    let goto_ty = vec![TypeElem::Array(1), TypeElem::Int];
    if symbol.storage != Storage::Static || symbol.ty != goto_ty || !symbol.local {
        parser.error(format!("bad goto label {}", name));
        return;
    }
    if let Some(sym) = parser.symtab.get_mut(name) {
        sym.undefined = false;
    }
    let label = symbol.label().unwrap_or("L0").to_string();
    parser.out.deflab(&label);
}

/// Emit the dispatch for a switch statement: the case table goes to
/// the data segment, then the value, default label, case count, and
/// table address feed the backend's `doswitch`.
fn doswitch(
    parser: &mut Parser,
    value: &Node,
    cases: &IndexMap<u16, String>,
    default: Option<String>,
) {
    parser.out.goseg(Segment::Data);
    let table = parser.next_static();
    parser.out.deflab(&table);
    for (con, label) in cases {
        parser.out.asm(format!(".dw {},{}", con, label));
    }
    parser.out.goseg(Segment::Text);
    emit::asmexpr(parser, value);
    let default = match default {
        Some(label) => label,
        None => match parser.brk_stack.last() {
            Some(label) => label.clone(),
            None => {
                parser.error("missing break for switch");
                "L0".to_string()
            }
        },
    };
    parser.out.asm(format!("extern {}", default));
    parser.out.asm(format!("con {}", cases.len()));
    parser.out.asm(format!("extern {}", table));
    parser.out.asm("doswitch");
}
