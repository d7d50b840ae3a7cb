//! Specifier parsing: declarations, struct bodies, and external
//! function and data definitions.
//!
//! A specifier line is `TYPECLASS declarator {, declarator} ;` where
//! the type class combines an optional base type and an optional
//! storage class in either order. Declarators follow the dialect's
//! inside-out rules: `*` layers apply after the core, postfix `()`
//! and `[]` layers apply outside parentheses only.

use indexmap::IndexMap;

use crate::lex::Tok;
use crate::types::{tysize, TypeElem, TypeString};

use super::emit::Segment;
use super::expr::{conexpr, expression, LeafValue};
use super::symtab::{Storage, SymVal, Symbol};
use super::{stmt, Parser, PARAM_OFFSET, REGVARS};

/// One parsed declarator with its line's type class applied.
pub struct SpecItem {
    pub name: String,
    pub storage: Storage,
    pub ty: TypeString,
    pub params: Vec<String>,
    pub count: usize,
    pub line: usize,
}

/// Parse a base type, if any.
fn grabtype(parser: &mut Parser) -> Option<TypeElem> {
    if parser.match_tok(&Tok::Int).is_some() {
        return Some(TypeElem::Int);
    }
    if parser.match_tok(&Tok::Char).is_some() {
        return Some(TypeElem::Char);
    }
    if parser.match_tok(&Tok::Float).is_some() {
        return Some(TypeElem::Float);
    }
    if parser.match_tok(&Tok::Double).is_some() {
        return Some(TypeElem::Double);
    }
    if parser.match_tok(&Tok::Struct).is_some() {
        return Some(TypeElem::Struct(dostruct(parser)));
    }
    None
}

/// Parse a storage class specifier, if any.
fn grabclass(parser: &mut Parser) -> Option<Storage> {
    if parser.match_tok(&Tok::Auto).is_some() {
        return Some(Storage::Auto);
    }
    if parser.match_tok(&Tok::Extern).is_some() {
        return Some(Storage::Extern);
    }
    if parser.match_tok(&Tok::Static).is_some() {
        return Some(Storage::Static);
    }
    if parser.match_tok(&Tok::Register).is_some() {
        return Some(Storage::Register);
    }
    None
}

/// Parse a type and storage class, which may appear in either order.
fn typeclass(parser: &mut Parser) -> (Option<TypeElem>, Option<Storage>) {
    if let Some(base) = grabtype(parser) {
        return (Some(base), grabclass(parser));
    }
    let storage = grabclass(parser);
    (grabtype(parser), storage)
}

/// Does this token open a type class?
pub fn starts_typeclass(tok: &Tok) -> bool {
    matches!(
        tok,
        Tok::Int
            | Tok::Char
            | Tok::Float
            | Tok::Double
            | Tok::Struct
            | Tok::Auto
            | Tok::Extern
            | Tok::Static
            | Tok::Register
    )
}

/// Having consumed the `struct` keyword, parse a struct specifier and
/// return its size in bytes.
///
/// The tag is entered into the tag table with size zero before its
/// members are parsed, so self-referential structs resolve; the size
/// is updated in place afterwards.
fn dostruct(parser: &mut Parser) -> u16 {
    let tag = parser
        .match_with(|t| matches!(t, Tok::Name(_)))
        .map(|token| match token.tok {
            Tok::Name(name) => name,
            _ => unreachable!(),
        });
    let has_body = parser.peek().tok == Tok::LBrace;

    if let Some(name) = &tag {
        let existing = parser.tagtab.get(name).cloned();
        match existing {
            Some(sym) if sym.storage != Storage::StructTag => {
                parser.error(format!("tag {} not a struct", name));
                return 0;
            }
            Some(sym) => {
                let size = sym.ty[0].size();
                if !has_body {
                    return size;
                }
                // A redefinition is allowed only as a mere forward
                // reference; a second body is an error.
                if size != 0 {
                    parser.error(format!("redefined struct {}", name));
                }
            }
            None => {
                let placeholder = Symbol::new(name, Storage::StructTag, vec![TypeElem::Struct(0)])
                    .with_val(SymVal::Num(0));
                parser.tagtab.insert(name.clone(), placeholder);
                if !has_body {
                    return 0;
                }
            }
        }
    } else if !has_body {
        parser.error("bad struct specifier");
        return 0;
    }

    parser.need(&Tok::LBrace, "{");
    let mut offset: u16 = 0;
    while parser.match_tok(&Tok::RBrace).is_none() {
        if parser.eoferror() {
            break;
        }
        let before = parser.lex.mark();
        let parsed = specline(parser, true, &mut |parser, item| {
            member(parser, item, &mut offset);
            true
        });
        if !parsed {
            parser.errskip("bad struct member");
        }
        if parser.lex.mark() == before {
            parser.next();
        }
    }

    if let Some(name) = &tag {
        if let Some(sym) = parser.tagtab.get_mut(name) {
            if sym.ty[0].size() == 0 {
                sym.ty = vec![TypeElem::Struct(offset)];
                sym.val = SymVal::Num(i32::from(offset));
            }
        }
    }
    offset
}

/// Record one struct member in the flat tag namespace.
fn member(parser: &mut Parser, item: SpecItem, offset: &mut u16) {
    let mut ty = item.ty;
    normalize_array(&mut ty);
    let size = tysize(&ty);
    match parser.tagtab.get(&item.name) {
        Some(old) if old.storage == Storage::Member => {
            // Matching redeclarations are tolerated; the namespace is
            // flat and headers repeat.
            if old.ty != ty || old.num() != Some(i32::from(*offset)) {
                parser.error_at(item.line, format!("redefined member {}", item.name));
            }
        }
        Some(_) => {
            parser.error_at(item.line, format!("tag {} not a member", item.name));
        }
        None => {
            let sym = Symbol::new(&item.name, Storage::Member, ty)
                .with_val(SymVal::Num(i32::from(*offset)));
            parser.tagtab.insert(item.name.clone(), sym);
        }
    }
    *offset += size;
}

/// Parse one declarator around `base`, returning its name, type
/// string (outermost modifier first) and any parameter names.
fn declarator(parser: &mut Parser, base: TypeElem) -> (Option<String>, TypeString, Vec<String>) {
    let token = parser.match_with(|t| matches!(t, Tok::Star | Tok::LParen | Tok::Name(_)));
    let Some(token) = token else {
        return (None, Vec::new(), Vec::new());
    };

    let (name, mut ty, mut params) = match token.tok {
        Tok::Star => {
            let (name, mut ty, params) = declarator(parser, base);
            ty.insert(0, TypeElem::Point);
            return (name, ty, params);
        }
        Tok::LParen => {
            let inner = declarator(parser, base);
            parser.need(&Tok::RParen, ")");
            inner
        }
        Tok::Name(name) => (Some(name), vec![base], Vec::new()),
        _ => unreachable!(),
    };

    loop {
        if parser.match_tok(&Tok::LParen).is_some() {
            ty.insert(0, TypeElem::Func);
            if parser.match_tok(&Tok::RParen).is_none() {
                loop {
                    let token = parser.next();
                    match token.tok {
                        Tok::Name(param) => params.push(param),
                        _ => {
                            parser.error("missing parameter name");
                            parser.unsee(token);
                        }
                    }
                    if parser.match_tok(&Tok::Comma).is_some() {
                        continue;
                    }
                    parser.need(&Tok::RParen, ")");
                    break;
                }
            }
        } else if parser.match_tok(&Tok::LBracket).is_some() {
            // An unsized array is recorded with count 0 until its
            // context (an initialiser, usually) settles the count.
            let size = if parser.match_tok(&Tok::RBracket).is_some() {
                0
            } else {
                let size = conexpr(parser, true, 1);
                parser.need(&Tok::RBracket, "]");
                size
            };
            ty.insert(0, TypeElem::Array(size));
        } else {
            break;
        }
    }
    (name, ty, params)
}

/// Replace an unsized leading array with a single element, the
/// dialect's default.
fn normalize_array(ty: &mut TypeString) {
    if ty.first() == Some(&TypeElem::Array(0)) {
        ty[0] = TypeElem::Array(1);
    }
}

/// Handle a single line of specifiers, calling `handler` per
/// declarator. A handler returning false stops the line without
/// consuming its terminator (function definitions own the rest).
///
/// Returns false if `need_typeclass` is set and the line doesn't
/// start with one.
pub fn specline(
    parser: &mut Parser,
    need_typeclass: bool,
    handler: &mut dyn FnMut(&mut Parser, SpecItem) -> bool,
) -> bool {
    let (base, storage) = typeclass(parser);
    if base.is_none() && storage.is_none() && need_typeclass {
        return false;
    }
    let base = base.unwrap_or(TypeElem::Int);
    let storage = storage.unwrap_or(if parser.local_scope {
        Storage::Auto
    } else {
        Storage::Extern
    });

    let mut count = 0;
    loop {
        if parser.match_tok(&Tok::Semi).is_some() {
            return true;
        }
        let line = parser.cur_line();
        let (name, ty, params) = declarator(parser, base);
        let Some(name) = name else {
            parser.errskip("missing declarator");
            return true;
        };
        count += 1;
        let item = SpecItem {
            name,
            storage,
            ty,
            params,
            count,
            line,
        };
        if !handler(parser, item) {
            return true;
        }
        if parser.match_tok(&Tok::Comma).is_some() {
            continue;
        }
        if parser.match_tok(&Tok::Semi).is_some() {
            return true;
        }
        parser.errskip("missing ';'");
        return true;
    }
}

/// Process one line of external definitions.
pub fn extdef(parser: &mut Parser) -> bool {
    specline(parser, false, &mut |parser, item| {
        if item.ty.first() == Some(&TypeElem::Func) {
            let next = parser.peek().tok;
            let is_definition = next == Tok::LBrace || starts_typeclass(&next);
            if is_definition {
                if item.count > 1 {
                    parser.errskip("function definition not first element in specifier list");
                } else {
                    funcdef(parser, item);
                }
                return false;
            }
            declare_function(parser, item);
            return true;
        }
        datadef(parser, item);
        true
    })
}

/// Enter a file-scope symbol, tolerating matching redeclarations.
/// Returns false when the name clashes.
fn enter_filescope(parser: &mut Parser, symbol: Symbol) -> bool {
    match parser.symtab.get(&symbol.name) {
        Some(old) if !old.local => {
            if old.storage == symbol.storage && old.ty == symbol.ty {
                true
            } else {
                parser.error(format!("redefined symbol {}", symbol.name));
                false
            }
        }
        _ => {
            parser.symtab.insert(symbol.name.clone(), symbol);
            true
        }
    }
}

/// A file-scope function declaration without a body.
fn declare_function(parser: &mut Parser, item: SpecItem) {
    let symbol = Symbol::new(&item.name, Storage::Extern, item.ty);
    enter_filescope(parser, symbol);
}

/// Handle an external function definition: parameter declaration
/// lines, local declarations, prologue, and the statement body.
fn funcdef(parser: &mut Parser, item: SpecItem) {
    let name = item.name;
    let symbol = Symbol::new(&name, Storage::Extern, item.ty.clone());
    enter_filescope(parser, symbol);

    // Parameters default to int until their declaration lines say
    // otherwise. Scope is local from here on, so bare declarations
    // default to auto storage.
    parser.local_scope = true;
    parser.auto_offset = 0;
    parser.reg_count = 0;

    let mut param_tys: IndexMap<String, TypeString> = item
        .params
        .iter()
        .map(|param| (param.clone(), vec![TypeElem::Int]))
        .collect();

    loop {
        let parsed = specline(parser, true, &mut |parser, item| {
            param_decl(parser, item, &mut param_tys);
            true
        });
        if !parsed {
            break;
        }
    }

    let mut offset = PARAM_OFFSET;
    for (pname, ty) in &param_tys {
        let sym = Symbol::new(pname, Storage::Auto, ty.clone())
            .with_val(SymVal::Num(offset))
            .local();
        parser.define(sym);
        offset += i32::from(tysize(ty));
    }
    let param_bytes = offset - PARAM_OFFSET;

    parser.need(&Tok::LBrace, "{");
    loop {
        let parsed = specline(parser, true, &mut |parser, item| {
            local_decl(parser, item);
            true
        });
        if !parsed {
            break;
        }
    }

    parser.out.goseg(Segment::Text);
    let label = format!("_{}", name);
    parser.out.deflab(&label);
    parser.out.asm(format!(".export {}", label));
    parser.out.asm(format!("useregs {}", parser.reg_count));
    parser
        .out
        .asm(format!(".func {},{}", -parser.auto_offset, param_bytes));

    let ret_floating = item.ty[1..]
        .first()
        .is_some_and(|elem| elem.is_floating());
    while parser.match_tok(&Tok::RBrace).is_none() {
        if parser.eoferror() {
            break;
        }
        stmt::statement(parser, ret_floating);
    }
    parser.out.asm("retnull");

    parser.clear_locals();
    parser.local_scope = false;
}

/// One declarator from a parameter declaration line.
fn param_decl(parser: &mut Parser, item: SpecItem, param_tys: &mut IndexMap<String, TypeString>) {
    if !param_tys.contains_key(&item.name) {
        parser.error_at(item.line, format!("{} is not a parameter", item.name));
        return;
    }
    if item.storage != Storage::Auto {
        parser.error_at(item.line, "bad storage class");
    }
    let mut ty = item.ty;
    match ty.first() {
        Some(TypeElem::Array(_)) => ty[0] = TypeElem::Point,
        Some(TypeElem::Struct(_)) | Some(TypeElem::Func) => {
            parser.error_at(item.line, "bad parameter type");
            return;
        }
        Some(TypeElem::Char) => ty[0] = TypeElem::Int,
        Some(TypeElem::Float) => ty[0] = TypeElem::Double,
        _ => {}
    }
    param_tys.insert(item.name, ty);
}

/// One declarator from a function-local declaration line.
fn local_decl(parser: &mut Parser, item: SpecItem) {
    let mut ty = item.ty;
    normalize_array(&mut ty);
    let mut storage = item.storage;

    // Function-typed locals are declarations of external functions.
    if ty.first() == Some(&TypeElem::Func) {
        storage = Storage::Extern;
    }

    match storage {
        Storage::Auto => {
            let size = i32::from(tysize(&ty));
            parser.auto_offset -= size;
            let sym = Symbol::new(&item.name, Storage::Auto, ty)
                .with_val(SymVal::Num(parser.auto_offset))
                .local();
            parser.define(sym);
        }
        Storage::Register => {
            if parser.reg_count < REGVARS {
                let sym = Symbol::new(&item.name, Storage::Register, ty)
                    .with_val(SymVal::Num(parser.reg_count))
                    .local();
                parser.reg_count += 1;
                parser.define(sym);
            } else {
                // Out of register variables; demote to auto.
                let size = i32::from(tysize(&ty));
                parser.auto_offset -= size;
                let sym = Symbol::new(&item.name, Storage::Auto, ty)
                    .with_val(SymVal::Num(parser.auto_offset))
                    .local();
                parser.define(sym);
            }
        }
        Storage::Static => {
            let label = parser.next_static();
            let size = tysize(&ty);
            parser.out.goseg(Segment::Bss);
            parser.out.deflab(&label);
            parser.out.asm(format!(".ds {}", size));
            let sym = Symbol::new(&item.name, Storage::Static, ty)
                .with_val(SymVal::Label(label))
                .local();
            parser.define(sym);
        }
        Storage::Extern => {
            let sym = Symbol::new(&item.name, Storage::Extern, ty).local();
            parser.define(sym);
        }
        Storage::StructTag | Storage::Member => unreachable!(),
    }
}

/// Handle an external data definition, with an optional initialiser
/// before the `;` or `,`.
fn datadef(parser: &mut Parser, item: SpecItem) {
    let mut ty = item.ty;
    let storage = match item.storage {
        Storage::Extern | Storage::Static => item.storage,
        _ => {
            parser.error_at(item.line, "bad storage class");
            Storage::Extern
        }
    };

    let has_init = !matches!(parser.peek().tok, Tok::Comma | Tok::Semi | Tok::Eof);
    let label = match storage {
        Storage::Extern => format!("_{}", item.name),
        _ => parser.next_static(),
    };

    if has_init {
        parser.out.goseg(Segment::Data);
        parser.out.deflab(&label);
        if storage == Storage::Extern {
            parser.out.asm(format!(".export {}", label));
        }
        let count = initializer(parser, &ty);
        if ty.first() == Some(&TypeElem::Array(0)) {
            ty[0] = TypeElem::Array(count.max(1));
        }
        // Reserve any declared-but-uninitialised tail.
        let elem_size = tysize(if matches!(ty.first(), Some(TypeElem::Array(_))) {
            &ty[1..]
        } else {
            &ty[..]
        });
        let total = tysize(&ty);
        let written = count.wrapping_mul(elem_size);
        if total > written {
            parser.out.asm(format!(".ds {}", total - written));
        }
    } else {
        normalize_array(&mut ty);
        let size = tysize(&ty);
        parser.out.goseg(Segment::Bss);
        match storage {
            Storage::Extern => {
                parser.out.asm(format!(".common {},{}", label, size));
            }
            _ => {
                parser.out.deflab(&label);
                parser.out.asm(format!(".ds {}", size));
            }
        }
    }

    let val = match storage {
        Storage::Extern => SymVal::None,
        _ => SymVal::Label(label),
    };
    let symbol = Symbol::new(&item.name, storage, ty).with_val(val);
    enter_filescope(parser, symbol);
}

/// Parse an initialiser: a single item or a brace-enclosed list.
/// Returns the element count written.
fn initializer(parser: &mut Parser, ty: &[TypeElem]) -> u16 {
    let elem_ty: &[TypeElem] = if matches!(ty.first(), Some(TypeElem::Array(_))) {
        &ty[1..]
    } else {
        ty
    };
    let is_char = elem_ty == [TypeElem::Char];

    let braced = parser.match_tok(&Tok::LBrace).is_some();
    let mut count: u16 = 0;
    loop {
        let node = expression(parser, false);
        match (&node.label, &node.value) {
            (&"con", &LeafValue::Con(value)) => {
                if is_char {
                    parser.out.asm(format!(".dc {}", value & 0xFF));
                } else {
                    parser.out.asm(format!(".dw {}", value));
                }
                count += 1;
            }
            (&"fcon", &LeafValue::FCon(value)) => {
                let bytes = value
                    .to_le_bytes()
                    .iter()
                    .map(|byte| byte.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                parser.out.asm(format!(".dc {}", bytes));
                count += 1;
            }
            (&"string", LeafValue::Str(bytes)) if is_char => {
                for byte in bytes {
                    parser.out.asm(format!(".dc {}", byte));
                }
                count += bytes.len() as u16;
            }
            (&"name", LeafValue::Sym(_)) | (&"addr", _) => {
                let named = if node.label == "addr" {
                    node.kids.first()
                } else {
                    Some(&node)
                };
                match named.map(|n| (&n.label, &n.value)) {
                    Some((&"name", LeafValue::Sym(sym))) => match (&sym.storage, &sym.val) {
                        (Storage::Extern, _) => {
                            parser.out.asm(format!(".dw _{}", sym.name));
                        }
                        (Storage::Static, SymVal::Label(lab)) => {
                            parser.out.asm(format!(".dw {}", lab));
                        }
                        _ => parser.error_at(node.line, "bad initializer"),
                    },
                    _ => parser.error_at(node.line, "bad initializer"),
                }
                count += 1;
            }
            _ => {
                parser.error_at(node.line, "bad initializer");
            }
        }
        if braced && parser.match_tok(&Tok::Comma).is_some() {
            continue;
        }
        if braced {
            parser.need(&Tok::RBrace, "}");
        }
        break;
    }
    count
}
