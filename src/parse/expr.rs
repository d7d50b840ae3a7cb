//! Expression parsing and the typed node builder.
//!
//! Operator precedence is a classical 15-level recursive descent, one
//! function per level. Every node built carries a computed type
//! string; [`build`] applies the dialect's implicit conversions
//! (array/function decay, float promotion, pointer scaling), checks
//! lvalue requirements, and folds constant subtrees eagerly.

use crate::lex::{Tok, Token};
use crate::types::{tysize, TypeElem, TypeString};
use crate::word;

use super::symtab::{Storage, SymVal, Symbol};
use super::Parser;

/// A leaf node's value.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    None,
    /// An integer constant.
    Con(u16),
    /// A floating constant.
    FCon(f64),
    /// A resolved symbol reference.
    Sym(Symbol),
    /// A string literal's bytes.
    Str(Vec<u8>),
}

/// An expression node. Non-leaf nodes have children; leaves carry a
/// value.
#[derive(Debug, Clone)]
pub struct Node {
    pub label: &'static str,
    pub line: usize,
    pub ty: TypeString,
    pub kids: Vec<Node>,
    pub value: LeafValue,
}

impl Node {
    pub fn new(label: &'static str, line: usize, ty: TypeString, kids: Vec<Node>) -> Self {
        Node {
            label,
            line,
            ty,
            kids,
            value: LeafValue::None,
        }
    }

    pub fn con(line: usize, value: u16) -> Self {
        Node {
            label: "con",
            line,
            ty: vec![TypeElem::Int],
            kids: Vec::new(),
            value: LeafValue::Con(value),
        }
    }

    fn leaf(label: &'static str, line: usize, ty: TypeString, value: LeafValue) -> Self {
        Node {
            label,
            line,
            ty,
            kids: Vec::new(),
            value,
        }
    }

    /// The label sets an lvalue may have.
    pub fn is_lvalue(&self) -> bool {
        matches!(self.label, "deref" | "name" | "dot" | "arrow")
    }

    /// The constant value of a `con` leaf.
    pub fn con_value(&self) -> Option<u16> {
        match self.value {
            LeafValue::Con(value) if self.label == "con" => Some(value),
            _ => None,
        }
    }

    fn floating(&self) -> bool {
        self.ty[0].is_floating()
    }

    fn pointer(&self) -> bool {
        self.ty[0].is_pointer()
    }
}

/// The assignment operators.
pub const ASSIGNS: &[&str] = &[
    "assign", "asnadd", "asnsub", "asnmult", "asndiv", "asnmod", "asnrshift", "asnlshift",
    "asnand", "asneor", "asnor",
];

/// The comparison operators.
pub const COMPARES: &[&str] = &[
    "equ", "nequ", "less", "great", "lequ", "gequ", "uless", "ugreat", "ulequ", "ugequ",
];

/// Operators that require their first operand to be an lvalue.
fn needs_lvalue(label: &str) -> bool {
    ASSIGNS.contains(&label)
        || matches!(label, "preinc" | "postinc" | "predec" | "postdec" | "dot" | "addr")
}

/// Operators whose operands are left entirely unconverted.
fn no_conversions(label: &str) -> bool {
    matches!(
        label,
        "comma" | "logor" | "logand" | "postinc" | "preinc" | "postdec" | "predec"
    )
}

/// Operators that accept floating operands directly.
fn floating_ok(label: &str) -> bool {
    matches!(label, "add" | "sub" | "mult" | "div" | "neg")
        || COMPARES.contains(&label)
        || matches!(label, "assign" | "cond" | "call" | "toflt" | "toint" | "fret")
}

/// Operators foldable when every child is a `con` leaf.
fn foldable(label: &str) -> bool {
    matches!(
        label,
        "add" | "sub" | "mult" | "div" | "mod" | "and" | "or" | "eor" | "lshift" | "rshift"
            | "neg" | "compl"
    )
}

fn fold(parser: &mut Parser, node: Node) -> Node {
    if !foldable(node.label) || node.kids.iter().any(|kid| kid.con_value().is_none()) {
        return node;
    }
    let a = u32::from(node.kids[0].con_value().unwrap());
    let b = node
        .kids
        .get(1)
        .and_then(Node::con_value)
        .map(u32::from)
        .unwrap_or(0);
    let result = match node.label {
        "add" => a.wrapping_add(b),
        "sub" => a.wrapping_sub(b),
        "mult" => a.wrapping_mul(b),
        "div" | "mod" => {
            if b == 0 {
                parser.error_at(node.line, "divide by zero");
                return Node::con(node.line, 0);
            }
            if node.label == "div" {
                a / b
            } else {
                a % b
            }
        }
        "and" => a & b,
        "or" => a | b,
        "eor" => a ^ b,
        "lshift" => {
            if b >= 16 {
                0
            } else {
                a << b
            }
        }
        "rshift" => {
            if b >= 16 {
                0
            } else {
                a >> b
            }
        }
        "neg" => a.wrapping_neg(),
        "compl" => !a,
        _ => unreachable!(),
    };
    Node::con(node.line, word(result as i64))
}

/// Wrap `kid` in an address-of node of pointer type, for array and
/// function decay.
fn decay(kid: Node) -> Node {
    let pointee: TypeString = match kid.ty.first() {
        Some(TypeElem::Array(_)) => kid.ty[1..].to_vec(),
        _ => kid.ty.clone(),
    };
    let mut ty = vec![TypeElem::Point];
    ty.extend_from_slice(&pointee);
    let line = kid.line;
    Node::new("addr", line, ty, vec![kid])
}

fn wrap_toflt(kid: Node) -> Node {
    let line = kid.line;
    Node::new("toflt", line, vec![TypeElem::Double], vec![kid])
}

fn wrap_toint(kid: Node) -> Node {
    let line = kid.line;
    Node::new("toint", line, vec![TypeElem::Int], vec![kid])
}

/// Construct a new node, applying the dialect's typing rules.
///
/// With a `None` label this just unwraps the single operand; callers
/// use that form to finish an expression.
pub fn build(
    parser: &mut Parser,
    line: usize,
    label: Option<&'static str>,
    mut kids: Vec<Node>,
) -> Node {
    let Some(mut label) = label else {
        return kids.swap_remove(0);
    };

    if label == "sizeof" {
        let size = tysize(&kids[0].ty);
        return Node::con(kids[0].line, size);
    }

    // Normalise inc/dec to two children: the lvalue and a constant
    // step, the pointee size when the operand is a pointer.
    if matches!(label, "preinc" | "postinc" | "predec" | "postdec") && kids.len() == 1 {
        let step = if kids[0].pointer() {
            tysize(&kids[0].ty[1..])
        } else {
            1
        };
        kids.push(Node::con(line, step));
    }

    if !no_conversions(label) && label != "addr" {
        for kid in &mut kids {
            match kid.ty.first() {
                Some(TypeElem::Array(_)) if kid.label != "addr" => {
                    let taken = core::mem::replace(kid, Node::con(line, 0));
                    *kid = decay(taken);
                }
                Some(TypeElem::Func) => {
                    let taken = core::mem::replace(kid, Node::con(line, 0));
                    *kid = decay(taken);
                }
                _ => {}
            }
        }
    }

    if needs_lvalue(label) && !kids[0].is_lvalue() {
        parser.error_at(line, "illegal lvalue");
    }

    // Floating operands: promote where the operator allows them,
    // diagnose where it does not.
    let any_float = kids.iter().any(Node::floating);
    if any_float {
        if !floating_ok(label) {
            parser.error_at(line, "illegal operation for floating type");
        } else if label == "assign" {
            let lhs_float = kids[0].floating();
            let rhs = kids.pop().unwrap();
            let rhs = if lhs_float && !rhs.floating() {
                wrap_toflt(rhs)
            } else if !lhs_float && rhs.floating() {
                wrap_toint(rhs)
            } else {
                rhs
            };
            kids.push(rhs);
        } else if kids.len() == 2 && label != "call" {
            for kid in &mut kids {
                if !kid.floating() {
                    let taken = core::mem::replace(kid, Node::con(line, 0));
                    *kid = wrap_toflt(taken);
                }
            }
        }
    }

    // Pointer arithmetic: scale the non-pointer operand by the size of
    // the pointee.
    if matches!(label, "add" | "sub") && kids.len() == 2 && !any_float {
        let scale = match (kids[0].pointer(), kids[1].pointer()) {
            (true, false) => Some((1, tysize(&kids[0].ty[1..]))),
            (false, true) => Some((0, tysize(&kids[1].ty[1..]))),
            _ => None,
        };
        if let Some((which, size)) = scale {
            if size != 1 {
                let operand = kids[which].clone();
                let scaled = fold(
                    parser,
                    Node::new(
                        "mult",
                        line,
                        vec![TypeElem::Int],
                        vec![operand, Node::con(line, size)],
                    ),
                );
                kids[which] = scaled;
            }
        }
    }

    // Pointer comparisons are unsigned.
    if kids.iter().any(Node::pointer) {
        label = match label {
            "less" => "uless",
            "great" => "ugreat",
            "lequ" => "ulequ",
            "gequ" => "ugequ",
            other => other,
        };
    }

    let ty = result_type(parser, line, label, &kids);

    // addr and deref cancel. A decay-produced addr does not cancel
    // with deref: its type is pointer-to-element, not
    // pointer-to-operand, and the deref must survive to denote the
    // element lvalue.
    if label == "deref" && kids[0].label == "addr" {
        let inner = &kids[0].kids[0];
        let mut true_addr = vec![TypeElem::Point];
        true_addr.extend_from_slice(&inner.ty);
        if kids[0].ty == true_addr {
            return kids.swap_remove(0).kids.swap_remove(0);
        }
    }
    if label == "addr" && kids[0].label == "deref" {
        return kids.swap_remove(0).kids.swap_remove(0);
    }

    let mut node = Node::new(label, line, ty, kids);
    node = fold(parser, node);
    node
}

/// Compute a node's result type from its label and converted operands.
fn result_type(parser: &mut Parser, line: usize, label: &str, kids: &[Node]) -> TypeString {
    if ASSIGNS.contains(&label) {
        return kids[0].ty.clone();
    }
    if COMPARES.contains(&label) || matches!(label, "logand" | "logor" | "lognot") {
        return vec![TypeElem::Int];
    }
    match label {
        "call" => {
            let mut ty = kids[0].ty.as_slice();
            if ty.first() == Some(&TypeElem::Point) {
                ty = &ty[1..];
            }
            if ty.first() == Some(&TypeElem::Func) {
                ty = &ty[1..];
            } else {
                parser.error_at(line, "call of non-function");
                return vec![TypeElem::Int];
            }
            ty.to_vec()
        }
        "cond" => {
            let then = &kids[1];
            let other = &kids[2];
            if then.ty == other.ty {
                then.ty.clone()
            } else if then.floating() || other.floating() {
                vec![TypeElem::Double]
            } else if then.pointer() {
                then.ty.clone()
            } else if other.pointer() {
                other.ty.clone()
            } else {
                vec![TypeElem::Int]
            }
        }
        "deref" => {
            if kids[0].pointer() {
                kids[0].ty[1..].to_vec()
            } else {
                parser.error_at(line, "bad indirection");
                vec![TypeElem::Int]
            }
        }
        "addr" => {
            let mut ty = vec![TypeElem::Point];
            ty.extend_from_slice(&kids[0].ty);
            ty
        }
        "dot" | "arrow" => kids[1].ty.clone(),
        "comma" => kids[1].ty.clone(),
        "toflt" => vec![TypeElem::Double],
        "toint" => vec![TypeElem::Int],
        _ => match kids.len() {
            0 => vec![TypeElem::Int],
            1 => kids[0].ty.clone(),
            _ => {
                if kids.iter().any(Node::floating) {
                    vec![TypeElem::Double]
                } else if let Some(ptr) = kids.iter().find(|kid| kid.pointer()) {
                    ptr.ty.clone()
                } else {
                    vec![TypeElem::Int]
                }
            }
        },
    }
}

/// Parse an expression; commas act as operators unless `see_commas`
/// is off (argument and initialiser contexts).
pub fn expression(parser: &mut Parser, see_commas: bool) -> Node {
    let node = if see_commas {
        exp15(parser)
    } else {
        exp14(parser)
    };
    let line = node.line;
    build(parser, line, None, vec![node])
}

/// Parse an expression that must fold to an integer constant.
pub fn conexpr(parser: &mut Parser, see_commas: bool, default: u16) -> u16 {
    let node = expression(parser, see_commas);
    match node.con_value() {
        Some(value) => value,
        None => {
            parser.error_at(node.line, "bad constant expression");
            default
        }
    }
}

fn binary(
    parser: &mut Parser,
    lesser: fn(&mut Parser) -> Node,
    table: &[(Tok, &'static str)],
) -> Node {
    let mut node = lesser(parser);
    loop {
        let Some((line, label)) = parser.match_any(table) else {
            return node;
        };
        let rhs = lesser(parser);
        node = build(parser, line, Some(label), vec![node, rhs]);
    }
}

/// Level 15: the comma operator.
fn exp15(parser: &mut Parser) -> Node {
    binary(parser, exp14, &[(Tok::Comma, "comma")])
}

/// Level 14: assignment operators, right associative.
fn exp14(parser: &mut Parser) -> Node {
    let node = exp13(parser);
    let table: &[(Tok, &'static str)] = &[
        (Tok::Assign, "assign"),
        (Tok::AsnAdd, "asnadd"),
        (Tok::AsnSub, "asnsub"),
        (Tok::AsnMul, "asnmult"),
        (Tok::AsnDiv, "asndiv"),
        (Tok::AsnMod, "asnmod"),
        (Tok::AsnRsh, "asnrshift"),
        (Tok::AsnLsh, "asnlshift"),
        (Tok::AsnAnd, "asnand"),
        (Tok::AsnXor, "asneor"),
        (Tok::AsnOr, "asnor"),
    ];
    if let Some((line, label)) = parser.match_any(table) {
        let rhs = exp14(parser);
        return build(parser, line, Some(label), vec![node, rhs]);
    }
    node
}

/// Level 13: the conditional operator.
fn exp13(parser: &mut Parser) -> Node {
    let mut node = exp12(parser);
    while parser.match_tok(&Tok::Quest).is_some() {
        let line = parser.cur_line();
        let then = exp12(parser);
        parser.need(&Tok::Colon, ":");
        let other = exp12(parser);
        node = build(parser, line, Some("cond"), vec![node, then, other]);
    }
    node
}

fn exp12(parser: &mut Parser) -> Node {
    binary(parser, exp11, &[(Tok::OrOr, "logor")])
}

fn exp11(parser: &mut Parser) -> Node {
    binary(parser, exp10, &[(Tok::AndAnd, "logand")])
}

fn exp10(parser: &mut Parser) -> Node {
    binary(parser, exp9, &[(Tok::Or, "or")])
}

fn exp9(parser: &mut Parser) -> Node {
    binary(parser, exp8, &[(Tok::Xor, "eor")])
}

fn exp8(parser: &mut Parser) -> Node {
    binary(parser, exp7, &[(Tok::And, "and")])
}

fn exp7(parser: &mut Parser) -> Node {
    binary(parser, exp6, &[(Tok::EqEq, "equ"), (Tok::Neq, "nequ")])
}

fn exp6(parser: &mut Parser) -> Node {
    binary(
        parser,
        exp5,
        &[
            (Tok::Lt, "less"),
            (Tok::Gt, "great"),
            (Tok::Le, "lequ"),
            (Tok::Ge, "gequ"),
        ],
    )
}

fn exp5(parser: &mut Parser) -> Node {
    binary(parser, exp4, &[(Tok::Shr, "rshift"), (Tok::Shl, "lshift")])
}

fn exp4(parser: &mut Parser) -> Node {
    binary(parser, exp3, &[(Tok::Plus, "add"), (Tok::Minus, "sub")])
}

fn exp3(parser: &mut Parser) -> Node {
    binary(
        parser,
        exp2,
        &[
            (Tok::Star, "mult"),
            (Tok::Slash, "div"),
            (Tok::Percent, "mod"),
        ],
    )
}

/// Level 2: unary prefix operators, then postfix inc/dec.
fn exp2(parser: &mut Parser) -> Node {
    let table: &[(Tok, &'static str)] = &[
        (Tok::And, "addr"),
        (Tok::Minus, "neg"),
        (Tok::Not, "lognot"),
        (Tok::Tilde, "compl"),
        (Tok::PlusPlus, "preinc"),
        (Tok::MinusMinus, "predec"),
        (Tok::Sizeof, "sizeof"),
        (Tok::Star, "deref"),
    ];
    if let Some((line, label)) = parser.match_any(table) {
        let operand = exp2(parser);
        return build(parser, line, Some(label), vec![operand]);
    }
    let mut node = exp1(parser);
    loop {
        let table: &[(Tok, &'static str)] =
            &[(Tok::PlusPlus, "postinc"), (Tok::MinusMinus, "postdec")];
        let Some((line, label)) = parser.match_any(table) else {
            return node;
        };
        node = build(parser, line, Some(label), vec![node]);
    }
}

/// Perform a `.` or `->` operation against the flat member namespace.
fn domember(parser: &mut Parser, line: usize, node: Node, label: &'static str, member: &str) -> Node {
    let tag = match parser.tagtab.get(member) {
        Some(tag) => tag.clone(),
        None => {
            parser.error_at(line, format!("undefined member tag {}", member));
            return node;
        }
    };
    if tag.storage != Storage::Member {
        parser.error_at(line, format!("tag {} not a member", member));
        return node;
    }
    let offset = tag.num().unwrap_or(0) as u16;
    let member_leaf = Node::leaf("member", line, tag.ty.clone(), LeafValue::Con(offset));
    build(parser, line, Some(label), vec![node, member_leaf])
}

/// Level 1: primary expressions and their postfix forms.
fn exp1(parser: &mut Parser) -> Node {
    let token = parser.match_with(|t| {
        matches!(
            t,
            Tok::Name(_) | Tok::Con(_) | Tok::FCon(_) | Tok::Str(_) | Tok::LParen
        )
    });
    let token = match token {
        Some(token) => token,
        None => {
            parser.errskip("missing primary expression");
            Token {
                tok: Tok::Con(1),
                line: parser.cur_line(),
            }
        }
    };

    let mut node = match token.tok {
        Tok::Name(name) => {
            let symbol = match parser.symtab.get(&name) {
                Some(symbol) => symbol.clone(),
                None => {
                    let symbol = if parser.peek().tok == Tok::LParen {
                        // An implicit function: extern returning int.
                        Symbol::new(&name, Storage::Extern, vec![TypeElem::Func, TypeElem::Int])
                            .local()
                    } else {
                        // Assume a forward goto label until defined.
                        let label = parser.next_static();
                        Symbol::new(
                            &name,
                            Storage::Static,
                            vec![TypeElem::Array(1), TypeElem::Int],
                        )
                        .with_val(SymVal::Label(label))
                        .local()
                        .undefined()
                    };
                    parser.symtab.insert(name.clone(), symbol.clone());
                    symbol
                }
            };
            Node::leaf("name", token.line, symbol.ty.clone(), LeafValue::Sym(symbol))
        }
        Tok::Con(value) => Node::con(token.line, value),
        Tok::FCon(value) => Node::leaf(
            "fcon",
            token.line,
            vec![TypeElem::Double],
            LeafValue::FCon(value),
        ),
        Tok::Str(bytes) => {
            let len = bytes.len() as u16;
            Node::leaf(
                "string",
                token.line,
                vec![TypeElem::Array(len), TypeElem::Char],
                LeafValue::Str(bytes),
            )
        }
        Tok::LParen => {
            let node = exp15(parser);
            parser.need(&Tok::RParen, ")");
            node
        }
        _ => unreachable!(),
    };

    loop {
        let token = parser.match_with(|t| {
            matches!(t, Tok::LParen | Tok::LBracket | Tok::Dot | Tok::Arrow)
        });
        let Some(token) = token else {
            return node;
        };
        match token.tok {
            Tok::LParen => {
                let mut kids = vec![node];
                if parser.match_tok(&Tok::RParen).is_none() {
                    loop {
                        kids.push(exp14(parser));
                        if parser.match_tok(&Tok::Comma).is_some() {
                            continue;
                        }
                        parser.need(&Tok::RParen, ")");
                        break;
                    }
                }
                node = build(parser, token.line, Some("call"), kids);
            }
            Tok::LBracket => {
                let index = exp15(parser);
                parser.need(&Tok::RBracket, "]");
                let sum = build(parser, token.line, Some("add"), vec![node, index]);
                node = build(parser, token.line, Some("deref"), vec![sum]);
            }
            Tok::Dot | Tok::Arrow => {
                let label = if token.tok == Tok::Arrow { "arrow" } else { "dot" };
                match parser.need_name("missing member name") {
                    Some((member, line)) => {
                        node = domember(parser, line, node, label, &member);
                    }
                    None => return node,
                }
            }
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> (Node, Parser<'_>) {
        let mut parser = Parser::new(source);
        let node = expression(&mut parser, true);
        (node, parser)
    }

    #[test]
    fn folds_constants() {
        let (node, parser) = parse_one("1+2*3");
        assert!(parser.diags.is_empty());
        assert_eq!(node.con_value(), Some(7));
    }

    #[test]
    fn folding_wraps_words() {
        let (node, _) = parse_one("65535+2");
        assert_eq!(node.con_value(), Some(1));
        let (node, _) = parse_one("-1");
        assert_eq!(node.con_value(), Some(0xFFFF));
        let (node, _) = parse_one("1<<20");
        assert_eq!(node.con_value(), Some(0));
    }

    #[test]
    fn sizeof_folds() {
        let (node, _) = parse_one("sizeof 1");
        assert_eq!(node.con_value(), Some(2));
    }

    #[test]
    fn precedence_tree_shape() {
        // a = b + c*d parses as assign(a, add(b, mult(c, d))).
        let (node, parser) = parse_one("a = b + c*d");
        // Names default to forward labels; diagnostics stay clean.
        assert!(parser.diags.is_empty());
        assert_eq!(node.label, "assign");
        assert_eq!(node.kids[1].label, "add");
        assert_eq!(node.kids[1].kids[1].label, "mult");
    }

    #[test]
    fn conditional_types_to_common_branch() {
        let (node, _) = parse_one("a ? 1 : 2");
        assert_eq!(node.label, "cond");
        assert_eq!(node.ty, vec![TypeElem::Int]);
    }

    #[test]
    fn every_node_is_typed() {
        fn check(node: &Node) {
            assert!(!node.ty.is_empty());
            node.kids.iter().for_each(check);
        }
        let (node, _) = parse_one("a = b[2] + f(1, 2) * 3");
        check(&node);
    }

    #[test]
    fn lvalue_violation_is_diagnosed() {
        let (_, parser) = parse_one("1 = 2");
        assert_eq!(parser.diags.count(), 1);
    }

    #[test]
    fn float_promotion() {
        let (node, _) = parse_one("1 + 2.0");
        assert_eq!(node.label, "add");
        assert_eq!(node.ty, vec![TypeElem::Double]);
        assert_eq!(node.kids[0].label, "toflt");
    }

    #[test]
    fn float_bitwise_is_illegal() {
        let (_, parser) = parse_one("1.5 & 2");
        assert_eq!(parser.diags.count(), 1);
    }

    #[test]
    fn string_is_char_array() {
        let (node, _) = parse_one("\"hi\"");
        assert_eq!(node.ty, vec![TypeElem::Array(3), TypeElem::Char]);
    }

    #[test]
    fn conexpr_rejects_nonconstant() {
        let mut parser = Parser::new("a+1");
        let value = conexpr(&mut parser, true, 7);
        assert_eq!(value, 7);
        assert_eq!(parser.diags.count(), 1);
    }
}
