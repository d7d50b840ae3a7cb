//! Intel 8080 code generation.
//!
//! Results flow into one of two 16-bit register pairs, HL and DE, with
//! HL the conventional result register and BC reserved as the frame
//! pointer. Generic IR trees are first rewritten into 8080-shaped
//! [`Node80`] trees (compound assignments expand, compares normalise,
//! calls reshape), then matched against the template scheme. The
//! four-case binary evaluation strategy consults the cached
//! Sethi-Ullman counts to avoid pushes and pops where a subtree fits
//! in a register pair.
//!
//! Register discipline: `HL`/`DE`/`ANY` templates preserve the other
//! pair (A is scratch); templates that clobber both pairs are
//! `BINARY`. The evaluation strategy depends on this.

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;

use super::node::{N80Value, Node80};
use super::template::{RegClass, Scheme, Template};
use super::{Atom, CodegenError, Command, IrNode, IrValue, Result};

const SEG_NAMES: [&str; 4] = [".text", ".data", ".string", ".bss"];
const TEXT: usize = 0;
const BSS: usize = 3;

/// An 8080 16-bit operand register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Reg {
    Hl,
    De,
}

impl Reg {
    fn high(self) -> &'static str {
        match self {
            Reg::Hl => "h",
            Reg::De => "d",
        }
    }

    fn low(self) -> &'static str {
        match self {
            Reg::Hl => "l",
            Reg::De => "e",
        }
    }
}

/// Template-driven code generator for the Intel 8080.
pub struct Codegen8080<'a> {
    scheme: &'a Scheme,
    segs: [String; 4],
    cur_seg: usize,
    next_label: usize,
    /// Did the current function's `.func` establish a frame?
    framed: bool,
    use_regs: i64,
    /// Register-fit decisions keyed by node identity and target;
    /// cleared per expression so node identities stay valid.
    fits_cache: HashMap<(usize, Reg), bool>,
}

impl<'a> Codegen8080<'a> {
    pub fn new(scheme: &'a Scheme) -> Self {
        Codegen8080 {
            scheme,
            segs: Default::default(),
            cur_seg: TEXT,
            next_label: 0,
            framed: false,
            use_regs: 0,
            fits_cache: HashMap::new(),
        }
    }

    /// Concatenate the output segments under their directives.
    pub fn finish(self) -> String {
        let mut out = String::new();
        for (name, body) in SEG_NAMES.iter().zip(&self.segs) {
            out.push_str(name);
            out.push('\n');
            out.push_str(body);
        }
        out
    }

    fn asm(&mut self, line: impl AsRef<str>) {
        let seg = &mut self.segs[self.cur_seg];
        seg.push('\t');
        seg.push_str(line.as_ref());
        seg.push('\n');
    }

    /// Define `lab` at the current position of the current segment.
    pub fn deflabel(&mut self, lab: &str) {
        let seg = &mut self.segs[self.cur_seg];
        seg.push_str(lab);
        seg.push(':');
    }

    /// A fresh temporary label, outside the front-end's `L` space.
    fn nextlab(&mut self) -> String {
        self.next_label += 1;
        format!("LL{}", self.next_label)
    }

    fn value_of(&self, value: &IrValue) -> N80Value {
        match value {
            IrValue::None => N80Value::None,
            IrValue::One(Atom::Num(num)) => N80Value::Num(*num),
            IrValue::One(Atom::Name(name)) => N80Value::Name(name.clone()),
            IrValue::One(Atom::Float(num)) => N80Value::Name(num.to_string()),
            IrValue::Many(_) => N80Value::None,
        }
    }

    /// Convert a generic IR tree into 8080 node form.
    fn convert(&mut self, node: &IrNode, line: usize) -> Result<Rc<Node80>> {
        let mut kids = Vec::with_capacity(node.kids.len());
        for kid in &node.kids {
            kids.push(self.convert(kid, line)?);
        }
        let value = self.value_of(&node.value);
        self.rewrite(&node.label, kids, value, line)
    }

    /// Apply the 8080-specific tree rewrites while building a node.
    fn rewrite(
        &mut self,
        label: &str,
        mut kids: Vec<Rc<Node80>>,
        value: N80Value,
        line: usize,
    ) -> Result<Rc<Node80>> {
        match label {
            "register" => {
                let reg = value.num().unwrap_or(0);
                Ok(Node80::leaf("extern", N80Value::Name(format!("reg{}", reg))))
            }
            "load" | "cload" if kids[0].label == "extern" => {
                let sym = kids[0].value.clone();
                let ext = if label == "load" { "extload" } else { "extcload" };
                Ok(Node80::leaf(ext, sym))
            }
            "store" | "cstore" if kids[0].label == "extern" => {
                let sym = kids[0].value.clone();
                let ext = if label == "store" { "extstore" } else { "extcstore" };
                let rhs = kids.swap_remove(1);
                Ok(Node80::new(ext, Some(rhs), None, sym))
            }
            _ if label.starts_with("asn") || label.starts_with("casn") => {
                self.expand_asn(label, kids, line)
            }
            "equ" => {
                let diff = self.rewrite("sub", kids, N80Value::None, line)?;
                self.rewrite("lognot", vec![diff], N80Value::None, line)
            }
            "nequ" => {
                let diff = self.rewrite("sub", kids, N80Value::None, line)?;
                self.rewrite("log", vec![diff], N80Value::None, line)
            }
            "fequ" | "fnequ" => {
                let right = kids.pop().unwrap();
                let left = kids.pop().unwrap();
                let cmp = Node80::new("fcmp", Some(left), Some(right), N80Value::None);
                let logop = if label == "fequ" { "lognot" } else { "log" };
                self.rewrite(logop, vec![cmp], N80Value::None, line)
            }
            "fless" | "fgreat" | "flequ" | "fgequ" => {
                let right = kids.pop().unwrap();
                let left = kids.pop().unwrap();
                let cmp = Node80::new("fcmp", Some(left), Some(right), N80Value::None);
                let zero = Node80::leaf("con", N80Value::Num(0));
                Ok(Node80::new(&label[1..], Some(cmp), Some(zero), N80Value::None))
            }
            "sub" => {
                if let (Some(a), Some(b)) = (kids[0].con(), kids[1].con()) {
                    return Ok(con_leaf(a.wrapping_sub(b)));
                }
                if let Some(k) = kids[1].con() {
                    let neg = con_leaf(k.wrapping_neg());
                    let left = kids.swap_remove(0);
                    return self.rewrite("add", vec![left, neg], N80Value::None, line);
                }
                Ok(Node80::new(
                    "sub",
                    Some(kids.remove(0)),
                    Some(kids.remove(0)),
                    N80Value::None,
                ))
            }
            "add" => {
                if let (Some(a), Some(b)) = (kids[0].con(), kids[1].con()) {
                    return Ok(con_leaf(a.wrapping_add(b)));
                }
                // Keep constants on the right so the inx/dcx and
                // immediate templates can see them.
                if kids[0].con().is_some() && kids[1].con().is_none() {
                    kids.swap(0, 1);
                }
                if kids[1].con() == Some(0) {
                    return Ok(kids.swap_remove(0));
                }
                Ok(Node80::new(
                    "add",
                    Some(kids.remove(0)),
                    Some(kids.remove(0)),
                    N80Value::None,
                ))
            }
            "lognot" => {
                let kid = kids.swap_remove(0);
                match kid.label.as_str() {
                    // Truth values collapse: !!!x is !x.
                    "lognot" => Ok(kid),
                    "log" => Ok(Node80::new(
                        "lognot",
                        kid.left.clone(),
                        None,
                        N80Value::None,
                    )),
                    "brz" => Ok(Node80::new(
                        "bnz",
                        kid.left.clone(),
                        kid.right.clone(),
                        kid.value.clone(),
                    )),
                    "bnz" => Ok(Node80::new(
                        "brz",
                        kid.left.clone(),
                        kid.right.clone(),
                        kid.value.clone(),
                    )),
                    _ => Ok(Node80::new("lognot", Some(kid), None, N80Value::None)),
                }
            }
            "log" => {
                let kid = kids.swap_remove(0);
                match kid.label.as_str() {
                    "lognot" | "log" => Ok(kid),
                    _ => Ok(Node80::new("log", Some(kid), None, N80Value::None)),
                }
            }
            "logand" | "logor" => {
                let lab = self.nextlab();
                let branch = if label == "logand" { "brz" } else { "bnz" };
                let right = kids.pop().unwrap();
                let left = kids.pop().unwrap();
                let tail = Node80::new(
                    "comma",
                    Some(right),
                    Some(Node80::leaf("label", N80Value::Name(lab.clone()))),
                    N80Value::None,
                );
                let chain =
                    self.rewrite(branch, vec![left], N80Value::Name(lab), line)?;
                let chain = Node80::new(
                    chain.label.clone(),
                    chain.left.clone(),
                    Some(tail),
                    chain.value.clone(),
                );
                self.rewrite("log", vec![chain], N80Value::None, line)
            }
            "brz" | "bnz" => {
                let mut label = label;
                let mut kid = kids.remove(0);
                loop {
                    match kid.label.as_str() {
                        "log" => {
                            let inner = kid.left.clone().ok_or_else(|| {
                                CodegenError::new(line, "log without operand")
                            })?;
                            kid = inner;
                        }
                        "lognot" => {
                            label = if label == "brz" { "bnz" } else { "brz" };
                            let inner = kid.left.clone().ok_or_else(|| {
                                CodegenError::new(line, "lognot without operand")
                            })?;
                            kid = inner;
                        }
                        _ => break,
                    }
                }
                let rest = kids.pop();
                Ok(Node80::new(label, Some(kid), rest, value))
            }
            "postinc" | "postdec" | "preinc" | "predec" | "cpostinc" | "cpostdec" | "cpreinc"
            | "cpredec" => {
                let step = kids[1]
                    .con()
                    .ok_or_else(|| CodegenError::new(line, "bad increment step"))?;
                let addr = kids.swap_remove(0);
                Ok(Node80::new(
                    label,
                    Some(addr),
                    None,
                    N80Value::Num(i64::from(step)),
                ))
            }
            "call" => {
                let argc = value.num().unwrap_or(0);
                let func = kids
                    .pop()
                    .ok_or_else(|| CodegenError::new(line, "call without function"))?;
                let mut chain: Option<Rc<Node80>> = None;
                for arg in kids.into_iter().rev() {
                    chain = Some(Node80::new("comma", Some(arg), chain, N80Value::None));
                }
                Ok(Node80::new(
                    "call",
                    Some(func),
                    chain,
                    N80Value::Num(argc),
                ))
            }
            "cond" => {
                let other = kids.pop().unwrap();
                let then = kids.pop().unwrap();
                let test = kids.pop().unwrap();
                let colon = Node80::new("colon", Some(then), Some(other), N80Value::None);
                Ok(Node80::new("cond", Some(test), Some(colon), N80Value::None))
            }
            _ => match kids.len() {
                0 => Ok(Node80::leaf(label, value)),
                1 => Ok(Node80::new(label, Some(kids.swap_remove(0)), None, value)),
                2 => {
                    let right = kids.pop().unwrap();
                    let left = kids.pop().unwrap();
                    Ok(Node80::new(label, Some(left), Some(right), value))
                }
                _ => Err(CodegenError::new(
                    line,
                    format!("bad child count for {}", label),
                )),
            },
        }
    }

    /// Expand a compound assignment into store(lhs, op(load(lhs), rhs)).
    fn expand_asn(
        &mut self,
        label: &str,
        mut kids: Vec<Rc<Node80>>,
        line: usize,
    ) -> Result<Rc<Node80>> {
        let (is_char, op) = if let Some(op) = label.strip_prefix("casn") {
            (true, op)
        } else {
            (false, label.strip_prefix("asn").unwrap())
        };
        let rhs = kids.pop().unwrap();
        let addr = kids.pop().unwrap();
        let loaded = if addr.label == "extern" {
            let ext = if is_char { "extcload" } else { "extload" };
            Node80::leaf(ext, addr.value.clone())
        } else {
            let load = if is_char { "cload" } else { "load" };
            Node80::new(load, Some(addr.clone()), None, N80Value::None)
        };
        let result = self.rewrite(op, vec![loaded, rhs], N80Value::None, line)?;
        if addr.label == "extern" {
            let ext = if is_char { "extcstore" } else { "extstore" };
            Ok(Node80::new(ext, Some(result), None, addr.value.clone()))
        } else {
            let store = if is_char { "cstore" } else { "store" };
            Ok(Node80::new(store, Some(addr), Some(result), N80Value::None))
        }
    }

    /// Evaluate an IR tree, leaving its result in HL.
    fn eval(&mut self, node: &IrNode, line: usize) -> Result<()> {
        let converted = self.convert(node, line)?;
        self.fits_cache.clear();
        trace!(
            "eval {} regs_used={}",
            converted.label,
            converted.regs_used
        );
        self.asmnode(&converted, Reg::Hl, line)
    }

    fn test_reg(&mut self, reg: Reg) {
        self.asm(format!("mov a,{}", reg.low()));
        self.asm(format!("ora {}", reg.high()));
    }

    /// Assemble `node` into the target register.
    fn asmnode(&mut self, node: &Rc<Node80>, targ: Reg, line: usize) -> Result<()> {
        match node.label.as_str() {
            "brz" | "bnz" => {
                let kid = node
                    .left
                    .as_ref()
                    .ok_or_else(|| CodegenError::new(line, "branch without operand"))?;
                self.asmnode(kid, targ, line)?;
                self.test_reg(targ);
                let opcode = if node.label == "brz" { "jz" } else { "jnz" };
                self.asm(format!("{} {}", opcode, node.value.render()));
                if let Some(rest) = &node.right {
                    self.asmnode(rest, targ, line)?;
                }
                Ok(())
            }
            "label" => {
                let lab = node.value.render();
                self.deflabel(&lab);
                if let Some(kid) = &node.left {
                    self.asmnode(kid, targ, line)?;
                }
                Ok(())
            }
            "comma" => {
                if let Some(left) = &node.left {
                    self.asmnode(left, targ, line)?;
                }
                if let Some(right) = &node.right {
                    self.asmnode(right, targ, line)?;
                }
                Ok(())
            }
            "cond" => {
                let colon = node
                    .right
                    .as_ref()
                    .filter(|n| n.label == "colon")
                    .ok_or_else(|| CodegenError::new(line, "bad conditional shape"))?;
                let lab_false = self.nextlab();
                let lab_end = self.nextlab();
                let test = node.left.as_ref().unwrap();
                self.asmnode(test, targ, line)?;
                self.test_reg(targ);
                self.asm(format!("jz {}", lab_false));
                self.asmnode(colon.left.as_ref().unwrap(), targ, line)?;
                self.asm(format!("jmp {}", lab_end));
                self.deflabel(&lab_false);
                self.asmnode(colon.right.as_ref().unwrap(), targ, line)?;
                self.deflabel(&lab_end);
                Ok(())
            }
            "call" => {
                if targ != Reg::Hl {
                    return Err(CodegenError::new(line, "call into alternate register"));
                }
                // Collect the argument chain, then push right-to-left.
                let mut args = Vec::new();
                let mut chain = node.right.clone();
                while let Some(link) = chain {
                    if let Some(arg) = &link.left {
                        args.push(arg.clone());
                    }
                    chain = link.right.clone();
                }
                for arg in args.iter().rev() {
                    self.asmnode(arg, Reg::Hl, line)?;
                    self.asm("push h");
                }
                let func = node.left.as_ref().unwrap();
                if func.label == "extern" {
                    self.asm(format!("call {}", func.value.render()));
                } else {
                    self.asmnode(func, Reg::Hl, line)?;
                    self.asm("call ccall");
                }
                if !args.is_empty() {
                    // Drop the arguments, preserving the result.
                    self.asm("xchg");
                    self.asm(format!("lxi h,{}", args.len() * 2));
                    self.asm("dad sp");
                    self.asm("sphl");
                    self.asm("xchg");
                }
                Ok(())
            }
            _ => self.asmnode_template(node, targ, line),
        }
    }

    fn allowed_for(targ: Reg) -> impl Fn(RegClass) -> bool {
        move |regs| match targ {
            Reg::Hl => matches!(regs, RegClass::Hl | RegClass::Any | RegClass::Binary),
            Reg::De => matches!(regs, RegClass::De | RegClass::Any),
        }
    }

    fn asmnode_template(&mut self, node: &Rc<Node80>, targ: Reg, line: usize) -> Result<()> {
        let found = self.scheme.find(node, Self::allowed_for(targ));
        let Some((index, template)) = found else {
            return Err(CodegenError::new(
                line,
                format!("no template for {} into {:?}", node.label, targ),
            ));
        };
        trace!("template {} for {}", index, node.label);
        if template.regs == RegClass::Binary {
            return self.eval_binary(node, template, targ, line);
        }
        if let Some(left) = &node.left {
            if template.leftreq.is_none() {
                self.asmnode(left, targ, line)?;
            }
        }
        if node.right.is_some() && template.rightreq.is_none() {
            return Err(CodegenError::new(
                line,
                format!("template for {} cannot take a right operand", node.label),
            ));
        }
        self.emit_action(template, node, targ);
        Ok(())
    }

    /// The four-case strategy for a two-register template.
    fn eval_binary(
        &mut self,
        node: &Rc<Node80>,
        template: &Template,
        targ: Reg,
        line: usize,
    ) -> Result<()> {
        if targ != Reg::Hl {
            return Err(CodegenError::new(line, "binary template into DE"));
        }
        let left = node.left.clone();
        let right = node.right.clone();

        // Operands the template consumes inline need no evaluation.
        let left_inline = template.leftreq.is_some();
        let right_inline = template.rightreq.is_some() || right.is_none();

        if right_inline {
            if let (Some(left), false) = (&left, left_inline) {
                self.asmnode(left, Reg::Hl, line)?;
            }
            self.emit_action(template, node, targ);
            return Ok(());
        }
        let left = left.ok_or_else(|| CodegenError::new(line, "binary node without left"))?;
        let right = right.unwrap();

        if self.fits(&right, Reg::De) {
            self.asmnode(&left, Reg::Hl, line)?;
            self.asmnode(&right, Reg::De, line)?;
        } else if template.commutative && self.fits(&left, Reg::De) {
            self.asmnode(&right, Reg::Hl, line)?;
            self.asmnode(&left, Reg::De, line)?;
        } else if self.fits(&right, Reg::Hl) && self.fits(&left, Reg::Hl) {
            self.asmnode(&right, Reg::Hl, line)?;
            self.asm("xchg");
            self.asmnode(&left, Reg::Hl, line)?;
        } else {
            // Full spill: right first, through the stack.
            self.asmnode(&right, Reg::Hl, line)?;
            self.asm("push h");
            self.asmnode(&left, Reg::Hl, line)?;
            self.asm("pop d");
        }
        self.emit_action(template, node, targ);
        Ok(())
    }

    /// Can `node` be evaluated into `reg` with single-register
    /// templates only (no spills, other pair preserved)?
    fn fits(&mut self, node: &Rc<Node80>, reg: Reg) -> bool {
        let key = (node.key(), reg);
        if let Some(&known) = self.fits_cache.get(&key) {
            return known;
        }
        let fits = self.fits_uncached(node, reg);
        self.fits_cache.insert(key, fits);
        fits
    }

    fn fits_uncached(&mut self, node: &Rc<Node80>, reg: Reg) -> bool {
        let allowed = move |regs| match reg {
            Reg::Hl => matches!(regs, RegClass::Hl | RegClass::Any),
            Reg::De => matches!(regs, RegClass::De | RegClass::Any),
        };
        let Some((_, template)) = self.scheme.find(node, allowed) else {
            return false;
        };
        if node.right.is_some() && template.rightreq.is_none() {
            return false;
        }
        if let Some(left) = &node.left {
            if template.leftreq.is_none() && !self.fits(left, reg) {
                return false;
            }
        }
        true
    }

    /// Emit a template's action with placeholder substitution.
    fn emit_action(&mut self, template: &Template, node: &Rc<Node80>, targ: Reg) {
        let mut temp1: Option<String> = None;
        let mut temp2: Option<String> = None;
        let left = node
            .left
            .as_ref()
            .map(|n| n.value.render())
            .unwrap_or_default();
        let right = node
            .right
            .as_ref()
            .map(|n| n.value.render())
            .unwrap_or_default();
        let own = node.value.render();
        for line in &template.action {
            if line == "D1" {
                let lab = fresh(&mut temp1, || self.nextlab());
                self.deflabel(&lab);
                continue;
            }
            if line == "D2" {
                let lab = fresh(&mut temp2, || self.nextlab());
                self.deflabel(&lab);
                continue;
            }
            if line.contains("T1") {
                fresh(&mut temp1, || self.nextlab());
            }
            if line.contains("T2") {
                fresh(&mut temp2, || self.nextlab());
            }
            let subs: [(&str, &str); 7] = [
                ("RLOW", targ.low()),
                ("LV", &left),
                ("RV", &right),
                ("T1", temp1.as_deref().unwrap_or("")),
                ("T2", temp2.as_deref().unwrap_or("")),
                ("R", targ.high()),
                ("V", &own),
            ];
            let text = substitute(line, &subs);
            self.asm(text);
        }
    }

    fn pop_node(stack: &mut Vec<IrNode>, line: usize, cmd: &str) -> Result<IrNode> {
        stack
            .pop()
            .ok_or_else(|| CodegenError::new(line, format!("missing node for {}", cmd)))
    }

    fn node_arg(node: &IrNode) -> String {
        match &node.value {
            IrValue::One(atom) => atom.to_string(),
            _ => String::new(),
        }
    }

    /// Framed functions return through the frame-teardown helper;
    /// frameless ones through the plain return.
    fn emit_return(&mut self) {
        let target = if self.framed { "cretf" } else { "cret" };
        self.asm(format!("jmp {}", target));
    }

    /// Run one bare IR command.
    pub fn command(
        &mut self,
        command: &Command,
        stack: &mut Vec<IrNode>,
        line: usize,
    ) -> Result<()> {
        let args = &command.args;
        match command.cmd.as_str() {
            ".text" | ".data" | ".string" | ".bss" => {
                self.cur_seg = SEG_NAMES
                    .iter()
                    .position(|name| *name == command.cmd)
                    .unwrap();
                Ok(())
            }
            ".common" => {
                if args.len() != 2 {
                    return Err(CodegenError::new(line, "bad .common"));
                }
                let text = format!("\t.common {},{}\n", args[0], args[1]);
                self.segs[BSS].push_str(&text);
                Ok(())
            }
            ".export" => {
                let names = args
                    .iter()
                    .map(|arg| arg.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                self.asm(format!(".export {}", names));
                Ok(())
            }
            ".dc" | ".dw" => {
                let pseudo = if command.cmd == ".dc" { ".byte" } else { ".word" };
                let values = args
                    .iter()
                    .map(|arg| arg.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                self.asm(format!("{} {}", pseudo, values));
                Ok(())
            }
            ".ds" => {
                let count = args
                    .first()
                    .and_then(Atom::num)
                    .ok_or_else(|| CodegenError::new(line, "bad .ds"))?;
                self.asm(format!(".storage {},0", count));
                Ok(())
            }
            "useregs" => {
                self.use_regs = args.first().and_then(Atom::num).unwrap_or(0);
                Ok(())
            }
            ".func" => {
                let locals = args.first().and_then(Atom::num).unwrap_or(0);
                let params = args.get(1).and_then(Atom::num).unwrap_or(0);
                self.framed = locals > 0 || params > 0 || self.use_regs > 0;
                if self.framed {
                    self.asm("push b");
                    for reg in 0..crate::parse::REGVARS {
                        self.asm(format!("lhld reg{}", reg));
                        self.asm("push h");
                    }
                    self.asm("lxi h,0");
                    self.asm("dad sp");
                    self.asm("mov c,l");
                    self.asm("mov b,h");
                    if locals > 0 {
                        self.asm(format!("lxi h,-{}", locals));
                        self.asm("dad sp");
                        self.asm("sphl");
                    }
                }
                Ok(())
            }
            "eval" => {
                let node = Self::pop_node(stack, line, "eval")?;
                self.eval(&node, line)
            }
            "brz" => {
                let target = args
                    .first()
                    .and_then(Atom::name)
                    .ok_or_else(|| CodegenError::new(line, "brz without target"))?
                    .to_string();
                let node = Self::pop_node(stack, line, "brz")?;
                let converted = self.convert(&node, line)?;
                let wrapped =
                    self.rewrite("brz", vec![converted], N80Value::Name(target), line)?;
                self.fits_cache.clear();
                self.asmnode(&wrapped, Reg::Hl, line)
            }
            "jmp" => {
                let target = args
                    .first()
                    .ok_or_else(|| CodegenError::new(line, "jmp without target"))?;
                self.asm(format!("jmp {}", target));
                Ok(())
            }
            "ijmp" => {
                let node = Self::pop_node(stack, line, "ijmp")?;
                self.eval(&node, line)?;
                self.asm("pchl");
                Ok(())
            }
            "doswitch" => {
                let table = Self::pop_node(stack, line, "doswitch")?;
                let count = Self::pop_node(stack, line, "doswitch")?;
                let default = Self::pop_node(stack, line, "doswitch")?;
                let value = Self::pop_node(stack, line, "doswitch")?;
                self.eval(&value, line)?;
                self.asm(format!("lxi d,{}", Self::node_arg(&table)));
                self.asm("push d");
                self.asm(format!("lxi d,{}", Self::node_arg(&count)));
                self.asm("push d");
                self.asm(format!("lxi d,{}", Self::node_arg(&default)));
                self.asm("push d");
                self.asm("jmp cswitch");
                Ok(())
            }
            "ret" | "fret" => {
                let node = Self::pop_node(stack, line, &command.cmd)?;
                self.eval(&node, line)?;
                self.emit_return();
                Ok(())
            }
            "retnull" => {
                self.emit_return();
                Ok(())
            }
            other => Err(CodegenError::new(
                line,
                format!("unsupported command {}", other),
            )),
        }
    }
}

impl Node80 {
    /// The 16-bit value of a `con` leaf.
    fn con(&self) -> Option<u16> {
        if self.label == "con" {
            self.value.num().map(|num| num as u16)
        } else {
            None
        }
    }
}

fn con_leaf(value: u16) -> Rc<Node80> {
    Node80::leaf("con", N80Value::Num(i64::from(value)))
}

fn fresh(slot: &mut Option<String>, make: impl FnOnce() -> String) -> String {
    if slot.is_none() {
        *slot = Some(make());
    }
    slot.clone().unwrap()
}

/// Replace placeholder tokens in an action line. Replacement text is
/// never rescanned, so symbol names containing placeholder letters
/// pass through intact. Keys are tried in order at each position, so
/// longer spellings must precede their prefixes.
fn substitute(line: &str, subs: &[(&str, &str)]) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    'scan: while i < bytes.len() {
        for (key, value) in subs {
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
