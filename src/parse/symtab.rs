//! Symbol and tag tables for the front-end.
//!
//! Two parallel namespaces: the symbol table proper, and the tag table
//! holding struct tags and struct members. Member names live in a
//! single flat namespace, as the dialect requires: a `.` or `->`
//! lookup searches the tag table, not a per-struct member list.

use crate::types::TypeString;

/// Where a symbol's value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Visible across modules.
    Extern,
    /// A file-local label.
    Static,
    /// Stack-relative offset from the frame pointer.
    Auto,
    /// One of the numbered register variables.
    Register,
    /// A struct tag.
    StructTag,
    /// A struct member; the value is its byte offset.
    Member,
}

/// A symbol's value: absent, a number (auto offset, register number,
/// member offset, struct size), or a generated label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymVal {
    None,
    Num(i32),
    Label(String),
}

/// A symbol table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub storage: Storage,
    pub ty: TypeString,
    pub val: SymVal,
    /// Declared inside a function body; swept at function end.
    pub local: bool,
    /// Referenced but not yet defined (forward goto labels).
    pub undefined: bool,
}

impl Symbol {
    pub fn new(name: impl Into<String>, storage: Storage, ty: TypeString) -> Self {
        Symbol {
            name: name.into(),
            storage,
            ty,
            val: SymVal::None,
            local: false,
            undefined: false,
        }
    }

    pub fn with_val(mut self, val: SymVal) -> Self {
        self.val = val;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn undefined(mut self) -> Self {
        self.undefined = true;
        self
    }

    /// The numeric value, if this symbol has one.
    pub fn num(&self) -> Option<i32> {
        match self.val {
            SymVal::Num(n) => Some(n),
            _ => None,
        }
    }

    /// The label value, if this symbol has one.
    pub fn label(&self) -> Option<&str> {
        match &self.val {
            SymVal::Label(lab) => Some(lab),
            _ => None,
        }
    }
}
