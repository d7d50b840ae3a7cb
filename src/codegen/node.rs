//! The backend's internal node format.
//!
//! Unlike the n-ary IR nodes, backend nodes are binary trees tailored
//! to the two 16-bit operand register pairs. Nodes are immutable and
//! shared through `Rc`; the template matcher caches decisions keyed by
//! node identity, which both properties uphold. The Sethi-Ullman
//! register count is computed once at construction and never mutated.

use std::rc::Rc;

/// A backend node's inline value.
#[derive(Debug, Clone, PartialEq)]
pub enum N80Value {
    None,
    Num(i64),
    Name(String),
}

impl N80Value {
    pub fn num(&self) -> Option<i64> {
        match self {
            N80Value::Num(value) => Some(*value),
            _ => None,
        }
    }

    /// Render the value as assembly operand text.
    pub fn render(&self) -> String {
        match self {
            N80Value::None => String::new(),
            N80Value::Num(value) => value.to_string(),
            N80Value::Name(name) => name.clone(),
        }
    }
}

/// An immutable backend node.
#[derive(Debug)]
pub struct Node80 {
    pub label: String,
    pub left: Option<Rc<Node80>>,
    pub right: Option<Rc<Node80>>,
    pub value: N80Value,
    /// The minimum register count to evaluate this subtree without
    /// spilling: `max(left, right)`, plus one when the children tie.
    pub regs_used: u32,
}

impl Node80 {
    pub fn new(
        label: impl Into<String>,
        left: Option<Rc<Node80>>,
        right: Option<Rc<Node80>>,
        value: N80Value,
    ) -> Rc<Node80> {
        let regs_used = match (&left, &right) {
            (Some(l), Some(r)) => {
                if l.regs_used == r.regs_used {
                    l.regs_used + 1
                } else {
                    l.regs_used.max(r.regs_used)
                }
            }
            (Some(l), None) => l.regs_used,
            (None, Some(r)) => r.regs_used,
            (None, None) => 1,
        };
        Rc::new(Node80 {
            label: label.into(),
            left,
            right,
            value,
            regs_used,
        })
    }

    pub fn leaf(label: impl Into<String>, value: N80Value) -> Rc<Node80> {
        Node80::new(label, None, None, value)
    }

    /// Identity key for the matcher cache.
    pub fn key(self: &Rc<Self>) -> usize {
        Rc::as_ptr(self) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regs_used_is_sethi_ullman() {
        let a = Node80::leaf("con", N80Value::Num(1));
        let b = Node80::leaf("con", N80Value::Num(2));
        assert_eq!(a.regs_used, 1);

        // Equal children tie-break upwards.
        let sum = Node80::new("add", Some(a.clone()), Some(b.clone()), N80Value::None);
        assert_eq!(sum.regs_used, 2);

        // Unequal children take the max.
        let c = Node80::leaf("con", N80Value::Num(3));
        let wide = Node80::new("add", Some(sum.clone()), Some(c), N80Value::None);
        assert_eq!(wide.regs_used, 2);

        // A unary layer never raises the count.
        let load = Node80::new("load", Some(wide.clone()), None, N80Value::None);
        assert_eq!(load.regs_used, 2);

        assert!(wide.regs_used >= sum.regs_used);
    }
}
