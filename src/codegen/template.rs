//! The JSON-declared template scheme driving instruction selection.
//!
//! Each template names the node label it applies to (optionally with
//! an exact inline value), optional requirements on the children, an
//! action of assembly lines with substitution placeholders, and a
//! register model tag. Templates are tried in declaration order; the
//! first whose predicates all match wins.
//!
//! Placeholders in action lines: `LV`/`RV` are the left/right child's
//! inline value, `V` the node's own value, `R`/`RLOW` the target
//! register pair's high and low letters, `T1`/`T2` fresh temporary
//! labels, and a line consisting of `D1` or `D2` defines the
//! corresponding temporary label at that point.

use core::fmt;

use serde::Deserialize;

use super::node::{N80Value, Node80};

/// A template load/validation error.
#[derive(Debug)]
pub struct SchemeError(pub String);

impl fmt::Display for SchemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template scheme: {}", self.0)
    }
}

impl std::error::Error for SchemeError {}

/// A template's register model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    /// Computes its result only into HL; preserves DE.
    Hl,
    /// Computes its result only into DE; preserves HL.
    De,
    /// Works for either target via the `R`/`RLOW` placeholders.
    Any,
    /// Needs its left operand in HL and its right in DE; result in HL.
    Binary,
    /// Evaluation order is not two subtrees; handled by dedicated code.
    Special,
}

/// A predicate on a node: its label, optionally its exact value.
#[derive(Debug, Clone)]
pub struct Req {
    pub label: String,
    pub value: Option<ReqValue>,
}

#[derive(Debug, Clone)]
pub enum ReqValue {
    Num(i64),
    Name(String),
}

impl Req {
    pub fn matches(&self, node: &Node80) -> bool {
        if self.label != node.label {
            return false;
        }
        match &self.value {
            None => true,
            Some(ReqValue::Num(want)) => node.value == N80Value::Num(*want),
            Some(ReqValue::Name(want)) => {
                matches!(&node.value, N80Value::Name(name) if name == want)
            }
        }
    }
}

/// One instruction-selection template.
#[derive(Debug, Clone)]
pub struct Template {
    pub require: Req,
    pub leftreq: Option<Req>,
    pub rightreq: Option<Req>,
    pub action: Vec<String>,
    pub regs: RegClass,
    pub commutative: bool,
    pub flags: Vec<String>,
}

impl Template {
    /// Do this template's predicates all match `node`?
    pub fn matches(&self, node: &Node80) -> bool {
        if !self.require.matches(node) {
            return false;
        }
        if let Some(req) = &self.leftreq {
            match &node.left {
                Some(left) => {
                    if !req.matches(left) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(req) = &self.rightreq {
            match &node.right {
                Some(right) => {
                    if !req.matches(right) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// The full ordered template set for a target.
#[derive(Debug)]
pub struct Scheme {
    templates: Vec<Template>,
}

const DEFAULT_8080: &str = include_str!("tmpl80.json");

#[derive(Deserialize)]
struct RawTemplate {
    require: Vec<serde_json::Value>,
    #[serde(default)]
    leftreq: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    rightreq: Option<Vec<serde_json::Value>>,
    action: serde_json::Value,
    regs: String,
    #[serde(default)]
    commutative: bool,
    #[serde(default)]
    flags: Vec<String>,
}

fn parse_req(raw: &[serde_json::Value]) -> Result<Req, SchemeError> {
    let label = raw
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| SchemeError("requirement needs a label".into()))?;
    let value = match raw.get(1) {
        None => None,
        Some(v) => Some(match (v.as_i64(), v.as_str()) {
            (Some(num), _) => ReqValue::Num(num),
            (None, Some(name)) => ReqValue::Name(name.to_string()),
            _ => return Err(SchemeError(format!("bad requirement value in {:?}", raw))),
        }),
    };
    if raw.len() > 2 {
        return Err(SchemeError(format!("requirement too long: {:?}", raw)));
    }
    Ok(Req {
        label: label.to_string(),
        value,
    })
}

fn parse_action(raw: &serde_json::Value) -> Result<Vec<String>, SchemeError> {
    if let Some(line) = raw.as_str() {
        return Ok(vec![line.to_string()]);
    }
    let list = raw
        .as_array()
        .ok_or_else(|| SchemeError("action must be a string or list".into()))?;
    list.iter()
        .map(|line| {
            line.as_str()
                .map(str::to_string)
                .ok_or_else(|| SchemeError("action lines must be strings".into()))
        })
        .collect()
}

impl Scheme {
    /// Load a scheme from JSON text.
    pub fn from_json(text: &str) -> Result<Scheme, SchemeError> {
        let raw: Vec<RawTemplate> =
            serde_json::from_str(text).map_err(|err| SchemeError(err.to_string()))?;
        let mut templates = Vec::with_capacity(raw.len());
        for entry in &raw {
            let regs = match entry.regs.as_str() {
                "HL" => RegClass::Hl,
                "DE" => RegClass::De,
                "ANY" => RegClass::Any,
                "BINARY" => RegClass::Binary,
                "SPECIAL" => RegClass::Special,
                other => return Err(SchemeError(format!("bad register model {:?}", other))),
            };
            templates.push(Template {
                require: parse_req(&entry.require)?,
                leftreq: entry.leftreq.as_deref().map(parse_req).transpose()?,
                rightreq: entry.rightreq.as_deref().map(parse_req).transpose()?,
                action: parse_action(&entry.action)?,
                regs,
                commutative: entry.commutative,
                flags: entry.flags.clone(),
            });
        }
        Ok(Scheme { templates })
    }

    /// The built-in Intel 8080 scheme.
    pub fn default_8080() -> Scheme {
        Scheme::from_json(DEFAULT_8080).expect("builtin 8080 template scheme is valid")
    }

    /// Find the first template matching `node` whose register model
    /// satisfies `allowed`, with its declaration index.
    pub fn find(
        &self,
        node: &Node80,
        allowed: impl Fn(RegClass) -> bool,
    ) -> Option<(usize, &Template)> {
        self.templates
            .iter()
            .enumerate()
            .find(|(_, t)| allowed(t.regs) && t.matches(node))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scheme_loads() {
        let scheme = Scheme::default_8080();
        assert!(!scheme.is_empty());
    }

    #[test]
    fn declaration_order_wins() {
        let scheme = Scheme::from_json(
            r#"[
                {"require": ["add"], "rightreq": ["con", 1], "regs": "ANY", "action": "inx R"},
                {"require": ["add"], "regs": "BINARY", "action": "dad d", "commutative": true}
            ]"#,
        )
        .unwrap();
        let one = Node80::leaf("con", N80Value::Num(1));
        let x = Node80::leaf("auto", N80Value::Num(-2));
        let inc = Node80::new("add", Some(x.clone()), Some(one), N80Value::None);
        let (index, t) = scheme.find(&inc, |_| true).unwrap();
        assert_eq!(index, 0);
        assert_eq!(t.regs, RegClass::Any);

        let two = Node80::leaf("con", N80Value::Num(2));
        let sum = Node80::new("add", Some(x), Some(two), N80Value::None);
        let (index, t) = scheme.find(&sum, |_| true).unwrap();
        assert_eq!(index, 1);
        assert_eq!(t.regs, RegClass::Binary);
        assert!(t.commutative);
    }

    #[test]
    fn value_requirements_match_exactly() {
        let req = Req {
            label: "con".into(),
            value: Some(ReqValue::Num(0)),
        };
        assert!(req.matches(&Node80::leaf("con", N80Value::Num(0))));
        assert!(!req.matches(&Node80::leaf("con", N80Value::Num(1))));
        assert!(!req.matches(&Node80::leaf("extern", N80Value::Name("x".into()))));
    }

    #[test]
    fn bad_schemes_are_rejected() {
        assert!(Scheme::from_json("{}").is_err());
        assert!(Scheme::from_json(r#"[{"require": [], "regs": "HL", "action": ""}]"#).is_err());
        assert!(
            Scheme::from_json(r#"[{"require": ["con"], "regs": "XX", "action": ""}]"#).is_err()
        );
    }
}
