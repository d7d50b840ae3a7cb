//! The C6T type system.
//!
//! A type is an ordered sequence of [`TypeElem`]s, outermost modifier
//! first: `int *x[5]` has the type string `[Array(5), Point, Int]`.
//! Only the last element may be a base type; `Point`, `Func` and
//! `Array` compose freely in front of it.

/// A single layer of a C6T type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeElem {
    /// 16-bit signed integer.
    Int,
    /// 8-bit character, widened to `int` in expressions.
    Char,
    /// Single-precision floating point.
    Float,
    /// Double-precision floating point.
    Double,
    /// A structure; carries its size in bytes.
    Struct(u16),
    /// Pointer to the remainder of the type string.
    Point,
    /// Function returning the remainder of the type string.
    Func,
    /// Array; carries its element count.
    Array(u16),
}

impl TypeElem {
    /// The size of this element in bytes, or the element count for an
    /// array.
    pub fn size(self) -> u16 {
        match self {
            TypeElem::Int | TypeElem::Point | TypeElem::Func => 2,
            TypeElem::Char => 1,
            TypeElem::Float => 4,
            TypeElem::Double => 8,
            TypeElem::Struct(size) => size,
            TypeElem::Array(count) => count,
        }
    }

    /// Pointers and arrays both behave as pointers in expressions.
    pub fn is_pointer(self) -> bool {
        matches!(self, TypeElem::Point | TypeElem::Array(_))
    }

    /// `int` and `char` are the integral types.
    pub fn is_integral(self) -> bool {
        matches!(self, TypeElem::Int | TypeElem::Char)
    }

    /// `float` and `double` are the floating types.
    pub fn is_floating(self) -> bool {
        matches!(self, TypeElem::Float | TypeElem::Double)
    }
}

/// An owned type string.
pub type TypeString = Vec<TypeElem>;

/// The size in bytes of a full type string.
///
/// Arrays multiply their count by the size of the rest of the string;
/// every other head element has a fixed size of its own.
pub fn tysize(ty: &[TypeElem]) -> u16 {
    debug_assert!(!ty.is_empty());
    match ty.first() {
        Some(&TypeElem::Array(count)) => count.wrapping_mul(tysize(&ty[1..])),
        Some(&elem) => elem.size(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_sizes() {
        assert_eq!(TypeElem::Int.size(), 2);
        assert_eq!(TypeElem::Char.size(), 1);
        assert_eq!(TypeElem::Float.size(), 4);
        assert_eq!(TypeElem::Double.size(), 8);
        assert_eq!(TypeElem::Point.size(), 2);
        assert_eq!(TypeElem::Func.size(), 2);
        assert_eq!(TypeElem::Struct(10).size(), 10);
    }

    #[test]
    fn string_sizes() {
        // int x[4] -> 8 bytes
        assert_eq!(tysize(&[TypeElem::Array(4), TypeElem::Int]), 8);
        // char c[3][2] -> 6 bytes
        assert_eq!(
            tysize(&[TypeElem::Array(3), TypeElem::Array(2), TypeElem::Char]),
            6
        );
        // int *p[4] -> 8 bytes of pointers
        assert_eq!(
            tysize(&[TypeElem::Array(4), TypeElem::Point, TypeElem::Int]),
            8
        );
        // pointer to array is still 2 bytes
        assert_eq!(
            tysize(&[TypeElem::Point, TypeElem::Array(4), TypeElem::Int]),
            2
        );
    }

    #[test]
    fn predicates() {
        assert!(TypeElem::Point.is_pointer());
        assert!(TypeElem::Array(1).is_pointer());
        assert!(!TypeElem::Int.is_pointer());
        assert!(TypeElem::Char.is_integral());
        assert!(TypeElem::Double.is_floating());
        assert!(!TypeElem::Func.is_floating());
    }
}
