//! Expression syntax tree.

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Numbers are always `f64`.
    Number(f64),
    /// String literal.
    Str(String),
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `!`
    Not,
    /// `-`
    Neg,
    /// `+`
    Plus,
}

/// Strict binary operators (both sides always evaluated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// Short-circuit operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Literal),
    /// Name resolved against the evaluation scope.
    Ident(String),
    /// `[a, b, ...]`
    Array(Vec<Expr>),
    /// `{key: value, ...}`
    Object(Vec<(String, Expr)>),
    /// Prefix operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Infix operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `&&` / `||`, returning the deciding operand.
    Logical {
        /// Operator.
        op: LogicalOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// `object.property` or `object?.property`.
    Member {
        /// Receiver.
        object: Box<Expr>,
        /// Property name.
        property: String,
        /// Whether `?.` was used.
        optional: bool,
    },
    /// `object[index]` or `object?.[index]`.
    Index {
        /// Receiver.
        object: Box<Expr>,
        /// Key expression.
        index: Box<Expr>,
        /// Whether `?.` was used.
        optional: bool,
    },
    /// `callee(args)` or `callee?.(args)`.
    Call {
        /// Function or method expression.
        callee: Box<Expr>,
        /// Arguments.
        args: Vec<Expr>,
        /// Whether `?.` was used.
        optional: bool,
    },
}

impl Expr {
    /// Whether this node continues an optional chain.
    #[must_use]
    pub fn is_chain_link(&self) -> bool {
        matches!(
            self,
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. }
        )
    }
}
