use std::ops;

/// Elementary scalar functions available in expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Exp,
    Ln,
    Square,
    Sqrt,
    Sigmoid,
    Tanh,
    Sin,
    Cos,
}

/// Expression tree written by the model author and lowered to graph nodes at
/// declaration time. Variables are referenced by name; names are resolved
/// against the declarations made so far.
///
/// ```
/// use pushforward_core::expr::var;
///
/// let y = var("x").exp() + var("x") / 10.0;
/// assert_eq!(y.references(), vec!["x"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(f64),
    Var(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Unary(UnaryFn, Box<Expr>),
    /// `base ^ exponent` with a constant exponent.
    Powf(Box<Expr>, f64),
}

/// Reference to a declared variable.
pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

pub fn constant(value: f64) -> Expr {
    Expr::Const(value)
}

impl Expr {
    fn unary(self, f: UnaryFn) -> Expr {
        Expr::Unary(f, Box::new(self))
    }

    pub fn exp(self) -> Expr {
        self.unary(UnaryFn::Exp)
    }

    pub fn ln(self) -> Expr {
        self.unary(UnaryFn::Ln)
    }

    pub fn square(self) -> Expr {
        self.unary(UnaryFn::Square)
    }

    pub fn sqrt(self) -> Expr {
        self.unary(UnaryFn::Sqrt)
    }

    pub fn sigmoid(self) -> Expr {
        self.unary(UnaryFn::Sigmoid)
    }

    pub fn tanh(self) -> Expr {
        self.unary(UnaryFn::Tanh)
    }

    pub fn sin(self) -> Expr {
        self.unary(UnaryFn::Sin)
    }

    pub fn cos(self) -> Expr {
        self.unary(UnaryFn::Cos)
    }

    pub fn powf(self, exponent: f64) -> Expr {
        Expr::Powf(Box::new(self), exponent)
    }

    /// Names of the variables this expression reads directly, in order of
    /// first appearance and without duplicates.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
            Expr::Neg(a) | Expr::Unary(_, a) | Expr::Powf(a, _) => a.collect_refs(out),
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        var(name)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs))
            }
        }

        impl ops::$trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                Expr::$variant(Box::new(self), Box::new(Expr::Const(rhs)))
            }
        }

        impl ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(Expr::Const(self)), Box::new(rhs))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Sub);
binary_op!(Mul, mul, Mul);
binary_op!(Div, div, Div);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}
