//! Cuts
//!
//! Selection expressions evaluated against the registry for every record,
//! e.g. `(eSumBHCal>=0)&&(abs(hLeadBHCal)<1.1)`.
//!
//! Logical operators produce `1.0` or `0.0` and a record passes when the
//! expression is non-zero. Unset variables read as NaN, so any comparison
//! involving them fails. An empty expression accepts everything.
use crate::errors::CalibrationError;
use crate::registry::VariableRegistry;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Abs,
    Sqrt,
    Log,
    Exp,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<(Function, usize)> {
        match name {
            "abs" | "fabs" | "TMath::Abs" => Some((Function::Abs, 1)),
            "sqrt" | "TMath::Sqrt" => Some((Function::Sqrt, 1)),
            "log" | "TMath::Log" => Some((Function::Log, 1)),
            "exp" | "TMath::Exp" => Some((Function::Exp, 1)),
            "min" | "TMath::Min" => Some((Function::Min, 2)),
            "max" | "TMath::Max" => Some((Function::Max, 2)),
            _ => None,
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Function::Abs => args[0].abs(),
            Function::Sqrt => args[0].sqrt(),
            Function::Log => args[0].ln(),
            Function::Exp => args[0].exp(),
            Function::Min => args[0].min(args[1]),
            Function::Max => args[0].max(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable(usize),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

#[inline]
fn truth(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    fn eval(&self, registry: &VariableRegistry) -> f64 {
        match self {
            Expr::Number(v) => *v,
            Expr::Variable(slot) => registry.get_slot(*slot).unwrap_or(f64::NAN),
            Expr::Not(e) => truth(!is_true(e.eval(registry))),
            Expr::Neg(e) => -e.eval(registry),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(registry);
                let r = || rhs.eval(registry);
                match op {
                    // the right hand side of && and || is only evaluated when needed
                    BinaryOp::And => truth(is_true(l) && is_true(r())),
                    BinaryOp::Or => truth(is_true(l) || is_true(r())),
                    BinaryOp::Lt => truth(l < r()),
                    BinaryOp::Le => truth(l <= r()),
                    BinaryOp::Gt => truth(l > r()),
                    BinaryOp::Ge => truth(l >= r()),
                    BinaryOp::Eq => truth(l == r()),
                    BinaryOp::Ne => truth(l != r()),
                    BinaryOp::Add => l + r(),
                    BinaryOp::Sub => l - r(),
                    BinaryOp::Mul => l * r(),
                    BinaryOp::Div => l / r(),
                }
            }
            Expr::Call(f, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(registry)).collect();
                f.apply(&values)
            }
        }
    }
}

#[inline]
fn is_true(v: f64) -> bool {
    !v.is_nan() && v != 0.0
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(&'static str),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    const OPERATORS: [&str; 15] = [
        "&&", "||", "<=", ">=", "==", "!=", "<", ">", "!", "+", "-", "*", "/", "&", "|",
    ];
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // exponent
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text.parse::<f64>().map_err(|_| format!("bad number {}", text))?;
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            // namespaced function names, e.g. TMath::Abs
            while i + 1 < chars.len() && chars[i] == ':' && chars[i + 1] == ':' {
                i += 2;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
                continue;
            }
            _ => {}
        }
        for op in OPERATORS {
            let len = op.len();
            if i + len <= chars.len() && chars[i..i + len].iter().collect::<String>() == op {
                // single & and | are treated as their logical forms
                let op = match op {
                    "&" => "&&",
                    "|" => "||",
                    o => o,
                };
                tokens.push(Token::Op(op));
                i += len;
                continue 'outer;
            }
        }
        return Err(format!("unexpected character '{}'", c));
    }
    Ok(tokens)
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r VariableRegistry,
}

impl<'r> Parser<'r> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            if ops.contains(&op) {
                self.pos += 1;
                return Some(op);
            }
        }
        None
    }

    fn parse_or(&mut self) -> Result<Expr, CalibrationError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CalibrationError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CalibrationError> {
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.eat_op(&["<", "<=", ">", ">=", "==", "!="]) {
            let rhs = self.parse_additive()?;
            let op = match op {
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                "==" => BinaryOp::Eq,
                _ => BinaryOp::Ne,
            };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, CalibrationError> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.parse_multiplicative()?;
            let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CalibrationError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.parse_unary()?;
            let op = if op == "*" { BinaryOp::Mul } else { BinaryOp::Div };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CalibrationError> {
        if self.eat_op(&["!"]).is_some() {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_op(&["-"]).is_some() {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.eat_op(&["+"]).is_some() {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CalibrationError> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Number(v)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    let (function, arity) = Function::lookup(&name)
                        .ok_or_else(|| self.error(format!("unknown function {}", name)))?;
                    self.pos += 1;
                    let mut args = vec![self.parse_or()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.pos += 1;
                        args.push(self.parse_or()?);
                    }
                    self.expect(Token::RParen)?;
                    if args.len() != arity {
                        return Err(self.error(format!(
                            "{} takes {} argument(s), {} given",
                            name,
                            arity,
                            args.len()
                        )));
                    }
                    Ok(Expr::Call(function, args))
                } else {
                    match name.as_str() {
                        "true" => Ok(Expr::Number(1.0)),
                        "false" => Ok(Expr::Number(0.0)),
                        _ => Ok(Expr::Variable(self.registry.slot(&name)?)),
                    }
                }
            }
            Some(t) => Err(self.error(format!("unexpected token {:?}", t))),
            None => Err(self.error("unexpected end of expression".to_string())),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), CalibrationError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(self.error(format!("expected {:?}, found {:?}", token, other))),
        }
    }

    fn error(&self, msg: String) -> CalibrationError {
        CalibrationError::InvalidCut(String::new(), msg)
    }
}

/// A compiled selection.
#[derive(Debug, Clone)]
pub struct Cut {
    expression: String,
    root: Option<Expr>,
}

impl Cut {
    /// A cut that accepts every record.
    pub fn accept_all() -> Self {
        Cut {
            expression: String::new(),
            root: None,
        }
    }

    /// Compile `expression` against the slots of `registry`.
    ///
    /// Unknown variable names fail here, before any record is processed.
    pub fn compile(expression: &str, registry: &VariableRegistry) -> Result<Self, CalibrationError> {
        if expression.trim().is_empty() {
            return Ok(Cut::accept_all());
        }
        let tokens =
            tokenize(expression).map_err(|msg| CalibrationError::InvalidCut(expression.to_string(), msg))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            registry,
        };
        let root = parser.parse_or().map_err(|e| match e {
            CalibrationError::InvalidCut(_, msg) => CalibrationError::InvalidCut(expression.to_string(), msg),
            other => other,
        })?;
        if parser.pos < parser.tokens.len() {
            return Err(CalibrationError::InvalidCut(
                expression.to_string(),
                format!("trailing input at token {}", parser.pos),
            ));
        }
        Ok(Cut {
            expression: expression.to_string(),
            root: Some(root),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the current record of `registry` passes.
    pub fn passes(&self, registry: &VariableRegistry) -> bool {
        match &self.root {
            None => true,
            Some(root) => is_true(root.eval(registry)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VariableRegistry {
        let mut r = VariableRegistry::new(vec!["eSumBHCal", "eSumBEMC", "hLeadBHCal", "eLeadBEMC"]).unwrap();
        r.set("eSumBHCal", 3.0).unwrap();
        r.set("eSumBEMC", 0.0).unwrap();
        r.set("hLeadBHCal", -0.7).unwrap();
        r.set("eLeadBEMC", 0.8).unwrap();
        r
    }

    #[test]
    fn test_training_cut() {
        let r = registry();
        let cut = Cut::compile(
            "(eSumBHCal>=0)&&(eSumBEMC>=0)&&(abs(hLeadBHCal)<1.1)",
            &r,
        )
        .unwrap();
        assert!(cut.passes(&r));
        let tight = Cut::compile("(eLeadBEMC>0.5)&&(eLeadBEMC<100) && abs(hLeadBHCal) < 0.5", &r).unwrap();
        assert!(!tight.passes(&r));
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let r = registry();
        assert!(Cut::compile("eSumBHCal - 2 * eLeadBEMC > 1.3", &r).unwrap().passes(&r));
        assert!(!Cut::compile("!(eSumBHCal > 1) || eSumBEMC > 0", &r).unwrap().passes(&r));
        assert!(Cut::compile("max(eSumBEMC, eLeadBEMC) == 0.8", &r).unwrap().passes(&r));
        assert!(Cut::compile("1e-3 < eLeadBEMC", &r).unwrap().passes(&r));
        assert!(!Cut::compile("0", &r).unwrap().passes(&r));
    }

    #[test]
    fn test_empty_and_unset() {
        let mut r = registry();
        assert!(Cut::compile("  ", &r).unwrap().passes(&r));
        let cut = Cut::compile("eSumBHCal > 0", &r).unwrap();
        r.reset();
        assert!(!cut.passes(&r));
        assert!(Cut::compile("!(eSumBHCal > 0)", &r).unwrap().passes(&r));
    }

    #[test]
    fn test_compile_errors() {
        let r = registry();
        assert!(matches!(
            Cut::compile("ePar > 0", &r),
            Err(CalibrationError::UnknownVariable(n)) if n == "ePar"
        ));
        assert!(matches!(
            Cut::compile("(eSumBHCal > 0", &r),
            Err(CalibrationError::InvalidCut(e, _)) if e == "(eSumBHCal > 0"
        ));
        assert!(matches!(
            Cut::compile("foo(eSumBHCal)", &r),
            Err(CalibrationError::InvalidCut(_, _))
        ));
        assert!(Cut::compile("eSumBHCal > 0 eSumBEMC", &r).is_err());
    }
}
