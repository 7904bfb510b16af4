use crate::traits::VectorField;
use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};
use std::cell::RefCell;
use std::collections::HashMap;

/// OpCodes for the stack machine that evaluates equation fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant.
    LoadConst(f64),
    /// Pushes a state component of the current column (0 = first variable).
    LoadVar(usize),
    /// Pushes a field parameter.
    LoadParam(usize),
    /// Pushes the evaluation time of the current column.
    LoadTime,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Tanh,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "tanh" => Function::Tanh,
            "exp" => Function::Exp,
            "ln" | "log" => Function::Ln,
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            _ => return None,
        })
    }

    fn apply(self, a: f64) -> f64 {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Tanh => a.tanh(),
            Function::Exp => a.exp(),
            Function::Ln => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
        }
    }
}

/// A compiled sequence of operations for one equation.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stateless evaluator; all context is passed to `execute`.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        t: f64,
        vars: &[f64],
        params: &[f64],
        stack: &mut Vec<f64>,
    ) -> f64 {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack);
                    stack.push(func.apply(a));
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(match op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
            }
        }

        // Compiled expressions always leave exactly one value.
        pop(stack)
    }
}

fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

impl Expr {
    /// Evaluates an expression that references no variables.
    pub fn eval_constant(&self) -> Result<f64> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                _ => bail!("Unknown constant '{}'", name),
            },
            Expr::Neg(inner) => Ok(-inner.eval_constant()?),
            Expr::Call(func, arg) => {
                let func = Function::lookup(func)
                    .ok_or_else(|| anyhow!("Unknown function '{}'", func))?;
                Ok(func.apply(arg.eval_constant()?))
            }
            Expr::Binary(left, op, right) => {
                let a = left.eval_constant()?;
                let b = right.eval_constant()?;
                Ok(match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    _ => a.powf(b),
                })
            }
        }
    }
}

/// A (possibly nested) bracketed array of constant expressions, as used for
/// tableau coefficients: `"[0, 1/5, [3/40, 9/40]]"` or a bare `"1/3"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Scalar(f64),
    List(Vec<Literal>),
}

impl Literal {
    pub fn as_vector(&self) -> Result<Vec<f64>> {
        match self {
            Literal::Scalar(v) => Ok(vec![*v]),
            Literal::List(items) => items
                .iter()
                .map(|item| match item {
                    Literal::Scalar(v) => Ok(*v),
                    Literal::List(_) => bail!("Expected a flat list of numbers"),
                })
                .collect(),
        }
    }

    /// Interprets the literal as rows. A flat list becomes a single row.
    pub fn as_rows(&self) -> Result<Vec<Vec<f64>>> {
        match self {
            Literal::Scalar(v) => Ok(vec![vec![*v]]),
            Literal::List(items) if items.iter().all(|i| matches!(i, Literal::Scalar(_))) => {
                Ok(vec![self.as_vector()?])
            }
            Literal::List(items) => items
                .iter()
                .map(|item| match item {
                    Literal::List(_) => item.as_vector(),
                    Literal::Scalar(_) => bail!("Cannot mix numbers and rows in a matrix"),
                })
                .collect(),
        }
    }
}

pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    parser.expect_end(input)?;
    Ok(expr)
}

pub fn parse_literal(input: &str) -> Result<Literal> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let literal = parser.parse_literal()?;
    parser.expect_end(input)?;
    Ok(literal)
}

/// Parses and evaluates a constant scalar expression such as `"-2187/6784"`.
pub fn eval_constant(input: &str) -> Result<f64> {
    parse(input)?.eval_constant()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E')
                    && !num_str.contains(|ch: char| ch == 'e' || ch == 'E')
                {
                    // Exponent only when followed by a digit or sign.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some(&n) if n.is_ascii_digit() || n == '-' || n == '+' => {
                            num_str.push(d);
                            chars.next();
                            if let Some(&sign) = chars.peek() {
                                if sign == '-' || sign == '+' {
                                    num_str.push(sign);
                                    chars.next();
                                }
                            }
                        }
                        _ => break,
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| anyhow!("Invalid number literal '{}'", num_str))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                _ => bail!("Unexpected character '{}' in '{}'", c, input),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self, input: &str) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => bail!("Unexpected trailing {:?} in '{}'", token, input),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        if let Some(Token::LBracket) = self.peek() {
            self.consume();
            let mut items = Vec::new();
            if let Some(Token::RBracket) = self.peek() {
                self.consume();
                return Ok(Literal::List(items));
            }
            loop {
                items.push(self.parse_literal()?);
                match self.consume() {
                    Some(Token::Comma) => {
                        // Allow a trailing comma before ']'.
                        if let Some(Token::RBracket) = self.peek() {
                            self.consume();
                            break;
                        }
                    }
                    Some(Token::RBracket) => break,
                    _ => bail!("Expected ',' or ']' in array literal"),
                }
            }
            Ok(Literal::List(items))
        } else {
            Ok(Literal::Scalar(self.parse_expression()?.eval_constant()?))
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than '^': -x^2 == -(x^2).
    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if let Some(Token::Plus) = self.peek() {
            self.consume();
            return self.parse_unary();
        }
        self.parse_power()
    }

    // Right associative.
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    match self.consume() {
                        Some(Token::RParen) => Ok(Expr::Call(name, Box::new(arg))),
                        _ => bail!("Expected ')' after argument of {}", name),
                    }
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => bail!("Expected ')'"),
                }
            }
            Some(token) => bail!("Unexpected token {:?}", token),
            None => bail!("Unexpected end of expression"),
        }
    }
}

// --- Compiler ---

/// Resolves names to indices and lowers an AST to bytecode.
///
/// The identifier `t` refers to time unless it is declared as a variable
/// or parameter.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "t" {
                    ops.push(OpCode::LoadTime);
                } else {
                    ops.push(OpCode::LoadConst(expr.eval_constant().map_err(|_| {
                        anyhow!("Unknown variable or parameter: {}", name)
                    })?));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => bail!("Unknown binary operator: {}", op),
                });
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                let func =
                    Function::lookup(func).ok_or_else(|| anyhow!("Unknown function: {}", func))?;
                ops.push(OpCode::Call(func));
            }
        }
        Ok(())
    }
}

// --- ExpressionField ---

/// A vector field defined by one equation string per state variable,
/// evaluated column by column over the batch.
pub struct ExpressionField {
    pub equations: Vec<Bytecode>,
    pub params: Vec<f64>,
    // Reused between evaluations; makes the field !Sync.
    stack: RefCell<Vec<f64>>,
}

impl ExpressionField {
    pub fn new(equations: Vec<Bytecode>, params: Vec<f64>) -> Self {
        Self {
            equations,
            params,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }

    /// Parses and compiles `equations` (dx_i/dt for each name in `var_names`).
    pub fn compile(
        equations: &[String],
        var_names: &[String],
        param_names: &[String],
        params: Vec<f64>,
    ) -> Result<Self> {
        if equations.is_empty() {
            bail!("At least one equation is required.");
        }
        if equations.len() != var_names.len() {
            bail!(
                "Expected one equation per variable ({} variables, {} equations).",
                var_names.len(),
                equations.len()
            );
        }
        if params.len() != param_names.len() {
            bail!(
                "Parameter count mismatch. Expected {}, got {}.",
                param_names.len(),
                params.len()
            );
        }

        let compiler = Compiler::new(var_names, param_names);
        let bytecodes = equations
            .iter()
            .enumerate()
            .map(|(i, source)| {
                let expr = parse(source)
                    .map_err(|e| anyhow!("Equation {} ('{}'): {}", i, source, e))?;
                compiler.compile(&expr)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(bytecodes, params))
    }
}

impl VectorField for ExpressionField {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        let mut stack = self.stack.borrow_mut();
        let dim = self.equations.len();
        let mut out = DMatrix::zeros(dim, state.ncols());
        let mut vars = vec![0.0; state.nrows()];
        for n in 0..state.ncols() {
            for (d, v) in vars.iter_mut().enumerate() {
                *v = state[(d, n)];
            }
            for (i, eq) in self.equations.iter().enumerate() {
                out[(i, n)] = VM::execute(eq, times[n], &vars, &self.params, &mut stack);
            }
        }
        out
    }
}
