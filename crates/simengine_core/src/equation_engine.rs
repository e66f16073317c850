//! A small expression language for writing models without generated code.
//!
//! Expressions are parsed to an AST, compiled to stack bytecode against the
//! model's names, and executed by a stateless VM once per equation per
//! derivative evaluation. Names resolve in the order: the time variable `t`,
//! states, inputs, parameters.

use crate::config::SimulationConfig;
use crate::error::{EquationError, FlowError};
use crate::traits::{ModelFlows, ModelIo, Scalar};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;

/// OpCodes for the Stack-based Virtual Machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the current simulation time.
    LoadTime,
    /// Pushes the value of a state variable (by index).
    LoadState(usize),
    /// Pushes the current value of an input (by input identifier).
    LoadInput(usize),
    /// Pushes the value of a parameter (by index).
    LoadParam(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    Sin,
    Cos,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
    /// Pops top value (a), pushes -a.
    Neg,
}

impl OpCode {
    /// Net change in stack depth, and the depth the op needs to run.
    fn stack_effect(self) -> (isize, usize) {
        match self {
            OpCode::LoadConst(_)
            | OpCode::LoadTime
            | OpCode::LoadState(_)
            | OpCode::LoadInput(_)
            | OpCode::LoadParam(_) => (1, 0),
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => (-1, 2),
            _ => (0, 1),
        }
    }
}

/// A verified sequence of operations that leaves exactly one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    ops: Vec<OpCode>,
    max_depth: usize,
}

impl Bytecode {
    pub fn new(ops: Vec<OpCode>) -> Result<Self, EquationError> {
        let mut depth = 0usize;
        let mut max_depth = 0usize;
        for op in &ops {
            let (delta, needs) = op.stack_effect();
            if depth < needs {
                return Err(EquationError::Malformed("stack underflow"));
            }
            depth = depth.saturating_add_signed(delta);
            max_depth = max_depth.max(depth);
        }
        if depth != 1 {
            return Err(EquationError::Malformed("expression must leave exactly one value"));
        }
        Ok(Self { ops, max_depth })
    }

    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Values visible to one execution.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a, T> {
    pub t: T,
    pub states: &'a [T],
    pub inputs: &'a [T],
    pub params: &'a [T],
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes the bytecode, the values it may
/// load, and a scratch stack. Out-of-range loads read as NaN.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, frame: &Frame<'_, T>, stack: &mut Vec<T>) -> T {
        stack.clear();
        let load = |values: &[T], idx: usize| values.get(idx).copied().unwrap_or_else(T::nan);

        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(val) => T::lit(val),
                OpCode::LoadTime => frame.t,
                OpCode::LoadState(idx) => load(frame.states, idx),
                OpCode::LoadInput(idx) => load(frame.inputs, idx),
                OpCode::LoadParam(idx) => load(frame.params, idx),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    // Depth was verified when the bytecode was built.
                    let b = stack.pop().unwrap_or_else(T::nan);
                    let a = stack.pop().unwrap_or_else(T::nan);
                    match op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    }
                }
                unary => {
                    let a = stack.pop().unwrap_or_else(T::nan);
                    match unary {
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Exp => a.exp(),
                        OpCode::Log => a.ln(),
                        OpCode::Sqrt => a.sqrt(),
                        OpCode::Tanh => a.tanh(),
                        OpCode::Abs => a.abs(),
                        _ => -a,
                    }
                }
            };
            stack.push(value);
        }

        stack.pop().unwrap_or_else(T::nan)
    }
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Where a name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Time,
    State(usize),
    Input(usize),
    Param(usize),
}

/// Compiles an AST (`Expr`) into `Bytecode`, resolving names to indices.
#[derive(Debug, Clone)]
pub struct Compiler {
    names: HashMap<String, Slot>,
}

impl Compiler {
    pub fn new<S: AsRef<str>>(
        states: &[S],
        inputs: &[S],
        params: &[S],
    ) -> Result<Self, EquationError> {
        let mut names = HashMap::new();
        names.insert("t".to_string(), Slot::Time);
        let groups: [(&[S], fn(usize) -> Slot); 3] =
            [(states, Slot::State), (inputs, Slot::Input), (params, Slot::Param)];
        for (group, slot) in groups {
            for (i, name) in group.iter().enumerate() {
                let name = name.as_ref();
                if names.insert(name.to_string(), slot(i)).is_some() {
                    return Err(EquationError::DuplicateName(name.to_string()));
                }
            }
        }
        Ok(Self { names })
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EquationError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Bytecode::new(ops)
    }

    /// Parses and compiles in one go.
    pub fn compile_str(&self, source: &str) -> Result<Bytecode, EquationError> {
        self.compile(&parse(source)?)
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EquationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let op = match self.names.get(name) {
                    Some(Slot::Time) => OpCode::LoadTime,
                    Some(&Slot::State(idx)) => OpCode::LoadState(idx),
                    Some(&Slot::Input(idx)) => OpCode::LoadInput(idx),
                    Some(&Slot::Param(idx)) => OpCode::LoadParam(idx),
                    None => return Err(EquationError::UnknownName(name.clone())),
                };
                ops.push(op);
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
                    other => return Err(EquationError::UnexpectedChar(*other)),
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    other => return Err(EquationError::UnexpectedChar(*other)),
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "log" | "ln" => OpCode::Log,
                    "sqrt" => OpCode::Sqrt,
                    "tanh" => OpCode::Tanh,
                    "abs" => OpCode::Abs,
                    _ => return Err(EquationError::UnknownFunction(func.clone())),
                });
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, EquationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(EquationError::Syntax(format!("unexpected {token:?} after expression"))),
    }
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
}

fn tokenize(input: &str) -> Result<Vec<Token>, EquationError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(&c) = chars.get(pos) {
        if c.is_whitespace() {
            pos += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = pos;
            while chars.get(pos).is_some_and(|d| d.is_ascii_digit() || *d == '.') {
                pos += 1;
            }
            // exponent: 1e-3, 2.5E+4
            if matches!(chars.get(pos), Some('e' | 'E')) {
                let sign = usize::from(matches!(chars.get(pos + 1), Some('+' | '-')));
                if chars.get(pos + 1 + sign).is_some_and(char::is_ascii_digit) {
                    pos += 1 + sign;
                    while chars.get(pos).is_some_and(char::is_ascii_digit) {
                        pos += 1;
                    }
                }
            }
            let text: String = chars[start..pos].iter().collect();
            let value = text.parse().map_err(|_| EquationError::InvalidNumber(text))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = pos;
            while chars.get(pos).is_some_and(|d| d.is_alphanumeric() || *d == '_') {
                pos += 1;
            }
            tokens.push(Token::Identifier(chars[start..pos].iter().collect()));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(EquationError::UnexpectedChar(other)),
            });
            pos += 1;
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

    fn expect_rparen(&mut self) -> Result<(), EquationError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(EquationError::Syntax("expected ')'".to_string())),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, EquationError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // -x^2 is -(x^2)
    fn parse_unary(&mut self) -> Result<Expr, EquationError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    /// Right-associative: 2^3^2 is 2^(3^2).
    fn parse_power(&mut self) -> Result<Expr, EquationError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EquationError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(EquationError::Syntax(format!("unexpected {token:?}"))),
            None => Err(EquationError::Syntax("unexpected end of expression".to_string())),
        }
    }
}

// --- EquationModel ---

thread_local! {
    // VM stack reused by every evaluation on this thread.
    static SCRATCH: RefCell<Box<dyn Any>> = RefCell::new(Box::new(()));
}

/// Runs `f` with this thread's evaluation stack for scalar type `T`.
fn with_stack<T: Scalar, R>(f: impl FnOnce(&mut Vec<T>) -> R) -> R {
    SCRATCH.with(|cell| {
        let mut guard = cell.borrow_mut();
        let scratch: &mut dyn Any = &mut **guard;
        if !scratch.is::<Vec<T>>() {
            *guard = Box::new(Vec::<T>::new());
        }
        match guard.downcast_mut::<Vec<T>>() {
            Some(stack) => f(stack),
            None => f(&mut Vec::new()),
        }
    })
}

/// A model whose flows are compiled expressions, one per state, plus
/// optional output expressions written on the first evaluation of each step.
#[derive(Debug, Clone)]
pub struct EquationModel<T> {
    state_names: Vec<String>,
    equations: Vec<Bytecode>,
    output_names: Vec<String>,
    outputs: Vec<Bytecode>,
    params: Vec<T>,
    max_depth: usize,
}

impl<T: Scalar> EquationModel<T> {
    pub fn builder() -> EquationModelBuilder {
        EquationModelBuilder::default()
    }

    /// Compiles the flows, outputs and parameters declared in `config`.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, EquationError> {
        let mut builder = Self::builder().inputs(config.input_names());
        for state in &config.states {
            let flow = state
                .flow
                .as_deref()
                .ok_or_else(|| EquationError::MissingFlow(state.name.clone()))?;
            builder = builder.state(&state.name, flow);
        }
        for (name, value) in &config.parameters {
            builder = builder.param(name, *value);
        }
        for output in &config.outputs {
            builder = builder.output(&output.name, &output.value);
        }
        builder.build()
    }

    pub fn state_names(&self) -> &[String] {
        &self.state_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn params(&self) -> &[T] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [T] {
        &mut self.params
    }
}

impl<T: Scalar> ModelFlows<T> for EquationModel<T> {
    fn state_count(&self) -> usize {
        self.equations.len()
    }

    fn output_count(&self) -> usize {
        self.outputs.len()
    }

    fn flows(
        &self,
        t: T,
        y: &[T],
        dydt: &mut [T],
        io: &mut ModelIo<'_, T>,
    ) -> Result<(), FlowError> {
        let frame = Frame {
            t,
            states: y,
            inputs: io.inputs,
            params: &self.params,
        };
        with_stack(|stack: &mut Vec<T>| {
            stack.reserve(self.max_depth);
            for (out, eq) in dydt.iter_mut().zip(&self.equations) {
                *out = VM::execute(eq, &frame, stack);
            }
            if io.first_iteration {
                for (out, eq) in io.outputs.iter_mut().zip(&self.outputs) {
                    *out = VM::execute(eq, &frame, stack);
                }
            }
        });
        Ok(())
    }
}

/// Collects names and expression sources; everything is compiled in
/// [`EquationModelBuilder::build`] once all names are known.
#[derive(Debug, Clone, Default)]
pub struct EquationModelBuilder {
    states: Vec<(String, String)>,
    inputs: Vec<String>,
    params: Vec<(String, f64)>,
    outputs: Vec<(String, String)>,
}

impl EquationModelBuilder {
    pub fn state(mut self, name: impl Into<String>, flow: impl Into<String>) -> Self {
        self.states.push((name.into(), flow.into()));
        self
    }

    /// Input names in input-identifier order.
    pub fn inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.push((name.into(), value.into()));
        self
    }

    pub fn build<T: Scalar>(self) -> Result<EquationModel<T>, EquationError> {
        let state_names: Vec<String> = self.states.iter().map(|(name, _)| name.clone()).collect();
        let param_names: Vec<String> = self.params.iter().map(|(name, _)| name.clone()).collect();
        let compiler = Compiler::new(&state_names[..], &self.inputs[..], &param_names[..])?;

        let equations = self
            .states
            .iter()
            .map(|(_, source)| compiler.compile_str(source))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|(_, source)| compiler.compile_str(source))
            .collect::<Result<Vec<_>, _>>()?;
        let max_depth = equations
            .iter()
            .chain(&outputs)
            .map(Bytecode::max_depth)
            .max()
            .unwrap_or(0);

        Ok(EquationModel {
            state_names,
            equations,
            output_names: self.outputs.into_iter().map(|(name, _)| name).collect(),
            outputs,
            params: self.params.iter().map(|&(_, value)| T::lit(value)).collect(),
            max_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn eval(source: &str, t: f64, states: &[f64], inputs: &[f64], params: &[f64]) -> f64 {
        let compiler = Compiler::new(&["x", "y"], &["u"], &["k"]).unwrap();
        let code = compiler.compile_str(source).unwrap();
        let frame = Frame {
            t,
            states,
            inputs,
            params,
        };
        VM::execute(&code, &frame, &mut Vec::new())
    }

    #[test]
    fn evaluates_with_precedence() {
        assert_eq!(eval("1 + 2 * 3", 0.0, &[], &[], &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0, &[], &[], &[]), 9.0);
        assert_eq!(eval("2 ^ 3 ^ 2", 0.0, &[], &[], &[]), 512.0);
        assert_eq!(eval("-2 ^ 2", 0.0, &[], &[], &[]), -4.0);
        assert_eq!(eval("8 / 2 / 2", 0.0, &[], &[], &[]), 2.0);
        assert_eq!(eval("1.5e-1 * 2E1", 0.0, &[], &[], &[]), 3.0);
    }

    #[test]
    fn resolves_time_states_inputs_and_params() {
        let value = eval("t + x * 10 + y * 100 + u * 1000 + k", 1.0, &[2.0, 3.0], &[4.0], &[5.0]);
        assert_eq!(value, 1.0 + 20.0 + 300.0 + 4000.0 + 5.0);
        assert_relative_eq!(eval("exp(log(x)) + sqrt(abs(-y))", 0.0, &[2.0, 9.0], &[], &[]), 5.0);
    }

    #[test]
    fn missing_input_slot_reads_nan() {
        assert!(eval("u", 0.0, &[], &[], &[]).is_nan());
    }

    #[test]
    fn reports_errors_instead_of_panicking() {
        let compiler = Compiler::new(&["x"], &[], &[]).unwrap();
        assert_eq!(compiler.compile_str("x + z"), Err(EquationError::UnknownName("z".into())));
        assert_eq!(
            compiler.compile_str("floor(x)"),
            Err(EquationError::UnknownFunction("floor".into()))
        );
        assert_eq!(compiler.compile_str("x $ 2"), Err(EquationError::UnexpectedChar('$')));
        assert!(matches!(compiler.compile_str("(x + 1"), Err(EquationError::Syntax(_))));
        assert!(matches!(compiler.compile_str("x x"), Err(EquationError::Syntax(_))));
        assert!(matches!(compiler.compile_str("1..2"), Err(EquationError::InvalidNumber(_))));
        assert_eq!(
            Compiler::new(&["x"], &["x"], &[]).unwrap_err(),
            EquationError::DuplicateName("x".into())
        );
    }

    #[test]
    fn rejects_unbalanced_bytecode() {
        assert!(Bytecode::new(vec![OpCode::Add]).is_err());
        assert!(Bytecode::new(vec![OpCode::LoadTime, OpCode::LoadTime]).is_err());
        let code =
            Bytecode::new(vec![OpCode::LoadTime, OpCode::LoadConst(1.0), OpCode::Add]).unwrap();
        assert_eq!(code.max_depth(), 2);
    }

    #[test]
    fn model_writes_outputs_on_first_iteration_only() {
        let model = EquationModel::<f64>::builder()
            .state("v", "-k * v + u")
            .inputs(["u"])
            .param("k", 2.0)
            .output("v2", "v * v")
            .build()
            .unwrap();
        assert_eq!(model.state_count(), 1);
        assert_eq!(model.output_count(), 1);

        let mut dydt = [0.0];
        let mut outputs = [0.0];
        let mut io = ModelIo {
            inputs: &[1.0],
            outputs: &mut outputs,
            first_iteration: true,
            model: 0,
        };
        model.flows(0.0, &[3.0], &mut dydt, &mut io).unwrap();
        assert_eq!(dydt, [-5.0]);
        assert_eq!(outputs, [9.0]);

        let mut io = ModelIo {
            inputs: &[1.0],
            outputs: &mut outputs,
            first_iteration: false,
            model: 0,
        };
        model.flows(0.0, &[1.0], &mut dydt, &mut io).unwrap();
        assert_eq!(dydt, [-1.0]);
        assert_eq!(outputs, [9.0]);
    }

    #[test]
    fn evaluation_stack_is_reused_across_calls() {
        let model = EquationModel::<f64>::builder()
            .state("x", "sin(t) * x + 2 * (x - 1)")
            .build()
            .unwrap();
        let mut dydt = [0.0];
        let mut eval = |x: f64| {
            let mut io = ModelIo {
                inputs: &[],
                outputs: &mut [],
                first_iteration: true,
                model: 0,
            };
            model.flows(0.0, &[x], &mut dydt, &mut io).unwrap();
            with_stack::<f64, _>(|stack| (stack.as_ptr(), stack.capacity()))
        };
        let first = eval(1.0);
        let second = eval(2.0);
        assert_eq!(first, second);
        assert!(first.1 >= 3);
        assert_eq!(dydt, [2.0]);
    }

    #[test]
    fn works_in_single_precision() {
        let model = EquationModel::<f32>::builder()
            .state("y", "-0.5 * y")
            .build()
            .unwrap();
        let mut dydt = [0.0f32];
        let mut io = ModelIo {
            inputs: &[],
            outputs: &mut [],
            first_iteration: true,
            model: 0,
        };
        model.flows(0.0, &[2.0], &mut dydt, &mut io).unwrap();
        assert_eq!(dydt, [-1.0]);
    }
}
