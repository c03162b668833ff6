//! Recursive-descent parser producing the syntax tree.

use std::rc::Rc;

use crate::ast::*;
use crate::error::{Exception, Result};
use crate::lexer::{Tok, Token, tokenize};

/// Deepest expression or block nesting accepted.
const MAX_DEPTH: usize = 100;

/// A parsed snippet, ready to run.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) body: Vec<Stmt>,
}

/// Parse snippet source.
///
/// Indentation common to every line is removed first, so snippets embedded
/// in indented host strings parse as written.
pub fn parse(src: &str) -> Result<Program> {
    let src = dedent(src);
    let mut parser = Parser::new(tokenize(&src)?);
    let body = parser.program()?;
    Ok(Program { body })
}

fn dedent(src: &str) -> String {
    let margin = src
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    if margin == 0 {
        return src.to_string();
    }
    src.lines()
        .map(|l| l.get(margin..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    loops: usize,
    in_function: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            loops: 0,
            in_function: false,
        }
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn error(&self, message: impl Into<String>) -> Exception {
        Exception::syntax(self.line(), message)
    }

    fn unexpected(&self) -> Exception {
        let near = match self.peek() {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Kw(k) => format!("'{k}'"),
            Tok::Op(o) => format!("'{o}'"),
            Tok::Int(_) | Tok::Float(_) => "number".into(),
            Tok::Str(_) | Tok::FStr(_) => "string".into(),
            Tok::Newline => "end of line".into(),
            Tok::Indent => return self.error("unexpected indent"),
            Tok::Dedent => "dedent".into(),
            Tok::Eof => "end of input".into(),
        };
        self.error(format!("invalid syntax near {near}"))
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.check_op(op);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        let found = self.check_kw(kw);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn name(&mut self) -> Result<Rc<str>> {
        match self.peek() {
            Tok::Name(n) => {
                let name = Rc::from(n.as_str());
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.check_op(";")
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Kw(k) => matches!(*k, "None" | "True" | "False" | "not" | "lambda"),
            Tok::Op(o) => matches!(*o, "(" | "[" | "{" | "-" | "+" | "*" | "~"),
            _ => false,
        }
    }

    // ---- statements ----

    fn program(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw("if") => {
                self.pos += 1;
                self.if_rest()?
            }
            Tok::Kw("while") => self.while_stmt()?,
            Tok::Kw("for") => self.for_stmt()?,
            Tok::Kw("def") => self.def_stmt()?,
            Tok::Kw("try") => self.try_stmt()?,
            Tok::Kw("class") => return Err(self.error("class definitions are not supported")),
            Tok::Op("@") => return Err(self.error("decorators are not supported")),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => return self.simple_statements(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            stmts.push(self.simple()?);
            if !self.eat_op(";") || matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(stmts)
            }
            Tok::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_statements();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;

        self.enter()?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => body.extend(self.statement()?),
            }
        }
        self.leave();
        Ok(body)
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>> {
        self.loops += 1;
        let body = self.block();
        self.loops -= 1;
        body
    }

    fn if_rest(&mut self) -> Result<StmtKind> {
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.check_kw("elif") {
            let line = self.line();
            self.pos += 1;
            vec![Stmt {
                line,
                kind: self.if_rest()?,
            }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_stmt(&mut self) -> Result<StmtKind> {
        self.expect_kw("while")?;
        let test = self.test()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn for_stmt(&mut self) -> Result<StmtKind> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn def_stmt(&mut self) -> Result<StmtKind> {
        self.expect_kw("def")?;
        let name = self.name()?;
        self.expect_op("(")?;
        let (params, vararg, kwarg) = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }

        let (loops, in_function) = (self.loops, self.in_function);
        self.loops = 0;
        self.in_function = true;
        let body = self.block();
        self.loops = loops;
        self.in_function = in_function;

        Ok(StmtKind::Def(Rc::new(FuncDef {
            name,
            params,
            vararg,
            kwarg,
            body: body?,
        })))
    }

    /// Parameter list up to (not including) `close`.
    #[allow(clippy::type_complexity)]
    fn params(&mut self, close: &str) -> Result<(Vec<Param>, Option<Rc<str>>, Option<Rc<str>>)> {
        let mut params: Vec<Param> = Vec::new();
        let mut vararg = None;
        let mut kwarg = None;
        let mut kw_only = false;

        while !self.check_op(close) {
            if kwarg.is_some() {
                return Err(self.error("arguments cannot follow **kwargs"));
            }
            if self.eat_op("**") {
                kwarg = Some(self.name()?);
            } else if self.eat_op("*") {
                if kw_only {
                    return Err(self.error("* argument may appear only once"));
                }
                kw_only = true;
                if let Tok::Name(_) = self.peek() {
                    vararg = Some(self.name()?);
                }
            } else {
                let name = self.name()?;
                if close == ")" && self.eat_op(":") {
                    self.test()?;
                }
                let default = if self.eat_op("=") {
                    Some(self.test()?)
                } else {
                    None
                };
                if default.is_none()
                    && !kw_only
                    && params.iter().any(|p| !p.kw_only && p.default.is_some())
                {
                    return Err(self.error("non-default argument follows default argument"));
                }
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error(format!("duplicate argument '{name}'")));
                }
                params.push(Param {
                    name,
                    default,
                    kw_only,
                });
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok((params, vararg, kwarg))
    }

    fn try_stmt(&mut self) -> Result<StmtKind> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let class = if self.check_op(":") {
                None
            } else {
                Some(self.test()?)
            };
            let name = if self.eat_kw("as") {
                Some(self.name()?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(Handler { class, name, body });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn simple(&mut self) -> Result<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw("pass") => {
                self.pos += 1;
                StmtKind::Pass
            }
            Tok::Kw("break") | Tok::Kw("continue") => {
                let is_break = self.check_kw("break");
                if self.loops == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    return Err(self.error(format!("'{word}' outside loop")));
                }
                self.pos += 1;
                if is_break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            Tok::Kw("return") => {
                if !self.in_function {
                    return Err(self.error("'return' outside function"));
                }
                self.pos += 1;
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            Tok::Kw("raise") => {
                self.pos += 1;
                let exc = if self.at_statement_end() {
                    None
                } else {
                    Some(self.test()?)
                };
                if self.eat_kw("from") {
                    self.test()?;
                }
                StmtKind::Raise(exc)
            }
            Tok::Kw("assert") => {
                self.pos += 1;
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Tok::Kw("del") => {
                self.pos += 1;
                let mut targets = vec![self.target()?];
                while self.eat_op(",") {
                    targets.push(self.target()?);
                }
                StmtKind::Del(targets)
            }
            Tok::Kw("import") | Tok::Kw("from") => {
                self.pos += 1;
                let module = self.dotted_name()?;
                // The rest of the statement names what would be bound.
                while !self.at_statement_end() {
                    self.pos += 1;
                }
                StmtKind::Import(module)
            }
            _ => self.expr_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut name = self.name()?.to_string();
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.name()?);
        }
        Ok(name)
    }

    fn expr_statement(&mut self) -> Result<StmtKind> {
        let first = self.testlist_star()?;

        if self.check_op("=") {
            let mut targets = vec![to_target(first, self.line())?];
            let value = loop {
                self.expect_op("=")?;
                let next = self.testlist_star()?;
                if self.check_op("=") {
                    targets.push(to_target(next, self.line())?);
                } else {
                    break next;
                }
            };
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            let target = match to_target(first, self.line())? {
                t @ (Target::Name(_) | Target::Subscript(..) | Target::Attr(..)) => t,
                _ => {
                    return Err(self.error("illegal expression for augmented assignment"));
                }
            };
            self.pos += 1;
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.eat_op(":") {
            // Annotation; the type expression is parsed and ignored.
            let target = to_target(first, self.line())?;
            self.test()?;
            if self.eat_op("=") {
                let value = self.testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![target],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        Ok(StmtKind::Expr(first))
    }

    // ---- targets ----

    /// Comma-separated targets of a `for` loop or comprehension.
    fn target_list(&mut self) -> Result<Target> {
        let line = self.line();
        let first = self.star_or(Self::arith)?;
        if !self.check_op(",") {
            return to_target(first, line);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_kw("in") {
                break;
            }
            items.push(self.star_or(Self::arith)?);
        }
        to_target(Expr::Tuple(items), line)
    }

    fn target(&mut self) -> Result<Target> {
        let line = self.line();
        let expr = self.arith()?;
        to_target(expr, line)
    }

    // ---- expressions ----

    fn star_or(&mut self, parse: fn(&mut Self) -> Result<Expr>) -> Result<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(parse(self)?)))
        } else {
            parse(self)
        }
    }

    /// `a, b, *c` without parentheses, as on either side of `=`.
    fn testlist_star(&mut self) -> Result<Expr> {
        let first = self.star_or(Self::test)?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        Ok(Expr::Tuple(items))
    }

    fn testlist(&mut self) -> Result<Expr> {
        self.testlist_star()
    }

    pub(crate) fn test(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> Result<Expr> {
        if self.check_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if !self.eat_kw("if") {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw("else")?;
        let orelse = self.test()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn lambda(&mut self) -> Result<Expr> {
        self.expect_kw("lambda")?;
        let line = self.line();
        let (params, vararg, kwarg) = self.params(":")?;
        self.expect_op(":")?;
        let body = self.test()?;
        Ok(Expr::Lambda(Rc::new(FuncDef {
            name: Rc::from("<lambda>"),
            params,
            vararg,
            kwarg,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
        })))
    }

    fn or_test(&mut self) -> Result<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.not_test();
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Kw("in") => CmpOp::In,
                Tok::Kw("not") if matches!(self.peek_at(1), Tok::Kw("in")) => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Kw("is") => {
                    if matches!(self.peek_at(1), Tok::Kw("not")) {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => return Err(self.error("bitwise operators are not supported")),
            _ => return self.power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.factor();
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.factor();
        self.leave();
        Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent?)))
    }

    fn primary(&mut self) -> Result<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = self.name()?;
                expr = Expr::Attr(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>> {
        self.enter()?;
        let mut args = Vec::new();
        while !self.check_op(")") {
            if self.eat_op("**") {
                args.push(Arg::StarStar(self.test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("="))
            {
                let name = self.name()?;
                self.pos += 1;
                args.push(Arg::Kw(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comprehension()?;
                    args.push(Arg::Pos(Expr::ListComp(Box::new(value), generators)));
                } else {
                    args.push(Arg::Pos(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        self.leave();
        Ok(args)
    }

    fn subscript(&mut self) -> Result<Expr> {
        let first = self.slice_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> Result<Expr> {
        let start = if self.check_op(":") {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat_op(":") {
            return start.ok_or_else(|| self.unexpected());
        }
        let bound_ends = |p: &Self| p.check_op(":") || p.check_op("]") || p.check_op(",");
        let stop = if bound_ends(&*self) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !(self.check_op("]") || self.check_op(",")) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice(start.map(Box::new), stop, step))
    }

    fn comprehension(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr> {
        let tok = self.peek().clone();
        match tok {
            Tok::Name(n) => {
                self.pos += 1;
                Ok(Expr::Name(Rc::from(n.as_str())))
            }
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Const(Literal::Int(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Const(Literal::Float(f)))
            }
            Tok::Kw("None") => {
                self.pos += 1;
                Ok(Expr::Const(Literal::None))
            }
            Tok::Kw("True") => {
                self.pos += 1;
                Ok(Expr::Const(Literal::Bool(true)))
            }
            Tok::Kw("False") => {
                self.pos += 1;
                Ok(Expr::Const(Literal::Bool(false)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(),
            Tok::Op("(") => {
                self.pos += 1;
                self.paren()
            }
            Tok::Op("[") => {
                self.pos += 1;
                self.list_display()
            }
            Tok::Op("{") => {
                self.pos += 1;
                self.dict_display()
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole an f-string.
    fn strings(&mut self) -> Result<Expr> {
        let line = self.line();
        let mut parts = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => parts.push(FPart::Lit(s)),
                Tok::FStr(s) => {
                    formatted = true;
                    parts.extend(fstring(&s, line)?);
                }
                _ => break,
            }
            self.pos += 1;
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text: String = parts
            .into_iter()
            .map(|p| match p {
                FPart::Lit(s) => s,
                FPart::Expr { .. } => String::new(),
            })
            .collect();
        Ok(Expr::Const(Literal::Str(Rc::from(text.as_str()))))
    }

    fn paren(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = self.paren_inner();
        self.leave();
        result
    }

    fn paren_inner(&mut self) -> Result<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.star_or(Self::test)?;
        if self.check_kw("for") {
            let generators = self.comprehension()?;
            self.expect_op(")")?;
            return Ok(Expr::ListComp(Box::new(first), generators));
        }
        if self.eat_op(")") {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.error("cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(items))
    }

    fn list_display(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = self.list_inner();
        self.leave();
        result
    }

    fn list_inner(&mut self) -> Result<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_or(Self::test)?;
        if self.check_kw("for") {
            let generators = self.comprehension()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.star_or(Self::test)?);
        }
        self.expect_op("]")?;
        Ok(Expr::List(items))
    }

    fn dict_display(&mut self) -> Result<Expr> {
        self.enter()?;
        let result = self.dict_inner();
        self.leave();
        result
    }

    fn dict_inner(&mut self) -> Result<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let mut items = Vec::new();
        loop {
            if self.eat_op("**") {
                items.push(DictItem::Splat(self.arith()?));
            } else {
                let key = self.test()?;
                if !self.eat_op(":") {
                    return Err(self.error("set literals are not supported"));
                }
                let value = self.test()?;
                if items.is_empty() && self.check_kw("for") {
                    let generators = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp(Box::new(key), Box::new(value), generators));
                }
                items.push(DictItem::Pair(key, value));
            }
            if !self.eat_op(",") || self.check_op("}") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(items))
    }
}

fn to_target(expr: Expr, line: u32) -> Result<Target> {
    match expr {
        Expr::Name(n) => Ok(Target::Name(n)),
        Expr::Subscript(obj, index) => Ok(Target::Subscript(obj, index)),
        Expr::Attr(obj, name) => Ok(Target::Attr(obj, name)),
        Expr::Tuple(items) | Expr::List(items) => {
            let targets = items
                .into_iter()
                .map(|e| to_target(e, line))
                .collect::<Result<Vec<_>>>()?;
            if targets
                .iter()
                .filter(|t| matches!(t, Target::Starred(_)))
                .count()
                > 1
            {
                return Err(Exception::syntax(line, "multiple starred expressions in assignment"));
            }
            Ok(Target::Tuple(targets))
        }
        Expr::Starred(inner) => Ok(Target::Starred(Box::new(to_target(*inner, line)?))),
        _ => Err(Exception::syntax(line, "cannot assign to expression")),
    }
}

/// Split an f-string body into literal text and `{expr!c:spec}` fields.
fn fstring(body: &str, line: u32) -> Result<Vec<FPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '}' => return Err(Exception::syntax(line, "f-string: single '}' is not allowed")),
            '{' => {
                if !text.is_empty() {
                    parts.push(FPart::Lit(std::mem::take(&mut text)));
                }
                let (field, next) = fstring_field(&chars, i + 1, line)?;
                parts.push(field);
                i = next;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Lit(text));
    }
    Ok(parts)
}

/// Parse one replacement field starting just after its `{`. Returns the
/// field and the index just past its closing `}`.
fn fstring_field(chars: &[char], start: usize, line: u32) -> Result<(FPart, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    let mut expr_end = None;
    let mut conversion = None;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end = Some(i);
                conversion = chars.get(i + 1).copied();
                i += 2;
                break;
            }
            ':' | '}' if depth == 0 => {
                expr_end = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }
    let Some(expr_end) = expr_end else {
        return Err(Exception::syntax(line, "f-string: expecting '}'"));
    };
    if conversion.is_some_and(|c| !matches!(c, 'r' | 's' | 'a')) {
        return Err(Exception::syntax(line, "f-string: invalid conversion character"));
    }

    let source: String = chars[start..expr_end].iter().collect();
    let expr = fstring_expr(source.trim(), line)?;

    // Optional format spec, which may itself contain fields.
    let mut spec = Vec::new();
    if chars.get(i) == Some(&':') {
        i += 1;
        let spec_start = i;
        let mut nested = 0usize;
        while i < chars.len() {
            match chars[i] {
                '{' => nested += 1,
                '}' if nested > 0 => nested -= 1,
                '}' => break,
                _ => {}
            }
            i += 1;
        }
        let spec_text: String = chars[spec_start..i.min(chars.len())].iter().collect();
        spec = fstring(&spec_text, line)?;
    }
    if chars.get(i) != Some(&'}') {
        return Err(Exception::syntax(line, "f-string: expecting '}'"));
    }
    Ok((
        FPart::Expr {
            expr: Box::new(expr),
            conversion: conversion.map(|c| if c == 'a' { 'r' } else { c }),
            spec,
        },
        i + 1,
    ))
}

fn fstring_expr(source: &str, line: u32) -> Result<Expr> {
    if source.is_empty() {
        return Err(Exception::syntax(line, "f-string: empty expression not allowed"));
    }
    let relocate = |mut e: Exception| {
        e.line = Some(line);
        e
    };
    let tokens = tokenize(source).map_err(relocate)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.testlist().map_err(relocate)?;
    if !matches!(parser.peek(), Tok::Newline | Tok::Eof) {
        return Err(Exception::syntax(line, "f-string: invalid expression"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(src: &str) -> Vec<Stmt> {
        parse(src).unwrap().body
    }

    fn syntax_error(src: &str) -> String {
        parse(src).unwrap_err().message
    }

    #[test]
    fn parses_assignment_and_calls() {
        let stmts = body("tool = load_tool('maritime-data', 'vessel_tracking')\nx = tool(limit=3)");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[1].kind, StmtKind::Assign { value: Expr::Call(_, args), .. }
            if matches!(&args[0], Arg::Kw(name, _) if &**name == "limit")));
    }

    #[test]
    fn parses_compound_statements() {
        let src = "
            total = 0
            for v in vessels:
                if v['length'] > 100:
                    total += 1
                elif v['length'] > 50:
                    pass
                else:
                    continue
            result = {'count': total}
        ";
        let stmts = body(src);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[2].line, 10);
    }

    #[test]
    fn parses_comprehensions_and_lambdas() {
        let stmts = body("big = [v for v in vs if v > 1]\nkey = lambda x: x['a']\nd = {k: v for k, v in items}");
        assert!(matches!(&stmts[0].kind, StmtKind::Assign { value: Expr::ListComp(..), .. }));
        assert!(matches!(&stmts[1].kind, StmtKind::Assign { value: Expr::Lambda(_), .. }));
        assert!(matches!(&stmts[2].kind, StmtKind::Assign { value: Expr::DictComp(..), .. }));
    }

    #[test]
    fn parses_fstrings() {
        let stmts = body("s = f'{name!r:>10} has {n:.2f} and {{braces}}'");
        let StmtKind::Assign {
            value: Expr::FString(parts),
            ..
        } = &stmts[0].kind
        else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
        assert!(matches!(&parts[0], FPart::Expr { conversion: Some('r'), .. }));
        assert!(matches!(&parts[3], FPart::Lit(s) if s == " and {braces}"));
    }

    #[test]
    fn parses_slices() {
        let stmts = body("a = xs[1:]\nb = xs[::-1]\nc = xs[:2]");
        for stmt in stmts {
            assert!(matches!(stmt.kind, StmtKind::Assign { value: Expr::Subscript(_, ref idx), .. }
                if matches!(**idx, Expr::Slice(..))));
        }
    }

    #[test]
    fn tuple_unpacking_targets() {
        let stmts = body("a, *rest = [1, 2, 3]");
        assert!(matches!(&stmts[0].kind, StmtKind::Assign { targets, .. }
            if matches!(&targets[0], Target::Tuple(t) if t.len() == 2)));
    }

    #[test]
    fn try_except_finally() {
        let src = "try:\n    x = 1\nexcept (KeyError, ValueError) as e:\n    pass\nelse:\n    y = 2\nfinally:\n    z = 3\n";
        let stmts = body(src);
        assert!(matches!(&stmts[0].kind, StmtKind::Try { handlers, orelse, finalbody, .. }
            if handlers.len() == 1 && orelse.len() == 1 && finalbody.len() == 1));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse("x = (1,").is_err());
        assert_eq!(syntax_error("break"), "'break' outside loop");
        assert_eq!(syntax_error("return 1"), "'return' outside function");
        assert_eq!(syntax_error("s = {1, 2}"), "set literals are not supported");
        assert_eq!(syntax_error("1 = x"), "cannot assign to expression");
        assert_eq!(syntax_error("class A:\n    pass"), "class definitions are not supported");
        assert!(syntax_error("def f(a=1, b):\n    pass").contains("non-default"));
    }

    #[test]
    fn nesting_is_bounded() {
        let src = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        assert!(syntax_error(&src).contains("nested"));
    }

    #[test]
    fn import_parses_to_import_statement() {
        let stmts = body("import os\nfrom sys import path");
        assert!(matches!(&stmts[0].kind, StmtKind::Import(m) if m == "os"));
        assert!(matches!(&stmts[1].kind, StmtKind::Import(m) if m == "sys"));
    }

    #[test]
    fn common_indentation_is_removed() {
        let stmts = body("    x = 1\n    if x:\n        y = 2\n");
        assert_eq!(stmts.len(), 2);
    }
}
