use super::{
    ast::{
        BinaryOperator, BinaryOperatorKind, Block, Expression, ExpressionKind, ExternDecl,
        FunctionDefinition, Identifier, NodeId, Program, RelationalOperator,
        RelationalOperatorKind, Statement, StatementKind, UnaryOperator, UnaryOperatorKind,
    },
    intern::InternedSymbol,
    lexer::{Keyword, Lexer, Span, Token, TokenKind},
    SourceFile, SyntaxError,
};

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    next_node_id: u32,
    /// Span of the most recently consumed token, used for error reporting
    /// when the stream ends unexpectedly
    last_span: Option<Span>,
}

impl<'source> Parser<'source> {
    /// program = extern extern function
    pub fn parse_program(source_file: &'source SourceFile) -> Result<Program<'source>, SyntaxError> {
        let mut parser = Self {
            lexer: Lexer::new(source_file),
            next_node_id: 0,
            last_span: None,
        };

        let ext1 = parser.parse_extern_decl()?;
        let ext2 = parser.parse_extern_decl()?;
        let function = parser.parse_function_definition()?;

        // The function definition must be the last thing in the file
        if let Some(trailing) = parser.lexer.peek()? {
            return Err(parser.error_at(trailing));
        }

        Ok(Program {
            source_file,
            ext1,
            ext2,
            function,
        })
    }

    fn create_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn error_at(&self, token: Token) -> SyntaxError {
        SyntaxError {
            line: self.lexer.source().line_for_position(token.span.start),
            token: self.lexer.source().value_of_span(token.span).to_string(),
        }
    }

    fn error_at_eof(&self) -> SyntaxError {
        let (line, token) = match self.last_span {
            Some(span) => (
                self.lexer.source().line_for_position(span.start),
                self.lexer.source().value_of_span(span).to_string(),
            ),
            None => (1, String::new()),
        };

        SyntaxError { line, token }
    }

    fn expect_peek(&mut self) -> Result<Token, SyntaxError> {
        match self.lexer.peek()? {
            Some(token) => Ok(token),
            None => Err(self.error_at_eof()),
        }
    }

    fn expect_next(&mut self) -> Result<Token, SyntaxError> {
        match self.lexer.next()? {
            Some(token) => {
                self.last_span = Some(token.span);
                Ok(token)
            }
            None => Err(self.error_at_eof()),
        }
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> Result<Token, SyntaxError> {
        let token = self.expect_next()?;

        if token.kind != kind {
            return Err(self.error_at(token));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token, SyntaxError> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    fn peek_is(&mut self, kind: TokenKind) -> Result<bool, SyntaxError> {
        Ok(self.lexer.peek()?.is_some_and(|t| t.kind == kind))
    }

    // main
    fn parse_identifier(&mut self) -> Result<Identifier, SyntaxError> {
        let token = self.expect_next_to_be(TokenKind::Identifier)?;

        Ok(Identifier {
            id: self.create_node_id(),
            span: token.span,
            symbol: InternedSymbol::new(self.lexer.source().value_of_span(token.span)),
        })
    }

    /// extern ( "void" | "int" ) name "(" ( "int" )? ")" ";"
    ///
    /// The parameter of an extern is a bare `int` with no name, and may
    /// be omitted entirely (`read` takes no argument).
    fn parse_extern_decl(&mut self) -> Result<ExternDecl, SyntaxError> {
        let extern_keyword = self.expect_keyword(Keyword::Extern)?;

        let return_type = self.expect_next()?;
        if !matches!(
            return_type.kind,
            TokenKind::Keyword(Keyword::Void) | TokenKind::Keyword(Keyword::Int)
        ) {
            return Err(self.error_at(return_type));
        }

        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen)?;

        if self.peek_is(TokenKind::Keyword(Keyword::Int))? {
            self.expect_keyword(Keyword::Int)?;
        }

        self.expect_next_to_be(TokenKind::CloseParen)?;
        let semicolon = self.expect_next_to_be(TokenKind::Semicolon)?;

        Ok(ExternDecl {
            id: self.create_node_id(),
            span: Span::new(extern_keyword.span.start, semicolon.span.end),
            name,
        })
    }

    /// "int" name "(" ( "int" param )? ")" block
    ///
    /// Unlike an extern, a definition's parameter always carries a name;
    /// only the empty-parens form has no parameter.
    fn parse_function_definition(&mut self) -> Result<FunctionDefinition, SyntaxError> {
        let int_keyword = self.expect_keyword(Keyword::Int)?;
        let name = self.parse_identifier()?;

        self.expect_next_to_be(TokenKind::OpenParen)?;

        let parameter = if self.peek_is(TokenKind::Keyword(Keyword::Int))? {
            self.expect_keyword(Keyword::Int)?;
            Some(self.parse_identifier()?)
        } else {
            None
        };

        self.expect_next_to_be(TokenKind::CloseParen)?;

        let body = self.parse_block()?;

        Ok(FunctionDefinition {
            id: self.create_node_id(),
            span: Span::new(int_keyword.span.start, body.span.end),
            name,
            parameter,
            body,
        })
    }

    /// "{" decl* stmt* "}"
    ///
    /// All declarations precede the first non-declaration statement.
    fn parse_block(&mut self) -> Result<Block, SyntaxError> {
        let open_brace = self.expect_next_to_be(TokenKind::OpenBrace)?;
        let mut statements = Vec::new();

        // Declarations first
        while self.peek_is(TokenKind::Keyword(Keyword::Int))? {
            statements.push(self.parse_declaration()?);
        }

        // Then statements. A declaration appearing here is a syntax error
        // (the `int` keyword cannot start a statement).
        while !self.peek_is(TokenKind::CloseBrace)? {
            statements.push(self.parse_statement()?);
        }

        let close_brace = self.expect_next_to_be(TokenKind::CloseBrace)?;

        Ok(Block {
            id: self.create_node_id(),
            span: Span::new(open_brace.span.start, close_brace.span.end),
            statements,
        })
    }

    /// "int" name ";"
    fn parse_declaration(&mut self) -> Result<Statement, SyntaxError> {
        let int_keyword = self.expect_keyword(Keyword::Int)?;
        let name = self.parse_identifier()?;
        let semicolon = self.expect_next_to_be(TokenKind::Semicolon)?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(int_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Declaration(name),
        })
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let peeked = self.expect_peek()?;

        match peeked.kind {
            TokenKind::Keyword(Keyword::Return) => self.parse_return_statement(),
            TokenKind::Keyword(Keyword::If) => self.parse_if_statement(),
            TokenKind::Keyword(Keyword::While) => self.parse_while_statement(),
            TokenKind::OpenBrace => {
                let block = self.parse_block()?;

                Ok(Statement {
                    id: self.create_node_id(),
                    span: block.span,
                    kind: StatementKind::Block(block),
                })
            }
            TokenKind::Identifier => self.parse_assignment_or_call_statement(),
            _ => Err(self.error_at(peeked)),
        }
    }

    /// "return" expr ";"
    fn parse_return_statement(&mut self) -> Result<Statement, SyntaxError> {
        let return_keyword = self.expect_keyword(Keyword::Return)?;
        let expression = self.parse_expression()?;
        let semicolon = self.expect_next_to_be(TokenKind::Semicolon)?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(return_keyword.span.start, semicolon.span.end),
            kind: StatementKind::Return(Box::new(expression)),
        })
    }

    /// "if" "(" cond ")" stmt ( "else" stmt )?
    fn parse_if_statement(&mut self) -> Result<Statement, SyntaxError> {
        let if_keyword = self.expect_keyword(Keyword::If)?;

        self.expect_next_to_be(TokenKind::OpenParen)?;
        let condition = self.parse_condition()?;
        self.expect_next_to_be(TokenKind::CloseParen)?;

        let then_branch = self.parse_statement()?;

        let else_branch = if self.peek_is(TokenKind::Keyword(Keyword::Else))? {
            self.expect_keyword(Keyword::Else)?;
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };

        let span_end = else_branch
            .as_ref()
            .map(|s| s.span.end)
            .unwrap_or(then_branch.span.end);

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(if_keyword.span.start, span_end),
            kind: StatementKind::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch,
            },
        })
    }

    /// "while" "(" cond ")" stmt
    fn parse_while_statement(&mut self) -> Result<Statement, SyntaxError> {
        let while_keyword = self.expect_keyword(Keyword::While)?;

        self.expect_next_to_be(TokenKind::OpenParen)?;
        let condition = self.parse_condition()?;
        self.expect_next_to_be(TokenKind::CloseParen)?;

        let body = self.parse_statement()?;

        Ok(Statement {
            id: self.create_node_id(),
            span: Span::new(while_keyword.span.start, body.span.end),
            kind: StatementKind::While {
                condition: Box::new(condition),
                body: Box::new(body),
            },
        })
    }

    /// name "=" expr ";"  |  name "(" expr? ")" ";"
    fn parse_assignment_or_call_statement(&mut self) -> Result<Statement, SyntaxError> {
        let name = self.parse_identifier()?;
        let peeked = self.expect_peek()?;

        match peeked.kind {
            TokenKind::Equals => {
                self.expect_next_to_be(TokenKind::Equals)?;
                let value = self.parse_expression()?;
                let semicolon = self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(Statement {
                    id: self.create_node_id(),
                    span: Span::new(name.span.start, semicolon.span.end),
                    kind: StatementKind::Assignment {
                        target: name,
                        value: Box::new(value),
                    },
                })
            }
            TokenKind::OpenParen => {
                let argument = self.parse_call_arguments()?;
                let semicolon = self.expect_next_to_be(TokenKind::Semicolon)?;

                Ok(Statement {
                    id: self.create_node_id(),
                    span: Span::new(name.span.start, semicolon.span.end),
                    kind: StatementKind::Call {
                        callee: name,
                        argument: argument.map(Box::new),
                    },
                })
            }
            _ => Err(self.error_at(peeked)),
        }
    }

    /// "(" expr? ")"
    fn parse_call_arguments(&mut self) -> Result<Option<Expression>, SyntaxError> {
        self.expect_next_to_be(TokenKind::OpenParen)?;

        let argument = if self.peek_is(TokenKind::CloseParen)? {
            None
        } else {
            Some(self.parse_expression()?)
        };

        self.expect_next_to_be(TokenKind::CloseParen)?;

        Ok(argument)
    }

    /// cond = expr ( "<" | ">" | "<=" | ">=" | "==" | "!=" ) expr
    ///
    /// Relational operators live only here; they cannot nest inside
    /// arithmetic expressions.
    fn parse_condition(&mut self) -> Result<Expression, SyntaxError> {
        let lhs = self.parse_expression()?;

        let operator_token = self.expect_next()?;
        let kind = match operator_token.kind {
            TokenKind::LessThan => RelationalOperatorKind::LessThan,
            TokenKind::GreaterThan => RelationalOperatorKind::GreaterThan,
            TokenKind::LessThanOrEqualTo => RelationalOperatorKind::LessThanOrEqualTo,
            TokenKind::GreaterThanOrEqualTo => RelationalOperatorKind::GreaterThanOrEqualTo,
            TokenKind::DoubleEquals => RelationalOperatorKind::Equals,
            TokenKind::NotEquals => RelationalOperatorKind::NotEquals,
            _ => return Err(self.error_at(operator_token)),
        };

        let operator = RelationalOperator {
            id: self.create_node_id(),
            span: operator_token.span,
            kind,
        };

        let rhs = self.parse_expression()?;

        Ok(Expression {
            id: self.create_node_id(),
            span: Span::new(lhs.span.start, rhs.span.end),
            kind: ExpressionKind::Relational {
                operator,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        })
    }

    /// expr = term ( ( "+" | "-" ) term )*
    fn parse_expression(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_term()?;

        while self.expect_peek()?.kind.is_term_operator() {
            let operator_token = self.expect_next()?;
            let kind = match operator_token.kind {
                TokenKind::Plus => BinaryOperatorKind::Add,
                TokenKind::Minus => BinaryOperatorKind::Subtract,
                _ => unreachable!(),
            };

            let operator = BinaryOperator {
                id: self.create_node_id(),
                span: operator_token.span,
                kind,
            };

            let rhs = self.parse_term()?;

            expression = Expression {
                id: self.create_node_id(),
                span: Span::new(expression.span.start, rhs.span.end),
                kind: ExpressionKind::Binary {
                    operator,
                    lhs: Box::new(expression),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(expression)
    }

    /// term = unary ( ( "*" | "/" ) unary )*
    fn parse_term(&mut self) -> Result<Expression, SyntaxError> {
        let mut expression = self.parse_unary()?;

        while self.expect_peek()?.kind.is_factor_operator() {
            let operator_token = self.expect_next()?;
            let kind = match operator_token.kind {
                TokenKind::Asterisk => BinaryOperatorKind::Multiply,
                TokenKind::Slash => BinaryOperatorKind::Divide,
                _ => unreachable!(),
            };

            let operator = BinaryOperator {
                id: self.create_node_id(),
                span: operator_token.span,
                kind,
            };

            let rhs = self.parse_unary()?;

            expression = Expression {
                id: self.create_node_id(),
                span: Span::new(expression.span.start, rhs.span.end),
                kind: ExpressionKind::Binary {
                    operator,
                    lhs: Box::new(expression),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(expression)
    }

    /// unary = "-" unary | primary
    fn parse_unary(&mut self) -> Result<Expression, SyntaxError> {
        if self.peek_is(TokenKind::Minus)? {
            let minus = self.expect_next_to_be(TokenKind::Minus)?;

            let operator = UnaryOperator {
                id: self.create_node_id(),
                span: minus.span,
                kind: UnaryOperatorKind::Negate,
            };

            let operand = self.parse_unary()?;

            return Ok(Expression {
                id: self.create_node_id(),
                span: Span::new(minus.span.start, operand.span.end),
                kind: ExpressionKind::Unary {
                    operator,
                    operand: Box::new(operand),
                },
            });
        }

        self.parse_primary()
    }

    /// primary = IDENT | IDENT "(" expr? ")" | INTEGER | "(" expr ")"
    fn parse_primary(&mut self) -> Result<Expression, SyntaxError> {
        let peeked = self.expect_peek()?;

        match peeked.kind {
            TokenKind::IntegerLiteral => {
                let token = self.expect_next()?;
                let text = self.lexer.source().value_of_span(token.span);

                let value = text.parse::<i32>().map_err(|_| self.error_at(token))?;

                Ok(Expression {
                    id: self.create_node_id(),
                    span: token.span,
                    kind: ExpressionKind::Constant(value),
                })
            }
            TokenKind::Identifier => {
                let name = self.parse_identifier()?;

                // A call like `read()` used as a value
                if self.peek_is(TokenKind::OpenParen)? {
                    let argument = self.parse_call_arguments()?;

                    return Ok(Expression {
                        id: self.create_node_id(),
                        span: name.span,
                        kind: ExpressionKind::Call {
                            callee: name,
                            argument: argument.map(Box::new),
                        },
                    });
                }

                Ok(Expression {
                    id: self.create_node_id(),
                    span: name.span,
                    kind: ExpressionKind::Variable(name),
                })
            }
            TokenKind::OpenParen => {
                self.expect_next_to_be(TokenKind::OpenParen)?;
                let expression = self.parse_expression()?;
                self.expect_next_to_be(TokenKind::CloseParen)?;

                Ok(expression)
            }
            _ => Err(self.error_at(peeked)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFileOrigin;

    const EXTERNS: &str = "extern void print(int); extern int read();";

    fn source(contents: &str) -> SourceFile {
        SourceFile {
            contents: contents.to_string(),
            origin: SourceFileOrigin::Memory,
        }
    }

    fn parse(contents: &str) -> Result<String, SyntaxError> {
        let source = source(contents);
        Parser::parse_program(&source).map(|program| format!("{program:?}"))
    }

    fn parse_body(body: &str) -> Result<String, SyntaxError> {
        parse(&format!("{EXTERNS} int f(int x) {body}"))
    }

    #[test]
    fn parses_every_statement_form() {
        parse_body(
            "{
                int a;
                int b;
                a = x + 10;
                b = a * 2 - -x / 3;
                print(a);
                b = read();
                if (a > 0) { b = 1; } else b = 2;
                while (b < 10) { b = b + 1; }
                { int c; c = 0; print(c); }
                return a + b;
            }",
        )
        .expect("program should parse");
    }

    #[test]
    fn parsing_is_deterministic() {
        let program = format!("{EXTERNS} int f(int x) {{ int a; a = x * 2; return a; }}");

        let first = parse(&program).unwrap();
        let second = parse(&program).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn accepts_parameterless_function() {
        parse(&format!("{EXTERNS} int f() {{ return read(); }}")).expect("should parse");
    }

    #[test]
    fn rejects_unnamed_function_parameter() {
        // The unnamed `int` parameter form is an extern-only rule
        let error = parse(&format!("{EXTERNS} int f(int) {{ return 0; }}")).unwrap_err();
        assert_eq!(error.token, ")");
    }

    #[test]
    fn accepts_unnamed_extern_parameter() {
        parse("extern void print(int); extern int read(); int f(int x) { return x; }")
            .expect("should parse");
    }

    #[test]
    fn requires_exactly_two_externs() {
        let error = parse("extern void print(int); int f(int x) { return x; }").unwrap_err();
        assert_eq!(error.token, "int");
    }

    #[test]
    fn rejects_declaration_after_statement() {
        let error = parse_body("{ int a; a = 1; int b; return a; }").unwrap_err();
        assert_eq!(error.token, "int");
    }

    #[test]
    fn rejects_relational_operator_in_arithmetic() {
        let error = parse_body("{ int a; a = x < 2; return a; }").unwrap_err();
        assert_eq!(error.token, "<");
    }

    #[test]
    fn missing_semicolon_reports_line_and_token() {
        let error = parse(&format!(
            "{EXTERNS}\nint f(int x) {{\n    return x\n}}"
        ))
        .unwrap_err();

        assert_eq!(error.line, 4);
        assert_eq!(error.token, "}");
    }

    #[test]
    fn condition_requires_relational_operator() {
        let error = parse_body("{ while (x) { x = 0; } return x; }").unwrap_err();
        assert_eq!(error.token, ")");
    }

    #[test]
    fn unexpected_eof_reports_last_token() {
        let error = parse(&format!("{EXTERNS} int f(int x) {{ return x;")).unwrap_err();
        assert_eq!(error.token, ";");
    }
}
