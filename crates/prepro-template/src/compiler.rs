/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compile preparsed template text into a [`Program`].
//!
//! Text is consumed line by line. A line whose first non-blank characters
//! are the code-block open delimiter starts a code region that runs to the
//! matching close delimiter; a line starting with the line marker is a
//! one-line code region; anything else is literal output with inline spans.
//! A line starting with a backslash before the line marker is literal, with
//! the backslash dropped.
//!
//! Block statements open with a header (`if x:`), may continue with clauses
//! (`elif`, `else`, `except`, `finally`) and close with a line holding only
//! `end`. Blocks left open at the end of the template close implicitly.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{Location, TemplateError, TemplateResult};
use crate::lang::ast::{FunctionDef, Handler, Piece, Program, Stmt, StmtKind};
use crate::lang::lexer::{tokenize, tokenize_lines};
use crate::lang::parser::{Clause, Header, Line, parse_inline, parse_line};
use crate::preparse::{EscapeMarkers, NameFixups, Preparsed, preparse};
use crate::scanner::{capture_ranges, find_close};
use crate::syntax::Syntax;

/// Preparse and compile `text` in one step.
pub fn compile_template(
    text: &str,
    syntax: &Syntax,
    fixups: &mut NameFixups,
    name: &str,
) -> TemplateResult<Program> {
    let preparsed = preparse(text, syntax, fixups)?;
    compile(&preparsed, syntax, name)
}

/// Compile already preparsed text.
pub fn compile(preparsed: &Preparsed, syntax: &Syntax, name: &str) -> TemplateResult<Program> {
    let mut compiler = Compiler {
        syntax,
        escapes: &preparsed.escapes,
        name,
        blocks: BlockBuilder::default(),
        pending: None,
    };
    compiler.run(&preparsed.text)?;
    let body = compiler.blocks.finish(name)?;
    debug!(template = name, statements = body.len(), "compiled template");
    Ok(Program {
        name: name.to_string(),
        body,
    })
}

struct Compiler<'a> {
    syntax: &'a Syntax,
    escapes: &'a EscapeMarkers,
    name: &'a str,
    blocks: BlockBuilder,
    /// Output line still being assembled across `\` continuations.
    pending: Option<(Vec<Piece>, usize)>,
}

impl Compiler<'_> {
    fn locate(&self, line: usize) -> impl Fn(TemplateError) -> TemplateError + '_ {
        move |err| err.with_location(self.name, line)
    }

    fn run(&mut self, text: &str) -> TemplateResult<()> {
        let syntax = self.syntax;
        let open = syntax.block_open.as_str();
        let close = syntax.block_close.as_str();
        let marker = syntax.line_marker.as_str();
        let mut pos = 0;
        let mut line_no = 1;
        let mut at_line_start = true;
        while pos < text.len() {
            let rest = &text[pos..];
            let line_len = rest.find('\n').map_or(rest.len(), |i| i + 1);
            let line = &rest[..line_len];
            let body = line.trim_start_matches([' ', '\t']);
            let indent = &line[..line.len() - body.len()];

            if at_line_start && body.starts_with(open) {
                self.flush_text();
                let code_start = pos + indent.len() + open.len();
                let Some(close_at) = find_close(text, code_start, close, close) else {
                    return Err(TemplateError::syntax(format!(
                        "code block opened with '{open}' is never closed with '{close}'"
                    ))
                    .with_location(self.name, line_no));
                };
                self.code(&text[code_start..close_at], line_no)?;
                let after = close_at + close.len();
                line_no += text[pos..after].matches('\n').count();
                let tail = &text[after..];
                let tail_len = tail.find('\n').map_or(tail.len(), |i| i + 1);
                if tail[..tail_len].trim().is_empty() {
                    pos = after + tail_len;
                    line_no += 1;
                    at_line_start = true;
                } else {
                    pos = after;
                    at_line_start = false;
                }
                continue;
            }

            if at_line_start && body.starts_with(marker) {
                self.flush_text();
                let code = body[marker.len()..].trim_end_matches(['\n', '\r']);
                self.code(code, line_no)?;
            } else if at_line_start
                && body.strip_prefix('\\').is_some_and(|b| b.starts_with(marker))
            {
                let literal = format!("{indent}{}", &body[1..]);
                self.text_line(&literal, line_no)?;
            } else {
                self.text_line(line, line_no)?;
            }
            pos += line_len;
            line_no += 1;
            at_line_start = true;
        }
        self.flush_text();
        Ok(())
    }

    fn code(&mut self, code: &str, first_line: usize) -> TemplateResult<()> {
        trace!(line = first_line, code, "code region");
        let lines = tokenize_lines(code, first_line).map_err(self.locate(first_line))?;
        for logical in lines {
            let line = logical.line;
            let parsed = parse_line(&logical).map_err(self.locate(line))?;
            let result = match parsed {
                Line::Simple(stmts) => {
                    for stmt in stmts {
                        self.blocks.push(stmt);
                    }
                    Ok(())
                }
                Line::Open { header, body } => {
                    self.blocks.open(header, line, body.unwrap_or_default());
                    Ok(())
                }
                Line::Clause { clause, body } => {
                    self.blocks.clause(clause, body.unwrap_or_default())
                }
                Line::End => self.blocks.end(),
            };
            result.map_err(self.locate(line))?;
        }
        Ok(())
    }

    /// Compile one physical output line (newline included, if any).
    fn text_line(&mut self, line: &str, line_no: usize) -> TemplateResult<()> {
        let (content, newline) = if let Some(stripped) = line.strip_suffix("\r\n") {
            (stripped, "\r\n")
        } else if let Some(stripped) = line.strip_suffix('\n') {
            (stripped, "\n")
        } else {
            (line, "")
        };
        let trailing_backslashes = content.len() - content.trim_end_matches('\\').len();
        let joins = !newline.is_empty() && trailing_backslashes % 2 == 1;
        let content = if joins {
            &content[..content.len() - 1]
        } else {
            content
        };

        let (mut pieces, first) = self
            .pending
            .take()
            .unwrap_or_else(|| (Vec::new(), line_no));
        self.inline_pieces(content, line_no, &mut pieces)?;
        if !joins {
            self.push_text(&mut pieces, newline);
        }
        self.pending = Some((pieces, first));
        if !joins {
            self.flush_text();
        }
        Ok(())
    }

    fn inline_pieces(
        &self,
        content: &str,
        line_no: usize,
        pieces: &mut Vec<Piece>,
    ) -> TemplateResult<()> {
        let open = self.syntax.inline_open.as_str();
        let close = self.syntax.inline_close.as_str();
        let mut pos = 0;
        for range in capture_ranges(content, open, close) {
            self.push_text(pieces, &content[pos..range.start]);
            let inner = &content[range.start + open.len()..range.end - close.len()];
            let (raw, source) = match inner.trim_start().strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, inner),
            };
            if source.trim().is_empty() {
                return Err(TemplateError::EmptyExpression {
                    span: content[range.clone()].to_string(),
                    location: Location::new(self.name, line_no),
                });
            }
            let tokens = tokenize(source, line_no).map_err(self.locate(line_no))?;
            let (stmts, echo) = parse_inline(&tokens, line_no).map_err(self.locate(line_no))?;
            pieces.extend(stmts.into_iter().map(|stmt| Piece::Exec(Box::new(stmt))));
            if let Some(expr) = echo {
                pieces.push(Piece::Echo { expr, raw });
            }
            pos = range.end;
        }
        self.push_text(pieces, &content[pos..]);
        Ok(())
    }

    fn push_text(&self, pieces: &mut Vec<Piece>, text: &str) {
        if text.is_empty() {
            return;
        }
        let text = self.escapes.restore(text);
        match pieces.last_mut() {
            Some(Piece::Text(previous)) => previous.push_str(&text),
            _ => pieces.push(Piece::Text(text)),
        }
    }

    fn flush_text(&mut self) {
        if let Some((pieces, line)) = self.pending.take() {
            if !pieces.is_empty() {
                self.blocks.push(Stmt::new(StmtKind::Write(pieces), line));
            }
        }
    }
}

/// Section of an open block.
enum Section {
    Main,
    Clause(Clause),
}

struct Frame {
    header: Header,
    line: usize,
    sections: Vec<(Section, Vec<Stmt>)>,
}

impl Frame {
    fn last_keyword(&self) -> &'static str {
        match self.sections.last().map(|(section, _)| section) {
            Some(Section::Clause(clause)) => clause.keyword(),
            _ => "",
        }
    }

    fn accepts(&self, clause: &Clause) -> bool {
        let last = self.last_keyword();
        let has_except = self
            .sections
            .iter()
            .any(|(section, _)| matches!(section, Section::Clause(Clause::Except { .. })));
        match (&self.header, clause) {
            (Header::If(_), Clause::Elif(_) | Clause::Else) => matches!(last, "" | "elif"),
            (Header::For(..) | Header::While(_), Clause::Else) => last.is_empty(),
            (Header::Try, Clause::Except { .. }) => matches!(last, "" | "except"),
            (Header::Try, Clause::Else) => last == "except",
            (Header::Try, Clause::Finally) => {
                matches!(last, "" | "except" | "else") && (last.is_empty() || has_except)
            }
            _ => false,
        }
    }

    fn build(self) -> TemplateResult<Stmt> {
        let line = self.line;
        let mut sections = self.sections.into_iter();
        let main = sections.next().map(|(_, body)| body).unwrap_or_default();
        let kind = match self.header {
            Header::If(cond) => {
                let mut branches = vec![(cond, main)];
                let mut orelse = Vec::new();
                for (section, body) in sections {
                    match section {
                        Section::Clause(Clause::Elif(cond)) => branches.push((cond, body)),
                        _ => orelse = body,
                    }
                }
                StmtKind::If { branches, orelse }
            }
            Header::For(target, iter) => StmtKind::For {
                target,
                iter,
                body: main,
                orelse: sections.next().map(|(_, body)| body).unwrap_or_default(),
            },
            Header::While(cond) => StmtKind::While {
                cond,
                body: main,
                orelse: sections.next().map(|(_, body)| body).unwrap_or_default(),
            },
            Header::Try => {
                let mut handlers = Vec::new();
                let mut orelse = Vec::new();
                let mut finally = Vec::new();
                let mut has_finally = false;
                for (section, body) in sections {
                    match section {
                        Section::Clause(Clause::Except { classes, name }) => {
                            handlers.push(Handler {
                                classes,
                                name,
                                body,
                            });
                        }
                        Section::Clause(Clause::Finally) => {
                            has_finally = true;
                            finally = body;
                        }
                        _ => orelse = body,
                    }
                }
                if handlers.is_empty() && !has_finally {
                    return Err(TemplateError::syntax(
                        "'try' block needs an 'except' or 'finally' clause",
                    ));
                }
                StmtKind::Try {
                    body: main,
                    handlers,
                    orelse,
                    finally,
                }
            }
            Header::Def { name, params } => StmtKind::Def(Rc::new(FunctionDef {
                name,
                params,
                body: main,
            })),
        };
        Ok(Stmt::new(kind, line))
    }
}

/// Assembles nested statement lists from a flat sequence of lines.
#[derive(Default)]
struct BlockBuilder {
    root: Vec<Stmt>,
    frames: Vec<Frame>,
}

impl BlockBuilder {
    fn current(&mut self) -> &mut Vec<Stmt> {
        match self.frames.last_mut() {
            Some(frame) => match frame.sections.last_mut() {
                Some((_, body)) => body,
                None => &mut self.root,
            },
            None => &mut self.root,
        }
    }

    fn push(&mut self, stmt: Stmt) {
        self.current().push(stmt);
    }

    fn open(&mut self, header: Header, line: usize, body: Vec<Stmt>) {
        self.frames.push(Frame {
            header,
            line,
            sections: vec![(Section::Main, body)],
        });
    }

    fn clause(&mut self, clause: Clause, body: Vec<Stmt>) -> TemplateResult<()> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(TemplateError::syntax(format!(
                "'{}' without an open block",
                clause.keyword()
            )));
        };
        if !frame.accepts(&clause) {
            return Err(TemplateError::syntax(format!(
                "'{}' does not continue the open block started on line {}",
                clause.keyword(),
                frame.line
            )));
        }
        frame.sections.push((Section::Clause(clause), body));
        Ok(())
    }

    fn end(&mut self) -> TemplateResult<()> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| TemplateError::syntax("'end' without an open block"))?;
        let stmt = frame.build()?;
        self.push(stmt);
        Ok(())
    }

    fn finish(mut self, name: &str) -> TemplateResult<Vec<Stmt>> {
        while let Some(line) = self.frames.last().map(|frame| frame.line) {
            debug!(template = name, line, "closing block left open at end of template");
            self.end().map_err(|err| err.with_location(name, line))?;
        }
        Ok(self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile_str(text: &str) -> TemplateResult<Program> {
        compile_template(text, &Syntax::default(), &mut NameFixups::new(), "<string>")
    }

    #[test]
    fn test_program_listing() {
        let program = compile_str("a = {x}\n% if x:\nyes\n% end\n").unwrap();
        assert_eq!(
            program.to_string(),
            "# <string>\n_write('a = ')\n_echo(x)\n_write('\\n')\nif x:\n    _write('yes\\n')\n"
        );
    }

    #[test]
    fn test_nested_blocks_and_clauses() {
        let text = "{%\nfor i in range(3):\n    if i == 1:\n        continue\n    else:\n        pass\n    end\nend\n%}\n";
        let program = compile_str(text).unwrap();
        assert_eq!(program.body.len(), 1);
        let listing = program.to_string();
        assert!(listing.contains("for i in range(3):\n    if i == 1:\n        continue\n    else:\n        pass\n"));
    }

    #[test]
    fn test_unclosed_blocks_close_at_end() {
        let program = compile_str("% for i in [1, 2]:\n{i}\n").unwrap();
        assert!(matches!(program.body[0].kind, StmtKind::For { .. }));
    }

    #[test]
    fn test_unterminated_code_block() {
        let err = compile_str("text\n{% x = 1\n").unwrap_err();
        assert_eq!(err.class_name(), "SyntaxError");
        assert_eq!(err.location().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_empty_inline_expression() {
        let err = compile_str("A = {}\n").unwrap_err();
        assert_eq!(err.class_name(), "EmptyExpressionError");
        assert!(compile_str("A = {\"\"}\n").is_ok());
    }

    #[test]
    fn test_line_continuation_joins_output() {
        let program = compile_str("a \\\nb\n").unwrap();
        assert_eq!(program.body.len(), 1);
        assert_eq!(program.to_string(), "# <string>\n_write('a b\\n')\n");
    }

    #[test]
    fn test_escaped_line_marker_is_literal() {
        let program = compile_str("\\% not code\n").unwrap();
        assert_eq!(program.to_string(), "# <string>\n_write('% not code\\n')\n");
    }

    #[test]
    fn test_else_without_block() {
        let err = compile_str("% else:\n").unwrap_err();
        assert_eq!(err.class_name(), "SyntaxError");
        let err = compile_str("% end\n").unwrap_err();
        assert_eq!(err.class_name(), "SyntaxError");
    }

    #[test]
    fn test_error_line_numbers() {
        let err = compile_str("one\ntwo\n% x = = 1\n").unwrap_err();
        assert_eq!(err.location().map(|l| l.line), Some(3));
    }
}
