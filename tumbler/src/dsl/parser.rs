//! Recursive-descent parser for the pipeline grammar.
//!
//! ```text
//! pipeline  := "pipeline" "{" agent stages "}"
//! agent     := "agent" ( "none" | "{" "docker" STRING "}" )
//! stages    := "stages" "{" stage+ "}"
//! stage     := "stage" "(" STRING ")" "{" [agent] [steps] [failfast] [parallel] "}"
//! steps     := "steps" "{" step+ "}"
//! step      := IDENT STRING | IDENT param ("," param)*
//! param     := IDENT ":" STRING
//! failfast  := "failFast" BOOL
//! parallel  := "parallel" "{" stage+ "}"
//! ```

use super::lexer::{tokenize, Token, TokenKind};
use crate::errors::{ParseError, ParseErrorKind};
use crate::model::{Agent, Param, ParallelGroup, Pipeline, Stage, Step};

/// Parses pipeline source text into a [`Pipeline`].
///
/// Only the grammar is checked here; structural rules are enforced by
/// [`Pipeline::validate`].
///
/// # Errors
///
/// Returns a [`ParseError`] pointing at the first offending token. No partial
/// tree is ever returned.
pub fn parse_pipeline(source: &str) -> Result<Pipeline, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let pipeline = parser.pipeline()?;
    parser.expect(&TokenKind::Eof, "end of input")?;
    Ok(pipeline)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof and the parser never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_second(&self) -> &TokenKind {
        let index = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let kind = match &token.kind {
            TokenKind::Eof => ParseErrorKind::UnexpectedEof {
                expected: expected.to_string(),
            },
            other => ParseErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: other.to_string(),
            },
        };
        ParseError::new(kind, token.line, token.column)
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token, ParseError> {
        if &self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.at_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{keyword}'")))
        }
    }

    fn string(&mut self, expected: &str) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Str(value) => {
                let value = value.clone();
                self.advance();
                Ok(value)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn ident(&mut self, expected: &str) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(expected)),
        }
    }

    fn open(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::LBrace, "'{'").map(drop)
    }

    fn close(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::RBrace, "'}'").map(drop)
    }

    fn pipeline(&mut self) -> Result<Pipeline, ParseError> {
        self.keyword("pipeline")?;
        self.open()?;
        let agent = self.agent()?;
        self.keyword("stages")?;
        self.open()?;
        let stages = self.stage_list()?;
        self.close()?;
        self.close()?;
        Ok(Pipeline { agent, stages })
    }

    fn agent(&mut self) -> Result<Agent, ParseError> {
        self.keyword("agent")?;
        if self.at_keyword("none") {
            self.advance();
            return Ok(Agent::None);
        }
        if self.peek().kind != TokenKind::LBrace {
            return Err(self.unexpected("'none' or '{'"));
        }
        self.open()?;
        self.keyword("docker")?;
        let image = self.string("image string")?;
        self.close()?;
        Ok(Agent::Container { image })
    }

    /// `stage+`, up to but not including the closing brace.
    fn stage_list(&mut self) -> Result<Vec<Stage>, ParseError> {
        let mut stages = vec![self.stage()?];
        while self.at_keyword("stage") {
            stages.push(self.stage()?);
        }
        Ok(stages)
    }

    fn stage(&mut self) -> Result<Stage, ParseError> {
        self.keyword("stage")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let name = self.string("stage name string")?;
        self.expect(&TokenKind::RParen, "')'")?;
        self.open()?;

        let mut stage = Stage::new(name);
        if self.at_keyword("agent") {
            stage.agent = Some(self.agent()?);
        }
        if self.at_keyword("steps") {
            self.advance();
            self.open()?;
            stage.steps = self.step_list()?;
            self.close()?;
        }
        if self.at_keyword("failFast") {
            self.advance();
            stage.fail_fast = Some(self.boolean()?);
        }
        if self.at_keyword("parallel") {
            self.advance();
            self.open()?;
            stage.parallel = Some(ParallelGroup {
                stages: self.stage_list()?,
            });
            self.close()?;
        }

        if self.peek().kind != TokenKind::RBrace {
            return Err(self.unexpected("'agent', 'steps', 'failFast', 'parallel' or '}'"));
        }
        self.close()?;
        Ok(stage)
    }

    fn step_list(&mut self) -> Result<Vec<Step>, ParseError> {
        let mut steps = vec![self.step()?];
        while matches!(self.peek().kind, TokenKind::Ident(_)) {
            steps.push(self.step()?);
        }
        Ok(steps)
    }

    fn step(&mut self) -> Result<Step, ParseError> {
        let command = self.ident("step command")?;
        match (&self.peek().kind, self.peek_second()) {
            (TokenKind::Str(_), _) => {
                let value = self.string("string")?;
                Ok(Step::SingleArg { command, value })
            }
            (TokenKind::Ident(_), TokenKind::Colon) => {
                let mut params = vec![self.param()?];
                while self.peek().kind == TokenKind::Comma {
                    self.advance();
                    params.push(self.param()?);
                }
                Ok(Step::MultiArg { command, params })
            }
            _ => Err(self.unexpected("string or 'key: value' parameter")),
        }
    }

    fn param(&mut self) -> Result<Param, ParseError> {
        let key = self.ident("parameter name")?;
        self.expect(&TokenKind::Colon, "':'")?;
        let value = self.string("parameter value string")?;
        Ok(Param { key, value })
    }

    fn boolean(&mut self) -> Result<bool, ParseError> {
        let value = match &self.peek().kind {
            TokenKind::Ident(word) if word == "true" => true,
            TokenKind::Ident(word) if word == "false" => false,
            _ => return Err(self.unexpected("'true' or 'false'")),
        };
        self.advance();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::REFERENCE_PIPELINE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_reference_sample() {
        let pipeline = parse_pipeline(REFERENCE_PIPELINE).unwrap();

        assert_eq!(pipeline.agent, Agent::None);
        assert_eq!(pipeline.stages.len(), 3);

        let build = &pipeline.stages[0];
        assert_eq!(build.name, "Example Build");
        assert_eq!(build.agent, Some(Agent::container("maven:3.9.0-eclipse-temurin-11")));
        assert_eq!(build.steps[0], Step::single("echo", "Hello, Maven"));

        let test = &pipeline.stages[1];
        assert_eq!(test.name, "Example Test");
        assert_eq!(test.agent, Some(Agent::container("openjdk:8-jre")));

        let parallel = &pipeline.stages[2];
        assert_eq!(parallel.name, "Parallel Stage");
        assert_eq!(parallel.fail_fast, Some(true));
        assert!(parallel.steps.is_empty());

        let branches = &parallel.parallel.as_ref().unwrap().stages;
        let names: Vec<_> = branches.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Branch A", "Branch B", "Branch C"]);
        for branch in branches {
            assert_eq!(branch.steps.len(), 1);
            assert_eq!(branch.steps[0].name(), "echo");
            assert!(branch.parallel.is_none());
        }
    }

    #[test]
    fn test_parse_multi_arg_step() {
        let source = r#"
            pipeline {
                agent { docker "alpine" }
                stages {
                    stage("Checkout") {
                        steps {
                            git branch: 'master', credentialsId: "123", url: 'ssh://x'
                            echo 'done'
                        }
                    }
                }
            }
        "#;

        let pipeline = parse_pipeline(source).unwrap();

        assert_eq!(pipeline.agent, Agent::container("alpine"));
        assert_eq!(
            pipeline.stages[0].steps,
            vec![
                Step::multi(
                    "git",
                    [("branch", "master"), ("credentialsId", "123"), ("url", "ssh://x")]
                ),
                Step::single("echo", "done"),
            ]
        );
    }

    #[test]
    fn test_parse_nested_parallel_and_fail_fast_false() {
        let source = "
            pipeline { agent none stages {
                stage('outer') {
                    failFast false
                    parallel {
                        stage('left') { steps { echo 'l' } }
                        stage('right') {
                            parallel { stage('deep') { steps { echo 'd' } } }
                        }
                    }
                }
            } }
        ";

        let pipeline = parse_pipeline(source).unwrap();
        let outer = &pipeline.stages[0];

        assert_eq!(outer.fail_fast, Some(false));
        assert!(pipeline.find(&["outer", "right", "deep"]).is_some());
        assert_eq!(pipeline.stage_count(), 4);
    }

    #[test]
    fn test_steps_and_parallel_coexist() {
        let source = "pipeline { agent none stages { stage('s') {
            steps { echo 'after' }
            parallel { stage('b') { steps { echo 'b' } } }
        } } }";

        let stage = &parse_pipeline(source).unwrap().stages[0];
        assert!(stage.has_steps());
        assert!(stage.parallel.is_some());
    }

    #[test]
    fn test_missing_closing_brace() {
        let source = "pipeline { agent none stages { stage('a') { steps { echo 'x' } } }";

        let err = parse_pipeline(source).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnexpectedEof {
                expected: "'}'".to_string()
            }
        );
    }

    #[test]
    fn test_unexpected_token_reports_position() {
        let source = "pipeline {\n  agent none\n  stages {\n    stage 'a' { }\n  }\n}";

        let err = parse_pipeline(source).unwrap_err();
        assert_eq!((err.line, err.column), (4, 11));
        assert_eq!(
            err.kind,
            ParseErrorKind::UnexpectedToken {
                expected: "'('".to_string(),
                found: "string \"a\"".to_string(),
            }
        );
    }

    #[test]
    fn test_clauses_out_of_order_rejected() {
        let source = "pipeline { agent none stages { stage('a') {
            failFast true
            steps { echo 'x' }
        } } }";

        let err = parse_pipeline(source).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnexpectedToken { .. }));
    }

    #[test]
    fn test_invalid_boolean() {
        let source = "pipeline { agent none stages { stage('a') { failFast yes parallel { stage('b') { steps { echo 'x' } } } } } }";

        let err = parse_pipeline(source).unwrap_err();
        assert!(err.to_string().contains("'true' or 'false'"));
    }

    #[test]
    fn test_empty_steps_block_rejected() {
        let source = "pipeline { agent none stages { stage('a') { steps { } } } }";

        let err = parse_pipeline(source).unwrap_err();
        assert!(err.to_string().contains("step command"));
    }

    #[test]
    fn test_empty_stages_rejected() {
        let err = parse_pipeline("pipeline { agent none stages { } }").unwrap_err();
        assert!(err.to_string().contains("'stage'"));
    }

    #[test]
    fn test_trailing_input_rejected() {
        let source = "pipeline { agent none stages { stage('a') { steps { echo 'x' } } } } extra";

        let err = parse_pipeline(source).unwrap_err();
        assert!(err.to_string().contains("end of input"));
    }

    #[test]
    fn test_unterminated_string_surfaces() {
        let err = parse_pipeline("pipeline { agent { docker 'alpine } }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
    }
}
