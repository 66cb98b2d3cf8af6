use crate::error::PipelineError;
use anyhow::{anyhow, Result};
use itertools::Itertools;
use log::debug;
use regex::Regex;
use std::{
    fmt,
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::OnceLock,
};

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Input,
    Output,
}

/// One word of a template, possibly with placeholders inside it
#[derive(Debug, Clone, PartialEq)]
struct Word(Vec<Piece>);

impl Word {
    fn render(&self, input: &Path, output: &Path) -> String {
        self.0
            .iter()
            .map(|piece| match piece {
                Piece::Text(text) => text.to_string(),
                Piece::Input => input.to_string_lossy().to_string(),
                Piece::Output => output.to_string_lossy().to_string(),
            })
            .collect()
    }

    fn has_placeholder(&self) -> bool {
        self.0.iter().any(|p| !matches!(p, Piece::Text(_)))
    }
}

/// An external tool invocation with an input and an output slot.
///
/// Templates are split into words the way a shell would, but no shell ever
/// runs them. Placeholders are `{}` (first is the input, second the output)
/// or `{input}` and `{output}`, and may sit inside a word. A lone `>`
/// sends the tool's stdout to the following word.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    tool: String,
    source: String,
    program: String,
    args: Vec<Word>,
    stdout: Option<Word>,
}

impl CommandTemplate {
    // --------------------------------------------------
    pub fn parse(tool: &str, template: &str) -> Result<Self, PipelineError> {
        let invalid = |reason: &str| PipelineError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let words = split_words(template).map_err(|e| invalid(&e))?;
        let mut positional = 0;
        let mut parsed: Vec<(String, Word)> = vec![];
        for word in words {
            let pieces = split_placeholders(&word, &mut positional)
                .map_err(|e| invalid(&e))?;
            parsed.push((word, Word(pieces)));
        }

        let mut parsed = parsed.into_iter();
        let (program, program_word) = parsed.next().ok_or_else(|| invalid("empty command"))?;
        if program_word.has_placeholder() {
            return Err(invalid("the program name cannot be a placeholder"));
        }

        let mut args = vec![];
        let mut stdout = None;
        while let Some((raw, word)) = parsed.next() {
            if raw == ">" {
                if stdout.is_some() {
                    return Err(invalid("stdout is redirected more than once"));
                }
                let (_, target) = parsed
                    .next()
                    .ok_or_else(|| invalid(r#"nothing follows ">""#))?;
                stdout = Some(target);
            } else {
                args.push(word);
            }
        }

        let pieces = || {
            args.iter()
                .chain(stdout.iter())
                .flat_map(|word| word.0.iter())
        };
        let inputs = pieces().filter(|p| **p == Piece::Input).count();
        let outputs = pieces().filter(|p| **p == Piece::Output).count();
        if (inputs, outputs) != (1, 1) {
            return Err(invalid(&format!(
                "expected one input and one output placeholder, found {inputs} input and {outputs} output"
            )));
        }

        Ok(CommandTemplate {
            tool: tool.to_string(),
            source: template.to_string(),
            program,
            args,
            stdout,
        })
    }

    // --------------------------------------------------
    pub fn tool(&self) -> &str {
        &self.tool
    }

    // --------------------------------------------------
    pub fn program(&self) -> &str {
        &self.program
    }

    // --------------------------------------------------
    /// Fail unless the program can be found on PATH (or at the given path)
    pub fn check_program(&self) -> Result<PathBuf, PipelineError> {
        let found = which::which(&self.program)
            .map_err(|_| PipelineError::ProgramNotFound(self.program.clone()))?;
        debug!(r#"{}: using "{}""#, self.tool, found.display());
        Ok(found)
    }

    // --------------------------------------------------
    pub fn render(&self, input: &Path, output: &Path) -> RenderedCommand {
        RenderedCommand {
            tool: self.tool.clone(),
            program: self.program.clone(),
            args: self.args.iter().map(|w| w.render(input, output)).collect(),
            stdout: self
                .stdout
                .as_ref()
                .map(|w| PathBuf::from(w.render(input, output))),
        }
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// A template filled in for one input and output
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCommand {
    pub tool: String,
    pub program: String,
    pub args: Vec<String>,
    pub stdout: Option<PathBuf>,
}

impl RenderedCommand {
    // --------------------------------------------------
    /// Run to completion. Only failing to start the program or to create
    /// the stdout file is an `Err`; a nonzero exit is reported in the
    /// outcome.
    pub fn run(&self) -> Result<ToolOutcome> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());

        if let Some(path) = &self.stdout {
            let file = File::create(path)
                .map_err(|e| anyhow!("Cannot write {}: {e}", path.display()))?;
            cmd.stdout(Stdio::from(file));
        }

        debug!(r#"Running "{}""#, self);
        let res = cmd
            .output()
            .map_err(|e| anyhow!(r#"Cannot run "{}": {e}"#, self.program))?;

        if !res.stdout.is_empty() {
            debug!("{}", String::from_utf8_lossy(&res.stdout));
        }

        Ok(ToolOutcome {
            command: self.to_string(),
            exit_code: res.status.code(),
            success: res.status.success(),
            stderr: String::from_utf8_lossy(&res.stderr).trim().to_string(),
        })
    }
}

impl fmt::Display for RenderedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args.iter().join(" "))?;
        }
        if let Some(path) = &self.stdout {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

/// What a finished external tool reported
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub command: String,
    /// None when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stderr: String,
}

impl ToolOutcome {
    // --------------------------------------------------
    pub fn status(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "killed by signal".to_string(),
        }
    }
}

// --------------------------------------------------
/// Split on whitespace honoring single quotes, double quotes and
/// backslash escapes
fn split_words(line: &str) -> Result<Vec<String>, String> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Normal,
        SingleQuoted,
        DoubleQuoted,
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut mode = Mode::Normal;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Normal => match ch {
                '\'' => {
                    mode = Mode::SingleQuoted;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::DoubleQuoted;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_word = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_word {
                        out.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(ch);
                    in_word = true;
                }
            },
            Mode::SingleQuoted => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    current.push(ch);
                }
            }
            Mode::DoubleQuoted => match ch {
                '"' => mode = Mode::Normal,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(ch),
            },
        }
    }

    if mode != Mode::Normal {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        out.push(current);
    }
    Ok(out)
}

// --------------------------------------------------
fn split_placeholders(word: &str, positional: &mut usize) -> Result<Vec<Piece>, String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder =
        PLACEHOLDER.get_or_init(|| Regex::new(r"\{(input|output)?\}").unwrap());

    let mut pieces = vec![];
    let mut last = 0;
    for caps in placeholder.captures_iter(word) {
        let Some(found) = caps.get(0) else { continue };
        if found.start() > last {
            pieces.push(Piece::Text(word[last..found.start()].to_string()));
        }
        let piece = match caps.get(1).map(|m| m.as_str()) {
            Some("input") => Piece::Input,
            Some(_) => Piece::Output,
            None => {
                *positional += 1;
                match *positional {
                    1 => Piece::Input,
                    2 => Piece::Output,
                    _ => return Err("more than two {} placeholders".to_string()),
                }
            }
        };
        pieces.push(piece);
        last = found.end();
    }

    if last < word.len() {
        pieces.push(Piece::Text(word[last..].to_string()));
    }
    Ok(pieces)
}
