use std::fmt::Display;
use std::io::{BufRead, Stdout, StdinLock, Write};

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Number(usize),
    No,
    Quit,
}

impl Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selection::Number(n) => write!(f, "{n}"),
            Selection::No => f.write_str("N"),
            Selection::Quit => f.write_str("Q"),
        }
    }
}

/// Line-oriented console prompts. Closed input reads as `Quit`.
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl Prompter<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn say(&mut self, text: impl Display) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }

    /// Free-form answer, trimmed.
    pub fn answer(&mut self, prompt: &str) -> Result<String> {
        match self.ask(&format!("{prompt} "))? {
            Some(line) => Ok(line),
            None => bail!("input closed"),
        }
    }

    /// `Y`, `Q`, or `N` for anything else.
    pub fn confirm(&mut self, prompt: &str) -> Result<Answer> {
        let Some(line) = self.ask(&format!("{prompt} [Y/N/Q] (N) "))? else {
            return Ok(Answer::Quit);
        };
        Ok(match line.to_ascii_uppercase().as_str() {
            "Y" => Answer::Yes,
            "Q" => Answer::Quit,
            _ => Answer::No,
        })
    }

    /// A number, `N` or `Q`; anything else picks `default`.
    pub fn select(&mut self, prompt: &str, default: Selection) -> Result<Selection> {
        let Some(line) = self.ask(&format!("{prompt} [#/N/Q] ({default}) "))? else {
            return Ok(Selection::Quit);
        };
        if let Ok(n) = line.parse::<usize>() {
            return Ok(Selection::Number(n));
        }
        Ok(match line.to_ascii_uppercase().as_str() {
            "N" => Selection::No,
            "Q" => Selection::Quit,
            _ => default,
        })
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompter(input: &str) -> Prompter<&[u8], Vec<u8>> {
        Prompter::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn confirm_defaults_to_no() {
        let mut p = prompter("y\nq\n\nmaybe\n");
        assert_eq!(p.confirm("Create market?").unwrap(), Answer::Yes);
        assert_eq!(p.confirm("Create market?").unwrap(), Answer::Quit);
        assert_eq!(p.confirm("Create market?").unwrap(), Answer::No);
        assert_eq!(p.confirm("Create market?").unwrap(), Answer::No);
        assert_eq!(p.confirm("Create market?").unwrap(), Answer::Quit);

        let out = String::from_utf8(p.into_output()).unwrap();
        assert!(out.starts_with("Create market? [Y/N/Q] (N) "));
    }

    #[test]
    fn select_numbers_and_default() {
        let mut p = prompter("2\n\nn\nQ\nx\n");
        let default = Selection::Number(1);
        assert_eq!(p.select("Which?", default).unwrap(), Selection::Number(2));
        assert_eq!(p.select("Which?", default).unwrap(), default);
        assert_eq!(p.select("Which?", default).unwrap(), Selection::No);
        assert_eq!(p.select("Which?", default).unwrap(), Selection::Quit);
        assert_eq!(p.select("Which?", Selection::No).unwrap(), Selection::No);

        let out = String::from_utf8(p.into_output()).unwrap();
        assert!(out.contains("Which? [#/N/Q] (1) "));
        assert!(out.ends_with("Which? [#/N/Q] (N) "));
    }

    #[test]
    fn answer_trims_and_fails_on_closed_input() {
        let mut p = prompter(" 19:30 \n");
        assert_eq!(p.answer("What time is this game?").unwrap(), "19:30");
        assert!(p.answer("What time is this game?").is_err());
    }
}
