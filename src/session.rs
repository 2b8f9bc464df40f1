// Human interaction: questions, notices and approvals

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crate::errors::{PilotError, Result};

pub trait Session {
    fn ask(&mut self, prompt: &str) -> Result<String>;

    fn tell(&mut self, message: &str);

    /// Yes/no gate; anything but `y` or `yes` declines.
    fn approve(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} [y/N]: ", prompt))?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

/// Session over the process's stdin and stdout
#[derive(Debug, Default)]
pub struct ConsoleSession;

impl Session for ConsoleSession {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(PilotError::Session("stdin closed while waiting for an answer".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn tell(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Pre-recorded answers; every prompt and message is kept for inspection
#[derive(Debug, Default)]
pub struct ScriptedSession {
    answers: VecDeque<String>,
    pub prompts: Vec<String>,
    pub messages: Vec<String>,
}

impl ScriptedSession {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Session for ScriptedSession {
    fn ask(&mut self, prompt: &str) -> Result<String> {
        self.prompts.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| PilotError::Session(format!("no scripted answer for: {}", prompt)))
    }

    fn tell(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_accepts_y_and_yes() {
        let mut session = ScriptedSession::new(["y", " YES ", "n", "", "yep"]);
        assert!(session.approve("Apply?").unwrap());
        assert!(session.approve("Apply?").unwrap());
        assert!(!session.approve("Apply?").unwrap());
        assert!(!session.approve("Apply?").unwrap());
        assert!(!session.approve("Apply?").unwrap());
        assert_eq!(session.prompts[0], "Apply? [y/N]: ");
    }

    #[test]
    fn test_running_out_of_answers_is_an_error() {
        let mut session = ScriptedSession::new(Vec::<String>::new());
        assert!(matches!(session.ask("Name?"), Err(PilotError::Session(_))));
    }

    #[test]
    fn test_tell_is_recorded() {
        let mut session = ScriptedSession::default();
        session.tell("Patch summary: files=1 +1 -0");
        assert_eq!(session.messages, vec!["Patch summary: files=1 +1 -0".to_string()]);
        assert_eq!(session.remaining(), 0);
    }
}
