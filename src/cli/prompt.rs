use std::io::{self, Write};
use tokio::io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin};

/// Line based questions on stdin/stdout.
pub struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    pub fn new() -> Self {
        Prompt { lines: BufReader::new(stdin()).lines() }
    }

    // None when stdin is closed
    async fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        print!("{} ", question);
        io::stdout().flush()?;

        Ok(self.lines.next_line().await?.map(|line| line.trim().to_string()))
    }

    pub async fn yes_no(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.ask(&format!("{} [y/N]", question)).await?;
        Ok(matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes")))
    }

    /// Asks until the answer is a number. `None` when the answer is empty or stdin is closed.
    pub async fn number(&mut self, question: &str) -> io::Result<Option<f64>> {
        loop {
            let answer = match self.ask(question).await? {
                None => return Ok(None),
                Some(answer) if answer.is_empty() => return Ok(None),
                Some(answer) => answer,
            };

            match answer.replace(',', ".").parse::<f64>() {
                Ok(value) => return Ok(Some(value)),
                Err(_) => println!("\"{}\" is not a number", answer),
            }
        }
    }
}

impl Default for Prompt {
    fn default() -> Self {
        Prompt::new()
    }
}
