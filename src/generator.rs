//! Text generation collaborators.
//!
//! A [`Generator`] turns a fully rendered prompt into a completion. The
//! command generator pipes the prompt through a local program such as
//! `ollama run llama3.2`; the HTTP generator talks to any OpenAI-compatible
//! chat completions endpoint and lets the server apply the chat template.

use std::{
    io::Write,
    process::{Command, Stdio},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_GENERATOR_COMMAND: &str = "ollama run llama3.2";
pub const DEFAULT_GENERATOR_URL: &str =
    "http://localhost:11434/v1/chat/completions";
pub const DEFAULT_GENERATOR_MODEL: &str = "llama3.2";
pub const API_KEY_ENV_VAR: &str = "DOCWHISPER_API_KEY";

/// Produces a completion for a prompt.
pub trait Generator: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

/// Runs a program with the prompt on stdin and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Parse a whitespace-separated command line.
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            Error::Config("generator command is empty".to_string())
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Generator for CommandGenerator {
    fn complete(&self, prompt: &str) -> Result<String> {
        debug!(command = %self.command_line(), "running generator command");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Generation(format!(
                    "failed to run '{}': {e}",
                    self.command_line()
                ))
            })?;

        // Written from another thread so a chatty child cannot deadlock us.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.to_string();
            std::thread::spawn(move || stdin.write_all(prompt.as_bytes()))
        });

        let output = child.wait_with_output().map_err(|e| {
            Error::Generation(format!("generator command failed: {e}"))
        })?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child may exit without reading its input.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(Error::Generation(format!(
                        "failed to write prompt: {e}"
                    )));
                }
                Err(_) => {
                    return Err(Error::Generation(
                        "prompt writer panicked".to_string(),
                    ));
                }
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Generation(format!(
                "'{}' exited with {}: {}",
                self.command_line(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Calls an OpenAI-compatible chat completions endpoint.
pub struct HttpGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(url: &str, model: &str, api_key: Option<String>) -> Result<Self> {
        // Completions can take minutes on local hardware.
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerator")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Generator for HttpGenerator {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        debug!(url = %self.url, model = %self.model, "requesting completion");
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            Error::Generation(format!("request to {} failed: {e}", self.url))
        })?;
        let status = response.status();
        let body = response.text().map_err(|e| {
            Error::Generation(format!("failed to read response: {e}"))
        })?;
        if !status.is_success() {
            return Err(Error::Generation(format!(
                "{} returned {status}: {}",
                self.url,
                body.trim()
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Generation(format!("malformed completion response: {e}"))
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                Error::Generation("completion response had no content".into())
            })
    }
}
